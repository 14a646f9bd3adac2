//! In-process [`CustodyStore`]: a `HashMap` behind a `parking_lot::RwLock`.
//!
//! Nothing survives a restart. Used by the tests and by the operator tool's
//! `--ephemeral` mode.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;

use super::{CustodyStore, StoreResult, SubjectRecord};
use crate::identity::Principal;

#[derive(Debug, Default)]
pub struct MemoryStore {
    records: RwLock<HashMap<Principal, SubjectRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

#[async_trait]
impl CustodyStore for MemoryStore {
    async fn get(&self, subject: &Principal) -> StoreResult<Option<SubjectRecord>> {
        Ok(self.records.read().get(subject).cloned())
    }

    async fn put(&self, record: &SubjectRecord) -> StoreResult<()> {
        self.records
            .write()
            .insert(record.subject_id.clone(), record.clone());
        Ok(())
    }

    async fn subjects(&self) -> StoreResult<Vec<Principal>> {
        let mut subjects: Vec<Principal> = self.records.read().keys().cloned().collect();
        subjects.sort();
        Ok(subjects)
    }
}
