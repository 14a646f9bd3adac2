//! # SledStore: Persistent Custody Storage
//!
//! A [`CustodyStore`] on sled's embedded key-value store.
//!
//! ## Tree Layout
//!
//! | Tree       | Key                   | Value                    |
//! |------------|-----------------------|--------------------------|
//! | `subjects` | principal (UTF-8)     | `bincode(SubjectRecord)` |
//!
//! Every `put` is flushed before returning, so a record acknowledged to the
//! caller is on disk.

use async_trait::async_trait;
use sled::{Db, Tree};
use std::path::Path;
use tracing::debug;

use super::{CustodyStore, StoreError, StoreResult, SubjectRecord};
use crate::identity::Principal;

const SUBJECTS_TREE: &str = "subjects";

/// Persistent storage for subject records.
///
/// sled is thread-safe; share a `SledStore` across tasks via `Arc` without
/// extra locking.
#[derive(Debug, Clone)]
pub struct SledStore {
    db: Db,
    subjects: Tree,
}

impl SledStore {
    /// Open or create a store at the given directory.
    pub fn open<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        let db = sled::open(path)?;
        Self::from_db(db)
    }

    /// A store that is deleted when dropped. For tests.
    pub fn open_temporary() -> StoreResult<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    fn from_db(db: Db) -> StoreResult<Self> {
        let subjects = db.open_tree(SUBJECTS_TREE)?;
        Ok(Self { db, subjects })
    }

    /// Number of stored subject records.
    pub fn subject_count(&self) -> usize {
        self.subjects.len()
    }
}

#[async_trait]
impl CustodyStore for SledStore {
    async fn get(&self, subject: &Principal) -> StoreResult<Option<SubjectRecord>> {
        match self.subjects.get(subject.as_str().as_bytes())? {
            Some(bytes) => {
                let record = bincode::deserialize(&bytes)
                    .map_err(|e| StoreError::Serialization(e.to_string()))?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    async fn put(&self, record: &SubjectRecord) -> StoreResult<()> {
        let bytes =
            bincode::serialize(record).map_err(|e| StoreError::Serialization(e.to_string()))?;
        self.subjects
            .insert(record.subject_id.as_str().as_bytes(), bytes)?;
        self.db.flush()?;
        debug!(subject = %record.subject_id, "subject record persisted");
        Ok(())
    }

    async fn subjects(&self) -> StoreResult<Vec<Principal>> {
        self.subjects
            .iter()
            .keys()
            .map(|key| {
                let key = key?;
                let text = String::from_utf8(key.to_vec())
                    .map_err(|e| StoreError::CorruptKey(e.to_string()))?;
                Principal::parse(text).map_err(|e| StoreError::CorruptKey(e.to_string()))
            })
            .collect()
    }
}
