//! Submitted share bytes, kept in process memory only.
//!
//! A recovery session persists the ids of the shares it has collected. The
//! shares themselves live here, keyed by session id, until the session
//! completes or fails. A restart loses them and the affected guardians
//! submit again.

use dashmap::DashMap;
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

use crate::sharing::Share;

#[derive(Debug, Default)]
pub struct HeldShares {
    sessions: DashMap<Uuid, BTreeMap<Uuid, Share>>,
}

impl HeldShares {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep `share` for `session`, replacing any earlier copy with its id.
    pub fn hold(&self, session: Uuid, share: Share) {
        self.sessions
            .entry(session)
            .or_default()
            .insert(share.id, share);
    }

    /// Which of `ids` are not held for `session`.
    pub fn missing(&self, session: Uuid, ids: &BTreeSet<Uuid>) -> Vec<Uuid> {
        let held = self.sessions.get(&session);
        ids.iter()
            .filter(|id| !held.as_ref().is_some_and(|shares| shares.contains_key(*id)))
            .copied()
            .collect()
    }

    /// Copies of the held shares whose ids are in `ids`.
    pub fn collect(&self, session: Uuid, ids: &BTreeSet<Uuid>) -> Vec<Share> {
        self.sessions
            .get(&session)
            .map(|shares| {
                ids.iter()
                    .filter_map(|id| shares.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Drop every share held for `session`. Returns how many there were.
    pub fn discard(&self, session: Uuid) -> usize {
        self.sessions
            .remove(&session)
            .map_or(0, |(_, shares)| shares.len())
    }

    /// Number of sessions with shares in memory.
    pub fn sessions(&self) -> usize {
        self.sessions.len()
    }
}
