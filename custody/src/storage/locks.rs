//! Per-subject serialization.
//!
//! Each subject gets its own `tokio::sync::Mutex`, created on first use and
//! kept in a `DashMap`. A service holds the guard across its whole
//! read-modify-write against the store; different subjects never contend.
//!
//! The last guard out removes the subject's entry, so the map only holds
//! subjects that are locked or being waited on.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::identity::Principal;

#[derive(Debug, Default)]
pub struct SubjectLocks {
    locks: DashMap<Principal, Arc<Mutex<()>>>,
}

/// Exclusive access to one subject until dropped.
#[derive(Debug)]
pub struct SubjectGuard<'a> {
    guard: Option<OwnedMutexGuard<()>>,
    locks: &'a DashMap<Principal, Arc<Mutex<()>>>,
    subject: Principal,
}

impl SubjectLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `subject`.
    pub async fn lock(&self, subject: &Principal) -> SubjectGuard<'_> {
        // Clone the Arc out so the DashMap shard is released before awaiting.
        let mutex = self.locks.entry(subject.clone()).or_default().clone();
        let guard = mutex.lock_owned().await;
        SubjectGuard {
            guard: Some(guard),
            locks: &self.locks,
            subject: subject.clone(),
        }
    }

    /// Number of subjects currently locked or waited on.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

impl Drop for SubjectGuard<'_> {
    fn drop(&mut self) {
        // Release the mutex first so its Arc is no longer counted.
        drop(self.guard.take());
        self.locks
            .remove_if(&self.subject, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn same_subject_is_exclusive() {
        let locks = Arc::new(SubjectLocks::new());
        let alice = Principal::parse("alice").unwrap();

        let guard = locks.lock(&alice).await;
        let contender = {
            let locks = Arc::clone(&locks);
            let alice = alice.clone();
            tokio::spawn(async move {
                let _guard = locks.lock(&alice).await;
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        drop(guard);
        contender.await.unwrap();
    }

    #[tokio::test]
    async fn different_subjects_do_not_contend() {
        let locks = SubjectLocks::new();
        let _alice = locks.lock(&Principal::parse("alice").unwrap()).await;
        let _bob = locks.lock(&Principal::parse("bob").unwrap()).await;
        assert_eq!(locks.len(), 2);
    }

    #[tokio::test]
    async fn entries_are_removed_once_unused() {
        let locks = SubjectLocks::new();
        for i in 0..100 {
            let subject = Principal::parse(format!("user-{i}")).unwrap();
            let _guard = locks.lock(&subject).await;
        }
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn a_waiting_locker_keeps_the_entry() {
        let locks = Arc::new(SubjectLocks::new());
        let alice = Principal::parse("alice").unwrap();

        let guard = locks.lock(&alice).await;
        let waiter = {
            let locks = Arc::clone(&locks);
            let alice = alice.clone();
            tokio::spawn(async move {
                let _guard = locks.lock(&alice).await;
                locks.len()
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        drop(guard);
        // The waiter still held a reference when the first guard dropped.
        assert_eq!(waiter.await.unwrap(), 1);
        assert!(locks.is_empty());
    }
}
