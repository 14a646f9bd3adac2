//! # KeyCustody Facade
//!
//! Bundles the three custody services over one shared [`CustodyContext`]:
//! the store, the per-subject locks, the in-memory recovery shares, the
//! clock, and the configuration.
//!
//! ```text
//!                 ┌──────────────────── KeyCustody ────────────────────┐
//!                 │ InvitationService   RecoveryService   DevicePairing│
//!                 └──────────┬────────────────┬────────────────┬───────┘
//!                            └──────── CustodyContext ─────────┘
//!                   store · SubjectLocks · HeldShares · clock · config
//! ```
//!
//! Services are cheap to clone; each holds an `Arc` of the context.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::clock::{Clock, SystemClock};
use crate::config::CustodyConfig;
use crate::device::DevicePairing;
use crate::identity::Principal;
use crate::invitation::{InvitationService, InvitationSweeper};
use crate::recovery::{HeldShares, RecoveryService};
use crate::storage::{CustodyStore, MemoryStore, StoreResult, SubjectLocks, SubjectRecord};

/// State shared by every custody service.
pub struct CustodyContext {
    pub(crate) store: Arc<dyn CustodyStore>,
    pub(crate) locks: SubjectLocks,
    pub(crate) held: HeldShares,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) config: CustodyConfig,
}

impl CustodyContext {
    pub fn new(store: Arc<dyn CustodyStore>, clock: Arc<dyn Clock>, config: CustodyConfig) -> Self {
        Self {
            store,
            locks: SubjectLocks::new(),
            held: HeldShares::new(),
            clock,
            config,
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn config(&self) -> &CustodyConfig {
        &self.config
    }

    /// The stored record, or a fresh empty one.
    pub(crate) async fn load_or_new(&self, subject: &Principal) -> StoreResult<SubjectRecord> {
        Ok(self
            .store
            .get(subject)
            .await?
            .unwrap_or_else(|| SubjectRecord::new(subject.clone())))
    }
}

impl std::fmt::Debug for CustodyContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CustodyContext")
            .field("config", &self.config)
            .field("locked_subjects", &self.locks.len())
            .field("sessions_holding_shares", &self.held.sessions())
            .finish_non_exhaustive()
    }
}

/// Entry point to the custody subsystem.
#[derive(Debug, Clone)]
pub struct KeyCustody {
    ctx: Arc<CustodyContext>,
    invitations: InvitationService,
    recovery: RecoveryService,
    devices: DevicePairing,
}

impl KeyCustody {
    /// Custody over `store` with the wall clock and default configuration.
    pub fn new(store: Arc<dyn CustodyStore>) -> Self {
        Self::with_parts(store, Arc::new(SystemClock), CustodyConfig::default())
    }

    pub fn with_parts(
        store: Arc<dyn CustodyStore>,
        clock: Arc<dyn Clock>,
        config: CustodyConfig,
    ) -> Self {
        let ctx = Arc::new(CustodyContext::new(store, clock, config));
        Self {
            invitations: InvitationService::new(Arc::clone(&ctx)),
            recovery: RecoveryService::new(Arc::clone(&ctx)),
            devices: DevicePairing::new(Arc::clone(&ctx)),
            ctx,
        }
    }

    /// Custody over a fresh [`MemoryStore`].
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    pub fn invitations(&self) -> &InvitationService {
        &self.invitations
    }

    pub fn recovery(&self) -> &RecoveryService {
        &self.recovery
    }

    pub fn devices(&self) -> &DevicePairing {
        &self.devices
    }

    pub fn context(&self) -> &Arc<CustodyContext> {
        &self.ctx
    }

    /// Read-only snapshot of everything stored for `subject`.
    pub async fn subject(&self, subject: &Principal) -> StoreResult<Option<SubjectRecord>> {
        self.ctx.store.get(subject).await
    }

    /// Start the invitation sweeper on the configured interval.
    pub fn spawn_sweeper(&self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        InvitationSweeper::new(self.invitations.clone(), self.ctx.config.sweep_interval)
            .spawn(shutdown)
    }
}
