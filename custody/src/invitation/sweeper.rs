//! # Invitation Sweeper
//!
//! Background task that runs [`InvitationService::sweep_expired`] on a fixed
//! interval, so overdue invitations release their shares even when nobody
//! touches the subject.
//!
//! ## Shutdown
//!
//! The loop watches a `tokio::sync::watch` channel. When the sender sends
//! `true` or is dropped, the loop exits after the sweep in progress, if any.
//! A failed sweep is logged and retried on the next tick; it never stops the
//! loop.

use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::InvitationService;

/// Periodically expires overdue invitations.
#[derive(Debug, Clone)]
pub struct InvitationSweeper {
    invitations: InvitationService,
    interval: Duration,
}

impl InvitationSweeper {
    pub fn new(invitations: InvitationService, interval: Duration) -> Self {
        Self {
            invitations,
            interval,
        }
    }

    /// Run until shutdown. The first sweep happens immediately.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(interval_ms = self.interval.as_millis() as u64, "invitation sweeper starting");
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if *shutdown.borrow() {
                info!("invitation sweeper received shutdown signal, exiting cleanly");
                return;
            }

            tokio::select! {
                _ = ticker.tick() => {
                    match self.invitations.sweep_expired().await {
                        Ok(released) if !released.is_empty() => {
                            info!(released = released.len(), "sweep released reserved shares");
                        }
                        Ok(_) => debug!("sweep tick: nothing overdue"),
                        Err(e) => warn!(error = %e, "invitation sweep failed"),
                    }
                }
                _ = shutdown.changed() => {
                    info!("invitation sweeper shutting down");
                    return;
                }
            }
        }
    }

    /// Spawn [`run`](Self::run) on the current tokio runtime.
    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(shutdown).await })
    }
}
