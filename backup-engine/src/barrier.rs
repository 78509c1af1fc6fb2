//! Shutdown barrier: stop the whole fleet and wait until every server is offline.

use futures_util::future::join_all;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::BarrierConfig;
use crate::power::PowerController;
use crate::types::{ManagedServer, PowerSignal, PowerState};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuiesceOutcome {
    /// A batch query saw every server offline.
    AllOffline { polls: u32 },
    /// The poll ceiling was hit; these servers were not offline in the last batch.
    PartialQuiesce { pending: Vec<(ManagedServer, PowerState)> },
    Cancelled,
    /// Another barrier was already active; nothing was done.
    Busy,
}

impl QuiesceOutcome {
    pub fn is_satisfied(&self) -> bool {
        matches!(self, QuiesceOutcome::AllOffline { .. })
    }
}

pub struct ShutdownBarrier {
    power: Arc<PowerController>,
    poll_interval: Duration,
    max_polls: Option<u32>,
    active: AtomicBool,
}

/// Clears the active flag when the barrier returns, on every path.
struct ActiveGuard<'a>(&'a AtomicBool);

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl ShutdownBarrier {
    pub fn new(power: Arc<PowerController>, config: &BarrierConfig) -> Self {
        Self {
            power,
            poll_interval: config.poll_interval(),
            max_polls: config.max_polls,
            active: AtomicBool::new(false),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub async fn quiesce_all(
        &self,
        servers: &[ManagedServer],
        cancel: &CancellationToken,
    ) -> QuiesceOutcome {
        if self
            .active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            warn!("Shutdown barrier already active, rejecting second entry");
            return QuiesceOutcome::Busy;
        }
        let _guard = ActiveGuard(&self.active);

        if servers.is_empty() {
            info!("No managed servers, barrier trivially satisfied");
            return QuiesceOutcome::AllOffline { polls: 0 };
        }

        info!(count = servers.len(), "Stopping all servers before backup");
        for server in servers {
            // a send can queue behind an operator command on the same server
            let sent = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!(server_id = %server.id, "Shutdown barrier cancelled while stopping servers");
                    return QuiesceOutcome::Cancelled;
                }
                sent = self.power.send_signal(server, PowerSignal::Stop) => sent,
            };
            if let Err(e) = sent {
                warn!(server_id = %server.id, name = %server.name, error = %e, "Failed to send stop signal");
            }
        }

        let mut pending: Vec<(ManagedServer, PowerState)> = servers
            .iter()
            .map(|s| (s.clone(), PowerState::Unknown))
            .collect();
        let mut polls = 0u32;

        loop {
            if let Some(max) = self.max_polls {
                if polls >= max {
                    warn!(
                        polls,
                        pending = pending.len(),
                        "Shutdown barrier gave up with servers still online"
                    );
                    return QuiesceOutcome::PartialQuiesce { pending };
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Shutdown barrier cancelled");
                    return QuiesceOutcome::Cancelled;
                }
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
            polls += 1;

            let states = join_all(servers.iter().map(|s| self.power.observe(s))).await;
            pending.clear();
            for (server, state) in servers.iter().zip(states) {
                debug!(server_id = %server.id, name = %server.name, %state, poll = polls, "Barrier status");
                if state != PowerState::Offline {
                    pending.push((server.clone(), state));
                }
            }

            if pending.is_empty() {
                info!(polls, "All servers offline");
                return QuiesceOutcome::AllOffline { polls };
            }
            info!(
                polls,
                offline = servers.len() - pending.len(),
                total = servers.len(),
                "Waiting for servers to go offline"
            );
        }
    }
}
