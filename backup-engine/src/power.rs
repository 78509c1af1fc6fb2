//! Power-state controller.
//!
//! A power signal is only trusted once a status poll confirms it. Every
//! operation on a given server goes through that server's queue, so a manual
//! start and a scheduled stop never interleave on the same machine while
//! different servers proceed concurrently.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{timeout, Instant};
use tracing::{debug, error, info, warn};

use crate::config::PowerConfig;
use crate::error::{EngineError, Result};
use crate::remote::PowerControl;
use crate::types::{ManagedServer, PowerSignal, PowerState};

/// Result of a confirmed power change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PowerOutcome {
    /// The server was already in the requested state; no signal was sent.
    AlreadyInState(PowerState),
    Reached(PowerState),
    TimedOut { last_observed: PowerState },
    /// The signal itself could not be delivered.
    TransportError(String),
}

pub struct PowerController {
    control: Arc<dyn PowerControl>,
    poll_interval: Duration,
    max_attempts: u32,
    request_timeout: Duration,
    confirm_window: Duration,
    queues: DashMap<String, Arc<Mutex<()>>>,
}

impl PowerController {
    pub fn new(control: Arc<dyn PowerControl>, config: &PowerConfig) -> Self {
        Self {
            control,
            poll_interval: config.poll_interval(),
            max_attempts: config.max_attempts,
            request_timeout: config.request_timeout(),
            confirm_window: config.confirm_window(),
            queues: DashMap::new(),
        }
    }

    fn server_queue(&self, server_id: &str) -> Arc<Mutex<()>> {
        self.queues
            .entry(server_id.to_string())
            .or_default()
            .clone()
    }

    /// Fresh server list from the panel, bounded by the request timeout.
    pub async fn list_servers(&self) -> Result<Vec<ManagedServer>> {
        timeout(self.request_timeout, self.control.list_servers())
            .await
            .map_err(|_| EngineError::Transport(format!("server list timed out after {:?}", self.request_timeout)))?
    }

    /// Fresh status read. A failed or hung query is reported as `Unknown`.
    pub async fn observe(&self, server: &ManagedServer) -> PowerState {
        self.observe_within(server, self.request_timeout).await
    }

    async fn observe_within(&self, server: &ManagedServer, budget: Duration) -> PowerState {
        match timeout(budget, self.control.status(&server.id)).await {
            Ok(Ok(state)) => state,
            Ok(Err(e)) => {
                warn!(server_id = %server.id, error = %e, "Status query failed");
                PowerState::Unknown
            }
            Err(_) => {
                warn!(server_id = %server.id, ?budget, "Status query timed out");
                PowerState::Unknown
            }
        }
    }

    async fn signal_within(&self, server: &ManagedServer, signal: PowerSignal, budget: Duration) -> Result<()> {
        timeout(budget, self.control.signal(&server.id, signal))
            .await
            .map_err(|_| EngineError::Transport(format!("{signal} signal timed out after {budget:?}")))?
    }

    /// Drive `server` to the state implied by `signal` and wait for confirmation.
    ///
    /// The whole call, initial query and signal included, ends within
    /// `poll_interval * max_attempts` of taking the server's turn.
    pub async fn set_power(&self, server: &ManagedServer, signal: PowerSignal) -> PowerOutcome {
        let queue = self.server_queue(&server.id);
        let _turn = queue.lock().await;
        let deadline = Instant::now() + self.confirm_window;
        let budget = || deadline.saturating_duration_since(Instant::now()).min(self.request_timeout);

        let target = signal.target_state();
        let initial = self.observe_within(server, budget()).await;
        info!(server_id = %server.id, name = %server.name, state = %initial, %signal, "Power request");

        if initial == target {
            return PowerOutcome::AlreadyInState(initial);
        }

        if let Err(e) = self.signal_within(server, signal, budget()).await {
            error!(server_id = %server.id, %signal, error = %e, "Failed to send power signal");
            return PowerOutcome::TransportError(e.to_string());
        }

        let mut last = initial;
        for attempt in 1..=self.max_attempts {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            tokio::time::sleep(self.poll_interval.min(remaining)).await;
            last = self.observe_within(server, budget()).await;
            debug!(server_id = %server.id, attempt, state = %last, "Polled power state");
            if last == target {
                info!(server_id = %server.id, state = %last, attempt, "Power state confirmed");
                return PowerOutcome::Reached(last);
            }
        }

        warn!(
            server_id = %server.id,
            last_observed = %last,
            attempts = self.max_attempts,
            "Power state not confirmed before timeout"
        );
        PowerOutcome::TimedOut { last_observed: last }
    }

    /// Send a signal without waiting for the state change. Still queued behind
    /// any in-flight operation on the same server.
    pub async fn send_signal(&self, server: &ManagedServer, signal: PowerSignal) -> Result<()> {
        let queue = self.server_queue(&server.id);
        let _turn = queue.lock().await;
        self.signal_within(server, signal, self.request_timeout).await?;
        info!(server_id = %server.id, name = %server.name, %signal, "Power signal sent");
        Ok(())
    }
}
