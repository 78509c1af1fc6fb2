//! Operator commands: list the fleet, start or stop a server by its number
//! in the listing.
//!
//! Numbers are 1-based positions in a listing fetched fresh for every
//! command, so they follow the panel's ordering at the time of the call.

use backup_engine::barrier::QuiesceOutcome;
use backup_engine::pipeline::{BackupPipeline, FolderOutcome, PassReport};
use backup_engine::power::{PowerController, PowerOutcome};
use backup_engine::retention::RetentionReport;
use backup_engine::{ManagedServer, PowerSignal, PowerState};
use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServerEntry {
    pub index: usize,
    pub id: String,
    pub name: String,
    pub state: PowerState,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("No servers available or there was an error fetching servers.")]
    NoServers,

    #[error("Invalid server number.")]
    InvalidIndex,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PowerReply {
    pub server: ManagedServer,
    pub signal: PowerSignal,
    pub outcome: PowerOutcome,
}

async fn fetch_servers(power: &PowerController) -> Result<Vec<ManagedServer>, CommandError> {
    let servers = power.list_servers().await.map_err(|e| {
        warn!(error = %e, "Failed to fetch servers");
        CommandError::NoServers
    })?;
    if servers.is_empty() {
        return Err(CommandError::NoServers);
    }
    Ok(servers)
}

/// Fresh listing with every server's current state, queried concurrently.
pub async fn list_servers(power: &PowerController) -> Result<Vec<ServerEntry>, CommandError> {
    let servers = fetch_servers(power).await?;
    let states = join_all(servers.iter().map(|s| power.observe(s))).await;
    Ok(servers
        .into_iter()
        .zip(states)
        .enumerate()
        .map(|(i, (server, state))| ServerEntry {
            index: i + 1,
            id: server.id,
            name: server.name,
            state,
        })
        .collect())
}

pub fn render_listing(entries: &[ServerEntry]) -> String {
    let lines: Vec<String> = entries
        .iter()
        .map(|e| format!("{}. {} - Status: {}", e.index, e.name, e.state))
        .collect();
    format!(
        "Available servers:\n{}\n\nUse start <number> to start a server.\nUse stop <number> to stop a server.",
        lines.join("\n")
    )
}

/// Resolve `number` against a fresh listing and drive that server.
pub async fn set_power_by_index(
    power: &PowerController,
    number: usize,
    signal: PowerSignal,
) -> Result<PowerReply, CommandError> {
    let servers = fetch_servers(power).await?;
    let server = number
        .checked_sub(1)
        .and_then(|i| servers.into_iter().nth(i))
        .ok_or(CommandError::InvalidIndex)?;
    let outcome = power.set_power(&server, signal).await;
    Ok(PowerReply { server, signal, outcome })
}

impl PowerReply {
    pub fn succeeded(&self) -> bool {
        matches!(self.outcome, PowerOutcome::AlreadyInState(_) | PowerOutcome::Reached(_))
    }

    pub fn message(&self) -> String {
        let name = &self.server.name;
        match (&self.outcome, self.signal) {
            (PowerOutcome::AlreadyInState(_), PowerSignal::Start) => {
                format!("Server \"{name}\" is already running!")
            }
            (PowerOutcome::AlreadyInState(_), PowerSignal::Stop) => {
                format!("Server \"{name}\" is already stopped!")
            }
            (PowerOutcome::Reached(state), _) => format!("Server \"{name}\" is now {state}."),
            (PowerOutcome::TimedOut { last_observed }, signal) => format!(
                "Server \"{name}\" {signal} command sent, but status remains {last_observed}. \
                 It may take longer to fully {signal}."
            ),
            (PowerOutcome::TransportError(_), signal) => {
                format!("Failed to {signal} server \"{name}\". Check console for details.")
            }
        }
    }
}

/// What an operator sees about a finished backup pass.
#[derive(Debug, Clone, Serialize)]
pub struct PassSummary {
    pub finished_at: DateTime<Utc>,
    pub barrier: Option<String>,
    pub aborted: Option<String>,
    pub completed: usize,
    pub folders: Vec<FolderSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FolderSummary {
    pub label: String,
    pub status: &'static str,
    pub detail: String,
}

impl PassSummary {
    pub fn from_report(report: &PassReport, finished_at: DateTime<Utc>) -> Self {
        let barrier = report.barrier.as_ref().map(|outcome| match outcome {
            QuiesceOutcome::AllOffline { polls } => format!("all servers offline after {polls} poll(s)"),
            QuiesceOutcome::PartialQuiesce { pending } => {
                let names: Vec<&str> = pending.iter().map(|(s, _)| s.name.as_str()).collect();
                format!("still online: {}", names.join(", "))
            }
            QuiesceOutcome::Cancelled => "cancelled".to_string(),
            QuiesceOutcome::Busy => "another barrier was active".to_string(),
        });
        let folders = report
            .folders
            .iter()
            .map(|f| {
                let (status, detail) = match &f.outcome {
                    FolderOutcome::Completed {
                        archive,
                        remote_retention,
                        local_retention,
                    } => {
                        let pruned = |r: &Option<RetentionReport>| {
                            r.as_ref().map_or_else(|| "?".to_string(), |r| r.deleted.to_string())
                        };
                        (
                            "completed",
                            format!(
                                "{archive} (pruned {} remote, {} local)",
                                pruned(remote_retention),
                                pruned(local_retention)
                            ),
                        )
                    }
                    FolderOutcome::Failed { stage, error } => ("failed", format!("{stage:?}: {error}")),
                    FolderOutcome::Skipped { reason } => ("skipped", reason.clone()),
                };
                FolderSummary {
                    label: f.label.clone(),
                    status,
                    detail,
                }
            })
            .collect();
        Self {
            finished_at,
            barrier,
            aborted: report.aborted.clone(),
            completed: report.completed(),
            folders,
        }
    }
}

/// Run one pass now, outside the daily window.
pub async fn run_backup(
    pipeline: &BackupPipeline,
    cancel: &CancellationToken,
) -> backup_engine::Result<PassSummary> {
    let report = pipeline.run_pass(cancel).await?;
    Ok(PassSummary::from_report(&report, Utc::now()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use backup_engine::config::PowerConfig;
    use backup_engine::remote::PowerControl;
    use backup_engine::EngineError;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    /// Panel where a signal takes effect immediately.
    struct InstantPanel {
        servers: Vec<ManagedServer>,
        states: Mutex<HashMap<String, PowerState>>,
        list_fails: bool,
    }

    impl InstantPanel {
        fn new(servers: &[(&str, &str, PowerState)]) -> Self {
            Self {
                servers: servers.iter().map(|(id, name, _)| ManagedServer::new(*id, *name)).collect(),
                states: Mutex::new(servers.iter().map(|(id, _, s)| (id.to_string(), *s)).collect()),
                list_fails: false,
            }
        }
    }

    #[async_trait]
    impl PowerControl for InstantPanel {
        async fn list_servers(&self) -> Result<Vec<ManagedServer>, EngineError> {
            if self.list_fails {
                return Err(EngineError::Transport("panel down".into()));
            }
            Ok(self.servers.clone())
        }

        async fn status(&self, server_id: &str) -> Result<PowerState, EngineError> {
            self.states
                .lock()
                .unwrap()
                .get(server_id)
                .copied()
                .ok_or_else(|| EngineError::Transport("no such server".into()))
        }

        async fn signal(&self, server_id: &str, signal: PowerSignal) -> Result<(), EngineError> {
            self.states
                .lock()
                .unwrap()
                .insert(server_id.to_string(), signal.target_state());
            Ok(())
        }
    }

    fn controller(panel: InstantPanel) -> PowerController {
        PowerController::new(Arc::new(panel), &PowerConfig::default())
    }

    #[tokio::test]
    async fn test_listing_is_numbered_from_one() {
        let power = controller(InstantPanel::new(&[
            ("a1", "Survival", PowerState::Running),
            ("b2", "Creative", PowerState::Offline),
        ]));

        let entries = list_servers(&power).await.unwrap();

        assert_eq!(entries[0].index, 1);
        assert_eq!(entries[1].state, PowerState::Offline);
        let text = render_listing(&entries);
        assert!(text.contains("1. Survival - Status: running"));
        assert!(text.contains("2. Creative - Status: offline"));
    }

    #[tokio::test]
    async fn test_listing_failure_reports_no_servers() {
        let mut panel = InstantPanel::new(&[("a1", "Survival", PowerState::Running)]);
        panel.list_fails = true;

        assert_eq!(list_servers(&controller(panel)).await, Err(CommandError::NoServers));
    }

    #[tokio::test]
    async fn test_out_of_range_numbers_are_invalid() {
        let power = controller(InstantPanel::new(&[("a1", "Survival", PowerState::Offline)]));

        for n in [0, 2] {
            let err = set_power_by_index(&power, n, PowerSignal::Start).await.unwrap_err();
            assert_eq!(err.to_string(), "Invalid server number.");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_reports_new_state() {
        let power = controller(InstantPanel::new(&[("a1", "Survival", PowerState::Offline)]));

        let reply = set_power_by_index(&power, 1, PowerSignal::Start).await.unwrap();

        assert!(reply.succeeded());
        assert_eq!(reply.outcome, PowerOutcome::Reached(PowerState::Running));
        assert_eq!(reply.message(), "Server \"Survival\" is now running.");
    }

    #[tokio::test]
    async fn test_stop_on_offline_server_is_a_no_op() {
        let power = controller(InstantPanel::new(&[("a1", "Survival", PowerState::Offline)]));

        let reply = set_power_by_index(&power, 1, PowerSignal::Stop).await.unwrap();

        assert_eq!(reply.message(), "Server \"Survival\" is already stopped!");
    }

    #[test]
    fn test_pass_summary_describes_each_folder() {
        use backup_engine::pipeline::{FolderReport, FolderStage};

        let report = PassReport {
            barrier: Some(QuiesceOutcome::AllOffline { polls: 3 }),
            aborted: None,
            folders: vec![
                FolderReport {
                    label: "world1".into(),
                    outcome: FolderOutcome::Completed {
                        archive: "world1_backup_x.tar.zst".into(),
                        remote_retention: Some(RetentionReport {
                            kept: 5,
                            deleted: 2,
                            failed: vec![],
                        }),
                        local_retention: None,
                    },
                },
                FolderReport {
                    label: "world2".into(),
                    outcome: FolderOutcome::Failed {
                        stage: FolderStage::Upload,
                        error: "quota".into(),
                    },
                },
            ],
        };

        let summary = PassSummary::from_report(&report, Utc::now());

        assert_eq!(summary.completed, 1);
        assert_eq!(summary.barrier.as_deref(), Some("all servers offline after 3 poll(s)"));
        assert_eq!(summary.folders[0].detail, "world1_backup_x.tar.zst (pruned 2 remote, ? local)");
        assert_eq!(summary.folders[1].status, "failed");
        assert_eq!(summary.folders[1].detail, "Upload: quota");
    }

    #[test]
    fn test_timeout_and_failure_messages() {
        let mut reply = PowerReply {
            server: ManagedServer::new("a1", "Survival"),
            signal: PowerSignal::Stop,
            outcome: PowerOutcome::TimedOut {
                last_observed: PowerState::Transitional,
            },
        };
        assert_eq!(
            reply.message(),
            "Server \"Survival\" stop command sent, but status remains transitional. It may take longer to fully stop."
        );
        assert!(!reply.succeeded());

        reply.outcome = PowerOutcome::TransportError("502".into());
        assert_eq!(
            reply.message(),
            "Failed to stop server \"Survival\". Check console for details."
        );
    }
}
