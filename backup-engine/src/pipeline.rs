//! One backup pass: quiesce the fleet, then archive → resolve → upload → retain
//! each folder in turn.
//!
//! A failing folder never stops the pass; the next folder is still processed
//! and every outcome lands in the `PassReport`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::archive::ArchiveBuilder;
use crate::barrier::{QuiesceOutcome, ShutdownBarrier};
use crate::config::{BarrierPolicy, EngineConfig};
use crate::error::{EngineError, Result};
use crate::folders::{FolderResolver, LabelGuard, LabelLocks};
use crate::power::PowerController;
use crate::remote::ObjectStore;
use crate::retention::{enforce, LocalScope, RemoteScope, RetentionReport};
use crate::types::BackupTask;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FolderStage {
    Archive,
    ResolveFolder,
    Upload,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FolderOutcome {
    Completed {
        archive: String,
        /// `None` when listing the scope failed
        remote_retention: Option<RetentionReport>,
        local_retention: Option<RetentionReport>,
    },
    Failed { stage: FolderStage, error: String },
    Skipped { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderReport {
    pub label: String,
    pub outcome: FolderOutcome,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassReport {
    pub barrier: Option<QuiesceOutcome>,
    /// Set when the pass stopped before archiving anything
    pub aborted: Option<String>,
    pub folders: Vec<FolderReport>,
}

impl PassReport {
    pub fn completed(&self) -> usize {
        self.folders
            .iter()
            .filter(|f| matches!(f.outcome, FolderOutcome::Completed { .. }))
            .count()
    }
}

pub struct BackupPipeline {
    config: Arc<EngineConfig>,
    power: Arc<PowerController>,
    barrier: ShutdownBarrier,
    archiver: ArchiveBuilder,
    resolver: FolderResolver,
    store: Arc<dyn ObjectStore>,
    labels: LabelLocks,
    in_flight: Mutex<()>,
    running: AtomicBool,
}

/// Marks a pass as running for as long as it is held.
struct RunningFlag<'a>(&'a AtomicBool);

impl<'a> RunningFlag<'a> {
    fn raise(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::Release);
        Self(flag)
    }
}

impl Drop for RunningFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl BackupPipeline {
    pub fn new(config: Arc<EngineConfig>, power: Arc<PowerController>, store: Arc<dyn ObjectStore>) -> Self {
        Self {
            barrier: ShutdownBarrier::new(power.clone(), &config.barrier),
            archiver: ArchiveBuilder::new(&config.backup_dir),
            resolver: FolderResolver::new(store.clone()),
            labels: LabelLocks::new(),
            in_flight: Mutex::new(()),
            running: AtomicBool::new(false),
            config,
            power,
            store,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Read-only: never contends with `run_pass` for the pass lock.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Run a full pass. Fails with `PassInProgress` if one is already running.
    pub async fn run_pass(&self, cancel: &CancellationToken) -> Result<PassReport> {
        let _pass = self.in_flight.try_lock().map_err(|_| EngineError::PassInProgress)?;
        let _running = RunningFlag::raise(&self.running);
        info!(folders = self.config.tasks.len(), "Starting backup pass");

        let mut report = PassReport::default();
        if self.config.shutdown_before_backup {
            if let Some(reason) = self.quiesce(&mut report, cancel).await {
                error!(reason = %reason, "Backup pass aborted");
                report.aborted = Some(reason);
                return Ok(report);
            }
        }

        for task in &self.config.tasks {
            if cancel.is_cancelled() {
                report.folders.push(FolderReport {
                    label: task.label.clone(),
                    outcome: FolderOutcome::Skipped {
                        reason: "shutting down".into(),
                    },
                });
                continue;
            }
            let outcome = self.backup_folder(task).await;
            report.folders.push(FolderReport {
                label: task.label.clone(),
                outcome,
            });
        }

        info!(
            completed = report.completed(),
            total = report.folders.len(),
            "Backup pass finished"
        );
        Ok(report)
    }

    /// Returns a reason when the pass must not continue.
    async fn quiesce(&self, report: &mut PassReport, cancel: &CancellationToken) -> Option<String> {
        let servers = match self.power.list_servers().await {
            Ok(servers) => servers,
            Err(e) => return Some(format!("could not list servers: {e}")),
        };

        let outcome = self.barrier.quiesce_all(&servers, cancel).await;
        let verdict = match &outcome {
            QuiesceOutcome::AllOffline { .. } => None,
            QuiesceOutcome::PartialQuiesce { pending } => match self.config.barrier.policy {
                BarrierPolicy::Abort => Some(format!("{} server(s) still online", pending.len())),
                BarrierPolicy::Proceed => {
                    for (server, state) in pending {
                        warn!(server_id = %server.id, name = %server.name, %state, "Backing up while server is not offline");
                    }
                    None
                }
            },
            QuiesceOutcome::Cancelled => Some("shutdown barrier cancelled".into()),
            QuiesceOutcome::Busy => Some("shutdown barrier already active".into()),
        };
        report.barrier = Some(outcome);
        verdict
    }

    pub async fn backup_folder(&self, task: &BackupTask) -> FolderOutcome {
        let guard = match self.labels.try_acquire(&task.label) {
            Ok(guard) => guard,
            Err(e) => {
                warn!(label = %task.label, "Skipping folder: {}", e);
                return FolderOutcome::Skipped { reason: e.to_string() };
            }
        };

        match self.archive_and_upload(task, &guard).await {
            Ok(outcome) => outcome,
            Err((stage, e)) => {
                error!(label = %task.label, ?stage, error = %e, "Folder backup failed");
                FolderOutcome::Failed {
                    stage,
                    error: e.to_string(),
                }
            }
        }
    }

    async fn archive_and_upload(
        &self,
        task: &BackupTask,
        guard: &LabelGuard,
    ) -> std::result::Result<FolderOutcome, (FolderStage, EngineError)> {
        let artifact = self
            .archiver
            .build_archive(task)
            .await
            .map_err(|e| (FolderStage::Archive, e))?;

        let folder = self
            .resolver
            .ensure_folder(guard)
            .await
            .map_err(|e| (FolderStage::ResolveFolder, e))?;

        let uploaded = self
            .store
            .upload_file(&folder, &artifact.local_path)
            .await
            .map_err(|e| (FolderStage::Upload, e))?;
        info!(label = %task.label, file_id = %uploaded.id, name = %uploaded.name, "Uploaded archive");

        let policy = self.config.retention;
        let remote_scope = RemoteScope::new(self.store.clone(), folder);
        let remote_retention = match enforce(&remote_scope, policy, Some(&uploaded.name)).await {
            Ok(report) => Some(report),
            Err(e) => {
                warn!(label = %task.label, error = %e, "Remote retention skipped");
                None
            }
        };

        let archive = artifact.file_name();
        let local_scope = LocalScope::new(self.archiver.backup_dir(), &task.label);
        let local_retention = match enforce(&local_scope, policy, Some(&archive)).await {
            Ok(report) => Some(report),
            Err(e) => {
                warn!(label = %task.label, error = %e, "Local retention skipped");
                None
            }
        };

        Ok(FolderOutcome::Completed {
            archive,
            remote_retention,
            local_retention,
        })
    }
}
