//! Daily backup trigger.
//!
//! Every tick compares the wall-clock minute in the configured timezone with
//! the configured backup time. Matching is exact at minute resolution: if no
//! tick lands inside that minute (clock jump, stalled runtime) the day's
//! backup does not run.

use chrono::{DateTime, NaiveTime, Timelike, Utc};
use chrono_tz::Tz;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::archive::check_source;
use crate::config::{EngineConfig, ScheduleConfig};
use crate::error::{EngineError, Result};
use crate::pipeline::BackupPipeline;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackupWindow {
    time: NaiveTime,
    tz: Tz,
}

impl BackupWindow {
    pub fn new(time: NaiveTime, tz: Tz) -> Self {
        Self { time, tz }
    }

    pub fn from_config(config: &ScheduleConfig) -> Result<Self> {
        Ok(Self::new(config.backup_time()?, config.tz()?))
    }

    pub fn matches(&self, now: DateTime<Utc>) -> bool {
        let local = now.with_timezone(&self.tz);
        local.hour() == self.time.hour() && local.minute() == self.time.minute()
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum TickDecision {
    NotDue,
    Triggered,
    /// Due, but a pass from an earlier trigger is still running.
    Dropped,
}

pub struct BackupScheduler {
    pipeline: Arc<BackupPipeline>,
    window: BackupWindow,
    period: Duration,
}

impl BackupScheduler {
    pub fn new(pipeline: Arc<BackupPipeline>) -> Result<Self> {
        let schedule = &pipeline.config().schedule;
        if schedule.tick_secs == 0 {
            return Err(EngineError::Config("tick period must be positive".into()));
        }
        Ok(Self {
            window: BackupWindow::from_config(schedule)?,
            period: schedule.tick_period(),
            pipeline,
        })
    }

    pub fn window(&self) -> BackupWindow {
        self.window
    }

    /// Evaluate one tick at `now`. A due pass runs on its own task so ticks keep flowing.
    pub async fn tick(&self, now: DateTime<Utc>, cancel: &CancellationToken) -> TickDecision {
        check_readiness(self.pipeline.config()).await;

        if !self.window.matches(now) {
            debug!("Not the time for backup");
            return TickDecision::NotDue;
        }
        if self.pipeline.is_running() {
            warn!("Backup window reached while previous pass is still running, dropping trigger");
            return TickDecision::Dropped;
        }

        info!("Backup window reached, starting pass");
        let pipeline = self.pipeline.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            match pipeline.run_pass(&cancel).await {
                Ok(report) => {
                    if let Some(reason) = report.aborted {
                        warn!(reason = %reason, "Scheduled backup aborted");
                    }
                }
                Err(EngineError::PassInProgress) => {
                    warn!("Skipping scheduled run: pass already running");
                }
                Err(e) => error!(error = %e, "Scheduled backup failed"),
            }
        });
        TickDecision::Triggered
    }

    pub fn start(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!(
                period_secs = self.period.as_secs(),
                time = %self.window.time.format("%H:%M"),
                timezone = %self.window.tz,
                "Backup scheduler started"
            );
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        self.tick(Utc::now(), &cancel).await;
                    }
                }
            }
            info!("Backup scheduler stopped");
        })
    }
}

/// Advisory only: logs folders that a pass would fail to archive.
async fn check_readiness(config: &EngineConfig) {
    for task in &config.tasks {
        match check_source(&task.source_path).await {
            Ok(()) => debug!(label = %task.label, "Source folder reachable"),
            Err(e) => warn!(label = %task.label, error = %e, "Source folder not reachable"),
        }
    }
}
