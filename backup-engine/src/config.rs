//! Engine configuration.
//!
//! Built once at startup and passed explicitly into each component.

use chrono::NaiveTime;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use crate::error::{EngineError, Result};
use crate::types::{BackupTask, RetentionPolicy};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Local directory that receives the archives
    pub backup_dir: PathBuf,

    /// Folder pairs to archive, in order
    #[serde(default)]
    pub tasks: Vec<BackupTask>,

    #[serde(default)]
    pub schedule: ScheduleConfig,

    #[serde(default)]
    pub retention: RetentionPolicy,

    /// Stop every server and wait for the barrier before archiving
    #[serde(default = "default_shutdown_before_backup")]
    pub shutdown_before_backup: bool,

    #[serde(default)]
    pub power: PowerConfig,

    #[serde(default)]
    pub barrier: BarrierConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Local wall-clock time of the daily backup, "HH:MM"
    #[serde(default = "default_backup_time")]
    pub time: String,

    /// IANA timezone name the time is expressed in
    #[serde(default = "default_timezone")]
    pub timezone: String,

    /// Scheduler tick period in seconds
    #[serde(default = "default_tick_secs")]
    pub tick_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PowerConfig {
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Status polls after a power signal before giving up
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Ceiling on a single panel call (list, status or signal)
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BarrierConfig {
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Batch polls before the barrier gives up. `None` waits forever.
    #[serde(default = "default_barrier_max_polls")]
    pub max_polls: Option<u32>,

    /// What a pass does when the barrier gives up with servers still online
    #[serde(default)]
    pub policy: BarrierPolicy,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BarrierPolicy {
    #[default]
    Abort,
    Proceed,
}

// Default values
fn default_shutdown_before_backup() -> bool {
    true
}

fn default_backup_time() -> String {
    "04:20".to_string()
}

fn default_timezone() -> String {
    "Asia/Colombo".to_string()
}

fn default_tick_secs() -> u64 {
    60
}

fn default_poll_interval_secs() -> u64 {
    5
}

fn default_max_attempts() -> u32 {
    60
}

fn default_request_timeout_secs() -> u64 {
    10
}

fn default_barrier_max_polls() -> Option<u32> {
    Some(120)
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            time: default_backup_time(),
            timezone: default_timezone(),
            tick_secs: default_tick_secs(),
        }
    }
}

impl Default for PowerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            max_attempts: default_max_attempts(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl Default for BarrierConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            max_polls: default_barrier_max_polls(),
            policy: BarrierPolicy::default(),
        }
    }
}

impl ScheduleConfig {
    pub fn backup_time(&self) -> Result<NaiveTime> {
        NaiveTime::parse_from_str(self.time.trim(), "%H:%M")
            .map_err(|e| EngineError::Config(format!("invalid backup time {:?}: {}", self.time, e)))
    }

    pub fn tz(&self) -> Result<Tz> {
        self.timezone
            .trim()
            .parse::<Tz>()
            .map_err(|e| EngineError::Config(format!("invalid timezone {:?}: {}", self.timezone, e)))
    }

    pub fn tick_period(&self) -> Duration {
        Duration::from_secs(self.tick_secs)
    }
}

impl PowerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Longest a confirmed power change may take, query and signal included.
    pub fn confirm_window(&self) -> Duration {
        self.poll_interval() * self.max_attempts
    }
}

impl BarrierConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

impl EngineConfig {
    /// A configuration with defaults for everything but the folders.
    pub fn new(backup_dir: impl Into<PathBuf>, tasks: Vec<BackupTask>) -> Self {
        Self {
            backup_dir: backup_dir.into(),
            tasks,
            schedule: ScheduleConfig::default(),
            retention: RetentionPolicy::default(),
            shutdown_before_backup: default_shutdown_before_backup(),
            power: PowerConfig::default(),
            barrier: BarrierConfig::default(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for task in &self.tasks {
            let label = task.label.as_str();
            if label.trim().is_empty() {
                return Err(EngineError::Config("folder label must not be empty".into()));
            }
            if label.contains(['/', '\\', ':']) || label.starts_with('.') {
                return Err(EngineError::Config(format!(
                    "folder label {label:?} is not a safe file name"
                )));
            }
            if !seen.insert(label) {
                return Err(EngineError::Config(format!("duplicate folder label {label:?}")));
            }
            if lexical_absolute(&self.backup_dir).starts_with(lexical_absolute(&task.source_path)) {
                return Err(EngineError::Config(format!(
                    "backup_dir {} lies inside the source of {label:?}",
                    self.backup_dir.display()
                )));
            }
        }

        self.schedule.backup_time()?;
        self.schedule.tz()?;

        if self.schedule.tick_secs == 0 {
            return Err(EngineError::Config("tick period must be positive".into()));
        }
        if self.power.poll_interval_secs == 0 || self.barrier.poll_interval_secs == 0 {
            return Err(EngineError::Config("poll intervals must be positive".into()));
        }
        if self.power.max_attempts == 0 {
            return Err(EngineError::Config("power max_attempts must be positive".into()));
        }
        if self.power.request_timeout_secs == 0 {
            return Err(EngineError::Config("request_timeout_secs must be positive".into()));
        }
        Ok(())
    }
}

/// Absolute form of `path` with `.` and `..` folded, without touching the filesystem.
fn lexical_absolute(path: &Path) -> PathBuf {
    let base = if path.is_absolute() {
        PathBuf::new()
    } else {
        std::env::current_dir().unwrap_or_default()
    };
    let mut out = PathBuf::new();
    for component in base.join(path).components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}
