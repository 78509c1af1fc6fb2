//! Domain types shared across the engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// A hosted game-server instance under start/stop control.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagedServer {
    pub id: String,
    pub name: String,
}

impl ManagedServer {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ManagedServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.id)
    }
}

/// Power state as reported by the hosting panel. Derived per query, never cached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PowerState {
    Running,
    Offline,
    Transitional,
    Unknown,
}

impl fmt::Display for PowerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PowerState::Running => "running",
            PowerState::Offline => "offline",
            PowerState::Transitional => "transitional",
            PowerState::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PowerSignal {
    Start,
    Stop,
}

impl PowerSignal {
    /// The state a server settles in once this signal has taken effect.
    pub fn target_state(self) -> PowerState {
        match self {
            PowerSignal::Start => PowerState::Running,
            PowerSignal::Stop => PowerState::Offline,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PowerSignal::Start => "start",
            PowerSignal::Stop => "stop",
        }
    }
}

impl fmt::Display for PowerSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One configured folder pair: a label used for naming, and the local data directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupTask {
    pub label: String,
    pub source_path: PathBuf,
}

impl BackupTask {
    pub fn new(label: impl Into<String>, source_path: impl Into<PathBuf>) -> Self {
        Self {
            label: label.into(),
            source_path: source_path.into(),
        }
    }
}

/// A completed archive on local disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveArtifact {
    pub local_path: PathBuf,
    pub label: String,
    pub created_at: DateTime<Utc>,
}

impl ArchiveArtifact {
    pub fn file_name(&self) -> String {
        self.local_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Handle to a folder in the object store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFolderRef {
    pub id: String,
    pub name: String,
}

/// Handle to a file in the object store, with the store-supplied creation time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFileRef {
    pub id: String,
    pub name: String,
    pub created_at: Option<DateTime<Utc>>,
}

/// How many archives to keep per folder. Zero keeps everything.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionPolicy {
    #[serde(default)]
    pub max_backups: usize,
}

impl RetentionPolicy {
    pub fn keep(max_backups: usize) -> Self {
        Self { max_backups }
    }

    pub fn is_enabled(&self) -> bool {
        self.max_backups > 0
    }
}
