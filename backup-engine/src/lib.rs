//! Backup Engine Library
//!
//! Orchestrates power-state transitions, the pre-backup shutdown barrier,
//! per-folder archiving, off-site upload and bounded retention for a fleet
//! of hosted game servers.

pub mod archive;
pub mod barrier;
pub mod config;
pub mod error;
pub mod folders;
pub mod naming;
pub mod pipeline;
pub mod power;
pub mod remote;
pub mod retention;
pub mod scheduler;
pub mod types;

#[cfg(test)]
mod testing;

// Re-export commonly used types
pub use config::EngineConfig;
pub use error::{EngineError, Result};
pub use types::{ArchiveArtifact, BackupTask, ManagedServer, PowerSignal, PowerState, RetentionPolicy};
