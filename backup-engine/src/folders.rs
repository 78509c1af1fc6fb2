//! Per-label exclusion and remote folder lookup-or-create.
//!
//! The object store does not enforce unique folder names, so two passes that
//! both miss the lookup would each create a folder. `ensure_folder` therefore
//! takes a `LabelGuard`: it can only be called by the holder of that label's
//! lock, which is the same lock that keeps a label to one archiving pass.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::info;

use crate::error::{EngineError, Result};
use crate::remote::ObjectStore;
use crate::types::RemoteFolderRef;

#[derive(Default)]
pub struct LabelLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

/// Proof that the current task owns a label until dropped.
pub struct LabelGuard {
    label: String,
    _held: OwnedMutexGuard<()>,
}

impl LabelGuard {
    pub fn label(&self) -> &str {
        &self.label
    }
}

impl LabelLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, label: &str) -> Arc<Mutex<()>> {
        self.locks.entry(label.to_string()).or_default().clone()
    }

    /// Take the label or fail with `LabelBusy` if another pass holds it.
    pub fn try_acquire(&self, label: &str) -> Result<LabelGuard> {
        let held = self
            .lock_for(label)
            .try_lock_owned()
            .map_err(|_| EngineError::LabelBusy(label.to_string()))?;
        Ok(LabelGuard {
            label: label.to_string(),
            _held: held,
        })
    }

    pub async fn acquire(&self, label: &str) -> LabelGuard {
        let held = self.lock_for(label).lock_owned().await;
        LabelGuard {
            label: label.to_string(),
            _held: held,
        }
    }
}

pub struct FolderResolver {
    store: Arc<dyn ObjectStore>,
}

impl FolderResolver {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    pub async fn ensure_folder(&self, guard: &LabelGuard) -> Result<RemoteFolderRef> {
        let label = guard.label();
        if let Some(folder) = self.store.find_folder(label).await? {
            return Ok(folder);
        }
        let folder = self.store.create_folder(label).await?;
        info!(label, folder_id = %folder.id, "Created remote folder");
        Ok(folder)
    }
}
