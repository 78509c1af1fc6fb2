//! Narrow interfaces to the remote collaborators.
//!
//! The engine never talks HTTP itself: the hosting panel and the object store
//! are reached through these traits, which the server binary implements.

use async_trait::async_trait;
use std::path::Path;

use crate::error::Result;
use crate::types::{ManagedServer, PowerSignal, PowerState, RemoteFileRef, RemoteFolderRef};

/// Hosting panel power API.
#[async_trait]
pub trait PowerControl: Send + Sync {
    /// Fetch every server the API key can see.
    async fn list_servers(&self) -> Result<Vec<ManagedServer>>;

    async fn status(&self, server_id: &str) -> Result<PowerState>;

    /// Send a power signal. Acknowledgement only, the state change happens later.
    async fn signal(&self, server_id: &str, signal: PowerSignal) -> Result<()>;
}

/// Off-site object store holding one folder per backup label.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn find_folder(&self, name: &str) -> Result<Option<RemoteFolderRef>>;

    async fn create_folder(&self, name: &str) -> Result<RemoteFolderRef>;

    async fn upload_file(&self, folder: &RemoteFolderRef, local_path: &Path) -> Result<RemoteFileRef>;

    async fn list_files(&self, folder: &RemoteFolderRef) -> Result<Vec<RemoteFileRef>>;

    async fn delete_file(&self, file: &RemoteFileRef) -> Result<()>;
}
