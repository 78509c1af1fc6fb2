//! In-memory collaborators for unit tests.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::ops::Range;
use std::path::Path;
use std::sync::Mutex;

use crate::error::{EngineError, Result};
use crate::naming::parse_archive_file_name;
use crate::remote::{ObjectStore, PowerControl};
use crate::types::{ManagedServer, PowerSignal, PowerState, RemoteFileRef, RemoteFolderRef};

/// Hosting panel with a scripted status timeline per server.
///
/// Call `n` to `status` returns timeline entry `n` (the last entry repeats
/// forever); a `None` entry is a transport failure.
#[derive(Default)]
pub struct MockPanel {
    servers: Mutex<Vec<ManagedServer>>,
    timelines: Mutex<HashMap<String, Vec<Option<PowerState>>>>,
    status_calls: Mutex<HashMap<String, usize>>,
    signals: Mutex<Vec<(String, PowerSignal)>>,
    failing_signals: Mutex<HashSet<String>>,
    hung_status: Mutex<HashSet<String>>,
    hung_listing: Mutex<bool>,
}

impl MockPanel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_servers(servers: &[(&str, &str)]) -> Self {
        let panel = Self::new();
        *panel.servers.lock().unwrap() = servers
            .iter()
            .map(|(id, name)| ManagedServer::new(*id, *name))
            .collect();
        panel
    }

    pub fn script(&self, id: &str, states: &[PowerState]) {
        self.timelines
            .lock()
            .unwrap()
            .insert(id.to_string(), states.iter().copied().map(Some).collect());
    }

    /// Replace the timeline from call `from` onwards.
    pub fn script_from(&self, id: &str, from: usize, states: &[PowerState]) {
        let mut timelines = self.timelines.lock().unwrap();
        let timeline = timelines.entry(id.to_string()).or_default();
        pad(timeline, from);
        timeline.truncate(from);
        timeline.extend(states.iter().copied().map(Some));
    }

    pub fn fail_status_calls(&self, id: &str, calls: Range<usize>) {
        let mut timelines = self.timelines.lock().unwrap();
        let timeline = timelines.entry(id.to_string()).or_default();
        pad(timeline, calls.end);
        for slot in &mut timeline[calls] {
            *slot = None;
        }
    }

    pub fn fail_signals(&self, id: &str) {
        self.failing_signals.lock().unwrap().insert(id.to_string());
    }

    /// Status calls for `id` never answer, like a panel that stopped responding mid-request.
    pub fn hang_status(&self, id: &str) {
        self.hung_status.lock().unwrap().insert(id.to_string());
    }

    pub fn hang_listing(&self) {
        *self.hung_listing.lock().unwrap() = true;
    }

    pub fn signals(&self) -> Vec<(String, PowerSignal)> {
        self.signals.lock().unwrap().clone()
    }

    pub fn status_calls(&self, id: &str) -> usize {
        self.status_calls.lock().unwrap().get(id).copied().unwrap_or(0)
    }
}

fn pad(timeline: &mut Vec<Option<PowerState>>, len: usize) {
    let filler = timeline
        .iter()
        .rev()
        .find_map(|s| *s)
        .unwrap_or(PowerState::Unknown);
    while timeline.len() < len {
        timeline.push(Some(filler));
    }
}

#[async_trait]
impl PowerControl for MockPanel {
    async fn list_servers(&self) -> Result<Vec<ManagedServer>> {
        let hung = *self.hung_listing.lock().unwrap();
        if hung {
            std::future::pending::<()>().await;
        }
        Ok(self.servers.lock().unwrap().clone())
    }

    async fn status(&self, server_id: &str) -> Result<PowerState> {
        let hung = self.hung_status.lock().unwrap().contains(server_id);
        if hung {
            std::future::pending::<()>().await;
        }
        let call = {
            let mut calls = self.status_calls.lock().unwrap();
            let n = calls.entry(server_id.to_string()).or_insert(0);
            *n += 1;
            *n - 1
        };
        let timelines = self.timelines.lock().unwrap();
        let entry = timelines
            .get(server_id)
            .and_then(|t| t.get(call).or_else(|| t.last()).copied())
            .unwrap_or(Some(PowerState::Unknown));
        entry.ok_or_else(|| EngineError::Transport(format!("status {server_id} unavailable")))
    }

    async fn signal(&self, server_id: &str, signal: PowerSignal) -> Result<()> {
        if self.failing_signals.lock().unwrap().contains(server_id) {
            return Err(EngineError::Transport("connection refused".into()));
        }
        self.signals
            .lock()
            .unwrap()
            .push((server_id.to_string(), signal));
        Ok(())
    }
}

/// Object store holding folders and file metadata in memory.
#[derive(Default)]
pub struct MockStore {
    folders: Mutex<Vec<RemoteFolderRef>>,
    files: Mutex<HashMap<String, Vec<RemoteFileRef>>>,
    failing_deletes: Mutex<HashSet<String>>,
    failing_uploads: Mutex<bool>,
    created_folders: Mutex<usize>,
    next_id: Mutex<usize>,
}

impl MockStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn fresh_id(&self, prefix: &str) -> String {
        let mut next = self.next_id.lock().unwrap();
        *next += 1;
        format!("{prefix}-{next}")
    }

    pub fn add_folder(&self, name: &str) -> RemoteFolderRef {
        let folder = RemoteFolderRef {
            id: self.fresh_id("folder"),
            name: name.to_string(),
        };
        self.folders.lock().unwrap().push(folder.clone());
        folder
    }

    pub fn add_file(&self, folder: &RemoteFolderRef, name: &str) -> RemoteFileRef {
        let file = RemoteFileRef {
            id: self.fresh_id("file"),
            name: name.to_string(),
            created_at: parse_archive_file_name(name).map(|p| p.created_at),
        };
        self.files
            .lock()
            .unwrap()
            .entry(folder.id.clone())
            .or_default()
            .push(file.clone());
        file
    }

    pub fn file_names(&self, folder: &RemoteFolderRef) -> Vec<String> {
        self.files
            .lock()
            .unwrap()
            .get(&folder.id)
            .map(|f| f.iter().map(|f| f.name.clone()).collect())
            .unwrap_or_default()
    }

    pub fn folders_named(&self, name: &str) -> Vec<RemoteFolderRef> {
        self.folders
            .lock()
            .unwrap()
            .iter()
            .filter(|f| f.name == name)
            .cloned()
            .collect()
    }

    pub fn created_folders(&self) -> usize {
        *self.created_folders.lock().unwrap()
    }

    pub fn fail_delete(&self, file: &RemoteFileRef) {
        self.failing_deletes.lock().unwrap().insert(file.id.clone());
    }

    pub fn fail_uploads(&self) {
        *self.failing_uploads.lock().unwrap() = true;
    }
}

#[async_trait]
impl ObjectStore for MockStore {
    async fn find_folder(&self, name: &str) -> Result<Option<RemoteFolderRef>> {
        let found = self
            .folders
            .lock()
            .unwrap()
            .iter()
            .find(|f| f.name == name)
            .cloned();
        // let a concurrent caller interleave between lookup and create
        tokio::task::yield_now().await;
        Ok(found)
    }

    async fn create_folder(&self, name: &str) -> Result<RemoteFolderRef> {
        *self.created_folders.lock().unwrap() += 1;
        Ok(self.add_folder(name))
    }

    async fn upload_file(&self, folder: &RemoteFolderRef, local_path: &Path) -> Result<RemoteFileRef> {
        if *self.failing_uploads.lock().unwrap() {
            return Err(EngineError::Transport("upload rejected".into()));
        }
        let name = local_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mut file = self.add_file(folder, &name);
        if file.created_at.is_none() {
            file.created_at = Some(Utc::now());
        }
        Ok(file)
    }

    async fn list_files(&self, folder: &RemoteFolderRef) -> Result<Vec<RemoteFileRef>> {
        Ok(self
            .files
            .lock()
            .unwrap()
            .get(&folder.id)
            .cloned()
            .unwrap_or_default())
    }

    async fn delete_file(&self, file: &RemoteFileRef) -> Result<()> {
        if self.failing_deletes.lock().unwrap().contains(&file.id) {
            return Err(EngineError::Transport(format!("file {} not found", file.id)));
        }
        for files in self.files.lock().unwrap().values_mut() {
            files.retain(|f| f.id != file.id);
        }
        Ok(())
    }
}
