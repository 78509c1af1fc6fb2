//! Google Drive as the off-site object store.

pub mod oauth;

use async_trait::async_trait;
use backup_engine::remote::ObjectStore;
use backup_engine::types::{RemoteFileRef, RemoteFolderRef};
use backup_engine::EngineError;
use chrono::{DateTime, Utc};
use reqwest::header::{CONTENT_LENGTH, LOCATION};
use serde::Deserialize;
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use tokio_util::io::ReaderStream;
use tracing::{debug, info};

use oauth::GoogleAuth;

const API_BASE: &str = "https://www.googleapis.com/drive/v3";
const UPLOAD_BASE: &str = "https://www.googleapis.com/upload/drive/v3";
const FOLDER_MIME: &str = "application/vnd.google-apps.folder";
const FILE_FIELDS: &str = "id,name,createdTime";

pub struct DriveClient {
    http: reqwest::Client,
    auth: Arc<GoogleAuth>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DriveFile {
    id: String,
    name: String,
    #[serde(default)]
    created_time: Option<DateTime<Utc>>,
}

impl From<DriveFile> for RemoteFileRef {
    fn from(f: DriveFile) -> Self {
        RemoteFileRef {
            id: f.id,
            name: f.name,
            created_at: f.created_time,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileList {
    #[serde(default)]
    files: Vec<DriveFile>,
    #[serde(default)]
    next_page_token: Option<String>,
}

/// Quote a value for a Drive `q` expression.
fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "\\'"))
}

fn folder_query(name: &str) -> String {
    format!(
        "name = {} and mimeType = {} and trashed = false",
        quote(name),
        quote(FOLDER_MIME)
    )
}

fn children_query(folder_id: &str) -> String {
    format!(
        "{} in parents and trashed = false and mimeType != {}",
        quote(folder_id),
        quote(FOLDER_MIME)
    )
}

async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, EngineError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(EngineError::Transport(format!("Drive returned {status}: {body}")))
}

impl DriveClient {
    pub fn new(http: reqwest::Client, auth: Arc<GoogleAuth>) -> Self {
        Self { http, auth }
    }

    async fn list(&self, query: &str, fields: &str) -> Result<Vec<DriveFile>, EngineError> {
        let mut files = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let token = self.auth.access_token().await?;
            let mut params = vec![
                ("q", query.to_string()),
                ("fields", format!("nextPageToken,files({fields})")),
                ("spaces", "drive".to_string()),
                ("pageSize", "1000".to_string()),
            ];
            if let Some(page) = &page_token {
                params.push(("pageToken", page.clone()));
            }
            let resp = self
                .http
                .get(format!("{API_BASE}/files"))
                .bearer_auth(token)
                .query(&params)
                .send()
                .await
                .map_err(EngineError::transport)?;
            let list: FileList = check_status(resp)
                .await?
                .json()
                .await
                .map_err(EngineError::transport)?;
            files.extend(list.files);
            match list.next_page_token {
                Some(next) => page_token = Some(next),
                None => break,
            }
        }
        Ok(files)
    }
}

#[async_trait]
impl ObjectStore for DriveClient {
    async fn find_folder(&self, name: &str) -> Result<Option<RemoteFolderRef>, EngineError> {
        let found = self.list(&folder_query(name), "id,name").await?;
        Ok(found
            .into_iter()
            .find(|f| f.name == name)
            .map(|f| RemoteFolderRef { id: f.id, name: f.name }))
    }

    async fn create_folder(&self, name: &str) -> Result<RemoteFolderRef, EngineError> {
        let token = self.auth.access_token().await?;
        let resp = self
            .http
            .post(format!("{API_BASE}/files"))
            .bearer_auth(token)
            .query(&[("fields", "id,name")])
            .json(&json!({ "name": name, "mimeType": FOLDER_MIME }))
            .send()
            .await
            .map_err(EngineError::transport)?;
        let created: DriveFile = check_status(resp)
            .await?
            .json()
            .await
            .map_err(EngineError::transport)?;
        Ok(RemoteFolderRef {
            id: created.id,
            name: created.name,
        })
    }

    /// Resumable upload: open a session with the metadata, then stream the file body.
    async fn upload_file(&self, folder: &RemoteFolderRef, local_path: &Path) -> Result<RemoteFileRef, EngineError> {
        let name = local_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| EngineError::Archive(format!("{} has no file name", local_path.display())))?;
        let file = tokio::fs::File::open(local_path).await?;
        let size = file.metadata().await?.len();

        let token = self.auth.access_token().await?;
        let resp = self
            .http
            .post(format!("{UPLOAD_BASE}/files"))
            .bearer_auth(&token)
            .query(&[("uploadType", "resumable"), ("fields", FILE_FIELDS)])
            .header("X-Upload-Content-Type", "application/octet-stream")
            .header("X-Upload-Content-Length", size)
            .json(&json!({ "name": name, "parents": [folder.id] }))
            .send()
            .await
            .map_err(EngineError::transport)?;
        let resp = check_status(resp).await?;
        let session = resp
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(String::from)
            .ok_or_else(|| EngineError::Transport("Drive did not return an upload session".into()))?;
        debug!(name = %name, size, "Upload session opened");

        let body = reqwest::Body::wrap_stream(ReaderStream::new(file));
        let resp = self
            .http
            .put(&session)
            .bearer_auth(&token)
            .header(CONTENT_LENGTH, size)
            .body(body)
            .send()
            .await
            .map_err(EngineError::transport)?;
        let uploaded: DriveFile = check_status(resp)
            .await?
            .json()
            .await
            .map_err(EngineError::transport)?;
        info!(folder = %folder.name, name = %uploaded.name, size, "Uploaded to Drive");
        Ok(uploaded.into())
    }

    async fn list_files(&self, folder: &RemoteFolderRef) -> Result<Vec<RemoteFileRef>, EngineError> {
        let files = self.list(&children_query(&folder.id), FILE_FIELDS).await?;
        Ok(files.into_iter().map(RemoteFileRef::from).collect())
    }

    async fn delete_file(&self, file: &RemoteFileRef) -> Result<(), EngineError> {
        let token = self.auth.access_token().await?;
        let resp = self
            .http
            .delete(format!("{API_BASE}/files/{}", file.id))
            .bearer_auth(token)
            .send()
            .await
            .map_err(EngineError::transport)?;
        check_status(resp).await?;
        Ok(())
    }
}
