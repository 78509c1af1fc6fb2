//! Pterodactyl client API: server list, resource state, power signals.

use async_trait::async_trait;
use backup_engine::remote::PowerControl;
use backup_engine::{EngineError, ManagedServer, PowerSignal, PowerState};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;

const PTERODACTYL_ACCEPT: &str = "Application/vnd.pterodactyl.v1+json";

pub struct PterodactylClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

#[derive(Debug, Deserialize)]
struct ServerList {
    data: Vec<ServerObject>,
    #[serde(default)]
    meta: Option<ListMeta>,
}

#[derive(Debug, Deserialize)]
struct ServerObject {
    attributes: ServerAttributes,
}

#[derive(Debug, Deserialize)]
struct ServerAttributes {
    identifier: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct ListMeta {
    pagination: Pagination,
}

#[derive(Debug, Deserialize)]
struct Pagination {
    current_page: u32,
    total_pages: u32,
}

#[derive(Debug, Deserialize)]
struct Resources {
    attributes: ResourceAttributes,
}

#[derive(Debug, Deserialize)]
struct ResourceAttributes {
    current_state: String,
}

/// Map the panel's `current_state` onto the engine's power states.
pub fn parse_state(raw: &str) -> PowerState {
    match raw {
        "running" => PowerState::Running,
        "offline" => PowerState::Offline,
        "starting" | "stopping" => PowerState::Transitional,
        _ => PowerState::Unknown,
    }
}

impl PterodactylClient {
    pub fn new(http: reqwest::Client, base_url: &str, api_key: &str) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        }
    }

    fn headers(&self) -> Result<HeaderMap, EngineError> {
        let mut headers = HeaderMap::new();
        let bearer = HeaderValue::from_str(&format!("Bearer {}", self.api_key))
            .map_err(|_| EngineError::Config("PTERODACTYL_API_KEY is not a valid header value".into()))?;
        headers.insert(AUTHORIZATION, bearer);
        headers.insert(ACCEPT, HeaderValue::from_static(PTERODACTYL_ACCEPT));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(headers)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, EngineError> {
        let url = format!("{}{}", self.base_url, path);
        let resp = self
            .http
            .get(&url)
            .headers(self.headers()?)
            .send()
            .await
            .map_err(EngineError::transport)?;
        let resp = check_status(resp).await?;
        resp.json::<T>().await.map_err(EngineError::transport)
    }
}

async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, EngineError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let url = resp.url().clone();
    let body = resp.text().await.unwrap_or_default();
    Err(EngineError::Transport(format!("HTTP {status} from {url}: {body}")))
}

#[async_trait]
impl PowerControl for PterodactylClient {
    async fn list_servers(&self) -> Result<Vec<ManagedServer>, EngineError> {
        let mut servers = Vec::new();
        let mut page = 1;
        loop {
            let list: ServerList = self.get_json(&format!("/api/client?page={page}")).await?;
            servers.extend(
                list.data
                    .into_iter()
                    .map(|s| ManagedServer::new(s.attributes.identifier, s.attributes.name)),
            );
            match list.meta {
                Some(meta) if meta.pagination.current_page < meta.pagination.total_pages => page += 1,
                _ => break,
            }
        }
        tracing::debug!(count = servers.len(), "Fetched servers");
        Ok(servers)
    }

    async fn status(&self, server_id: &str) -> Result<PowerState, EngineError> {
        let resources: Resources = self
            .get_json(&format!("/api/client/servers/{server_id}/resources"))
            .await?;
        Ok(parse_state(&resources.attributes.current_state))
    }

    async fn signal(&self, server_id: &str, signal: PowerSignal) -> Result<(), EngineError> {
        let url = format!("{}/api/client/servers/{server_id}/power", self.base_url);
        let resp = self
            .http
            .post(&url)
            .headers(self.headers()?)
            .json(&json!({ "signal": signal.as_str() }))
            .send()
            .await
            .map_err(EngineError::transport)?;
        check_status(resp).await?;
        Ok(())
    }
}
