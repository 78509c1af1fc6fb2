use crate::commands::{self, PowerReply, ServerEntry};
use crate::error::AppError;
use crate::state::AppState;
use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use backup_engine::PowerSignal;
use serde::Serialize;
use std::sync::Arc;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_servers))
        .route("/{number}/start", post(start_server))
        .route("/{number}/stop", post(stop_server))
}

#[derive(Serialize)]
struct Listing {
    servers: Vec<ServerEntry>,
    message: String,
}

#[derive(Serialize)]
struct PowerResponse {
    id: String,
    name: String,
    signal: PowerSignal,
    ok: bool,
    message: String,
}

impl From<PowerReply> for PowerResponse {
    fn from(reply: PowerReply) -> Self {
        Self {
            ok: reply.succeeded(),
            message: reply.message(),
            signal: reply.signal,
            id: reply.server.id,
            name: reply.server.name,
        }
    }
}

async fn list_servers(State(state): State<Arc<AppState>>) -> Result<Json<Listing>, AppError> {
    let servers = commands::list_servers(&state.power).await?;
    let message = commands::render_listing(&servers);
    Ok(Json(Listing { servers, message }))
}

async fn start_server(
    State(state): State<Arc<AppState>>,
    Path(number): Path<usize>,
) -> Result<Json<PowerResponse>, AppError> {
    let reply = commands::set_power_by_index(&state.power, number, PowerSignal::Start).await?;
    Ok(Json(reply.into()))
}

async fn stop_server(
    State(state): State<Arc<AppState>>,
    Path(number): Path<usize>,
) -> Result<Json<PowerResponse>, AppError> {
    let reply = commands::set_power_by_index(&state.power, number, PowerSignal::Stop).await?;
    Ok(Json(reply.into()))
}
