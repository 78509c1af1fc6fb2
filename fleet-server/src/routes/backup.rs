use crate::commands::{self, PassSummary};
use crate::error::AppError;
use crate::state::AppState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use backup_engine::EngineError;
use serde::Serialize;
use std::sync::Arc;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/run", post(run_backup))
        .route("/status", get(backup_status))
}

async fn run_backup(State(state): State<Arc<AppState>>) -> Result<(StatusCode, Json<serde_json::Value>), AppError> {
    if state.pipeline.is_running() {
        return Err(EngineError::PassInProgress.into());
    }

    // Spawn the pass as a background task
    let state2 = state.clone();
    tokio::spawn(async move {
        match commands::run_backup(&state2.pipeline, &state2.cancel).await {
            Ok(summary) => {
                tracing::info!(completed = summary.completed, "Manual backup pass finished");
                state2.record_pass(summary).await;
            }
            Err(EngineError::PassInProgress) => tracing::warn!("Manual backup skipped: pass already running"),
            Err(e) => tracing::error!("Manual backup failed: {e:#}"),
        }
    });

    Ok((StatusCode::ACCEPTED, Json(serde_json::json!({ "started": true }))))
}

#[derive(Serialize)]
struct BackupStatus {
    running: bool,
    drive_authorized: bool,
    schedule: String,
    last_pass: Option<PassSummary>,
}

async fn backup_status(State(state): State<Arc<AppState>>) -> Json<BackupStatus> {
    let schedule = &state.config.engine.schedule;
    Json(BackupStatus {
        running: state.pipeline.is_running(),
        drive_authorized: state.auth.is_authorized().await,
        schedule: format!("daily at {} {}", schedule.time, schedule.timezone),
        last_pass: state.last_pass.read().await.clone(),
    })
}
