use crate::error::AppError;
use crate::state::AppState;
use axum::extract::{Query, State};
use axum::response::Html;
use serde::Deserialize;
use std::sync::Arc;

#[derive(Deserialize)]
pub struct AuthQuery {
    pub code: Option<String>,
}

/// OAuth redirect target: trade the one-time code for a stored token.
pub async fn callback(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AuthQuery>,
) -> Result<Html<&'static str>, AppError> {
    let code = query
        .code
        .filter(|c| !c.is_empty())
        .ok_or_else(|| AppError::BadRequest("No authorization code provided.".into()))?;
    if !state.auth.has_credentials() {
        return Err(AppError::NotReady("Google credentials are not configured".into()));
    }
    state.auth.exchange_code(&code).await?;
    Ok(Html("Authorization received. Google Drive access is now stored."))
}
