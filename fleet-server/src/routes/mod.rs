pub mod auth;
pub mod backup;
pub mod servers;

use crate::state::AppState;
use axum::routing::get;
use axum::Router;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(welcome))
        .route("/auth", get(auth::callback))
        .nest("/api/servers", servers::router())
        .nest("/api/backup", backup::router())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn welcome() -> &'static str {
    "Welcome to the fleet backup server!"
}
