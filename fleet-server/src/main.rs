//! Fleet server - main entry point
//!
//! Power control for Pterodactyl game servers plus a daily quiesce, archive
//! and upload to Google Drive.

mod commands;
mod config;
mod drive;
mod error;
mod pterodactyl;
mod routes;
mod state;
mod utils;

use crate::config::AppConfig;
use crate::drive::oauth::GoogleAuth;
use crate::drive::DriveClient;
use crate::pterodactyl::PterodactylClient;
use crate::state::AppState;
use anyhow::Result;
use backup_engine::pipeline::BackupPipeline;
use backup_engine::power::PowerController;
use backup_engine::remote::{ObjectStore, PowerControl};
use backup_engine::scheduler::BackupScheduler;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to a TOML configuration file (environment variables are used otherwise)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Port to listen on (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    /// Run one backup pass immediately and exit
    #[arg(long)]
    backup_now: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = AppConfig::load(args.config.as_deref())?;
    if let Some(port) = args.port {
        config.port = port;
    }

    let log_level = args.log_level.as_deref().unwrap_or(&config.log_level);
    utils::logger::init(log_level)?;

    tracing::info!("Starting fleet-server v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        folders = config.engine.tasks.len(),
        backup_dir = %config.engine.backup_dir.display(),
        "Backup folders configured"
    );
    for task in &config.engine.tasks {
        tracing::info!(label = %task.label, path = %task.source_path.display(), "Folder");
    }

    let http = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .build()?;

    // Google Drive authorization
    let auth = Arc::new(GoogleAuth::load(
        http.clone(),
        &config.google.credentials_path,
        &config.google.token_path,
    ));
    if !auth.is_authorized().await {
        match auth.authorization_url() {
            Some(url) => tracing::warn!("Drive is not authorized. Authorize this app by visiting: {url}"),
            None => tracing::warn!("Drive is not authorized and no Google credentials were found"),
        }
    }

    let panel: Arc<dyn PowerControl> = Arc::new(PterodactylClient::new(
        http.clone(),
        &config.panel.url,
        &config.panel.api_key,
    ));
    let store: Arc<dyn ObjectStore> = Arc::new(DriveClient::new(http, auth.clone()));

    let engine = Arc::new(config.engine.clone());
    let power = Arc::new(PowerController::new(panel, &engine.power));
    let pipeline = Arc::new(BackupPipeline::new(engine, power.clone(), store));

    let cancel = CancellationToken::new();

    if args.backup_now {
        tokio::spawn(shutdown_signal(cancel.clone()));
        let summary = commands::run_backup(&pipeline, &cancel).await?;
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    // Daily backup trigger
    let scheduler = Arc::new(BackupScheduler::new(pipeline.clone())?);
    let scheduler_handle = scheduler.start(cancel.clone());

    let state = Arc::new(AppState::new(
        config.clone(),
        power,
        pipeline,
        auth,
        cancel.clone(),
    ));
    let app = routes::create_router(state);

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(cancel.clone()))
        .await?;

    tracing::info!("Shutting down...");
    cancel.cancel();
    if let Err(e) = scheduler_handle.await {
        tracing::warn!("Scheduler task ended abnormally: {}", e);
    }
    tracing::info!("Server stopped");

    Ok(())
}

async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to listen for ctrl+c");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to listen for SIGTERM")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received SIGINT"),
        _ = terminate => tracing::info!("Received SIGTERM"),
    }

    cancel.cancel();
}
