use crate::commands::PassSummary;
use crate::config::AppConfig;
use crate::drive::oauth::GoogleAuth;
use backup_engine::pipeline::BackupPipeline;
use backup_engine::power::PowerController;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

pub struct AppState {
    pub config: AppConfig,
    pub power: Arc<PowerController>,
    pub pipeline: Arc<BackupPipeline>,
    pub auth: Arc<GoogleAuth>,
    pub cancel: CancellationToken,
    /// Most recent pass started from the HTTP trigger
    pub last_pass: RwLock<Option<PassSummary>>,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        power: Arc<PowerController>,
        pipeline: Arc<BackupPipeline>,
        auth: Arc<GoogleAuth>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            power,
            pipeline,
            auth,
            cancel,
            last_pass: RwLock::new(None),
        }
    }

    pub async fn record_pass(&self, summary: PassSummary) {
        *self.last_pass.write().await = Some(summary);
    }
}
