pub(crate) mod api;
pub(crate) mod core;
pub(crate) mod db;
pub(crate) mod repositories;
pub(crate) mod schemas;
pub(crate) mod services;
pub(crate) mod tasks;

#[cfg(test)]
mod test_support;

use std::sync::Arc;

use tokio::sync::watch;

use crate::core::{config::Settings, state::AppState, telemetry};
use crate::repositories::gradings::{GradingRepository, InMemoryGradingRepository, PgGradingRepository};
use crate::services::ai_scoring::AiScoringService;
use crate::services::baidu_ocr::BaiduOcrService;
use crate::services::storage::LocalFileStorage;
use crate::tasks::batch::BatchTaskTracker;
use crate::tasks::dispatcher::GradingDispatcher;
use crate::tasks::grading::GradingPipeline;

pub async fn run() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = Settings::load()?;
    telemetry::init_tracing(&settings)?;
    core::metrics::init(&settings)?;

    let gradings = init_record_store(&settings).await?;
    let storage = LocalFileStorage::from_settings(&settings).await?;

    if settings.ocr().api_key.is_empty() || settings.ocr().secret_key.is_empty() {
        tracing::warn!("Baidu OCR credentials missing; grading runs will fail until configured");
    }
    if settings.ai().api_key.is_empty() {
        tracing::warn!("DeepSeek API key missing; grading runs will fail until configured");
    }

    let pipeline = GradingPipeline::new(
        gradings.clone(),
        Arc::new(storage.clone()),
        Arc::new(BaiduOcrService::from_settings(&settings)?),
        Arc::new(AiScoringService::from_settings(&settings)?),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (dispatcher, workers) = GradingDispatcher::start(
        pipeline,
        settings.pipeline().workers,
        settings.pipeline().queue_capacity,
        shutdown_rx,
    );
    let tasks = BatchTaskTracker::from_settings(settings.batch());

    let state = AppState::new(settings, gradings, storage, dispatcher, tasks);
    let app = api::router::router(state.clone());
    let listener = tokio::net::TcpListener::bind(state.settings().server_addr()).await?;

    tracing::info!(
        host = %state.settings().server_host(),
        port = state.settings().server_port(),
        environment = %state.settings().runtime().environment.as_str(),
        workers = state.settings().pipeline().workers,
        "Autograde API listening"
    );

    let result = axum::serve(listener, app)
        .with_graceful_shutdown(async {
            core::shutdown::wait_for_signal().await;
        })
        .await;

    core::shutdown::stop_workers(&shutdown_tx, workers).await;

    result?;

    Ok(())
}

async fn init_record_store(settings: &Settings) -> anyhow::Result<Arc<dyn GradingRepository>> {
    let Some(database_url) = settings.database().database_url.as_deref() else {
        tracing::warn!("DATABASE_URL not set; grading records are kept in memory only");
        return Ok(Arc::new(InMemoryGradingRepository::new()));
    };

    let pool = db::init_pool(settings, database_url).await?;
    db::run_migrations(&pool).await?;
    tracing::info!("Database connected and migrations applied");

    Ok(Arc::new(PgGradingRepository::new(pool)))
}
