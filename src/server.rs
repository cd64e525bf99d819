// Server module: wires the HSDB client, the processing engine and the task queue behind the HTTP API.

use crate::adapters::HsdbClient;
use crate::api::{api_router, AppState};
use crate::config::Settings;
use crate::core::engine::ProcessingEngine;
use crate::core::pipeline::SpectrumPipeline;
use crate::core::queue::TaskQueue;
use crate::utils::error::Result;
use axum::Router;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Router with request tracing, ready to be served.
pub fn build_router(state: AppState) -> Router {
    api_router(state).layer(TraceLayer::new_for_http())
}

/// Builds the queue and its workers for the given settings.
pub fn start_queue(settings: &Settings, repository: Arc<HsdbClient>) -> Result<TaskQueue> {
    let pipeline = SpectrumPipeline::new(repository, settings.processing.clone())?;
    let engine = Arc::new(ProcessingEngine::new(pipeline));
    Ok(TaskQueue::start(engine, settings.queue.clone()))
}

/// Serves the API until Ctrl-C, then lets the workers finish queued tasks.
pub async fn serve(settings: Settings) -> Result<()> {
    let repository = Arc::new(HsdbClient::new(settings.hsdb.clone())?);
    tracing::info!("🗄️ Using HSDB at {}", repository.base_url());
    if let Err(e) = repository.authenticate().await {
        // requests authenticate lazily
        tracing::warn!("⚠️ Initial HSDB authentication failed: {}", e);
    }

    let queue = start_queue(&settings, repository.clone())?;
    let app = build_router(AppState {
        queue: queue.clone(),
        repository,
    });

    let addr = settings.bind_address();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("📡 HTTP server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Draining task queue...");
    queue.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("🛑 Shutdown signal received");
}
