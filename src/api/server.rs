use axum::{
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::handlers::{
    acknowledge_alert, active_alerts, active_correlations, alert_history, create_rule,
    escalation_status, get_alert, health_check, list_rules, patterns, resolve_alert, stats,
    submit_alert, AppState,
};
use crate::config::ServerConfig;
use crate::engine::AlertEngine;
use crate::maintenance::RetentionWorker;

/// Build the application router
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health_check))
        // Alert intake and operator controls
        .route("/alerts", post(submit_alert))
        .route("/alerts/active", get(active_alerts))
        .route("/alerts/history", get(alert_history))
        .route("/alerts/:id", get(get_alert))
        .route("/alerts/:id/escalation", get(escalation_status))
        .route("/alerts/:id/acknowledge", post(acknowledge_alert))
        .route("/alerts/:id/resolve", post(resolve_alert))
        // Correlation
        .route("/rules", get(list_rules).post(create_rule))
        .route("/correlations/active", get(active_correlations))
        .route("/patterns", get(patterns))
        // Stats
        .route("/stats", get(stats))
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Run the HTTP server
pub async fn run_server(config: ServerConfig) -> Result<(), Box<dyn std::error::Error>> {
    // Initialize alert engine
    let engine = Arc::new(AlertEngine::from_config(&config.engine)?);
    tracing::info!(rules = ?engine.rule_names(), "Correlation rules registered");

    let state = Arc::new(AppState {
        engine: Arc::clone(&engine),
    });

    // Start background workers
    let retention_worker = Arc::new(RetentionWorker::new(
        Arc::clone(&engine),
        std::time::Duration::from_secs(config.retention_check_interval_secs),
        config.archive_after_ms,
    ));
    let retention_handle = Arc::clone(&retention_worker).start();

    #[cfg(feature = "kafka")]
    let kafka_handle = match crate::ingest::KafkaConfig::from_env() {
        Some(kafka_config) => {
            let consumer = crate::ingest::KafkaConsumer::new(kafka_config, Arc::clone(&engine))?;
            consumer.subscribe()?;
            Some(consumer.start())
        }
        None => None,
    };

    // Build router
    let app = build_router(state);

    // Start server
    let addr: SocketAddr = config.addr().parse()?;
    tracing::info!("Starting Klaxon server on {}", addr);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(retention_worker))
        .await?;

    // Wait for workers to stop
    retention_handle.abort();
    #[cfg(feature = "kafka")]
    if let Some(handle) = kafka_handle {
        handle.abort();
    }
    engine.shutdown();

    tracing::info!("Klaxon server stopped");
    Ok(())
}

async fn shutdown_signal(retention_worker: Arc<RetentionWorker>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to install CTRL+C signal handler");
        std::future::pending::<()>().await;
    }

    tracing::info!("Shutdown signal received, stopping workers...");
    retention_worker.stop();
}
