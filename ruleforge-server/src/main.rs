//! Rule engine HTTP server binary

use axum::{
    routing::{get, post},
    Router,
};
use ruleforge_core::config::{ConfigMetadata, ConfigurationDocument};
use ruleforge_core::recovery::RecoveryConfig;
use ruleforge_core::ServiceFacade;
use ruleforge_server::{handlers, AppState};
use std::net::SocketAddr;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    ruleforge_core::tracing_setup::init_tracing();

    info!("starting ruleforge server v{}", env!("CARGO_PKG_VERSION"));

    ruleforge_server::metrics::init_prometheus()?;
    ruleforge_server::metrics::init_metrics();

    let config_path = std::env::var("CONFIG_PATH").unwrap_or_else(|_| "ruleforge.toml".to_string());
    let document = match ConfigurationDocument::load_toml(&config_path) {
        Ok(document) => document,
        Err(e) => {
            info!("no usable configuration at {config_path} ({e}), starting empty");
            ConfigurationDocument {
                metadata: ConfigMetadata {
                    name: "empty".to_string(),
                    version: "0".to_string(),
                    description: "no configuration loaded".to_string(),
                    config_type: "rules".to_string(),
                    author: None,
                    created_at: None,
                },
                categories: vec![],
                rules: vec![],
                rule_groups: vec![],
                rule_chains: vec![],
                scenarios: vec![],
                data_sources: vec![],
                datasets: vec![],
            }
        }
    };

    let facade = ServiceFacade::new(document, RecoveryConfig::default())?;
    let state = AppState::new(facade);

    let app = Router::new()
        .route("/v1/classify", post(handlers::classify))
        .route("/v1/run/:scenario_id", post(handlers::run))
        .route("/v1/chains/:chain_id", post(handlers::run_chain))
        .route("/health/live", get(handlers::health_live))
        .route("/health/ready", get(handlers::health_ready))
        .route("/metrics", get(handlers::metrics_endpoint))
        .with_state(state.clone())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:8080".to_string()).parse()?;
    info!("listening on {addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let server = axum::serve(listener, app);

    let shutdown_signal = async {
        tokio::signal::ctrl_c().await.expect("failed to install CTRL+C signal handler");
        info!("received shutdown signal, shutting down gracefully");
    };

    server.with_graceful_shutdown(shutdown_signal).await.map_err(|e| anyhow::anyhow!("server error: {e}"))?;

    state.facade.shutdown().await;
    info!("server shutdown complete");
    Ok(())
}
