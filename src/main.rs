//! Market Event Fabric Server
//!
//! Serves the real-time bars/quotes/orders/positions/executions/equity/
//! broker-connection WebSocket fabric, plus the minimal REST surface that
//! drives the datafeed and broker engines without a WebSocket client.

use market_event_fabric::api::create_router;
use market_event_fabric::config::Config;
use market_event_fabric::state::AppState;
use market_event_fabric::supervisor::Supervisor;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_CONFIG_PATH: &str = "config.toml";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config_path = std::env::var("CONFIG_PATH").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let config = Config::load(config_path)?;
    let addr = format!("{}:{}", config.server.host, config.server.port);

    let state = AppState::new(config);
    let supervisor = Supervisor::start(Arc::clone(&state));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = create_router(Arc::clone(&state))
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    let listener = TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "market event fabric listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    supervisor.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
