//! Route configuration: the minimal REST surface plus the WebSocket upgrade.

use crate::api::handlers;
use crate::api::websocket::ws_handler;
use crate::state::AppState;
use axum::Router;
use axum::routing::{get, post, put};
use std::sync::Arc;

/// Creates the API router.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/api/v1/stats", get(handlers::get_stats))
        .route("/broker/orders", post(handlers::place_order))
        .route(
            "/broker/orders/{order_id}",
            put(handlers::modify_order).delete(handlers::cancel_order),
        )
        .route("/datafeed/bars", get(handlers::get_bar))
        .route("/datafeed/quotes", get(handlers::get_quote))
        .route("/ws", get(ws_handler))
        .with_state(state)
}
