//! REST handlers: health, stats, and the order/datafeed entry points an
//! external caller uses without a WebSocket connection.

use crate::error::FabricError;
use crate::ids::OrderId;
use crate::models::{Order, OrderPatch, PreOrder};
use crate::state::AppState;
use axum::Json;
use axum::extract::{Path, Query, State};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    status: &'static str,
}

pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

#[derive(Debug, Serialize)]
pub struct RouteStats {
    active_topics: usize,
    broadcasts_dropped: u64,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    connected_clients: usize,
    routes: HashMap<&'static str, RouteStats>,
}

pub async fn get_stats(State(state): State<Arc<AppState>>) -> Json<StatsResponse> {
    let routes = state
        .routes
        .iter()
        .map(|(&name, route)| {
            (
                name,
                RouteStats {
                    active_topics: route.active_topic_count(),
                    broadcasts_dropped: route.dropped_count(),
                },
            )
        })
        .collect();
    Json(StatsResponse {
        connected_clients: state.connections.connection_count(),
        routes,
    })
}

pub async fn place_order(
    State(state): State<Arc<AppState>>,
    Json(pre_order): Json<PreOrder>,
) -> Json<Order> {
    let id = state.broker.place_order(pre_order);
    Json(state.broker.order(&id).expect("just placed"))
}

pub async fn modify_order(
    State(state): State<Arc<AppState>>,
    Path(order_id): Path<String>,
    Json(patch): Json<OrderPatch>,
) -> Result<Json<Order>, FabricError> {
    let id = OrderId(order_id);
    state.broker.modify_order(&id, patch)?;
    Ok(Json(state.broker.order(&id).expect("just modified")))
}

pub async fn cancel_order(
    State(state): State<Arc<AppState>>,
    Path(order_id): Path<String>,
) -> Result<Json<Order>, FabricError> {
    let id = OrderId(order_id);
    state.broker.cancel_order(&id)?;
    Ok(Json(state.broker.order(&id).expect("just canceled")))
}

#[derive(Debug, Deserialize)]
pub struct BarQuery {
    symbol: String,
    #[serde(default = "default_resolution")]
    resolution: String,
}

fn default_resolution() -> String {
    "1".to_string()
}

pub async fn get_bar(
    State(state): State<Arc<AppState>>,
    Query(query): Query<BarQuery>,
) -> Result<Json<crate::models::Bar>, FabricError> {
    state
        .datafeed
        .last_bar(&query.symbol, &query.resolution)
        .map(Json)
        .ok_or_else(|| FabricError::NotFound(format!("no bar yet for {}", query.symbol)))
}

#[derive(Debug, Deserialize)]
pub struct QuoteQuery {
    symbol: String,
}

pub async fn get_quote(
    State(state): State<Arc<AppState>>,
    Query(query): Query<QuoteQuery>,
) -> Result<Json<crate::models::Quote>, FabricError> {
    state
        .datafeed
        .last_quote(&query.symbol)
        .map(Json)
        .ok_or_else(|| FabricError::NotFound(format!("no quote yet for {}", query.symbol)))
}
