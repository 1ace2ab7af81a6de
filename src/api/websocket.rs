//! WebSocket upgrade handler: per-connection envelope dispatch, heartbeat,
//! and max-lifetime enforcement.

use crate::error::FabricError;
use crate::ids::{ConnectionId, ListenerId};
use crate::state::AppState;
use axum::extract::State;
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::UnboundedSender;

pub async fn ws_handler(
    State(state): State<Arc<AppState>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Sentinel queued onto the outbound channel to ask the writer task to send a
/// real WS close frame instead of a text message. Keeping this on the same
/// channel as ordinary payloads means `Route::subscribe` never needs to know
/// about connection lifecycle; it only ever hands out an `UnboundedSender<Value>`.
fn close_sentinel(code: u16, reason: impl Into<String>) -> Value {
    serde_json::json!({ "__close__": true, "code": code, "reason": reason.into() })
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let connection_id = state.connection_ids.next();
    state.connections.register(connection_id);

    let (mut sink, mut stream) = socket.split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Value>();

    let writer = tokio::spawn(async move {
        while let Some(value) = out_rx.recv().await {
            if let Some(close) = value.get("__close__").and_then(Value::as_bool) {
                if close {
                    let code = value.get("code").and_then(Value::as_u64).unwrap_or(1000) as u16;
                    let reason = value
                        .get("reason")
                        .and_then(Value::as_str)
                        .unwrap_or("")
                        .to_string();
                    let _ = sink
                        .send(Message::Close(Some(CloseFrame {
                            code,
                            reason: reason.into(),
                        })))
                        .await;
                    break;
                }
            }
            let text = match serde_json::to_string(&value) {
                Ok(t) => t,
                Err(e) => {
                    tracing::error!(error = %e, "failed to serialize outbound envelope");
                    continue;
                }
            };
            if sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    let heartbeat_timeout = state.config.server.heartbeat_timeout();
    let max_lifetime = state.config.server.max_connection_lifetime();
    let started_at = tokio::time::Instant::now();
    let mut last_frame_at = tokio::time::Instant::now();

    loop {
        let elapsed_since_frame = tokio::time::Instant::now().saturating_duration_since(last_frame_at);
        let elapsed_since_start = tokio::time::Instant::now().saturating_duration_since(started_at);
        let remaining_heartbeat = heartbeat_timeout.saturating_sub(elapsed_since_frame);
        let remaining_lifetime = max_lifetime.saturating_sub(elapsed_since_start);

        tokio::select! {
            frame = stream.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        last_frame_at = tokio::time::Instant::now();
                        if let Err(err) = dispatch(&state, connection_id, &text, &out_tx) {
                            let _ = out_tx.send(close_sentinel(err.ws_close_code(), err.to_string()));
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {
                        // Ping/Pong/Binary frames reset the heartbeat but carry no dispatch.
                        last_frame_at = tokio::time::Instant::now();
                    }
                    Some(Err(e)) => {
                        tracing::warn!(connection = %connection_id, error = %e, "socket read error");
                        break;
                    }
                }
            }
            _ = tokio::time::sleep(remaining_heartbeat) => {
                tracing::debug!(connection = %connection_id, "heartbeat timeout");
                let _ = out_tx.send(close_sentinel(1000, "heartbeat timeout"));
                break;
            }
            _ = tokio::time::sleep(remaining_lifetime) => {
                tracing::debug!(connection = %connection_id, "max connection lifetime reached");
                let _ = out_tx.send(close_sentinel(1000, "max connection lifetime reached"));
                break;
            }
        }
    }

    for route in state.routes.values() {
        route.teardown_connection(&state.connections, connection_id);
    }
    state.connections.deregister(connection_id);
    drop(out_tx);
    let _ = writer.await;
}

/// Parses one inbound envelope and applies it to the named route. The only
/// failure path that tears down the connection is a malformed envelope or an
/// unknown route/verb; a route-level validation error (bad params) is
/// reported inline via `{route}.subscribe.response` and does not close the
/// socket.
fn dispatch(
    state: &Arc<AppState>,
    connection: ConnectionId,
    text: &str,
    out_tx: &UnboundedSender<Value>,
) -> Result<(), FabricError> {
    let mut envelope: Value = serde_json::from_str(text)
        .map_err(|e| FabricError::Protocol(format!("invalid JSON: {e}")))?;

    let msg_type = envelope
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| FabricError::Protocol("missing \"type\" field".to_string()))?
        .to_string();

    let (route_name, verb) = msg_type
        .rsplit_once('.')
        .ok_or_else(|| FabricError::Protocol(format!("malformed message type: {msg_type}")))?;

    let route = state
        .route(route_name)
        .ok_or_else(|| FabricError::Protocol(format!("unknown route: {route_name}")))?;

    let mut payload = envelope
        .get_mut("payload")
        .map(Value::take)
        .unwrap_or(Value::Null);

    match verb {
        "subscribe" => {
            let listener_id = extract_listener_id(&mut payload);
            let outcome = route.subscribe(
                &state.connections,
                connection,
                listener_id,
                &payload,
                out_tx.clone(),
            );
            let response = serde_json::json!({
                "type": format!("{route_name}.subscribe.response"),
                "payload": outcome,
            });
            let _ = out_tx.send(response);
            Ok(())
        }
        "unsubscribe" => {
            let listener_id = extract_listener_id(&mut payload);
            route.unsubscribe(&state.connections, connection, &listener_id);
            let response = serde_json::json!({
                "type": format!("{route_name}.unsubscribe.response"),
                "payload": { "status": "ok" },
            });
            let _ = out_tx.send(response);
            Ok(())
        }
        other => Err(FabricError::Protocol(format!(
            "unknown verb \"{other}\" for route {route_name}"
        ))),
    }
}

/// Pulls the client-assigned `listenerId` out of a subscribe/unsubscribe
/// payload, falling back to the payload's own canonical rendering if the
/// client omits it. The wire protocol's worked examples never show an
/// envelope-level id field, so the params object is the only place left to
/// carry one; this is recorded as a resolved open question in `DESIGN.md`.
fn extract_listener_id(payload: &mut Value) -> ListenerId {
    if let Some(obj) = payload.as_object_mut() {
        if let Some(Value::String(id)) = obj.remove("listenerId") {
            return ListenerId(id);
        }
    }
    ListenerId(payload.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_and_strips_listener_id() {
        let mut payload = serde_json::json!({"symbol": "AAPL", "listenerId": "l1"});
        let listener = extract_listener_id(&mut payload);
        assert_eq!(listener, ListenerId("l1".to_string()));
        assert!(payload.get("listenerId").is_none());
        assert_eq!(payload.get("symbol").unwrap(), "AAPL");
    }

    #[test]
    fn falls_back_to_stringified_payload_without_listener_id() {
        let mut payload = serde_json::json!({"symbol": "AAPL"});
        let listener = extract_listener_id(&mut payload);
        assert_eq!(listener, ListenerId(payload.to_string()));
    }
}
