//! Error types for the fabric: protocol, validation, engine and config errors,
//! and their mapping onto REST responses and WebSocket close codes.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

/// API error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error message.
    pub error: String,
    /// Error code.
    pub code: String,
}

/// The fabric's unified error type.
///
/// Each variant corresponds to one row of the error taxonomy: protocol
/// violations close the connection, validation and param errors reply inline
/// without tearing anything down, and `EngineBusy`/`Io`/`Cascade`/`Config`
/// cover the remaining recoverable-vs-fatal distinctions.
#[derive(Debug, thiserror::Error)]
pub enum FabricError {
    /// Malformed frame, unknown message type, or invalid JSON on the wire.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A subscribe payload failed its route's schema.
    #[error("validation error: {0}")]
    Validation(String),

    /// The topic builder was handed an unrepresentable or incomplete value.
    #[error("invalid params: {reason}")]
    InvalidParams { reason: String },

    /// An engine could not accept a new topic (e.g. generator spawn failure).
    #[error("engine busy: {0}")]
    EngineBusy(String),

    /// Send/receive failed on the underlying socket.
    #[error("io error: {0}")]
    Io(String),

    /// A business-logic exception during the execution cascade.
    #[error("cascade error: {0}")]
    Cascade(String),

    /// No such order, position, or route exists.
    #[error("not found: {0}")]
    NotFound(String),

    /// The referenced order is not in a state that allows the requested action.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Startup configuration failed validation.
    #[error("config error: {0}")]
    Config(#[from] crate::config::ConfigError),
}

impl FabricError {
    /// The WebSocket close code this error maps to. 1003 ("unsupported data")
    /// for frame-level/IO failures, 1011 ("internal error") for everything
    /// else that reaches the connection teardown path.
    pub fn ws_close_code(&self) -> u16 {
        match self {
            FabricError::Protocol(_) | FabricError::Io(_) => 1003,
            _ => 1011,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            FabricError::Protocol(_) => "PROTOCOL_ERROR",
            FabricError::Validation(_) => "VALIDATION_ERROR",
            FabricError::InvalidParams { .. } => "INVALID_PARAMS",
            FabricError::EngineBusy(_) => "ENGINE_BUSY",
            FabricError::Io(_) => "IO_ERROR",
            FabricError::Cascade(_) => "CASCADE_ERROR",
            FabricError::NotFound(_) => "NOT_FOUND",
            FabricError::Conflict(_) => "CONFLICT",
            FabricError::Config(_) => "CONFIG_ERROR",
        }
    }
}

impl IntoResponse for FabricError {
    fn into_response(self) -> Response {
        let status = match &self {
            FabricError::Validation(_) | FabricError::InvalidParams { .. } => {
                StatusCode::BAD_REQUEST
            }
            FabricError::NotFound(_) => StatusCode::NOT_FOUND,
            FabricError::Conflict(_) => StatusCode::CONFLICT,
            FabricError::EngineBusy(_) => StatusCode::SERVICE_UNAVAILABLE,
            FabricError::Protocol(_) | FabricError::Io(_) | FabricError::Cascade(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            FabricError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = Json(ErrorResponse {
            error: self.to_string(),
            code: self.code().to_string(),
        });
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_errors_close_with_1003() {
        assert_eq!(FabricError::Protocol("bad frame".into()).ws_close_code(), 1003);
        assert_eq!(FabricError::Io("reset".into()).ws_close_code(), 1003);
    }

    #[test]
    fn business_errors_close_with_1011() {
        assert_eq!(FabricError::Cascade("boom".into()).ws_close_code(), 1011);
    }

    #[test]
    fn conflict_maps_to_409() {
        let err = FabricError::Conflict("order already filled".into());
        assert_eq!(err.code(), "CONFLICT");
    }
}
