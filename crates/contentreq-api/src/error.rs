//! HTTP error responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use contentreq_supervisor::BridgeError;
use serde_json::json;
use thiserror::Error;
use tracing::warn;

pub const RETRY_MESSAGE: &str = "MCP server is not connected. Please retry shortly.";

#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Bridge(#[from] BridgeError),

    /// The tool ran but reported a failure
    #[error("{tool} failed")]
    ToolFailed { tool: String, message: String },

    #[error("{0}")]
    BadRequest(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::ToolFailed { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Bridge(err) if err.is_client_error() => StatusCode::BAD_REQUEST,
            ApiError::Bridge(err) => match err {
                BridgeError::NotConnected(_)
                | BridgeError::Spawn(_)
                | BridgeError::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
                BridgeError::ConnectionLost(_)
                | BridgeError::Timeout { .. }
                | BridgeError::Protocol(_)
                | BridgeError::UnknownTool(_)
                | BridgeError::InvalidArguments { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    fn body(&self) -> serde_json::Value {
        match self {
            ApiError::ToolFailed { message, .. } => json!({
                "success": false,
                "error": self.to_string(),
                "details": message,
            }),
            ApiError::Bridge(err) if self.status() == StatusCode::SERVICE_UNAVAILABLE => json!({
                "success": false,
                "error": RETRY_MESSAGE,
                "details": err.to_string(),
            }),
            other => json!({
                "success": false,
                "error": other.to_string(),
            }),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            warn!(status = status.as_u16(), error = %self, "Request failed");
        }
        (status, Json(self.body())).into_response()
    }
}
