//! Errors seen by callers of the bridge.

use std::time::Duration;

use thiserror::Error;

/// Errors a tool call through the supervisor can fail with.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BridgeError {
    /// The worker does not know the tool
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    /// The worker rejected the arguments
    #[error("Invalid arguments for {tool}: {reason}")]
    InvalidArguments { tool: String, reason: String },

    /// No live worker, including right after a failed connect attempt
    #[error("Worker not connected: {0}")]
    NotConnected(String),

    /// The worker died or its transport failed while the call was in flight
    #[error("Worker connection lost: {0}")]
    ConnectionLost(String),

    /// No response within the deadline; the remote side effect may have happened
    #[error("{tool} timed out after {after:?}")]
    Timeout { tool: String, after: Duration },

    /// The worker process could not be started
    #[error("Failed to spawn worker: {0}")]
    Spawn(String),

    /// The worker sent something the supervisor could not interpret
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Supervisor is shutting down")]
    ShuttingDown,
}

impl BridgeError {
    /// Whether the error means the worker channel itself is unusable.
    pub fn is_connection_related(&self) -> bool {
        match self {
            BridgeError::ConnectionLost(_) | BridgeError::Spawn(_) => true,
            BridgeError::UnknownTool(_) | BridgeError::InvalidArguments { .. } => false,
            other => {
                let text = other.to_string().to_lowercase();
                text.contains("connection") || text.contains("transport")
            }
        }
    }

    /// Client-input errors are never retried.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            BridgeError::UnknownTool(_) | BridgeError::InvalidArguments { .. }
        )
    }
}

/// Result type alias for bridge operations.
pub type Result<T> = std::result::Result<T, BridgeError>;
