//! Dispatcher errors and their JSON-RPC encoding.

use serde_json::json;
use thiserror::Error;

use crate::protocol::JsonRpcError;

/// Errors a tool call can fail with before its handler runs.
///
/// Everything that happens inside a handler is reported through the tool
/// result instead, so these are always client-input errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DispatchError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Invalid arguments for {tool}: {reason}")]
    InvalidArguments { tool: String, reason: String },
}

impl From<DispatchError> for JsonRpcError {
    fn from(err: DispatchError) -> Self {
        let message = err.to_string();
        match err {
            DispatchError::UnknownTool(tool) => {
                JsonRpcError::new(JsonRpcError::METHOD_NOT_FOUND, message)
                    .with_data(json!({ "tool": tool }))
            }
            DispatchError::InvalidArguments { tool, reason } => {
                JsonRpcError::new(JsonRpcError::INVALID_PARAMS, message)
                    .with_data(json!({ "tool": tool, "reason": reason }))
            }
        }
    }
}
