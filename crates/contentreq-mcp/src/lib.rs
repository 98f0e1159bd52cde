//! Worker side of the content request bridge.
//!
//! This crate implements the MCP server that hosts the tool catalog: the
//! JSON-RPC protocol types, the newline-delimited stdio transport shared with
//! the supervisor, argument validation, and the tool handlers with their
//! fallback policy.

pub mod error;
pub mod fallback;
pub mod handlers;
pub mod protocol;
pub mod server;
pub mod tools;
pub mod transport;

pub use error::DispatchError;
pub use handlers::{HandlerSettings, ToolHandler};
pub use protocol::{ToolCallResult, ToolDefinition};
pub use server::{McpServer, SERVER_NAME};
pub use tools::Tool;
