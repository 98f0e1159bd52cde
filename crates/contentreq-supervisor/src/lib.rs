//! Supervisor side of the content request bridge.
//!
//! Spawns the worker process, speaks MCP to it over stdio, and keeps it
//! alive: connect on demand, a periodic smoke-test health check, and
//! exponential backoff between failed attempts. The HTTP facade talks to
//! the worker only through [`ToolInvoker`].

pub mod backoff;
pub mod connection;
pub mod error;
pub mod launcher;
pub mod rpc;
pub mod supervisor;

#[cfg(test)]
mod testing;

pub use backoff::BackoffPolicy;
pub use error::BridgeError;
pub use launcher::{ProcessLauncher, WorkerChannel, WorkerLauncher};
pub use rpc::RpcClient;
pub use supervisor::{
    BridgeStatus, ConnectionState, Supervisor, SupervisorSettings, ToolInvoker,
};
