//! Worker loop: reads requests from stdin and answers on stdout.
//!
//! Tool calls run on their own tasks and answer through a single writer, so
//! a slow remote call does not hold up `ping` or other calls. On EOF the
//! loop waits for in-flight calls before returning.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncWrite, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinSet;

use crate::handlers::ToolHandler;
use crate::protocol::{
    InitializeParams, InitializeResult, JsonRpcError, JsonRpcRequest, JsonRpcResponse, RequestId,
    ServerCapabilities, ServerInfo, ToolCallParams, ToolCallResult, ToolsCapability,
    ToolsListResult, MCP_VERSION,
};
use crate::transport::{FrameReader, FrameWriter, IncomingMessage};

/// Name the worker reports in `initialize`.
pub const SERVER_NAME: &str = "content-request-server";

/// MCP server hosting the tool catalog.
pub struct McpServer {
    handler: Arc<ToolHandler>,
    initialized: AtomicBool,
}

impl McpServer {
    pub fn new(handler: ToolHandler) -> Self {
        Self {
            handler: Arc::new(handler),
            initialized: AtomicBool::new(false),
        }
    }

    /// Serve on stdin/stdout until stdin closes.
    pub async fn run(&self) -> io::Result<()> {
        tracing::info!("Starting worker on stdio");
        self.serve(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
            .await
    }

    /// Serve one connection until `reader` reaches EOF.
    pub async fn serve<R, W>(&self, reader: R, writer: W) -> io::Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let (read_result, write_result) =
            tokio::join!(self.read_loop(reader, tx), write_loop(writer, rx));

        tracing::info!("Worker stopped");
        read_result.and(write_result)
    }

    async fn read_loop<R: AsyncBufRead + Unpin>(
        &self,
        reader: R,
        tx: mpsc::UnboundedSender<JsonRpcResponse>,
    ) -> io::Result<()> {
        let mut frames = FrameReader::new(reader);
        let mut calls = JoinSet::new();

        loop {
            while calls.try_join_next().is_some() {}

            match frames.read_message().await {
                Ok(Some(IncomingMessage::Request(req))) if req.method == "tools/call" => {
                    let handler = self.handler.clone();
                    let tx = tx.clone();
                    calls.spawn(async move {
                        let response = dispatch_call(handler, req.id, req.params).await;
                        let _ = tx.send(response);
                    });
                }
                Ok(Some(IncomingMessage::Request(req))) => {
                    let _ = tx.send(self.handle_request(req));
                }
                Ok(Some(IncomingMessage::Notification(notif))) => {
                    self.handle_notification(&notif.method);
                }
                Ok(None) => {
                    tracing::info!(in_flight = calls.len(), "EOF received, shutting down");
                    break;
                }
                Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                    let _ = tx.send(JsonRpcResponse::error(
                        RequestId::Null,
                        JsonRpcError::parse_error(&e.to_string()),
                    ));
                }
                Err(e) => {
                    tracing::error!(error = %e, "Transport error");
                    return Err(e);
                }
            }
        }

        while calls.join_next().await.is_some() {}
        Ok(())
    }

    /// Handle every request except `tools/call`.
    fn handle_request(&self, req: JsonRpcRequest) -> JsonRpcResponse {
        tracing::debug!(method = %req.method, id = ?req.id, "Handling request");

        match req.method.as_str() {
            "initialize" => self.handle_initialize(req.id, req.params),
            "tools/list" => self.handle_tools_list(req.id),
            "ping" => JsonRpcResponse::success(req.id, serde_json::json!({})),
            method => {
                tracing::warn!(method, "Unknown method");
                JsonRpcResponse::error(req.id, JsonRpcError::method_not_found(method))
            }
        }
    }

    fn handle_notification(&self, method: &str) {
        match method {
            "notifications/initialized" | "initialized" => tracing::info!("Client initialized"),
            "notifications/cancelled" => tracing::debug!("Request cancelled by client"),
            _ => tracing::debug!(method, "Ignoring notification"),
        }
    }

    fn handle_initialize(&self, id: RequestId, params: Option<Value>) -> JsonRpcResponse {
        if self.initialized.swap(true, Ordering::SeqCst) {
            return JsonRpcResponse::error(
                id,
                JsonRpcError::invalid_request("Server already initialized"),
            );
        }

        if let Some(params) = params {
            match serde_json::from_value::<InitializeParams>(params) {
                Ok(init) => tracing::info!(
                    client = %init.client_info.name,
                    version = %init.client_info.version,
                    protocol = %init.protocol_version,
                    "Client connected"
                ),
                Err(e) => tracing::warn!(error = %e, "Failed to parse initialize params"),
            }
        }

        let result = InitializeResult {
            protocol_version: MCP_VERSION.to_string(),
            capabilities: ServerCapabilities {
                tools: Some(ToolsCapability {
                    list_changed: false,
                }),
            },
            server_info: ServerInfo {
                name: SERVER_NAME.to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        };
        JsonRpcResponse::from_result(id, &result)
    }

    fn handle_tools_list(&self, id: RequestId) -> JsonRpcResponse {
        let result = ToolsListResult {
            tools: self.handler.list_tools(),
        };
        JsonRpcResponse::from_result(id, &result)
    }
}

async fn write_loop<W: AsyncWrite + Unpin>(
    writer: W,
    mut rx: mpsc::UnboundedReceiver<JsonRpcResponse>,
) -> io::Result<()> {
    let mut frames = FrameWriter::new(writer);
    while let Some(response) = rx.recv().await {
        if let Err(e) = frames.write_message(&response).await {
            tracing::error!(error = %e, "Failed to write response");
            return Err(e);
        }
    }
    Ok(())
}

/// Run one `tools/call`. A panicking handler becomes an error result.
async fn dispatch_call(
    handler: Arc<ToolHandler>,
    id: RequestId,
    params: Option<Value>,
) -> JsonRpcResponse {
    let params: ToolCallParams = match params.map(serde_json::from_value) {
        Some(Ok(params)) => params,
        Some(Err(e)) => {
            return JsonRpcResponse::error(id, JsonRpcError::invalid_params(&e.to_string()))
        }
        None => return JsonRpcResponse::error(id, JsonRpcError::invalid_params("Missing params")),
    };

    let tool = params.name.clone();
    let call =
        tokio::spawn(async move { handler.call_tool(&params.name, params.arguments).await });

    match call.await {
        Ok(Ok(result)) => JsonRpcResponse::from_result(id, &result),
        Ok(Err(e)) => {
            tracing::warn!(tool = %tool, error = %e, "Rejected tool call");
            JsonRpcResponse::error(id, e.into())
        }
        Err(e) => {
            tracing::error!(tool = %tool, error = %e, "Tool handler aborted");
            let result = ToolCallResult::error(format!("{} failed: handler aborted", tool));
            JsonRpcResponse::from_result(id, &result)
        }
    }
}
