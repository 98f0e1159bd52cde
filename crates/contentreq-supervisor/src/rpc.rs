//! JSON-RPC client for the worker's stdio channel.
//!
//! Requests get monotonically increasing numeric ids. A background task
//! reads every frame the worker writes and completes the matching pending
//! call. A call whose deadline passes is forgotten; a response arriving
//! for it later is read and dropped so the stream stays aligned.
//!
//! Frames are written by a dedicated task, so a caller giving up never
//! leaves half a frame on the worker's stdin.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use contentreq_mcp::protocol::{
    InitializeResult, JsonRpcError, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse,
    RequestId, ToolCallResult, MCP_VERSION,
};
use contentreq_mcp::transport::{FrameReader, FrameWriter};
use serde_json::{json, Value};
use tokio::io::{AsyncBufRead, AsyncRead, AsyncWrite, BufReader};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{BridgeError, Result};

pub type BoxReader = Box<dyn AsyncRead + Send + Unpin>;
pub type BoxWriter = Box<dyn AsyncWrite + Send + Unpin>;

const CLIENT_NAME: &str = "contentreq-supervisor";

type PendingMap = HashMap<u64, oneshot::Sender<JsonRpcResponse>>;

/// Calls waiting for a response. `None` once the channel is closed.
struct Pending {
    calls: Mutex<Option<PendingMap>>,
}

impl Pending {
    fn new() -> Self {
        Self {
            calls: Mutex::new(Some(HashMap::new())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<PendingMap>> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn register(&self, id: u64) -> Option<oneshot::Receiver<JsonRpcResponse>> {
        let mut calls = self.lock();
        let map = calls.as_mut()?;
        let (tx, rx) = oneshot::channel();
        map.insert(id, tx);
        Some(rx)
    }

    /// Complete a call. Returns false when nobody is waiting for `id`.
    fn resolve(&self, id: u64, response: JsonRpcResponse) -> bool {
        let sender = self.lock().as_mut().and_then(|map| map.remove(&id));
        match sender {
            Some(sender) => sender.send(response).is_ok(),
            None => false,
        }
    }

    fn forget(&self, id: u64) {
        if let Some(map) = self.lock().as_mut() {
            map.remove(&id);
        }
    }

    /// Close the table. Dropping the senders wakes every waiter.
    fn fail_all(&self) -> usize {
        self.lock().take().map(|map| map.len()).unwrap_or(0)
    }

    fn len(&self) -> usize {
        self.lock().as_ref().map(HashMap::len).unwrap_or(0)
    }
}

/// Wait until a boolean watch turns true or its sender goes away.
pub(crate) async fn wait_until_set(mut rx: watch::Receiver<bool>) {
    while !*rx.borrow_and_update() {
        if rx.changed().await.is_err() {
            return;
        }
    }
}

/// Client end of a worker channel.
pub struct RpcClient {
    outgoing: mpsc::UnboundedSender<Value>,
    pending: Arc<Pending>,
    next_id: AtomicU64,
    closed: Arc<watch::Sender<bool>>,
    reader_task: JoinHandle<()>,
    writer_task: JoinHandle<()>,
}

impl RpcClient {
    /// Start reading responses from `reader`. Must be called inside a runtime.
    pub fn new(reader: BoxReader, writer: BoxWriter) -> Self {
        let pending = Arc::new(Pending::new());
        let (closed_tx, _) = watch::channel(false);
        let closed = Arc::new(closed_tx);
        let (outgoing, frames) = mpsc::unbounded_channel();
        let reader_task = tokio::spawn(read_responses(
            FrameReader::new(BufReader::new(reader)),
            pending.clone(),
            closed.clone(),
        ));
        let writer_task = tokio::spawn(write_frames(
            FrameWriter::new(writer),
            frames,
            pending.clone(),
            closed.clone(),
        ));
        Self {
            outgoing,
            pending,
            next_id: AtomicU64::new(1),
            closed,
            reader_task,
            writer_task,
        }
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Resolves once the channel is closed for any reason.
    pub async fn closed(&self) {
        wait_until_set(self.closed.subscribe()).await
    }

    /// Close the channel and fail every in-flight call.
    pub fn close(&self, reason: &str) {
        if !self.closed.send_replace(true) {
            debug!(reason, "Closing worker channel");
        }
        self.pending.fail_all();
    }

    /// Number of calls still waiting for a response.
    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }

    /// Send a request and wait up to `timeout` for its response.
    pub async fn request(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let rx = self
            .pending
            .register(id)
            .ok_or_else(|| BridgeError::ConnectionLost("worker channel is closed".to_string()))?;
        let request = JsonRpcRequest::new(RequestId::from(id), method, params);
        if let Err(e) = self.send(&request) {
            self.pending.forget(id);
            return Err(e);
        }

        // Only the wait is bounded; the frame itself is already queued whole.
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) => response_result(response),
            Ok(Err(_)) => Err(BridgeError::ConnectionLost(
                "worker closed before responding".to_string(),
            )),
            Err(_) => {
                self.pending.forget(id);
                warn!(method, id, ?timeout, "Worker call timed out");
                Err(BridgeError::Timeout {
                    tool: method.to_string(),
                    after: timeout,
                })
            }
        }
    }

    /// Send a notification; no response is expected.
    pub async fn notify(&self, method: &str) -> Result<()> {
        if self.is_closed() {
            return Err(BridgeError::ConnectionLost(
                "worker channel is closed".to_string(),
            ));
        }
        self.send(&JsonRpcNotification::new(method))
    }

    /// Queue one frame for the writer task.
    fn send<T: serde::Serialize>(&self, message: &T) -> Result<()> {
        let frame = serde_json::to_value(message)
            .map_err(|e| BridgeError::Protocol(format!("unencodable message: {}", e)))?;
        self.outgoing
            .send(frame)
            .map_err(|_| BridgeError::ConnectionLost("worker channel is closed".to_string()))
    }

    /// `initialize` followed by `notifications/initialized`.
    pub async fn initialize(&self, timeout: Duration) -> Result<InitializeResult> {
        let params = json!({
            "protocolVersion": MCP_VERSION,
            "capabilities": {},
            "clientInfo": {
                "name": CLIENT_NAME,
                "version": env!("CARGO_PKG_VERSION"),
            },
        });
        let value = self.request("initialize", Some(params), timeout).await?;
        let result: InitializeResult = serde_json::from_value(value)
            .map_err(|e| BridgeError::Protocol(format!("invalid initialize result: {}", e)))?;
        self.notify("notifications/initialized").await?;
        info!(
            server = %result.server_info.name,
            version = %result.server_info.version,
            protocol = %result.protocol_version,
            "Worker handshake complete"
        );
        Ok(result)
    }

    /// Invoke a tool on the worker.
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Value,
        timeout: Duration,
    ) -> Result<ToolCallResult> {
        let params = json!({ "name": name, "arguments": arguments });
        let value = self
            .request("tools/call", Some(params), timeout)
            .await
            .map_err(|e| match e {
                BridgeError::Timeout { after, .. } => BridgeError::Timeout {
                    tool: name.to_string(),
                    after,
                },
                other => other,
            })?;
        serde_json::from_value(value)
            .map_err(|e| BridgeError::Protocol(format!("invalid result for {}: {}", name, e)))
    }
}

impl Drop for RpcClient {
    fn drop(&mut self) {
        self.closed.send_replace(true);
        self.pending.fail_all();
        self.reader_task.abort();
        self.writer_task.abort();
    }
}

fn response_result(response: JsonRpcResponse) -> Result<Value> {
    match response.error {
        Some(error) => Err(rpc_error(error)),
        None => Ok(response.result.unwrap_or(Value::Null)),
    }
}

/// Map a worker-side JSON-RPC error back to a caller-facing error.
fn rpc_error(error: JsonRpcError) -> BridgeError {
    let data = error.data.as_ref();
    let tool = data
        .and_then(|d| d.get("tool"))
        .and_then(Value::as_str)
        .map(str::to_string);

    match (error.code, tool) {
        (JsonRpcError::METHOD_NOT_FOUND, Some(tool)) => BridgeError::UnknownTool(tool),
        (JsonRpcError::INVALID_PARAMS, Some(tool)) => {
            let reason = data
                .and_then(|d| d.get("reason"))
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or(error.message);
            BridgeError::InvalidArguments { tool, reason }
        }
        (code, _) => BridgeError::Protocol(format!("{} ({})", error.message, code)),
    }
}

async fn read_responses<R: AsyncBufRead + Unpin>(
    mut frames: FrameReader<R>,
    pending: Arc<Pending>,
    closed: Arc<watch::Sender<bool>>,
) {
    let mut closed_rx = closed.subscribe();
    loop {
        if *closed_rx.borrow_and_update() {
            break;
        }
        let frame = tokio::select! {
            frame = frames.next_frame() => frame,
            _ = closed_rx.changed() => continue,
        };
        match frame {
            Ok(Some(line)) => dispatch_frame(&line, &pending),
            Ok(None) => {
                info!("Worker closed its output");
                break;
            }
            Err(e) if e.kind() == std::io::ErrorKind::InvalidData => {
                warn!(error = %e, "Skipping undecodable line from worker");
            }
            Err(e) => {
                warn!(error = %e, "Worker transport read failed");
                break;
            }
        }
    }

    closed.send_replace(true);
    let failed = pending.fail_all();
    if failed > 0 {
        warn!(failed, "Failing in-flight calls after the worker channel closed");
    }
}

/// Drain queued frames onto the worker's stdin, one whole frame at a time.
async fn write_frames(
    mut writer: FrameWriter<BoxWriter>,
    mut frames: mpsc::UnboundedReceiver<Value>,
    pending: Arc<Pending>,
    closed: Arc<watch::Sender<bool>>,
) {
    let mut closed_rx = closed.subscribe();
    loop {
        let frame = tokio::select! {
            frame = frames.recv() => frame,
            _ = wait_until_set(closed_rx.clone()) => None,
        };
        let Some(frame) = frame else { break };
        if let Err(e) = writer.write_message(&frame).await {
            warn!(error = %e, "Worker transport write failed");
            closed.send_replace(true);
            pending.fail_all();
            break;
        }
        if *closed_rx.borrow_and_update() {
            break;
        }
    }
}

fn dispatch_frame(line: &str, pending: &Pending) {
    match serde_json::from_str::<JsonRpcResponse>(line) {
        Ok(response) => match response.id.as_u64() {
            Some(id) => {
                if !pending.resolve(id, response) {
                    debug!(id, "Dropping response for an abandoned call");
                }
            }
            None => warn!(error = ?response.error, "Worker answered without a usable id"),
        },
        Err(_) => match serde_json::from_str::<JsonRpcNotification>(line) {
            Ok(notification) => debug!(method = %notification.method, "Worker notification"),
            Err(e) => warn!(error = %e, "Unparseable frame from worker"),
        },
    }
}
