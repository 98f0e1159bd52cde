//! In-memory worker used by the supervisor tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use contentreq_mcp::protocol::{
    JsonRpcError, JsonRpcResponse, ToolCallParams, ToolCallResult, MCP_VERSION,
};
use contentreq_mcp::transport::{FrameReader, FrameWriter, IncomingMessage};
use contentreq_mcp::DispatchError;
use serde_json::{json, Value};
use tokio::io::{duplex, split, BufReader, DuplexStream};
use tokio::sync::Notify;

use crate::error::{BridgeError, Result};
use crate::launcher::{WorkerChannel, WorkerLauncher};

pub(crate) const SMOKE_TOOL: &str = "get_team_dashboard";

/// How a fake worker behaves.
///
/// Tools: `echo` returns its arguments, `hang` never answers, `die` exits.
#[derive(Debug, Clone)]
pub(crate) struct FakeWorker {
    pub answer_initialize: bool,
    pub smoke_is_error: bool,
    /// Exit instead of answering the smoke test after this many answers
    pub smoke_responses: Option<usize>,
}

impl Default for FakeWorker {
    fn default() -> Self {
        Self {
            answer_initialize: true,
            smoke_is_error: false,
            smoke_responses: None,
        }
    }
}

pub(crate) struct FakeLauncher {
    worker: FakeWorker,
    fail_spawn: AtomicBool,
    launches: AtomicUsize,
    kill_switches: Mutex<Vec<Arc<Notify>>>,
}

impl FakeLauncher {
    pub fn new(worker: FakeWorker) -> Arc<Self> {
        Arc::new(Self {
            worker,
            fail_spawn: AtomicBool::new(false),
            launches: AtomicUsize::new(0),
            kill_switches: Mutex::new(Vec::new()),
        })
    }

    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    pub fn set_fail_spawn(&self, fail: bool) {
        self.fail_spawn.store(fail, Ordering::SeqCst);
    }

    /// Make the most recently launched worker exit.
    pub fn kill_latest(&self) {
        if let Some(switch) = self.kill_switches.lock().unwrap().last() {
            switch.notify_one();
        }
    }
}

#[async_trait]
impl WorkerLauncher for FakeLauncher {
    async fn launch(&self) -> Result<WorkerChannel> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        if self.fail_spawn.load(Ordering::SeqCst) {
            return Err(BridgeError::Spawn("fake-worker: not found".to_string()));
        }

        let (client, worker) = duplex(64 * 1024);
        let (read, write) = split(client);
        let kill = Arc::new(Notify::new());
        self.kill_switches.lock().unwrap().push(kill.clone());
        tokio::spawn(run_worker(worker, self.worker.clone(), kill));
        Ok(WorkerChannel::in_memory(Box::new(read), Box::new(write)))
    }
}

async fn run_worker(stream: DuplexStream, config: FakeWorker, kill: Arc<Notify>) {
    let (read, write) = split(stream);
    let mut reader = FrameReader::new(BufReader::new(read));
    let mut writer = FrameWriter::new(write);
    let mut smoke_answers = 0;

    loop {
        let message = tokio::select! {
            _ = kill.notified() => return,
            message = reader.read_message() => message,
        };
        let request = match message {
            Ok(Some(IncomingMessage::Request(request))) => request,
            Ok(Some(IncomingMessage::Notification(_))) => continue,
            _ => return,
        };

        let response = match request.method.as_str() {
            "initialize" if !config.answer_initialize => continue,
            "initialize" => JsonRpcResponse::success(
                request.id,
                json!({
                    "protocolVersion": MCP_VERSION,
                    "capabilities": {"tools": {"listChanged": false}},
                    "serverInfo": {"name": "fake-worker", "version": "0.0.0"},
                }),
            ),
            "tools/call" => {
                let params: ToolCallParams =
                    serde_json::from_value(request.params.clone().unwrap_or(Value::Null)).unwrap();
                let result = match params.name.as_str() {
                    SMOKE_TOOL => {
                        if config.smoke_responses.is_some_and(|limit| smoke_answers >= limit) {
                            return;
                        }
                        smoke_answers += 1;
                        if config.smoke_is_error {
                            ToolCallResult::error("remote unreachable".to_string())
                        } else {
                            ToolCallResult::json(&json!({"connectionStatus": "connected"}))
                        }
                    }
                    "echo" => ToolCallResult::json(&params.arguments.unwrap_or(Value::Null)),
                    "hang" => continue,
                    "die" => return,
                    other => {
                        let error: JsonRpcError =
                            DispatchError::UnknownTool(other.to_string()).into();
                        let response = JsonRpcResponse::error(request.id, error);
                        if writer.write_message(&response).await.is_err() {
                            return;
                        }
                        continue;
                    }
                };
                JsonRpcResponse::from_result(request.id, &result)
            }
            other => JsonRpcResponse::error(request.id, JsonRpcError::method_not_found(other)),
        };

        if writer.write_message(&response).await.is_err() {
            return;
        }
    }
}
