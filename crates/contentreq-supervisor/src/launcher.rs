//! Starting worker processes.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use contentreq_core::config::{SupervisorConfig, TOKEN_ENV};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};
use tracing::{debug, info, warn};

use crate::error::{BridgeError, Result};
use crate::rpc::{BoxReader, BoxWriter};

/// Subcommand of this binary that runs the worker.
pub const WORKER_SUBCOMMAND: &str = "worker";

/// A freshly started worker: its stdio plus the process, if there is one.
pub struct WorkerChannel {
    pub reader: BoxReader,
    pub writer: BoxWriter,
    pub process: Option<Child>,
}

impl WorkerChannel {
    /// A channel with no process behind it.
    pub fn in_memory(reader: BoxReader, writer: BoxWriter) -> Self {
        Self {
            reader,
            writer,
            process: None,
        }
    }
}

/// Starts workers on demand.
#[async_trait]
pub trait WorkerLauncher: Send + Sync {
    async fn launch(&self) -> Result<WorkerChannel>;
}

/// Launches the worker as a child process speaking MCP on stdio.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    program: PathBuf,
    args: Vec<String>,
    envs: Vec<(String, String)>,
}

impl ProcessLauncher {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            envs: Vec::new(),
        }
    }

    /// Worker command from config, or `<current exe> worker`.
    pub fn from_config(config: &SupervisorConfig, token: Option<String>) -> Result<Self> {
        let launcher = match &config.worker_command {
            Some(command) => Self::new(command, config.worker_args.clone()),
            None => {
                let exe = std::env::current_exe().map_err(|e| {
                    BridgeError::Spawn(format!("cannot locate current executable: {}", e))
                })?;
                let mut args = vec![WORKER_SUBCOMMAND.to_string()];
                args.extend(config.worker_args.iter().cloned());
                Self::new(exe, args)
            }
        };
        Ok(match token {
            Some(token) => launcher.env(TOKEN_ENV, token),
            None => launcher,
        })
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    pub fn program(&self) -> &PathBuf {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }
}

#[async_trait]
impl WorkerLauncher for ProcessLauncher {
    async fn launch(&self) -> Result<WorkerChannel> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .envs(self.envs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| BridgeError::Spawn(format!("{}: {}", self.program.display(), e)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| BridgeError::Spawn("worker stdin is not piped".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| BridgeError::Spawn("worker stdout is not piped".to_string()))?;
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(relay_stderr(stderr));
        }

        info!(pid = ?child.id(), program = %self.program.display(), "Worker started");
        Ok(WorkerChannel {
            reader: Box::new(stdout),
            writer: Box::new(stdin),
            process: Some(child),
        })
    }
}

/// Re-log the worker's stderr under the `worker` target.
async fn relay_stderr(stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if line.contains("ERROR") || line.contains("WARN") {
                    warn!(target: "worker", "{}", line);
                } else {
                    debug!(target: "worker", "{}", line);
                }
            }
            Ok(None) => break,
            Err(e) => {
                debug!(error = %e, "Worker stderr closed");
                break;
            }
        }
    }
}
