//! One live worker: its RPC client and process lifetime.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::process::Child;
use tokio::sync::{oneshot, watch};
use tracing::{info, warn};

use crate::launcher::WorkerChannel;
use crate::rpc::{wait_until_set, RpcClient};

const EXIT_GRACE: Duration = Duration::from_secs(5);

/// A connected worker.
///
/// Dropping the connection kills the process. Process exit closes the RPC
/// client, which fails every in-flight call.
pub struct Connection {
    generation: u64,
    rpc: Arc<RpcClient>,
    process_id: Option<u32>,
    kill: Mutex<Option<oneshot::Sender<()>>>,
    exited: watch::Receiver<bool>,
}

impl Connection {
    /// Wrap a launched worker. Must be called inside a runtime.
    pub fn open(channel: WorkerChannel, generation: u64) -> Self {
        let rpc = Arc::new(RpcClient::new(channel.reader, channel.writer));
        let process_id = channel.process.as_ref().and_then(Child::id);
        let (kill_tx, kill_rx) = oneshot::channel();
        let (exited_tx, exited_rx) = watch::channel(false);

        tokio::spawn(supervise_process(
            channel.process,
            kill_rx,
            rpc.clone(),
            exited_tx,
            generation,
        ));

        Self {
            generation,
            rpc,
            process_id,
            kill: Mutex::new(Some(kill_tx)),
            exited: exited_rx,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn rpc(&self) -> &Arc<RpcClient> {
        &self.rpc
    }

    pub fn process_id(&self) -> Option<u32> {
        self.process_id
    }

    pub fn is_alive(&self) -> bool {
        !self.rpc.is_closed() && !*self.exited.borrow()
    }

    /// Ask the process to be killed without waiting.
    pub fn kill(&self) {
        let sender = self
            .kill
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(sender) = sender {
            let _ = sender.send(());
        }
    }

    /// Kill the process and wait briefly for it to be reaped.
    pub async fn terminate(&self) {
        self.kill();
        if tokio::time::timeout(EXIT_GRACE, wait_until_set(self.exited.clone()))
            .await
            .is_err()
        {
            warn!(generation = self.generation, "Worker did not exit in time");
        }
    }
}

async fn supervise_process(
    process: Option<Child>,
    kill: oneshot::Receiver<()>,
    rpc: Arc<RpcClient>,
    exited: watch::Sender<bool>,
    generation: u64,
) {
    match process {
        Some(mut child) => {
            tokio::select! {
                status = child.wait() => match status {
                    Ok(status) => info!(generation, %status, "Worker exited"),
                    Err(e) => warn!(generation, error = %e, "Failed to wait for worker"),
                },
                // Fires on an explicit kill and when the connection is dropped.
                _ = kill => {
                    match child.kill().await {
                        Ok(()) => info!(generation, "Worker stopped"),
                        Err(e) => warn!(generation, error = %e, "Failed to kill worker"),
                    }
                }
            }
        }
        None => {
            let _ = kill.await;
        }
    }
    rpc.close("worker process ended");
    exited.send_replace(true);
}
