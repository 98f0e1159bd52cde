//! Worker lifecycle: connect on demand, health checks, reconnects.
//!
//! State moves through [`ConnectionState`] and is published on a watch
//! channel. Connect attempts are single-flight: callers that arrive while
//! one is running wait for it and share its outcome.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use async_trait::async_trait;
use contentreq_core::config::SupervisorConfig;
use contentreq_mcp::ToolCallResult;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::backoff::BackoffPolicy;
use crate::connection::Connection;
use crate::error::{BridgeError, Result};
use crate::launcher::WorkerLauncher;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// Handshake succeeded but the smoke-test tool reported an error
    Degraded,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Degraded => "degraded",
        }
    }

    /// Whether tool calls are being served.
    pub fn is_serving(&self) -> bool {
        matches!(self, ConnectionState::Connected | ConnectionState::Degraded)
    }
}

/// Snapshot for health endpoints.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeStatus {
    pub state: ConnectionState,
    pub process_id: Option<u32>,
    pub last_error: Option<String>,
    pub consecutive_failures: u32,
}

#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    pub backoff: BackoffPolicy,
    pub health_check_interval: Duration,
    pub call_timeout: Duration,
    pub handshake_timeout: Duration,
    pub smoke_test_tool: String,
}

impl From<&SupervisorConfig> for SupervisorSettings {
    fn from(config: &SupervisorConfig) -> Self {
        Self {
            backoff: BackoffPolicy::from(config),
            health_check_interval: Duration::from_secs(config.health_check_interval_secs),
            call_timeout: Duration::from_secs(config.call_timeout_secs),
            handshake_timeout: Duration::from_secs(config.handshake_timeout_secs),
            smoke_test_tool: config.smoke_test_tool.clone(),
        }
    }
}

/// Something that can run tools for the HTTP facade.
#[async_trait]
pub trait ToolInvoker: Send + Sync {
    async fn call_tool(&self, name: &str, arguments: Value) -> Result<ToolCallResult>;

    fn status(&self) -> BridgeStatus;
}

#[derive(Default)]
struct Slot {
    connection: Option<Arc<Connection>>,
    last_error: Option<String>,
    consecutive_failures: u32,
    retry_seq: u64,
    health_task: Option<JoinHandle<()>>,
}

struct Inner {
    launcher: Arc<dyn WorkerLauncher>,
    settings: SupervisorSettings,
    state: watch::Sender<ConnectionState>,
    shutdown: watch::Sender<bool>,
    connect_lock: tokio::sync::Mutex<()>,
    attempts_finished: AtomicU64,
    next_generation: AtomicU64,
    slot: Mutex<Slot>,
}

/// Owns the worker process and routes tool calls to it.
#[derive(Clone)]
pub struct Supervisor {
    inner: Arc<Inner>,
}

impl Supervisor {
    pub fn new(launcher: Arc<dyn WorkerLauncher>, settings: SupervisorSettings) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (shutdown, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                launcher,
                settings,
                state,
                shutdown,
                connect_lock: tokio::sync::Mutex::new(()),
                attempts_finished: AtomicU64::new(0),
                next_generation: AtomicU64::new(1),
                slot: Mutex::new(Slot::default()),
            }),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.inner.shutdown.borrow()
    }

    /// Reset the failure count and connect in the background.
    pub fn start(&self) {
        self.lock_slot().consecutive_failures = 0;
        let this = self.clone();
        tokio::spawn(async move {
            if let Err(e) = this.ensure_connected().await {
                warn!(error = %e, "Initial worker connection failed");
            }
        });
    }

    /// Return the live connection, connecting first if there is none.
    pub async fn ensure_connected(&self) -> Result<Arc<Connection>> {
        if self.is_shutting_down() {
            return Err(BridgeError::ShuttingDown);
        }
        if let Some(connection) = self.current() {
            return Ok(connection);
        }

        let seen = self.inner.attempts_finished.load(Ordering::SeqCst);
        let _guard = self.inner.connect_lock.lock().await;

        if self.is_shutting_down() {
            return Err(BridgeError::ShuttingDown);
        }
        if let Some(connection) = self.current() {
            return Ok(connection);
        }
        if self.inner.attempts_finished.load(Ordering::SeqCst) != seen {
            // An attempt finished while we waited and it failed.
            let reason = self
                .lock_slot()
                .last_error
                .clone()
                .unwrap_or_else(|| "worker unavailable".to_string());
            return Err(BridgeError::NotConnected(reason));
        }

        let result = self.connect().await;
        self.inner.attempts_finished.fetch_add(1, Ordering::SeqCst);
        result
    }

    /// Kill the worker and stop background tasks.
    pub async fn shutdown(&self) {
        if self.inner.shutdown.send_replace(true) {
            return;
        }
        info!("Shutting down worker supervisor");
        let (connection, health) = {
            let mut slot = self.lock_slot();
            (slot.connection.take(), slot.health_task.take())
        };
        if let Some(health) = health {
            health.abort();
        }
        if let Some(connection) = connection {
            connection.terminate().await;
        }
        self.set_state(ConnectionState::Disconnected);
    }

    fn lock_slot(&self) -> MutexGuard<'_, Slot> {
        self.inner.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn current(&self) -> Option<Arc<Connection>> {
        self.lock_slot()
            .connection
            .clone()
            .filter(|connection| connection.is_alive())
    }

    fn set_state(&self, next: ConnectionState) {
        self.inner.state.send_if_modified(|state| {
            if *state == next {
                return false;
            }
            debug!(from = state.as_str(), to = next.as_str(), "Supervisor state");
            *state = next;
            true
        });
    }

    async fn connect(&self) -> Result<Arc<Connection>> {
        let generation = self.inner.next_generation.fetch_add(1, Ordering::SeqCst);
        self.set_state(ConnectionState::Connecting);
        info!(generation, "Connecting to worker");

        match self.establish(generation).await {
            Ok((connection, degraded)) => {
                let connection = Arc::new(connection);
                if self.is_shutting_down() {
                    connection.terminate().await;
                    return Err(BridgeError::ShuttingDown);
                }
                let previous = {
                    let mut slot = self.lock_slot();
                    slot.consecutive_failures = 0;
                    slot.last_error = degraded.then(|| "smoke test reported an error".to_string());
                    slot.connection.replace(connection.clone())
                };
                if let Some(previous) = previous {
                    previous.kill();
                }
                self.set_state(if degraded {
                    ConnectionState::Degraded
                } else {
                    ConnectionState::Connected
                });
                self.watch_connection(&connection);
                self.ensure_health_monitor();
                info!(
                    generation,
                    pid = ?connection.process_id(),
                    degraded,
                    "Worker connected"
                );
                Ok(connection)
            }
            Err(e) => {
                warn!(generation, error = %e, "Worker connection attempt failed");
                {
                    let mut slot = self.lock_slot();
                    slot.consecutive_failures += 1;
                    slot.last_error = Some(e.to_string());
                }
                self.set_state(ConnectionState::Disconnected);
                if !self.is_shutting_down() {
                    self.schedule_retry();
                }
                Err(BridgeError::NotConnected(e.to_string()))
            }
        }
    }

    /// Launch, handshake, then run the smoke test. Returns whether degraded.
    async fn establish(&self, generation: u64) -> Result<(Connection, bool)> {
        let settings = &self.inner.settings;
        let channel = self.inner.launcher.launch().await?;
        let connection = Connection::open(channel, generation);

        if let Err(e) = connection.rpc().initialize(settings.handshake_timeout).await {
            connection.kill();
            return Err(e);
        }

        match connection
            .rpc()
            .call_tool(&settings.smoke_test_tool, json!({}), settings.call_timeout)
            .await
        {
            Ok(result) => {
                if result.is_error() {
                    warn!(
                        tool = %settings.smoke_test_tool,
                        message = %result.text_content(),
                        "Smoke test reported an error"
                    );
                }
                Ok((connection, result.is_error()))
            }
            Err(e) => {
                connection.kill();
                Err(e)
            }
        }
    }

    fn watch_connection(&self, connection: &Arc<Connection>) {
        let rpc = connection.rpc().clone();
        let generation = connection.generation();
        let weak = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            rpc.closed().await;
            if let Some(inner) = weak.upgrade() {
                Supervisor { inner }.handle_loss(generation, "worker connection closed", false);
            }
        });
    }

    /// Drop the connection of `generation` if it is still current.
    fn handle_loss(&self, generation: u64, reason: &str, reconnect_now: bool) {
        let lost = {
            let mut slot = self.lock_slot();
            match &slot.connection {
                Some(connection) if connection.generation() == generation => {
                    slot.last_error = Some(reason.to_string());
                    slot.connection.take()
                }
                _ => None,
            }
        };
        match lost {
            Some(connection) => {
                connection.kill();
                warn!(generation, reason, "Worker connection lost");
                self.set_state(ConnectionState::Disconnected);
            }
            // Already handled, but a failed health check still asks for a reconnect.
            None if reconnect_now => {}
            None => return,
        }

        if self.is_shutting_down() {
            return;
        }
        if reconnect_now {
            let this = self.clone();
            tokio::spawn(async move {
                if let Err(e) = this.ensure_connected().await {
                    debug!(error = %e, "Immediate reconnect failed");
                }
            });
        } else {
            self.schedule_retry();
        }
    }

    fn schedule_retry(&self) {
        let (delay, seq) = {
            let mut slot = self.lock_slot();
            let attempt = slot.consecutive_failures.max(1);
            match self.inner.settings.backoff.delay(attempt) {
                Some(delay) => {
                    slot.retry_seq += 1;
                    (delay, slot.retry_seq)
                }
                None => {
                    error!(
                        failures = slot.consecutive_failures,
                        "Automatic reconnects exhausted; waiting for the next call"
                    );
                    return;
                }
            }
        };

        info!(delay_ms = delay.as_millis() as u64, "Scheduling worker reconnect");
        let weak = Arc::downgrade(&self.inner);
        let mut shutdown = self.inner.shutdown.subscribe();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.changed() => return,
            }
            let Some(this) = upgrade(&weak) else {
                return;
            };
            if this.is_shutting_down()
                || this.current().is_some()
                || this.lock_slot().retry_seq != seq
            {
                return;
            }
            if let Err(e) = this.ensure_connected().await {
                debug!(error = %e, "Scheduled reconnect failed");
            }
        });
    }

    fn ensure_health_monitor(&self) {
        let mut slot = self.lock_slot();
        if slot.health_task.is_some() {
            return;
        }
        let weak = Arc::downgrade(&self.inner);
        let interval = self.inner.settings.health_check_interval;
        let mut shutdown = self.inner.shutdown.subscribe();
        slot.health_task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = shutdown.changed() => break,
                }
                let Some(this) = upgrade(&weak) else {
                    break;
                };
                this.check_health().await;
            }
            debug!("Health monitor stopped");
        }));
    }

    async fn check_health(&self) {
        let Some(connection) = self.current() else {
            return;
        };
        let settings = &self.inner.settings;
        let outcome = connection
            .rpc()
            .call_tool(&settings.smoke_test_tool, json!({}), settings.call_timeout)
            .await;

        match outcome {
            Ok(result) => {
                let still_current = self
                    .lock_slot()
                    .connection
                    .as_ref()
                    .map(|c| c.generation() == connection.generation())
                    .unwrap_or(false);
                if !still_current {
                    return;
                }
                let next = if result.is_error() {
                    ConnectionState::Degraded
                } else {
                    ConnectionState::Connected
                };
                if self.state() != next {
                    info!(state = next.as_str(), "Health check changed worker state");
                }
                self.lock_slot().last_error =
                    result.is_error().then(|| result.text_content());
                self.set_state(next);
            }
            Err(e) => {
                warn!(error = %e, "Health check failed");
                self.handle_loss(
                    connection.generation(),
                    &format!("health check failed: {}", e),
                    true,
                );
            }
        }
    }
}

fn upgrade(weak: &Weak<Inner>) -> Option<Supervisor> {
    weak.upgrade().map(|inner| Supervisor { inner })
}

#[async_trait]
impl ToolInvoker for Supervisor {
    async fn call_tool(&self, name: &str, arguments: Value) -> Result<ToolCallResult> {
        let connection = self.ensure_connected().await?;
        let result = connection
            .rpc()
            .call_tool(name, arguments, self.inner.settings.call_timeout)
            .await;
        if let Err(e) = &result {
            if e.is_connection_related() {
                self.handle_loss(connection.generation(), &e.to_string(), false);
            }
        }
        result
    }

    fn status(&self) -> BridgeStatus {
        let slot = self.lock_slot();
        BridgeStatus {
            state: self.state(),
            process_id: slot.connection.as_ref().and_then(|c| c.process_id()),
            last_error: slot.last_error.clone(),
            consecutive_failures: slot.consecutive_failures,
        }
    }
}
