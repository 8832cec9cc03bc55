use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use voxmux_frame::FrameConfig;
use voxmux_worker::{ShutdownReport, WorkerConfig, WorkerManager, DEFAULT_STOP_TIMEOUT};

use crate::correlator::AckBody;
use crate::error::{MuxError, Result};
use crate::link::Link;
use crate::registry::{
    callback, CallbackId, CallbackResult, Event, Registry, SessionStatus, StatusChange,
};

/// Upper bound on waiting for the dispatch loop after the worker stopped.
const DISPATCH_DRAIN_GRACE: Duration = Duration::from_secs(1);

/// Multiplexer configuration.
#[derive(Debug, Clone)]
pub struct MuxConfig {
    /// How to launch the worker.
    pub worker: WorkerConfig,
    /// Line framing limits.
    pub frame: FrameConfig,
    /// Grace period between interrupt and kill. Default: 3 s.
    pub shutdown_timeout: Duration,
    /// Default deadline for `send`. Default: none.
    pub request_timeout: Option<Duration>,
}

impl MuxConfig {
    pub fn new(worker: WorkerConfig) -> Self {
        Self {
            worker,
            ..Self::default()
        }
    }

    pub fn with_frame_config(mut self, frame: FrameConfig) -> Self {
        self.frame = frame;
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }
}

impl Default for MuxConfig {
    fn default() -> Self {
        Self {
            worker: WorkerConfig::default(),
            frame: FrameConfig::default(),
            shutdown_timeout: DEFAULT_STOP_TIMEOUT,
            request_timeout: None,
        }
    }
}

/// Multiplexes logical sessions over one worker process.
///
/// The worker is started by the first `init` and stopped by the `clear`
/// that removes the last session. Share it between tasks through an `Arc`.
pub struct Multiplexer {
    config: MuxConfig,
    registry: Arc<Registry>,
    lifecycle: tokio::sync::Mutex<WorkerManager>,
    link: Mutex<Option<Arc<Link>>>,
}

impl Multiplexer {
    pub fn new(config: MuxConfig) -> Self {
        Self {
            config,
            registry: Arc::new(Registry::new()),
            lifecycle: tokio::sync::Mutex::new(WorkerManager::new()),
            link: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &MuxConfig {
        &self.config
    }

    fn current_link(&self) -> Option<Arc<Link>> {
        self.link
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn replace_link(&self, link: Option<Arc<Link>>) -> Option<Arc<Link>> {
        std::mem::replace(
            &mut *self.link.lock().unwrap_or_else(PoisonError::into_inner),
            link,
        )
    }

    /// Register `sid`, starting the worker if it is not running.
    ///
    /// Initializing an existing session leaves its status and callbacks
    /// untouched.
    pub async fn init(&self, sid: impl Into<String>) -> Result<String> {
        let sid = sid.into();
        let mut manager = self.lifecycle.lock().await;
        self.ensure_worker(&mut manager).await?;

        if self.registry.insert(&sid) {
            info!(sid = %sid, "session created");
        } else {
            debug!(sid = %sid, "session already registered");
        }
        Ok(sid)
    }

    async fn ensure_worker(&self, manager: &mut WorkerManager) -> Result<()> {
        let link_open = self.current_link().is_some_and(|link| link.is_open());
        if link_open && manager.running() {
            return Ok(());
        }

        if manager.has_handle() {
            debug!(pid = ?manager.pid(), "replacing unusable worker");
            if let Err(err) = self.stop_worker(manager).await {
                warn!(error = %err, "failed to stop previous worker");
            }
        }

        let io = manager.start(&self.config.worker)?;
        let (stdout, stdin) = io.into_split();
        let link = Link::open(stdout, stdin, Arc::clone(&self.registry), &self.config.frame);
        if let Some(stale) = self.replace_link(Some(link)) {
            stale.join(DISPATCH_DRAIN_GRACE).await;
        }
        Ok(())
    }

    async fn stop_worker(&self, manager: &mut WorkerManager) -> Result<Option<ShutdownReport>> {
        let link = self.replace_link(None);
        let report = if manager.has_handle() {
            Some(manager.stop(self.config.shutdown_timeout).await?)
        } else {
            None
        };
        if let Some(link) = link {
            link.join(DISPATCH_DRAIN_GRACE).await;
        }
        Ok(report)
    }

    /// Send `payload` for `sid` and wait for the worker's ack.
    ///
    /// Uses `MuxConfig::request_timeout` as the deadline, if set.
    pub async fn send(&self, sid: &str, payload: Value) -> Result<AckBody> {
        self.dispatch_request(sid, payload, self.config.request_timeout)
            .await
    }

    /// Like [`send`](Self::send) with an explicit deadline for the ack.
    pub async fn send_with_timeout(
        &self,
        sid: &str,
        payload: Value,
        timeout: Duration,
    ) -> Result<AckBody> {
        self.dispatch_request(sid, payload, Some(timeout)).await
    }

    async fn dispatch_request(
        &self,
        sid: &str,
        payload: Value,
        timeout: Option<Duration>,
    ) -> Result<AckBody> {
        let link = self
            .current_link()
            .filter(|link| link.is_open())
            .ok_or_else(|| MuxError::InvalidState("worker is not running".to_string()))?;
        link.request(sid, payload, timeout).await
    }

    /// Register an async callback for `event` on `sid`.
    pub fn on<F, Fut>(&self, sid: &str, event: &str, f: F) -> Result<CallbackId>
    where
        F: Fn(Event) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CallbackResult> + Send + 'static,
    {
        self.registry.on(sid, event, callback(f))
    }

    /// Remove a callback registered with [`on`](Self::on).
    pub fn off(&self, sid: &str, event: &str, id: CallbackId) -> bool {
        self.registry.off(sid, event, id)
    }

    /// Status string of `sid`, or `"unknown"`.
    pub fn state(&self, sid: &str) -> &'static str {
        self.registry.state(sid)
    }

    pub fn status(&self, sid: &str) -> Option<SessionStatus> {
        self.registry.status(sid)
    }

    /// Receive every status update applied from now on, for all sessions.
    ///
    /// Filter on [`StatusChange::sid`] to follow one session. A receiver that
    /// falls more than `STATUS_CHANGE_CAPACITY` updates behind gets a
    /// `Lagged` error and resumes with the newest updates.
    pub fn subscribe_status(&self) -> broadcast::Receiver<StatusChange> {
        self.registry.subscribe()
    }

    /// Local transitions driven by call control.
    pub(crate) fn set_status(&self, sid: &str, status: SessionStatus) -> Result<()> {
        if self.registry.set_status(sid, status) {
            Ok(())
        } else {
            Err(MuxError::UnknownSession(sid.to_string()))
        }
    }

    /// Registered session ids, sorted.
    pub fn sessions(&self) -> Vec<String> {
        self.registry.session_ids()
    }

    /// Requests still waiting for an ack.
    pub fn pending_requests(&self) -> usize {
        self.current_link()
            .map(|link| link.pending_count())
            .unwrap_or(0)
    }

    /// Remove `sid`; stop the worker if it was the last session.
    ///
    /// Returns the shutdown report when the worker was stopped.
    pub async fn clear(&self, sid: &str) -> Result<Option<ShutdownReport>> {
        let mut manager = self.lifecycle.lock().await;
        if !self.registry.remove(sid) {
            return Err(MuxError::UnknownSession(sid.to_string()));
        }
        info!(sid, "session cleared");

        if !self.registry.is_empty() {
            return Ok(None);
        }
        debug!("no sessions left, stopping worker");
        self.stop_worker(&mut manager).await
    }

    /// Remove every session and stop the worker.
    pub async fn shutdown(&self) -> Result<Option<ShutdownReport>> {
        let mut manager = self.lifecycle.lock().await;
        for sid in self.registry.session_ids() {
            self.registry.remove(&sid);
            debug!(sid = %sid, "session dropped at shutdown");
        }
        self.stop_worker(&mut manager).await
    }

    /// True iff a worker handle exists and the process has not exited.
    pub async fn running(&self) -> bool {
        self.lifecycle.lock().await.running()
    }

    pub async fn worker_pid(&self) -> Option<u32> {
        self.lifecycle.lock().await.pid()
    }

    /// Last stderr lines of the current worker.
    pub async fn stderr_tail(&self) -> Vec<String> {
        self.lifecycle.lock().await.stderr_tail()
    }
}

impl std::fmt::Debug for Multiplexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Multiplexer")
            .field("registry", &self.registry)
            .field("link", &self.current_link())
            .finish()
    }
}
