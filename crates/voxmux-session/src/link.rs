use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use voxmux_frame::{FrameConfig, FrameError, LineReader, LineWriter, Request};

use crate::correlator::{AckBody, Correlator};
use crate::dispatch;
use crate::error::{MuxError, Result};
use crate::registry::Registry;

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// The protocol channel of one worker lifetime.
///
/// Owns the request writer, the pending table and the dispatch task, so a
/// restarted worker always starts from a fresh pid sequence.
pub(crate) struct Link {
    writer: tokio::sync::Mutex<LineWriter<BoxedWriter>>,
    correlator: Arc<Correlator>,
    dispatch: Mutex<Option<JoinHandle<()>>>,
}

impl Link {
    /// Wrap the worker pipes and start the dispatch loop.
    pub(crate) fn open<R, W>(
        reader: R,
        writer: W,
        registry: Arc<Registry>,
        config: &FrameConfig,
    ) -> Arc<Self>
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let correlator = Arc::new(Correlator::new());
        let dispatch = tokio::spawn(dispatch::run(
            LineReader::with_config(reader, config.clone()),
            Arc::clone(&correlator),
            registry,
        ));
        let writer: BoxedWriter = Box::new(writer);

        Arc::new(Self {
            writer: tokio::sync::Mutex::new(LineWriter::with_config(writer, config.clone())),
            correlator,
            dispatch: Mutex::new(Some(dispatch)),
        })
    }

    /// False once the worker's output has closed.
    pub(crate) fn is_open(&self) -> bool {
        !self.correlator.is_closed()
    }

    pub(crate) fn pending_count(&self) -> usize {
        self.correlator.pending_count()
    }

    /// Stamp, write and await the ack for one request.
    ///
    /// The pid is allocated under the writer lock, so pids reach the worker
    /// in increasing order. `timeout` bounds the wait for the ack only. If the
    /// caller drops this future mid-write, the writer completes the partial
    /// line before the next request goes out.
    pub(crate) async fn request(
        &self,
        sid: &str,
        payload: Value,
        timeout: Option<Duration>,
    ) -> Result<AckBody> {
        let pending = {
            let mut writer = self.writer.lock().await;
            let pending = self.correlator.register()?;
            let request = Request::new(pending.pid(), sid, payload)?;
            writer.send_json(&request).await.map_err(|err| match err {
                FrameError::ConnectionClosed => MuxError::WorkerDied,
                other => MuxError::Frame(other),
            })?;
            debug!(sid, pid = pending.pid(), "request sent");
            pending
        };

        let pid = pending.pid();
        match timeout {
            Some(limit) => match tokio::time::timeout(limit, pending.wait()).await {
                Ok(result) => result,
                Err(_) => {
                    debug!(sid, pid, ?limit, "request timed out");
                    Err(MuxError::Timeout(limit))
                }
            },
            None => pending.wait().await,
        }
    }

    /// Wait up to `grace` for the dispatch loop to drain, then abort it.
    pub(crate) async fn join(&self, grace: Duration) {
        let handle = self
            .dispatch
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(mut handle) = handle else {
            return;
        };
        if tokio::time::timeout(grace, &mut handle).await.is_err() {
            warn!(?grace, "dispatch loop still running after worker stop, aborting");
            handle.abort();
            self.correlator.fail_all();
        }
    }
}

impl std::fmt::Debug for Link {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Link")
            .field("open", &self.is_open())
            .field("pending", &self.pending_count())
            .finish()
    }
}
