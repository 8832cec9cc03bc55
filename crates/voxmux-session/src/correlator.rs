use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde_json::{Map, Value};
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::error::{MuxError, Result};

/// Body of an `ack` packet with the envelope removed.
pub type AckBody = Map<String, Value>;

type Completion = oneshot::Sender<Result<AckBody>>;

/// Outcome of routing an ack to the pending table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// A waiting request was completed.
    Resolved,
    /// No request was waiting on this pid.
    Unmatched,
}

#[derive(Debug, Default)]
struct State {
    next_pid: u64,
    pending: HashMap<u64, Completion>,
    closed: bool,
}

/// Maps packet ids to waiting requests for one worker lifetime.
///
/// Ids start at 0 and are never reused. Once [`fail_all`](Self::fail_all)
/// has run, the correlator is closed and refuses new registrations.
#[derive(Debug, Default)]
pub struct Correlator {
    state: Mutex<State>,
}

impl Correlator {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Allocate the next pid and register a completion for it.
    ///
    /// Dropping the returned [`Pending`] before it settles removes the entry.
    pub fn register(&self) -> Result<Pending<'_>> {
        let mut state = self.lock();
        if state.closed {
            return Err(MuxError::WorkerDied);
        }
        let pid = state.next_pid;
        state.next_pid += 1;

        let (tx, rx) = oneshot::channel();
        state.pending.insert(pid, tx);
        Ok(Pending {
            pid,
            rx,
            correlator: self,
            settled: false,
        })
    }

    /// The pid the next registration will receive.
    pub fn peek_next_id(&self) -> u64 {
        self.lock().next_pid
    }

    /// Complete the request waiting on `pid` with `body`.
    pub fn resolve(&self, pid: u64, body: AckBody) -> Resolution {
        let (completion, issued) = {
            let mut state = self.lock();
            (state.pending.remove(&pid), pid < state.next_pid)
        };

        match completion {
            Some(tx) => {
                if tx.send(Ok(body)).is_err() {
                    debug!(pid, "ack arrived after the requester went away");
                }
                Resolution::Resolved
            }
            None if issued => {
                warn!(pid, "duplicate or late ack, ignoring");
                Resolution::Unmatched
            }
            None => {
                warn!(pid, "ack for a pid that was never issued, ignoring");
                Resolution::Unmatched
            }
        }
    }

    /// Remove a pending entry without completing it.
    pub fn abandon(&self, pid: u64) -> bool {
        let removed = self.lock().pending.remove(&pid).is_some();
        if removed {
            debug!(pid, "request abandoned");
        }
        removed
    }

    /// Fail every outstanding request with `WorkerDied` and close.
    ///
    /// Returns the number of requests that were failed.
    pub fn fail_all(&self) -> usize {
        let drained: Vec<_> = {
            let mut state = self.lock();
            state.closed = true;
            state.pending.drain().collect()
        };

        let count = drained.len();
        for (pid, tx) in drained {
            if tx.send(Err(MuxError::WorkerDied)).is_err() {
                debug!(pid, "requester already gone");
            }
        }
        count
    }

    /// Number of requests waiting for an ack.
    pub fn pending_count(&self) -> usize {
        self.lock().pending.len()
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}

/// A registered request awaiting its ack.
#[derive(Debug)]
pub struct Pending<'a> {
    pid: u64,
    rx: oneshot::Receiver<Result<AckBody>>,
    correlator: &'a Correlator,
    settled: bool,
}

impl Pending<'_> {
    pub fn pid(&self) -> u64 {
        self.pid
    }

    /// Wait for the ack or for the worker to go away.
    pub async fn wait(mut self) -> Result<AckBody> {
        let outcome = (&mut self.rx).await;
        self.settled = true;
        match outcome {
            Ok(result) => result,
            Err(_) => Err(MuxError::WorkerDied),
        }
    }
}

impl Drop for Pending<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.correlator.abandon(self.pid);
        }
    }
}
