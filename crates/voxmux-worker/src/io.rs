use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{ChildStderr, ChildStdin, ChildStdout};
use tracing::debug;

/// The protocol channel of a running worker.
///
/// Requests are written to `stdin`, responses and notifications are read
/// from `stdout`. Stderr is never part of the protocol.
pub struct WorkerIo {
    /// Worker input (host to worker).
    pub stdin: ChildStdin,
    /// Worker output (worker to host).
    pub stdout: ChildStdout,
}

impl WorkerIo {
    /// Split into `(reader, writer)` halves.
    pub fn into_split(self) -> (ChildStdout, ChildStdin) {
        (self.stdout, self.stdin)
    }
}

impl std::fmt::Debug for WorkerIo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerIo").field("type", &"stdio").finish()
    }
}

/// Bounded ring of the most recent worker stderr lines.
#[derive(Debug, Clone)]
pub struct StderrTail {
    lines: Arc<Mutex<VecDeque<String>>>,
    capacity: usize,
}

impl StderrTail {
    /// Create a ring that keeps at most `capacity` lines.
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: Arc::new(Mutex::new(VecDeque::with_capacity(capacity.min(1024)))),
            capacity,
        }
    }

    /// Append a line, evicting the oldest when full.
    pub fn push(&self, line: String) {
        if self.capacity == 0 {
            return;
        }
        let mut lines = self.lines.lock().unwrap_or_else(PoisonError::into_inner);
        if lines.len() == self.capacity {
            lines.pop_front();
        }
        lines.push_back(line);
    }

    /// Snapshot of the retained lines, oldest first.
    pub fn snapshot(&self) -> Vec<String> {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }
}

/// Forward every stderr line to the log and into `tail` until EOF.
pub(crate) async fn drain_stderr(stderr: ChildStderr, pid: Option<u32>, tail: StderrTail) {
    let mut lines = BufReader::new(stderr).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                debug!(target: "voxmux_worker::stderr", pid = ?pid, "{line}");
                tail.push(line);
            }
            Ok(None) => break,
            Err(err) => {
                debug!(pid = ?pid, error = %err, "worker stderr read failed");
                break;
            }
        }
    }
}
