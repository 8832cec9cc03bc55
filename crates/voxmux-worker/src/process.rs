use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::WorkerConfig;
use crate::error::{Result, WorkerError};
use crate::io::{drain_stderr, StderrTail, WorkerIo};
use crate::shutdown::{stop_child, ShutdownReport};

/// Upper bound on waiting for the stderr forwarder after the worker exits.
const STDERR_DRAIN_GRACE: Duration = Duration::from_millis(250);

/// A spawned worker child.
///
/// The child is killed if this handle is dropped while it is still alive.
pub struct WorkerProcess {
    child: Child,
    pid: Option<u32>,
    program: PathBuf,
    started_at: Instant,
    stderr_tail: StderrTail,
    stderr_task: Option<JoinHandle<()>>,
}

impl WorkerProcess {
    /// Launch the worker described by `config`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn(config: &WorkerConfig) -> Result<(Self, WorkerIo)> {
        let mut command = Command::new(&config.program);
        command
            .args(config.launch_args())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &config.working_dir {
            command.current_dir(dir);
        }

        let mut child = command.spawn().map_err(|source| WorkerError::Spawn {
            program: config.program.clone(),
            source,
        })?;

        let stdin = child.stdin.take().ok_or(WorkerError::MissingPipe("stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or(WorkerError::MissingPipe("stdout"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or(WorkerError::MissingPipe("stderr"))?;

        let pid = child.id();
        let stderr_tail = StderrTail::new(config.stderr_tail_lines);
        let stderr_task = tokio::spawn(drain_stderr(stderr, pid, stderr_tail.clone()));

        Ok((
            Self {
                child,
                pid,
                program: config.program.clone(),
                started_at: Instant::now(),
                stderr_tail,
                stderr_task: Some(stderr_task),
            },
            WorkerIo { stdin, stdout },
        ))
    }

    /// OS process id assigned at spawn time.
    pub fn id(&self) -> Option<u32> {
        self.pid
    }

    /// Executable the worker was launched from.
    pub fn program(&self) -> &PathBuf {
        &self.program
    }

    /// Time since the worker was spawned.
    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Last stderr lines the worker printed.
    pub fn stderr_tail(&self) -> Vec<String> {
        self.stderr_tail.snapshot()
    }

    /// True while the child has not exited.
    pub fn is_alive(&mut self) -> bool {
        match self.child.try_wait() {
            Ok(None) => true,
            Ok(Some(status)) => {
                debug!(pid = ?self.pid, %status, "worker has exited");
                false
            }
            Err(err) => {
                warn!(pid = ?self.pid, error = %err, "failed to poll worker status");
                false
            }
        }
    }

    /// Interrupt, wait up to `timeout`, then kill.
    pub async fn shutdown(mut self, timeout: Duration) -> Result<ShutdownReport> {
        let outcome = stop_child(&mut self.child, timeout, Vec::new()).await;

        if let Some(mut task) = self.stderr_task.take() {
            if tokio::time::timeout(STDERR_DRAIN_GRACE, &mut task)
                .await
                .is_err()
            {
                debug!(pid = ?self.pid, "stderr still open after exit, detaching");
                task.abort();
            }
        }

        let mut report = outcome?;
        report.stderr_tail = self.stderr_tail.snapshot();
        Ok(report)
    }
}

impl std::fmt::Debug for WorkerProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerProcess")
            .field("pid", &self.pid)
            .field("program", &self.program)
            .finish()
    }
}

/// Owns at most one worker handle.
///
/// `start` refuses to replace a live worker, `stop` refuses when no handle
/// exists, and `stop` always clears the handle regardless of outcome.
#[derive(Debug, Default)]
pub struct WorkerManager {
    handle: Option<WorkerProcess>,
}

impl WorkerManager {
    /// Create a manager with no worker attached.
    pub fn new() -> Self {
        Self::default()
    }

    /// Launch a worker and return its protocol pipes.
    pub fn start(&mut self, config: &WorkerConfig) -> Result<WorkerIo> {
        if let Some(handle) = self.handle.as_mut() {
            if handle.is_alive() {
                return Err(WorkerError::AlreadyRunning { pid: handle.id() });
            }
            debug!(pid = ?handle.id(), "replacing exited worker handle");
        }
        self.handle = None;

        let (process, io) = WorkerProcess::spawn(config)?;
        info!(
            pid = ?process.id(),
            program = %config.program.display(),
            port = config.port,
            "worker started"
        );
        self.handle = Some(process);
        Ok(io)
    }

    /// Stop the worker: interrupt, wait up to `timeout`, then kill.
    pub async fn stop(&mut self, timeout: Duration) -> Result<ShutdownReport> {
        let process = self.handle.take().ok_or(WorkerError::NotRunning)?;
        process.shutdown(timeout).await
    }

    /// True iff a handle exists and the process has not exited.
    pub fn running(&mut self) -> bool {
        self.handle.as_mut().is_some_and(WorkerProcess::is_alive)
    }

    /// Whether a handle exists at all, alive or not.
    pub fn has_handle(&self) -> bool {
        self.handle.is_some()
    }

    /// Process id of the attached worker.
    pub fn pid(&self) -> Option<u32> {
        self.handle.as_ref().and_then(WorkerProcess::id)
    }

    /// Last stderr lines of the attached worker.
    pub fn stderr_tail(&self) -> Vec<String> {
        self.handle
            .as_ref()
            .map(WorkerProcess::stderr_tail)
            .unwrap_or_default()
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::time::Duration;

    use tokio::io::{AsyncBufReadExt, BufReader};

    use super::*;
    use crate::shutdown::ShutdownPath;

    fn sh(script: &str) -> WorkerConfig {
        WorkerConfig::new("sh").with_args(["-c", script])
    }

    async fn wait_until_exited(manager: &mut WorkerManager) {
        for _ in 0..200 {
            if !manager.running() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("worker did not exit");
    }

    #[tokio::test]
    async fn start_then_stop_gracefully() {
        let mut manager = WorkerManager::new();
        let _io = manager.start(&sh("exec cat")).unwrap();
        assert!(manager.running());
        assert!(manager.pid().is_some());

        let report = manager.stop(Duration::from_secs(5)).await.unwrap();
        assert_eq!(report.path, ShutdownPath::Graceful);
        assert!(!manager.running());
        assert!(!manager.has_handle());
    }

    #[tokio::test]
    async fn start_twice_is_rejected() {
        let mut manager = WorkerManager::new();
        let _io = manager.start(&sh("exec cat")).unwrap();

        let err = manager.start(&sh("exec cat")).unwrap_err();
        assert!(matches!(err, WorkerError::AlreadyRunning { pid: Some(_) }));

        manager.stop(Duration::from_secs(5)).await.unwrap();
    }

    #[tokio::test]
    async fn stop_without_worker_is_rejected() {
        let mut manager = WorkerManager::new();
        let err = manager.stop(Duration::from_millis(10)).await.unwrap_err();
        assert!(matches!(err, WorkerError::NotRunning));
    }

    #[tokio::test]
    async fn stop_escalates_to_kill_after_timeout() {
        let mut manager = WorkerManager::new();
        let _io = manager
            .start(&sh("trap '' INT; exec sleep 30"))
            .unwrap();

        let report = manager.stop(Duration::from_millis(200)).await.unwrap();
        assert_eq!(report.path, ShutdownPath::Forced);
        assert!(report.elapsed < Duration::from_secs(10));
        assert!(!manager.has_handle());
    }

    #[tokio::test]
    async fn stop_after_worker_exited_on_its_own() {
        let mut manager = WorkerManager::new();
        let _io = manager.start(&sh("exit 3")).unwrap();
        wait_until_exited(&mut manager).await;

        assert!(manager.has_handle());
        let report = manager.stop(Duration::from_secs(1)).await.unwrap();
        assert_eq!(report.path, ShutdownPath::AlreadyExited);
        assert_eq!(report.status.code(), Some(3));
    }

    #[tokio::test]
    async fn exited_worker_can_be_replaced() {
        let mut manager = WorkerManager::new();
        let _io = manager.start(&sh("exit 0")).unwrap();
        wait_until_exited(&mut manager).await;

        let _io = manager.start(&sh("exec cat")).unwrap();
        assert!(manager.running());
        manager.stop(Duration::from_secs(5)).await.unwrap();
    }

    #[tokio::test]
    async fn settings_are_passed_on_the_command_line() {
        let mut manager = WorkerManager::new();
        let cfg = sh("echo \"$0 $1\"; exec cat")
            .with_port(7001)
            .with_log_mode("debug");
        let io = manager.start(&cfg).unwrap();

        let mut lines = BufReader::new(io.stdout).lines();
        let line = lines.next_line().await.unwrap().unwrap();
        assert_eq!(line, "port=7001 log_mode=debug");

        manager.stop(Duration::from_secs(5)).await.unwrap();
    }

    #[tokio::test]
    async fn stderr_is_retained_for_diagnostics() {
        let mut manager = WorkerManager::new();
        let _io = manager.start(&sh("echo boom >&2; exec cat")).unwrap();

        for _ in 0..200 {
            if !manager.stderr_tail().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let report = manager.stop(Duration::from_secs(5)).await.unwrap();
        assert_eq!(report.stderr_tail, vec!["boom"]);
    }

    #[tokio::test]
    async fn spawn_failure_reports_program() {
        let mut manager = WorkerManager::new();
        let err = manager
            .start(&WorkerConfig::new("/nonexistent/voxmux-worker"))
            .unwrap_err();
        assert!(matches!(err, WorkerError::Spawn { .. }));
        assert!(!manager.has_handle());
    }
}
