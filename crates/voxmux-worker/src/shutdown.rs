use std::process::ExitStatus;
use std::time::{Duration, Instant};

use tokio::process::Child;
use tracing::{debug, info, warn};

use crate::error::Result;

/// Phases of the two-step worker shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownPhase {
    /// Interrupt sent, waiting for the worker to exit on its own.
    Signaling,
    /// Grace period elapsed, the worker is being killed.
    Killing,
    /// The worker has exited and been reaped.
    Exited,
}

/// Which route the shutdown took.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownPath {
    /// The worker had already exited before `stop` was called.
    AlreadyExited,
    /// The worker exited after the interrupt.
    Graceful,
    /// The worker had to be killed.
    Forced,
}

/// Outcome of stopping the worker.
#[derive(Debug, Clone)]
pub struct ShutdownReport {
    /// Route the shutdown took.
    pub path: ShutdownPath,
    /// Exit status of the worker.
    pub status: ExitStatus,
    /// Time spent inside `stop`.
    pub elapsed: Duration,
    /// Last stderr lines the worker printed.
    pub stderr_tail: Vec<String>,
}

/// Drive `child` through `Signaling -> Killing -> Exited`.
pub(crate) async fn run(child: &mut Child, timeout: Duration) -> Result<(ShutdownPath, ExitStatus)> {
    let mut phase = ShutdownPhase::Signaling;
    let mut path = ShutdownPath::Graceful;
    let mut status = None;

    loop {
        phase = match phase {
            ShutdownPhase::Signaling => match child.id() {
                None => {
                    path = ShutdownPath::AlreadyExited;
                    status = Some(child.wait().await?);
                    ShutdownPhase::Exited
                }
                Some(pid) => match send_interrupt(pid) {
                    Ok(()) => {
                        debug!(pid, ?timeout, "interrupt sent to worker");
                        match tokio::time::timeout(timeout, child.wait()).await {
                            Ok(exit) => {
                                status = Some(exit?);
                                ShutdownPhase::Exited
                            }
                            Err(_) => {
                                warn!(pid, ?timeout, "worker ignored interrupt, killing");
                                ShutdownPhase::Killing
                            }
                        }
                    }
                    Err(err) => {
                        warn!(pid, error = %err, "failed to interrupt worker, killing");
                        ShutdownPhase::Killing
                    }
                },
            },
            ShutdownPhase::Killing => {
                path = ShutdownPath::Forced;
                if let Err(err) = child.start_kill() {
                    // The child may have exited between the timeout and the kill.
                    debug!(error = %err, "kill request failed");
                }
                status = Some(child.wait().await?);
                ShutdownPhase::Exited
            }
            ShutdownPhase::Exited => break,
        };
    }

    match status {
        Some(status) => Ok((path, status)),
        None => Ok((path, child.wait().await?)),
    }
}

/// Stop `child`, returning a report that includes elapsed time.
pub(crate) async fn stop_child(
    child: &mut Child,
    timeout: Duration,
    stderr_tail: Vec<String>,
) -> Result<ShutdownReport> {
    let started = Instant::now();
    let (path, status) = run(child, timeout).await?;
    let elapsed = started.elapsed();
    info!(?path, %status, ?elapsed, "worker stopped");
    Ok(ShutdownReport {
        path,
        status,
        elapsed,
        stderr_tail,
    })
}

#[cfg(unix)]
fn send_interrupt(pid: u32) -> std::io::Result<()> {
    let pid = libc::pid_t::try_from(pid)
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidInput, "pid out of range"))?;

    // SAFETY: `kill` has no memory-safety preconditions. `pid` is the id of a
    // child that has not been reaped yet, so it cannot name a recycled process.
    let rc = unsafe { libc::kill(pid, libc::SIGINT) };
    if rc == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

#[cfg(not(unix))]
fn send_interrupt(_pid: u32) -> std::io::Result<()> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "graceful interrupt requires Unix signals",
    ))
}
