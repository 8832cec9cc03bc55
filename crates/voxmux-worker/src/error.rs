use std::path::PathBuf;

/// Errors that can occur while managing the worker process.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    /// A live worker is already attached to this manager.
    #[error("worker already running (pid {pid:?})")]
    AlreadyRunning { pid: Option<u32> },

    /// No worker handle exists.
    #[error("worker is not running")]
    NotRunning,

    /// The worker executable could not be launched.
    #[error("failed to spawn worker {program}: {source}")]
    Spawn {
        program: PathBuf,
        source: std::io::Error,
    },

    /// A standard stream of the child was not captured.
    #[error("worker {0} pipe was not captured")]
    MissingPipe(&'static str),

    /// An I/O error occurred while waiting on or signalling the worker.
    #[error("worker I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, WorkerError>;
