use std::fmt;
use std::io;

use voxmux_frame::FrameError;
use voxmux_session::MuxError;
use voxmux_worker::WorkerError;

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const WORKER_ERROR: i32 = 3;
pub const HEALTH_CHECK_FAILED: i32 = 30;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::NotFound | io::ErrorKind::BrokenPipe => FAILURE,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn worker_error(context: &str, err: WorkerError) -> CliError {
    match err {
        WorkerError::Spawn { program, source } => io_error(
            &format!("{context}: cannot launch {}", program.display()),
            source,
        ),
        WorkerError::Io(source) => io_error(context, source),
        other => CliError::new(WORKER_ERROR, format!("{context}: {other}")),
    }
}

pub fn frame_error(context: &str, err: FrameError) -> CliError {
    match err {
        FrameError::Io(source) => io_error(context, source),
        FrameError::ConnectionClosed => CliError::new(FAILURE, format!("{context}: {err}")),
        other => CliError::new(DATA_INVALID, format!("{context}: {other}")),
    }
}

pub fn mux_error(context: &str, err: MuxError) -> CliError {
    match err {
        MuxError::Worker(err) => worker_error(context, err),
        MuxError::Frame(err) => frame_error(context, err),
        MuxError::Timeout(_) => CliError::new(TIMEOUT, format!("{context}: {err}")),
        MuxError::WorkerDied | MuxError::InvalidState(_) => {
            CliError::new(WORKER_ERROR, format!("{context}: {err}"))
        }
        MuxError::UnknownSession(_) | MuxError::InvalidStream(_) => {
            CliError::new(USAGE, format!("{context}: {err}"))
        }
        MuxError::Json(_) | MuxError::MalformedAck(_) => {
            CliError::new(DATA_INVALID, format!("{context}: {err}"))
        }
        MuxError::Signaling(_) => CliError::new(FAILURE, format!("{context}: {err}")),
    }
}
