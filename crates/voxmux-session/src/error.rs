use std::time::Duration;

/// Boxed error returned by callbacks and signaling collaborators.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors that can occur in multiplexer operations.
#[derive(Debug, thiserror::Error)]
pub enum MuxError {
    /// Worker lifecycle error.
    #[error("worker error: {0}")]
    Worker(#[from] voxmux_worker::WorkerError),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] voxmux_frame::FrameError),

    /// The operation is not valid in the current state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// No session with this id is registered.
    #[error("unknown session: {0}")]
    UnknownSession(String),

    /// The worker exited before the request was answered.
    #[error("worker exited before responding")]
    WorkerDied,

    /// Request timed out.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// The media source cannot be streamed.
    #[error("invalid stream: {0}")]
    InvalidStream(String),

    /// An ack did not carry the expected fields.
    #[error("malformed ack: {0}")]
    MalformedAck(String),

    /// The signaling collaborator failed.
    #[error("signaling error: {0}")]
    Signaling(#[source] BoxError),
}

impl MuxError {
    /// True if the request failed because the worker went away.
    pub fn is_worker_died(&self) -> bool {
        matches!(self, Self::WorkerDied)
    }
}

pub type Result<T> = std::result::Result<T, MuxError>;
