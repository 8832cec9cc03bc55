/// Errors that can occur while framing or decoding protocol lines.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The line exceeds the configured maximum length.
    #[error("line too long ({size} bytes, max {max})")]
    LineTooLong { size: usize, max: usize },

    /// The payload contains a raw newline and cannot be framed.
    #[error("payload contains an embedded newline")]
    EmbeddedDelimiter,

    /// An I/O error occurred while reading or writing lines.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The peer closed its end of the channel.
    #[error("connection closed")]
    ConnectionClosed,

    /// The line is not valid JSON.
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// The line is JSON but not an object.
    #[error("message is not a JSON object")]
    NotAnObject,

    /// A required packet field is absent.
    #[error("missing required field `{0}`")]
    MissingField(&'static str),

    /// A packet field has the wrong JSON type.
    #[error("field `{field}` must be {expected}")]
    InvalidField {
        field: &'static str,
        expected: &'static str,
    },
}

pub type Result<T> = std::result::Result<T, FrameError>;
