//! Multiplex voice-call sessions over a single worker subprocess.
//!
//! voxmux keeps one long-lived media worker per host, talks to it with
//! newline-delimited JSON over its stdin/stdout, and routes acks, status
//! updates and events back to the session that caused them.
//!
//! # Crate Structure
//!
//! - [`worker`]: worker process lifecycle (spawn, graceful stop, forced kill)
//! - [`frame`]: line framing and the request/packet wire types
//! - [`session`]: session registry, request correlation, dispatch and call control

/// Re-export worker lifecycle types.
pub mod worker {
    pub use voxmux_worker::*;
}

/// Re-export framing types.
pub mod frame {
    pub use voxmux_frame::*;
}

/// Re-export session types.
pub mod session {
    pub use voxmux_session::*;
}

pub use voxmux_session::{GroupCall, Multiplexer, MuxConfig, MuxError};
pub use voxmux_worker::WorkerConfig;
