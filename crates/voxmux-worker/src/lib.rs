//! Lifecycle management for the external voice worker process.
//!
//! The worker is a long-lived child process that performs all media work.
//! This crate only starts it, hands its stdin/stdout to the protocol layer,
//! forwards its stderr to the log, and stops it:
//! - graceful interrupt first (`SIGINT` on Unix)
//! - forced kill once the stop timeout elapses
//!
//! This is the lowest layer of voxmux. Everything else builds on the
//! [`WorkerIo`] pipes provided here.

pub mod config;
pub mod error;
pub mod io;
pub mod process;
pub mod shutdown;

pub use config::{WorkerConfig, DEFAULT_PORT, DEFAULT_PROGRAM, DEFAULT_STOP_TIMEOUT};
pub use error::{Result, WorkerError};
pub use io::{StderrTail, WorkerIo};
pub use process::{WorkerManager, WorkerProcess};
pub use shutdown::{ShutdownPath, ShutdownPhase, ShutdownReport};
