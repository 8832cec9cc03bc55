//! Session multiplexing over a voxmux worker process.
//!
//! [`Multiplexer`] owns the worker lifecycle and routes its output:
//! acks complete pending requests by `pid`, status packets update the
//! session registry, and events are fanned out to session callbacks.
//! [`GroupCall`] layers the call-control commands on top.

pub mod cache;
pub mod control;
pub mod correlator;
mod dispatch;
pub mod error;
pub mod group_call;
mod link;
pub mod multiplexer;
pub mod registry;

pub use cache::{CacheEntry, TimedCache};
pub use control::{
    CallCommand, Fingerprint, JoinParams, SignalingParams, DEFAULT_LEAVE_REASON, MAX_BITRATE,
    MAX_VOLUME,
};
pub use correlator::{AckBody, Correlator, Pending, Resolution};
pub use error::{BoxError, MuxError, Result};
pub use group_call::{CallEnded, GroupCall, GroupCallConfig, Signaling, DEFAULT_CACHE_TTL};
pub use multiplexer::{Multiplexer, MuxConfig};
pub use registry::{
    callback, Callback, CallbackFuture, CallbackId, CallbackResult, Event, Registry,
    SessionStatus, StatusChange, UnknownStatus, STATUS_CHANGE_CAPACITY, UNKNOWN_STATE,
};
