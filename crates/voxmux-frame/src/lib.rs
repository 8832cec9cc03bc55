//! Newline-delimited JSON framing for the voxmux worker protocol.
//!
//! Every message is one UTF-8 JSON object terminated by `\n`:
//! - host to worker: a [`Request`] stamped with `pid` and `sid`
//! - worker to host: a [`Packet`] carrying `sid`, `pid` and a `_` type tag
//!
//! Oversized lines are skipped without losing stream synchronization, so a
//! single bad line never takes the channel down.

pub mod codec;
pub mod error;
pub mod packet;
pub mod reader;
pub mod writer;

pub use codec::{decode_line, encode_line, FrameConfig, Line, LineCodec, DEFAULT_MAX_LINE};
pub use error::{FrameError, Result};
pub use packet::{
    Packet, PacketKind, Request, FIELD_EVENT, FIELD_KIND, FIELD_PID, FIELD_SID, FIELD_STATUS,
    KIND_ACK, KIND_EVENT, KIND_STATUS,
};
pub use reader::LineReader;
pub use writer::LineWriter;
