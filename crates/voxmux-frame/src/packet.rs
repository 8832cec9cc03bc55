//! Protocol messages exchanged with the worker.
//!
//! Inbound packets carry three envelope fields, everything else is body:
//!
//! ```text
//! {"sid":"s1","pid":0,"_":"ack","ok":true}
//! {"sid":"s1","pid":0,"_":"status","status":"active-playing"}
//! {"sid":"s1","pid":3,"_":"event","event":"stream_changed"}
//! ```

use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{FrameError, Result};

/// Session id envelope field.
pub const FIELD_SID: &str = "sid";

/// Packet id envelope field.
pub const FIELD_PID: &str = "pid";

/// Packet type envelope field.
pub const FIELD_KIND: &str = "_";

/// Body field of a `status` packet.
pub const FIELD_STATUS: &str = "status";

/// Body field naming the event of an `event` packet.
pub const FIELD_EVENT: &str = "event";

pub const KIND_ACK: &str = "ack";
pub const KIND_STATUS: &str = "status";
pub const KIND_EVENT: &str = "event";

/// The `_` tag of an inbound packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PacketKind {
    /// Response to a request, correlated by `pid`.
    Ack,
    /// Session status change.
    Status,
    /// Asynchronous notification for a session.
    Event,
    /// A tag this host does not understand.
    Other(String),
}

impl PacketKind {
    pub fn parse(tag: &str) -> Self {
        match tag {
            KIND_ACK => Self::Ack,
            KIND_STATUS => Self::Status,
            KIND_EVENT => Self::Event,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Ack => KIND_ACK,
            Self::Status => KIND_STATUS,
            Self::Event => KIND_EVENT,
            Self::Other(tag) => tag,
        }
    }
}

impl std::fmt::Display for PacketKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A decoded worker-to-host packet.
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    pub sid: String,
    pub pid: u64,
    pub kind: PacketKind,
    /// All fields except the envelope.
    pub body: Map<String, Value>,
}

impl Packet {
    /// Decode one line into a packet, validating the envelope.
    pub fn parse(line: &[u8]) -> Result<Self> {
        let mut body = into_object(serde_json::from_slice(line)?)?;
        let sid = take_string(&mut body, FIELD_SID)?;
        let pid = take_pid(&mut body)?;
        let kind = PacketKind::parse(&take_string(&mut body, FIELD_KIND)?);
        Ok(Self {
            sid,
            pid,
            kind,
            body,
        })
    }

    /// Build an `ack` packet.
    pub fn ack(sid: impl Into<String>, pid: u64, body: Map<String, Value>) -> Self {
        Self {
            sid: sid.into(),
            pid,
            kind: PacketKind::Ack,
            body,
        }
    }

    /// Build a `status` packet.
    pub fn status(sid: impl Into<String>, pid: u64, status: &str) -> Self {
        let mut body = Map::new();
        body.insert(FIELD_STATUS.to_string(), Value::from(status));
        Self {
            sid: sid.into(),
            pid,
            kind: PacketKind::Status,
            body,
        }
    }

    /// Build an `event` packet; `payload` fields are merged into the body.
    pub fn event(
        sid: impl Into<String>,
        pid: u64,
        event: &str,
        payload: Map<String, Value>,
    ) -> Self {
        let mut body = payload;
        body.insert(FIELD_EVENT.to_string(), Value::from(event));
        Self {
            sid: sid.into(),
            pid,
            kind: PacketKind::Event,
            body,
        }
    }

    /// The `status` field of a status packet.
    pub fn status_value(&self) -> Option<&str> {
        self.body.get(FIELD_STATUS).and_then(Value::as_str)
    }

    /// The `event` field of an event packet.
    pub fn event_name(&self) -> Option<&str> {
        self.body.get(FIELD_EVENT).and_then(Value::as_str)
    }

    pub fn to_vec(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

impl Serialize for Packet {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        #[derive(Serialize)]
        struct Wire<'a> {
            sid: &'a str,
            pid: u64,
            #[serde(rename = "_")]
            kind: &'a str,
            #[serde(flatten)]
            body: &'a Map<String, Value>,
        }

        Wire {
            sid: &self.sid,
            pid: self.pid,
            kind: self.kind.as_str(),
            body: &self.body,
        }
        .serialize(serializer)
    }
}

/// A host-to-worker request: a command object stamped with `pid` and `sid`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Request {
    pub pid: u64,
    pub sid: String,
    #[serde(flatten)]
    pub body: Map<String, Value>,
}

impl Request {
    /// Stamp `payload` for `sid`.
    ///
    /// The payload must be a JSON object; any `pid`/`sid` keys it already
    /// carries are replaced by the stamp.
    pub fn new(pid: u64, sid: impl Into<String>, payload: Value) -> Result<Self> {
        let mut body = into_object(payload)?;
        body.shift_remove(FIELD_PID);
        body.shift_remove(FIELD_SID);
        Ok(Self {
            pid,
            sid: sid.into(),
            body,
        })
    }

    /// Decode a request line, as the worker side does.
    pub fn parse(line: &[u8]) -> Result<Self> {
        let mut body = into_object(serde_json::from_slice(line)?)?;
        let pid = take_pid(&mut body)?;
        let sid = take_string(&mut body, FIELD_SID)?;
        Ok(Self { pid, sid, body })
    }

    pub fn to_vec(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

fn into_object(value: Value) -> Result<Map<String, Value>> {
    match value {
        Value::Object(map) => Ok(map),
        _ => Err(FrameError::NotAnObject),
    }
}

fn take_string(body: &mut Map<String, Value>, field: &'static str) -> Result<String> {
    match body.shift_remove(field) {
        Some(Value::String(value)) => Ok(value),
        Some(_) => Err(FrameError::InvalidField {
            field,
            expected: "a string",
        }),
        None => Err(FrameError::MissingField(field)),
    }
}

fn take_pid(body: &mut Map<String, Value>) -> Result<u64> {
    match body.shift_remove(FIELD_PID) {
        Some(value) => value.as_u64().ok_or(FrameError::InvalidField {
            field: FIELD_PID,
            expected: "a non-negative integer",
        }),
        None => Err(FrameError::MissingField(FIELD_PID)),
    }
}
