use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{MuxError, Result};

/// Upper bound for the stream bitrate.
pub const MAX_BITRATE: u32 = 48_000;

/// Upper bound for the participant volume.
pub const MAX_VOLUME: u16 = 200;

/// Default reason sent with `leave_call`.
pub const DEFAULT_LEAVE_REASON: &str = "requested";

/// Commands understood by the worker, tagged by `action`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum CallCommand {
    JoinCall {
        chat_id: i64,
        file_path: String,
        invite_hash: Option<String>,
        bitrate: u32,
    },
    LeaveCall {
        chat_id: i64,
        #[serde(rename = "type")]
        reason: String,
    },
    Pause {
        chat_id: i64,
    },
    Resume {
        chat_id: i64,
    },
    ChangeStream {
        chat_id: i64,
        file_path: String,
    },
}

impl CallCommand {
    /// Value of the `action` tag.
    pub fn action(&self) -> &'static str {
        match self {
            Self::JoinCall { .. } => "join_call",
            Self::LeaveCall { .. } => "leave_call",
            Self::Pause { .. } => "pause",
            Self::Resume { .. } => "resume",
            Self::ChangeStream { .. } => "change_stream",
        }
    }

    pub fn chat_id(&self) -> i64 {
        match self {
            Self::JoinCall { chat_id, .. }
            | Self::LeaveCall { chat_id, .. }
            | Self::Pause { chat_id }
            | Self::Resume { chat_id }
            | Self::ChangeStream { chat_id, .. } => *chat_id,
        }
    }

    /// The command as a request payload.
    pub fn to_payload(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }
}

/// Transport parameters returned in the `join_call` ack.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JoinParams {
    /// ICE username fragment. Some workers spell it `urfrag`.
    #[serde(alias = "urfrag")]
    pub ufrag: String,
    pub pwd: String,
    pub hash: String,
    pub setup: String,
    pub fingerprint: String,
    /// Audio SSRC.
    pub source: i64,
}

impl JoinParams {
    /// Extract the parameters from an ack body.
    pub fn from_ack(body: &Map<String, Value>) -> Result<Self> {
        serde_json::from_value(Value::Object(body.clone()))
            .map_err(|err| MuxError::MalformedAck(format!("join_call: {err}")))
    }

    /// Shape expected by the signaling layer.
    pub fn to_signaling(&self) -> SignalingParams {
        SignalingParams {
            ufrag: self.ufrag.clone(),
            pwd: self.pwd.clone(),
            fingerprints: vec![Fingerprint {
                hash: self.hash.clone(),
                setup: self.setup.clone(),
                fingerprint: self.fingerprint.clone(),
            }],
            ssrc: self.source,
        }
    }
}

/// Join parameters as handed to the signaling layer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SignalingParams {
    pub ufrag: String,
    pub pwd: String,
    pub fingerprints: Vec<Fingerprint>,
    pub ssrc: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Fingerprint {
    pub hash: String,
    pub setup: String,
    pub fingerprint: String,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn join_call_wire_shape() {
        let command = CallCommand::JoinCall {
            chat_id: -100,
            file_path: "/tmp/a.raw".to_string(),
            invite_hash: None,
            bitrate: 48_000,
        };
        assert_eq!(
            command.to_payload().unwrap(),
            json!({
                "action": "join_call",
                "chat_id": -100,
                "file_path": "/tmp/a.raw",
                "invite_hash": null,
                "bitrate": 48000,
            })
        );
        assert_eq!(command.action(), "join_call");
        assert_eq!(command.chat_id(), -100);
    }

    #[test]
    fn leave_call_uses_type_field() {
        let command = CallCommand::LeaveCall {
            chat_id: 7,
            reason: DEFAULT_LEAVE_REASON.to_string(),
        };
        assert_eq!(
            command.to_payload().unwrap(),
            json!({"action": "leave_call", "chat_id": 7, "type": "requested"})
        );
    }

    #[test]
    fn commands_parse_from_worker_side() {
        let command: CallCommand =
            serde_json::from_value(json!({"action": "change_stream", "chat_id": 1, "file_path": "b.raw"}))
                .unwrap();
        assert_eq!(
            command,
            CallCommand::ChangeStream {
                chat_id: 1,
                file_path: "b.raw".to_string()
            }
        );
        assert_eq!(
            serde_json::from_value::<CallCommand>(json!({"action": "pause", "chat_id": 1})).unwrap(),
            CallCommand::Pause { chat_id: 1 }
        );
    }

    #[test]
    fn join_params_accept_misspelled_ufrag() {
        let ack = object(json!({
            "urfrag": "abcd",
            "pwd": "secret",
            "hash": "sha-256",
            "setup": "active",
            "fingerprint": "AA:BB",
            "source": 12345,
            "ok": true,
        }));
        let params = JoinParams::from_ack(&ack).unwrap();
        assert_eq!(params.ufrag, "abcd");

        let wire = serde_json::to_value(params.to_signaling()).unwrap();
        assert_eq!(
            wire,
            json!({
                "ufrag": "abcd",
                "pwd": "secret",
                "fingerprints": [{"hash": "sha-256", "setup": "active", "fingerprint": "AA:BB"}],
                "ssrc": 12345,
            })
        );
    }

    #[test]
    fn join_params_missing_fields_is_malformed() {
        let err = JoinParams::from_ack(&object(json!({"ok": true}))).unwrap_err();
        assert!(matches!(err, MuxError::MalformedAck(_)));
    }
}
