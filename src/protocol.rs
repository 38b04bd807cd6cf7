//! Sync wire protocol.
//!
//! This module owns **every message that crosses the network boundary**
//! between a sync client and the operation log server.  Messages are JSON
//! objects tagged by `type`; on the TCP front end each one is a single line.
//!
//! ## Client → server
//!
//! | `type`          | Fields          | Reply                          |
//! |-----------------|-----------------|--------------------------------|
//! | `submit`        | message         | `submitted`                    |
//! | `full_sync`     | *(none)*        | `full_sync`                    |
//! | `missing_range` | from, to        | `operations` (`from <= seq < to`) |
//! | `stats`         | *(none)*        | `stats`                        |
//! | `reconnect`     | client_id?      | `welcome`                      |
//!
//! ## Server → client
//!
//! | `type`       | Fields                            |
//! |--------------|-----------------------------------|
//! | `submitted`  | seq_num                           |
//! | `full_sync`  | snapshot, head_seq, digest        |
//! | `operations` | operations                        |
//! | `stats`      | log_size, head_seq, sessions, entities |
//! | `welcome`    | client_id, resumed, avatar_id     |
//! | `operation`  | operation (unsolicited push)      |
//! | `error`      | message                           |

use crate::error::ProtocolError;
use crate::identity::ClientId;
use crate::message::{Operation, SceneMessage};
use crate::state::SceneState;
use crate::types::{EntityId, LogStats};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientRequest {
    Submit { message: SceneMessage },
    FullSync,
    MissingRange { from: u64, to: u64 },
    Stats,
    /// First message on every connection.  `client_id` is the persisted
    /// identity, if the client has one.
    Reconnect {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        client_id: Option<ClientId>,
    },
}

impl ClientRequest {
    pub fn decode(line: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(line)?)
    }
}

// ---------------------------------------------------------------------------
// Replies and pushes
// ---------------------------------------------------------------------------

/// Authoritative snapshot.  `digest` is [`SceneState::digest`] of `snapshot`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FullSyncReply {
    pub snapshot: SceneState,
    pub head_seq: u64,
    pub digest: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Welcome {
    pub client_id: ClientId,
    /// `true` when the presented id was known and its session resumed.
    pub resumed: bool,
    pub avatar_id: EntityId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Submitted { seq_num: u64 },
    FullSync(FullSyncReply),
    Operations { operations: Vec<Operation> },
    Stats(LogStats),
    Welcome(Welcome),
    Operation { operation: Operation },
    Error { message: String },
}

impl ServerMessage {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    pub fn decode(line: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(line)?)
    }
}

/// Serialise `message` as one newline-terminated JSON frame.
#[cfg(feature = "server")]
pub fn encode_frame<T: Serialize>(message: &T) -> Result<bytes::Bytes, serde_json::Error> {
    let mut buf = serde_json::to_vec(message)?;
    buf.push(b'\n');
    Ok(bytes::Bytes::from(buf))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_wire_shape() {
        let req: ClientRequest =
            serde_json::from_str(r#"{"type":"missing_range","from":4,"to":7}"#).unwrap();
        assert_eq!(req, ClientRequest::MissingRange { from: 4, to: 7 });

        let req: ClientRequest = serde_json::from_str(r#"{"type":"reconnect"}"#).unwrap();
        assert_eq!(req, ClientRequest::Reconnect { client_id: None });
    }

    #[test]
    fn welcome_is_flattened_under_its_tag() {
        let msg = ServerMessage::Welcome(Welcome {
            client_id: ClientId("c1".into()),
            resumed: true,
            avatar_id: "avatar-c1".into(),
        });
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "welcome");
        assert_eq!(json["client_id"], "c1");
        assert_eq!(json["avatar_id"], "avatar-c1");
    }

    #[test]
    fn unknown_request_is_malformed() {
        assert!(matches!(
            ClientRequest::decode(r#"{"type":"teleport"}"#),
            Err(ProtocolError::Malformed(_))
        ));
    }

    #[cfg(feature = "server")]
    #[test]
    fn frames_are_newline_terminated() {
        let frame = encode_frame(&ServerMessage::Submitted { seq_num: 3 }).unwrap();
        assert_eq!(&frame[..], b"{\"type\":\"submitted\",\"seq_num\":3}\n");
    }
}
