//! Messages exchanged between control clients, the manager and workers.
//!
//! Every message is one JSON document carried in one frame of
//! [`LengthDelimitedCodec`] (4-byte big-endian length, then the payload).
//!
//! Control requests are `{"ADD": tree}`, `{"DEL": "path"}` or `"LIST"`;
//! replies are `"ACK"`, `"FAIL"` or `{"LIST": tree}`. Broadcasts are
//! `{"UPDATE": tree}` for a full resync or any non-empty combination of
//! `{"DEL": [paths], "ADD": tree}` for a delta.

use authsync_core::{Delta, KeyTree};
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LengthDelimitedCodec};

use crate::error::{SyncError, SyncResult};

const MAX_FRAME_LENGTH: usize = 16 * 1024 * 1024;

pub type Connection = Framed<TcpStream, LengthDelimitedCodec>;

pub fn framed(stream: TcpStream) -> Connection {
    let codec = LengthDelimitedCodec::builder()
        .max_frame_length(MAX_FRAME_LENGTH)
        .new_codec();
    Framed::new(stream, codec)
}

pub fn encode<T: Serialize>(message: &T) -> SyncResult<Bytes> {
    Ok(serde_json::to_vec(message)?.into())
}

/// Decodes a frame; anything that is not a well-formed `T` is a
/// [`SyncError::ProtocolViolation`].
pub fn decode<T: DeserializeOwned>(frame: &[u8]) -> SyncResult<T> {
    serde_json::from_slice(frame).map_err(|err| SyncError::ProtocolViolation(err.to_string()))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ControlRequest {
    /// Merge a fragment into the store.
    Add(KeyTree),
    /// Remove the leaf at a path.
    Del(String),
    List,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ControlReply {
    Ack,
    Fail,
    List(KeyTree),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "BroadcastFrame", into = "BroadcastFrame")]
pub enum BroadcastMessage {
    /// The complete tree; replaces the worker's store.
    Update(KeyTree),
    Delta(Delta),
}

/// The field-per-key shape a broadcast takes on the wire.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct BroadcastFrame {
    #[serde(rename = "DEL", default, skip_serializing_if = "Option::is_none")]
    del: Option<Vec<String>>,
    #[serde(rename = "ADD", default, skip_serializing_if = "Option::is_none")]
    add: Option<KeyTree>,
    #[serde(rename = "UPDATE", default, skip_serializing_if = "Option::is_none")]
    update: Option<KeyTree>,
}

impl TryFrom<BroadcastFrame> for BroadcastMessage {
    type Error = String;

    fn try_from(frame: BroadcastFrame) -> Result<Self, Self::Error> {
        match frame {
            BroadcastFrame {
                update: Some(tree),
                del: None,
                add: None,
            } => Ok(BroadcastMessage::Update(tree)),
            BroadcastFrame { update: Some(_), .. } => {
                Err("UPDATE cannot be combined with ADD or DEL".into())
            }
            BroadcastFrame {
                del: None,
                add: None,
                ..
            } => Err("expected one of ADD, DEL or UPDATE".into()),
            BroadcastFrame { del, add, .. } => Ok(BroadcastMessage::Delta(Delta {
                deleted: del.unwrap_or_default(),
                added: add.unwrap_or_default(),
            })),
        }
    }
}

impl From<BroadcastMessage> for BroadcastFrame {
    fn from(message: BroadcastMessage) -> Self {
        match message {
            BroadcastMessage::Update(tree) => BroadcastFrame {
                update: Some(tree),
                ..Default::default()
            },
            BroadcastMessage::Delta(Delta { deleted, added }) => BroadcastFrame {
                // An empty delta still needs one key to stay decodable.
                del: (!deleted.is_empty() || added.is_empty()).then_some(deleted),
                add: (!added.is_empty()).then_some(added),
                update: None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use authsync_core::{KeyAlgorithm, KeyRecord};
    use serde_json::json;

    fn fragment() -> KeyTree {
        KeyTree::from_path(
            "admins/alice",
            KeyRecord::new(KeyAlgorithm::Ed25519, "AAAA", Some("alice".into())),
        )
        .unwrap()
    }

    #[test]
    fn control_request_shapes() {
        let add = ControlRequest::Add(fragment());
        assert_eq!(
            serde_json::to_value(&add).unwrap(),
            json!({"ADD": {"admins": {"alice": "ssh-ed25519 AAAA alice"}}})
        );
        assert_eq!(
            serde_json::to_value(ControlRequest::Del("admins/alice".into())).unwrap(),
            json!({"DEL": "admins/alice"})
        );
        assert_eq!(serde_json::to_value(ControlRequest::List).unwrap(), json!("LIST"));

        let decoded: ControlRequest =
            decode(br#"{"ADD": {"admins/alice": "ssh-ed25519 AAAA alice"}}"#).unwrap();
        assert_eq!(decoded, add);
    }

    #[test]
    fn unknown_control_requests_are_violations() {
        for frame in [
            &br#"{"PUT": {}}"#[..],
            br#""LIST ""#,
            br#"{"DEL": ["a"]}"#,
            br#"{"ADD": {"a": "ssh-nope A"}}"#,
            b"not json",
        ] {
            assert!(matches!(
                decode::<ControlRequest>(frame),
                Err(SyncError::ProtocolViolation(_))
            ));
        }
    }

    #[test]
    fn reply_shapes() {
        assert_eq!(serde_json::to_value(ControlReply::Ack).unwrap(), json!("ACK"));
        assert_eq!(serde_json::to_value(ControlReply::Fail).unwrap(), json!("FAIL"));
        assert_eq!(
            serde_json::to_value(ControlReply::List(fragment())).unwrap(),
            json!({"LIST": {"admins": {"alice": "ssh-ed25519 AAAA alice"}}})
        );
    }

    #[test]
    fn broadcast_shapes() {
        let update = BroadcastMessage::Update(fragment());
        assert_eq!(
            serde_json::to_value(&update).unwrap(),
            json!({"UPDATE": {"admins": {"alice": "ssh-ed25519 AAAA alice"}}})
        );

        let delta = BroadcastMessage::Delta(Delta {
            deleted: vec!["ci".into()],
            added: fragment(),
        });
        let value = serde_json::to_value(&delta).unwrap();
        assert_eq!(
            value,
            json!({"DEL": ["ci"], "ADD": {"admins": {"alice": "ssh-ed25519 AAAA alice"}}})
        );
        assert_eq!(serde_json::from_value::<BroadcastMessage>(value).unwrap(), delta);

        let only_del: BroadcastMessage = decode(br#"{"DEL": ["a/b", "c"]}"#).unwrap();
        assert_eq!(
            only_del,
            BroadcastMessage::Delta(Delta {
                deleted: vec!["a/b".into(), "c".into()],
                added: KeyTree::new(),
            })
        );

        let empty = BroadcastMessage::Delta(Delta::default());
        let bytes = encode(&empty).unwrap();
        assert_eq!(&bytes[..], br#"{"DEL":[]}"#);
        assert_eq!(decode::<BroadcastMessage>(&bytes).unwrap(), empty);
    }

    #[test]
    fn malformed_broadcasts_are_violations() {
        for frame in [
            &br#"{}"#[..],
            br#"{"UPDATE": {}, "DEL": []}"#,
            br#"{"MOVE": "a"}"#,
            br#"{"DEL": "a"}"#,
            br#""UPDATE""#,
        ] {
            assert!(matches!(
                decode::<BroadcastMessage>(frame),
                Err(SyncError::ProtocolViolation(_))
            ));
        }
    }
}
