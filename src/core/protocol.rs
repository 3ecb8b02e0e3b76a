//! JSON wire codec.
//!
//! Outbound frames carry a small integer operation code plus a topic and an
//! opaque string payload. Subscribe/unsubscribe frames batch topics as one
//! comma-joined string. The server keepalive is the literal text frame
//! `"heartbeat"`, which never reaches application callbacks.

use serde::{Deserialize, Serialize};
use sonic_rs::Value;

use super::frame::WsFrame;
use super::types::{PubSubError, PubSubResult};

/// Keepalive sentinel sent by the server as a bare text frame.
pub const HEARTBEAT: &[u8] = b"heartbeat";

/// Wire operation codes. The exact values are part of the protocol and must
/// match the counterpart server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    Publish = 1,
    Subscribe = 2,
    Unsubscribe = 3,
}

#[derive(Serialize)]
struct OutboundFrame<'a> {
    #[serde(rename = "type")]
    op: u8,
    topic: &'a str,
    data: &'a str,
}

/// A decoded inbound frame.
///
/// `data` is opaque to the client and handed to callbacks as-is.
#[derive(Debug, Clone, Deserialize)]
pub struct InboundFrame {
    #[serde(default)]
    pub topic: String,
    #[serde(rename = "type")]
    pub op: u8,
    #[serde(default)]
    pub data: Value,
}

impl InboundFrame {
    /// True for frames that fan out to topic callbacks; every other opcode is
    /// protocol-level signaling and is ignored by the client.
    #[inline]
    pub fn is_publish(&self) -> bool {
        self.op == Opcode::Publish as u8
    }
}

fn encode(op: Opcode, topic: &str, data: &str) -> PubSubResult<WsFrame> {
    let frame = OutboundFrame {
        op: op as u8,
        topic,
        data,
    };
    let json = sonic_rs::to_string(&frame).map_err(|err| PubSubError::EncodeFailed(err.to_string()))?;
    Ok(WsFrame::text(json))
}

pub fn encode_publish(topic: &str, data: &str) -> PubSubResult<WsFrame> {
    encode(Opcode::Publish, topic, data)
}

pub fn encode_subscribe(topics: &[String]) -> PubSubResult<WsFrame> {
    encode(Opcode::Subscribe, &topics.join(","), "")
}

pub fn encode_unsubscribe(topics: &[String]) -> PubSubResult<WsFrame> {
    encode(Opcode::Unsubscribe, &topics.join(","), "")
}

/// Classification of one inbound payload.
#[derive(Debug)]
pub enum Inbound {
    /// Keepalive; counts as activity, never dispatched.
    Heartbeat,
    Frame(InboundFrame),
}

pub fn decode(payload: &[u8]) -> PubSubResult<Inbound> {
    if payload == HEARTBEAT {
        return Ok(Inbound::Heartbeat);
    }
    let frame: InboundFrame =
        sonic_rs::from_slice(payload).map_err(|err| PubSubError::ParseFailed(err.to_string()))?;
    Ok(Inbound::Frame(frame))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::frame::frame_bytes;
    use sonic_rs::{JsonContainerTrait, JsonValueTrait};

    fn encoded_json(frame: &WsFrame) -> Value {
        let bytes = frame_bytes(frame).expect("data frame");
        sonic_rs::from_slice(bytes).expect("valid json")
    }

    #[test]
    fn operation_codes_match_the_wire_protocol() {
        assert_eq!(Opcode::Publish as u8, 1);
        assert_eq!(Opcode::Subscribe as u8, 2);
        assert_eq!(Opcode::Unsubscribe as u8, 3);
    }

    #[test]
    fn publish_frame_shape() {
        let frame = encode_publish("notes/1", "hello").unwrap();
        let json = encoded_json(&frame);
        assert_eq!(json.get("type").as_u64(), Some(1));
        assert_eq!(json.get("topic").as_str(), Some("notes/1"));
        assert_eq!(json.get("data").as_str(), Some("hello"));
    }

    #[test]
    fn subscribe_joins_topics_with_commas() {
        let topics = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let frame = encode_subscribe(&topics).unwrap();
        let json = encoded_json(&frame);
        assert_eq!(json.get("type").as_u64(), Some(2));
        assert_eq!(json.get("topic").as_str(), Some("a,b,c"));
        assert_eq!(json.get("data").as_str(), Some(""));

        let frame = encode_unsubscribe(&topics[..1].to_vec()).unwrap();
        let json = encoded_json(&frame);
        assert_eq!(json.get("type").as_u64(), Some(3));
        assert_eq!(json.get("topic").as_str(), Some("a"));
    }

    #[test]
    fn heartbeat_sentinel_is_recognized() {
        assert!(matches!(decode(b"heartbeat").unwrap(), Inbound::Heartbeat));
    }

    #[test]
    fn inbound_publish_decodes() {
        let raw = br#"{"topic":"notes/1","type":1,"data":{"subject":"updated"}}"#;
        let Inbound::Frame(frame) = decode(raw).unwrap() else {
            panic!("expected frame");
        };
        assert_eq!(frame.topic, "notes/1");
        assert!(frame.is_publish());
        assert_eq!(frame.data.get("subject").as_str(), Some("updated"));
    }

    #[test]
    fn non_publish_opcodes_are_not_dispatchable() {
        let raw = br#"{"topic":"notes/1","type":2,"data":""}"#;
        let Inbound::Frame(frame) = decode(raw).unwrap() else {
            panic!("expected frame");
        };
        assert!(!frame.is_publish());
    }

    #[test]
    fn malformed_payload_is_a_parse_error() {
        assert!(matches!(
            decode(b"{not json"),
            Err(PubSubError::ParseFailed(_))
        ));
    }
}
