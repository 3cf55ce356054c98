//! JSON wire model for the gateway's receive stream.
//!
//! Field names mirror the gateway's camelCase envelope exactly; everything
//! the gateway may omit is optional with a serde default so a sparse
//! envelope still decodes. The model serializes back to the same camelCase
//! shape, so an encoded message decodes to an identical value.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Text stored and forwarded when a message carries a sticker but no body.
pub const STICKER_TEXT: &str = "STICKER";
/// Text stored and forwarded when a message carries attachments but no body.
pub const ATTACHMENT_TEXT: &str = "ATTACHMENT";

/// Outer object delivered by the gateway wrapping one message event.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Envelope {
    #[serde(default)]
    pub account: String,
    #[serde(default)]
    pub source: String,
    #[serde(rename = "sourceNumber", default)]
    pub source_number: Option<String>,
    #[serde(rename = "sourceUuid", default)]
    pub source_uuid: Option<String>,
    #[serde(rename = "sourceName", default)]
    pub source_name: Option<String>,
    #[serde(rename = "sourceDevice", default)]
    pub source_device: Option<i64>,
    #[serde(default)]
    pub timestamp: i64,
    #[serde(rename = "serverReceivedTimestamp", default)]
    pub server_received_timestamp: i64,
    #[serde(rename = "serverDeliveredTimestamp", default)]
    pub server_delivered_timestamp: Option<i64>,
    #[serde(rename = "dataMessage", default)]
    pub data_message: Option<DataMessage>,
    /// Present on sync events from linked devices; currently ignored.
    #[serde(rename = "syncMessage", default)]
    pub sync_message: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct DataMessage {
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub sticker: Option<Sticker>,
    #[serde(default)]
    pub mentions: Vec<Mention>,
    #[serde(rename = "groupInfo", default)]
    pub group_info: Option<GroupInfo>,
}

impl DataMessage {
    /// The text that flows into archival and the assistant. A missing body is
    /// synthesized from the payload kind: sticker wins over attachments; a
    /// message with neither stays `None`.
    pub fn effective_text(&self) -> Option<String> {
        match &self.message {
            Some(text) => Some(text.clone()),
            None if self.sticker.is_some() => Some(STICKER_TEXT.to_string()),
            None if !self.attachments.is_empty() => Some(ATTACHMENT_TEXT.to_string()),
            None => None,
        }
    }

    pub fn is_group_message(&self) -> bool {
        self.group_info.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Attachment {
    #[serde(rename = "contentType", default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub size: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Sticker {
    #[serde(rename = "packId", default)]
    pub pack_id: Option<String>,
    #[serde(rename = "stickerId", default)]
    pub sticker_id: Option<i64>,
}

/// A typed reference to an account inside a group message's text span.
/// The archive additionally stores the mention list as a JSON blob.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Mention {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub number: Option<String>,
    #[serde(default)]
    pub uuid: Option<String>,
    #[serde(default)]
    pub start: i64,
    #[serde(default)]
    pub length: i64,
}

/// Group metadata; presence marks the message as a group message. `group_id`
/// is the gateway's opaque internal identifier, not the externally
/// addressable one.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct GroupInfo {
    #[serde(rename = "groupId", default)]
    pub group_id: Option<String>,
    #[serde(rename = "groupName", default)]
    pub group_name: Option<String>,
    #[serde(default)]
    pub revision: Option<i64>,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
}

/// Strict parse of one receive-stream payload.
pub fn decode_envelope(payload: &str) -> Result<Envelope> {
    serde_json::from_str(payload).context("malformed gateway envelope")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_envelope_decodes() {
        let json = r#"{
            "account": "+15550000",
            "source": "+15550001",
            "sourceNumber": "+15550001",
            "sourceUuid": "a1b2c3d4-e5f6-7890-abcd-ef1234567890",
            "sourceName": "Alice",
            "sourceDevice": 1,
            "timestamp": 1700000000000,
            "serverReceivedTimestamp": 1700000000100,
            "serverDeliveredTimestamp": 1700000000200,
            "dataMessage": {
                "timestamp": 1700000000000,
                "message": "hello",
                "mentions": [
                    {"name": "+15550000", "number": "+15550000", "start": 0, "length": 1}
                ],
                "groupInfo": {
                    "groupId": "INT1",
                    "groupName": "friends",
                    "revision": 4,
                    "type": "DELIVER"
                }
            }
        }"#;
        let envelope = decode_envelope(json).unwrap();
        assert_eq!(envelope.source, "+15550001");
        assert_eq!(envelope.server_received_timestamp, 1_700_000_000_100);
        assert_eq!(envelope.server_delivered_timestamp, Some(1_700_000_000_200));
        let data = envelope.data_message.unwrap();
        assert_eq!(data.message.as_deref(), Some("hello"));
        assert_eq!(data.mentions.len(), 1);
        assert_eq!(data.mentions[0].name.as_deref(), Some("+15550000"));
        let group = data.group_info.unwrap();
        assert_eq!(group.group_id.as_deref(), Some("INT1"));
        assert_eq!(group.kind.as_deref(), Some("DELIVER"));
    }

    #[test]
    fn sparse_envelope_decodes() {
        let envelope = decode_envelope("{}").unwrap();
        assert!(envelope.source.is_empty());
        assert!(envelope.data_message.is_none());
        assert!(envelope.sync_message.is_none());
        assert!(envelope.server_delivered_timestamp.is_none());
    }

    #[test]
    fn malformed_payload_fails() {
        assert!(decode_envelope("not json").is_err());
        assert!(decode_envelope(r#"{"timestamp": "soon"}"#).is_err());
    }

    #[test]
    fn sync_message_is_retained_but_opaque() {
        let envelope =
            decode_envelope(r#"{"source": "+15550001", "syncMessage": {"sentMessage": {}}}"#)
                .unwrap();
        assert!(envelope.sync_message.is_some());
        assert!(envelope.data_message.is_none());
    }

    #[test]
    fn text_synthesis_prefers_sticker() {
        let data: DataMessage = serde_json::from_str(
            r#"{
                "timestamp": 1,
                "sticker": {"packId": "x", "stickerId": 1},
                "attachments": [{"contentType": "image/png"}]
            }"#,
        )
        .unwrap();
        assert_eq!(data.effective_text().as_deref(), Some(STICKER_TEXT));
    }

    #[test]
    fn text_synthesis_attachments_without_sticker() {
        let data: DataMessage = serde_json::from_str(
            r#"{"timestamp": 1, "attachments": [{"contentType": "image/png"}]}"#,
        )
        .unwrap();
        assert_eq!(data.effective_text().as_deref(), Some(ATTACHMENT_TEXT));
    }

    #[test]
    fn text_synthesis_keeps_real_body() {
        let data: DataMessage = serde_json::from_str(
            r#"{"timestamp": 1, "message": "hi", "sticker": {"packId": "x"}}"#,
        )
        .unwrap();
        assert_eq!(data.effective_text().as_deref(), Some("hi"));
    }

    #[test]
    fn text_synthesis_none_when_bare() {
        let data: DataMessage = serde_json::from_str(r#"{"timestamp": 1}"#).unwrap();
        assert!(data.effective_text().is_none());
    }

    fn canonical_data_message() -> DataMessage {
        DataMessage {
            timestamp: 1_700_000_000_000,
            message: Some("hello".to_string()),
            attachments: vec![Attachment {
                content_type: Some("image/png".to_string()),
                id: Some("att1".to_string()),
                filename: Some("pic.png".to_string()),
                size: Some(2048),
            }],
            sticker: Some(Sticker {
                pack_id: Some("pack".to_string()),
                sticker_id: Some(7),
            }),
            mentions: vec![Mention {
                name: Some("+15550000".to_string()),
                number: Some("+15550000".to_string()),
                uuid: Some("a1b2c3d4-e5f6-7890-abcd-ef1234567890".to_string()),
                start: 0,
                length: 1,
            }],
            group_info: Some(GroupInfo {
                group_id: Some("INT1".to_string()),
                group_name: Some("friends".to_string()),
                revision: Some(4),
                kind: Some("DELIVER".to_string()),
            }),
        }
    }

    #[test]
    fn encode_then_decode_data_message_is_identity() {
        let message = canonical_data_message();
        let encoded = serde_json::to_string(&message).unwrap();
        let decoded: DataMessage = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, message);
    }

    #[test]
    fn encoded_data_message_uses_wire_field_names() {
        let encoded = serde_json::to_string(&canonical_data_message()).unwrap();
        for name in [
            "\"groupInfo\"",
            "\"groupId\"",
            "\"groupName\"",
            "\"type\"",
            "\"contentType\"",
            "\"packId\"",
            "\"stickerId\"",
        ] {
            assert!(encoded.contains(name), "missing {name} in {encoded}");
        }
        assert!(!encoded.contains("group_info"));
    }

    #[test]
    fn encode_then_decode_envelope_is_identity() {
        let envelope = Envelope {
            account: "+15550000".to_string(),
            source: "+15550001".to_string(),
            source_number: Some("+15550001".to_string()),
            source_uuid: None,
            source_name: Some("Alice".to_string()),
            source_device: Some(1),
            timestamp: 1_700_000_000_000,
            server_received_timestamp: 1_700_000_000_100,
            server_delivered_timestamp: Some(1_700_000_000_200),
            data_message: Some(canonical_data_message()),
            sync_message: None,
        };
        let encoded = serde_json::to_string(&envelope).unwrap();
        let decoded = decode_envelope(&encoded).unwrap();
        assert_eq!(decoded, envelope);
    }

    #[test]
    fn group_presence_flags_group_message() {
        let grouped: DataMessage =
            serde_json::from_str(r#"{"timestamp": 1, "groupInfo": {"groupId": "INT1"}}"#).unwrap();
        assert!(grouped.is_group_message());

        let direct: DataMessage = serde_json::from_str(r#"{"timestamp": 1}"#).unwrap();
        assert!(!direct.is_group_message());
    }
}
