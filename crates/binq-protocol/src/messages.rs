//! JSON payload shapes carried inside [`crate::Frame`]. Field names are
//! `camelCase` to match the wire format produced by the original client.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

fn serialize_bytes_as_base64<S>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    s.serialize_str(&BASE64.encode(bytes))
}

fn deserialize_bytes_from_base64<'de, D>(d: D) -> Result<Vec<u8>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(d)?;
    BASE64.decode(s.as_bytes()).map_err(serde::de::Error::custom)
}

/// CREATE payload: `{name, maxPartitions}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateQueueRequest {
    pub name: String,
    pub max_partitions: u32,
}

/// PUBLISH payload: `{queueName, data, fileName?, fileExtension?}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishRequest {
    pub queue_name: String,
    #[serde(
        serialize_with = "serialize_bytes_as_base64",
        deserialize_with = "deserialize_bytes_from_base64"
    )]
    pub data: Vec<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_extension: Option<String>,
}

/// RECEIVE payload: `{queueName, batchSize}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiveRequest {
    pub queue_name: String,
    pub batch_size: u32,
}

/// ACK payload: `{messageIds}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AckRequest {
    pub message_ids: Vec<u64>,
}

/// One message as delivered to a consumer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageView {
    pub id: u64,
    pub queue_name: String,
    pub partition: u32,
    #[serde(
        serialize_with = "serialize_bytes_as_base64",
        deserialize_with = "deserialize_bytes_from_base64"
    )]
    pub data: Vec<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_extension: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Server -> client payload carried in a [`crate::Frame::server_frame`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageBatch {
    pub messages: Vec<MessageView>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_request_uses_camel_case_and_base64_data() {
        let req = PublishRequest {
            queue_name: "q".to_owned(),
            data: b"hello".to_vec(),
            file_name: None,
            file_extension: None,
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["queueName"], "q");
        assert_eq!(json["data"], base64::engine::general_purpose::STANDARD.encode(b"hello"));
        assert!(json.get("fileName").is_none());
    }

    #[test]
    fn create_queue_request_round_trips() {
        let json = r#"{"name":"q","maxPartitions":4}"#;
        let req: CreateQueueRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.name, "q");
        assert_eq!(req.max_partitions, 4);
    }

    #[test]
    fn ack_request_parses_message_ids() {
        let json = r#"{"messageIds":[1,2,3]}"#;
        let req: AckRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.message_ids, vec![1, 2, 3]);
    }
}
