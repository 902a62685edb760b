//! Pub/Sub v1 HTTP/JSON wire types, client side.
//!
//! Requests and responses use camelCase JSON; message payloads travel as
//! base64-encoded strings in the `data` field.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A Pub/Sub message on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PubsubMessage {
    /// Message data (base64-encoded on the wire).
    #[serde(with = "base64", default)]
    pub data: Vec<u8>,
    /// Message attributes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attributes: Option<HashMap<String, String>>,
    /// Message ID (set by the broker).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    /// Publish timestamp (set by the broker, RFC 3339).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub publish_time: Option<String>,
    /// Ordering key for ordered delivery.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ordering_key: Option<String>,
}

// Base64 encoding/decoding helpers
mod base64 {
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&base64::engine::general_purpose::STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        base64::engine::general_purpose::STANDARD
            .decode(s)
            .map_err(serde::de::Error::custom)
    }
}

/// Request body for `POST …/topics/{topic}:publish`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishRequest {
    /// Messages to publish.
    pub messages: Vec<PubsubMessage>,
}

/// Response body for a publish call.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishResponse {
    /// Message IDs assigned by the broker, one per published message.
    #[serde(default)]
    pub message_ids: Vec<String>,
}

/// Request body for `POST …/subscriptions/{subscription}:pull`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PullRequest {
    /// Maximum number of messages to return.
    pub max_messages: i32,
    /// Whether to return immediately if no messages are available.
    pub return_immediately: bool,
}

/// Response body for a pull call.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullResponse {
    /// Received messages, absent when none were available.
    #[serde(default)]
    pub received_messages: Option<Vec<ReceivedMessage>>,
}

/// A received message with its acknowledgment ID.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceivedMessage {
    /// Acknowledgment ID, valid until the subscription's ack deadline.
    pub ack_id: String,
    /// The message.
    pub message: PubsubMessage,
    /// Delivery attempt counter.
    #[serde(default)]
    pub delivery_attempt: Option<i32>,
}

/// Request body for `POST …/subscriptions/{subscription}:acknowledge`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AcknowledgeRequest {
    /// Acknowledgment IDs.
    pub ack_ids: Vec<String>,
}

/// Request body for `POST …/subscriptions/{subscription}:modifyAckDeadline`.
///
/// A deadline of zero makes the messages immediately eligible for redelivery
/// (negative acknowledgment).
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModifyAckDeadlineRequest {
    /// Acknowledgment IDs.
    pub ack_ids: Vec<String>,
    /// New acknowledgment deadline in seconds.
    pub ack_deadline_seconds: i32,
}

/// Error envelope returned by Google Cloud style APIs.
#[derive(Debug, Deserialize)]
pub struct ErrorResponse {
    /// Error details.
    pub error: ErrorDetail,
}

/// Error detail information.
#[derive(Debug, Deserialize)]
pub struct ErrorDetail {
    /// HTTP status code.
    #[serde(default)]
    pub code: u16,
    /// Error message.
    #[serde(default)]
    pub message: String,
    /// Error status string.
    #[serde(default)]
    pub status: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pubsub_message_data_is_base64() {
        let message = PubsubMessage {
            data: b"hello".to_vec(),
            attributes: None,
            message_id: None,
            publish_time: None,
            ordering_key: None,
        };

        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["data"], "aGVsbG8=");

        let back: PubsubMessage = serde_json::from_value(json).unwrap();
        assert_eq!(back.data, b"hello");
    }

    #[test]
    fn test_publish_request_shape() {
        let request = PublishRequest {
            messages: vec![PubsubMessage {
                data: b"x".to_vec(),
                attributes: Some(HashMap::from([("k".to_string(), "v".to_string())])),
                message_id: None,
                publish_time: None,
                ordering_key: None,
            }],
        };

        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains("\"messages\""));
        assert!(json.contains("\"attributes\""));
        // Broker-assigned fields are omitted on requests.
        assert!(!json.contains("messageId"));
    }

    #[test]
    fn test_pull_response_parsing() {
        let response: PullResponse = serde_json::from_str(
            r#"{
                "receivedMessages": [
                    {
                        "ackId": "a-1",
                        "message": {
                            "data": "cGluZw==",
                            "messageId": "m-1",
                            "publishTime": "2024-05-01T00:00:00Z"
                        },
                        "deliveryAttempt": 2
                    }
                ]
            }"#,
        )
        .unwrap();

        let received = response.received_messages.unwrap();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].ack_id, "a-1");
        assert_eq!(received[0].message.data, b"ping");
        assert_eq!(received[0].message.message_id.as_deref(), Some("m-1"));
        assert_eq!(received[0].delivery_attempt, Some(2));
    }

    #[test]
    fn test_empty_pull_response() {
        let response: PullResponse = serde_json::from_str("{}").unwrap();
        assert!(response.received_messages.is_none());
    }

    #[test]
    fn test_error_envelope_parsing() {
        let response: ErrorResponse = serde_json::from_str(
            r#"{"error": {"code": 404, "message": "Subscription not found", "status": "NOT_FOUND"}}"#,
        )
        .unwrap();
        assert_eq!(response.error.code, 404);
        assert_eq!(response.error.status, "NOT_FOUND");
    }
}
