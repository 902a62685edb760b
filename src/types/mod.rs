//! Common data types for psgate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Unique message identifier, assigned by the broker on publish.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub String);

impl MessageId {
    /// Create a new random message ID.
    ///
    /// Real IDs come from the broker; this is for in-process brokers and
    /// test fixtures that have to mint their own.
    pub fn new() -> Self {
        MessageId(Uuid::new_v4().to_string())
    }

    /// Create a message ID from a string.
    pub fn from_string(s: String) -> Self {
        MessageId(s)
    }

    /// The ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Message attributes: string keys to string values, order irrelevant.
pub type MessageAttributes = HashMap<String, String>;

/// A message received from a subscription.
///
/// Read-only view once constructed; the payload is opaque bytes.
#[derive(Debug, Clone)]
pub struct Message {
    /// Broker-assigned message ID.
    pub id: MessageId,
    /// Opaque payload.
    pub data: Vec<u8>,
    /// Message attributes.
    pub attributes: MessageAttributes,
    /// Timestamp the broker accepted the message, when reported.
    pub publish_time: Option<DateTime<Utc>>,
    /// Delivery attempt counter, when reported. Values above 1 indicate
    /// redelivery; duplicates are expected under at-least-once delivery.
    pub delivery_attempt: Option<u32>,
}

impl Message {
    /// Payload interpreted as UTF-8, with invalid sequences replaced.
    pub fn data_as_text(&self) -> String {
        String::from_utf8_lossy(&self.data).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_id_display() {
        let id = MessageId::from_string("m-42".to_string());
        assert_eq!(id.to_string(), "m-42");
        assert_eq!(id.as_str(), "m-42");
    }

    #[test]
    fn test_message_id_unique() {
        assert_ne!(MessageId::new(), MessageId::new());
    }

    #[test]
    fn test_data_as_text() {
        let message = Message {
            id: MessageId::new(),
            data: b"hello".to_vec(),
            attributes: MessageAttributes::new(),
            publish_time: None,
            delivery_attempt: None,
        };
        assert_eq!(message.data_as_text(), "hello");
    }
}
