//! The message envelope transported on the wire.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Envelope specification version, per CNCF CloudEvents v1.0.
pub const SPEC_VERSION: &str = "1.0";

/// An event's body, passed to the actual message broker as the default
/// message form.
///
/// The field set is compatible with the CNCF CloudEvents specification v1.0,
/// so messages keep their shape across services written in any language.
/// The payload stays opaque bytes; the runtime never inspects it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Unique identifier within the message source.
    pub id: String,
    /// Topic the message belongs to.
    #[serde(rename = "type")]
    pub event_type: String,
    /// CloudEvents specification version, always `"1.0"`.
    #[serde(rename = "specversion")]
    pub spec_version: String,
    /// Context in which the event happened.
    ///
    /// It could be an Internet-wide unique URI with a DNS authority, a
    /// universally-unique URN with a UUID or an application-specific
    /// identifier, e.g. `https://github.com/cloudevents`,
    /// `urn:uuid:6e8bc430-9c3a-11d9-9669-0800200c9a66`.
    pub source: String,
    /// Actual event payload, encoded with the application's format of choice.
    pub data: Vec<u8>,
    /// Content type of `data`, in the format specified by RFC 2046,
    /// e.g. `application/json`, `application/avro`.
    #[serde(rename = "datacontenttype")]
    pub content_type: String,
    /// URI of the schema `data` adheres to, if any.
    #[serde(rename = "dataschema")]
    pub data_schema: String,
    /// Subject of the event in the context of the producer.
    pub subject: String,
    /// UTC time of publication. Kept at millisecond precision, which is what
    /// the wire format carries.
    pub time: DateTime<Utc>,
    /// Volatile runtime information.
    pub metadata: MessageMetadata,
}

/// Message volatile information managed by the runtime.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageMetadata {
    /// Root message id of this causal chain.
    pub correlation_id: String,
    /// Origin node of the message.
    pub host: String,
    /// Times this causal message has been re-published.
    pub redelivery_count: u32,
    /// Provider-specific fields that are not part of the envelope.
    pub external_data: HashMap<String, String>,
}

impl Message {
    /// Creates a freshly originated message.
    ///
    /// The correlation id equals `id`, marking the message as the root of a
    /// new causal chain.
    pub fn new(id: impl Into<String>, event_type: impl Into<String>, data: Vec<u8>) -> Self {
        let id = id.into();
        let correlation_id = id.clone();
        Self {
            id,
            event_type: event_type.into(),
            spec_version: SPEC_VERSION.to_string(),
            source: String::new(),
            data,
            content_type: String::new(),
            data_schema: String::new(),
            subject: String::new(),
            time: now_millis(),
            metadata: MessageMetadata {
                correlation_id,
                ..MessageMetadata::default()
            },
        }
    }

    /// Creates a message that continues the causal chain of `parent_id`.
    pub fn from_parent(
        parent_id: impl Into<String>,
        id: impl Into<String>,
        event_type: impl Into<String>,
        data: Vec<u8>,
    ) -> Self {
        let mut message = Self::new(id, event_type, data);
        message.metadata.correlation_id = parent_id.into();
        message
    }

    /// Byte size of the payload.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the payload is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

fn now_millis() -> DateTime<Utc> {
    let now = Utc::now();
    DateTime::from_timestamp_millis(now.timestamp_millis()).unwrap_or(now)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_message_roots_its_own_chain() {
        for topic in ["chat.0", "alex.trades", "alice.notifications", "bob.gps"] {
            let msg = Message::new("id-1", topic, b"hello".to_vec());
            assert_eq!(msg.id, "id-1");
            assert_eq!(msg.event_type, topic);
            assert_eq!(msg.spec_version, SPEC_VERSION);
            assert_eq!(msg.metadata.correlation_id, "id-1");
            assert_eq!(msg.metadata.redelivery_count, 0);
            assert_eq!(msg.data, b"hello");
        }
    }

    #[test]
    fn message_from_parent_keeps_the_parent_correlation() {
        let msg = Message::from_parent("root-id", "id-2", "chat.1", Vec::new());
        assert_eq!(msg.id, "id-2");
        assert_eq!(msg.metadata.correlation_id, "root-id");
        assert!(msg.is_empty());
    }

    #[test]
    fn publication_time_is_millisecond_precise() {
        let msg = Message::new("id-3", "chat.0", Vec::new());
        assert_eq!(msg.time.timestamp_subsec_nanos() % 1_000_000, 0);
        assert_eq!(msg.len(), 0);
    }
}
