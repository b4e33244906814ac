//! Envelope to Kafka record marshalling.
//!
//! The envelope travels in the record headers as a flat key-value layout
//! while the payload bytes stay opaque in the record value. The publication
//! time is encoded as its millisecond count in eight big-endian bytes;
//! decoding falls back to RFC 3339 text for records written by other
//! producers.

use chrono::{DateTime, Utc};
use rdkafka::message::{BorrowedMessage, Header as KafkaRecordHeader, Headers, OwnedHeaders};
use rdkafka::Message as KafkaMessage;

use quark_core::header::{
    HEADER_CORRELATION_ID, HEADER_DATA, HEADER_DATA_CONTENT_TYPE, HEADER_DATA_SCHEMA, HEADER_ID,
    HEADER_HOST, HEADER_REDELIVERY_COUNT, HEADER_SOURCE, HEADER_SPEC_VERSION, HEADER_SUBJECT,
    HEADER_TIME, HEADER_TYPE,
};
use quark_core::{Header, Message, MessageMetadata};

use crate::headers::{
    HEADER_KAFKA_KEY, HEADER_KAFKA_OFFSET, HEADER_KAFKA_PARTITION, HEADER_KAFKA_TIMESTAMP,
};

/// Projects a [`Message`] onto Kafka record headers.
///
/// Reserved fields come first in a fixed order; every `external_data` entry
/// follows in map order.
#[must_use]
pub fn marshal_headers(message: &Message) -> OwnedHeaders {
    let time = encode_time(message.time);
    let redelivery_count = message.metadata.redelivery_count.to_string();

    let mut headers = OwnedHeaders::new()
        .insert(KafkaRecordHeader {
            key: HEADER_ID,
            value: Some(message.id.as_bytes()),
        })
        .insert(KafkaRecordHeader {
            key: HEADER_TYPE,
            value: Some(message.event_type.as_bytes()),
        })
        .insert(KafkaRecordHeader {
            key: HEADER_SPEC_VERSION,
            value: Some(message.spec_version.as_bytes()),
        })
        .insert(KafkaRecordHeader {
            key: HEADER_SOURCE,
            value: Some(message.source.as_bytes()),
        })
        .insert(KafkaRecordHeader {
            key: HEADER_DATA_CONTENT_TYPE,
            value: Some(message.content_type.as_bytes()),
        })
        .insert(KafkaRecordHeader {
            key: HEADER_DATA_SCHEMA,
            value: Some(message.data_schema.as_bytes()),
        })
        .insert(KafkaRecordHeader {
            key: HEADER_SUBJECT,
            value: Some(message.subject.as_bytes()),
        })
        .insert(KafkaRecordHeader {
            key: HEADER_TIME,
            value: Some(&time[..]),
        })
        .insert(KafkaRecordHeader {
            key: HEADER_CORRELATION_ID,
            value: Some(message.metadata.correlation_id.as_bytes()),
        })
        .insert(KafkaRecordHeader {
            key: HEADER_HOST,
            value: Some(message.metadata.host.as_bytes()),
        })
        .insert(KafkaRecordHeader {
            key: HEADER_REDELIVERY_COUNT,
            value: Some(redelivery_count.as_bytes()),
        });

    for (key, value) in &message.metadata.external_data {
        headers = headers.insert(KafkaRecordHeader {
            key,
            value: Some(value.as_bytes()),
        });
    }
    headers
}

/// Populates `message` from Kafka record headers.
///
/// Reserved keys land in their envelope fields; anything else is kept under
/// `metadata.external_data`. The envelope id header only applies when the
/// message id is still empty, so a record key takes precedence.
pub fn unmarshal_headers<H: Headers>(headers: &H, message: &mut Message) {
    for header in headers.iter() {
        let raw = header.value.unwrap_or_default();
        let text = String::from_utf8_lossy(raw);
        match header.key {
            HEADER_ID => {
                if message.id.is_empty() {
                    message.id = text.into_owned();
                }
            }
            HEADER_TYPE => message.event_type = text.into_owned(),
            HEADER_SPEC_VERSION => message.spec_version = text.into_owned(),
            HEADER_SOURCE => message.source = text.into_owned(),
            HEADER_DATA_CONTENT_TYPE => message.content_type = text.into_owned(),
            HEADER_DATA_SCHEMA => message.data_schema = text.into_owned(),
            HEADER_SUBJECT => message.subject = text.into_owned(),
            HEADER_TIME => message.time = decode_time(raw),
            HEADER_DATA => message.data = raw.to_vec(),
            HEADER_CORRELATION_ID => message.metadata.correlation_id = text.into_owned(),
            HEADER_HOST => message.metadata.host = text.into_owned(),
            HEADER_REDELIVERY_COUNT => {
                if let Ok(count) = text.parse() {
                    message.metadata.redelivery_count = count;
                }
            }
            other => {
                message
                    .metadata
                    .external_data
                    .insert(other.to_string(), text.into_owned());
            }
        }
    }
}

/// Decodes a whole Kafka record into a [`Message`].
///
/// The record key becomes the message id and the record value becomes the
/// payload; the headers fill in the rest.
#[must_use]
pub fn unmarshal_message(record: &BorrowedMessage<'_>) -> Message {
    let mut message = blank_message();
    message.id = String::from_utf8_lossy(record.key().unwrap_or_default()).into_owned();
    message.data = record.payload().unwrap_or_default().to_vec();
    if let Some(headers) = record.headers() {
        unmarshal_headers(headers, &mut message);
    }
    message
}

/// Builds the native-side header of an inbound record: partition, offset,
/// key and timestamp under the Kafka namespace, plus every record header.
#[must_use]
pub fn native_header(record: &BorrowedMessage<'_>) -> Header {
    let mut header = Header::new();
    header.set(HEADER_KAFKA_PARTITION, record.partition().to_string());
    header.set(HEADER_KAFKA_OFFSET, record.offset().to_string());
    header.set(
        HEADER_KAFKA_KEY,
        String::from_utf8_lossy(record.key().unwrap_or_default()).into_owned(),
    );
    if let Some(timestamp) = record.timestamp().to_millis() {
        header.set(HEADER_KAFKA_TIMESTAMP, timestamp.to_string());
    }
    if let Some(headers) = record.headers() {
        for entry in headers.iter() {
            header.set(
                entry.key,
                String::from_utf8_lossy(entry.value.unwrap_or_default()).into_owned(),
            );
        }
    }
    header
}

fn encode_time(time: DateTime<Utc>) -> [u8; 8] {
    time.timestamp_millis().to_be_bytes()
}

fn decode_time(raw: &[u8]) -> DateTime<Utc> {
    if let Ok(bytes) = <[u8; 8]>::try_from(raw) {
        if let Some(time) = DateTime::from_timestamp_millis(i64::from_be_bytes(bytes)) {
            return time;
        }
    }
    let text = String::from_utf8_lossy(raw);
    DateTime::parse_from_rfc3339(&text)
        .map(|time| time.with_timezone(&Utc))
        .unwrap_or(DateTime::UNIX_EPOCH)
}

pub(crate) fn blank_message() -> Message {
    Message {
        id: String::new(),
        event_type: String::new(),
        spec_version: String::new(),
        source: String::new(),
        data: Vec::new(),
        content_type: String::new(),
        data_schema: String::new(),
        subject: String::new(),
        time: DateTime::UNIX_EPOCH,
        metadata: MessageMetadata::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn populated_message() -> Message {
        let mut message = Message::new("id-1", "chat.0", b"payload".to_vec());
        message.source = "https://github.com/quark".to_string();
        message.content_type = "application/json".to_string();
        message.data_schema = "https://schemas/chat".to_string();
        message.subject = "room-42".to_string();
        message.metadata.correlation_id = "root-1".to_string();
        message.metadata.host = "10.0.0.7".to_string();
        message.metadata.redelivery_count = 3;
        message
            .metadata
            .external_data
            .insert("x-tenant".to_string(), "acme".to_string());
        message
            .metadata
            .external_data
            .insert("x-region".to_string(), "eu-west-1".to_string());
        message
            .metadata
            .external_data
            .insert("x-shard".to_string(), "11".to_string());
        message
    }

    fn round_trip(message: &Message) -> Message {
        let headers = marshal_headers(message);
        let mut decoded = blank_message();
        // the record key and value carry the id and the payload
        decoded.id = message.id.clone();
        decoded.data = message.data.clone();
        unmarshal_headers(&headers, &mut decoded);
        decoded
    }

    #[test]
    fn every_field_survives_the_round_trip() {
        let message = populated_message();
        assert_eq!(round_trip(&message), message);
    }

    #[test]
    fn header_id_fills_an_empty_message_id_only() {
        let message = populated_message();
        let headers = marshal_headers(&message);

        let mut keyless = blank_message();
        unmarshal_headers(&headers, &mut keyless);
        assert_eq!(keyless.id, "id-1");

        let mut keyed = blank_message();
        keyed.id = "record-key".to_string();
        unmarshal_headers(&headers, &mut keyed);
        assert_eq!(keyed.id, "record-key");
    }

    #[test]
    fn reserved_keys_stay_out_of_external_data() {
        let message = populated_message();
        let decoded = round_trip(&message);
        assert_eq!(decoded.metadata.external_data.len(), 3);
        assert!(!decoded.metadata.external_data.contains_key(HEADER_TYPE));
    }

    #[test]
    fn text_timestamps_are_accepted() {
        let time = decode_time(b"2024-03-01T10:30:00.500Z");
        assert_eq!(time.timestamp_millis(), 1_709_289_000_500);
    }

    #[test]
    fn garbage_timestamps_fall_back_to_the_epoch() {
        assert_eq!(decode_time(b"not a time"), DateTime::UNIX_EPOCH);
    }

    proptest! {
        #[test]
        fn round_trip_is_lossless(
            id in "[a-z0-9-]{1,24}",
            event_type in "[a-z]{1,12}(\\.[a-z0-9]{1,8}){0,2}",
            payload in proptest::collection::vec(any::<u8>(), 0..256),
            correlation in "[a-z0-9-]{1,24}",
            host in "[0-9.]{0,15}",
            redelivery in 0u32..100,
            millis in 0i64..4_102_444_800_000,
            external in proptest::collection::hash_map("x-[a-z]{1,8}", "[ -~]{0,32}", 0..4),
        ) {
            let mut message = Message::new(id, event_type, payload);
            message.metadata.correlation_id = correlation;
            message.metadata.host = host;
            message.metadata.redelivery_count = redelivery;
            message.time = DateTime::from_timestamp_millis(millis).unwrap_or(DateTime::UNIX_EPOCH);
            message.metadata.external_data = external;

            prop_assert_eq!(round_trip(&message), message);
        }
    }
}
