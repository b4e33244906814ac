//! Kafka-specific reserved header keys.
//!
//! These round-trip through the envelope's `external_data`, so messages
//! republished to another provider keep their provenance.

/// Topic partition the record was stored in.
pub const HEADER_KAFKA_PARTITION: &str = "quark-kafka-partition";
/// Record offset within its partition.
pub const HEADER_KAFKA_OFFSET: &str = "quark-kafka-offset";
/// Record key, used by Kafka to group and compact records.
pub const HEADER_KAFKA_KEY: &str = "quark-kafka-key";
/// Broker-side insertion time, in epoch milliseconds.
pub const HEADER_KAFKA_TIMESTAMP: &str = "quark-kafka-timestamp";
