//! Header map and the reserved envelope keys.
//!
//! A [`Header`] holds relevant metadata about a message, a consumer or a
//! broker: specific provider data (offsets, partitions, a consumer group), a
//! span context from the distributed tracing provider so traces propagate
//! from remote parents, and message properties such as total redeliveries or
//! the correlation id. It is the transport vehicle between broker-native
//! record headers and the envelope fields.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Envelope id header key.
pub const HEADER_ID: &str = "quark-id";
/// Envelope type header key.
pub const HEADER_TYPE: &str = "quark-type";
/// Envelope specification version header key.
pub const HEADER_SPEC_VERSION: &str = "quark-spec-version";
/// Envelope source header key.
pub const HEADER_SOURCE: &str = "quark-source";
/// Envelope publication time header key.
pub const HEADER_TIME: &str = "quark-time";
/// Envelope content type header key.
pub const HEADER_DATA_CONTENT_TYPE: &str = "quark-data-content-type";
/// Envelope data schema header key.
pub const HEADER_DATA_SCHEMA: &str = "quark-data-schema";
/// Envelope subject header key.
pub const HEADER_SUBJECT: &str = "quark-subject";
/// Envelope payload header key.
pub const HEADER_DATA: &str = "quark-data";
/// Correlation id header key.
pub const HEADER_CORRELATION_ID: &str = "quark-correlation-id";
/// Origin host header key.
pub const HEADER_HOST: &str = "quark-host";
/// Redelivery count header key.
pub const HEADER_REDELIVERY_COUNT: &str = "quark-redelivery-count";
/// Handler error header key, used when routing failures to retry or
/// dead-letter topics.
pub const HEADER_ERROR: &str = "quark-error";
/// Consumer group header key.
pub const HEADER_CONSUMER_GROUP: &str = "quark-consumer-group";
/// Distributed tracing span context header key.
pub const HEADER_SPAN_CONTEXT: &str = "quark-span-context";

/// A string-to-string map projected onto and from the driver's native record
/// headers. Insertion order is irrelevant.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header(HashMap<String, String>);

impl Header {
    /// Creates an empty header.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches or overrides a field.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    /// Returns the value for `key`, or the empty string when absent.
    #[must_use]
    pub fn get(&self, key: &str) -> &str {
        self.0.get(key).map_or("", String::as_str)
    }

    /// Removes a field.
    pub fn del(&mut self, key: &str) {
        self.0.remove(key);
    }

    /// Whether `key` is present.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Iterates over every field.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the header holds no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the child header an event writer inherits from an inbound
    /// record: the span context, the correlation id and the redelivery count.
    ///
    /// Injecting it into the writer preserves distributed-tracing continuity
    /// and redelivery accounting along the causal chain.
    #[must_use]
    pub fn propagation(&self) -> Header {
        let mut child = Header::new();
        child.set(HEADER_SPAN_CONTEXT, self.get(HEADER_SPAN_CONTEXT));
        child.set(HEADER_CORRELATION_ID, self.get(HEADER_CORRELATION_ID));
        child.set(HEADER_REDELIVERY_COUNT, self.get(HEADER_REDELIVERY_COUNT));
        child
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_get_del_contains() {
        let mut header = Header::new();
        header.set(HEADER_ID, "123");
        assert_eq!(header.get(HEADER_ID), "123");
        assert!(header.contains(HEADER_ID));

        header.set(HEADER_ID, "456");
        assert_eq!(header.get(HEADER_ID), "456");
        assert_eq!(header.len(), 1);

        header.del(HEADER_ID);
        assert!(!header.contains(HEADER_ID));
        assert!(header.is_empty());
    }

    #[test]
    fn get_missing_key_is_empty_string() {
        let header = Header::new();
        assert_eq!(header.get("nope"), "");
    }

    #[test]
    fn propagation_copies_the_trace_fields_only() {
        let mut header = Header::new();
        header.set(HEADER_SPAN_CONTEXT, "span-1");
        header.set(HEADER_CORRELATION_ID, "corr-1");
        header.set(HEADER_REDELIVERY_COUNT, "2");
        header.set(HEADER_HOST, "10.0.0.1");

        let child = header.propagation();
        assert_eq!(child.get(HEADER_SPAN_CONTEXT), "span-1");
        assert_eq!(child.get(HEADER_CORRELATION_ID), "corr-1");
        assert_eq!(child.get(HEADER_REDELIVERY_COUNT), "2");
        assert!(!child.contains(HEADER_HOST));
    }
}
