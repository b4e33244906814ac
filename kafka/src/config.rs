//! Driver configuration.

use std::sync::Arc;

use rdkafka::Offset;
use rdkafka::config::ClientConfig;
use rdkafka::message::BorrowedMessage;

use quark_core::Message;

/// Hook invoked with every raw record before it is decoded.
pub type OnReceived = Arc<dyn Fn(&BorrowedMessage<'_>) + Send + Sync>;

/// Hook invoked after a message was accepted by the cluster, with the
/// partition and offset it landed on.
pub type OnSent = Arc<dyn Fn(&Message, i32, i64) + Send + Sync>;

/// Configuration block for the Kafka driver.
///
/// `client` holds raw librdkafka properties and is used as the base for both
/// consumers and producers; the worker fills in `bootstrap.servers` and
/// `group.id` from the resolved subscription and disables auto-commit unless
/// the property was set explicitly.
#[derive(Clone)]
pub struct KafkaConfiguration {
    /// Base librdkafka properties.
    pub client: ClientConfig,
    /// Consumer-side settings.
    pub consumer: KafkaConsumerConfig,
    /// Producer-side settings.
    pub producer: KafkaProducerConfig,
}

impl Default for KafkaConfiguration {
    fn default() -> Self {
        Self {
            client: ClientConfig::new(),
            consumer: KafkaConsumerConfig::default(),
            producer: KafkaProducerConfig::default(),
        }
    }
}

/// Consumer-side driver settings.
#[derive(Clone)]
pub struct KafkaConsumerConfig {
    /// Partition consumed in partition-assign mode.
    pub partition: i32,
    /// Starting offset in partition-assign mode.
    pub offset: Offset,
    /// Raw record hook.
    pub on_received: Option<OnReceived>,
}

impl Default for KafkaConsumerConfig {
    fn default() -> Self {
        Self {
            partition: 0,
            offset: Offset::End,
            on_received: None,
        }
    }
}

/// Producer-side driver settings.
#[derive(Clone, Default)]
pub struct KafkaProducerConfig {
    /// Delivery confirmation hook.
    pub on_sent: Option<OnSent>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_start_from_the_latest_offset() {
        let config = KafkaConfiguration::default();
        assert_eq!(config.consumer.partition, 0);
        assert!(matches!(config.consumer.offset, Offset::End));
        assert!(config.consumer.on_received.is_none());
        assert!(config.producer.on_sent.is_none());
    }
}
