//! The Kafka-backed publisher.

use std::time::Duration;

use futures::future::BoxFuture;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;

use quark_core::{Message, Publisher, QuarkError};

use crate::config::KafkaConfiguration;
use crate::marshal::marshal_headers;

const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Publishes envelopes as Kafka records.
///
/// The message type names the destination topic, the message id becomes the
/// record key and the payload travels as the record value; the envelope
/// itself rides in the record headers. The producer is created once and
/// reused, which is how librdkafka producers are meant to live.
pub struct KafkaPublisher {
    producer: FutureProducer,
    config: KafkaConfiguration,
    timeout: Duration,
}

impl KafkaPublisher {
    /// Creates a publisher connected to `cluster`.
    ///
    /// # Errors
    ///
    /// [`QuarkError::Driver`] when the producer cannot be created from the
    /// given configuration.
    pub fn new(config: KafkaConfiguration, cluster: &[String]) -> Result<Self, QuarkError> {
        let mut client = config.client.clone();
        client.set("bootstrap.servers", cluster.join(","));
        let producer: FutureProducer = client
            .create()
            .map_err(|error| QuarkError::Driver(error.to_string()))?;
        tracing::debug!(cluster = ?cluster, "kafka publisher created");
        Ok(Self {
            producer,
            config,
            timeout: DEFAULT_SEND_TIMEOUT,
        })
    }

    /// Overrides the per-record send timeout.
    #[must_use]
    pub const fn send_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Publisher for KafkaPublisher {
    fn publish<'a>(&'a self, messages: &'a [Message]) -> BoxFuture<'a, Result<(), QuarkError>> {
        Box::pin(async move {
            let mut errors = Vec::new();
            for message in messages {
                let headers = marshal_headers(message);
                let record = FutureRecord::to(&message.event_type)
                    .key(&message.id)
                    .payload(&message.data)
                    .headers(headers);

                match self.producer.send(record, Timeout::After(self.timeout)).await {
                    Ok((partition, offset)) => {
                        tracing::debug!(
                            topic = %message.event_type,
                            partition,
                            offset,
                            id = %message.id,
                            "message published"
                        );
                        if let Some(hook) = &self.config.producer.on_sent {
                            hook(message, partition, offset);
                        }
                    }
                    Err((error, _record)) => {
                        tracing::error!(
                            topic = %message.event_type,
                            id = %message.id,
                            error = %error,
                            "publish failed"
                        );
                        errors.push(QuarkError::Driver(error.to_string()));
                    }
                }
            }
            QuarkError::collect(errors)
        })
    }
}
