//! The outbound path used inside handlers.

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;

use crate::errors::QuarkError;
use crate::header::{
    HEADER_CORRELATION_ID, HEADER_HOST, HEADER_REDELIVERY_COUNT, HEADER_TYPE, Header,
};
use crate::id::IdFactory;
use crate::message::Message;
use crate::publisher::Publisher;
use crate::retry::Backoff;

/// Resolved subscription-level defaults an event writer stamps onto the
/// messages it publishes.
#[derive(Debug, Clone)]
pub struct WriterDefaults {
    /// CloudEvents source for outbound messages. Empty leaves messages
    /// untouched.
    pub source: String,
    /// Content type for outbound messages. Empty leaves messages untouched.
    pub content_type: String,
    /// Redelivery cap; publication is refused beyond it.
    pub max_retries: u32,
    /// Base wait between publish attempts.
    pub retry_backoff: Duration,
}

/// Works as an event response writer.
///
/// Lets a handler respond, fan a message out to several topics, or fail
/// properly by sending the event to a retry or dead-letter topic. A writer is
/// bound to one subscription and one [`Publisher`]; the worker injects the
/// inbound record's correlation and tracing context into its header before
/// each handler invocation.
pub trait EventWriter: Send {
    /// Replaces the writer's per-response header wholesale.
    fn replace_header(&mut self, header: Header);

    /// The per-response header.
    fn header(&self) -> &Header;

    /// Mutable access to the per-response header.
    fn header_mut(&mut self) -> &mut Header;

    /// The publisher actually used to push messages, when one is configured.
    fn publisher(&self) -> Option<Arc<dyn Publisher>>;

    /// Publishes `data` once per topic, minting a new message per topic with
    /// the configured id factory. Returns the number of messages published.
    ///
    /// The writer may refuse individual messages that passed the maximum
    /// redelivery cap.
    ///
    /// # Errors
    ///
    /// [`QuarkError::PublisherNotImplemented`] without a publisher,
    /// [`QuarkError::NotEnoughTopics`] with zero topics and
    /// [`QuarkError::WriteFailed`] when some topics failed.
    fn write<'a>(
        &'a mut self,
        data: &'a [u8],
        topics: &'a [&'a str],
    ) -> BoxFuture<'a, Result<usize, QuarkError>>;

    /// Publishes preformed messages. Each message's type field is its
    /// destination topic. Returns the number of messages published.
    ///
    /// # Errors
    ///
    /// [`QuarkError::PublisherNotImplemented`] without a publisher,
    /// [`QuarkError::EmptyMessage`] with zero messages and
    /// [`QuarkError::WriteFailed`] when some messages failed.
    fn write_message<'a>(
        &'a mut self,
        messages: Vec<Message>,
    ) -> BoxFuture<'a, Result<usize, QuarkError>>;

    /// Publishes `message` as a redelivery: allocates it a new id, increments
    /// its redelivery count by one and mirrors the new count into the
    /// writer's header.
    ///
    /// Point the message's type to a dedicated retry topic to keep poisoned
    /// messages out of the main flow.
    ///
    /// # Errors
    ///
    /// [`QuarkError::PublisherNotImplemented`] without a publisher and
    /// [`QuarkError::MessageRedeliveredTooMuch`] once the incremented count
    /// passes the cap; the latter is the signal to route the message to a
    /// dead-letter topic instead.
    fn write_retry<'a>(
        &'a mut self,
        message: &'a mut Message,
    ) -> BoxFuture<'a, Result<(), QuarkError>>;
}

/// The runtime's default [`EventWriter`].
pub struct DefaultEventWriter {
    publisher: Option<Arc<dyn Publisher>>,
    header: Header,
    backoff: Backoff,
    defaults: WriterDefaults,
    id_factory: IdFactory,
}

impl DefaultEventWriter {
    /// Creates a writer bound to the given defaults and publisher.
    #[must_use]
    pub fn new(
        defaults: WriterDefaults,
        publisher: Option<Arc<dyn Publisher>>,
        id_factory: IdFactory,
    ) -> Self {
        Self {
            publisher,
            header: Header::new(),
            backoff: Backoff::new(defaults.retry_backoff),
            defaults,
            id_factory,
        }
    }

    /// Projects the writer's header onto `message` and stamps the
    /// subscription defaults.
    ///
    /// The type key is applied first so the redelivery-count guard compares
    /// against the final message type regardless of map iteration order.
    fn project_header(&self, message: &mut Message) {
        if self.header.contains(HEADER_TYPE) {
            message.event_type = self.header.get(HEADER_TYPE).to_string();
        }
        for (key, value) in self.header.iter() {
            match key {
                HEADER_TYPE => {}
                HEADER_CORRELATION_ID => {
                    if !value.is_empty() {
                        message.metadata.correlation_id = value.to_string();
                    }
                }
                HEADER_REDELIVERY_COUNT => {
                    if self.header.get(HEADER_TYPE) == message.event_type {
                        if let Ok(count) = value.parse() {
                            message.metadata.redelivery_count = count;
                        }
                    }
                }
                HEADER_HOST => message.metadata.host = value.to_string(),
                _ => {
                    message
                        .metadata
                        .external_data
                        .insert(key.to_string(), value.to_string());
                }
            }
        }

        if !self.defaults.source.is_empty() {
            message.source = self.defaults.source.clone();
        }
        if !self.defaults.content_type.is_empty() {
            message.content_type = self.defaults.content_type.clone();
        }
    }

    async fn publish(&mut self, message: &mut Message) -> Result<(), QuarkError> {
        self.project_header(message);

        let attempt = message.metadata.redelivery_count;
        if attempt > self.defaults.max_retries {
            return Err(QuarkError::MessageRedeliveredTooMuch);
        }

        let publisher = self
            .publisher
            .clone()
            .ok_or(QuarkError::PublisherNotImplemented)?;
        tokio::time::sleep(self.backoff.for_attempt(attempt)).await;
        publisher.publish(std::slice::from_ref(message)).await
    }
}

impl EventWriter for DefaultEventWriter {
    fn replace_header(&mut self, header: Header) {
        self.header = header;
    }

    fn header(&self) -> &Header {
        &self.header
    }

    fn header_mut(&mut self) -> &mut Header {
        &mut self.header
    }

    fn publisher(&self) -> Option<Arc<dyn Publisher>> {
        self.publisher.clone()
    }

    fn write<'a>(
        &'a mut self,
        data: &'a [u8],
        topics: &'a [&'a str],
    ) -> BoxFuture<'a, Result<usize, QuarkError>> {
        Box::pin(async move {
            if self.publisher.is_none() {
                return Err(QuarkError::PublisherNotImplemented);
            }
            if topics.is_empty() {
                return Err(QuarkError::NotEnoughTopics);
            }

            let mut published = 0;
            let mut errors = Vec::new();
            for topic in topics {
                let mut message = Message::new((self.id_factory)(), *topic, data.to_vec());
                match self.publish(&mut message).await {
                    Ok(()) => published += 1,
                    Err(error) => errors.push(error),
                }
            }
            if errors.is_empty() {
                Ok(published)
            } else {
                Err(QuarkError::WriteFailed { published, errors })
            }
        })
    }

    fn write_message<'a>(
        &'a mut self,
        messages: Vec<Message>,
    ) -> BoxFuture<'a, Result<usize, QuarkError>> {
        Box::pin(async move {
            if self.publisher.is_none() {
                return Err(QuarkError::PublisherNotImplemented);
            }
            if messages.is_empty() {
                return Err(QuarkError::EmptyMessage);
            }

            let mut published = 0;
            let mut errors = Vec::new();
            for mut message in messages {
                match self.publish(&mut message).await {
                    Ok(()) => published += 1,
                    Err(error) => errors.push(error),
                }
            }
            if errors.is_empty() {
                Ok(published)
            } else {
                Err(QuarkError::WriteFailed { published, errors })
            }
        })
    }

    fn write_retry<'a>(
        &'a mut self,
        message: &'a mut Message,
    ) -> BoxFuture<'a, Result<(), QuarkError>> {
        Box::pin(async move {
            if self.publisher.is_none() {
                return Err(QuarkError::PublisherNotImplemented);
            }

            message.id = (self.id_factory)();
            message.metadata.redelivery_count += 1;
            let count = message.metadata.redelivery_count.to_string();
            self.header.set(HEADER_REDELIVERY_COUNT, count);
            self.publish(message).await
        })
    }
}
