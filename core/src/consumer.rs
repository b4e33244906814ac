//! Subscription declarations.

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;

use crate::handler::{Event, Handler, HandlerFunc, HandlerKind};
use crate::publisher::Publisher;
use crate::worker::WorkerFactory;
use crate::writer::EventWriter;

/// A subscription declaration: topics, a handler and per-subscription
/// overrides of the broker-wide configuration.
///
/// Consumers are built fluently, either standalone and handed to
/// [`EventMux::add`](crate::mux::EventMux::add) or through the registering
/// builder returned by [`Broker::topic`](crate::broker::Broker::topic). A
/// consumer is immutable once serving starts; the registry hands the
/// supervisor a frozen snapshot.
#[derive(Default)]
pub struct Consumer {
    topics: Vec<String>,
    group: String,
    cluster: Vec<String>,
    publisher: Option<Arc<dyn Publisher>>,
    pool_size: Option<usize>,
    max_retries: Option<u32>,
    retry_backoff: Option<Duration>,
    provider_config: Option<Arc<dyn Any + Send + Sync>>,
    handler: Option<HandlerKind>,
    worker_factory: Option<WorkerFactory>,
    source: String,
    content_type: String,
}

impl Consumer {
    /// Creates an empty subscription declaration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a topic. Empty and already-registered topics are ignored.
    #[must_use]
    pub fn topic(mut self, topic: impl Into<String>) -> Self {
        let topic = topic.into();
        if !topic.is_empty() && !self.topics.contains(&topic) {
            self.topics.push(topic);
        }
        self
    }

    /// Appends several topics for fan-in processing.
    #[must_use]
    pub fn topics<I, S>(mut self, topics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for topic in topics {
            self = self.topic(topic);
        }
        self
    }

    /// Sets the consumer group this subscription joins to consume messages in
    /// parallel. Defaults to the comma-joined topic list.
    #[must_use]
    pub fn group(mut self, group: impl Into<String>) -> Self {
        self.group = group.into();
        self
    }

    /// Overrides the broker cluster addresses for this subscription.
    #[must_use]
    pub fn cluster<I, S>(mut self, addresses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.cluster = addresses.into_iter().map(Into::into).collect();
        self
    }

    /// Overrides the publisher used by this subscription's event writers.
    #[must_use]
    pub fn publisher(mut self, publisher: Arc<dyn Publisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    /// Worker pool size. Values of zero fall back to the broker default.
    #[must_use]
    pub fn pool_size(mut self, size: usize) -> Self {
        if size > 0 {
            self.pool_size = Some(size);
        }
        self
    }

    /// Redelivery cap for outbound publishes.
    #[must_use]
    pub fn max_retries(mut self, retries: u32) -> Self {
        if retries > 0 {
            self.max_retries = Some(retries);
        }
        self
    }

    /// Base wait between publish attempts.
    #[must_use]
    pub fn retry_backoff(mut self, backoff: Duration) -> Self {
        if !backoff.is_zero() {
            self.retry_backoff = Some(backoff);
        }
        self
    }

    /// Driver-specific configuration block for this subscription.
    #[must_use]
    pub fn provider_config(mut self, config: Arc<dyn Any + Send + Sync>) -> Self {
        self.provider_config = Some(config);
        self
    }

    /// Sets the handler implementation. Replaces any handler function set
    /// earlier; a subscription carries exactly one handler.
    #[must_use]
    pub fn handle(mut self, handler: Arc<dyn Handler>) -> Self {
        self.handler = Some(HandlerKind::Handler(handler));
        self
    }

    /// Sets the handler function. Replaces any handler set earlier.
    #[must_use]
    pub fn handle_fn<F>(mut self, handler: F) -> Self
    where
        F: Fn(Box<dyn EventWriter>, Event) -> BoxFuture<'static, bool> + Send + Sync + 'static,
    {
        self.handler = Some(HandlerKind::Func(Arc::new(handler) as HandlerFunc));
        self
    }

    /// Driver-specific worker generator for this subscription.
    #[must_use]
    pub fn worker_factory(mut self, factory: WorkerFactory) -> Self {
        self.worker_factory = Some(factory);
        self
    }

    /// CloudEvents source stamped on messages published from this
    /// subscription's handlers.
    #[must_use]
    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    /// Content type stamped on messages published from this subscription's
    /// handlers. Must adhere to RFC 2046.
    #[must_use]
    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = content_type.into();
        self
    }

    /// Registered topics.
    #[must_use]
    pub fn get_topics(&self) -> &[String] {
        &self.topics
    }

    /// Every registered topic joined with commas.
    #[must_use]
    pub fn topic_string(&self) -> String {
        self.topics.join(",")
    }

    /// The explicit consumer group, empty when none was declared.
    #[must_use]
    pub fn get_group(&self) -> &str {
        &self.group
    }

    /// The cluster override.
    #[must_use]
    pub fn get_cluster(&self) -> &[String] {
        &self.cluster
    }

    /// The publisher override.
    #[must_use]
    pub fn get_publisher(&self) -> Option<&Arc<dyn Publisher>> {
        self.publisher.as_ref()
    }

    /// The pool size override.
    #[must_use]
    pub fn get_pool_size(&self) -> Option<usize> {
        self.pool_size
    }

    /// The redelivery cap override.
    #[must_use]
    pub fn get_max_retries(&self) -> Option<u32> {
        self.max_retries
    }

    /// The publish backoff override.
    #[must_use]
    pub fn get_retry_backoff(&self) -> Option<Duration> {
        self.retry_backoff
    }

    /// The driver configuration override.
    #[must_use]
    pub fn get_provider_config(&self) -> Option<&Arc<dyn Any + Send + Sync>> {
        self.provider_config.as_ref()
    }

    /// The registered handler, in either form.
    #[must_use]
    pub fn get_handler(&self) -> Option<&HandlerKind> {
        self.handler.as_ref()
    }

    /// The worker factory override.
    #[must_use]
    pub fn get_worker_factory(&self) -> Option<&WorkerFactory> {
        self.worker_factory.as_ref()
    }

    /// The source override.
    #[must_use]
    pub fn get_source(&self) -> &str {
        &self.source
    }

    /// The content type override.
    #[must_use]
    pub fn get_content_type(&self) -> &str {
        &self.content_type
    }
}

impl std::fmt::Debug for Consumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Consumer")
            .field("topics", &self.topics)
            .field("group", &self.group)
            .field("cluster", &self.cluster)
            .field("pool_size", &self.pool_size)
            .field("max_retries", &self.max_retries)
            .field("retry_backoff", &self.retry_backoff)
            .field("handler", &self.handler)
            .finish_non_exhaustive()
    }
}
