//! The subscription registry consumed by the broker.

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use futures::future::BoxFuture;

use crate::consumer::Consumer;
use crate::handler::{Event, Handler};
use crate::publisher::Publisher;
use crate::worker::WorkerFactory;
use crate::writer::EventWriter;

/// Registry mapping every topic to the consumers subscribed to it.
///
/// A consumer subscribed to N topics appears under N keys, sharing the same
/// reference. Readers run concurrently; registration takes the write lock.
/// Once serving starts, the broker works from a snapshot of the registry, so
/// later mutations never corrupt a running session.
#[derive(Debug, Default)]
pub struct EventMux {
    consumers: RwLock<HashMap<String, Vec<Arc<Consumer>>>>,
}

impl EventMux {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a registration for a single topic.
    ///
    /// The returned builder registers the finished consumer when it goes out
    /// of scope. An empty topic yields a blank consumer that registers
    /// nothing.
    pub fn topic(&self, topic: impl Into<String>) -> SubscriptionBuilder<'_> {
        SubscriptionBuilder {
            mux: self,
            consumer: Consumer::new().topic(topic),
        }
    }

    /// Starts a registration for several topics at once. The same consumer
    /// reference lands under every topic. No topics yield a blank consumer
    /// that registers nothing.
    pub fn topics<I, S>(&self, topics: I) -> SubscriptionBuilder<'_>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        SubscriptionBuilder {
            mux: self,
            consumer: Consumer::new().topics(topics),
        }
    }

    /// Registers a finished consumer under each of its topics and returns the
    /// shared reference. A consumer without topics is kept out of the
    /// registry.
    pub fn add(&self, consumer: Consumer) -> Arc<Consumer> {
        let consumer = Arc::new(consumer);
        if !consumer.get_topics().is_empty() {
            let mut registry = self.write();
            for topic in consumer.get_topics() {
                registry
                    .entry(topic.clone())
                    .or_default()
                    .push(Arc::clone(&consumer));
            }
        }
        consumer
    }

    /// Returns the consumers registered under `topic`.
    #[must_use]
    pub fn get(&self, topic: &str) -> Vec<Arc<Consumer>> {
        self.read().get(topic).cloned().unwrap_or_default()
    }

    /// Removes a topic and all its registrations.
    pub fn del(&self, topic: &str) {
        self.write().remove(topic);
    }

    /// Whether `topic` has registrations.
    #[must_use]
    pub fn contains(&self, topic: &str) -> bool {
        self.read().contains_key(topic)
    }

    /// Snapshot of the whole registry.
    #[must_use]
    pub fn list(&self) -> HashMap<String, Vec<Arc<Consumer>>> {
        self.read().clone()
    }

    /// Number of registered topics.
    #[must_use]
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Vec<Arc<Consumer>>>> {
        self.consumers.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Vec<Arc<Consumer>>>> {
        self.consumers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// In-place registration of a [`Consumer`].
///
/// The builder owns the consumer while it is being configured and transfers
/// it into the registry exactly once, when the builder drops. This is what
/// freezes a subscription before serving starts: nothing holds a mutable
/// reference afterwards.
pub struct SubscriptionBuilder<'a> {
    mux: &'a EventMux,
    consumer: Consumer,
}

impl SubscriptionBuilder<'_> {
    /// Appends a topic.
    pub fn topic(&mut self, topic: impl Into<String>) -> &mut Self {
        self.apply(|c| c.topic(topic))
    }

    /// Appends several topics.
    pub fn topics<I, S>(&mut self, topics: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.apply(|c| c.topics(topics))
    }

    /// Sets the consumer group.
    pub fn group(&mut self, group: impl Into<String>) -> &mut Self {
        self.apply(|c| c.group(group))
    }

    /// Overrides the cluster addresses.
    pub fn cluster<I, S>(&mut self, addresses: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.apply(|c| c.cluster(addresses))
    }

    /// Overrides the publisher.
    pub fn publisher(&mut self, publisher: Arc<dyn Publisher>) -> &mut Self {
        self.apply(|c| c.publisher(publisher))
    }

    /// Sets the worker pool size.
    pub fn pool_size(&mut self, size: usize) -> &mut Self {
        self.apply(|c| c.pool_size(size))
    }

    /// Sets the redelivery cap.
    pub fn max_retries(&mut self, retries: u32) -> &mut Self {
        self.apply(|c| c.max_retries(retries))
    }

    /// Sets the publish backoff.
    pub fn retry_backoff(&mut self, backoff: Duration) -> &mut Self {
        self.apply(|c| c.retry_backoff(backoff))
    }

    /// Sets the driver configuration block.
    pub fn provider_config(&mut self, config: Arc<dyn Any + Send + Sync>) -> &mut Self {
        self.apply(|c| c.provider_config(config))
    }

    /// Sets the handler implementation.
    pub fn handle(&mut self, handler: Arc<dyn Handler>) -> &mut Self {
        self.apply(|c| c.handle(handler))
    }

    /// Sets the handler function.
    pub fn handle_fn<F>(&mut self, handler: F) -> &mut Self
    where
        F: Fn(Box<dyn EventWriter>, Event) -> BoxFuture<'static, bool> + Send + Sync + 'static,
    {
        self.apply(|c| c.handle_fn(handler))
    }

    /// Sets the worker factory override.
    pub fn worker_factory(&mut self, factory: WorkerFactory) -> &mut Self {
        self.apply(|c| c.worker_factory(factory))
    }

    /// Sets the CloudEvents source.
    pub fn source(&mut self, source: impl Into<String>) -> &mut Self {
        self.apply(|c| c.source(source))
    }

    /// Sets the content type.
    pub fn content_type(&mut self, content_type: impl Into<String>) -> &mut Self {
        self.apply(|c| c.content_type(content_type))
    }

    fn apply(&mut self, f: impl FnOnce(Consumer) -> Consumer) -> &mut Self {
        let consumer = std::mem::take(&mut self.consumer);
        self.consumer = f(consumer);
        self
    }
}

impl Drop for SubscriptionBuilder<'_> {
    fn drop(&mut self) {
        let consumer = std::mem::take(&mut self.consumer);
        if !consumer.get_topics().is_empty() {
            self.mux.add(consumer);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_registers_on_drop() {
        let mux = EventMux::new();
        mux.topic("alex.trades").pool_size(2);
        assert!(mux.contains("alex.trades"));
        assert_eq!(mux.get("alex.trades").len(), 1);
    }

    #[test]
    fn topics_share_one_reference() {
        let mux = EventMux::new();
        mux.topics(["bob.notification", "alice.trades", "john.products"]);

        let first = mux.get("bob.notification");
        let second = mux.get("alice.trades");
        let third = mux.get("john.products");
        assert_eq!(mux.len(), 3);
        assert!(Arc::ptr_eq(&first[0], &second[0]));
        assert!(Arc::ptr_eq(&first[0], &third[0]));
    }

    #[test]
    fn blank_registrations_are_ignored() {
        let mux = EventMux::new();
        mux.topic("");
        mux.topics(Vec::<String>::new());
        assert!(mux.is_empty());
    }

    #[test]
    fn add_registers_under_every_topic() {
        let mux = EventMux::new();
        mux.add(Consumer::new().topics(["alex.trades", "bob.trades"]));
        mux.add(Consumer::new().topic("alex.trades"));
        mux.add(Consumer::new());
        assert_eq!(mux.len(), 2);
        assert_eq!(mux.get("alex.trades").len(), 2);
        assert_eq!(mux.get("bob.trades").len(), 1);
    }

    #[test]
    fn del_removes_a_topic() {
        let mux = EventMux::new();
        mux.topics(["bob.notification", "john.products"]);
        mux.del("bob.notification");
        assert!(!mux.contains("bob.notification"));
        assert!(mux.contains("john.products"));
        assert_eq!(mux.len(), 1);
    }

    #[test]
    fn get_missing_topic_is_empty() {
        let mux = EventMux::new();
        assert!(mux.get("missing").is_empty());
    }
}
