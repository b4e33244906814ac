//! Test doubles for quark-based applications.
//!
//! The in-memory publisher records every outbound message, and the in-memory
//! worker factory pushes scripted records through the real supervisor,
//! worker and writer machinery. Both let application and runtime tests run
//! without a live broker.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use quark_core::header::{HEADER_CORRELATION_ID, HEADER_REDELIVERY_COUNT};
use quark_core::{
    Event, Header, Message, Publisher, QuarkError, SupervisorContext, Worker, WorkerFactory,
};

/// Initialises a compact tracing subscriber for tests. Safe to call from
/// every test; only the first call installs the subscriber.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "debug".into()),
        )
        .with_test_writer()
        .try_init();
}

/// A [`Publisher`] that records every message instead of sending it.
#[derive(Default)]
pub struct InMemoryPublisher {
    sent: Mutex<Vec<Message>>,
    fail: AtomicBool,
}

impl InMemoryPublisher {
    /// Creates a recording publisher.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Makes every following publish fail, or succeed again.
    pub fn fail(&self, enabled: bool) {
        self.fail.store(enabled, Ordering::SeqCst);
    }

    /// Snapshot of every recorded message, in publish order.
    #[must_use]
    pub fn sent(&self) -> Vec<Message> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of recorded messages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sent.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Whether nothing was published yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Publisher for InMemoryPublisher {
    fn publish<'a>(&'a self, messages: &'a [Message]) -> BoxFuture<'a, Result<(), QuarkError>> {
        Box::pin(async move {
            if self.fail.load(Ordering::SeqCst) {
                return Err(QuarkError::Driver("in-memory publisher failure".into()));
            }
            self.sent
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .extend_from_slice(messages);
            Ok(())
        })
    }
}

/// One scripted inbound record for the in-memory worker.
#[derive(Debug, Clone)]
pub struct InMemoryRecord {
    /// Topic the record pretends to arrive on.
    pub topic: String,
    /// Native-style header handed to the handler.
    pub header: Header,
    /// The decoded envelope.
    pub message: Message,
}

impl InMemoryRecord {
    /// Builds a record whose header mirrors the message's correlation and
    /// redelivery fields, the way a real driver projects them.
    #[must_use]
    pub fn new(topic: impl Into<String>, message: Message) -> Self {
        let mut header = Header::new();
        header.set(HEADER_CORRELATION_ID, message.metadata.correlation_id.clone());
        header.set(
            HEADER_REDELIVERY_COUNT,
            message.metadata.redelivery_count.to_string(),
        );
        Self {
            topic: topic.into(),
            header,
            message,
        }
    }
}

/// Shared feed of scripted records plus the acknowledgement log.
#[derive(Default)]
pub struct InMemoryFeed {
    records: Mutex<VecDeque<InMemoryRecord>>,
    acks: Mutex<Vec<(String, bool)>>,
}

impl InMemoryFeed {
    /// Creates an empty feed.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queues a record for delivery.
    pub fn push(&self, record: InMemoryRecord) {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(record);
    }

    /// The acknowledgement log: message id and the handler's commit decision,
    /// in delivery order.
    #[must_use]
    pub fn acks(&self) -> Vec<(String, bool)> {
        self.acks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn pop(&self) -> Option<InMemoryRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
    }

    fn record_ack(&self, id: String, committed: bool) {
        self.acks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, committed));
    }
}

/// Returns a [`WorkerFactory`] whose workers deliver the feed's records
/// through the regular delivery path: writer minted per record, inbound
/// correlation and redelivery context injected, handler decision logged as
/// the acknowledgement.
#[must_use]
pub fn in_memory_worker_factory(feed: Arc<InMemoryFeed>) -> WorkerFactory {
    Arc::new(move |context: Arc<SupervisorContext>| {
        Some(Box::new(InMemoryWorker {
            context,
            feed: Arc::clone(&feed),
            close_tx: None,
            task: None,
        }) as Box<dyn Worker>)
    })
}

struct InMemoryWorker {
    context: Arc<SupervisorContext>,
    feed: Arc<InMemoryFeed>,
    close_tx: Option<watch::Sender<bool>>,
    task: Option<JoinHandle<()>>,
}

impl Worker for InMemoryWorker {
    fn set_id(&mut self, _id: usize) {}

    fn start_job(&mut self) -> BoxFuture<'_, Result<(), QuarkError>> {
        Box::pin(async move {
            let (close_tx, mut close_rx) = watch::channel(false);
            let context = Arc::clone(&self.context);
            let feed = Arc::clone(&self.feed);
            let mut shutdown = context.shutdown.clone();

            let task = tokio::spawn(async move {
                loop {
                    while let Some(record) = feed.pop() {
                        let mut writer = context.event_writer();
                        writer.replace_header(record.header.propagation());
                        let event = Event {
                            topic: record.topic,
                            header: record.header,
                            message: record.message,
                        };
                        let id = event.message.id.clone();
                        let committed = match context.handler() {
                            Some(handler) => handler.serve(writer, event).await,
                            None => false,
                        };
                        feed.record_ack(id, committed);
                    }
                    tokio::select! {
                        _ = close_rx.changed() => return,
                        result = shutdown.changed() => {
                            if result.is_err() || *shutdown.borrow() {
                                return;
                            }
                        }
                        () = tokio::time::sleep(Duration::from_millis(5)) => {}
                    }
                }
            });

            self.close_tx = Some(close_tx);
            self.task = Some(task);
            Ok(())
        })
    }

    fn close(&mut self) -> BoxFuture<'_, Result<(), QuarkError>> {
        Box::pin(async move {
            if let Some(close_tx) = self.close_tx.take() {
                let _ = close_tx.send(true);
            }
            if let Some(task) = self.task.take() {
                if let Err(error) = task.await {
                    if !error.is_cancelled() {
                        return Err(QuarkError::Driver(error.to_string()));
                    }
                }
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publisher_records_and_fails_on_demand() {
        let publisher = InMemoryPublisher::new();
        let message = Message::new("id-1", "foo", Vec::new());
        assert!(publisher.publish(&[message.clone()]).await.is_ok());
        assert_eq!(publisher.sent(), vec![message.clone()]);

        publisher.fail(true);
        assert!(publisher.publish(&[message]).await.is_err());
        assert_eq!(publisher.len(), 1);
    }

    #[test]
    fn record_header_mirrors_the_message() {
        let mut message = Message::new("id-1", "foo", Vec::new());
        message.metadata.redelivery_count = 2;
        let record = InMemoryRecord::new("foo", message);
        assert_eq!(record.header.get(HEADER_CORRELATION_ID), "id-1");
        assert_eq!(record.header.get(HEADER_REDELIVERY_COUNT), "2");
    }
}
