//! Broker lifecycle: start, serve, drain, close.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, watch};
use tokio::time::Instant;

use crate::consumer::Consumer;
use crate::errors::{ErrorHandler, QuarkError};
use crate::id::{IdFactory, default_id_factory};
use crate::mux::{EventMux, SubscriptionBuilder};
use crate::publisher::Publisher;
use crate::supervisor::{EventWriterFactory, Supervisor, SupervisorContext};
use crate::worker::WorkerFactory;

pub(crate) const DEFAULT_POOL_SIZE: usize = 5;
pub(crate) const DEFAULT_MAX_RETRIES: u32 = 1;
pub(crate) const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_secs(3);
pub(crate) const DEFAULT_CONN_RETRIES: u32 = 3;
pub(crate) const DEFAULT_CONN_RETRY_BACKOFF: Duration = Duration::from_secs(5);
const SHUTDOWN_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Coordinates every event operation of the running application.
///
/// A broker administrates one [`Supervisor`] per registered subscription and,
/// through them, the worker pools doing the blocking consume work. It owns
/// the process-wide lifecycle: subscriptions are registered against its
/// registry, served until an orderly stop, and drained when
/// [`Broker::shutdown`] is called from anywhere in the process.
///
/// # Example
///
/// ```no_run
/// use std::time::Duration;
/// use quark_core::Broker;
///
/// # async fn example(worker_factory: quark_core::WorkerFactory) -> Result<(), quark_core::QuarkError> {
/// let broker = Broker::builder()
///     .cluster(["localhost:9092"])
///     .worker_factory(worker_factory)
///     .build();
///
/// broker
///     .topic("chat.0")
///     .pool_size(3)
///     .handle_fn(|_writer, event| {
///         Box::pin(async move {
///             tracing::info!(topic = %event.topic, "received");
///             true
///         })
///     });
///
/// broker.listen_and_serve().await?;
/// # Ok(())
/// # }
/// ```
pub struct Broker {
    cluster: Vec<String>,
    provider_config: Option<Arc<dyn Any + Send + Sync>>,
    error_handler: Option<ErrorHandler>,
    publisher: Option<Arc<dyn Publisher>>,
    mux: EventMux,
    writer_factory: Option<EventWriterFactory>,
    pool_size: Option<usize>,
    max_retries: Option<u32>,
    conn_retries: Option<u32>,
    retry_backoff: Option<Duration>,
    conn_retry_backoff: Option<Duration>,
    id_factory: IdFactory,
    worker_factory: Option<WorkerFactory>,
    base_source: String,
    base_content_type: String,

    supervisors: Mutex<HashMap<usize, Supervisor>>,
    running_supervisors: AtomicUsize,
    running_workers: AtomicUsize,
    in_shutdown: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    drain_lock: Mutex<()>,
}

impl Broker {
    /// Starts configuring a broker.
    #[must_use]
    pub fn builder() -> BrokerBuilder {
        BrokerBuilder::default()
    }

    /// Starts a registration for a single topic on the broker's registry.
    pub fn topic(&self, topic: impl Into<String>) -> SubscriptionBuilder<'_> {
        self.mux.topic(topic)
    }

    /// Starts a registration for several topics on the broker's registry.
    pub fn topics<I, S>(&self, topics: I) -> SubscriptionBuilder<'_>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.mux.topics(topics)
    }

    /// The broker's subscription registry.
    #[must_use]
    pub fn mux(&self) -> &EventMux {
        &self.mux
    }

    /// Current number of running supervisors.
    #[must_use]
    pub fn running_supervisors(&self) -> usize {
        self.running_supervisors.load(Ordering::SeqCst)
    }

    /// Current number of running workers across every supervisor.
    #[must_use]
    pub fn running_workers(&self) -> usize {
        self.running_workers.load(Ordering::SeqCst)
    }

    /// Serves every registered subscription until an orderly stop.
    ///
    /// # Errors
    ///
    /// [`QuarkError::BrokerClosed`] when a prior shutdown has been observed;
    /// otherwise whatever [`Broker::serve`] returns.
    pub async fn listen_and_serve(&self) -> Result<(), QuarkError> {
        if self.shutting_down() {
            return Err(QuarkError::BrokerClosed);
        }
        self.serve().await
    }

    /// The inner serve loop: starts all supervisors, then blocks until the
    /// shutdown signal fires and the supervisors drained.
    ///
    /// At most one serve session may be active per broker.
    ///
    /// # Errors
    ///
    /// Start-up failures of any supervisor short-circuit the session; the
    /// supervisors already started are closed again, so the broker never
    /// partially runs.
    pub async fn serve(&self) -> Result<(), QuarkError> {
        self.start_supervisors().await?;

        let mut shutdown = self.shutdown_rx.clone();
        while !*shutdown.borrow_and_update() {
            if shutdown.changed().await.is_err() {
                break;
            }
        }

        let _guard = self.drain_lock.lock().await;
        self.drain(None).await
    }

    /// Starts the broker's graceful shutdown and waits for every supervisor
    /// to terminate.
    ///
    /// Safe to call from any task; redundant calls observe the same single
    /// shutdown signal and return once the drain completes. While draining
    /// the broker accepts no new work, and any later serve attempt fails
    /// with [`QuarkError::BrokerClosed`].
    ///
    /// # Errors
    ///
    /// [`QuarkError::ShutdownTimeout`] when `timeout` elapses before every
    /// supervisor terminated.
    pub async fn shutdown(&self, timeout: Duration) -> Result<(), QuarkError> {
        self.in_shutdown.store(true, Ordering::SeqCst);
        let _guard = self.drain_lock.lock().await;
        self.shutdown_tx.send_replace(true);
        self.drain(Some(Instant::now() + timeout)).await
    }

    fn shutting_down(&self) -> bool {
        self.in_shutdown.load(Ordering::SeqCst)
    }

    async fn start_supervisors(&self) -> Result<(), QuarkError> {
        let mut table = self.supervisors.lock().await;
        for (topic, consumers) in self.mux.list() {
            for consumer in consumers {
                let context = Arc::new(self.resolve_context(consumer));
                let factory = context
                    .consumer
                    .get_worker_factory()
                    .cloned()
                    .or_else(|| self.worker_factory.clone());
                let mut supervisor = Supervisor::new(context, factory);

                if let Err(error) = supervisor.schedule_jobs().await {
                    tracing::error!(topic = %topic, error = %error, "supervisor start failed");
                    self.unwind(&mut table).await;
                    return Err(error);
                }

                let workers = supervisor.running_len();
                let key = table.len();
                table.insert(key, supervisor);
                self.running_supervisors.fetch_add(1, Ordering::SeqCst);
                self.running_workers.fetch_add(workers, Ordering::SeqCst);
                tracing::info!(topic = %topic, workers, "subscription serving");
            }
        }
        Ok(())
    }

    /// Closes everything in the supervisor table after a failed start.
    async fn unwind(&self, table: &mut HashMap<usize, Supervisor>) {
        for (_, supervisor) in table.iter_mut() {
            let (closed, errors) = supervisor.drain().await;
            self.running_workers.fetch_sub(closed, Ordering::SeqCst);
            for error in errors {
                self.report_error(&error);
            }
        }
        self.running_supervisors
            .fetch_sub(table.len(), Ordering::SeqCst);
        table.clear();
    }

    /// Polls the supervisor table until it drains or the deadline passes.
    async fn drain(&self, deadline: Option<Instant>) -> Result<(), QuarkError> {
        loop {
            if self.close_supervisors().await {
                return Ok(());
            }
            let wait = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(QuarkError::ShutdownTimeout);
                    }
                    SHUTDOWN_POLL_INTERVAL.min(deadline - now)
                }
                None => SHUTDOWN_POLL_INTERVAL,
            };
            tokio::time::sleep(wait).await;
        }
    }

    /// Closes every supervisor, removing the ones that terminated cleanly.
    /// Returns whether the table is empty.
    async fn close_supervisors(&self) -> bool {
        let mut table = self.supervisors.lock().await;
        let keys: Vec<usize> = table.keys().copied().collect();
        for key in keys {
            let Some(supervisor) = table.get_mut(&key) else {
                continue;
            };
            let (closed, errors) = supervisor.drain().await;
            self.running_workers.fetch_sub(closed, Ordering::SeqCst);
            if errors.is_empty() {
                table.remove(&key);
                self.running_supervisors.fetch_sub(1, Ordering::SeqCst);
            } else {
                // keep the supervisor; the next poll retries the close
                for error in errors {
                    self.report_error(&error);
                }
            }
        }
        table.is_empty()
    }

    fn report_error(&self, error: &QuarkError) {
        match &self.error_handler {
            Some(handler) => handler(error),
            None => tracing::error!(error = %error, "runtime error"),
        }
    }

    /// Folds consumer-level overrides, broker-level defaults and runtime
    /// constants into the read-only view a supervisor works from.
    fn resolve_context(&self, consumer: Arc<Consumer>) -> SupervisorContext {
        let cluster = if consumer.get_cluster().is_empty() {
            self.cluster.clone()
        } else {
            consumer.get_cluster().to_vec()
        };
        let group = if consumer.get_group().is_empty() {
            consumer.topic_string()
        } else {
            consumer.get_group().to_string()
        };
        let source = if consumer.get_source().is_empty() {
            self.base_source.clone()
        } else {
            consumer.get_source().to_string()
        };
        let content_type = if consumer.get_content_type().is_empty() {
            self.base_content_type.clone()
        } else {
            consumer.get_content_type().to_string()
        };

        SupervisorContext {
            cluster,
            group,
            pool_size: consumer
                .get_pool_size()
                .or(self.pool_size)
                .unwrap_or(DEFAULT_POOL_SIZE),
            max_retries: consumer
                .get_max_retries()
                .or(self.max_retries)
                .unwrap_or(DEFAULT_MAX_RETRIES),
            retry_backoff: consumer
                .get_retry_backoff()
                .or(self.retry_backoff)
                .unwrap_or(DEFAULT_RETRY_BACKOFF),
            conn_retries: self.conn_retries.unwrap_or(DEFAULT_CONN_RETRIES),
            conn_retry_backoff: self
                .conn_retry_backoff
                .unwrap_or(DEFAULT_CONN_RETRY_BACKOFF),
            source,
            content_type,
            provider_config: consumer
                .get_provider_config()
                .cloned()
                .or_else(|| self.provider_config.clone()),
            publisher: consumer
                .get_publisher()
                .cloned()
                .or_else(|| self.publisher.clone()),
            error_handler: self.error_handler.clone(),
            id_factory: Arc::clone(&self.id_factory),
            writer_factory: self.writer_factory.clone(),
            shutdown: self.shutdown_rx.clone(),
            consumer,
        }
    }
}

/// Configures and builds a [`Broker`].
#[derive(Default)]
pub struct BrokerBuilder {
    cluster: Vec<String>,
    provider_config: Option<Arc<dyn Any + Send + Sync>>,
    error_handler: Option<ErrorHandler>,
    publisher: Option<Arc<dyn Publisher>>,
    mux: Option<EventMux>,
    writer_factory: Option<EventWriterFactory>,
    pool_size: Option<usize>,
    max_retries: Option<u32>,
    conn_retries: Option<u32>,
    retry_backoff: Option<Duration>,
    conn_retry_backoff: Option<Duration>,
    id_factory: Option<IdFactory>,
    worker_factory: Option<WorkerFactory>,
    base_source: String,
    base_content_type: String,
}

impl BrokerBuilder {
    /// Addresses of the message broker cluster.
    #[must_use]
    pub fn cluster<I, S>(mut self, addresses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.cluster = addresses.into_iter().map(Into::into).collect();
        self
    }

    /// Driver-specific configuration block.
    #[must_use]
    pub fn provider_config(mut self, config: Arc<dyn Any + Send + Sync>) -> Self {
        self.provider_config = Some(config);
        self
    }

    /// Hook executed for every asynchronous runtime error.
    #[must_use]
    pub fn error_handler(mut self, handler: ErrorHandler) -> Self {
        self.error_handler = Some(handler);
        self
    }

    /// Global publisher backing the event writers.
    #[must_use]
    pub fn publisher(mut self, publisher: Arc<dyn Publisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    /// Supplies a pre-populated subscription registry.
    #[must_use]
    pub fn event_mux(mut self, mux: EventMux) -> Self {
        self.mux = Some(mux);
        self
    }

    /// Overrides the event writers handed to handlers.
    #[must_use]
    pub fn event_writer_factory(mut self, factory: EventWriterFactory) -> Self {
        self.writer_factory = Some(factory);
        self
    }

    /// Default worker count per supervisor. Zero keeps the runtime default.
    #[must_use]
    pub fn pool_size(mut self, size: usize) -> Self {
        if size > 0 {
            self.pool_size = Some(size);
        }
        self
    }

    /// Default redelivery cap. Zero keeps the runtime default.
    #[must_use]
    pub fn max_retries(mut self, retries: u32) -> Self {
        if retries > 0 {
            self.max_retries = Some(retries);
        }
        self
    }

    /// Bounded reconnect attempts per worker. Zero keeps the runtime
    /// default.
    #[must_use]
    pub fn max_conn_retries(mut self, retries: u32) -> Self {
        if retries > 0 {
            self.conn_retries = Some(retries);
        }
        self
    }

    /// Base publish backoff. Zero keeps the runtime default.
    #[must_use]
    pub fn retry_backoff(mut self, backoff: Duration) -> Self {
        if !backoff.is_zero() {
            self.retry_backoff = Some(backoff);
        }
        self
    }

    /// Base reconnect backoff. Zero keeps the runtime default.
    #[must_use]
    pub fn conn_retry_backoff(mut self, backoff: Duration) -> Self {
        if !backoff.is_zero() {
            self.conn_retry_backoff = Some(backoff);
        }
        self
    }

    /// Message id generator. Defaults to UUID v4.
    #[must_use]
    pub fn message_id_factory(mut self, factory: IdFactory) -> Self {
        self.id_factory = Some(factory);
        self
    }

    /// Supplies the driver-specific workers the supervisors schedule.
    #[must_use]
    pub fn worker_factory(mut self, factory: WorkerFactory) -> Self {
        self.worker_factory = Some(factory);
        self
    }

    /// Default CloudEvents source of outbound messages.
    #[must_use]
    pub fn base_message_source(mut self, source: impl Into<String>) -> Self {
        self.base_source = source.into();
        self
    }

    /// Default content type of outbound messages, per RFC 2046.
    #[must_use]
    pub fn base_message_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.base_content_type = content_type.into();
        self
    }

    /// Builds the broker.
    #[must_use]
    pub fn build(self) -> Broker {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Broker {
            cluster: self.cluster,
            provider_config: self.provider_config,
            error_handler: self.error_handler,
            publisher: self.publisher,
            mux: self.mux.unwrap_or_default(),
            writer_factory: self.writer_factory,
            pool_size: self.pool_size,
            max_retries: self.max_retries,
            conn_retries: self.conn_retries,
            retry_backoff: self.retry_backoff,
            conn_retry_backoff: self.conn_retry_backoff,
            id_factory: self.id_factory.unwrap_or_else(default_id_factory),
            worker_factory: self.worker_factory,
            base_source: self.base_source,
            base_content_type: self.base_content_type,
            supervisors: Mutex::new(HashMap::new()),
            running_supervisors: AtomicUsize::new(0),
            running_workers: AtomicUsize::new(0),
            in_shutdown: AtomicBool::new(false),
            shutdown_tx,
            shutdown_rx,
            drain_lock: Mutex::new(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn serve_after_shutdown_is_refused() {
        let broker = Broker::builder().cluster(["localhost:9092"]).build();
        assert!(broker.shutdown(Duration::from_secs(1)).await.is_ok());
        assert!(matches!(
            broker.listen_and_serve().await,
            Err(QuarkError::BrokerClosed)
        ));
    }

    #[tokio::test]
    async fn redundant_shutdowns_are_safe() {
        let broker = Arc::new(Broker::builder().cluster(["localhost:9092"]).build());
        let mut tasks = Vec::new();
        for _ in 0..4 {
            let broker = Arc::clone(&broker);
            tasks.push(tokio::spawn(async move {
                broker.shutdown(Duration::from_secs(1)).await
            }));
        }
        for task in tasks {
            let result = task.await;
            assert!(matches!(result, Ok(Ok(()))));
        }
        assert_eq!(broker.running_supervisors(), 0);
        assert_eq!(broker.running_workers(), 0);
    }

    #[test]
    fn consumer_overrides_beat_broker_defaults() {
        let broker = Broker::builder()
            .cluster(["a:9092"])
            .pool_size(2)
            .max_retries(7)
            .base_message_source("https://broker")
            .build();

        let consumer = Arc::new(
            Consumer::new()
                .topic("chat.0")
                .pool_size(9)
                .source("https://consumer"),
        );
        let context = broker.resolve_context(consumer);
        assert_eq!(context.pool_size, 9);
        assert_eq!(context.max_retries, 7);
        assert_eq!(context.source, "https://consumer");
        assert_eq!(context.cluster, ["a:9092"]);
        assert_eq!(context.group, "chat.0");
    }

    #[test]
    fn runtime_constants_back_everything() {
        let broker = Broker::builder().build();
        let consumer = Arc::new(Consumer::new().topics(["a", "b"]));
        let context = broker.resolve_context(consumer);
        assert_eq!(context.pool_size, DEFAULT_POOL_SIZE);
        assert_eq!(context.max_retries, DEFAULT_MAX_RETRIES);
        assert_eq!(context.retry_backoff, DEFAULT_RETRY_BACKOFF);
        assert_eq!(context.conn_retries, DEFAULT_CONN_RETRIES);
        assert_eq!(context.conn_retry_backoff, DEFAULT_CONN_RETRY_BACKOFF);
        assert_eq!(context.group, "a,b");
        assert!(context.cluster.is_empty());
    }

    #[test]
    fn builder_ignores_zero_values() {
        let broker = Broker::builder()
            .pool_size(0)
            .max_retries(0)
            .retry_backoff(Duration::ZERO)
            .build();
        assert!(broker.pool_size.is_none());
        assert!(broker.max_retries.is_none());
        assert!(broker.retry_backoff.is_none());
    }
}
