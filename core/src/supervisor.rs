//! Per-subscription worker pools.

use std::any::Any;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::consumer::Consumer;
use crate::errors::{ErrorHandler, QuarkError};
use crate::handler::HandlerKind;
use crate::id::IdFactory;
use crate::publisher::Publisher;
use crate::worker::{ReconnectPolicy, Worker, WorkerFactory};
use crate::writer::{DefaultEventWriter, EventWriter, WriterDefaults};

/// Produces a fresh event writer for every delivered record.
///
/// The broker option accepts a factory rather than a writer instance because
/// each writer carries mutable per-response state (its header); minting one
/// writer per delivery keeps that state out of shared singletons.
pub type EventWriterFactory =
    Arc<dyn Fn(&SupervisorContext) -> Box<dyn EventWriter> + Send + Sync>;

/// The resolved, read-only view of one subscription.
///
/// Every value here is the fold of the consumer-level override, the
/// broker-level default and the runtime constant. Workers receive this
/// snapshot instead of pointers back into the broker; ownership keeps flowing
/// broker to supervisor to worker while the configuration flows the other
/// way.
pub struct SupervisorContext {
    /// The frozen subscription declaration.
    pub consumer: Arc<Consumer>,
    /// Broker addresses to connect to.
    pub cluster: Vec<String>,
    /// Consumer group, defaulting to the comma-joined topic list.
    pub group: String,
    /// Number of workers in the pool.
    pub pool_size: usize,
    /// Redelivery cap for outbound publishes.
    pub max_retries: u32,
    /// Base wait between publish attempts.
    pub retry_backoff: Duration,
    /// Reconnection attempts a worker may spend.
    pub conn_retries: u32,
    /// Base wait between reconnection attempts.
    pub conn_retry_backoff: Duration,
    /// CloudEvents source stamped on outbound messages.
    pub source: String,
    /// Content type stamped on outbound messages.
    pub content_type: String,
    /// Driver-specific configuration block.
    pub provider_config: Option<Arc<dyn Any + Send + Sync>>,
    /// Publisher backing this subscription's event writers.
    pub publisher: Option<Arc<dyn Publisher>>,
    /// Hook for asynchronous runtime errors.
    pub error_handler: Option<ErrorHandler>,
    /// Message id generator.
    pub id_factory: IdFactory,
    /// Override for the event writers handed to handlers.
    pub writer_factory: Option<EventWriterFactory>,
    /// Broker-wide shutdown signal.
    pub shutdown: watch::Receiver<bool>,
}

impl SupervisorContext {
    /// The defaults an event writer stamps onto outbound messages.
    #[must_use]
    pub fn writer_defaults(&self) -> WriterDefaults {
        WriterDefaults {
            source: self.source.clone(),
            content_type: self.content_type.clone(),
            max_retries: self.max_retries,
            retry_backoff: self.retry_backoff,
        }
    }

    /// Mints the event writer for one delivery.
    #[must_use]
    pub fn event_writer(&self) -> Box<dyn EventWriter> {
        if let Some(factory) = &self.writer_factory {
            return factory(self);
        }
        Box::new(DefaultEventWriter::new(
            self.writer_defaults(),
            self.publisher.clone(),
            Arc::clone(&self.id_factory),
        ))
    }

    /// The reconnection budget workers of this subscription run under.
    #[must_use]
    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            max_retries: self.conn_retries,
            backoff: self.conn_retry_backoff,
        }
    }

    /// The subscription's handler, when one was declared.
    #[must_use]
    pub fn handler(&self) -> Option<&HandlerKind> {
        self.consumer.get_handler()
    }

    /// Forwards an asynchronous error to the configured hook, or logs it.
    pub fn report_error(&self, error: &QuarkError) {
        match &self.error_handler {
            Some(handler) => handler(error),
            None => tracing::error!(
                topics = %self.consumer.topic_string(),
                error = %error,
                "runtime error"
            ),
        }
    }
}

/// A consumer's logical unit of work, scheduling the blocking consume jobs of
/// one subscription across a worker pool.
pub struct Supervisor {
    context: Arc<SupervisorContext>,
    factory: Option<WorkerFactory>,
    idle: Vec<Box<dyn Worker>>,
    running: VecDeque<Box<dyn Worker>>,
}

impl Supervisor {
    /// Creates a supervisor over an already-resolved subscription view.
    #[must_use]
    pub fn new(context: Arc<SupervisorContext>, factory: Option<WorkerFactory>) -> Self {
        Self {
            context,
            factory,
            idle: Vec::new(),
            running: VecDeque::new(),
        }
    }

    /// The resolved subscription view.
    #[must_use]
    pub fn context(&self) -> &Arc<SupervisorContext> {
        &self.context
    }

    /// Number of running workers. The running queue is the authoritative
    /// list; the idle pool is only an allocation cache.
    #[must_use]
    pub fn running_len(&self) -> usize {
        self.running.len()
    }

    /// Starts the subscription's worker pool.
    ///
    /// Borrows a worker from the idle pool (building one through the factory
    /// when the pool is dry), assigns it a sequential id and starts its job.
    /// Failures of individual slots accumulate; when anything failed, the
    /// workers that did start are closed again before the error returns, so
    /// a failed start never leaks running jobs.
    ///
    /// # Errors
    ///
    /// [`QuarkError::EmptyCluster`], [`QuarkError::NotEnoughTopics`] or
    /// [`QuarkError::NotEnoughHandlers`] when the subscription is invalid;
    /// otherwise the collected per-slot failures, with factory misses
    /// recorded as [`QuarkError::ProviderNotValid`].
    pub async fn schedule_jobs(&mut self) -> Result<(), QuarkError> {
        self.ensure_valid_params()?;

        let mut errors = Vec::new();
        for id in 0..self.context.pool_size {
            let worker = self
                .idle
                .pop()
                .or_else(|| self.factory.as_ref().and_then(|f| f(Arc::clone(&self.context))));
            let Some(mut worker) = worker else {
                errors.push(QuarkError::ProviderNotValid {
                    topics: self.context.consumer.topic_string(),
                });
                continue;
            };
            worker.set_id(id);
            match worker.start_job().await {
                Ok(()) => self.running.push_back(worker),
                Err(error) => errors.push(error),
            }
        }

        if errors.is_empty() {
            tracing::debug!(
                topics = %self.context.consumer.topic_string(),
                workers = self.running.len(),
                "supervisor scheduled"
            );
            return Ok(());
        }

        let (_closed, close_errors) = self.drain().await;
        errors.extend(close_errors);
        QuarkError::collect(errors)
    }

    /// Ends the supervisor's consuming session.
    ///
    /// # Errors
    ///
    /// The collected close failures of the drained workers.
    pub async fn close(&mut self) -> Result<(), QuarkError> {
        let (_closed, errors) = self.drain().await;
        QuarkError::collect(errors)
    }

    /// Drains the running queue, closing every worker and recycling it into
    /// the idle pool. Returns the number of drained workers alongside any
    /// close failures.
    pub(crate) async fn drain(&mut self) -> (usize, Vec<QuarkError>) {
        let mut errors = Vec::new();
        let mut closed = 0;
        while let Some(mut worker) = self.running.pop_front() {
            if let Err(error) = worker.close().await {
                errors.push(error);
            }
            closed += 1;
            // recycle so a reused supervisor does not leak workers
            self.idle.push(worker);
        }
        (closed, errors)
    }

    fn ensure_valid_params(&self) -> Result<(), QuarkError> {
        if self.context.cluster.is_empty() {
            return Err(QuarkError::EmptyCluster);
        }
        if self.context.consumer.get_topics().is_empty() {
            return Err(QuarkError::NotEnoughTopics);
        }
        if self.context.handler().is_none() {
            return Err(QuarkError::NotEnoughHandlers);
        }
        Ok(())
    }
}
