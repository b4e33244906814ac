//! The Kafka consumer worker.

use std::sync::Arc;

use futures::future::BoxFuture;
use rdkafka::consumer::{CommitMode, Consumer as RdConsumer, StreamConsumer};
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::message::BorrowedMessage;
use rdkafka::{Message as KafkaMessage, TopicPartitionList};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use quark_core::header::HEADER_CONSUMER_GROUP;
use quark_core::{
    Event, QuarkError, SessionEnd, SupervisorContext, Worker, WorkerFactory, run_with_reconnect,
};

use crate::config::KafkaConfiguration;
use crate::marshal::{native_header, unmarshal_message};

/// Returns the [`WorkerFactory`] building Kafka workers from `config`.
///
/// A subscription carrying its own provider configuration overrides `config`
/// when that configuration is a [`KafkaConfiguration`]; any other type means
/// no worker can be built for it.
#[must_use]
pub fn kafka_worker_factory(config: KafkaConfiguration) -> WorkerFactory {
    Arc::new(move |context: Arc<SupervisorContext>| {
        let config = match context.provider_config.as_ref() {
            Some(any) => any.downcast_ref::<KafkaConfiguration>()?.clone(),
            None => config.clone(),
        };
        Some(Box::new(KafkaWorker {
            id: 0,
            context,
            config,
            close_tx: None,
            task: None,
        }) as Box<dyn Worker>)
    })
}

/// One concurrent Kafka consumer.
///
/// With several topics or an explicit group the worker joins a consumer
/// group; a single anonymous topic is consumed from an assigned partition
/// instead, which skips rebalancing entirely. Either way the connection runs
/// under the subscription's bounded reconnect budget and records are
/// acknowledged only when the handler says so.
struct KafkaWorker {
    id: usize,
    context: Arc<SupervisorContext>,
    config: KafkaConfiguration,
    close_tx: Option<watch::Sender<bool>>,
    task: Option<JoinHandle<()>>,
}

impl Worker for KafkaWorker {
    fn set_id(&mut self, id: usize) {
        self.id = id;
    }

    fn start_job(&mut self) -> BoxFuture<'_, Result<(), QuarkError>> {
        Box::pin(async move {
            let topics = self.context.consumer.get_topics().to_vec();
            let group_mode =
                topics.len() > 1 || !self.context.consumer.get_group().is_empty();
            if group_mode && self.context.group.is_empty() {
                return Err(QuarkError::RequiredGroup);
            }

            let (close_tx, close_rx) = watch::channel(false);
            let mut session = KafkaSession {
                context: Arc::clone(&self.context),
                config: self.config.clone(),
                topics,
                group_mode,
                worker_id: self.id,
                consumer: None,
                close_rx,
                shutdown: self.context.shutdown.clone(),
            };
            // connect up front so configuration failures surface to the
            // supervisor instead of the error handler
            session.consumer = Some(session.build_consumer()?);

            let policy = self.context.reconnect_policy();
            self.close_tx = Some(close_tx);
            self.task = Some(tokio::spawn(consume_task(session, policy)));
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

async fn consume_task(session: KafkaSession, policy: quark_core::ReconnectPolicy) {
    let error_handler = session.context.error_handler.clone();
    run_with_reconnect(
        policy,
        session,
        |mut session, _attempt| async move {
            if session.consumer.is_none() {
                match session.build_consumer() {
                    Ok(consumer) => session.consumer = Some(consumer),
                    Err(error) => {
                        return (
                            session,
                            SessionEnd::LostConnection {
                                error,
                                delivered: false,
                            },
                        );
                    }
                }
            }
            let end = session.run_once().await;
            (session, end)
        },
        error_handler.as_ref(),
    )
    .await;
}

struct KafkaSession {
    context: Arc<SupervisorContext>,
    config: KafkaConfiguration,
    topics: Vec<String>,
    group_mode: bool,
    worker_id: usize,
    consumer: Option<StreamConsumer>,
    close_rx: watch::Receiver<bool>,
    shutdown: watch::Receiver<bool>,
}

impl KafkaSession {
    /// Creates the consumer and opens the subscription.
    fn build_consumer(&self) -> Result<StreamConsumer, QuarkError> {
        let mut client = self.config.client.clone();
        client.set("bootstrap.servers", self.context.cluster.join(","));
        client.set("group.id", &self.context.group);
        if client.get("enable.auto.commit").is_none() {
            // the runtime acknowledges records itself, after the handler
            client.set("enable.auto.commit", "false");
        }

        let consumer: StreamConsumer = client.create().map_err(driver_error)?;
        if self.group_mode {
            let topic_refs: Vec<&str> = self.topics.iter().map(String::as_str).collect();
            consumer.subscribe(&topic_refs).map_err(driver_error)?;
            tracing::info!(
                worker = self.worker_id,
                topics = ?self.topics,
                group = %self.context.group,
                "joined consumer group"
            );
        } else {
            let topic = self.topics.first().map(String::as_str).unwrap_or_default();
            let mut assignment = TopicPartitionList::new();
            assignment
                .add_partition_offset(
                    topic,
                    self.config.consumer.partition,
                    self.config.consumer.offset,
                )
                .map_err(driver_error)?;
            consumer.assign(&assignment).map_err(driver_error)?;
            tracing::info!(
                worker = self.worker_id,
                topic = %topic,
                partition = self.config.consumer.partition,
                "assigned partition"
            );
        }
        Ok(consumer)
    }

    /// Consumes until the session is closed or the connection is lost.
    async fn run_once(&mut self) -> SessionEnd {
        let Some(consumer) = self.consumer.take() else {
            return SessionEnd::Fatal(QuarkError::Driver("consumer not connected".to_string()));
        };
        let mut close_rx = self.close_rx.clone();
        let mut shutdown = self.shutdown.clone();
        if *close_rx.borrow_and_update() || *shutdown.borrow_and_update() {
            return SessionEnd::Closed;
        }

        let mut delivered = false;
        loop {
            tokio::select! {
                _ = close_rx.changed() => {
                    self.consumer = Some(consumer);
                    return SessionEnd::Closed;
                }
                result = shutdown.changed() => {
                    if result.is_err() || *shutdown.borrow() {
                        self.consumer = Some(consumer);
                        return SessionEnd::Closed;
                    }
                }
                received = consumer.recv() => match received {
                    Ok(record) => {
                        self.deliver(&consumer, &record).await;
                        delivered = true;
                    }
                    Err(error) if is_connection_loss(&error) => {
                        // the consumer is dropped; the reconnect loop builds
                        // a fresh one
                        return SessionEnd::LostConnection {
                            error: driver_error(error),
                            delivered,
                        };
                    }
                    Err(error) => {
                        self.context.report_error(&driver_error(error));
                    }
                }
            }
        }
    }

    /// Delivers one record to the subscription's handler and acknowledges it
    /// when the handler commits.
    async fn deliver(&self, consumer: &StreamConsumer, record: &BorrowedMessage<'_>) {
        if let Some(hook) = &self.config.consumer.on_received {
            hook(record);
        }

        let mut header = native_header(record);
        if self.group_mode {
            header.set(HEADER_CONSUMER_GROUP, self.context.group.clone());
        }
        let message = unmarshal_message(record);
        tracing::trace!(
            worker = self.worker_id,
            topic = record.topic(),
            partition = record.partition(),
            offset = record.offset(),
            id = %message.id,
            "record received"
        );

        let mut writer = self.context.event_writer();
        writer.replace_header(header.propagation());
        let event = Event {
            topic: record.topic().to_string(),
            header,
            message,
        };

        let committed = match self.context.handler() {
            Some(handler) => handler.serve(writer, event).await,
            None => false,
        };
        if committed {
            if let Err(error) = consumer.commit_message(record, CommitMode::Async) {
                self.context.report_error(&driver_error(error));
            }
        }
    }
}

fn driver_error(error: KafkaError) -> QuarkError {
    QuarkError::Driver(error.to_string())
}

/// Whether the failure means the cluster is unreachable, as opposed to a
/// per-record problem the session can skip over.
fn is_connection_loss(error: &KafkaError) -> bool {
    matches!(
        error.rdkafka_error_code(),
        Some(RDKafkaErrorCode::AllBrokersDown | RDKafkaErrorCode::BrokerTransportFailure)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_loss_classification() {
        let down = KafkaError::MessageConsumption(RDKafkaErrorCode::AllBrokersDown);
        assert!(is_connection_loss(&down));

        let unrelated = KafkaError::MessageConsumption(RDKafkaErrorCode::UnknownTopicOrPartition);
        assert!(!is_connection_loss(&unrelated));
    }
}
