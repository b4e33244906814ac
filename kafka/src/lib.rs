//! # Quark Kafka
//!
//! Apache Kafka driver for the quark event consumption runtime.
//!
//! The crate plugs into `quark-core` through its worker and publisher
//! contracts: [`kafka_worker_factory`] supplies the consuming side and
//! [`KafkaPublisher`] the producing side, with the envelope travelling in
//! record headers under the `quark-*` namespace. Nothing in the core knows
//! this crate exists.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use quark_kafka::{KafkaConfiguration, kafka_broker};
//!
//! # async fn example() -> Result<(), quark_core::QuarkError> {
//! let cluster = vec!["localhost:9092".to_string()];
//! let broker = kafka_broker(KafkaConfiguration::default(), &cluster)?;
//!
//! broker
//!     .topic("chat.0")
//!     .group("chat-workers")
//!     .pool_size(3)
//!     .handle_fn(|mut writer, event| {
//!         Box::pin(async move {
//!             let replied = writer.write(&event.message.data, &["chat.1"]).await;
//!             replied.is_ok()
//!         })
//!     });
//!
//! broker.listen_and_serve().await
//! # }
//! ```

pub mod config;
pub mod headers;
pub mod marshal;
pub mod publisher;
pub mod worker;

use std::sync::Arc;

use quark_core::{Broker, QuarkError};

pub use config::{KafkaConfiguration, KafkaConsumerConfig, KafkaProducerConfig};
pub use publisher::KafkaPublisher;
pub use worker::kafka_worker_factory;

/// Builds a [`Broker`] pre-wired with the Kafka worker factory and
/// publisher.
///
/// # Errors
///
/// [`QuarkError::Driver`] when the publisher cannot be created.
pub fn kafka_broker(config: KafkaConfiguration, cluster: &[String]) -> Result<Broker, QuarkError> {
    let publisher = Arc::new(KafkaPublisher::new(config.clone(), cluster)?);
    Ok(Broker::builder()
        .cluster(cluster.to_vec())
        .publisher(publisher)
        .worker_factory(kafka_worker_factory(config))
        .build())
}
