//! # Quark Core
//!
//! Reliable event-driven mechanisms for reactive ecosystems.
//!
//! This crate turns subscription declarations into a supervised pool of
//! concurrent consumers on top of a pluggable message broker. Consuming from
//! a topic is blocking work, so the runtime fans processes out per
//! subscription to parallelize and isolate them; thread safety and graceful
//! shutdown are load-bearing parts of the design, not afterthoughts.
//!
//! Specific runtime data (event id, correlation id, span context,
//! redelivery count) travels in message headers in a flat binary-friendly
//! layout, so applications keep using their own payload encoding of choice
//! (JSON, Apache Avro, and so on).
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────┐
//! │            Broker            │  lifecycle, defaults, shutdown
//! └─────┬────────────────┬───────┘
//!       ▼                ▼
//! ┌───────────┐    ┌───────────┐
//! │Supervisor │    │Supervisor │     one per registered subscription
//! └─┬───┬───┬─┘    └───────────┘
//!   ▼   ▼   ▼
//! ┌───┐┌───┐┌───┐
//! │ W ││ W ││ W │                    pool of driver-specific workers
//! └─┬─┘└───┘└───┘
//!   │ record
//!   ▼
//! ┌─────────┐   EventWriter   ┌───────────┐
//! │ handler ├────────────────►│ Publisher │
//! └─────────┘                 └───────────┘
//! ```
//!
//! The core compiles with zero knowledge of any particular broker driver:
//! drivers plug in through the [`Worker`]/[`WorkerFactory`]/[`Publisher`]
//! contract. Handlers receive a CloudEvents-v1.0-compatible [`Message`] and
//! an [`EventWriter`] to respond, fan out or route failures to retry and
//! dead-letter topics.
//!
//! Configuration is layered: a value set on a [`Consumer`] wins over the
//! broker-wide default, which wins over the runtime constant.

pub mod broker;
pub mod consumer;
pub mod errors;
pub mod handler;
pub mod header;
pub mod id;
pub mod message;
pub mod mux;
pub mod publisher;
pub mod retry;
pub mod supervisor;
pub mod topics;
pub mod worker;
pub mod writer;

pub use broker::{Broker, BrokerBuilder};
pub use consumer::Consumer;
pub use errors::{ErrorHandler, QuarkError};
pub use handler::{Event, Handler, HandlerFunc, HandlerKind};
pub use header::Header;
pub use id::{IdFactory, default_id_factory};
pub use message::{Message, MessageMetadata, SPEC_VERSION};
pub use mux::{EventMux, SubscriptionBuilder};
pub use publisher::Publisher;
pub use retry::Backoff;
pub use supervisor::{EventWriterFactory, Supervisor, SupervisorContext};
pub use worker::{ReconnectPolicy, SessionEnd, Worker, WorkerFactory, run_with_reconnect};
pub use writer::{DefaultEventWriter, EventWriter, WriterDefaults};
