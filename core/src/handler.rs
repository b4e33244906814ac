//! The user-facing handler contract.

use std::sync::Arc;

use futures::future::BoxFuture;

use crate::header::Header;
use crate::message::Message;
use crate::writer::EventWriter;

/// Something that has happened, or was requested to happen, within the
/// event-driven ecosystem: a domain event or an asynchronous command.
#[derive(Debug, Clone)]
pub struct Event {
    /// Topic the record was consumed from.
    pub topic: String,
    /// Native record metadata plus the envelope headers.
    pub header: Header,
    /// The decoded envelope.
    pub message: Message,
}

/// Handles events coming from a subscription's topics.
///
/// The returned future resolves to the acknowledgement decision: `true`
/// commits the record at the source, `false` leaves it unacknowledged so the
/// broker's redelivery policy applies.
pub trait Handler: Send + Sync {
    /// Processes one event, publishing any responses through `writer`.
    fn serve_event(&self, writer: Box<dyn EventWriter>, event: Event) -> BoxFuture<'static, bool>;
}

/// Function form of [`Handler`].
pub type HandlerFunc =
    Arc<dyn Fn(Box<dyn EventWriter>, Event) -> BoxFuture<'static, bool> + Send + Sync>;

/// The handler slot of a subscription.
///
/// Storing both forms in one slot keeps the invariant that a subscription has
/// exactly one handler; setting either form replaces the other.
#[derive(Clone)]
pub enum HandlerKind {
    /// A handler implementation.
    Handler(Arc<dyn Handler>),
    /// A bare handler function.
    Func(HandlerFunc),
}

impl HandlerKind {
    /// Dispatches one event to whichever form is registered.
    pub fn serve(&self, writer: Box<dyn EventWriter>, event: Event) -> BoxFuture<'static, bool> {
        match self {
            HandlerKind::Handler(handler) => handler.serve_event(writer, event),
            HandlerKind::Func(func) => func(writer, event),
        }
    }
}

impl std::fmt::Debug for HandlerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HandlerKind::Handler(_) => f.write_str("HandlerKind::Handler"),
            HandlerKind::Func(_) => f.write_str("HandlerKind::Func"),
        }
    }
}
