//! The driver-backed send primitive.

use futures::future::BoxFuture;

use crate::errors::QuarkError;
use crate::message::Message;

/// Pushes messages into the event-driven ecosystem.
///
/// A publisher is synchronous from the caller's point of view: `publish`
/// resolves once the driver has accepted (or rejected) every message. A slow
/// publisher therefore throttles the calling handler, which applies
/// back-pressure upstream at the broker driver.
///
/// The trait returns boxed futures so publishers can live behind trait
/// objects shared between the broker and its event writers.
pub trait Publisher: Send + Sync {
    /// Publishes the given messages.
    ///
    /// # Errors
    ///
    /// Returns the driver's failure, or [`QuarkError::Multiple`] when several
    /// messages failed independently.
    fn publish<'a>(&'a self, messages: &'a [Message]) -> BoxFuture<'a, Result<(), QuarkError>>;
}
