//! Error types shared across the runtime.

use thiserror::Error;

/// Errors produced by brokers, supervisors, workers and event writers.
#[derive(Error, Debug)]
pub enum QuarkError {
    /// Serve was requested after the broker observed a shutdown.
    #[error("broker is closed")]
    BrokerClosed,

    /// No worker could be constructed for a subscription.
    #[error("no worker could be built for topic(s) '{topics}'")]
    ProviderNotValid {
        /// Comma-joined topics of the affected subscription
        topics: String,
    },

    /// An outbound call was made without a configured publisher.
    #[error("publisher is not implemented")]
    PublisherNotImplemented,

    /// A write or a subscription carried zero topics.
    #[error("not enough topics")]
    NotEnoughTopics,

    /// A subscription declared no handler.
    #[error("not enough handlers")]
    NotEnoughHandlers,

    /// A write carried zero messages.
    #[error("message is empty")]
    EmptyMessage,

    /// A subscription resolved to zero broker addresses.
    #[error("cluster is empty")]
    EmptyCluster,

    /// The driver requires an explicit consumer group and none was provided.
    #[error("consumer group is required")]
    RequiredGroup,

    /// Publication was refused because the message passed its redelivery cap.
    #[error("message has been redelivered too much")]
    MessageRedeliveredTooMuch,

    /// A fan-out write partially failed.
    #[error("{published} message(s) published, {} write(s) failed", .errors.len())]
    WriteFailed {
        /// Messages successfully handed to the publisher
        published: usize,
        /// The per-topic failures
        errors: Vec<QuarkError>,
    },

    /// Several independent operations failed.
    #[error("{} operation(s) failed", .errors.len())]
    Multiple {
        /// The collected failures
        errors: Vec<QuarkError>,
    },

    /// The shutdown drain window elapsed before every supervisor terminated.
    #[error("shutdown deadline exceeded")]
    ShutdownTimeout,

    /// An error surfaced by the broker driver.
    #[error("driver error: {0}")]
    Driver(String),
}

impl QuarkError {
    /// Folds a list of failures into a single result.
    ///
    /// An empty list is a success, a single failure is returned as-is and
    /// anything else becomes [`QuarkError::Multiple`].
    pub fn collect(mut errors: Vec<QuarkError>) -> Result<(), QuarkError> {
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(QuarkError::Multiple { errors }),
        }
    }
}

/// Hook invoked with every asynchronous runtime error.
///
/// Driver errors observed mid-run are forwarded here instead of terminating
/// the process. The hook must be cheap; it runs on the worker's task.
pub type ErrorHandler = std::sync::Arc<dyn Fn(&QuarkError) + Send + Sync>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collect_empty_is_ok() {
        assert!(QuarkError::collect(Vec::new()).is_ok());
    }

    #[test]
    fn collect_single_returns_the_error() {
        let result = QuarkError::collect(vec![QuarkError::EmptyCluster]);
        assert!(matches!(result, Err(QuarkError::EmptyCluster)));
    }

    #[test]
    fn collect_many_wraps_into_multiple() {
        let result = QuarkError::collect(vec![
            QuarkError::NotEnoughTopics,
            QuarkError::NotEnoughHandlers,
        ]);
        assert!(matches!(
            result,
            Err(QuarkError::Multiple { errors }) if errors.len() == 2
        ));
    }
}
