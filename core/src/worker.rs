//! The worker contract and the shared reconnection loop.

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;

use crate::errors::{ErrorHandler, QuarkError};
use crate::supervisor::SupervisorContext;

/// A unit of work of a subscription.
///
/// A worker owns one live broker connection and the background task draining
/// it. Workers are built by a [`WorkerFactory`], so the core compiles with
/// zero knowledge of any particular driver.
pub trait Worker: Send {
    /// Injects the worker's sequential id within its pool.
    fn set_id(&mut self, id: usize);

    /// Opens the broker connection and spawns the consume loop.
    ///
    /// Connection and configuration failures surface here synchronously;
    /// everything after a successful start is reported through the error
    /// handler instead.
    fn start_job(&mut self) -> BoxFuture<'_, Result<(), QuarkError>>;

    /// Stops the consume loop and closes every live connection the worker
    /// owns. Safe to call more than once.
    fn close(&mut self) -> BoxFuture<'_, Result<(), QuarkError>>;
}

/// Generates the driver-specific workers a supervisor schedules.
///
/// Returning `None` means no worker can be built for the subscription, which
/// the supervisor records as a provider failure.
pub type WorkerFactory =
    Arc<dyn Fn(Arc<SupervisorContext>) -> Option<Box<dyn Worker>> + Send + Sync>;

/// Bounded-retry policy for a worker's broker connection.
#[derive(Debug, Clone, Copy)]
pub struct ReconnectPolicy {
    /// Reconnection attempts after the initial connection.
    pub max_retries: u32,
    /// Base wait before a reconnection; scaled linearly by the attempt
    /// number.
    pub backoff: Duration,
}

/// How one consuming session ended.
pub enum SessionEnd {
    /// The session was closed on purpose; the worker is done.
    Closed,
    /// The connection was lost and the session may be retried.
    LostConnection {
        /// The driver failure that ended the session.
        error: QuarkError,
        /// Whether the session delivered at least one record. Sustained
        /// consumption is what resets the retry counter; a session that
        /// reconnects and immediately drops again keeps burning budget.
        delivered: bool,
    },
    /// The session failed in a way that retrying cannot fix.
    Fatal(QuarkError),
}

/// Drives consuming sessions under a bounded reconnection budget.
///
/// `session` is called with the current attempt number. On a lost connection
/// the loop sleeps `backoff * attempt` and retries while
/// `attempt <= max_retries`; on exhaustion or a fatal end the error is
/// reported to `error_handler` exactly once and the loop terminates. The
/// session state is threaded through by value so sessions can own their
/// driver handles.
pub async fn run_with_reconnect<S, F, Fut>(
    policy: ReconnectPolicy,
    mut state: S,
    mut session: F,
    error_handler: Option<&ErrorHandler>,
) -> S
where
    F: FnMut(S, u32) -> Fut,
    Fut: Future<Output = (S, SessionEnd)>,
{
    let mut attempt: u32 = 0;
    loop {
        let (next, end) = session(state, attempt).await;
        state = next;
        match end {
            SessionEnd::Closed => return state,
            SessionEnd::LostConnection { error, delivered } => {
                if delivered {
                    attempt = 0;
                }
                attempt += 1;
                if attempt > policy.max_retries {
                    report(error_handler, &error);
                    return state;
                }
                tracing::warn!(
                    attempt,
                    error = %error,
                    "connection lost, reconnecting"
                );
                tokio::time::sleep(policy.backoff.saturating_mul(attempt)).await;
            }
            SessionEnd::Fatal(error) => {
                report(error_handler, &error);
                return state;
            }
        }
    }
}

fn report(error_handler: Option<&ErrorHandler>, error: &QuarkError) {
    match error_handler {
        Some(handler) => handler(error),
        None => tracing::error!(error = %error, "worker terminated"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::Instant;

    fn lost(delivered: bool) -> SessionEnd {
        SessionEnd::LostConnection {
            error: QuarkError::Driver("out of brokers".to_string()),
            delivered,
        }
    }

    #[tokio::test]
    async fn exhausted_budget_reports_once_and_terminates() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let reported = Arc::new(Mutex::new(Vec::new()));
        let reported_clone = Arc::clone(&reported);
        let handler: ErrorHandler = Arc::new(move |error| {
            reported_clone
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .push(error.to_string());
        });

        let policy = ReconnectPolicy {
            max_retries: 3,
            backoff: Duration::from_millis(10),
        };
        let started = Instant::now();
        let counter = Arc::clone(&attempts);
        run_with_reconnect(
            policy,
            (),
            move |state, _attempt| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    (state, lost(false))
                }
            },
            Some(&handler),
        )
        .await;

        // initial connection plus three retries
        assert_eq!(attempts.load(Ordering::SeqCst), 4);
        // cumulative sleep of 10 + 20 + 30 ms
        assert!(started.elapsed() >= Duration::from_millis(60));
        let reports = reported
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone();
        assert_eq!(reports.len(), 1);
    }

    #[tokio::test]
    async fn sustained_consumption_resets_the_budget() {
        let policy = ReconnectPolicy {
            max_retries: 1,
            backoff: Duration::from_millis(1),
        };
        // every session delivers a record before losing the connection, so
        // the budget resets each round and the loop only ends when closed
        let calls = run_with_reconnect(
            policy,
            0u32,
            |calls, attempt| async move {
                assert!(attempt <= 1);
                if calls == 5 {
                    (calls, SessionEnd::Closed)
                } else {
                    (calls + 1, lost(true))
                }
            },
            None,
        )
        .await;
        assert_eq!(calls, 5);
    }

    #[tokio::test]
    async fn fatal_errors_do_not_retry() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&attempts);
        run_with_reconnect(
            ReconnectPolicy {
                max_retries: 5,
                backoff: Duration::from_millis(1),
            },
            (),
            move |state, _attempt| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    (
                        state,
                        SessionEnd::Fatal(QuarkError::Driver("bad config".to_string())),
                    )
                }
            },
            None,
        )
        .await;
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
