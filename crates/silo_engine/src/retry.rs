//! Bounded retry for backend operations.
//!
//! Only connection-level faults retry; application errors, constraint
//! violations and authentication failures surface after one attempt.
//! Back-off is exponential with full jitter: each sleep is drawn
//! uniformly from `[0, backoff]`, which avoids retry storms when many
//! handlers hit the same dead backend at once.

use std::future::Future;
use std::io::ErrorKind as IoErrorKind;
use std::time::{Duration, Instant};

use rand::Rng;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy)]
pub struct RetryOptions {
    /// Overall deadline across all attempts.
    pub timeout: Duration,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(15),
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Error)]
pub enum RetryError {
    /// Non-retryable error, surfaced from the single attempt made.
    #[error("{source}")]
    Op {
        #[source]
        source: sqlx::Error,
    },
    /// Connection faults persisted past the deadline.
    #[error("db operation failed after {attempts} attempts within {timeout:?}: {source}")]
    Exhausted {
        attempts: u32,
        timeout: Duration,
        #[source]
        source: sqlx::Error,
    },
    /// The caller cancelled during a back-off sleep.
    #[error("operation cancelled during retry back-off")]
    Cancelled,
}

impl RetryError {
    /// The underlying driver error, when one exists.
    pub fn source_err(&self) -> Option<&sqlx::Error> {
        match self {
            RetryError::Op { source } | RetryError::Exhausted { source, .. } => Some(source),
            RetryError::Cancelled => None,
        }
    }
}

/// Run `op`, retrying connection faults with capped exponential
/// back-off and full jitter until `opts.timeout` elapses. The sleep is
/// cancellable through `cancel`.
pub async fn with_retry<T, F, Fut>(
    opts: &RetryOptions,
    cancel: &CancellationToken,
    mut op: F,
) -> Result<T, RetryError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, sqlx::Error>>,
{
    let deadline = Instant::now() + opts.timeout;
    let mut attempt: u32 = 0;

    loop {
        attempt += 1;
        let err = match op().await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        if !is_conn_error(&err) {
            return Err(RetryError::Op { source: err });
        }
        if Instant::now() > deadline {
            return Err(RetryError::Exhausted {
                attempts: attempt,
                timeout: opts.timeout,
                source: err,
            });
        }

        let cap = backoff_for_attempt(opts, attempt);
        let sleep =
            Duration::from_millis(rand::thread_rng().gen_range(0..=cap.as_millis() as u64));
        tracing::warn!(
            attempt,
            delay_ms = sleep.as_millis() as u64,
            error = %err,
            "database connection error, retrying"
        );

        tokio::select! {
            _ = cancel.cancelled() => return Err(RetryError::Cancelled),
            _ = tokio::time::sleep(sleep) => {}
        }
    }
}

/// Exponential back-off cap for one attempt. The shift is bounded so
/// the multiplier cannot overflow on long outages.
fn backoff_for_attempt(opts: &RetryOptions, attempt: u32) -> Duration {
    let exp = attempt.saturating_sub(1).min(10);
    opts.initial_backoff
        .saturating_mul(1u32 << exp)
        .min(opts.max_backoff)
}

/// Message substrings that mark a connection fault regardless of the
/// error's shape.
const CONN_ERROR_MARKERS: &[&str] = &[
    "broken pipe",
    "connection reset by peer",
    "read: connection reset",
    "write: connection reset",
    "write: broken pipe",
    "no such host",
    "i/o timeout",
    "server has gone away",
    "lost connection to mysql server",
    "bad connection",
];

/// MySQL error numbers that indicate a dead or dying connection.
const CONN_ERROR_NUMBERS: &[u16] = &[
    1042, // can't get hostname for your address
    1047, // unknown command
    2006, // server has gone away
    2013, // lost connection during query
    2055, // lost connection, system error
];

/// Classify a driver error as a connection fault.
pub fn is_conn_error(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Io(io) => matches!(
            io.kind(),
            IoErrorKind::BrokenPipe
                | IoErrorKind::ConnectionReset
                | IoErrorKind::ConnectionRefused
                | IoErrorKind::ConnectionAborted
                | IoErrorKind::NotConnected
                | IoErrorKind::TimedOut
                | IoErrorKind::UnexpectedEof
        ),
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => true,
        sqlx::Error::Tls(_) => true,
        sqlx::Error::Database(db) => {
            if let Some(mysql) = db.try_downcast_ref::<sqlx::mysql::MySqlDatabaseError>() {
                if CONN_ERROR_NUMBERS.contains(&mysql.number()) {
                    return true;
                }
            }
            message_matches(&db.to_string())
        }
        other => message_matches(&other.to_string()),
    }
}

fn message_matches(message: &str) -> bool {
    let lowered = message.to_lowercase();
    CONN_ERROR_MARKERS.iter().any(|m| lowered.contains(m))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn io_err(kind: IoErrorKind, msg: &str) -> sqlx::Error {
        sqlx::Error::Io(std::io::Error::new(kind, msg.to_string()))
    }

    fn fast_opts() -> RetryOptions {
        RetryOptions {
            timeout: Duration::from_millis(40),
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(2),
        }
    }

    #[test]
    fn io_faults_classify_as_connection_errors() {
        assert!(is_conn_error(&io_err(IoErrorKind::BrokenPipe, "broken pipe")));
        assert!(is_conn_error(&io_err(
            IoErrorKind::ConnectionReset,
            "connection reset by peer"
        )));
        assert!(is_conn_error(&sqlx::Error::PoolTimedOut));
    }

    #[test]
    fn logical_errors_are_not_connection_errors() {
        assert!(!is_conn_error(&sqlx::Error::RowNotFound));
        assert!(!is_conn_error(&sqlx::Error::Protocol(
            "unexpected packet".into()
        )));
    }

    #[test]
    fn message_fallback_catches_known_markers() {
        assert!(message_matches("MySQL server has gone away"));
        assert!(message_matches("driver: bad connection"));
        assert!(!message_matches("Duplicate entry '1' for key 'PRIMARY'"));
    }

    #[test]
    fn backoff_grows_then_caps() {
        let opts = RetryOptions {
            timeout: Duration::from_secs(15),
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(2),
        };
        assert_eq!(backoff_for_attempt(&opts, 1), Duration::from_millis(200));
        assert_eq!(backoff_for_attempt(&opts, 2), Duration::from_millis(400));
        assert_eq!(backoff_for_attempt(&opts, 5), Duration::from_secs(2));
        // Far past the shift cap; must not overflow.
        assert_eq!(backoff_for_attempt(&opts, 1_000), Duration::from_secs(2));
    }

    #[tokio::test]
    async fn non_connection_error_makes_exactly_one_attempt() {
        let attempts = AtomicU32::new(0);
        let result: Result<(), _> = with_retry(&fast_opts(), &CancellationToken::new(), || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(sqlx::Error::RowNotFound) }
        })
        .await;

        assert!(matches!(result, Err(RetryError::Op { .. })));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn connection_error_retries_until_deadline() {
        let attempts = AtomicU32::new(0);
        let result: Result<(), _> = with_retry(&fast_opts(), &CancellationToken::new(), || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(io_err(IoErrorKind::ConnectionReset, "connection reset by peer")) }
        })
        .await;

        match result {
            Err(RetryError::Exhausted {
                attempts: reported, ..
            }) => {
                assert!(reported >= 2, "expected multiple attempts, got {reported}");
                assert_eq!(reported, attempts.load(Ordering::SeqCst));
            }
            other => panic!("expected Exhausted, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn success_after_transient_fault_returns_value() {
        let attempts = AtomicU32::new(0);
        let result = with_retry(&fast_opts(), &CancellationToken::new(), || {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(io_err(IoErrorKind::BrokenPipe, "broken pipe"))
                } else {
                    Ok(99u32)
                }
            }
        })
        .await;

        assert_eq!(result.expect("second attempt succeeds"), 99);
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn cancellation_aborts_the_backoff_sleep() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let opts = RetryOptions {
            timeout: Duration::from_secs(15),
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(2),
        };

        let started = Instant::now();
        let result: Result<(), _> = with_retry(&opts, &cancel, || async {
            Err(io_err(IoErrorKind::BrokenPipe, "broken pipe"))
        })
        .await;

        assert!(matches!(result, Err(RetryError::Cancelled)));
        assert!(
            started.elapsed() < Duration::from_secs(1),
            "cancelled back-off must not run out the full sleep"
        );
    }
}
