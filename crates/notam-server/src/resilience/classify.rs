//! Error classification for the breaker and the retry policy
//!
//! Both classifiers walk the full `source()` chain, so a `DbError` wrapping a
//! `sqlx::Error` wrapping an `io::Error` is judged by its innermost cause.

use std::error::Error;
use std::io;

/// SQLSTATEs worth retrying: connection exceptions, serialization failure,
/// deadlock, too many connections, and server shutdown/startup states.
const RETRIABLE_SQLSTATES: &[&str] = &[
    "08000", "08001", "08003", "08004", "08006", "40001", "40P01", "53300", "57P01", "57P02",
    "57P03",
];

/// SQLSTATEs that describe a broken or unavailable connection
const CONNECTION_SQLSTATES: &[&str] = &[
    "08000", "08001", "08003", "08004", "08006", "53300", "57P01", "57P02", "57P03",
];

const CONNECTION_MESSAGES: &[&str] = &[
    "connection reset",
    "timed out",
    "timeout",
    "connection refused",
    "terminated unexpectedly",
];

/// Decides which failures count toward opening the circuit
pub trait FailureClassifier: Send + Sync {
    fn is_qualifying(&self, error: &(dyn Error + 'static)) -> bool;
}

/// Decides which failures are worth another attempt
pub trait RetryClassifier: Send + Sync {
    fn is_retriable(&self, error: &(dyn Error + 'static)) -> bool;
}

/// Default breaker classifier: connection failures and transient SQLSTATEs.
///
/// The guard records a failure only after retries are exhausted, so one
/// exhausted transient sequence counts once.
#[derive(Debug, Clone, Copy, Default)]
pub struct TransientFailures;

impl FailureClassifier for TransientFailures {
    fn is_qualifying(&self, error: &(dyn Error + 'static)) -> bool {
        is_retriable(error)
    }
}

/// Default retry classifier: connection failures and transient SQLSTATEs
#[derive(Debug, Clone, Copy, Default)]
pub struct TransientErrors;

impl RetryClassifier for TransientErrors {
    fn is_retriable(&self, error: &(dyn Error + 'static)) -> bool {
        is_retriable(error)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verdict {
    Connection,
    Transient,
    Permanent,
    Unknown,
}

fn chain<'a>(error: &'a (dyn Error + 'static)) -> impl Iterator<Item = &'a (dyn Error + 'static)> {
    std::iter::successors(Some(error), |e: &&'a (dyn Error + 'static)| (*e).source())
}

fn classify_sqlx(error: &sqlx::Error) -> Verdict {
    match error {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::Protocol(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => Verdict::Connection,
        sqlx::Error::Database(db) => match db.code() {
            Some(code) if code.starts_with("23") || code.starts_with("42") => Verdict::Permanent,
            Some(code) if CONNECTION_SQLSTATES.contains(&code.as_ref()) => Verdict::Connection,
            Some(code) if RETRIABLE_SQLSTATES.contains(&code.as_ref()) => Verdict::Transient,
            _ => Verdict::Permanent,
        },
        _ => Verdict::Unknown,
    }
}

fn classify_io(error: &io::Error) -> Verdict {
    match error.kind() {
        io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionRefused
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::NotConnected
        | io::ErrorKind::BrokenPipe
        | io::ErrorKind::TimedOut
        | io::ErrorKind::UnexpectedEof => Verdict::Connection,
        _ => Verdict::Unknown,
    }
}

fn classify(error: &(dyn Error + 'static)) -> Verdict {
    let mut message_match = false;

    for cause in chain(error) {
        let verdict = if let Some(e) = cause.downcast_ref::<sqlx::Error>() {
            classify_sqlx(e)
        } else if let Some(e) = cause.downcast_ref::<io::Error>() {
            classify_io(e)
        } else {
            Verdict::Unknown
        };

        if verdict != Verdict::Unknown {
            return verdict;
        }

        let text = cause.to_string().to_lowercase();
        message_match |= CONNECTION_MESSAGES.iter().any(|p| text.contains(p));
    }

    if message_match {
        Verdict::Connection
    } else {
        Verdict::Unknown
    }
}

/// True for reset / timeout / refused / terminated-unexpectedly failures
pub fn is_connection_error(error: &(dyn Error + 'static)) -> bool {
    classify(error) == Verdict::Connection
}

/// True for connection failures and enumerated transient driver codes.
/// Constraint violations, syntax errors and anything unrecognised are not.
pub fn is_retriable(error: &(dyn Error + 'static)) -> bool {
    matches!(classify(error), Verdict::Connection | Verdict::Transient)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::db::DbError;

    #[derive(Debug, thiserror::Error)]
    #[error("wrapped: {0}")]
    struct Wrapper(#[source] Box<dyn Error + Send + Sync>);

    #[test]
    fn test_io_errors_through_chain() {
        let err = DbError::Sqlx(sqlx::Error::Io(io::Error::from(io::ErrorKind::ConnectionReset)));
        assert!(is_connection_error(&err));
        assert!(is_retriable(&err));

        let nested = Wrapper(Box::new(io::Error::from(io::ErrorKind::TimedOut)));
        assert!(is_connection_error(&nested));
    }

    #[test]
    fn test_pool_timeout_is_connection_class() {
        let err = DbError::Sqlx(sqlx::Error::PoolTimedOut);
        assert!(is_connection_error(&err));
        assert!(is_retriable(&err));
    }

    #[test]
    fn test_business_errors_are_neither() {
        let err = DbError::not_found("Notice", "A1/25");
        assert!(!is_connection_error(&err));
        assert!(!is_retriable(&err));

        let err = DbError::Sqlx(sqlx::Error::RowNotFound);
        assert!(!is_retriable(&err));

        let err = DbError::Invalid(notam_common::Violation::Empty("location").into());
        assert!(!is_retriable(&err));
    }

    #[derive(Debug)]
    struct PgError(&'static str);

    impl std::fmt::Display for PgError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "database error {}", self.0)
        }
    }

    impl Error for PgError {}

    impl sqlx::error::DatabaseError for PgError {
        fn message(&self) -> &str {
            "database error"
        }

        fn code(&self) -> Option<std::borrow::Cow<'_, str>> {
            Some(std::borrow::Cow::Borrowed(self.0))
        }

        fn as_error(&self) -> &(dyn Error + Send + Sync + 'static) {
            self
        }

        fn as_error_mut(&mut self) -> &mut (dyn Error + Send + Sync + 'static) {
            self
        }

        fn into_error(self: Box<Self>) -> Box<dyn Error + Send + Sync + 'static> {
            self
        }

        fn kind(&self) -> sqlx::error::ErrorKind {
            sqlx::error::ErrorKind::Other
        }
    }

    fn sqlstate(code: &'static str) -> DbError {
        DbError::Sqlx(sqlx::Error::Database(Box::new(PgError(code))))
    }

    #[test]
    fn test_sqlstate_classes() {
        // Serialization failure and deadlock: retried and counted by the breaker
        for code in ["40001", "40P01"] {
            let err = sqlstate(code);
            assert!(is_retriable(&err), "{code}");
            assert!(!is_connection_error(&err), "{code}");
            assert!(TransientFailures.is_qualifying(&err), "{code}");
        }

        let err = sqlstate("57P01");
        assert!(is_connection_error(&err));
        assert!(TransientFailures.is_qualifying(&err));

        // Unique violation, undefined column, invalid byte sequence
        for code in ["23505", "42703", "22021"] {
            let err = sqlstate(code);
            assert!(!is_retriable(&err), "{code}");
            assert!(!TransientFailures.is_qualifying(&err), "{code}");
        }
    }

    #[test]
    fn test_message_fallback() {
        let err = io::Error::other("server closed the connection: terminated unexpectedly");
        assert!(is_connection_error(&err));

        let err = io::Error::other("disk full");
        assert!(!is_connection_error(&err));
    }
}
