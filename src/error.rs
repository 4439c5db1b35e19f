use std::time::Duration;

use rand::Rng;
use thiserror::Error;

pub type Result<T, E = EngineError> = std::result::Result<T, E>;

/// Error taxonomy for the dataset engine.
///
/// `NotFound` is special: callers surface it as an empty result
/// (`ok: true`, `meta.source = "empty"`), never as an error envelope.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("data error: {0}")]
    Data(String),
    #[error("transient: {0}")]
    Transient(String),
    #[error("internal: {0}")]
    Internal(String),
    #[error("cancelled")]
    Cancelled,
}

impl EngineError {
    /// Wire code used in error envelopes.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::InvalidInput(_) => "INVALID_INPUT",
            EngineError::NotFound(_) => "NOT_FOUND",
            EngineError::Data(_) => "DATA",
            EngineError::Transient(_) => "TRANSIENT",
            EngineError::Internal(_) => "INTERNAL",
            EngineError::Cancelled => "CANCELLED",
        }
    }

    /// Process exit code: 0 success, 64 usage, 65 data, 70 internal.
    pub fn exit_code(&self) -> i32 {
        match self {
            EngineError::InvalidInput(_) => 64,
            EngineError::Data(_) => 65,
            // Empty results are not failures at the process boundary.
            EngineError::NotFound(_) => 0,
            EngineError::Transient(_) | EngineError::Internal(_) | EngineError::Cancelled => 70,
        }
    }

    /// Short remediation hint for error envelopes.
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            EngineError::InvalidInput(_) => {
                Some("check the category, symbol, date and granularity arguments")
            }
            EngineError::NotFound(_) => Some("no partitions cover the requested range"),
            EngineError::Data(_) => Some("partition may be corrupt or its schema drifted"),
            EngineError::Transient(_) => Some("the database was busy; the request may be retried"),
            EngineError::Internal(_) => None,
            EngineError::Cancelled => Some("the batch was cancelled before completion"),
        }
    }
}

impl From<rusqlite::Error> for EngineError {
    fn from(e: rusqlite::Error) -> Self {
        match &e {
            rusqlite::Error::SqliteFailure(err, _)
                if matches!(
                    err.code,
                    rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
                ) =>
            {
                EngineError::Transient(e.to_string())
            }
            _ => EngineError::Internal(e.to_string()),
        }
    }
}

impl From<std::io::Error> for EngineError {
    fn from(e: std::io::Error) -> Self {
        EngineError::Internal(e.to_string())
    }
}

/// Number of local attempts for transient failures.
const RETRY_ATTEMPTS: u32 = 3;
/// Initial backoff; doubles per attempt, with up to 50% jitter on top.
const RETRY_BASE_DELAY: Duration = Duration::from_millis(10);

/// Run `f`, retrying `Transient` failures locally with exponential backoff.
///
/// Non-transient errors pass through untouched. If the operation is still
/// failing after the last attempt, the failure is surfaced as `Internal`.
pub fn with_retry<T, F>(op: &str, mut f: F) -> Result<T>
where
    F: FnMut() -> Result<T>,
{
    let mut delay = RETRY_BASE_DELAY;
    let mut last = String::new();
    for attempt in 1..=RETRY_ATTEMPTS {
        match f() {
            Ok(v) => return Ok(v),
            Err(EngineError::Transient(msg)) => {
                tracing::warn!(op, attempt, %msg, "transient failure, backing off");
                last = msg;
                if attempt < RETRY_ATTEMPTS {
                    let jitter = rand::rng().random_range(0..=delay.as_millis() as u64 / 2);
                    std::thread::sleep(delay + Duration::from_millis(jitter));
                    delay *= 2;
                }
            }
            Err(e) => return Err(e),
        }
    }
    Err(EngineError::Internal(format!(
        "{op}: still failing after {RETRY_ATTEMPTS} attempts: {last}"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_match_taxonomy() {
        assert_eq!(EngineError::InvalidInput("x".into()).exit_code(), 64);
        assert_eq!(EngineError::Data("x".into()).exit_code(), 65);
        assert_eq!(EngineError::Internal("x".into()).exit_code(), 70);
        assert_eq!(EngineError::NotFound("x".into()).exit_code(), 0);
    }

    #[test]
    fn codes_are_stable() {
        assert_eq!(EngineError::InvalidInput("x".into()).code(), "INVALID_INPUT");
        assert_eq!(EngineError::Data("x".into()).code(), "DATA");
        assert_eq!(EngineError::Cancelled.code(), "CANCELLED");
    }

    #[test]
    fn retry_passes_through_non_transient() {
        let mut calls = 0;
        let r: Result<()> = with_retry("t", || {
            calls += 1;
            Err(EngineError::InvalidInput("bad".into()))
        });
        assert!(matches!(r, Err(EngineError::InvalidInput(_))));
        assert_eq!(calls, 1);
    }

    #[test]
    fn retry_exhausts_to_internal() {
        let mut calls = 0;
        let r: Result<()> = with_retry("t", || {
            calls += 1;
            Err(EngineError::Transient("busy".into()))
        });
        assert!(matches!(r, Err(EngineError::Internal(_))));
        assert_eq!(calls, 3);
    }

    #[test]
    fn retry_recovers_after_transient() {
        let mut calls = 0;
        let r = with_retry("t", || {
            calls += 1;
            if calls < 2 {
                Err(EngineError::Transient("busy".into()))
            } else {
                Ok(42)
            }
        });
        assert_eq!(r.unwrap(), 42);
    }

    #[test]
    fn busy_sqlite_errors_map_to_transient() {
        let e = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            Some("database is locked".into()),
        );
        assert!(matches!(EngineError::from(e), EngineError::Transient(_)));
    }
}
