//! Archive collaborator used by workers to fetch mementos.
//!
//! [`MementoFetcher`] is the seam between the Outcome Classifier and the web
//! archive. Production workers use [`WaybackClient`]; tests substitute fakes
//! that return scripted [`Memento`]s or [`FetchError`]s.

use crate::db::CdxRecordSpecimen;
use crate::retry::IsRetryable;

mod wayback;

pub use wayback::WaybackClient;

/// A page returned by the archive
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Memento {
    /// HTTP status the archive replayed
    pub status_code: u16,
    /// Whether the replayed status is a success
    pub ok: bool,
    /// Raw page content
    pub content: Vec<u8>,
    /// Content type header, when present
    pub mime_type: Option<String>,
}

impl Memento {
    /// Build a memento, deriving `ok` from the status code
    pub fn new(status_code: u16, content: Vec<u8>) -> Self {
        Self {
            status_code,
            ok: status_code < 400,
            content,
            mime_type: None,
        }
    }
}

/// Failure reported by the archive collaborator
#[derive(Clone, Debug, thiserror::Error)]
pub enum FetchError {
    /// The connection was reset by the peer; the task is worth re-running later
    #[error("connection reset: {0}")]
    ConnectionReset(String),

    /// The archive answered but could not play the memento back
    #[error("{0}")]
    Playback(String),

    /// The fetch did not finish within the soft time limit
    #[error("{0}")]
    SoftTimeLimit(String),

    /// The request timed out
    #[error("request timed out: {0}")]
    Timeout(String),

    /// The archive could not be reached
    #[error("connection failed: {0}")]
    Connect(String),

    /// The archive is overloaded or rate limiting (429, 502, 503, 504)
    #[error("archive unavailable: HTTP {0}")]
    Unavailable(u16),

    /// Any other transport failure
    #[error("http error: {0}")]
    Http(String),

    /// Anything else
    #[error("{0}")]
    Other(String),
}

impl FetchError {
    /// Classify a transport error raised by reqwest
    pub(crate) fn from_transport(e: reqwest::Error) -> Self {
        if is_connection_reset(&e) {
            FetchError::ConnectionReset(e.to_string())
        } else if e.is_timeout() {
            FetchError::Timeout(e.to_string())
        } else if e.is_connect() {
            FetchError::Connect(e.to_string())
        } else {
            FetchError::Http(e.to_string())
        }
    }
}

impl IsRetryable for FetchError {
    fn is_retryable(&self) -> bool {
        matches!(
            self,
            FetchError::ConnectionReset(_)
                | FetchError::Timeout(_)
                | FetchError::Connect(_)
                | FetchError::Unavailable(_)
        )
    }
}

fn is_connection_reset(e: &reqwest::Error) -> bool {
    let mut source: Option<&(dyn std::error::Error + 'static)> = Some(e);
    while let Some(err) = source {
        if let Some(io) = err.downcast_ref::<std::io::Error>()
            && io.kind() == std::io::ErrorKind::ConnectionReset
        {
            return true;
        }
        source = err.source();
    }
    false
}

/// Fetches the memento a CDX record points at
///
/// Implementations own their connection and rate-limiting state; one instance
/// is created per worker and reused for every task that worker runs.
#[async_trait::async_trait]
pub trait MementoFetcher: Send + Sync {
    /// Fetch the memento for `record`
    async fn fetch_memento(&self, record: &CdxRecordSpecimen) -> Result<Memento, FetchError>;
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memento_ok_follows_status() {
        assert!(Memento::new(200, Vec::new()).ok);
        assert!(Memento::new(302, Vec::new()).ok);
        assert!(!Memento::new(404, Vec::new()).ok);
        assert!(!Memento::new(500, Vec::new()).ok);
    }

    #[test]
    fn transient_errors_are_retryable() {
        assert!(FetchError::ConnectionReset("x".into()).is_retryable());
        assert!(FetchError::Timeout("x".into()).is_retryable());
        assert!(FetchError::Connect("x".into()).is_retryable());
        assert!(FetchError::Unavailable(503).is_retryable());

        assert!(!FetchError::Playback("x".into()).is_retryable());
        assert!(!FetchError::SoftTimeLimit("x".into()).is_retryable());
        assert!(!FetchError::Http("x".into()).is_retryable());
        assert!(!FetchError::Other("x".into()).is_retryable());
    }

    #[test]
    fn playback_message_is_passed_through() {
        let err = FetchError::Playback("blocked site".into());
        assert_eq!(err.to_string(), "blocked site");
    }
}
