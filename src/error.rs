//! Error type shared by the whole crate.
use std::sync::Arc;

use thiserror::Error;

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while synchronizing flag data.
///
/// Flag evaluation itself never fails with an `Error`. Evaluation problems are reported through
/// [`Reason::Error`](crate::Reason::Error) and the caller's default value is returned instead.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum Error {
    /// Invalid base URL configuration.
    #[error("invalid base_url configuration")]
    InvalidBaseUrl(#[source] url::ParseError),

    /// The request was rejected, the mobile key is likely invalid.
    #[error("unauthorized, mobile_key is likely invalid")]
    Unauthorized,

    /// The server answered with a non-success status code.
    #[error("unexpected response status: {0}")]
    UnexpectedStatus(u16),

    /// Network error.
    #[error(transparent)]
    // reqwest::Error is not clonable, so we're wrapping it in an Arc.
    Network(Arc<reqwest::Error>),

    /// Flag payload (or persisted snapshot) could not be decoded.
    #[error("malformed flag payload")]
    MalformedPayload(#[source] Arc<serde_json::Error>),

    /// Storage backend failed to persist data.
    #[error("storage error: {0}")]
    Storage(String),

    /// Indicates that the poller thread panicked. This should normally never happen.
    #[error("poller thread panicked")]
    PollerThreadPanicked,
}

impl Error {
    /// Returns `true` if retrying the same request can never succeed.
    pub fn is_unrecoverable(&self) -> bool {
        matches!(self, Error::Unauthorized | Error::InvalidBaseUrl(_))
    }
}

impl From<reqwest::Error> for Error {
    fn from(value: reqwest::Error) -> Self {
        Error::Network(Arc::new(value.without_url()))
    }
}

impl From<serde_json::Error> for Error {
    fn from(value: serde_json::Error) -> Self {
        Error::MalformedPayload(Arc::new(value))
    }
}
