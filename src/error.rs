//! Error types for the scrape-proxy crate.

use thiserror::Error;

/// Failures raised by a coordination store backend.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backend could not be reached or the operation timed out.
    #[error("store unavailable: {0}")]
    Unavailable(String),
    /// A stored record could not be decoded.
    #[error("corrupt store record at {key}: {reason}")]
    Corrupt { key: String, reason: String },
}

/// Errors surfaced by proxy selection and the retrying client.
#[derive(Debug, Error)]
pub enum Error {
    /// The target or proxy URL has no usable host.
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    /// A coordination store operation failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The underlying HTTP call failed before a response was obtained.
    #[error("transport error: {0}")]
    Transport(String),

    /// One attempt's response failed validation (bad status, wrong MIME,
    /// unparseable or empty body). Consumed by the retry loop.
    #[error("unsuccessful: {0}")]
    Unsuccessful(String),

    /// Proxy selection polled past the configured acquire timeout without any
    /// proxy gaining a free slot.
    #[error("no proxy slot became free within {waited_ms}ms")]
    AcquireTimeout { waited_ms: u128 },

    /// Terminal: every attempt failed. Carries each attempt's failure in order.
    #[error("all {} attempts failed: [{}]", .attempts.len(), .attempts.join(", "))]
    AllRetriesFailed { attempts: Vec<String> },
}
