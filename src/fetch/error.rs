//! Error types for the fetch module.
//!
//! A [`FetchError`] is what the crawl loop sees after the fetcher has
//! already spent its internal retries. The variants map one-to-one onto the
//! loop's reactions: skip, back off, or count a failed sub-resource.

use std::time::Duration;

use thiserror::Error;

use crate::sink::SinkError;

/// Outcome of a fetch that did not produce a usable response.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The resource does not exist (HTTP 404/410 or an empty listing).
    ///
    /// Not a failure: the index simply has nothing to offer.
    #[error("not found: {url}")]
    NotFound {
        /// The URL that was requested.
        url: String,
    },

    /// The server is rate limiting us (HTTP 429/503 or repeated connection failures).
    #[error("throttled by server fetching {url}")]
    Throttled {
        /// The URL that was requested.
        url: String,
        /// HTTP status, absent when throttling was inferred from connection failures.
        status: Option<u16>,
        /// Server-requested delay from the Retry-After header, when present.
        retry_after: Option<Duration>,
    },

    /// Transient failures persisted through every retry attempt.
    #[error("giving up on {url} after {attempts} attempts: {message}")]
    Transient {
        /// The URL that was requested.
        url: String,
        /// Number of attempts made.
        attempts: u32,
        /// Description of the last failure.
        message: String,
    },

    /// Permanent HTTP error (4xx other than 404/408/410/429).
    #[error("HTTP {status} fetching {url}")]
    Http {
        /// The URL that was requested.
        url: String,
        /// The HTTP status code.
        status: u16,
    },

    /// A download was redirected off the accepted hosts.
    #[error("{url} redirected off the preferred domain to {final_url}")]
    ForeignRedirect {
        /// The URL that was requested.
        url: String,
        /// Where the redirects ended.
        final_url: String,
    },

    /// A document response carried no bytes.
    #[error("empty response body from {url}")]
    EmptyBody {
        /// The URL that was requested.
        url: String,
    },

    /// The downloaded body could not be stored.
    #[error("failed to store {url}: {source}")]
    Storage {
        /// The URL that was requested.
        url: String,
        /// The underlying sink failure.
        #[source]
        source: SinkError,
    },

    /// The URL could not be parsed or built.
    #[error("invalid URL: {url}")]
    InvalidUrl {
        /// The invalid URL string.
        url: String,
    },
}

impl FetchError {
    /// Creates a not-found error.
    pub fn not_found(url: impl Into<String>) -> Self {
        Self::NotFound { url: url.into() }
    }

    /// Creates a throttled error.
    pub fn throttled(
        url: impl Into<String>,
        status: Option<u16>,
        retry_after: Option<Duration>,
    ) -> Self {
        Self::Throttled {
            url: url.into(),
            status,
            retry_after,
        }
    }

    /// Creates a transient error after exhausted retries.
    pub fn transient(url: impl Into<String>, attempts: u32, message: impl Into<String>) -> Self {
        Self::Transient {
            url: url.into(),
            attempts,
            message: message.into(),
        }
    }

    /// Creates a permanent HTTP status error.
    pub fn http(url: impl Into<String>, status: u16) -> Self {
        Self::Http {
            url: url.into(),
            status,
        }
    }

    /// Creates an invalid URL error.
    pub fn invalid_url(url: impl Into<String>) -> Self {
        Self::InvalidUrl { url: url.into() }
    }

    /// Returns true for the throttling signal.
    #[must_use]
    pub fn is_throttled(&self) -> bool {
        matches!(self, Self::Throttled { .. })
    }

    /// Returns the server-requested delay carried by a throttling error.
    #[must_use]
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Throttled { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}
