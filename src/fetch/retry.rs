//! Retry logic with exponential backoff for transient fetch failures.
//!
//! Each failed HTTP attempt is described by an [`AttemptError`] and
//! classified into a [`FailureType`]. Only [`FailureType::Transient`]
//! failures are retried inside the fetcher; everything else is surfaced to
//! the crawl loop right away because it needs a different reaction
//! (skip the index, or back off as a whole).
//!
//! # Example
//!
//! ```
//! use crawler_core::fetch::{FailureType, RetryDecision, RetryPolicy};
//!
//! let policy = RetryPolicy::default();
//! match policy.should_retry(FailureType::Transient, 1) {
//!     RetryDecision::Retry { delay, attempt } => {
//!         println!("Retrying in {:?} (attempt {})", delay, attempt);
//!     }
//!     RetryDecision::DoNotRetry { reason } => {
//!         println!("Not retrying: {}", reason);
//!     }
//! }
//! ```

use std::time::Duration;

use rand::Rng;
use thiserror::Error;
use tracing::{debug, instrument};
use url::Url;

use crate::sink::SinkError;

/// Default maximum attempts per request, including the first one.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default base delay for exponential backoff (1 second).
const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);

/// Default maximum delay cap (32 seconds).
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(32);

/// Default backoff multiplier (doubles each attempt).
const DEFAULT_BACKOFF_MULTIPLIER: f32 = 2.0;

/// Maximum jitter added to delays (500ms), further bounded by the base delay.
const MAX_JITTER: Duration = Duration::from_millis(500);

/// Classification of a single failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureType {
    /// Temporary failure that may succeed on retry.
    ///
    /// Examples: timeout, connection reset, 5xx server errors, truncated body.
    Transient,

    /// Permanent failure that won't succeed regardless of retries.
    Permanent,

    /// The resource is absent (404, 410).
    NotFound,

    /// Server rate limiting (429, 503).
    RateLimited,
}

/// What went wrong on one HTTP attempt, before retry decisions are made.
#[derive(Debug, Error)]
pub enum AttemptError {
    /// Non-success HTTP status.
    #[error("HTTP {status}")]
    Status {
        /// The HTTP status code.
        status: u16,
        /// Raw Retry-After header value, if present.
        retry_after: Option<String>,
    },

    /// The request or body read timed out.
    #[error("request timed out")]
    Timeout,

    /// The connection could not be established.
    #[error("connection failed: {0}")]
    Connect(String),

    /// Any other transport failure, including a body cut off mid-stream.
    #[error("network error: {0}")]
    Network(String),

    /// Redirects ended on a URL the caller does not accept.
    #[error("redirected to {0}")]
    Redirected(Url),

    /// A document response carried no bytes.
    #[error("empty response body")]
    EmptyBody,

    /// The body could not be stored.
    #[error(transparent)]
    Storage(#[from] SinkError),
}

impl AttemptError {
    /// Maps a reqwest error onto the attempt taxonomy.
    pub(crate) fn from_reqwest(error: &reqwest::Error) -> Self {
        if error.is_timeout() {
            Self::Timeout
        } else if error.is_connect() {
            Self::Connect(error.to_string())
        } else {
            Self::Network(error.to_string())
        }
    }

    /// Returns true for connection-level failures.
    #[must_use]
    pub fn is_connect(&self) -> bool {
        matches!(self, Self::Connect(_))
    }
}

/// Decision on whether to retry a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after the specified delay.
    Retry {
        /// How long to wait before retrying.
        delay: Duration,
        /// Which attempt number this will be (first retry is attempt 2).
        attempt: u32,
    },

    /// Do not retry.
    DoNotRetry {
        /// Human-readable reason why retry is not attempted.
        reason: String,
    },
}

/// Configuration for retry behavior with exponential backoff.
///
/// # Delay Calculation
///
/// ```text
/// delay = min(base_delay * multiplier^(attempt-1), max_delay) + jitter
/// ```
///
/// With defaults, delays are approximately: 1s, 2s, 4s.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the initial attempt).
    max_attempts: u32,

    /// Base delay for the first retry.
    base_delay: Duration,

    /// Maximum delay cap.
    max_delay: Duration,

    /// Multiplier applied each attempt.
    backoff_multiplier: f32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_RETRIES,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
        }
    }
}

impl RetryPolicy {
    /// Creates a new retry policy with custom settings.
    ///
    /// `max_attempts` is clamped to at least 1.
    #[must_use]
    pub fn new(
        max_attempts: u32,
        base_delay: Duration,
        max_delay: Duration,
        backoff_multiplier: f32,
    ) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
            backoff_multiplier,
        }
    }

    /// Creates a policy with a custom `max_attempts`, using defaults for other settings.
    #[must_use]
    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Self::default()
        }
    }

    /// Returns the maximum number of attempts configured.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Determines whether to retry after attempt number `attempt` (1-indexed) failed.
    #[instrument(skip(self), fields(max_attempts = self.max_attempts))]
    pub fn should_retry(&self, failure_type: FailureType, attempt: u32) -> RetryDecision {
        match failure_type {
            FailureType::Permanent => {
                return RetryDecision::DoNotRetry {
                    reason: "permanent failure - retry would not help".to_string(),
                };
            }
            FailureType::NotFound => {
                return RetryDecision::DoNotRetry {
                    reason: "resource not found".to_string(),
                };
            }
            FailureType::RateLimited => {
                return RetryDecision::DoNotRetry {
                    reason: "rate limited - handled by crawl backoff".to_string(),
                };
            }
            FailureType::Transient => {}
        }

        if attempt >= self.max_attempts {
            debug!(attempt, max = self.max_attempts, "max attempts reached");
            return RetryDecision::DoNotRetry {
                reason: format!("max attempts ({}) exhausted", self.max_attempts),
            };
        }

        let delay = self.calculate_delay(attempt);

        debug!(
            attempt,
            next_attempt = attempt + 1,
            delay_ms = delay.as_millis(),
            "will retry"
        );

        RetryDecision::Retry {
            delay,
            attempt: attempt + 1,
        }
    }

    /// Formula: `min(base_delay * multiplier^(attempt-1), max_delay) + jitter`
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    fn calculate_delay(&self, attempt: u32) -> Duration {
        let base_ms = self.base_delay.as_millis() as f64;
        let multiplier = f64::from(self.backoff_multiplier);

        let exponent = f64::from(attempt.saturating_sub(1));
        let delay_ms = base_ms * multiplier.powf(exponent);
        let capped_ms = delay_ms.min(self.max_delay.as_millis() as f64);

        Duration::from_millis(capped_ms as u64) + self.calculate_jitter()
    }

    /// Random jitter between 0 and `min(MAX_JITTER, base_delay)`.
    #[allow(clippy::cast_possible_truncation)]
    fn calculate_jitter(&self) -> Duration {
        let bound = MAX_JITTER.min(self.base_delay).as_millis() as u64;
        if bound == 0 {
            return Duration::ZERO;
        }
        let mut rng = rand::thread_rng();
        Duration::from_millis(rng.gen_range(0..=bound))
    }
}

/// Classifies a failed attempt for retry decisions.
///
/// | Status | Type |
/// |--------|------|
/// | 404, 410 | NotFound |
/// | 408 | Transient |
/// | 429, 503 | RateLimited |
/// | other 4xx | Permanent |
/// | other 5xx | Transient |
///
/// Timeouts, connection failures and truncated bodies are transient.
/// Foreign redirects, empty bodies and storage failures are permanent.
#[must_use]
pub fn classify_attempt(error: &AttemptError) -> FailureType {
    match error {
        AttemptError::Status { status, .. } => classify_http_status(*status),
        AttemptError::Timeout | AttemptError::Connect(_) | AttemptError::Network(_) => {
            FailureType::Transient
        }
        AttemptError::Redirected(_) | AttemptError::EmptyBody | AttemptError::Storage(_) => {
            FailureType::Permanent
        }
    }
}

#[allow(clippy::match_same_arms)]
fn classify_http_status(status: u16) -> FailureType {
    match status {
        404 => FailureType::NotFound,      // Not Found
        410 => FailureType::NotFound,      // Gone
        408 => FailureType::Transient,     // Request Timeout
        429 => FailureType::RateLimited,   // Too Many Requests
        503 => FailureType::RateLimited,   // Service Unavailable
        status if (400..500).contains(&status) => FailureType::Permanent,
        status if (500..600).contains(&status) => FailureType::Transient,
        _ => FailureType::Permanent,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn status(code: u16) -> AttemptError {
        AttemptError::Status {
            status: code,
            retry_after: None,
        }
    }

    #[test]
    fn test_retry_policy_default_values() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.base_delay, Duration::from_secs(1));
        assert_eq!(policy.max_delay, Duration::from_secs(32));
        assert!((policy.backoff_multiplier - 2.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_retry_policy_max_attempts_minimum_is_one() {
        assert_eq!(RetryPolicy::with_max_attempts(0).max_attempts(), 1);
        assert_eq!(
            RetryPolicy::new(0, Duration::ZERO, Duration::ZERO, 2.0).max_attempts(),
            1
        );
    }

    #[test]
    fn test_delay_doubles_per_attempt() {
        let policy = RetryPolicy::new(5, Duration::from_secs(1), Duration::from_secs(32), 2.0);

        let first = policy.calculate_delay(1);
        assert!(first >= Duration::from_secs(1) && first <= Duration::from_millis(1500));

        let third = policy.calculate_delay(3);
        assert!(third >= Duration::from_secs(4) && third <= Duration::from_millis(4500));
    }

    #[test]
    fn test_delay_respects_max_delay() {
        let policy = RetryPolicy::new(10, Duration::from_secs(1), Duration::from_secs(5), 2.0);
        let delay = policy.calculate_delay(6);
        assert!(delay >= Duration::from_secs(5));
        assert!(delay <= Duration::from_millis(5500));
    }

    #[test]
    fn test_jitter_bounded_by_small_base_delay() {
        let policy = RetryPolicy::new(3, Duration::from_millis(10), Duration::from_millis(50), 2.0);
        for _ in 0..100 {
            assert!(policy.calculate_jitter() <= Duration::from_millis(10));
        }
    }

    #[test]
    fn test_zero_base_delay_has_no_jitter() {
        let policy = RetryPolicy::new(3, Duration::ZERO, Duration::ZERO, 2.0);
        assert_eq!(policy.calculate_delay(2), Duration::ZERO);
    }

    #[test]
    fn test_classify_not_found_statuses() {
        assert_eq!(classify_attempt(&status(404)), FailureType::NotFound);
        assert_eq!(classify_attempt(&status(410)), FailureType::NotFound);
    }

    #[test]
    fn test_classify_rate_limited_statuses() {
        assert_eq!(classify_attempt(&status(429)), FailureType::RateLimited);
        assert_eq!(classify_attempt(&status(503)), FailureType::RateLimited);
    }

    #[test]
    fn test_classify_transient_statuses() {
        for code in [408, 500, 502, 504, 599] {
            assert_eq!(
                classify_attempt(&status(code)),
                FailureType::Transient,
                "status {code}"
            );
        }
    }

    #[test]
    fn test_classify_permanent_statuses() {
        for code in [400, 401, 403, 451, 302] {
            assert_eq!(
                classify_attempt(&status(code)),
                FailureType::Permanent,
                "status {code}"
            );
        }
    }

    #[test]
    fn test_classify_transport_errors_transient() {
        assert_eq!(classify_attempt(&AttemptError::Timeout), FailureType::Transient);
        assert_eq!(
            classify_attempt(&AttemptError::Connect("refused".into())),
            FailureType::Transient
        );
        assert_eq!(
            classify_attempt(&AttemptError::Network("reset".into())),
            FailureType::Transient
        );
    }

    #[test]
    fn test_classify_download_failures_permanent() {
        let redirected =
            AttemptError::Redirected(Url::parse("https://mirror.example.com/a.pdf").unwrap());
        let storage = AttemptError::from(SinkError::UnsafeName {
            name: String::new(),
        });
        for failure in [redirected, AttemptError::EmptyBody, storage] {
            assert_eq!(classify_attempt(&failure), FailureType::Permanent, "{failure}");
        }
    }

    #[test]
    fn test_should_retry_only_transient() {
        let policy = RetryPolicy::default();
        assert!(matches!(
            policy.should_retry(FailureType::Transient, 1),
            RetryDecision::Retry { attempt: 2, .. }
        ));
        for failure in [
            FailureType::Permanent,
            FailureType::NotFound,
            FailureType::RateLimited,
        ] {
            assert!(matches!(
                policy.should_retry(failure, 1),
                RetryDecision::DoNotRetry { .. }
            ));
        }
    }

    #[test]
    fn test_should_retry_respects_max_attempts() {
        let policy = RetryPolicy::with_max_attempts(3);
        assert!(matches!(
            policy.should_retry(FailureType::Transient, 2),
            RetryDecision::Retry { .. }
        ));
        let decision = policy.should_retry(FailureType::Transient, 3);
        if let RetryDecision::DoNotRetry { reason } = decision {
            assert!(reason.contains("exhausted"));
        } else {
            panic!("Expected DoNotRetry, got: {decision:?}");
        }
    }
}
