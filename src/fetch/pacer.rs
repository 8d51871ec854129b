//! Request pacing and Retry-After parsing.
//!
//! The [`Pacer`] enforces a minimum gap between consecutive outbound
//! requests. The crawler only ever has one request in flight, so a single
//! "last request" timestamp is all the state it needs.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use crawler_core::fetch::Pacer;
//!
//! # async fn example() {
//! let mut pacer = Pacer::new(Duration::from_millis(500));
//!
//! // First request proceeds immediately
//! pacer.wait().await;
//!
//! // Second request waits out the remainder of the 500ms gap
//! pacer.wait().await;
//! # }
//! ```

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, instrument, warn};

use super::constants::MAX_RETRY_AFTER;

/// Minimum-gap pacer for outbound requests.
#[derive(Debug)]
pub struct Pacer {
    /// Minimum time between the start of consecutive requests.
    delay: Duration,

    /// `None` until the first request has been paced.
    last_request: Option<Instant>,
}

impl Pacer {
    /// Creates a pacer with the given minimum gap.
    #[must_use]
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            last_request: None,
        }
    }

    /// Creates a pacer that never waits.
    #[must_use]
    pub fn disabled() -> Self {
        Self::new(Duration::ZERO)
    }

    /// Returns the configured minimum gap.
    #[must_use]
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Waits until the configured gap since the previous request has elapsed.
    ///
    /// The first call returns immediately.
    #[instrument(skip(self), fields(delay_ms = self.delay.as_millis()))]
    pub async fn wait(&mut self) {
        if let Some(last_request) = self.last_request {
            let elapsed = last_request.elapsed();
            if elapsed < self.delay {
                let remaining = self.delay.saturating_sub(elapsed);
                debug!(remaining_ms = remaining.as_millis(), "pacing request");
                tokio::time::sleep(remaining).await;
            }
        }
        self.last_request = Some(Instant::now());
    }
}

/// Parses a Retry-After header value into a Duration.
///
/// Supports integer seconds and HTTP-dates (RFC 7231). Values beyond one
/// hour are capped; unparseable values yield `None`.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use crawler_core::fetch::parse_retry_after;
///
/// assert_eq!(parse_retry_after("120"), Some(Duration::from_secs(120)));
/// assert_eq!(parse_retry_after("invalid"), None);
/// ```
#[must_use]
#[instrument]
pub fn parse_retry_after(header_value: &str) -> Option<Duration> {
    let header_value = header_value.trim();

    if let Ok(seconds) = header_value.parse::<i64>() {
        if seconds < 0 {
            debug!(seconds, "negative Retry-After value, ignoring");
            return None;
        }

        #[allow(clippy::cast_sign_loss)]
        let duration = Duration::from_secs(seconds as u64);
        if duration > MAX_RETRY_AFTER {
            warn!(
                seconds,
                max_seconds = MAX_RETRY_AFTER.as_secs(),
                "Retry-After exceeds maximum, capping at 1 hour"
            );
            return Some(MAX_RETRY_AFTER);
        }
        return Some(duration);
    }

    if let Ok(datetime) = httpdate::parse_http_date(header_value) {
        match datetime.duration_since(std::time::SystemTime::now()) {
            Ok(duration) => Some(duration.min(MAX_RETRY_AFTER)),
            Err(_) => {
                debug!(header_value, "Retry-After date is in the past");
                Some(Duration::ZERO)
            }
        }
    } else {
        debug!(header_value, "unparseable Retry-After value");
        None
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_first_wait_is_immediate() {
        let mut pacer = Pacer::new(Duration::from_secs(10));
        let start = Instant::now();
        pacer.wait().await;
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_second_wait_enforces_gap() {
        let mut pacer = Pacer::new(Duration::from_millis(80));
        let start = Instant::now();
        pacer.wait().await;
        pacer.wait().await;
        assert!(start.elapsed() >= Duration::from_millis(80));
    }

    #[tokio::test]
    async fn test_disabled_pacer_never_waits() {
        let mut pacer = Pacer::disabled();
        assert_eq!(pacer.delay(), Duration::ZERO);
        let start = Instant::now();
        for _ in 0..5 {
            pacer.wait().await;
        }
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[test]
    fn test_parse_retry_after_seconds() {
        assert_eq!(parse_retry_after("0"), Some(Duration::ZERO));
        assert_eq!(parse_retry_after(" 15 "), Some(Duration::from_secs(15)));
    }

    #[test]
    fn test_parse_retry_after_negative_ignored() {
        assert_eq!(parse_retry_after("-5"), None);
    }

    #[test]
    fn test_parse_retry_after_caps_at_one_hour() {
        assert_eq!(parse_retry_after("999999"), Some(MAX_RETRY_AFTER));
    }

    #[test]
    fn test_parse_retry_after_past_http_date_is_zero() {
        assert_eq!(
            parse_retry_after("Wed, 21 Oct 2015 07:28:00 GMT"),
            Some(Duration::ZERO)
        );
    }

    #[test]
    fn test_parse_retry_after_garbage() {
        assert_eq!(parse_retry_after("soon"), None);
    }
}
