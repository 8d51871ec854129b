//! Escalating delay for consecutive throttling signals.

use std::time::Duration;

use rand::Rng;
use tracing::debug;

/// Maximum jitter added on top of the exponential delay.
const MAX_JITTER: Duration = Duration::from_secs(1);

/// Default base delay for the first throttle (15 seconds).
pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_secs(15);

/// Default delay ceiling (5 minutes).
pub const DEFAULT_BACKOFF_CEILING: Duration = Duration::from_secs(300);

/// Exponential backoff over consecutive throttles, capped at a ceiling.
///
/// ```text
/// delay = min(max(base * 2^(n-1) + jitter, retry_after), ceiling)
/// ```
#[derive(Debug, Clone)]
pub struct ThrottleBackoff {
    base: Duration,
    ceiling: Duration,
    consecutive: u32,
}

impl Default for ThrottleBackoff {
    fn default() -> Self {
        Self::new(DEFAULT_BACKOFF_BASE, DEFAULT_BACKOFF_CEILING)
    }
}

impl ThrottleBackoff {
    /// Creates a backoff. A base above the ceiling is lowered to it.
    #[must_use]
    pub fn new(base: Duration, ceiling: Duration) -> Self {
        Self {
            base: base.min(ceiling),
            ceiling,
            consecutive: 0,
        }
    }

    /// Number of throttles since the last reset.
    #[must_use]
    pub fn consecutive(&self) -> u32 {
        self.consecutive
    }

    /// Records one more throttle and returns how long to wait.
    ///
    /// A server-provided `retry_after` raises the delay but never past the
    /// ceiling.
    pub fn next_delay(&mut self, retry_after: Option<Duration>) -> Duration {
        self.consecutive = self.consecutive.saturating_add(1);

        let exponent = (self.consecutive - 1).min(31);
        let exponential = self
            .base
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.ceiling);
        let delay = exponential
            .saturating_add(self.jitter())
            .max(retry_after.unwrap_or(Duration::ZERO))
            .min(self.ceiling);

        debug!(
            consecutive = self.consecutive,
            delay_ms = delay.as_millis(),
            "throttle backoff"
        );
        delay
    }

    /// Clears the consecutive count after a successful index.
    pub fn reset(&mut self) {
        self.consecutive = 0;
    }

    #[allow(clippy::cast_possible_truncation)]
    fn jitter(&self) -> Duration {
        let bound = MAX_JITTER.min(self.base).as_millis() as u64;
        if bound == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..=bound))
    }
}
