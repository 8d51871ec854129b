//! Constants for the fetch module (timeouts, retry shaping).

use std::time::Duration;

/// Default HTTP connect timeout (30 seconds).
pub const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default HTTP read timeout (5 minutes for large files).
///
/// Bounds each read from the connection, not the whole transfer.
pub const READ_TIMEOUT_SECS: u64 = 300;

/// Default pacing delay between consecutive requests (3 seconds).
pub const DEFAULT_REQUEST_DELAY: Duration = Duration::from_secs(3);

/// Maximum Retry-After header value (1 hour) to prevent excessive delays.
pub const MAX_RETRY_AFTER: Duration = Duration::from_secs(3600);
