//! HTTP fetching and index resolution.
//!
//! This module performs every outbound request the crawler makes: resolving
//! a numbered index into candidate documents and streaming document bodies
//! into a [`FileSink`](crate::sink::FileSink).
//!
//! # Features
//!
//! - Minimum spacing between consecutive requests ([`Pacer`])
//! - Internal retry of transient failures with exponential backoff and jitter
//! - A distinct throttling signal for 429/503 and repeated connection failures
//! - HTML directory listing parsing and direct-document detection
//! - Streaming document downloads with cleanup of partial files
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use crawler_core::fetch::{Fetcher, Pacer, RetryPolicy, resolve_index};
//! use url::Url;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let fetcher = Fetcher::new(
//!     RetryPolicy::default(),
//!     Pacer::new(Duration::from_secs(3)),
//! )?;
//! let base = Url::parse("https://archive.example.org/d/")?;
//! for candidate in resolve_index(&fetcher, &base, 7).await? {
//!     println!("{} -> {}", candidate.file_name, candidate.url);
//! }
//! # Ok(())
//! # }
//! ```

mod client;
pub mod constants;
mod error;
mod filename;
mod listing;
mod pacer;
mod retry;

pub use client::{FetchResponse, Fetcher, StoredFile};
pub use error::FetchError;
pub use filename::{
    MAX_FILENAME_BYTES, document_filename, extension_from_content_type, extension_of, file_stem,
    friendly_filename, parse_content_disposition, sanitize_filename,
};
pub use listing::{
    Candidate, DOCUMENT_EXTENSIONS, DOCUMENT_MIME_TYPES, candidates_from_response, extract_links,
    listing_url, resolve_index,
};
pub use pacer::{Pacer, parse_retry_after};
pub use retry::{
    AttemptError, DEFAULT_MAX_RETRIES, FailureType, RetryDecision, RetryPolicy, classify_attempt,
};
