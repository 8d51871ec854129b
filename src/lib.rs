//! Crawler Core Library
//!
//! This library walks a numbered directory space on a file-hosting site,
//! keeps the English PDF/EPUB documents it finds, and records every
//! processed index so an interrupted run picks up where it stopped.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`config`] - Run configuration, config file loading and validation
//! - [`progress`] - Durable append-only record of completed indices
//! - [`fetch`] - HTTP fetcher with pacing, retry and throttle detection
//! - [`classify`] - Domain, type and language filtering of candidates
//! - [`sink`] - Filesystem writer for accepted documents
//! - [`crawl`] - The sequential crawl loop tying everything together

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod classify;
pub mod config;
pub mod crawl;
pub mod fetch;
pub mod progress;
pub mod sink;
mod user_agent;

// Re-export commonly used types
pub use classify::{Classifier, DoubtPolicy, LanguageScorer, RejectReason, StopwordScorer, Verdict};
pub use config::{ConfigError, FileConfig, RunConfig};
pub use crawl::{CrawlError, CrawlSummary, Crawler, ThrottleBackoff};
pub use fetch::{Candidate, FetchError, FetchResponse, Fetcher, RetryPolicy, StoredFile};
pub use progress::{ProgressError, ProgressStore};
pub use sink::{DirectorySink, FileSink, SinkError, StagedFile};
