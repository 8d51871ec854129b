//! Error types for progress store operations.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by the [`ProgressStore`](super::ProgressStore).
///
/// Every variant is fatal for a crawl run: continuing without a trustworthy
/// progress file would either redo finished work or lose resume state.
#[derive(Debug, Error)]
pub enum ProgressError {
    /// Reading, appending or syncing the progress file failed.
    #[error("IO error on progress file {path}: {source}")]
    Io {
        /// The progress file path.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// A line in the progress file is not a completed index.
    #[error(
        "progress file {path} is corrupt at line {line}: {content:?} is not an index\n  Suggestion: fix or remove the line, then rerun"
    )]
    Corrupt {
        /// The progress file path.
        path: PathBuf,
        /// One-based line number.
        line: usize,
        /// The offending line content.
        content: String,
    },

    /// Another process holds the lock on the progress file.
    #[error(
        "progress file {path} is locked by another process\n  Suggestion: give each instance its own progress file"
    )]
    Locked {
        /// The progress file path.
        path: PathBuf,
    },
}

impl ProgressError {
    /// Creates an IO error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Creates a corrupt-line error.
    pub fn corrupt(path: impl Into<PathBuf>, line: usize, content: impl Into<String>) -> Self {
        Self::Corrupt {
            path: path.into(),
            line,
            content: content.into(),
        }
    }

    /// Creates a lock contention error.
    pub fn locked(path: impl Into<PathBuf>) -> Self {
        Self::Locked { path: path.into() }
    }
}
