//! Durable record of completed crawl indices.
//!
//! The progress file is plain text with one completed index per line. It is
//! append-only from the crawler's point of view and safe to edit by hand:
//! blank lines and `#` comments are ignored, so an operator can skip a
//! poisoned index by appending it manually.
//!
//! # Example
//!
//! ```no_run
//! use crawler_core::progress::ProgressStore;
//!
//! # fn example() -> Result<(), crawler_core::progress::ProgressError> {
//! let mut store = ProgressStore::open("COMPLETED.txt")?;
//! let next = store.resume_point(0);
//! store.mark_completed(next)?;
//! assert!(store.has_completed(next));
//! # Ok(())
//! # }
//! ```

mod error;

use std::collections::BTreeSet;
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tracing::{debug, info, instrument};

pub use error::ProgressError;

/// Append-only store of completed indices backed by a text file.
///
/// The store holds an exclusive advisory lock on the file for its whole
/// lifetime; the lock is released when the store is dropped.
#[derive(Debug)]
pub struct ProgressStore {
    path: PathBuf,
    file: File,
    completed: BTreeSet<u64>,
    /// Set when a hand-edited file lacks a trailing newline.
    needs_newline: bool,
}

impl ProgressStore {
    /// Opens (or creates) the progress file and loads every record.
    ///
    /// # Errors
    ///
    /// - [`ProgressError::Locked`] if another process holds the file
    /// - [`ProgressError::Corrupt`] if a line is not a non-negative integer
    /// - [`ProgressError::Io`] if the file cannot be opened or read
    #[instrument(skip(path), fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ProgressError> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| ProgressError::io(&path, e))?;
        }

        let mut file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(&path)
            .map_err(|e| ProgressError::io(&path, e))?;

        if FileExt::try_lock_exclusive(&file).is_err() {
            return Err(ProgressError::locked(&path));
        }

        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .map_err(|e| ProgressError::io(&path, e))?;

        let completed = parse_records(&path, &contents)?;
        let needs_newline = !contents.is_empty() && !contents.ends_with('\n');

        info!(records = completed.len(), "progress file loaded");

        Ok(Self {
            path,
            file,
            completed,
            needs_newline,
        })
    }

    /// Returns true if a completion record exists for `index`.
    #[must_use]
    pub fn has_completed(&self, index: u64) -> bool {
        self.completed.contains(&index)
    }

    /// Appends a completion record for `index` and syncs it to disk.
    ///
    /// Returns `false` without touching the file when the index is already
    /// recorded, so calling this twice leaves exactly one record.
    ///
    /// # Errors
    ///
    /// Returns [`ProgressError::Io`] if the append or the sync fails. The
    /// in-memory set is only updated after the record is durable.
    #[instrument(skip(self), fields(path = %self.path.display()))]
    pub fn mark_completed(&mut self, index: u64) -> Result<bool, ProgressError> {
        if self.completed.contains(&index) {
            debug!("index already recorded");
            return Ok(false);
        }

        let mut line = String::new();
        if self.needs_newline {
            line.push('\n');
        }
        line.push_str(&index.to_string());
        line.push('\n');

        self.file
            .write_all(line.as_bytes())
            .map_err(|e| ProgressError::io(&self.path, e))?;
        self.file
            .sync_data()
            .map_err(|e| ProgressError::io(&self.path, e))?;

        self.needs_newline = false;
        self.completed.insert(index);
        debug!("completion record written");
        Ok(true)
    }

    /// Returns the lowest index at or above `start` without a record.
    ///
    /// For records `{0, 1, 2, 4}` and `start = 0` this is `3`.
    #[must_use]
    pub fn resume_point(&self, start: u64) -> u64 {
        let mut candidate = start;
        for &index in self.completed.range(start..) {
            if index != candidate {
                break;
            }
            candidate = candidate.saturating_add(1);
        }
        candidate
    }

    /// Returns the number of recorded indices.
    #[must_use]
    pub fn len(&self) -> usize {
        self.completed.len()
    }

    /// Returns true if nothing has been recorded yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.completed.is_empty()
    }

    /// Returns the progress file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn parse_records(path: &Path, contents: &str) -> Result<BTreeSet<u64>, ProgressError> {
    let mut completed = BTreeSet::new();
    for (line_index, raw_line) in contents.lines().enumerate() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let index = line
            .parse::<u64>()
            .map_err(|_| ProgressError::corrupt(path, line_index + 1, line))?;
        completed.insert(index);
    }
    Ok(completed)
}
