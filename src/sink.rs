//! Filesystem writer for accepted documents.
//!
//! [`FileSink`] is the seam between the crawl loop and storage. A download
//! is written through a [`StagedFile`]: chunks land in a hidden staging
//! file that only becomes visible under its final name on
//! [`StagedFile::commit`], after the bytes are flushed and synced. The
//! [`DirectorySink`] implementation keeps every file in one flat directory.

use std::hash::{DefaultHasher, Hash, Hasher};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, instrument};

/// Bytes of the final name kept in the staging file name.
const STAGING_PREFIX_BYTES: usize = 32;

/// Storage failure for a single file.
#[derive(Debug, Error)]
pub enum SinkError {
    /// The file name would escape the target directory or is empty.
    #[error("refusing unsafe file name '{name}'")]
    UnsafeName {
        /// The rejected name.
        name: String,
    },

    /// Filesystem failure.
    #[error("failed to write {path}: {source}")]
    Io {
        /// The path being written.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },
}

impl SinkError {
    fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Destination for downloaded files.
#[async_trait]
pub trait FileSink: Send + Sync {
    /// Returns true if a file with this name is already stored.
    async fn contains(&self, name: &str) -> bool;

    /// Opens a staging file that becomes `name` once committed.
    async fn stage(&self, name: &str) -> Result<Box<dyn StagedFile>, SinkError>;
}

/// A file being written. Invisible under its final name until committed.
#[async_trait]
pub trait StagedFile: Send {
    /// Appends a chunk.
    async fn write_chunk(&mut self, chunk: &[u8]) -> Result<(), SinkError>;

    /// Makes the file durable and visible under its final name.
    async fn commit(&mut self) -> Result<PathBuf, SinkError>;

    /// Throws the partial file away.
    async fn discard(&mut self);
}

/// Writes files into a single directory.
#[derive(Debug, Clone)]
pub struct DirectorySink {
    dir: PathBuf,
}

impl DirectorySink {
    /// Creates a sink rooted at `dir`. The directory is created on first write.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn target(&self, name: &str) -> Result<PathBuf, SinkError> {
        if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
            return Err(SinkError::UnsafeName {
                name: name.to_string(),
            });
        }
        Ok(self.dir.join(name))
    }
}

/// Short, stable staging name: `.<prefix>-<hash>.part`.
fn staging_name(name: &str) -> String {
    let mut end = STAGING_PREFIX_BYTES.min(name.len());
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    let mut hasher = DefaultHasher::new();
    name.hash(&mut hasher);
    format!(".{}-{:016x}.part", &name[..end], hasher.finish())
}

#[async_trait]
impl FileSink for DirectorySink {
    async fn contains(&self, name: &str) -> bool {
        match self.target(name) {
            Ok(path) => tokio::fs::try_exists(&path).await.unwrap_or(false),
            Err(_) => false,
        }
    }

    #[instrument(skip(self), fields(dir = %self.dir.display()))]
    async fn stage(&self, name: &str) -> Result<Box<dyn StagedFile>, SinkError> {
        let final_path = self.target(name)?;
        let part_path = self.dir.join(staging_name(name));

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| SinkError::io(&self.dir, e))?;
        let file = File::create(&part_path)
            .await
            .map_err(|e| SinkError::io(&part_path, e))?;

        debug!(part = %part_path.display(), "staging file opened");
        Ok(Box::new(DirectoryPart {
            writer: Some(BufWriter::new(file)),
            part_path,
            final_path,
        }))
    }
}

/// Staging file of a [`DirectorySink`].
#[derive(Debug)]
struct DirectoryPart {
    writer: Option<BufWriter<File>>,
    part_path: PathBuf,
    final_path: PathBuf,
}

fn closed(part_path: &Path) -> SinkError {
    SinkError::io(
        part_path,
        std::io::Error::other("staging file already closed"),
    )
}

impl DirectoryPart {
    async fn finish(&mut self) -> Result<PathBuf, SinkError> {
        let mut writer = self.writer.take().ok_or_else(|| closed(&self.part_path))?;
        writer
            .flush()
            .await
            .map_err(|e| SinkError::io(&self.part_path, e))?;
        writer
            .into_inner()
            .sync_all()
            .await
            .map_err(|e| SinkError::io(&self.part_path, e))?;
        tokio::fs::rename(&self.part_path, &self.final_path)
            .await
            .map_err(|e| SinkError::io(&self.final_path, e))?;
        Ok(self.final_path.clone())
    }
}

#[async_trait]
impl StagedFile for DirectoryPart {
    async fn write_chunk(&mut self, chunk: &[u8]) -> Result<(), SinkError> {
        match self.writer.as_mut() {
            Some(writer) => writer
                .write_all(chunk)
                .await
                .map_err(|e| SinkError::io(&self.part_path, e)),
            None => Err(closed(&self.part_path)),
        }
    }

    async fn commit(&mut self) -> Result<PathBuf, SinkError> {
        match self.finish().await {
            Ok(path) => {
                debug!(path = %path.display(), "file stored");
                Ok(path)
            }
            Err(error) => {
                let _ = tokio::fs::remove_file(&self.part_path).await;
                Err(error)
            }
        }
    }

    async fn discard(&mut self) {
        self.writer = None;
        if tokio::fs::remove_file(&self.part_path).await.is_ok() {
            debug!(part = %self.part_path.display(), "partial file removed");
        }
    }
}

/// Writes `bytes` through a staging file in one go.
#[cfg(test)]
pub(crate) async fn store(
    sink: &dyn FileSink,
    name: &str,
    bytes: &[u8],
) -> Result<PathBuf, SinkError> {
    let mut staged = sink.stage(name).await?;
    if let Err(error) = staged.write_chunk(bytes).await {
        staged.discard().await;
        return Err(error);
    }
    staged.commit().await
}
