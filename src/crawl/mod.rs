//! The sequential crawl loop.
//!
//! One index at a time: resolve it into candidates, classify each one,
//! download the accepted ones, then record the index as completed. A
//! throttling signal anywhere in that sequence abandons the index without
//! recording it, waits out an escalating delay and starts the same index
//! over. Files already stored are not fetched again on the retry.
//!
//! # Example
//!
//! ```no_run
//! use crawler_core::{Crawler, RunConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = RunConfig::new("https://archive.example.org/d/", "files.example.org")?;
//! let mut crawler = Crawler::from_config(config)?;
//! let summary = crawler.run().await?;
//! println!("downloaded {} files", summary.files_downloaded);
//! # Ok(())
//! # }
//! ```

mod backoff;

pub use backoff::{DEFAULT_BACKOFF_BASE, DEFAULT_BACKOFF_CEILING, ThrottleBackoff};

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::classify::{Classifier, Verdict};
use crate::config::RunConfig;
use crate::fetch::{Candidate, FetchError, Fetcher, Pacer, RetryPolicy, StoredFile, resolve_index};
use crate::progress::{ProgressError, ProgressStore};
use crate::sink::{DirectorySink, FileSink};

/// Longest single sleep while backing off, so interrupts are noticed promptly.
const INTERRUPT_POLL: Duration = Duration::from_millis(250);

/// Error that ends a crawl run.
#[derive(Debug, Error)]
pub enum CrawlError {
    /// The progress store failed; continuing could lose resume state.
    #[error("progress store error: {0}")]
    Progress(#[from] ProgressError),

    /// The HTTP client could not be built.
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
}

/// Counters for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CrawlSummary {
    /// Indices recorded as completed during this run.
    pub indices_recorded: u64,
    /// Indices that had nothing to offer.
    pub indices_not_found: u64,
    /// Indices whose listing failed after retries (recorded anyway).
    pub listings_failed: u64,
    /// Files written to the sink.
    pub files_downloaded: u64,
    /// Accepted files that were already stored.
    pub files_already_present: u64,
    /// Candidates rejected by the classifier.
    pub files_rejected: u64,
    /// Accepted files that could not be downloaded or stored.
    pub files_failed: u64,
    /// Throttling signals received.
    pub throttle_events: u64,
    /// Whether the run stopped because of an interrupt.
    pub interrupted: bool,
    /// The index the next run will start from.
    pub next_index: u64,
}

/// Per-index counters, merged into the summary only once the index is recorded.
#[derive(Debug, Default)]
struct IndexTally {
    not_found: bool,
    listing_failed: bool,
    downloaded: u64,
    already_present: u64,
    rejected: u64,
    failed: u64,
}

impl CrawlSummary {
    fn record(&mut self, tally: &IndexTally) {
        self.indices_recorded += 1;
        self.indices_not_found += u64::from(tally.not_found);
        self.listings_failed += u64::from(tally.listing_failed);
        self.files_downloaded += tally.downloaded;
        self.files_already_present += tally.already_present;
        self.files_rejected += tally.rejected;
        self.files_failed += tally.failed;
    }
}

enum IndexOutcome {
    Recorded,
    Throttled(Option<Duration>),
}

/// Drives the crawl over the configured index range.
pub struct Crawler {
    config: RunConfig,
    fetcher: Fetcher,
    classifier: Classifier,
    store: ProgressStore,
    sink: Arc<dyn FileSink>,
    backoff: ThrottleBackoff,
    interrupted: Arc<AtomicBool>,
}

impl std::fmt::Debug for Crawler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Crawler")
            .field("config", &self.config)
            .field("classifier", &self.classifier)
            .field("store", &self.store.path())
            .finish_non_exhaustive()
    }
}

impl Crawler {
    /// Assembles a crawler from its parts.
    #[must_use]
    pub fn new(
        config: RunConfig,
        fetcher: Fetcher,
        classifier: Classifier,
        store: ProgressStore,
        sink: Arc<dyn FileSink>,
    ) -> Self {
        let backoff = ThrottleBackoff::new(
            config.throttle_backoff_base,
            config.throttle_backoff_ceiling,
        );
        Self {
            config,
            fetcher,
            classifier,
            store,
            sink,
            backoff,
            interrupted: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Builds the default fetcher, classifier, progress store and directory sink for `config`.
    ///
    /// # Errors
    ///
    /// [`CrawlError::Progress`] if the progress file cannot be opened, and
    /// [`CrawlError::Client`] if the HTTP client cannot be built.
    pub fn from_config(config: RunConfig) -> Result<Self, CrawlError> {
        let store = ProgressStore::open(&config.progress_file)?;
        let fetcher = Fetcher::with_timeouts(
            RetryPolicy::with_max_attempts(config.max_retries),
            Pacer::new(config.request_delay),
            config.connect_timeout,
            config.read_timeout,
        )
        .map_err(CrawlError::Client)?;
        let classifier = Classifier::new(config.preferred_domain.clone())
            .doubt_policy(config.doubt_policy)
            .min_confidence(config.min_english_confidence);
        let sink: Arc<dyn FileSink> = Arc::new(DirectorySink::new(config.download_dir.clone()));
        Ok(Self::new(config, fetcher, classifier, store, sink))
    }

    /// Uses `flag` as the interrupt signal; setting it stops the run cleanly.
    #[must_use]
    pub fn with_interrupt_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.interrupted = flag;
        self
    }

    /// Returns the progress store.
    #[must_use]
    pub fn store(&self) -> &ProgressStore {
        &self.store
    }

    fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::SeqCst)
    }

    /// Runs until the end of the range or an interrupt.
    ///
    /// # Errors
    ///
    /// Returns [`CrawlError::Progress`] if recording an index fails. Every
    /// other failure is logged and contained within its index.
    #[instrument(skip(self), fields(base_url = %self.config.base_url))]
    pub async fn run(&mut self) -> Result<CrawlSummary, CrawlError> {
        let mut summary = CrawlSummary::default();
        let mut index = self.store.resume_point(self.config.start_index);

        info!(
            start = self.config.start_index,
            end = ?self.config.end_index,
            resume_at = index,
            already_completed = self.store.len(),
            "starting crawl"
        );

        loop {
            // A recorded index here means the resume point saturated at u64::MAX.
            if !self.config.in_range(index) || self.store.has_completed(index) {
                info!(index, "reached end of range");
                break;
            }
            if self.is_interrupted() {
                summary.interrupted = true;
                break;
            }

            match self.process_index(index, &mut summary).await? {
                IndexOutcome::Recorded => {
                    self.backoff.reset();
                    let Some(next) = index.checked_add(1) else {
                        info!(index, "reached the last representable index");
                        break;
                    };
                    index = self.store.resume_point(next);
                }
                IndexOutcome::Throttled(retry_after) => {
                    summary.throttle_events += 1;
                    let delay = self.backoff.next_delay(retry_after);
                    warn!(
                        index,
                        consecutive = self.backoff.consecutive(),
                        delay_ms = delay.as_millis(),
                        "throttled, backing off before retrying index"
                    );
                    if !self.sleep_unless_interrupted(delay).await {
                        summary.interrupted = true;
                        break;
                    }
                }
            }
        }

        summary.next_index = index;
        if summary.interrupted {
            info!(next_index = index, "interrupted, run again to resume");
        }
        Ok(summary)
    }

    /// One pass over `index`. Records it unless throttled.
    #[instrument(skip(self, summary))]
    async fn process_index(
        &mut self,
        index: u64,
        summary: &mut CrawlSummary,
    ) -> Result<IndexOutcome, CrawlError> {
        let mut tally = IndexTally::default();

        let candidates = match resolve_index(&self.fetcher, &self.config.base_url, index).await {
            Ok(candidates) => candidates,
            Err(FetchError::Throttled { retry_after, .. }) => {
                return Ok(IndexOutcome::Throttled(retry_after));
            }
            Err(FetchError::NotFound { url }) => {
                info!(%url, "nothing at index");
                tally.not_found = true;
                Vec::new()
            }
            Err(error) => {
                warn!(%error, "listing failed, recording index without downloads");
                tally.listing_failed = true;
                Vec::new()
            }
        };

        for candidate in candidates {
            match self.classifier.classify(&candidate) {
                Verdict::Accept => {}
                Verdict::Reject(reason) => {
                    info!(file = %candidate.file_name, %reason, "skipped");
                    tally.rejected += 1;
                    continue;
                }
            }

            if self.sink.contains(&candidate.file_name).await {
                info!(file = %candidate.file_name, "already downloaded");
                tally.already_present += 1;
                continue;
            }

            match self.download(&candidate).await {
                Ok(stored) => {
                    info!(
                        file = %candidate.file_name,
                        path = %stored.path.display(),
                        bytes = stored.bytes,
                        "downloaded"
                    );
                    tally.downloaded += 1;
                }
                Err(FetchError::Throttled { retry_after, .. }) => {
                    return Ok(IndexOutcome::Throttled(retry_after));
                }
                Err(error) => {
                    warn!(url = %candidate.url, %error, "download failed");
                    tally.failed += 1;
                }
            }
        }

        let newly_recorded = self.store.mark_completed(index)?;
        if !newly_recorded {
            debug!("index was already recorded");
        }
        summary.record(&tally);
        info!(
            downloaded = tally.downloaded,
            rejected = tally.rejected,
            failed = tally.failed,
            "index completed"
        );
        Ok(IndexOutcome::Recorded)
    }

    /// Streams an accepted candidate into the sink, refusing foreign redirects.
    async fn download(&self, candidate: &Candidate) -> Result<StoredFile, FetchError> {
        let classifier = &self.classifier;
        let accept_final_url = move |url: &Url| classifier.is_preferred_host(url);
        self.fetcher
            .download(
                &candidate.url,
                self.sink.as_ref(),
                &candidate.file_name,
                &accept_final_url,
            )
            .await
    }

    /// Sleeps for `delay` in short slices. Returns false if interrupted.
    async fn sleep_unless_interrupted(&self, delay: Duration) -> bool {
        let deadline = Instant::now() + delay;
        loop {
            if self.is_interrupted() {
                return false;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return true;
            }
            tokio::time::sleep(remaining.min(INTERRUPT_POLL)).await;
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::path::PathBuf;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use tempfile::TempDir;

    use super::*;
    use crate::config::FileConfig;
    use crate::sink::{SinkError, StagedFile};

    type Files = Arc<Mutex<Vec<(String, Vec<u8>)>>>;

    /// In-memory sink that records committed files.
    #[derive(Default)]
    struct MemorySink {
        files: Files,
    }

    struct MemoryPart {
        name: String,
        bytes: Vec<u8>,
        files: Files,
    }

    #[async_trait]
    impl FileSink for MemorySink {
        async fn contains(&self, name: &str) -> bool {
            self.files.lock().unwrap().iter().any(|(n, _)| n == name)
        }

        async fn stage(&self, name: &str) -> Result<Box<dyn StagedFile>, SinkError> {
            Ok(Box::new(MemoryPart {
                name: name.to_string(),
                bytes: Vec::new(),
                files: Arc::clone(&self.files),
            }))
        }
    }

    #[async_trait]
    impl StagedFile for MemoryPart {
        async fn write_chunk(&mut self, chunk: &[u8]) -> Result<(), SinkError> {
            self.bytes.extend_from_slice(chunk);
            Ok(())
        }

        async fn commit(&mut self) -> Result<PathBuf, SinkError> {
            let bytes = std::mem::take(&mut self.bytes);
            self.files.lock().unwrap().push((self.name.clone(), bytes));
            Ok(PathBuf::from(&self.name))
        }

        async fn discard(&mut self) {
            self.bytes.clear();
        }
    }

    fn layer(temp: &TempDir, start: u64, end: Option<u64>) -> FileConfig {
        FileConfig {
            // Nothing listens on port 9; requests fail to connect right away.
            base_url: Some("http://127.0.0.1:9/d/".to_string()),
            preferred_domain: Some("127.0.0.1".to_string()),
            start_index: Some(start),
            end_index: end,
            request_delay_ms: Some(0),
            progress_file: Some(temp.path().join("COMPLETED.txt")),
            download_dir: Some(temp.path().join("downloads")),
            ..FileConfig::default()
        }
    }

    fn config(temp: &TempDir, start: u64, end: u64) -> RunConfig {
        RunConfig::resolve(layer(temp, start, Some(end))).unwrap()
    }

    fn crawler(config: RunConfig, sink: Arc<dyn FileSink>) -> Crawler {
        let store = ProgressStore::open(&config.progress_file).unwrap();
        let fetcher = Fetcher::new(RetryPolicy::with_max_attempts(1), Pacer::disabled()).unwrap();
        let classifier = Classifier::new(config.preferred_domain.clone());
        Crawler::new(config, fetcher, classifier, store, sink)
    }

    #[tokio::test]
    async fn test_completed_range_does_no_work() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("COMPLETED.txt"), "0\n1\n2\n").unwrap();
        let sink = Arc::new(MemorySink::default());
        let mut crawler = crawler(config(&temp, 0, 3), sink.clone());

        let summary = crawler.run().await.unwrap();

        assert_eq!(summary.indices_recorded, 0);
        assert_eq!(summary.next_index, 3);
        assert!(!summary.interrupted);
        assert!(sink.files.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_interrupt_before_start_records_nothing() {
        let temp = TempDir::new().unwrap();
        let flag = Arc::new(AtomicBool::new(true));
        let mut crawler =
            crawler(config(&temp, 5, 10), Arc::new(MemorySink::default())).with_interrupt_flag(flag);

        let summary = crawler.run().await.unwrap();

        assert!(summary.interrupted);
        assert_eq!(summary.next_index, 5);
        assert!(crawler.store().is_empty());
    }

    #[tokio::test]
    async fn test_unbounded_run_stops_after_last_index() {
        let temp = TempDir::new().unwrap();
        std::fs::write(
            temp.path().join("COMPLETED.txt"),
            format!("{}\n", u64::MAX - 1),
        )
        .unwrap();
        let config = RunConfig::resolve(layer(&temp, u64::MAX - 1, None)).unwrap();
        let mut crawler = crawler(config, Arc::new(MemorySink::default()));

        let summary = crawler.run().await.unwrap();

        // u64::MAX fails to connect, is recorded as a failed listing, and the run ends.
        assert_eq!(summary.indices_recorded, 1);
        assert_eq!(summary.listings_failed, 1);
        assert_eq!(summary.next_index, u64::MAX);
        assert!(crawler.store().has_completed(u64::MAX));
    }

    #[tokio::test]
    async fn test_fully_recorded_tail_does_no_work() {
        let temp = TempDir::new().unwrap();
        std::fs::write(
            temp.path().join("COMPLETED.txt"),
            format!("{}\n{}\n", u64::MAX - 1, u64::MAX),
        )
        .unwrap();
        let config = RunConfig::resolve(layer(&temp, u64::MAX - 1, None)).unwrap();
        let mut crawler = crawler(config, Arc::new(MemorySink::default()));

        let summary = crawler.run().await.unwrap();

        assert_eq!(summary.indices_recorded, 0);
        assert_eq!(summary.next_index, u64::MAX);
        assert!(!summary.interrupted);
    }

    #[tokio::test]
    async fn test_backoff_sleep_stops_on_interrupt() {
        let temp = TempDir::new().unwrap();
        let flag = Arc::new(AtomicBool::new(false));
        let crawler = crawler(config(&temp, 0, 1), Arc::new(MemorySink::default()))
            .with_interrupt_flag(Arc::clone(&flag));

        let setter = Arc::clone(&flag);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            setter.store(true, Ordering::SeqCst);
        });

        let started = std::time::Instant::now();
        let completed = crawler
            .sleep_unless_interrupted(Duration::from_secs(30))
            .await;
        assert!(!completed);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_summary_merges_tally() {
        let mut summary = CrawlSummary::default();
        summary.record(&IndexTally {
            not_found: true,
            ..IndexTally::default()
        });
        summary.record(&IndexTally {
            downloaded: 2,
            rejected: 1,
            ..IndexTally::default()
        });
        assert_eq!(summary.indices_recorded, 2);
        assert_eq!(summary.indices_not_found, 1);
        assert_eq!(summary.files_downloaded, 2);
        assert_eq!(summary.files_rejected, 1);
    }
}
