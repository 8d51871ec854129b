//! HTTP fetcher with pacing, internal retry and throttle detection.
//!
//! The [`Fetcher`] performs plain GET requests. Every request first waits
//! on the shared [`Pacer`], transient failures are retried according to the
//! [`RetryPolicy`], and the remaining outcomes are surfaced as
//! [`FetchError`] variants the crawl loop can act on.
//!
//! Pages are read into memory; documents are streamed chunk by chunk into
//! a [`FileSink`] staging file, so their size is bounded by disk, not RAM.

use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::header::{CONTENT_DISPOSITION, CONTENT_TYPE, HeaderMap, RETRY_AFTER};
use reqwest::{Client, Response};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};
use url::Url;

use super::constants::{CONNECT_TIMEOUT_SECS, READ_TIMEOUT_SECS};
use super::error::FetchError;
use super::listing::is_direct_document;
use super::pacer::{Pacer, parse_retry_after};
use super::retry::{AttemptError, FailureType, RetryDecision, RetryPolicy, classify_attempt};
use crate::sink::{FileSink, StagedFile};
use crate::user_agent;

/// A successful page response.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    /// HTTP status code (always 2xx).
    pub status: u16,
    /// URL after following redirects.
    pub final_url: Url,
    /// Response headers.
    pub headers: HeaderMap,
    /// Response body. Left empty when the response is a document, which
    /// is retrieved with [`Fetcher::download`] instead.
    pub body: Vec<u8>,
}

impl FetchResponse {
    /// Returns the media type of the Content-Type header, lowercased and without parameters.
    #[must_use]
    pub fn content_type(&self) -> Option<String> {
        media_type(&self.headers)
    }

    /// Returns the raw Content-Disposition header, if any.
    #[must_use]
    pub fn content_disposition(&self) -> Option<&str> {
        self.headers
            .get(CONTENT_DISPOSITION)
            .and_then(|value| value.to_str().ok())
    }
}

/// A document written to a sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    /// Where the file landed.
    pub path: PathBuf,
    /// Bytes written.
    pub bytes: u64,
    /// URL after following redirects.
    pub final_url: Url,
}

fn media_type(headers: &HeaderMap) -> Option<String> {
    headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(';').next())
        .map(|mime| mime.trim().to_ascii_lowercase())
        .filter(|mime| !mime.is_empty())
}

/// HTTP fetcher shared by listing resolution and document downloads.
///
/// Created once per run; the underlying client pools connections.
#[derive(Debug)]
pub struct Fetcher {
    client: Client,
    retry_policy: RetryPolicy,
    pacer: Mutex<Pacer>,
}

impl Fetcher {
    /// Creates a fetcher with default timeouts.
    ///
    /// # Errors
    ///
    /// Returns the reqwest builder error if the client cannot be built.
    pub fn new(retry_policy: RetryPolicy, pacer: Pacer) -> Result<Self, reqwest::Error> {
        Self::with_timeouts(
            retry_policy,
            pacer,
            Duration::from_secs(CONNECT_TIMEOUT_SECS),
            Duration::from_secs(READ_TIMEOUT_SECS),
        )
    }

    /// Creates a fetcher with explicit connect and read timeouts.
    ///
    /// The read timeout applies to each read from the connection, so a slow
    /// but steady transfer of a large document is never cut off.
    ///
    /// # Errors
    ///
    /// Returns the reqwest builder error if the client cannot be built.
    #[instrument(level = "debug", skip(retry_policy, pacer))]
    pub fn with_timeouts(
        retry_policy: RetryPolicy,
        pacer: Pacer,
        connect_timeout: Duration,
        read_timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .read_timeout(read_timeout)
            .gzip(true)
            .user_agent(user_agent::default_crawler_user_agent())
            .build()?;

        debug!(
            max_attempts = retry_policy.max_attempts(),
            pacing_ms = pacer.delay().as_millis(),
            "creating fetcher"
        );

        Ok(Self {
            client,
            retry_policy,
            pacer: Mutex::new(pacer),
        })
    }

    /// Fetches a page, retrying transient failures internally.
    ///
    /// The body is read into memory unless the response is a PDF/EPUB
    /// document; see [`FetchResponse::body`].
    ///
    /// # Errors
    ///
    /// - [`FetchError::NotFound`] for 404/410
    /// - [`FetchError::Throttled`] for 429/503, or when every attempt failed
    ///   to connect
    /// - [`FetchError::Http`] for other non-retryable statuses
    /// - [`FetchError::Transient`] when retries are exhausted
    #[instrument(skip(self, url), fields(url = %url))]
    pub async fn fetch(&self, url: &Url) -> Result<FetchResponse, FetchError> {
        self.retrying(url, move || self.fetch_once(url)).await
    }

    /// Streams the document at `url` into `sink` under `file_name`.
    ///
    /// `accept_final_url` is checked after redirects, before any byte is
    /// written. A failed attempt leaves nothing behind in the sink; a body
    /// cut off mid-stream is retried like any other transient failure.
    ///
    /// # Errors
    ///
    /// The [`fetch`](Self::fetch) errors, plus [`FetchError::ForeignRedirect`],
    /// [`FetchError::EmptyBody`] and [`FetchError::Storage`].
    #[instrument(skip(self, url, sink, accept_final_url), fields(url = %url))]
    pub async fn download(
        &self,
        url: &Url,
        sink: &dyn FileSink,
        file_name: &str,
        accept_final_url: &(dyn Fn(&Url) -> bool + Sync),
    ) -> Result<StoredFile, FetchError> {
        self.retrying(url, move || {
            self.download_once(url, sink, file_name, accept_final_url)
        })
        .await
    }

    /// Runs `attempt` until it succeeds or the failure is not worth retrying.
    async fn retrying<T, F, Fut>(&self, url: &Url, mut attempt_fn: F) -> Result<T, FetchError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, AttemptError>>,
    {
        let mut attempt = 0u32;
        let mut only_connect_failures = true;

        loop {
            attempt += 1;
            self.pacer.lock().await.wait().await;
            debug!(attempt, "sending request");

            let failure = match attempt_fn().await {
                Ok(value) => return Ok(value),
                Err(failure) => failure,
            };

            match classify_attempt(&failure) {
                FailureType::NotFound => return Err(FetchError::not_found(url.as_str())),
                FailureType::RateLimited => {
                    let (status, retry_after) = match &failure {
                        AttemptError::Status {
                            status,
                            retry_after,
                        } => (
                            Some(*status),
                            retry_after.as_deref().and_then(parse_retry_after),
                        ),
                        _ => (None, None),
                    };
                    warn!(?status, ?retry_after, "server is throttling");
                    return Err(FetchError::throttled(url.as_str(), status, retry_after));
                }
                FailureType::Permanent => return Err(permanent_error(url, attempt, failure)),
                FailureType::Transient => {}
            }

            only_connect_failures &= failure.is_connect();

            match self
                .retry_policy
                .should_retry(FailureType::Transient, attempt)
            {
                RetryDecision::Retry {
                    delay,
                    attempt: next_attempt,
                } => {
                    info!(
                        attempt = next_attempt,
                        max_attempts = self.retry_policy.max_attempts(),
                        delay_ms = delay.as_millis(),
                        error = %failure,
                        "retrying request"
                    );
                    tokio::time::sleep(delay).await;
                }
                RetryDecision::DoNotRetry { reason } => {
                    debug!(%reason, "not retrying request");
                    if only_connect_failures && attempt > 1 {
                        warn!(attempts = attempt, "repeated connection failures, treating as throttling");
                        return Err(FetchError::throttled(url.as_str(), None, None));
                    }
                    return Err(FetchError::transient(
                        url.as_str(),
                        attempt,
                        failure.to_string(),
                    ));
                }
            }
        }
    }

    /// Sends one GET and rejects non-success statuses.
    async fn send(&self, url: &Url) -> Result<Response, AttemptError> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| AttemptError::from_reqwest(&e))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .map(std::string::ToString::to_string);
            return Err(AttemptError::Status {
                status: status.as_u16(),
                retry_after,
            });
        }
        Ok(response)
    }

    /// One page attempt including the body read.
    async fn fetch_once(&self, url: &Url) -> Result<FetchResponse, AttemptError> {
        let response = self.send(url).await?;
        let status = response.status().as_u16();
        let final_url = response.url().clone();
        let headers = response.headers().clone();

        let body = if is_direct_document(&final_url, media_type(&headers).as_deref()) {
            debug!(final_url = %final_url, "document response, body left for download");
            Vec::new()
        } else {
            // A body cut off mid-stream surfaces here and is discarded.
            response
                .bytes()
                .await
                .map_err(|e| AttemptError::from_reqwest(&e))?
                .to_vec()
        };

        debug!(status, final_url = %final_url, bytes = body.len(), "response received");

        Ok(FetchResponse {
            status,
            final_url,
            headers,
            body,
        })
    }

    /// One download attempt, streaming into a fresh staging file.
    async fn download_once(
        &self,
        url: &Url,
        sink: &dyn FileSink,
        file_name: &str,
        accept_final_url: &(dyn Fn(&Url) -> bool + Sync),
    ) -> Result<StoredFile, AttemptError> {
        let response = self.send(url).await?;
        let final_url = response.url().clone();
        if !accept_final_url(&final_url) {
            return Err(AttemptError::Redirected(final_url));
        }

        let mut staged = sink.stage(file_name).await?;
        let bytes = match stream_to_staged(response, staged.as_mut()).await {
            Ok(0) => {
                staged.discard().await;
                return Err(AttemptError::EmptyBody);
            }
            Ok(bytes) => bytes,
            Err(error) => {
                debug!(%error, "cleaning up partial file after error");
                staged.discard().await;
                return Err(error);
            }
        };
        let path = staged.commit().await?;

        debug!(path = %path.display(), bytes, final_url = %final_url, "document stored");
        Ok(StoredFile {
            path,
            bytes,
            final_url,
        })
    }
}

/// Streams the response body into `staged`, returning bytes written.
async fn stream_to_staged(
    response: Response,
    staged: &mut dyn StagedFile,
) -> Result<u64, AttemptError> {
    let mut stream = response.bytes_stream();
    let mut bytes_written: u64 = 0;

    while let Some(chunk_result) = stream.next().await {
        let chunk = chunk_result.map_err(|e| AttemptError::from_reqwest(&e))?;
        staged.write_chunk(&chunk).await?;
        bytes_written += chunk.len() as u64;
    }

    Ok(bytes_written)
}

fn permanent_error(url: &Url, attempt: u32, failure: AttemptError) -> FetchError {
    match failure {
        AttemptError::Status { status, .. } => FetchError::http(url.as_str(), status),
        AttemptError::Redirected(final_url) => FetchError::ForeignRedirect {
            url: url.to_string(),
            final_url: final_url.to_string(),
        },
        AttemptError::EmptyBody => FetchError::EmptyBody {
            url: url.to_string(),
        },
        AttemptError::Storage(source) => FetchError::Storage {
            url: url.to_string(),
            source,
        },
        other => FetchError::transient(url.as_str(), attempt, other.to_string()),
    }
}
