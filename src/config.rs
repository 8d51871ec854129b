//! Run configuration: file loading, layering and validation.
//!
//! Settings come from three layers. The binary folds CLI flags and
//! environment variables into one [`FileConfig`] of overrides, lays it over
//! the optional TOML config file with [`FileConfig::or`], and resolves the
//! result into a validated [`RunConfig`]. Anything still unset falls back to
//! the defaults below.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, instrument};
use url::Url;

use crate::classify::{DEFAULT_MIN_ENGLISH_CONFIDENCE, DoubtPolicy, canonical_host};
use crate::crawl::{DEFAULT_BACKOFF_BASE, DEFAULT_BACKOFF_CEILING};
use crate::fetch::DEFAULT_MAX_RETRIES;
use crate::fetch::constants::{CONNECT_TIMEOUT_SECS, DEFAULT_REQUEST_DELAY, READ_TIMEOUT_SECS};

/// Default directory for downloaded files.
pub const DEFAULT_DOWNLOAD_DIR: &str = "downloads";

/// Default progress file name.
pub const DEFAULT_PROGRESS_FILE: &str = "COMPLETED.txt";

const MAX_RETRIES_RANGE: std::ops::RangeInclusive<u32> = 1..=10;
const TIMEOUT_SECS_RANGE: std::ops::RangeInclusive<u64> = 1..=3600;

/// Invalid or unreadable configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required setting has no value in any layer.
    #[error("missing required setting `{key}` (flag --{flag} or env {env})")]
    Missing {
        /// Config file key.
        key: &'static str,
        /// CLI flag name.
        flag: &'static str,
        /// Environment variable.
        env: &'static str,
    },

    /// A setting has an unusable value.
    #[error("invalid value for `{key}`: {message}")]
    Invalid {
        /// Config file key.
        key: &'static str,
        /// What is wrong with it.
        message: String,
    },

    /// The config file could not be read.
    #[error("cannot read config file {path}: {source}")]
    Read {
        /// Config file path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The config file is not valid TOML for this schema.
    #[error("cannot parse config file {path}: {source}")]
    Parse {
        /// Config file path.
        path: PathBuf,
        /// Underlying parse error.
        #[source]
        source: toml::de::Error,
    },
}

impl ConfigError {
    fn invalid(key: &'static str, message: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            message: message.into(),
        }
    }
}

/// One layer of optional settings.
///
/// Deserialized from the TOML config file; the binary also builds one from
/// CLI flags and environment variables.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    /// Root URL of the numbered directories.
    pub base_url: Option<String>,
    /// Host expected to serve the files.
    pub preferred_domain: Option<String>,
    /// First index to process.
    pub start_index: Option<u64>,
    /// Exclusive upper bound.
    pub end_index: Option<u64>,
    /// Minimum gap between requests in milliseconds.
    pub request_delay_ms: Option<u64>,
    /// Attempts per request for transient failures.
    pub max_retries: Option<u32>,
    /// First throttle delay in milliseconds.
    pub throttle_backoff_base_ms: Option<u64>,
    /// Maximum throttle delay in milliseconds.
    pub throttle_backoff_ceiling_ms: Option<u64>,
    /// Connect timeout in seconds.
    pub connect_timeout_secs: Option<u64>,
    /// Read timeout in seconds, per read from the connection.
    pub read_timeout_secs: Option<u64>,
    /// Where accepted files are written.
    pub download_dir: Option<PathBuf>,
    /// Progress file path.
    pub progress_file: Option<PathBuf>,
    /// `accept` or `reject` when the language is unclear.
    pub on_doubt: Option<String>,
    /// Minimum English confidence in `[0, 1]`.
    pub min_english_confidence: Option<f32>,
}

impl FileConfig {
    /// Reads and parses a TOML config file.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Read`] or [`ConfigError::Parse`].
    #[instrument(skip(path), fields(path = %path.as_ref().display()))]
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        debug!("config file loaded");
        Ok(config)
    }

    /// Fills every unset field of `self` from `lower`.
    #[must_use]
    pub fn or(self, lower: Self) -> Self {
        Self {
            base_url: self.base_url.or(lower.base_url),
            preferred_domain: self.preferred_domain.or(lower.preferred_domain),
            start_index: self.start_index.or(lower.start_index),
            end_index: self.end_index.or(lower.end_index),
            request_delay_ms: self.request_delay_ms.or(lower.request_delay_ms),
            max_retries: self.max_retries.or(lower.max_retries),
            throttle_backoff_base_ms: self
                .throttle_backoff_base_ms
                .or(lower.throttle_backoff_base_ms),
            throttle_backoff_ceiling_ms: self
                .throttle_backoff_ceiling_ms
                .or(lower.throttle_backoff_ceiling_ms),
            connect_timeout_secs: self.connect_timeout_secs.or(lower.connect_timeout_secs),
            read_timeout_secs: self.read_timeout_secs.or(lower.read_timeout_secs),
            download_dir: self.download_dir.or(lower.download_dir),
            progress_file: self.progress_file.or(lower.progress_file),
            on_doubt: self.on_doubt.or(lower.on_doubt),
            min_english_confidence: self.min_english_confidence.or(lower.min_english_confidence),
        }
    }
}

/// Validated settings for one run.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Root URL of the numbered directories, always ending in `/`.
    pub base_url: Url,
    /// Normalized host expected to serve the files.
    pub preferred_domain: String,
    /// First index to process.
    pub start_index: u64,
    /// Exclusive upper bound; `None` runs until interrupted.
    pub end_index: Option<u64>,
    /// Minimum gap between requests.
    pub request_delay: Duration,
    /// Attempts per request for transient failures.
    pub max_retries: u32,
    /// First throttle delay.
    pub throttle_backoff_base: Duration,
    /// Maximum throttle delay.
    pub throttle_backoff_ceiling: Duration,
    /// HTTP connect timeout.
    pub connect_timeout: Duration,
    /// HTTP read timeout, per read from the connection.
    pub read_timeout: Duration,
    /// Where accepted files are written.
    pub download_dir: PathBuf,
    /// Progress file path.
    pub progress_file: PathBuf,
    /// Policy for samples without language signal.
    pub doubt_policy: DoubtPolicy,
    /// Minimum English confidence for acceptance.
    pub min_english_confidence: f32,
}

impl RunConfig {
    /// Creates a config with defaults for everything but the two required settings.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Invalid`] if either value is unusable.
    pub fn new(base_url: &str, preferred_domain: &str) -> Result<Self, ConfigError> {
        Self::resolve(FileConfig {
            base_url: Some(base_url.to_string()),
            preferred_domain: Some(preferred_domain.to_string()),
            ..FileConfig::default()
        })
    }

    /// Resolves a merged layer into a validated config.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Missing`] for absent required settings and
    /// [`ConfigError::Invalid`] for values out of range.
    pub fn resolve(layer: FileConfig) -> Result<Self, ConfigError> {
        let base_url = layer.base_url.ok_or(ConfigError::Missing {
            key: "base_url",
            flag: "base-url",
            env: "BASE_URL",
        })?;
        let base_url = parse_base_url(&base_url)?;

        let preferred_domain = layer.preferred_domain.ok_or(ConfigError::Missing {
            key: "preferred_domain",
            flag: "preferred-domain",
            env: "PREFERRED_DOMAIN",
        })?;
        let preferred_domain = parse_domain(&preferred_domain)?;

        let start_index = layer.start_index.unwrap_or(0);
        let end_index = layer.end_index;
        if let Some(end) = end_index
            && end <= start_index
        {
            return Err(ConfigError::invalid(
                "end_index",
                format!("{end} must be greater than start_index {start_index}"),
            ));
        }

        let max_retries = layer.max_retries.unwrap_or(DEFAULT_MAX_RETRIES);
        if !MAX_RETRIES_RANGE.contains(&max_retries) {
            return Err(ConfigError::invalid(
                "max_retries",
                format!("{max_retries}, expected range 1..=10"),
            ));
        }

        let throttle_backoff_base = layer
            .throttle_backoff_base_ms
            .map_or(DEFAULT_BACKOFF_BASE, Duration::from_millis);
        let throttle_backoff_ceiling = layer
            .throttle_backoff_ceiling_ms
            .map_or(DEFAULT_BACKOFF_CEILING, Duration::from_millis);
        if throttle_backoff_base > throttle_backoff_ceiling {
            return Err(ConfigError::invalid(
                "throttle_backoff_base_ms",
                format!(
                    "{}ms exceeds ceiling {}ms",
                    throttle_backoff_base.as_millis(),
                    throttle_backoff_ceiling.as_millis()
                ),
            ));
        }

        let connect_timeout = timeout(
            "connect_timeout_secs",
            layer.connect_timeout_secs.unwrap_or(CONNECT_TIMEOUT_SECS),
        )?;
        let read_timeout = timeout(
            "read_timeout_secs",
            layer.read_timeout_secs.unwrap_or(READ_TIMEOUT_SECS),
        )?;

        let doubt_policy = match layer.on_doubt.as_deref() {
            Some(value) => value
                .parse::<DoubtPolicy>()
                .map_err(|message| ConfigError::invalid("on_doubt", message))?,
            None => DoubtPolicy::default(),
        };

        let min_english_confidence = layer
            .min_english_confidence
            .unwrap_or(DEFAULT_MIN_ENGLISH_CONFIDENCE);
        if !(0.0..=1.0).contains(&min_english_confidence) {
            return Err(ConfigError::invalid(
                "min_english_confidence",
                format!("{min_english_confidence}, expected range 0.0..=1.0"),
            ));
        }

        Ok(Self {
            base_url,
            preferred_domain,
            start_index,
            end_index,
            request_delay: layer
                .request_delay_ms
                .map_or(DEFAULT_REQUEST_DELAY, Duration::from_millis),
            max_retries,
            throttle_backoff_base,
            throttle_backoff_ceiling,
            connect_timeout,
            read_timeout,
            download_dir: layer
                .download_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DOWNLOAD_DIR)),
            progress_file: layer
                .progress_file
                .unwrap_or_else(|| PathBuf::from(DEFAULT_PROGRESS_FILE)),
            doubt_policy,
            min_english_confidence,
        })
    }

    /// Returns true if `index` lies inside the configured range.
    #[must_use]
    pub fn in_range(&self, index: u64) -> bool {
        index >= self.start_index && self.end_index.is_none_or(|end| index < end)
    }
}

fn parse_base_url(value: &str) -> Result<Url, ConfigError> {
    let mut url = Url::parse(value.trim())
        .map_err(|e| ConfigError::invalid("base_url", format!("'{value}': {e}")))?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return Err(ConfigError::invalid(
            "base_url",
            format!("'{value}' is not an http(s) URL"),
        ));
    }
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

fn parse_domain(value: &str) -> Result<String, ConfigError> {
    // Accept a full URL as well as a bare host.
    let host = Url::parse(value.trim())
        .ok()
        .and_then(|url| url.host_str().map(ToString::to_string))
        .unwrap_or_else(|| value.to_string());
    let host = canonical_host(&host);
    if host.is_empty() || host.contains(['/', ' ']) {
        return Err(ConfigError::invalid(
            "preferred_domain",
            format!("'{value}' is not a host name"),
        ));
    }
    Ok(host)
}

fn timeout(key: &'static str, secs: u64) -> Result<Duration, ConfigError> {
    if !TIMEOUT_SECS_RANGE.contains(&secs) {
        return Err(ConfigError::invalid(
            key,
            format!("{secs}, expected range 1..=3600"),
        ));
    }
    Ok(Duration::from_secs(secs))
}
