//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::Parser;

use crawler_core::FileConfig;

/// Crawl a numbered directory space and keep the English PDF/EPUB documents.
///
/// Every processed index is appended to the progress file, so an
/// interrupted run resumes where it stopped. Flags override environment
/// variables, which override the config file.
#[derive(Parser, Debug)]
#[command(name = "crawler")]
#[command(author, version, about)]
pub struct Args {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,

    /// TOML config file with defaults for any of the settings below
    #[arg(long, env = "CRAWLER_CONFIG")]
    pub config: Option<PathBuf>,

    /// Root URL of the numbered directories
    #[arg(long, env = "BASE_URL")]
    pub base_url: Option<String>,

    /// Host expected to serve the actual files
    #[arg(long, env = "PREFERRED_DOMAIN")]
    pub preferred_domain: Option<String>,

    /// First index to process [default: 0]
    #[arg(long = "start", env = "START_INDEX")]
    pub start_index: Option<u64>,

    /// Stop before this index [default: unbounded]
    #[arg(long = "end", env = "END_INDEX")]
    pub end_index: Option<u64>,

    /// Minimum delay between requests in milliseconds [default: 3000]
    #[arg(long = "delay-ms", env = "REQUEST_DELAY_MS")]
    pub request_delay_ms: Option<u64>,

    /// Attempts per request for transient failures (1-10) [default: 3]
    #[arg(long, env = "MAX_RETRIES", value_parser = clap::value_parser!(u32).range(1..=10))]
    pub max_retries: Option<u32>,

    /// First throttle backoff delay in milliseconds [default: 15000]
    #[arg(long = "backoff-base-ms", env = "THROTTLE_BACKOFF_BASE_MS")]
    pub throttle_backoff_base_ms: Option<u64>,

    /// Maximum throttle backoff delay in milliseconds [default: 300000]
    #[arg(long = "backoff-ceiling-ms", env = "THROTTLE_BACKOFF_CEILING_MS")]
    pub throttle_backoff_ceiling_ms: Option<u64>,

    /// Connect timeout in seconds [default: 30]
    #[arg(long = "connect-timeout-secs", env = "CONNECT_TIMEOUT_SECS")]
    pub connect_timeout_secs: Option<u64>,

    /// Timeout for each read from the connection in seconds [default: 300]
    #[arg(long = "read-timeout-secs", env = "READ_TIMEOUT_SECS")]
    pub read_timeout_secs: Option<u64>,

    /// Directory for downloaded files [default: downloads]
    #[arg(long, env = "DOWNLOAD_DIR")]
    pub download_dir: Option<PathBuf>,

    /// Progress file, one completed index per line [default: COMPLETED.txt]
    #[arg(long, env = "PROGRESS_FILE")]
    pub progress_file: Option<PathBuf>,

    /// Keep or drop files whose language cannot be determined [default: reject]
    #[arg(long, env = "ON_DOUBT", value_parser = ["accept", "reject"])]
    pub on_doubt: Option<String>,

    /// Minimum English confidence for a file to be kept (0.0-1.0) [default: 0.5]
    #[arg(long = "min-confidence", env = "MIN_ENGLISH_CONFIDENCE")]
    pub min_english_confidence: Option<f32>,
}

impl Args {
    /// Returns the flag and environment values as the highest config layer.
    #[must_use]
    pub fn overrides(&self) -> FileConfig {
        FileConfig {
            base_url: self.base_url.clone(),
            preferred_domain: self.preferred_domain.clone(),
            start_index: self.start_index,
            end_index: self.end_index,
            request_delay_ms: self.request_delay_ms,
            max_retries: self.max_retries,
            throttle_backoff_base_ms: self.throttle_backoff_base_ms,
            throttle_backoff_ceiling_ms: self.throttle_backoff_ceiling_ms,
            connect_timeout_secs: self.connect_timeout_secs,
            read_timeout_secs: self.read_timeout_secs,
            download_dir: self.download_dir.clone(),
            progress_file: self.progress_file.clone(),
            on_doubt: self.on_doubt.clone(),
            min_english_confidence: self.min_english_confidence,
        }
    }

    /// Default log level: quiet beats verbose.
    #[must_use]
    pub fn default_log_level(&self) -> &'static str {
        if self.quiet {
            "error"
        } else {
            match self.verbose {
                0 => "info",
                1 => "debug",
                _ => "trace",
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_verbose_flag_increments_count() {
        let args = Args::try_parse_from(["crawler", "-v"]).unwrap();
        assert_eq!(args.verbose, 1);
        assert_eq!(args.default_log_level(), "debug");

        let args = Args::try_parse_from(["crawler", "-vv"]).unwrap();
        assert_eq!(args.verbose, 2);
        assert_eq!(args.default_log_level(), "trace");
    }

    #[test]
    fn test_cli_quiet_overrides_verbose() {
        let args = Args::try_parse_from(["crawler", "-q", "-v"]).unwrap();
        assert!(args.quiet);
        assert_eq!(args.default_log_level(), "error");
    }

    #[test]
    fn test_cli_help_flag_shows_usage() {
        let result = Args::try_parse_from(["crawler", "--help"]);
        let err = result.unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayHelp);
    }

    #[test]
    fn test_cli_invalid_flag_returns_error() {
        let err = Args::try_parse_from(["crawler", "--concurrency", "4"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::UnknownArgument);
    }

    #[test]
    fn test_cli_range_flags_map_to_layer() {
        let args = Args::try_parse_from([
            "crawler",
            "--base-url",
            "https://archive.example.org/d/",
            "--preferred-domain",
            "files.example.org",
            "--start",
            "10",
            "--end",
            "20",
            "--delay-ms",
            "0",
        ])
        .unwrap();

        let layer = args.overrides();
        assert_eq!(layer.base_url.as_deref(), Some("https://archive.example.org/d/"));
        assert_eq!(layer.preferred_domain.as_deref(), Some("files.example.org"));
        assert_eq!(layer.start_index, Some(10));
        assert_eq!(layer.end_index, Some(20));
        assert_eq!(layer.request_delay_ms, Some(0));
    }

    #[test]
    fn test_cli_timeout_flags_map_to_layer() {
        let args = Args::try_parse_from([
            "crawler",
            "--connect-timeout-secs",
            "5",
            "--read-timeout-secs",
            "600",
        ])
        .unwrap();

        let layer = args.overrides();
        assert_eq!(layer.connect_timeout_secs, Some(5));
        assert_eq!(layer.read_timeout_secs, Some(600));
    }

    #[test]
    fn test_cli_max_retries_range() {
        let args = Args::try_parse_from(["crawler", "--max-retries", "10"]).unwrap();
        assert_eq!(args.max_retries, Some(10));

        assert!(Args::try_parse_from(["crawler", "--max-retries", "0"]).is_err());
        assert!(Args::try_parse_from(["crawler", "--max-retries", "11"]).is_err());
    }

    #[test]
    fn test_cli_on_doubt_values() {
        let args = Args::try_parse_from(["crawler", "--on-doubt", "accept"]).unwrap();
        assert_eq!(args.on_doubt.as_deref(), Some("accept"));

        assert!(Args::try_parse_from(["crawler", "--on-doubt", "maybe"]).is_err());
    }

    #[test]
    fn test_cli_negative_index_rejected() {
        assert!(Args::try_parse_from(["crawler", "--start", "-1"]).is_err());
    }
}
