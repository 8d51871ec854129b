//! Shared fixtures for integration tests: listing pages, scripted responders, run configs.

#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crawler_core::{FileConfig, RunConfig};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

/// Cyrillic title ("Война и мир"), percent-encoded.
pub const RUSSIAN_PDF: &str = "/files/%D0%92%D0%BE%D0%B9%D0%BD%D0%B0_%D0%B8_%D0%BC%D0%B8%D1%80.pdf";

/// Greek title ("Ἰλιάς"), percent-encoded.
pub const GREEK_EPUB: &str = "/files/%E1%BC%B8%CE%BB%CE%B9%CE%AC%CF%82.epub";

/// French title.
pub const FRENCH_PDF: &str = "/files/Histoire_de_la_France.pdf";

/// English title.
pub const ENGLISH_PDF: &str = "/files/The_Art_of_Digital_Forensics.pdf";

/// Decoded file name of [`ENGLISH_PDF`].
pub const ENGLISH_PDF_NAME: &str = "The_Art_of_Digital_Forensics.pdf";

/// Renders a minimal autoindex-style listing page.
pub fn listing_html(hrefs: &[&str]) -> String {
    let mut html = String::from("<html><body><h1>Index</h1>\n<a href=\"../\">../</a>\n");
    for href in hrefs {
        html.push_str(&format!("<a href=\"{href}\">{href}</a>\n"));
    }
    html.push_str("</body></html>");
    html
}

/// Mounts an HTML listing at `/d/{index}`.
pub async fn mount_listing(server: &MockServer, index: u64, hrefs: &[&str]) {
    Mock::given(method("GET"))
        .and(path(format!("/d/{index}")))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Content-Type", "text/html; charset=utf-8")
                .set_body_string(listing_html(hrefs)),
        )
        .mount(server)
        .await;
}

/// Mounts a 404 at `/d/{index}`.
pub async fn mount_missing(server: &MockServer, index: u64) {
    Mock::given(method("GET"))
        .and(path(format!("/d/{index}")))
        .respond_with(ResponseTemplate::new(404))
        .mount(server)
        .await;
}

/// Mounts a PDF body at `file_path`, expecting exactly `times` requests.
pub async fn mount_pdf(server: &MockServer, file_path: &str, body: &[u8], times: u64) {
    Mock::given(method("GET"))
        .and(path(file_path))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Content-Type", "application/pdf")
                .set_body_bytes(body.to_vec()),
        )
        .expect(times)
        .mount(server)
        .await;
}

/// Plays back `responses` in order, repeating the last one.
pub struct SequenceResponder {
    count: Arc<AtomicUsize>,
    responses: Vec<ResponseTemplate>,
}

impl SequenceResponder {
    pub fn new(responses: Vec<ResponseTemplate>) -> Self {
        assert!(!responses.is_empty(), "need at least one response");
        Self {
            count: Arc::new(AtomicUsize::new(0)),
            responses,
        }
    }
}

impl Respond for SequenceResponder {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        let n = self.count.fetch_add(1, Ordering::SeqCst);
        self.responses[n.min(self.responses.len() - 1)].clone()
    }
}

/// Fast run config against `server`: no pacing, millisecond backoff.
pub fn fast_layer(server: &MockServer, dir: &Path, start: u64, end: u64) -> FileConfig {
    FileConfig {
        base_url: Some(format!("{}/d/", server.uri())),
        preferred_domain: Some("127.0.0.1".to_string()),
        start_index: Some(start),
        end_index: Some(end),
        request_delay_ms: Some(0),
        max_retries: Some(1),
        throttle_backoff_base_ms: Some(10),
        throttle_backoff_ceiling_ms: Some(100),
        download_dir: Some(dir.join("downloads")),
        progress_file: Some(dir.join("COMPLETED.txt")),
        ..FileConfig::default()
    }
}

/// Resolved form of [`fast_layer`].
pub fn fast_config(server: &MockServer, dir: &Path, start: u64, end: u64) -> RunConfig {
    RunConfig::resolve(fast_layer(server, dir, start, end)).expect("valid test config")
}

/// Reads the progress file as a list of indices.
pub fn recorded_indices(dir: &Path) -> Vec<u64> {
    std::fs::read_to_string(dir.join("COMPLETED.txt"))
        .expect("progress file exists")
        .lines()
        .filter(|line| !line.trim().is_empty() && !line.starts_with('#'))
        .map(|line| line.trim().parse().expect("numeric line"))
        .collect()
}

/// Lists file names in the downloads directory, sorted.
pub fn downloaded_files(dir: &Path) -> Vec<String> {
    let Ok(entries) = std::fs::read_dir(dir.join("downloads")) else {
        return Vec::new();
    };
    let mut names: Vec<String> = entries
        .map(|entry| {
            entry
                .expect("dir entry")
                .file_name()
                .to_string_lossy()
                .into_owned()
        })
        .collect();
    names.sort();
    names
}
