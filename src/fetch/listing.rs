//! Resolution of one numbered index into candidate documents.
//!
//! An index URL either serves an HTML directory listing, whose anchors
//! become candidates, or answers (possibly via redirect) with a document
//! directly, which becomes a single candidate pointing at the final URL.

use std::collections::HashSet;

use scraper::{Html, Selector};
use tracing::{debug, instrument};
use url::Url;

use super::client::{FetchResponse, Fetcher};
use super::error::FetchError;
use super::filename::{document_filename, extension_of, friendly_filename};

/// Media types treated as documents rather than listings.
pub const DOCUMENT_MIME_TYPES: &[&str] = &["application/pdf", "application/epub+zip"];

/// File extensions treated as documents.
pub const DOCUMENT_EXTENSIONS: &[&str] = &["pdf", "epub"];

/// A file discovered at an index, pending classification.
#[derive(Debug, Clone)]
pub struct Candidate {
    /// The index this candidate was discovered at.
    pub index: u64,
    /// Absolute URL of the file.
    pub url: Url,
    /// Decoded, filesystem-safe file name.
    pub file_name: String,
    /// Anchor text from the listing, when there was one.
    pub link_text: Option<String>,
    /// Declared media type, when known.
    pub content_type: Option<String>,
}

impl Candidate {
    /// Creates a candidate for a listing link.
    #[must_use]
    pub fn from_link(index: u64, url: Url, link_text: Option<String>) -> Self {
        let file_name = friendly_filename(&url, index);
        Self {
            index,
            url,
            file_name,
            link_text,
            content_type: None,
        }
    }

    /// Lowercased extension of the file name or URL path.
    #[must_use]
    pub fn extension(&self) -> Option<String> {
        extension_of(&self.file_name).or_else(|| extension_of(self.url.path()))
    }
}

/// Builds the listing URL for `index` under `base_url`.
///
/// A missing trailing slash on the base is tolerated, so both
/// `https://example.org/d` and `https://example.org/d/` give `.../d/7`.
///
/// # Errors
///
/// Returns [`FetchError::InvalidUrl`] if the base cannot be a base URL.
pub fn listing_url(base_url: &Url, index: u64) -> Result<Url, FetchError> {
    let mut base = base_url.clone();
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    base.join(&index.to_string())
        .map_err(|_| FetchError::invalid_url(format!("{base_url}{index}")))
}

/// Fetches the listing for `index` and returns its candidates.
///
/// # Errors
///
/// Any [`FetchError`] from the fetcher, plus [`FetchError::NotFound`] when
/// the listing contains no usable links.
#[instrument(skip(fetcher, base_url), fields(base_url = %base_url))]
pub async fn resolve_index(
    fetcher: &Fetcher,
    base_url: &Url,
    index: u64,
) -> Result<Vec<Candidate>, FetchError> {
    let url = listing_url(base_url, index)?;
    let response = fetcher.fetch(&url).await?;
    candidates_from_response(index, &url, response)
}

/// Turns a listing or direct-document response into candidates.
///
/// # Errors
///
/// Returns [`FetchError::NotFound`] for a listing without links.
pub fn candidates_from_response(
    index: u64,
    requested_url: &Url,
    response: FetchResponse,
) -> Result<Vec<Candidate>, FetchError> {
    let content_type = response.content_type();

    if is_direct_document(&response.final_url, content_type.as_deref()) {
        let file_name = document_filename(
            &response.final_url,
            index,
            response.content_disposition(),
            content_type.as_deref(),
        );
        debug!(final_url = %response.final_url, file = %file_name, "index resolved directly to a document");
        return Ok(vec![Candidate {
            index,
            url: response.final_url,
            file_name,
            link_text: None,
            content_type,
        }]);
    }

    let html = String::from_utf8_lossy(&response.body);
    let candidates: Vec<Candidate> = extract_links(&html, &response.final_url)
        .into_iter()
        .map(|(url, text)| Candidate::from_link(index, url, text))
        .collect();

    if candidates.is_empty() {
        debug!("listing has no links");
        return Err(FetchError::not_found(requested_url.as_str()));
    }

    debug!(count = candidates.len(), "listing links extracted");
    Ok(candidates)
}

/// Extracts unique absolute file links and their anchor text from HTML.
///
/// Relative links are resolved against `page_url`. Fragments are dropped,
/// non-HTTP schemes and directory links (paths ending in `/`) are skipped,
/// and each URL is kept once in document order.
#[must_use]
pub fn extract_links(html: &str, page_url: &Url) -> Vec<(Url, Option<String>)> {
    let Ok(selector) = Selector::parse("a[href]") else {
        return Vec::new();
    };
    let document = Html::parse_document(html);

    let mut seen = HashSet::new();
    let mut links = Vec::new();
    for element in document.select(&selector) {
        let Some(href) = element.value().attr("href") else {
            continue;
        };
        let Ok(mut url) = page_url.join(href.trim()) else {
            debug!(href, "skipping unparseable link");
            continue;
        };
        if !matches!(url.scheme(), "http" | "https") || url.path().ends_with('/') {
            continue;
        }
        url.set_fragment(None);
        if !seen.insert(url.to_string()) {
            continue;
        }

        let text = element.text().collect::<Vec<_>>().join(" ");
        let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
        links.push((url, (!text.is_empty()).then_some(text)));
    }
    links
}

/// Whether a response is a document rather than a page to parse.
pub(crate) fn is_direct_document(final_url: &Url, content_type: Option<&str>) -> bool {
    if content_type.is_some_and(|mime| DOCUMENT_MIME_TYPES.contains(&mime)) {
        return true;
    }
    if content_type.is_some_and(|mime| mime == "text/html") {
        return false;
    }
    extension_of(final_url.path()).is_some_and(|ext| DOCUMENT_EXTENSIONS.contains(&ext.as_str()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue};

    use super::*;

    fn page() -> Url {
        Url::parse("https://example.org/d/7").unwrap()
    }

    fn response(final_url: &str, content_type: &str, body: &[u8]) -> FetchResponse {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_str(content_type).unwrap());
        FetchResponse {
            status: 200,
            final_url: Url::parse(final_url).unwrap(),
            headers,
            body: body.to_vec(),
        }
    }

    #[test]
    fn test_listing_url_with_and_without_trailing_slash() {
        let with = Url::parse("https://example.org/d/").unwrap();
        let without = Url::parse("https://example.org/d").unwrap();
        assert_eq!(
            listing_url(&with, 7).unwrap().as_str(),
            "https://example.org/d/7"
        );
        assert_eq!(
            listing_url(&without, 7).unwrap().as_str(),
            "https://example.org/d/7"
        );
    }

    #[test]
    fn test_extract_links_resolves_relative_and_keeps_text() {
        let html = r#"<html><body>
            <a href="https://files.example.org/a/Book%20One.pdf">Book  One</a>
            <a href="/b/two.epub">Two</a>
        </body></html>"#;
        let links = extract_links(html, &page());
        assert_eq!(links.len(), 2);
        assert_eq!(
            links[0].0.as_str(),
            "https://files.example.org/a/Book%20One.pdf"
        );
        assert_eq!(links[0].1.as_deref(), Some("Book One"));
        assert_eq!(links[1].0.as_str(), "https://example.org/b/two.epub");
    }

    #[test]
    fn test_extract_links_deduplicates_and_strips_fragments() {
        let html = r##"
            <a href="https://files.example.org/a.pdf">a</a>
            <a href="https://files.example.org/a.pdf#page=2">a again</a>
            <a href="https://files.example.org/a.pdf">a third time</a>
        "##;
        let links = extract_links(html, &page());
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].0.as_str(), "https://files.example.org/a.pdf");
    }

    #[test]
    fn test_extract_links_skips_directories_and_other_schemes() {
        let html = r#"
            <a href="../">Parent</a>
            <a href="mailto:admin@example.org">mail</a>
            <a href="javascript:void(0)">js</a>
            <a href="https://files.example.org/doc.pdf">doc</a>
        "#;
        let links = extract_links(html, &page());
        assert_eq!(links.len(), 1);
        assert!(links[0].0.as_str().ends_with("doc.pdf"));
    }

    #[test]
    fn test_candidates_from_html_listing() {
        let body = br#"<a href="https://files.example.org/x/Deep%20Learning.pdf">Deep Learning</a>"#;
        let candidates = candidates_from_response(
            7,
            &page(),
            response("https://example.org/d/7", "text/html", body),
        )
        .unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].index, 7);
        assert_eq!(candidates[0].file_name, "Deep Learning.pdf");
        assert_eq!(candidates[0].content_type, None);
    }

    #[test]
    fn test_empty_listing_is_not_found() {
        let result = candidates_from_response(
            7,
            &page(),
            response("https://example.org/d/7", "text/html", b"<html><body>empty</body></html>"),
        );
        assert!(matches!(result, Err(FetchError::NotFound { .. })));
    }

    #[test]
    fn test_direct_document_by_content_type() {
        let candidates = candidates_from_response(
            7,
            &page(),
            response(
                "https://files.example.org/get?id=7",
                "application/pdf",
                b"%PDF-1.7",
            ),
        )
        .unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].content_type.as_deref(), Some("application/pdf"));
        assert_eq!(candidates[0].url.as_str(), "https://files.example.org/get?id=7");
        assert_eq!(candidates[0].file_name, "get_7.pdf");
    }

    #[test]
    fn test_direct_document_named_by_content_disposition() {
        let mut direct = response("https://files.example.org/get?id=7", "application/pdf", b"");
        direct.headers.insert(
            reqwest::header::CONTENT_DISPOSITION,
            HeaderValue::from_static("attachment; filename=\"Security_Guide_7.pdf\""),
        );
        let candidates = candidates_from_response(7, &page(), direct).unwrap();
        assert_eq!(candidates[0].file_name, "Security_Guide_7.pdf");
        assert_eq!(candidates[0].extension().as_deref(), Some("pdf"));
    }

    #[test]
    fn test_direct_document_by_redirect_target_extension() {
        let candidates = candidates_from_response(
            7,
            &page(),
            response(
                "https://files.example.org/x/Manual.epub",
                "application/octet-stream",
                b"PK",
            ),
        )
        .unwrap();
        assert_eq!(candidates[0].file_name, "Manual.epub");
        assert_eq!(candidates[0].url.as_str(), "https://files.example.org/x/Manual.epub");
    }

    #[test]
    fn test_candidate_extension_prefers_file_name() {
        let candidate = Candidate::from_link(
            1,
            Url::parse("https://files.example.org/x/Report.PDF").unwrap(),
            None,
        );
        assert_eq!(candidate.extension().as_deref(), Some("pdf"));
    }
}
