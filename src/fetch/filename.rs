//! Filename derivation and sanitization for discovered documents.

use std::path::{Component, Path};

use tracing::debug;
use url::Url;

/// Longest file name most filesystems accept, in bytes.
pub const MAX_FILENAME_BYTES: usize = 255;

/// Human-readable filename for a document URL.
///
/// Percent-decodes the last path segment and sanitizes it for the
/// filesystem. Falls back to `index_<n>.bin` when the URL has no usable
/// segment.
#[must_use]
pub fn friendly_filename(url: &Url, index: u64) -> String {
    match last_segment(url) {
        Some(name) => name,
        None => format!("index_{index}.bin"),
    }
}

/// Filename for a document served directly at an index.
///
/// A `Content-Disposition` filename wins over the URL path. A name without
/// an extension gets the one implied by the media type, and a path-derived
/// name then also gets the index appended, since endpoints like `/get?id=N`
/// share one path segment across many documents.
#[must_use]
pub fn document_filename(
    url: &Url,
    index: u64,
    content_disposition: Option<&str>,
    content_type: Option<&str>,
) -> String {
    if let Some(name) = content_disposition
        .and_then(parse_content_disposition)
        .map(|name| sanitize_filename(&name))
    {
        return match (extension_of(&name), content_type.and_then(extension_from_content_type)) {
            (None, Some(ext)) => sanitize_filename(&format!("{name}.{ext}")),
            _ => name,
        };
    }

    let ext = content_type.and_then(extension_from_content_type);
    match (last_segment(url), ext) {
        (Some(name), _) if extension_of(&name).is_some() => name,
        (Some(name), Some(ext)) => sanitize_filename(&format!("{name}_{index}.{ext}")),
        (Some(name), None) => name,
        (None, Some(ext)) => format!("index_{index}.{ext}"),
        (None, None) => format!("index_{index}.bin"),
    }
}

fn last_segment(url: &Url) -> Option<String> {
    let last = url.path_segments()?.next_back()?;
    if last.is_empty() {
        return None;
    }
    let decoded = urlencoding::decode(last).unwrap_or_else(|e| {
        debug!(segment = %last, error = %e, "URL decoding failed, using raw segment");
        last.into()
    });
    Some(sanitize_filename(&decoded))
}

/// Extension for a document media type, without the dot.
#[must_use]
pub fn extension_from_content_type(content_type: &str) -> Option<&'static str> {
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();

    match mime.as_str() {
        "application/pdf" => Some("pdf"),
        "application/epub+zip" => Some("epub"),
        "text/plain" => Some("txt"),
        "text/html" => Some("html"),
        "application/zip" => Some("zip"),
        _ => None,
    }
}

/// Extracts the filename from a `Content-Disposition` header.
///
/// Handles:
/// - `attachment; filename="example.pdf"`
/// - `attachment; filename=example.pdf`
/// - `attachment; filename*=UTF-8''example.pdf` (RFC 5987, preferred)
#[must_use]
pub fn parse_content_disposition(header: &str) -> Option<String> {
    if let Some(pos) = header.find("filename*=") {
        let value = header[pos + 10..].trim();
        if let Some(quote_pos) = value.find("''") {
            let encoded = &value[quote_pos + 2..];
            let end = encoded.find(';').unwrap_or(encoded.len());
            let encoded = encoded[..end].trim().trim_matches('"');
            if let Ok(decoded) = urlencoding::decode(encoded)
                && !decoded.trim().is_empty()
            {
                return Some(decoded.into_owned());
            }
        }
    }

    let pos = header.find("filename=")?;
    let value = header[pos + 9..].trim();
    let name = match value.strip_prefix('"') {
        Some(quoted) => &quoted[..quoted.find('"')?],
        None => value[..value.find(';').unwrap_or(value.len())].trim(),
    };
    (!name.trim().is_empty()).then(|| name.to_string())
}

/// Lowercased extension without the dot, if the name has a plausible one.
#[must_use]
pub fn extension_of(name: &str) -> Option<String> {
    let dot_index = name.rfind('.')?;
    let ext = &name[dot_index + 1..];
    if ext.is_empty() || ext.len() > 11 {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// Filename without its final extension.
#[must_use]
pub fn file_stem(name: &str) -> &str {
    match name.rfind('.') {
        Some(pos) if pos > 0 => &name[..pos],
        _ => name,
    }
}

/// Sanitizes filename for filesystem safety.
///
/// Replaces characters that are invalid on common filesystems
/// (`/ \ : * ? " < > |` and control characters), neutralizes
/// dot segments such as `..` and truncates to [`MAX_FILENAME_BYTES`],
/// keeping the extension.
#[must_use]
pub fn sanitize_filename(name: &str) -> String {
    let sanitized: String = name
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    if sanitized.is_empty() {
        return "_".to_string();
    }

    let sanitized = if is_safe_filename_segment(&sanitized) {
        sanitized
    } else {
        sanitized
            .chars()
            .map(|c| if c == '.' { '_' } else { c })
            .collect()
    };
    truncate_filename(sanitized)
}

fn truncate_filename(name: String) -> String {
    if name.len() <= MAX_FILENAME_BYTES {
        return name;
    }
    let suffix = match extension_of(&name) {
        Some(_) => &name[file_stem(&name).len()..],
        None => "",
    };
    let stem = floor_char_boundary(&name, MAX_FILENAME_BYTES - suffix.len());
    format!("{}{suffix}", stem.trim_end())
}

fn floor_char_boundary(s: &str, max: usize) -> &str {
    let mut end = max.min(s.len());
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

fn is_safe_filename_segment(name: &str) -> bool {
    !Path::new(name).components().any(|component| {
        matches!(
            component,
            Component::CurDir | Component::ParentDir | Component::RootDir | Component::Prefix(_)
        )
    })
}
