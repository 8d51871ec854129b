//! User-Agent string for crawler HTTP traffic.

/// Tool identifier sent in every request (good citizenship; RFC 9308).
const UA_PRODUCT: &str = "crawler";

/// Default User-Agent for listing and document requests (identifies the tool).
#[must_use]
pub(crate) fn default_crawler_user_agent() -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!("{UA_PRODUCT}/{version} (document-archival-tool)")
}
