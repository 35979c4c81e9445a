//! Best-effort extraction of a readable reason from upstream failure text.

use std::sync::LazyLock;

use regex::Regex;

static MESSAGE_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Message:\s*([^.]+)").expect("valid message marker regex"));

/// First sentence-like fragment after a `Message:` marker, or the whole text
/// when there is no usable marker. Never returns an empty string for
/// non-empty input.
pub fn extract_upstream_message(raw: &str) -> String {
    let fragment = MESSAGE_MARKER
        .captures(raw)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim())
        .filter(|s| !s.is_empty());

    match fragment {
        Some(s) => s.to_string(),
        None => raw.to_string(),
    }
}
