//! Embedded JSON payload extraction.
//!
//! The portal's API endpoints are fetched through the browser, which wraps a
//! raw JSON response in `<pre>` when rendering it. This module pulls the JSON
//! back out of the rendered HTML.

use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

fn pre_block() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<pre(?:\s[^>]*)?>(.+?)</pre>").expect("valid regex"))
}

/// Locate the first `<pre>` block in `page` and parse it as JSON.
///
/// Returns `None` when there is no wrapper or the content is not valid JSON.
/// Parse failures are logged, never returned.
pub fn extract_payload(page: &str) -> Option<Value> {
    let body = pre_block().captures(page)?.get(1)?.as_str();
    let text = unescape_text(body);

    match serde_json::from_str(&text) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!("failed to parse embedded JSON: {e}");
            None
        }
    }
}

/// Undo the escapes a DOM serializer applies to text nodes.
fn unescape_text(raw: &str) -> String {
    if !raw.contains('&') {
        return raw.to_string();
    }
    // `&amp;` last so that `&amp;lt;` stays `&lt;`.
    raw.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}
