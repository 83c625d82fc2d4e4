//! Redaction helpers for anything that may end up in a log line or an error message.

use url::Url;

/// Longest upstream body excerpt carried in an error.
pub const MAX_EXCERPT_BYTES: usize = 1024;

const REDACTED: &str = "[REDACTED]";

#[must_use]
pub fn redact_url(url: &Url) -> String {
    let mut u = url.clone();
    // Best-effort: drop credentials + query + fragment.
    let _ = u.set_username("");
    let _ = u.set_password(None);
    u.set_query(None);
    u.set_fragment(None);
    u.to_string()
}

/// Redact a raw URL string. Unparseable input is not echoed.
#[must_use]
pub fn redact_url_str(raw: &str) -> String {
    Url::parse(raw).map_or_else(|_| "<invalid url>".to_string(), |u| redact_url(&u))
}

#[must_use]
pub fn sanitize_reqwest_error(e: &reqwest::Error) -> String {
    let mut msg = e.to_string();
    if let Some(u) = e.url() {
        msg = msg.replace(u.as_str(), &redact_url(u));
    }
    msg
}

/// Replace every occurrence of a secret with a fixed marker.
#[must_use]
pub fn scrub_secrets(text: &str, secrets: &[&str]) -> String {
    let mut out = text.to_string();
    for secret in secrets.iter().filter(|s| !s.is_empty()) {
        out = out.replace(secret, REDACTED);
    }
    out
}

/// Turn a response body into a short, credential-free excerpt.
#[must_use]
pub fn body_excerpt(body: &[u8], secrets: &[&str]) -> String {
    let text = String::from_utf8_lossy(body);
    let scrubbed = scrub_secrets(text.trim(), secrets);
    if scrubbed.len() <= MAX_EXCERPT_BYTES {
        return scrubbed;
    }
    let mut end = MAX_EXCERPT_BYTES;
    while !scrubbed.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &scrubbed[..end])
}
