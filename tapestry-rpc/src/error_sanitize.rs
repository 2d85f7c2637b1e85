//! Scrubs user-thrown error messages before they go over the wire: literal
//! IPv4 addresses and UUIDs are redacted, and the result is truncated to a
//! bounded length so a guest method can't leak arbitrary amounts of host
//! internals through an error string.

use once_cell::sync::Lazy;
use regex::Regex;

pub const MAX_MESSAGE_LEN: usize = 500;

static IPV4: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(?:(?:25[0-5]|2[0-4]\d|1?\d?\d)\.){3}(?:25[0-5]|2[0-4]\d|1?\d?\d)\b").expect("valid regex")
});

static UUID: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}\b").expect("valid regex")
});

/// Redact IPv4 literals and UUIDs, then truncate to [`MAX_MESSAGE_LEN`]
/// characters.
pub fn scrub_message(message: &str) -> String {
    let redacted = IPV4.replace_all(message, "[IP]");
    let redacted = UUID.replace_all(&redacted, "[UUID]");
    truncate_chars(&redacted, MAX_MESSAGE_LEN)
}

fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        s.chars().take(max).collect()
    }
}
