//! # Text Processing Utilities
//!
//! Redaction helpers used before request details or workflow definitions are written to
//! logs or persisted to history.

use once_cell::sync::Lazy;
use regex::Regex;

/// Redacts values that look like secrets in a string.
///
/// Authorization headers, bearer/basic credentials, and `KEY=value` style assignments
/// whose key mentions a token, secret, password, or API key are replaced with
/// `[REDACTED]`. Key names are preserved for debugging purposes.
///
/// # Example
/// ```rust
/// use weft_util::text_processing::redact_sensitive;
///
/// let redacted = redact_sensitive("API_KEY=abc123 region=eu");
/// assert_eq!(redacted, "API_KEY=[REDACTED] region=eu");
/// ```
pub fn redact_sensitive(input: &str) -> String {
    redact_sensitive_with(input, "[REDACTED]")
}

/// Redacts sensitive-looking values, using a custom replacement token.
pub fn redact_sensitive_with(input: &str, replacement: &str) -> String {
    let mut redacted = input.to_string();

    for pattern in redact_patterns().iter() {
        redacted = pattern
            .replace_all(&redacted, |captures: &regex::Captures| {
                let prefix = captures.get(1).map(|m| m.as_str()).unwrap_or("");
                format!("{}{}", prefix, replacement)
            })
            .to_string();
    }

    redacted
}

/// Returns `true` when a header name usually carries credentials.
pub fn is_sensitive_header(name: &str) -> bool {
    let lowered = name.trim().to_ascii_lowercase();
    matches!(lowered.as_str(), "authorization" | "proxy-authorization" | "cookie" | "set-cookie")
        || lowered.contains("token")
        || lowered.contains("api-key")
        || lowered.contains("secret")
}

fn redact_patterns() -> &'static Vec<Regex> {
    static REDACT_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(build_redact_patterns);

    &REDACT_PATTERNS
}

fn build_redact_patterns() -> Vec<Regex> {
    [
        r"(?i)(authorization:\s+)([^\r\n]+)",
        r"(?i)((?:^|\b)Bearer\s+)([A-Za-z0-9\-._~+/]+=*)",
        r"(?i)((?:^|\b)Basic\s+)([A-Za-z0-9+/]+=*)",
        r"(?i)(\b[A-Z0-9_]*(?:API_KEY|TOKEN|SECRET|PASSWORD)\s*[=:]\s*)([^\s,]+)",
    ]
    .iter()
    .filter_map(|pattern| Regex::new(pattern).ok())
    .collect()
}
