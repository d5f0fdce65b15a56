//! Input validation and sanitization for outgoing user messages
//!
//! Strips markup and script content from user input and enforces the
//! message length bounds before anything is handed to the store or the
//! agent endpoint.

use regex::Regex;
use std::sync::OnceLock;

/// Maximum accepted message length in characters
pub const MAX_MESSAGE_CHARS: usize = 500;

/// Substrings that mark a message as potentially unsafe
const SUSPICIOUS_PATTERNS: [&str; 6] = [
    "<script",
    "javascript:",
    "vbscript:",
    "onload=",
    "onerror=",
    "onclick=",
];

fn script_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?is)<script\b.*?</script>").expect("script pattern is valid"))
}

fn tag_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"<[^>]*>").expect("tag pattern is valid"))
}

fn protocol_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?i)javascript:").expect("protocol pattern is valid"))
}

fn handler_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?i)on\w+\s*=").expect("handler pattern is valid"))
}

/// Outcome of validating a candidate user message
#[derive(Debug, Clone)]
pub struct Validation {
    /// True when no validation errors were found
    pub is_valid: bool,
    /// Human-readable validation errors, empty when valid
    pub errors: Vec<String>,
    /// The sanitized form of the trimmed input
    pub sanitized: String,
}

/// Remove markup and script content from user input
///
/// Strips `<script>` blocks, remaining HTML tags, `javascript:`
/// protocols, and inline event handlers, then trims whitespace.
///
/// # Examples
///
/// ```
/// use nimbus::sanitize::sanitize_input;
///
/// assert_eq!(sanitize_input("<b>hello</b> world"), "hello world");
/// assert_eq!(sanitize_input("<script>alert(1)</script>hi"), "hi");
/// ```
pub fn sanitize_input(input: &str) -> String {
    let output = script_pattern().replace_all(input, "");
    let output = tag_pattern().replace_all(&output, "");
    let output = protocol_pattern().replace_all(&output, "");
    let output = handler_pattern().replace_all(&output, "");
    output.trim().to_string()
}

/// Validate a candidate user message
///
/// Checks the length bounds (1..=500 characters after trimming) and
/// scans for suspicious script-injection patterns. Always returns a
/// sanitized form regardless of validity.
pub fn validate_message(message: &str) -> Validation {
    let mut errors = Vec::new();
    let trimmed = message.trim();

    if trimmed.is_empty() {
        errors.push("Message cannot be empty".to_string());
    }

    if trimmed.chars().count() > MAX_MESSAGE_CHARS {
        errors.push(format!(
            "Message cannot exceed {} characters",
            MAX_MESSAGE_CHARS
        ));
    }

    let lower = trimmed.to_lowercase();
    for pattern in SUSPICIOUS_PATTERNS {
        if lower.contains(pattern) {
            errors.push("Message contains potentially unsafe content".to_string());
            break;
        }
    }

    Validation {
        is_valid: errors.is_empty(),
        errors,
        sanitized: sanitize_input(trimmed),
    }
}
