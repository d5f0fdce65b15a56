//! Session title derivation
//!
//! Derives a short, human-readable title from the first user message of
//! a session. Pure and deterministic: identical input always produces
//! identical output.

use regex::Regex;
use std::sync::OnceLock;

/// Messages at or below this length are used verbatim
const VERBATIM_MAX_CHARS: usize = 35;

/// Truncation width when a weather keyword is present
const KEYWORD_MAX_CHARS: usize = 40;

/// Keywords that mark a message as weather-related
const WEATHER_KEYWORDS: [&str; 15] = [
    "weather",
    "temperature",
    "temp",
    "rain",
    "snow",
    "forecast",
    "climate",
    "sunny",
    "cloudy",
    "wind",
    "humidity",
    "hot",
    "cold",
    "warm",
    "cool",
];

/// Matches "<preposition> <location words>" up to whitespace, end of
/// input, or sentence punctuation. The capture may include commas; the
/// portion before the first comma is the location proper.
fn location_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)(?:in|for|at|from)\s+([a-z\s,]+?)(?:\s|$|\?|!|\.)")
            .expect("location pattern is valid")
    })
}

/// Derive a session title from a user message
///
/// Short messages are used verbatim. Longer messages are scanned for a
/// location phrase and weather keywords:
///
/// - location and keyword found: `"Weather in {location}"`
/// - location only: `"{location} weather"`
/// - keyword only: first 40 characters, `"..."` appended when truncated
/// - neither: first 35 characters, `"..."` appended when truncated
///
/// # Examples
///
/// ```
/// use nimbus::title::derive_title;
///
/// assert_eq!(derive_title("hi"), "hi");
/// assert_eq!(
///     derive_title("Could you tell me the weather forecast in Paris, France this weekend?"),
///     "Weather in Paris"
/// );
/// ```
pub fn derive_title(message: &str) -> String {
    let text = message.trim();

    if text.chars().count() <= VERBATIM_MAX_CHARS {
        return text.to_string();
    }

    let lower = text.to_lowercase();
    let location = location_pattern()
        .captures(text)
        .map(|caps| caps[1].trim().to_string())
        .filter(|loc| !loc.is_empty());
    let has_keyword = WEATHER_KEYWORDS.iter().any(|kw| lower.contains(kw));

    match (location, has_keyword) {
        (Some(loc), true) => format!("Weather in {}", clean_location(&loc)),
        (Some(loc), false) => format!("{} weather", clean_location(&loc)),
        (None, true) => truncate_chars(text, KEYWORD_MAX_CHARS),
        (None, false) => truncate_chars(text, VERBATIM_MAX_CHARS),
    }
}

/// Take the portion before the first comma, trimmed
fn clean_location(location: &str) -> String {
    location
        .split(',')
        .next()
        .unwrap_or(location)
        .trim()
        .to_string()
}

/// Truncate to `max_chars` characters, appending `"..."` when shortened
fn truncate_chars(text: &str, max_chars: usize) -> String {
    let total = text.chars().count();
    if total <= max_chars {
        return text.to_string();
    }
    let mut truncated: String = text.chars().take(max_chars).collect();
    truncated.push_str("...");
    truncated
}
