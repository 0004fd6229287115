//! Shared utility functions used across multiple modules.

use std::sync::LazyLock;

use regex::Regex;

static PLATE_NOISE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^A-Z0-9]").expect("Invalid regex"));

/// Normalize optional text by trimming whitespace and removing empties.
///
/// Returns `None` when the input is `None` or the trimmed value is empty.
pub fn normalize_text_option(value: Option<String>) -> Option<String> {
    let value = value?;
    let value = value.trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

/// Check if a string starts with `http://` or `https://`.
pub fn is_http_url(value: &str) -> bool {
    value.starts_with("http://") || value.starts_with("https://")
}

/// Truncate text to at most 180 characters for error messages.
pub fn compact_text(value: &str) -> String {
    value.trim().chars().take(180).collect()
}

/// Canonical form of a licence plate: uppercase ASCII letters and digits only.
///
/// `"abc-1234"`, `"ABC 1234"` and `"ABC1234"` all normalize to `"ABC1234"`.
pub fn normalize_plate(plate: &str) -> String {
    PLATE_NOISE
        .replace_all(&plate.to_ascii_uppercase(), "")
        .into_owned()
}

/// Current Unix timestamp in milliseconds.
pub fn unix_timestamp_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_text_option_rejects_empty() {
        assert_eq!(normalize_text_option(None), None);
        assert_eq!(normalize_text_option(Some("   ".to_string())), None);
    }

    #[test]
    fn normalize_text_option_trims_value() {
        assert_eq!(
            normalize_text_option(Some(" https://example.com ".to_string())),
            Some("https://example.com".to_string())
        );
    }

    #[test]
    fn is_http_url_accepts_valid_schemes() {
        assert!(is_http_url("http://localhost"));
        assert!(is_http_url("https://example.com"));
        assert!(!is_http_url("ftp://example.com"));
        assert!(!is_http_url("example.com"));
    }

    #[test]
    fn normalize_plate_strips_separators_and_case() {
        assert_eq!(normalize_plate("abc-1234"), "ABC1234");
        assert_eq!(normalize_plate(" ABC 1D23 "), "ABC1D23");
        assert_eq!(normalize_plate("ABC1234"), "ABC1234");
    }
}
