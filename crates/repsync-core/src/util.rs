//! Small helpers shared by the store, remote, and config layers.

use chrono::{DateTime, TimeZone, Utc};

/// Longest remote response body kept in an error message
const MAX_ERROR_BODY_CHARS: usize = 180;

/// Trim optional text, treating blank values as absent.
pub fn normalize_text_option(value: Option<String>) -> Option<String> {
    let value = value?;
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

/// Check if a string starts with `http://` or `https://`.
pub fn is_http_url(value: &str) -> bool {
    value.starts_with("http://") || value.starts_with("https://")
}

/// Keep the head of a remote response body for an error message.
pub fn truncate_body(value: &str) -> String {
    value.trim().chars().take(MAX_ERROR_BODY_CHARS).collect()
}

/// Flatten an error into a single log-safe line.
pub fn sanitize(error: &impl std::fmt::Display) -> String {
    error.to_string().replace('\n', " ").trim().to_string()
}

/// Convert a stored unix-millisecond column back into a UTC timestamp.
///
/// Out-of-range values clamp to the unix epoch instead of failing the read.
pub fn from_millis(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .unwrap_or(DateTime::UNIX_EPOCH)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_text_is_absent() {
        assert_eq!(normalize_text_option(None), None);
        assert_eq!(normalize_text_option(Some(" \t ".to_string())), None);
        assert_eq!(
            normalize_text_option(Some("  user-1\n".to_string())),
            Some("user-1".to_string())
        );
    }

    #[test]
    fn only_http_schemes_are_urls() {
        assert!(is_http_url("http://localhost:8080"));
        assert!(is_http_url("https://data.example.com/app/data-abc"));
        assert!(!is_http_url("libsql://repsync.turso.io"));
        assert!(!is_http_url("data.example.com"));
    }

    #[test]
    fn long_bodies_are_cut() {
        let body = "x".repeat(500);
        assert_eq!(truncate_body(&body).len(), MAX_ERROR_BODY_CHARS);
        assert_eq!(truncate_body("  short \n"), "short");
    }

    #[test]
    fn sanitize_joins_lines() {
        assert_eq!(sanitize(&"line one\nline two\n"), "line one line two");
    }

    #[test]
    fn from_millis_round_trips_utc() {
        let now = Utc::now();
        let restored = from_millis(now.timestamp_millis());
        assert_eq!(restored.timestamp_millis(), now.timestamp_millis());
    }
}
