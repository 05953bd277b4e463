//! Shared utility functions used across multiple modules.

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

/// Current Unix timestamp in milliseconds.
pub fn unix_millis_now() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Render `count` with the singular or plural form of a noun.
///
/// ```
/// use tally_core::util::pluralize;
///
/// assert_eq!(pluralize(1, "open order", "open orders"), "1 open order");
/// assert_eq!(pluralize(3, "active shift", "active shifts"), "3 active shifts");
/// ```
pub fn pluralize(count: u64, singular: &str, plural: &str) -> String {
    if count == 1 {
        format!("{count} {singular}")
    } else {
        format!("{count} {plural}")
    }
}

/// Join itemized clauses into one sentence fragment ("a, b and c").
pub fn join_items(items: &[String]) -> String {
    match items {
        [] => String::new(),
        [only] => only.clone(),
        [head @ .., last] => format!("{} and {last}", head.join(", ")),
    }
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
    fn pluralize_handles_zero_one_many() {
        assert_eq!(pluralize(0, "open drawer", "open drawers"), "0 open drawers");
        assert_eq!(pluralize(1, "open drawer", "open drawers"), "1 open drawer");
        assert_eq!(pluralize(2, "open drawer", "open drawers"), "2 open drawers");
    }

    #[test]
    fn join_items_uses_oxford_free_conjunction() {
        assert_eq!(join_items(&[]), "");
        assert_eq!(join_items(&["a".to_string()]), "a");
        assert_eq!(join_items(&["a".to_string(), "b".to_string()]), "a and b");
        assert_eq!(
            join_items(&["a".to_string(), "b".to_string(), "c".to_string()]),
            "a, b and c"
        );
    }
}
