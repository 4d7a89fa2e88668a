//! Identity resolution for inbound requests.
//!
//! The gate partitions all state by an opaque caller-supplied key,
//! typically a session UUID. The header takes precedence; the query
//! parameter exists for callers that cannot set headers.

use axum::http::HeaderMap;

/// Header carrying the caller identity.
pub const IDENTITY_HEADER: &str = "X-User-ID";
/// Query parameter fallback for the caller identity.
pub const IDENTITY_QUERY_PARAM: &str = "user_id";

/// Extract the caller identity from request headers and the raw query
/// string. Returns `None` when neither carries a non-empty value; the
/// caller maps that to a `MissingIdentity` deny. No side effects.
pub fn resolve_identity(headers: &HeaderMap, query: Option<&str>) -> Option<String> {
    if let Some(value) = headers.get(IDENTITY_HEADER) {
        if let Ok(value) = value.to_str() {
            let trimmed = value.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        }
    }

    let query = query?;
    for pair in query.split('&') {
        let mut parts = pair.splitn(2, '=');
        if parts.next() == Some(IDENTITY_QUERY_PARAM) {
            let value = parts.next().unwrap_or("").trim();
            if !value.is_empty() {
                return Some(value.to_string());
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_header_takes_precedence() {
        let mut headers = HeaderMap::new();
        headers.insert(IDENTITY_HEADER, HeaderValue::from_static("alice"));

        let identity = resolve_identity(&headers, Some("user_id=bob"));
        assert_eq!(identity.as_deref(), Some("alice"));
    }

    #[test]
    fn test_header_value_is_trimmed() {
        let mut headers = HeaderMap::new();
        headers.insert(IDENTITY_HEADER, HeaderValue::from_static("  alice  "));

        let identity = resolve_identity(&headers, None);
        assert_eq!(identity.as_deref(), Some("alice"));
    }

    #[test]
    fn test_blank_header_falls_back_to_query() {
        let mut headers = HeaderMap::new();
        headers.insert(IDENTITY_HEADER, HeaderValue::from_static("   "));

        let identity = resolve_identity(&headers, Some("ts=1&user_id=bob"));
        assert_eq!(identity.as_deref(), Some("bob"));
    }

    #[test]
    fn test_absent_everywhere() {
        let headers = HeaderMap::new();
        assert_eq!(resolve_identity(&headers, None), None);
        assert_eq!(resolve_identity(&headers, Some("other=1")), None);
        assert_eq!(resolve_identity(&headers, Some("user_id=")), None);
    }
}
