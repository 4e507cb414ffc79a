//! Version token ↔ ETag conversion.
//!
//! The server hands out opaque version tokens through the `ETag` response
//! header and expects them back in `If-Match`. The header form wraps the
//! token in double quotes and escapes embedded quotes; the stored form is
//! the bare token. The conversion round-trips exactly.

/// Extracts the version token from an `ETag` header value.
///
/// Surrounding double quotes are stripped and internal `\"` sequences are
/// unescaped; a value without surrounding quotes is taken verbatim.
pub fn version_from_etag(etag: &str) -> String {
    let inner = match etag.strip_prefix('"').and_then(|s| s.strip_suffix('"')) {
        Some(inner) => inner,
        None => return etag.to_string(),
    };
    inner.replace("\\\"", "\"")
}

/// Renders a stored version token as an `If-Match`/`ETag` header value.
pub fn etag_from_version(version: &str) -> String {
    format!("\"{}\"", version.replace('"', "\\\""))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_and_unescapes() {
        assert_eq!(version_from_etag("\"abc\""), "abc");
        assert_eq!(version_from_etag("\"a\\\"b\""), "a\"b");
        assert_eq!(version_from_etag("bare"), "bare");
    }

    #[test]
    fn wraps_and_escapes() {
        assert_eq!(etag_from_version("abc"), "\"abc\"");
        assert_eq!(etag_from_version("a\"b"), "\"a\\\"b\"");
    }

    #[test]
    fn round_trip_is_exact() {
        for etag in ["\"w1\"", "\"\"", "\"a\\\"b\\\"c\"", "\"AAAAAAAAB9M=\""] {
            assert_eq!(etag_from_version(&version_from_etag(etag)), etag);
        }
    }
}
