//! Absolute URL resolution against a frame or stylesheet base.

use url::Url;

/// Schemes and forms that never produce a network request
fn is_inert(raw: &str) -> bool {
    let lower = raw.trim().to_ascii_lowercase();
    lower.is_empty()
        || lower.starts_with('#')
        || lower.starts_with("javascript:")
        || lower.starts_with("data:")
        || lower.starts_with("mailto:")
        || lower.starts_with("tel:")
        || lower.starts_with("about:")
        || lower.starts_with("blob:")
}

/// Resolve `raw` against `base`. Values already starting with `http` are returned as-is.
pub fn resolve(base: &str, raw: &str) -> Result<String, url::ParseError> {
    let raw = raw.trim();
    if raw.starts_with("http") {
        return Ok(raw.to_string());
    }
    let base = Url::parse(base)?;
    Ok(base.join(raw)?.to_string())
}

/// Resolve a reference found in content, or `None` when it cannot cause a request
pub fn resolve_reference(base: &str, raw: &str) -> Option<Result<String, url::ParseError>> {
    if is_inert(raw) {
        return None;
    }
    Some(resolve(base, raw))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relative_paths() {
        assert_eq!(
            resolve("https://example.com/a/page.html", "img/logo.png").unwrap(),
            "https://example.com/a/img/logo.png"
        );
        assert_eq!(
            resolve("https://example.com/a/page.html", "/root.css").unwrap(),
            "https://example.com/root.css"
        );
        assert_eq!(
            resolve("https://example.com/a/", "//cdn.example.org/x.js").unwrap(),
            "https://cdn.example.org/x.js"
        );
    }

    #[test]
    fn test_absolute_kept_verbatim() {
        assert_eq!(resolve("not a url", "http://other.test/x").unwrap(), "http://other.test/x");
    }

    #[test]
    fn test_bad_base_is_an_error() {
        assert!(resolve("not a url", "x.png").is_err());
    }

    #[test]
    fn test_inert_references() {
        assert!(resolve_reference("https://e.com", "javascript:void(0)").is_none());
        assert!(resolve_reference("https://e.com", "#top").is_none());
        assert!(resolve_reference("https://e.com", "").is_none());
        assert!(resolve_reference("https://e.com", "data:image/png;base64,AAA").is_none());
        assert!(resolve_reference("https://e.com", "next.html").is_some());
    }
}
