use crate::error::UrlError;
use std::borrow::Cow;
use url::{ParseError, Url};

/// Resolves a raw `href`/`src` attribute value against the URL of the page it
/// was found on, producing a canonical absolute URL usable as a dedup key.
///
/// Only `http` and `https` targets are accepted and fragments are always
/// stripped.
pub fn resolve(base: &Url, raw: &str) -> Result<Url, UrlError> {
    let raw = raw.trim();

    match Url::parse(raw) {
        Ok(mut url) => {
            ensure_http(&url)?;
            if url.path().is_empty() {
                url.set_path("/");
            }
            url.set_fragment(None);
            Ok(url)
        }
        Err(ParseError::RelativeUrlWithoutBase) => resolve_relative(base, raw),
        Err(e) => Err(malformed(raw, e)),
    }
}

fn resolve_relative(base: &Url, raw: &str) -> Result<Url, UrlError> {
    let normalized = normalize_separators(raw);
    let raw = normalized.as_ref();

    // Scheme-relative reference: keeps its own host, inherits the scheme
    if raw.starts_with("//") {
        let mut url = Url::parse(&format!("{}:{}", base.scheme(), raw))
            .map_err(|e| malformed(raw, e))?;
        if url.path().is_empty() {
            url.set_path("/");
        }
        url.set_fragment(None);
        return Ok(url);
    }

    let without_fragment = raw.split_once('#').map_or(raw, |(head, _)| head);
    let (path, query) = match without_fragment.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (without_fragment, None),
    };

    let mut url = base.clone();
    url.set_fragment(None);

    if path.starts_with('/') {
        url.set_path(path);
    } else if !path.is_empty() {
        url.set_path(&format!("{}{}", base_directory(base), path));
    } else if base.path().is_empty() {
        url.set_path("/");
    }

    url.set_query(query);

    Ok(url)
}

/// Backslashes before the query or fragment are path separators for http(s)
fn normalize_separators(raw: &str) -> Cow<'_, str> {
    let end = raw.find(['?', '#']).unwrap_or(raw.len());
    if !raw[..end].contains('\\') {
        return Cow::Borrowed(raw);
    }

    Cow::Owned(format!("{}{}", raw[..end].replace('\\', "/"), &raw[end..]))
}

/// Directory part of the base path, always ending with exactly one `/`
fn base_directory(base: &Url) -> &str {
    let path = base.path();
    match path.rfind('/') {
        Some(idx) => &path[..=idx],
        None => "/",
    }
}

fn ensure_http(url: &Url) -> Result<(), UrlError> {
    match url.scheme() {
        "http" | "https" => Ok(()),
        scheme => Err(UrlError::UnsupportedScheme(scheme.to_string())),
    }
}

fn malformed(raw: &str, err: ParseError) -> UrlError {
    UrlError::Malformed {
        raw: raw.to_string(),
        reason: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("https://example.com/dir/page").unwrap()
    }

    #[test]
    fn test_relative_path_joins_base_directory() {
        let url = resolve(&base(), "sub/x").unwrap();
        assert_eq!(url.as_str(), "https://example.com/dir/sub/x");
    }

    #[test]
    fn test_absolute_path_replaces_base_path() {
        let url = resolve(&base(), "/abs").unwrap();
        assert_eq!(url.as_str(), "https://example.com/abs");
    }

    #[test]
    fn test_scheme_relative_inherits_scheme() {
        let url = resolve(&base(), "//other.com/x").unwrap();
        assert_eq!(url.as_str(), "https://other.com/x");

        let http_base = Url::parse("http://example.com/").unwrap();
        let url = resolve(&http_base, "//other.com/x").unwrap();
        assert_eq!(url.scheme(), "http");
    }

    #[test]
    fn test_unsupported_schemes_are_rejected() {
        for raw in ["ftp://x", "mailto:me@example.com", "javascript:void(0)"] {
            assert!(
                matches!(resolve(&base(), raw), Err(UrlError::UnsupportedScheme(_))),
                "{} should be rejected",
                raw
            );
        }
    }

    #[test]
    fn test_fragments_are_always_stripped() {
        let cases = [
            ("#top", "https://example.com/dir/page"),
            ("other#part", "https://example.com/dir/other"),
            ("/abs#part", "https://example.com/abs"),
            ("https://example.com/x#part", "https://example.com/x"),
            ("//other.com/y#z", "https://other.com/y"),
        ];

        for (raw, expected) in cases {
            let url = resolve(&base(), raw).unwrap();
            assert_eq!(url.as_str(), expected, "resolving {}", raw);
            assert!(url.fragment().is_none());
        }
    }

    #[test]
    fn test_absolute_url_gets_default_path() {
        let url = resolve(&base(), "https://example.org").unwrap();
        assert_eq!(url.as_str(), "https://example.org/");
    }

    #[test]
    fn test_query_only_keeps_base_path() {
        let url = resolve(&base(), "?page=2").unwrap();
        assert_eq!(url.as_str(), "https://example.com/dir/page?page=2");
    }

    #[test]
    fn test_whitespace_is_trimmed() {
        let url = resolve(&base(), "  /spaced  ").unwrap();
        assert_eq!(url.as_str(), "https://example.com/spaced");
    }

    #[test]
    fn test_backslashes_act_as_separators() {
        let cases = [
            ("sub\\x", "https://example.com/dir/sub/x"),
            ("\\abs", "https://example.com/abs"),
            ("\\\\other.com\\y", "https://other.com/y"),
            ("x?path=a\\b", "https://example.com/dir/x?path=a\\b"),
        ];

        for (raw, expected) in cases {
            let url = resolve(&base(), raw).unwrap();
            assert_eq!(url.as_str(), expected, "resolving {}", raw);
            assert!(!url.path().contains("//"));
        }
    }

    #[test]
    fn test_malformed_url() {
        assert!(matches!(
            resolve(&base(), "http://[::1"),
            Err(UrlError::Malformed { .. })
        ));
    }
}
