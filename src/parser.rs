use crate::models::{Hreflang, Image, Link, PageReport};
use crate::resolver::resolve;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::header::{CONTENT_TYPE, HeaderMap, LOCATION};
use scraper::{ElementRef, Html, Node, Selector};
use url::Url;

// Cached selectors, parsed once per process
static LANG_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("html[lang]").expect("html[lang] selector should be valid"));
static TITLE_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("title").expect("title selector should be valid"));
static META_DESC_SELECTOR: Lazy<Selector> = Lazy::new(|| {
    Selector::parse("meta[name='description']").expect("meta description selector should be valid")
});
static META_REFRESH_SELECTOR: Lazy<Selector> = Lazy::new(|| {
    Selector::parse("meta[http-equiv='refresh']").expect("meta refresh selector should be valid")
});
static META_ROBOTS_SELECTOR: Lazy<Selector> = Lazy::new(|| {
    Selector::parse("meta[name='robots']").expect("meta robots selector should be valid")
});
static ANCHOR_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("a[href]").expect("a[href] selector should be valid"));
static H1_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("h1").expect("h1 selector should be valid"));
static H2_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("h2").expect("h2 selector should be valid"));
static CANONICAL_SELECTOR: Lazy<Selector> = Lazy::new(|| {
    Selector::parse("link[rel='canonical'][href]").expect("canonical selector should be valid")
});
static HREFLANG_SELECTOR: Lazy<Selector> = Lazy::new(|| {
    Selector::parse("link[rel='alternate'][hreflang]").expect("hreflang selector should be valid")
});
static IMG_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("img[src]").expect("img[src] selector should be valid"));
static SCRIPT_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("script[src]").expect("script[src] selector should be valid"));
static STYLESHEET_SELECTOR: Lazy<Selector> = Lazy::new(|| {
    Selector::parse("link[rel='stylesheet'][href]").expect("stylesheet selector should be valid")
});
static BODY_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("body").expect("body selector should be valid"));

static PUNCTUATION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[\p{P}\p{S}]+").expect("punctuation regex should be valid"));

/// Builds the report for a fetched URL, discarding the parsed document
pub fn build_report(url: &Url, status: u16, headers: &HeaderMap, body: Vec<u8>) -> PageReport {
    parse_page(url, status, headers, body).0
}

/// Builds the report for a fetched URL and returns the parsed document
/// alongside it so issue reporters can inspect the raw DOM.
///
/// Redirects and non-HTML responses come back with an empty document.
pub fn parse_page(url: &Url, status: u16, headers: &HeaderMap, body: Vec<u8>) -> (PageReport, Html) {
    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());

    let mut report = PageReport::new(url.clone(), status, content_type, body);
    report.media_type = report.content_type.as_deref().and_then(media_type);

    if report.is_redirect() {
        report.redirect_url = headers
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|location| resolve_logged(url, location))
            .map(|u| u.to_string());
        return (report, Html::new_document());
    }

    if !report.is_html() {
        tracing::debug!(
            url = %url,
            media_type = report.media_type.as_deref().unwrap_or("unknown"),
            "Skipping structural extraction for non-HTML content"
        );
        return (report, Html::new_document());
    }

    let document = Html::parse_document(&String::from_utf8_lossy(&report.body));
    if !document.errors.is_empty() {
        tracing::debug!(url = %url, errors = document.errors.len(), "HTML parse errors");
    }

    extract(&mut report, &document, url);

    (report, document)
}

/// Media type of a Content-Type header value, lowercased and without parameters
fn media_type(content_type: &str) -> Option<String> {
    let media_type = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_lowercase();

    if media_type.is_empty() {
        None
    } else {
        Some(media_type)
    }
}

fn extract(report: &mut PageReport, document: &Html, url: &Url) {
    report.lang = first_attr(document, &LANG_SELECTOR, "lang");
    report.title = first_text(document, &TITLE_SELECTOR);
    report.description =
        first_attr(document, &META_DESC_SELECTOR, "content").map(|d| d.trim().to_string());
    report.robots = first_attr(document, &META_ROBOTS_SELECTOR, "content");

    if let Some(refresh) = first_attr(document, &META_REFRESH_SELECTOR, "content") {
        if let Some(target) = refresh_target(&refresh).and_then(|t| resolve_logged(url, &t)) {
            report.redirect_url = Some(target.to_string());
        }
        report.refresh = Some(refresh);
    }

    for element in document.select(&ANCHOR_SELECTOR) {
        let Some(link) = element
            .value()
            .attr("href")
            .and_then(|href| new_link(element, href, url))
        else {
            continue;
        };

        if link.external {
            report.external_links.push(link);
        } else {
            report.links.push(link);
        }
    }

    report.h1 = first_text(document, &H1_SELECTOR);
    report.h2 = first_text(document, &H2_SELECTOR);

    let canonicals: Vec<_> = document.select(&CANONICAL_SELECTOR).collect();
    if let [canonical] = canonicals.as_slice() {
        report.canonical = canonical
            .value()
            .attr("href")
            .and_then(|href| resolve_logged(url, href))
            .map(|u| u.to_string());
    }

    report.hreflangs = document
        .select(&HREFLANG_SELECTOR)
        .filter_map(|element| {
            let lang = element.value().attr("hreflang")?;
            let href = element.value().attr("href")?;
            resolve_logged(url, href).map(|u| Hreflang {
                url: u.to_string(),
                lang: lang.to_string(),
            })
        })
        .collect();

    report.images = document
        .select(&IMG_SELECTOR)
        .filter_map(|element| {
            let src = element.value().attr("src")?;
            resolve_logged(url, src).map(|u| Image {
                url: u.to_string(),
                alt: element.value().attr("alt").map(|s| s.to_string()),
            })
        })
        .collect();

    report.scripts = resolved_attrs(document, &SCRIPT_SELECTOR, "src", url);
    report.styles = resolved_attrs(document, &STYLESHEET_SELECTOR, "href", url);

    if let Some(body) = document.select(&BODY_SELECTOR).next() {
        report.words = count_words(body);
    }
}

fn new_link(element: ElementRef<'_>, href: &str, page_url: &Url) -> Option<Link> {
    let url = resolve_logged(page_url, href)?;

    Some(Link {
        external: is_external(&url, page_url),
        rel: element.value().attr("rel").map(|r| r.trim().to_string()),
        text: element.text().collect::<String>().trim().to_string(),
        url: url.to_string(),
    })
}

/// A link is external when it points to a different host than the page
pub fn is_external(url: &Url, page_url: &Url) -> bool {
    url.host_str() != page_url.host_str()
}

/// Extracts the target of a `<meta http-equiv="refresh" content="0;url=...">` value
fn refresh_target(content: &str) -> Option<String> {
    let (_, directive) = content.split_once(';')?;
    let directive = directive.trim();
    let prefix = directive.get(..4)?;
    if !prefix.eq_ignore_ascii_case("url=") {
        return None;
    }

    Some(directive[4..].replace(['\'', '"'], ""))
}

fn resolve_logged(base: &Url, raw: &str) -> Option<Url> {
    match resolve(base, raw) {
        Ok(url) => Some(url),
        Err(e) => {
            tracing::debug!(page = %base, value = raw, error = %e, "Skipping unresolvable URL");
            None
        }
    }
}

fn first_text(document: &Html, selector: &Selector) -> Option<String> {
    document
        .select(selector)
        .next()
        .map(|el| el.text().collect::<String>().trim().to_string())
}

fn first_attr(document: &Html, selector: &Selector, attr: &str) -> Option<String> {
    document
        .select(selector)
        .next()
        .and_then(|el| el.value().attr(attr))
        .map(|s| s.to_string())
}

fn resolved_attrs(document: &Html, selector: &Selector, attr: &str, url: &Url) -> Vec<String> {
    document
        .select(selector)
        .filter_map(|el| el.value().attr(attr))
        .filter_map(|value| resolve_logged(url, value))
        .map(|u| u.to_string())
        .collect()
}

/// Counts the words of a body element.
///
/// Script contents, anchor subtrees and comments are left out, and runs of
/// punctuation or symbols count as word separators.
pub fn count_words(body: ElementRef<'_>) -> usize {
    let mut text = String::new();
    collect_text(body, &mut text);

    PUNCTUATION
        .replace_all(&text, " ")
        .split_whitespace()
        .count()
}

fn collect_text(element: ElementRef<'_>, buf: &mut String) {
    for child in element.children() {
        match child.value() {
            Node::Text(text) => {
                buf.push_str(text);
                buf.push(' ');
            }
            Node::Element(el) if el.name() == "script" || el.name() == "a" => {}
            Node::Element(_) => {
                if let Some(child) = ElementRef::wrap(child) {
                    collect_text(child, buf);
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    fn html_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/html; charset=utf-8"));
        headers
    }

    fn page_url() -> Url {
        Url::parse("https://example.com/dir/page").unwrap()
    }

    const PAGE: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
  <title>  Test Page Title  </title>
  <meta name="description" content=" Test Page Description ">
  <meta name="robots" content="noindex, nofollow">
  <link rel="canonical" href="/canonical/">
  <link rel="alternate" href="https://example.com/fr/" hreflang="fr">
  <link rel="alternate" href="/feed.xml" type="application/rss+xml">
  <link rel="stylesheet" href="/css/style.css">
  <script src="/js/app.js"></script>
</head>
<body>
  <h1> Main Heading </h1>
  <h2>Sub Heading</h2>
  <h1>Second Heading</h1>
  <a href="sub/x" rel="nofollow">Relative</a>
  <a href="https://other.com/page">External</a>
  <a href="mailto:me@example.com">Mail</a>
  <a href="javascript:void(0)">Script</a>
  <img src="logo.png" alt="Logo">
  <img src="/no-alt.png">
</body>
</html>"#;

    #[test]
    fn test_extracts_structure() {
        let report = build_report(&page_url(), 200, &html_headers(), PAGE.as_bytes().to_vec());

        assert_eq!(report.url(), "https://example.com/dir/page");
        assert_eq!(report.media_type.as_deref(), Some("text/html"));
        assert_eq!(report.lang.as_deref(), Some("en"));
        assert_eq!(report.title.as_deref(), Some("Test Page Title"));
        assert_eq!(report.description.as_deref(), Some("Test Page Description"));
        assert_eq!(report.robots.as_deref(), Some("noindex, nofollow"));
        assert_eq!(report.canonical.as_deref(), Some("https://example.com/canonical/"));
        assert_eq!(report.h1.as_deref(), Some("Main Heading"));
        assert_eq!(report.h2.as_deref(), Some("Sub Heading"));

        assert_eq!(report.links.len(), 1);
        assert_eq!(report.links[0].url, "https://example.com/dir/sub/x");
        assert_eq!(report.links[0].rel.as_deref(), Some("nofollow"));
        assert_eq!(report.links[0].text, "Relative");
        assert!(!report.links[0].external);

        assert_eq!(report.external_links.len(), 1);
        assert_eq!(report.external_links[0].url, "https://other.com/page");
        assert!(report.external_links[0].external);

        assert_eq!(
            report.hreflangs,
            vec![Hreflang {
                url: "https://example.com/fr/".to_string(),
                lang: "fr".to_string(),
            }]
        );

        assert_eq!(report.images.len(), 2);
        assert_eq!(report.images[0].url, "https://example.com/dir/logo.png");
        assert_eq!(report.images[0].alt.as_deref(), Some("Logo"));
        assert_eq!(report.images[1].alt, None);

        assert_eq!(report.scripts, vec!["https://example.com/js/app.js"]);
        assert_eq!(report.styles, vec!["https://example.com/css/style.css"]);
    }

    #[test]
    fn test_word_count_skips_anchors_and_scripts() {
        let body = r##"<html><body><p>Hello <a href="#">click</a> world</p><script>ignored()</script><!-- a comment --></body></html>"##;
        let report = build_report(&page_url(), 200, &html_headers(), body.as_bytes().to_vec());
        assert_eq!(report.words, 2);
    }

    #[test]
    fn test_word_count_collapses_punctuation() {
        let body = "<html><body><p>one, two -- three!!! four...five</p></body></html>";
        let report = build_report(&page_url(), 200, &html_headers(), body.as_bytes().to_vec());
        assert_eq!(report.words, 5);
    }

    #[test]
    fn test_redirect_short_circuits_parsing() {
        let mut headers = html_headers();
        headers.insert(LOCATION, HeaderValue::from_static("/new"));

        let report = build_report(&page_url(), 301, &headers, PAGE.as_bytes().to_vec());

        assert_eq!(report.redirect_url.as_deref(), Some("https://example.com/new"));
        assert!(report.title.is_none());
        assert!(report.links.is_empty());
        assert!(report.external_links.is_empty());
        assert!(report.images.is_empty());
        assert_eq!(report.words, 0);
    }

    #[test]
    fn test_non_html_is_not_parsed() {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/pdf"));

        let report = build_report(&page_url(), 200, &headers, PAGE.as_bytes().to_vec());

        assert_eq!(report.media_type.as_deref(), Some("application/pdf"));
        assert_eq!(report.size, PAGE.len());
        assert!(report.title.is_none());
        assert!(report.links.is_empty());
    }

    #[test]
    fn test_meta_refresh_sets_redirect() {
        let body = r#"<html><head><meta http-equiv="refresh" content="0;URL='https://example.com/moved'"></head><body></body></html>"#;
        let report = build_report(&page_url(), 200, &html_headers(), body.as_bytes().to_vec());

        assert_eq!(report.refresh.as_deref(), Some("0;URL='https://example.com/moved'"));
        assert_eq!(report.redirect_url.as_deref(), Some("https://example.com/moved"));
    }

    #[test]
    fn test_duplicate_canonical_is_ignored() {
        let body = r#"<html><head><link rel="canonical" href="/a"><link rel="canonical" href="/b"></head><body></body></html>"#;
        let report = build_report(&page_url(), 200, &html_headers(), body.as_bytes().to_vec());
        assert!(report.canonical.is_none());
    }

    #[test]
    fn test_external_classification_uses_host() {
        let page = page_url();
        let same = Url::parse("https://example.com/any/other/path").unwrap();
        let other = Url::parse("https://blog.example.com/").unwrap();
        let plain_http = Url::parse("http://example.com/").unwrap();
        assert!(!is_external(&same, &page));
        assert!(!is_external(&plain_http, &page));
        assert!(is_external(&other, &page));
    }
}
