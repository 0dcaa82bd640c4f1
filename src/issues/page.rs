use super::{ErrorType, Reporter};
use crate::models::PageReport;
use once_cell::sync::Lazy;
use scraper::Selector;

pub const MIN_TITLE_LENGTH: usize = 20;
pub const MAX_TITLE_LENGTH: usize = 60;
pub const MIN_DESCRIPTION_LENGTH: usize = 80;
pub const MAX_DESCRIPTION_LENGTH: usize = 160;
pub const MIN_WORDS: usize = 200;

static H1_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("h1").expect("h1 selector should be valid"));

/// Every built-in page reporter
pub fn default_reporters() -> Vec<Reporter> {
    vec![
        status_30x_reporter(),
        status_40x_reporter(),
        status_50x_reporter(),
        empty_title_reporter(),
        short_title_reporter(),
        long_title_reporter(),
        empty_description_reporter(),
        short_description_reporter(),
        long_description_reporter(),
        no_h1_reporter(),
        multiple_h1_reporter(),
        no_lang_reporter(),
        little_content_reporter(),
        images_with_no_alt_reporter(),
        no_indexable_reporter(),
        http_links_reporter(),
        underscore_url_reporter(),
        space_url_reporter(),
    ]
}

// Content rules only make sense for successfully served HTML pages
fn is_html_ok(page: &PageReport) -> bool {
    page.is_html() && (200..300).contains(&page.status_code)
}

fn char_len(value: &Option<String>) -> Option<usize> {
    value
        .as_deref()
        .filter(|v| !v.is_empty())
        .map(|v| v.chars().count())
}

pub fn status_30x_reporter() -> Reporter {
    Reporter::new(ErrorType::Error30x, |page, _, _| {
        (300..400).contains(&page.status_code)
    })
}

pub fn status_40x_reporter() -> Reporter {
    Reporter::new(ErrorType::Error40x, |page, _, _| {
        (400..500).contains(&page.status_code)
    })
}

pub fn status_50x_reporter() -> Reporter {
    Reporter::new(ErrorType::Error50x, |page, _, _| {
        (500..600).contains(&page.status_code)
    })
}

pub fn empty_title_reporter() -> Reporter {
    Reporter::new(ErrorType::EmptyTitle, |page, _, _| {
        is_html_ok(page) && char_len(&page.title).is_none()
    })
}

pub fn short_title_reporter() -> Reporter {
    Reporter::new(ErrorType::ShortTitle, |page, _, _| {
        is_html_ok(page) && char_len(&page.title).is_some_and(|len| len < MIN_TITLE_LENGTH)
    })
}

pub fn long_title_reporter() -> Reporter {
    Reporter::new(ErrorType::LongTitle, |page, _, _| {
        is_html_ok(page) && char_len(&page.title).is_some_and(|len| len > MAX_TITLE_LENGTH)
    })
}

pub fn empty_description_reporter() -> Reporter {
    Reporter::new(ErrorType::EmptyDescription, |page, _, _| {
        is_html_ok(page) && char_len(&page.description).is_none()
    })
}

pub fn short_description_reporter() -> Reporter {
    Reporter::new(ErrorType::ShortDescription, |page, _, _| {
        is_html_ok(page)
            && char_len(&page.description).is_some_and(|len| len < MIN_DESCRIPTION_LENGTH)
    })
}

pub fn long_description_reporter() -> Reporter {
    Reporter::new(ErrorType::LongDescription, |page, _, _| {
        is_html_ok(page)
            && char_len(&page.description).is_some_and(|len| len > MAX_DESCRIPTION_LENGTH)
    })
}

pub fn no_h1_reporter() -> Reporter {
    Reporter::new(ErrorType::NoH1, |page, _, _| {
        is_html_ok(page) && char_len(&page.h1).is_none()
    })
}

/// Counts headings on the raw document, the report only keeps the first one
pub fn multiple_h1_reporter() -> Reporter {
    Reporter::new(ErrorType::MultipleH1, |page, document, _| {
        is_html_ok(page) && document.select(&H1_SELECTOR).nth(1).is_some()
    })
}

pub fn no_lang_reporter() -> Reporter {
    Reporter::new(ErrorType::NoLang, |page, _, _| {
        is_html_ok(page) && char_len(&page.lang).is_none()
    })
}

pub fn little_content_reporter() -> Reporter {
    Reporter::new(ErrorType::LittleContent, |page, _, _| {
        is_html_ok(page) && page.words < MIN_WORDS
    })
}

pub fn images_with_no_alt_reporter() -> Reporter {
    Reporter::new(ErrorType::ImagesWithNoAlt, |page, _, _| {
        is_html_ok(page)
            && page
                .images
                .iter()
                .any(|img| img.alt.as_deref().is_none_or(|alt| alt.trim().is_empty()))
    })
}

/// Either the robots meta tag or the X-Robots-Tag header can block indexing
pub fn no_indexable_reporter() -> Reporter {
    Reporter::new(ErrorType::NoIndexable, |page, _, headers| {
        let meta = page
            .robots
            .as_deref()
            .is_some_and(|r| r.to_lowercase().contains("noindex"));
        let header = headers
            .get_all("x-robots-tag")
            .iter()
            .filter_map(|v| v.to_str().ok())
            .any(|v| v.to_lowercase().contains("noindex"));

        is_html_ok(page) && (meta || header)
    })
}

pub fn http_links_reporter() -> Reporter {
    Reporter::new(ErrorType::HttpLinks, |page, _, _| {
        is_html_ok(page)
            && page.parsed_url().scheme() == "https"
            && page
                .links
                .iter()
                .chain(page.external_links.iter())
                .any(|link| link.url.starts_with("http://"))
    })
}

pub fn underscore_url_reporter() -> Reporter {
    Reporter::new(ErrorType::UnderscoreUrl, |page, _, _| {
        page.parsed_url().path().contains('_')
    })
}

/// The parsed URL keeps spaces percent-encoded, so the path is decoded first
pub fn space_url_reporter() -> Reporter {
    Reporter::new(ErrorType::SpaceUrl, |page, _, _| {
        let path = page.parsed_url().path();
        match urlencoding::decode(path) {
            Ok(decoded) => decoded.contains(' '),
            Err(_) => path.contains(' '),
        }
    })
}
