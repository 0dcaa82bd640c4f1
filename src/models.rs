use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

/// Structured result of fetching and parsing a single URL.
///
/// The URL is fixed at construction, everything else is filled in by the
/// page parser.
#[derive(Debug, Clone, Serialize)]
pub struct PageReport {
    url: String,
    #[serde(skip)]
    parsed_url: Url,
    pub status_code: u16,
    pub content_type: Option<String>,
    pub media_type: Option<String>,
    pub redirect_url: Option<String>,
    pub refresh: Option<String>,
    pub lang: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub robots: Option<String>,
    pub canonical: Option<String>,
    pub h1: Option<String>,
    pub h2: Option<String>,
    pub words: usize,
    #[serde(skip)]
    pub body: Vec<u8>,
    pub size: usize,
    pub links: Vec<Link>,
    pub external_links: Vec<Link>,
    pub hreflangs: Vec<Hreflang>,
    pub images: Vec<Image>,
    pub scripts: Vec<String>,
    pub styles: Vec<String>,
}

impl PageReport {
    pub fn new(url: Url, status_code: u16, content_type: Option<String>, body: Vec<u8>) -> Self {
        Self {
            url: url.to_string(),
            parsed_url: url,
            status_code,
            content_type,
            media_type: None,
            redirect_url: None,
            refresh: None,
            lang: None,
            title: None,
            description: None,
            robots: None,
            canonical: None,
            h1: None,
            h2: None,
            words: 0,
            size: body.len(),
            body,
            links: vec![],
            external_links: vec![],
            hreflangs: vec![],
            images: vec![],
            scripts: vec![],
            styles: vec![],
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn parsed_url(&self) -> &Url {
        &self.parsed_url
    }

    pub fn is_html(&self) -> bool {
        self.media_type.as_deref() == Some("text/html")
    }

    pub fn is_redirect(&self) -> bool {
        (300..400).contains(&self.status_code)
    }

    /// Body size in kilobytes with two decimals
    pub fn size_in_kb(&self) -> String {
        format!("{:.2}", self.size as f64 / 1024.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    pub url: String,
    pub rel: Option<String>,
    pub text: String,
    pub external: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hreflang {
    pub url: String,
    pub lang: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Image {
    pub url: String,
    pub alt: Option<String>,
}

/// HTTP Basic credentials for sites behind authentication
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct BasicAuth {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for BasicAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BasicAuth")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// A site registered for auditing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: i64,
    pub owner_id: i64,
    pub url: String,
    #[serde(default)]
    pub basic_auth: bool,
    #[serde(default, skip_serializing)]
    pub auth_user: Option<String>,
    #[serde(default, skip_serializing)]
    pub auth_pass: Option<String>,
}

impl Project {
    /// Credentials to crawl with, `None` when the user name is missing
    pub fn credentials(&self) -> Option<BasicAuth> {
        let username = self.auth_user.clone().filter(|u| !u.is_empty())?;
        Some(BasicAuth {
            username,
            password: self.auth_pass.clone().unwrap_or_default(),
        })
    }
}

/// One audit run of a project
#[derive(Debug, Clone, Serialize)]
pub struct Crawl {
    pub id: i64,
    pub project_id: i64,
    pub start: DateTime<Utc>,
    pub end: Option<DateTime<Utc>>,
    pub total_urls: usize,
    pub discovered: usize,
    #[serde(skip)]
    pub basic_auth: Option<BasicAuth>,
}

impl Crawl {
    pub fn is_complete(&self) -> bool {
        self.end.is_some()
    }
}
