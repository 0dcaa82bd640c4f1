use reqwest::{Client, ClientBuilder, header, redirect};
use std::time::Duration;

/// Common HTTP headers used for all requests
const USER_AGENT: &str = concat!("auditly/", env!("CARGO_PKG_VERSION"), " (+SEO audit crawler)");
const ACCEPT: &str = "text/html,application/xhtml+xml,*/*;q=0.8";
const ACCEPT_LANGUAGE: &str = "en-US,en;q=0.9";
const CONNECTION: &str = "keep-alive";

/// Creates the crawler's reqwest client.
///
/// Redirects are never followed: a 3xx response is recorded as a page of its
/// own and its target goes back through the frontier.
pub fn build_http_client(timeout_secs: u64) -> Result<Client, reqwest::Error> {
    let mut headers = header::HeaderMap::new();
    headers.insert(header::ACCEPT, header::HeaderValue::from_static(ACCEPT));
    headers.insert(
        header::ACCEPT_LANGUAGE,
        header::HeaderValue::from_static(ACCEPT_LANGUAGE),
    );
    headers.insert(
        header::CONNECTION,
        header::HeaderValue::from_static(CONNECTION),
    );

    ClientBuilder::new()
        .user_agent(USER_AGENT)
        .default_headers(headers)
        .timeout(Duration::from_secs(timeout_secs))
        .redirect(redirect::Policy::none())
        .gzip(true)
        .brotli(true)
        .deflate(true)
        .build()
}
