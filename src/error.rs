use thiserror::Error;

/// Failure to turn a raw `href`/`src` value into an absolute crawlable URL
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UrlError {
    #[error("unsupported scheme '{0}': only http and https are crawled")]
    UnsupportedScheme(String),

    #[error("malformed URL '{raw}': {reason}")]
    Malformed { raw: String, reason: String },
}

/// Network-level failure while retrieving a page.
///
/// HTTP error statuses are not represented here, a 404 is a valid fetch result.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {url} timed out")]
    Timeout { url: String },

    #[error("connection error for {url}: {source}")]
    Connection {
        url: String,
        #[source]
        source: reqwest::Error,
    },
}

/// Errors raised by the storage collaborators
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("project {0} not found")]
    NotFound(i64),

    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Reasons a crawl cannot be started. These are reported to the caller
/// before any worker is spawned.
#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("project {0} not found")]
    ProjectNotFound(i64),

    #[error("invalid project URL: {0}")]
    InvalidUrl(String),

    #[error("project {0} requires BasicAuth credentials")]
    MissingCredentials(i64),

    #[error("a crawl is already running for project {0}")]
    AlreadyRunning(i64),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}
