use crate::error::CrawlError;
use crate::fetcher::{FetchResponse, Fetcher};
use crate::frontier::Frontier;
use crate::issues::{ErrorType, IssueCount, IssueEngine};
use crate::models::{Crawl, PageReport, Project};
use crate::parser::parse_page;
use crate::pubsub::{Broker, Message, PageReportMessage, crawl_topic};
use crate::store::CrawlStore;
use chrono::Utc;
use futures::FutureExt;
use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use url::Url;

/// Configuration for the crawler
#[derive(Debug, Clone)]
pub struct CrawlerConfig {
    pub max_pages: Option<usize>,
    pub concurrent_requests: usize,
    pub requests_per_second: Option<f64>,
    pub timeout_secs: u64,
    /// Hosts besides the project's own host that may be crawled
    pub allowed_hosts: Vec<String>,
    /// Also follow links marked rel="nofollow"
    pub follow_nofollow: bool,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            max_pages: None,
            concurrent_requests: 5,
            requests_per_second: None,
            timeout_secs: 30,
            allowed_hosts: vec![],
            follow_nofollow: false,
        }
    }
}

/// Lifecycle of one crawl
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrawlState {
    Idle,
    Running,
    /// The frontier ran out of URLs, workers are finishing up
    Draining,
    /// A stop was requested, workers exit after their current page
    Stopping,
    Ended,
}

struct CrawlControl {
    state: Mutex<CrawlState>,
    frontier: Arc<Frontier>,
}

impl CrawlControl {
    fn state(&self) -> MutexGuard<'_, CrawlState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn current(&self) -> CrawlState {
        *self.state()
    }

    fn transition(&self, from: &[CrawlState], to: CrawlState) -> bool {
        let mut state = self.state();
        if from.contains(&state) {
            *state = to;
            true
        } else {
            false
        }
    }

    fn stop(&self) -> bool {
        let stopped = self.transition(&[CrawlState::Idle, CrawlState::Running], CrawlState::Stopping);
        self.frontier.close();
        stopped
    }

    fn is_stopping(&self) -> bool {
        self.current() == CrawlState::Stopping
    }
}

type RunningMap = Arc<Mutex<HashMap<i64, Arc<CrawlControl>>>>;

fn lock_running(running: &RunningMap) -> MutexGuard<'_, HashMap<i64, Arc<CrawlControl>>> {
    running.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Final state of a crawl once every worker has exited
#[derive(Debug, Clone)]
pub struct CrawlOutcome {
    pub crawl: Crawl,
    pub counts: IssueCount,
}

/// Handle to a crawl whose workers are running in the background
pub struct RunningCrawl {
    pub crawl_id: i64,
    pub project_id: i64,
    handle: JoinHandle<CrawlOutcome>,
}

impl RunningCrawl {
    /// Waits for the crawl to end
    pub async fn wait(self) -> Result<CrawlOutcome, JoinError> {
        self.handle.await
    }
}

/// Starts, tracks and stops crawls. One crawl per project may run at a time.
pub struct CrawlerService {
    config: CrawlerConfig,
    broker: Arc<Broker>,
    store: Arc<dyn CrawlStore>,
    engine: Arc<IssueEngine>,
    running: RunningMap,
}

impl CrawlerService {
    pub fn new(config: CrawlerConfig, broker: Arc<Broker>, store: Arc<dyn CrawlStore>) -> Self {
        Self::with_engine(config, broker, store, IssueEngine::with_default_reporters())
    }

    pub fn with_engine(
        config: CrawlerConfig,
        broker: Arc<Broker>,
        store: Arc<dyn CrawlStore>,
        engine: IssueEngine,
    ) -> Self {
        Self {
            config,
            broker,
            store,
            engine: Arc::new(engine),
            running: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn broker(&self) -> &Arc<Broker> {
        &self.broker
    }

    /// Current state of the project's crawl, `Idle` when none is running
    pub fn state(&self, project_id: i64) -> CrawlState {
        lock_running(&self.running)
            .get(&project_id)
            .map_or(CrawlState::Idle, |control| control.current())
    }

    pub fn is_running(&self, project_id: i64) -> bool {
        lock_running(&self.running).contains_key(&project_id)
    }

    /// Validates the project and starts crawling it in the background.
    ///
    /// Every reason a crawl cannot start is reported here, before any worker
    /// is spawned. A project with BasicAuth enabled must carry credentials.
    pub async fn start(&self, project: &Project) -> Result<RunningCrawl, CrawlError> {
        let root = Url::parse(&project.url)
            .map_err(|e| CrawlError::InvalidUrl(format!("{}: {}", project.url, e)))?;
        if !matches!(root.scheme(), "http" | "https") {
            return Err(CrawlError::InvalidUrl(format!(
                "{}: only http and https are supported",
                project.url
            )));
        }

        let basic_auth = if project.basic_auth {
            Some(
                project
                    .credentials()
                    .ok_or(CrawlError::MissingCredentials(project.id))?,
            )
        } else {
            None
        };

        let fetcher = Fetcher::new(
            self.config.timeout_secs,
            self.config.requests_per_second,
            basic_auth.clone(),
        )?;

        let frontier = Arc::new(Frontier::new(
            &root,
            self.config.allowed_hosts.iter().cloned(),
            self.config.max_pages,
        ));
        let control = Arc::new(CrawlControl {
            state: Mutex::new(CrawlState::Idle),
            frontier: frontier.clone(),
        });

        {
            let mut running = lock_running(&self.running);
            if running.contains_key(&project.id) {
                return Err(CrawlError::AlreadyRunning(project.id));
            }
            running.insert(project.id, control.clone());
        }

        let crawl_id = match self.store.start_crawl(project).await {
            Ok(id) => id,
            Err(e) => {
                lock_running(&self.running).remove(&project.id);
                return Err(e.into());
            }
        };

        frontier.offer(root.clone());

        let crawl = Crawl {
            id: crawl_id,
            project_id: project.id,
            start: Utc::now(),
            end: None,
            total_urls: 0,
            discovered: 0,
            basic_auth,
        };

        let ctx = Arc::new(CrawlContext {
            topic: crawl_topic(project.id),
            frontier,
            fetcher,
            engine: self.engine.clone(),
            broker: self.broker.clone(),
            store: self.store.clone(),
            control,
            counts: Mutex::new(IssueCount::default()),
            crawled: AtomicUsize::new(0),
            follow_nofollow: self.config.follow_nofollow,
            crawl_id,
        });

        tracing::info!(project = project.id, crawl = crawl_id, url = %root, "Crawl started");

        let handle = tokio::spawn(run_crawl(
            ctx,
            crawl,
            self.config.concurrent_requests.max(1),
            self.running.clone(),
        ));

        Ok(RunningCrawl {
            crawl_id,
            project_id: project.id,
            handle,
        })
    }

    /// Requests a running crawl to stop. Idempotent; pages being fetched are
    /// allowed to complete. Returns whether a crawl was running.
    pub fn stop(&self, project_id: i64) -> bool {
        let control = lock_running(&self.running).get(&project_id).cloned();
        match control {
            Some(control) => {
                if control.stop() {
                    tracing::info!(project = project_id, "Crawl stop requested");
                }
                true
            }
            None => false,
        }
    }
}

struct CrawlContext {
    crawl_id: i64,
    topic: String,
    frontier: Arc<Frontier>,
    fetcher: Fetcher,
    engine: Arc<IssueEngine>,
    broker: Arc<Broker>,
    store: Arc<dyn CrawlStore>,
    control: Arc<CrawlControl>,
    counts: Mutex<IssueCount>,
    crawled: AtomicUsize,
    follow_nofollow: bool,
}

async fn run_crawl(
    ctx: Arc<CrawlContext>,
    mut crawl: Crawl,
    workers: usize,
    running: RunningMap,
) -> CrawlOutcome {
    ctx.control.transition(&[CrawlState::Idle], CrawlState::Running);

    let mut pool = JoinSet::new();
    for _ in 0..workers {
        pool.spawn(worker(ctx.clone()));
    }

    while let Some(result) = pool.join_next().await {
        if let Err(e) = result {
            tracing::error!(crawl = ctx.crawl_id, error = %e, "Crawl worker failed");
        }
    }

    let previous = ctx.control.current();
    ctx.control.transition(
        &[CrawlState::Running, CrawlState::Draining, CrawlState::Stopping],
        CrawlState::Ended,
    );

    let total = ctx.crawled.load(Ordering::SeqCst);
    crawl.total_urls = total;
    crawl.discovered = ctx.frontier.pending();
    crawl.end = Some(Utc::now());

    // The project can start a new crawl once CrawlEnd is observed
    lock_running(&running).remove(&crawl.project_id);

    ctx.broker.publish(&ctx.topic, Message::CrawlEnd(total));

    if let Err(e) = ctx.store.finalize_crawl(ctx.crawl_id, total).await {
        tracing::error!(crawl = ctx.crawl_id, error = %e, "Failed to finalize crawl");
    }

    tracing::info!(
        crawl = ctx.crawl_id,
        total,
        stopped = previous == CrawlState::Stopping,
        "Crawl ended"
    );

    let counts = ctx
        .counts
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .clone();

    CrawlOutcome { crawl, counts }
}

async fn worker(ctx: Arc<CrawlContext>) {
    loop {
        if ctx.control.is_stopping() {
            break;
        }

        let Some(url) = ctx.frontier.next().await else {
            ctx.control.transition(&[CrawlState::Running], CrawlState::Draining);
            break;
        };

        // done() runs even when a page panics, or the frontier never drains
        let page = url.to_string();
        if let Err(panic) = AssertUnwindSafe(process(&ctx, url)).catch_unwind().await {
            tracing::error!(
                crawl = ctx.crawl_id,
                url = %page,
                panic = panic_message(panic.as_ref()),
                "Page processing panicked"
            );
        }
        ctx.frontier.done();
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

async fn process(ctx: &CrawlContext, url: Url) {
    let response = match ctx.fetcher.fetch(&url).await {
        Ok(response) => response,
        Err(e) => {
            tracing::warn!(url = %url, error = %e, "Failed to fetch page");
            return;
        }
    };

    let (report, issues) = analyze(&ctx.engine, &url, response);

    for discovered in discovered_urls(&report, ctx.follow_nofollow) {
        ctx.frontier.offer(discovered);
    }

    for error_type in &issues {
        if let Err(e) = ctx
            .store
            .record_issue(ctx.crawl_id, *error_type, report.url())
            .await
        {
            tracing::warn!(url = %report.url(), error = %e, "Failed to record issue");
        }
    }

    // Counting and publishing under one lock keeps "Crawled" monotonic in
    // publish order
    let mut counts = ctx.counts.lock().unwrap_or_else(PoisonError::into_inner);
    counts.record(&report, &issues);
    let crawled = ctx.crawled.fetch_add(1, Ordering::SeqCst) + 1;

    ctx.broker.publish(
        &ctx.topic,
        Message::PageReport(PageReportMessage {
            status_code: report.status_code,
            url: report.url().to_string(),
            crawled,
            discovered: ctx.frontier.pending(),
            crawling: true,
        }),
    );
}

/// Parses the page and runs the issue reporters. The parsed document never
/// leaves this function.
fn analyze(engine: &IssueEngine, url: &Url, response: FetchResponse) -> (PageReport, Vec<ErrorType>) {
    let FetchResponse {
        status,
        headers,
        body,
    } = response;

    let (report, document) = parse_page(url, status, &headers, body);
    let issues = engine.detect(&report, &document, &headers);

    tracing::debug!(url = %url, status, issues = issues.len(), "Page analyzed");

    (report, issues)
}

/// Every URL referenced by a page that the frontier should consider
fn discovered_urls(report: &PageReport, follow_nofollow: bool) -> Vec<Url> {
    let links = report
        .links
        .iter()
        .filter(|link| follow_nofollow || !is_nofollow(link.rel.as_deref()))
        .map(|link| link.url.as_str());

    links
        .chain(report.hreflangs.iter().map(|h| h.url.as_str()))
        .chain(report.images.iter().map(|i| i.url.as_str()))
        .chain(report.scripts.iter().map(String::as_str))
        .chain(report.styles.iter().map(String::as_str))
        .chain(report.redirect_url.as_deref())
        .chain(report.canonical.as_deref())
        .filter_map(|raw| Url::parse(raw).ok())
        .collect()
}

fn is_nofollow(rel: Option<&str>) -> bool {
    rel.is_some_and(|rel| {
        rel.split_whitespace()
            .any(|token| token.eq_ignore_ascii_case("nofollow"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Hreflang, Image, Link};

    fn link(url: &str, rel: Option<&str>) -> Link {
        Link {
            url: url.to_string(),
            rel: rel.map(|r| r.to_string()),
            text: String::new(),
            external: false,
        }
    }

    #[test]
    fn test_discovered_urls_collects_every_resource() {
        let mut report = PageReport::new(Url::parse("https://example.com/").unwrap(), 200, None, vec![]);
        report.links.push(link("https://example.com/a", None));
        report.links.push(link("https://example.com/hidden", Some("nofollow noopener")));
        report.hreflangs.push(Hreflang {
            url: "https://example.com/fr/".to_string(),
            lang: "fr".to_string(),
        });
        report.images.push(Image {
            url: "https://example.com/logo.png".to_string(),
            alt: None,
        });
        report.scripts.push("https://example.com/app.js".to_string());
        report.styles.push("https://example.com/style.css".to_string());
        report.canonical = Some("https://example.com/".to_string());

        let urls: Vec<String> = discovered_urls(&report, false)
            .into_iter()
            .map(|u| u.to_string())
            .collect();

        assert_eq!(
            urls,
            vec![
                "https://example.com/a",
                "https://example.com/fr/",
                "https://example.com/logo.png",
                "https://example.com/app.js",
                "https://example.com/style.css",
                "https://example.com/",
            ]
        );

        assert_eq!(discovered_urls(&report, true).len(), 7);
    }

    #[test]
    fn test_is_nofollow() {
        assert!(is_nofollow(Some("nofollow")));
        assert!(is_nofollow(Some("noopener NOFOLLOW")));
        assert!(!is_nofollow(Some("noopener")));
        assert!(!is_nofollow(None));
    }
}
