use std::collections::{HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;
use url::Url;

/// Pending URLs plus the visited set used for deduplication, shared by all
/// workers of one crawl.
///
/// A URL popped with [`Frontier::next`] stays "in flight" until the worker
/// calls [`Frontier::done`]; the frontier is drained only once the queue is
/// empty and nothing is in flight, since in-flight pages may still discover
/// new links.
pub struct Frontier {
    root_host: Option<String>,
    allowed_hosts: HashSet<String>,
    max_pages: Option<usize>,
    state: Mutex<FrontierState>,
    notify: Notify,
}

#[derive(Default)]
struct FrontierState {
    visited: HashSet<String>,
    pending: VecDeque<Url>,
    in_flight: usize,
    closed: bool,
}

impl Frontier {
    pub fn new<I>(root: &Url, allowed_hosts: I, max_pages: Option<usize>) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        Self {
            root_host: root.host_str().map(|h| h.to_lowercase()),
            allowed_hosts: allowed_hosts.into_iter().map(|h| h.to_lowercase()).collect(),
            max_pages,
            state: Mutex::new(FrontierState::default()),
            notify: Notify::new(),
        }
    }

    fn state(&self) -> MutexGuard<'_, FrontierState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Same host as the root URL, or a host explicitly allowed. Scheme and
    /// port are ignored so an http root that redirects to https stays in scope.
    pub fn in_scope(&self, url: &Url) -> bool {
        if !matches!(url.scheme(), "http" | "https") {
            return false;
        }

        let Some(host) = url.host_str().map(|h| h.to_lowercase()) else {
            return false;
        };

        Some(&host) == self.root_host.as_ref() || self.allowed_hosts.contains(&host)
    }

    /// Queues a URL unless it was already seen or is out of scope.
    /// Returns whether the URL was queued.
    pub fn offer(&self, url: Url) -> bool {
        if !self.in_scope(&url) {
            return false;
        }

        let mut state = self.state();
        if state.closed {
            return false;
        }
        if self.max_pages.is_some_and(|max| state.visited.len() >= max) {
            return false;
        }
        if !state.visited.insert(url.as_str().to_string()) {
            return false;
        }

        state.pending.push_back(url);
        drop(state);

        self.notify.notify_waiters();
        true
    }

    /// Pops the next URL, waiting while other workers may still discover
    /// links. `None` means the frontier is drained or closed.
    pub async fn next(&self) -> Option<Url> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.state();
                if state.closed {
                    return None;
                }
                if let Some(url) = state.pending.pop_front() {
                    state.in_flight += 1;
                    return Some(url);
                }
                if state.in_flight == 0 {
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Marks a URL obtained from [`Frontier::next`] as processed
    pub fn done(&self) {
        let mut state = self.state();
        state.in_flight = state.in_flight.saturating_sub(1);
        drop(state);

        self.notify.notify_waiters();
    }

    /// Stops handing out URLs and wakes every waiting worker
    pub fn close(&self) {
        self.state().closed = true;
        self.notify.notify_waiters();
    }

    /// Discovered URLs that have not been handed out yet
    pub fn pending(&self) -> usize {
        self.state().pending.len()
    }

    pub fn visited(&self) -> usize {
        self.state().visited.len()
    }
}
