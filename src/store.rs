//! Interfaces of the persistence collaborators the crawler talks to, plus an
//! in-memory implementation used by the CLI and the tests.

use crate::error::StoreError;
use crate::issues::{ErrorType, Issue};
use crate::models::Project;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

#[async_trait]
pub trait ProjectStore: Send + Sync {
    /// Looks up a project owned by the given user
    async fn find_project(&self, project_id: i64, user_id: i64) -> Result<Project, StoreError>;
}

#[async_trait]
pub trait CrawlStore: Send + Sync {
    /// Records the start of a new crawl and returns its id
    async fn start_crawl(&self, project: &Project) -> Result<i64, StoreError>;

    async fn finalize_crawl(&self, crawl_id: i64, total_urls: usize) -> Result<(), StoreError>;

    async fn record_issue(
        &self,
        crawl_id: i64,
        error_type: ErrorType,
        url: &str,
    ) -> Result<(), StoreError>;
}

/// Stored state of a crawl
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawlRecord {
    pub id: i64,
    pub project_id: i64,
    pub total_urls: usize,
    pub finished: bool,
}

#[derive(Default)]
struct MemoryState {
    projects: HashMap<i64, Project>,
    crawls: Vec<CrawlRecord>,
    issues: HashMap<i64, Vec<Issue>>,
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_projects<I>(projects: I) -> Self
    where
        I: IntoIterator<Item = Project>,
    {
        let store = Self::new();
        for project in projects {
            store.add_project(project);
        }
        store
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add_project(&self, project: Project) {
        self.state().projects.insert(project.id, project);
    }

    pub fn crawl(&self, crawl_id: i64) -> Option<CrawlRecord> {
        self.state().crawls.iter().find(|c| c.id == crawl_id).cloned()
    }

    /// Issues recorded for a crawl, in recording order
    pub fn issues(&self, crawl_id: i64) -> Vec<Issue> {
        self.state().issues.get(&crawl_id).cloned().unwrap_or_default()
    }
}

#[async_trait]
impl ProjectStore for MemoryStore {
    async fn find_project(&self, project_id: i64, user_id: i64) -> Result<Project, StoreError> {
        self.state()
            .projects
            .get(&project_id)
            .filter(|p| p.owner_id == user_id)
            .cloned()
            .ok_or(StoreError::NotFound(project_id))
    }
}

#[async_trait]
impl CrawlStore for MemoryStore {
    async fn start_crawl(&self, project: &Project) -> Result<i64, StoreError> {
        let mut state = self.state();
        let id = state.crawls.len() as i64 + 1;
        state.crawls.push(CrawlRecord {
            id,
            project_id: project.id,
            total_urls: 0,
            finished: false,
        });
        Ok(id)
    }

    async fn finalize_crawl(&self, crawl_id: i64, total_urls: usize) -> Result<(), StoreError> {
        let mut state = self.state();
        let crawl = state
            .crawls
            .iter_mut()
            .find(|c| c.id == crawl_id)
            .ok_or_else(|| StoreError::Backend(format!("unknown crawl {}", crawl_id)))?;

        crawl.total_urls = total_urls;
        crawl.finished = true;
        Ok(())
    }

    async fn record_issue(
        &self,
        crawl_id: i64,
        error_type: ErrorType,
        url: &str,
    ) -> Result<(), StoreError> {
        self.state().issues.entry(crawl_id).or_default().push(Issue {
            error_type,
            url: url.to_string(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn project(id: i64, owner_id: i64) -> Project {
        Project {
            id,
            owner_id,
            url: "https://example.com".to_string(),
            basic_auth: false,
            auth_user: None,
            auth_pass: None,
        }
    }

    #[tokio::test]
    async fn test_find_project_checks_owner() {
        let store = MemoryStore::with_projects([project(1, 10)]);

        assert!(store.find_project(1, 10).await.is_ok());
        assert!(matches!(
            store.find_project(1, 11).await,
            Err(StoreError::NotFound(1))
        ));
        assert!(store.find_project(2, 10).await.is_err());
    }

    #[tokio::test]
    async fn test_crawl_lifecycle() {
        let store = MemoryStore::new();
        let id = store.start_crawl(&project(1, 10)).await.unwrap();
        store
            .record_issue(id, ErrorType::NoH1, "https://example.com/")
            .await
            .unwrap();
        store.finalize_crawl(id, 5).await.unwrap();

        let crawl = store.crawl(id).unwrap();
        assert!(crawl.finished);
        assert_eq!(crawl.total_urls, 5);
        assert_eq!(store.issues(id).len(), 1);
        assert!(store.finalize_crawl(99, 1).await.is_err());
    }
}
