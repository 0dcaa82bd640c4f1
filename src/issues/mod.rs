pub mod page;

use crate::models::PageReport;
use reqwest::header::HeaderMap;
use scraper::Html;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// Identifier of every rule the auditor knows about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum ErrorType {
    Error30x,
    Error40x,
    Error50x,
    EmptyTitle,
    ShortTitle,
    LongTitle,
    EmptyDescription,
    ShortDescription,
    LongDescription,
    NoH1,
    MultipleH1,
    NoLang,
    LittleContent,
    ImagesWithNoAlt,
    NoIndexable,
    HttpLinks,
    UnderscoreUrl,
    SpaceUrl,
}

impl ErrorType {
    pub fn description(&self) -> &'static str {
        match self {
            ErrorType::Error30x => "Page responded with a redirect",
            ErrorType::Error40x => "Page responded with a client error",
            ErrorType::Error50x => "Page responded with a server error",
            ErrorType::EmptyTitle => "Page is missing a title tag",
            ErrorType::ShortTitle => "Title is too short",
            ErrorType::LongTitle => "Title is too long",
            ErrorType::EmptyDescription => "Page is missing a meta description",
            ErrorType::ShortDescription => "Meta description is too short",
            ErrorType::LongDescription => "Meta description is too long",
            ErrorType::NoH1 => "Page is missing an H1 tag",
            ErrorType::MultipleH1 => "Page has multiple H1 tags",
            ErrorType::NoLang => "Page is missing the lang attribute",
            ErrorType::LittleContent => "Page has little content",
            ErrorType::ImagesWithNoAlt => "Images without alt text",
            ErrorType::NoIndexable => "Page is not indexable",
            ErrorType::HttpLinks => "Secure page links to insecure URLs",
            ErrorType::UnderscoreUrl => "URL contains underscores",
            ErrorType::SpaceUrl => "URL contains spaces",
        }
    }
}

impl fmt::Display for ErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// Pure evaluation function of a rule
pub type Callback = Box<dyn Fn(&PageReport, &Html, &HeaderMap) -> bool + Send + Sync>;

/// Pairs an error type with the callback that decides whether a page has it
pub struct Reporter {
    pub error_type: ErrorType,
    pub callback: Callback,
}

impl Reporter {
    pub fn new<F>(error_type: ErrorType, callback: F) -> Self
    where
        F: Fn(&PageReport, &Html, &HeaderMap) -> bool + Send + Sync + 'static,
    {
        Self {
            error_type,
            callback: Box::new(callback),
        }
    }

    pub fn reports(&self, page: &PageReport, document: &Html, headers: &HeaderMap) -> bool {
        (self.callback)(page, document, headers)
    }
}

/// A detected rule violation on one page
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Issue {
    pub error_type: ErrorType,
    pub url: String,
}

/// Registry of reporters keyed by the error type they detect
#[derive(Default)]
pub struct IssueEngine {
    reporters: HashMap<ErrorType, Reporter>,
}

impl IssueEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Engine with every built-in rule registered
    pub fn with_default_reporters() -> Self {
        let mut engine = Self::new();
        for reporter in page::default_reporters() {
            engine.register(reporter);
        }
        engine
    }

    /// Adds a reporter, replacing any previous one for the same error type
    pub fn register(&mut self, reporter: Reporter) {
        self.reporters.insert(reporter.error_type, reporter);
    }

    pub fn remove(&mut self, error_type: ErrorType) -> Option<Reporter> {
        self.reporters.remove(&error_type)
    }

    pub fn len(&self) -> usize {
        self.reporters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reporters.is_empty()
    }

    /// Runs every registered reporter against a page, returning the triggered
    /// error types in a stable order
    pub fn detect(&self, page: &PageReport, document: &Html, headers: &HeaderMap) -> Vec<ErrorType> {
        let mut found: Vec<ErrorType> = self
            .reporters
            .values()
            .filter(|reporter| reporter.reports(page, document, headers))
            .map(|reporter| reporter.error_type)
            .collect();
        found.sort();
        found
    }
}

/// HTTP status bucket used for summaries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum StatusClass {
    #[serde(rename = "2xx")]
    Success,
    #[serde(rename = "3xx")]
    Redirect,
    #[serde(rename = "4xx")]
    ClientError,
    #[serde(rename = "5xx")]
    ServerError,
    #[serde(rename = "other")]
    Other,
}

impl StatusClass {
    pub fn from_status(status: u16) -> Self {
        match status {
            200..=299 => StatusClass::Success,
            300..=399 => StatusClass::Redirect,
            400..=499 => StatusClass::ClientError,
            500..=599 => StatusClass::ServerError,
            _ => StatusClass::Other,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            StatusClass::Success => "2xx",
            StatusClass::Redirect => "3xx",
            StatusClass::ClientError => "4xx",
            StatusClass::ServerError => "5xx",
            StatusClass::Other => "other",
        }
    }
}

/// Running totals for one crawl
#[derive(Debug, Clone, Default, Serialize)]
pub struct IssueCount {
    pub media_count: BTreeMap<String, usize>,
    pub status_count: BTreeMap<StatusClass, usize>,
    pub issue_count: BTreeMap<ErrorType, usize>,
    pub total_issues: usize,
}

impl IssueCount {
    pub fn record(&mut self, page: &PageReport, issues: &[ErrorType]) {
        let media_type = page.media_type.clone().unwrap_or_else(|| "unknown".to_string());
        *self.media_count.entry(media_type).or_default() += 1;
        *self
            .status_count
            .entry(StatusClass::from_status(page.status_code))
            .or_default() += 1;

        for error_type in issues {
            *self.issue_count.entry(*error_type).or_default() += 1;
        }
        self.total_issues += issues.len();
    }

    pub fn pages(&self) -> usize {
        self.status_count.values().sum()
    }
}
