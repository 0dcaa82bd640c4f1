use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::cli::{
    CrawlArgs, DEFAULT_CONCURRENCY, DEFAULT_LISTEN, DEFAULT_MAX_PAGES, DEFAULT_OUTPUT,
    DEFAULT_TIMEOUT, ServeArgs,
};
use crate::models::Project;

/// Configuration file structure.
/// All fields are optional to allow partial configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Maximum number of pages to crawl
    pub max_pages: Option<usize>,

    /// Output format: text or json
    pub output: Option<String>,

    /// Save report to file
    pub save: Option<String>,

    /// Rate limit for requests per second
    pub rate_limit: Option<f64>,

    /// Number of concurrent requests
    pub concurrency: Option<usize>,

    /// Request timeout in seconds
    pub timeout: Option<u64>,

    /// Hosts crawled besides the start URL's host
    pub allowed_hosts: Option<Vec<String>>,

    /// Follow links marked rel="nofollow"
    pub follow_nofollow: Option<bool>,

    /// Server listen address
    pub listen: Option<String>,

    /// Public URL of the server
    pub public_url: Option<String>,

    /// Per-subscriber queue size of the live event broker
    pub queue_size: Option<usize>,

    /// Projects served by `auditly serve`
    pub projects: Option<Vec<Project>>,
}

/// Configuration file format based on file extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Json,
    Toml,
    Yaml,
}

const FORMATS: [ConfigFormat; 3] = [ConfigFormat::Json, ConfigFormat::Toml, ConfigFormat::Yaml];

impl ConfigFormat {
    /// Detect format from file extension
    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(|ext| match ext.to_lowercase().as_str() {
                "json" => Some(ConfigFormat::Json),
                "toml" => Some(ConfigFormat::Toml),
                "yaml" | "yml" => Some(ConfigFormat::Yaml),
                _ => None,
            })
    }

    pub fn extensions(&self) -> &[&str] {
        match self {
            ConfigFormat::Json => &["json"],
            ConfigFormat::Toml => &["toml"],
            ConfigFormat::Yaml => &["yaml", "yml"],
        }
    }

    fn parse(&self, contents: &str, path: &Path) -> Result<Config> {
        let config = match self {
            ConfigFormat::Json => serde_json::from_str(contents)
                .with_context(|| format!("Failed to parse JSON config: {}", path.display()))?,
            ConfigFormat::Toml => toml::from_str(contents)
                .with_context(|| format!("Failed to parse TOML config: {}", path.display()))?,
            ConfigFormat::Yaml => serde_yaml::from_str(contents)
                .with_context(|| format!("Failed to parse YAML config: {}", path.display()))?,
        };
        Ok(config)
    }
}

fn config_home() -> Option<PathBuf> {
    std::env::var("XDG_CONFIG_HOME")
        .ok()
        .filter(|p| !p.is_empty())
        .map(PathBuf::from)
        .or_else(|| dirs::home_dir().map(|home| home.join(".config")))
}

impl Config {
    /// Load configuration from a file
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let format = ConfigFormat::from_path(path)
            .with_context(|| format!("Unsupported config file format: {}", path.display()))?;

        let config = format.parse(&contents, path)?;
        tracing::debug!(path = %path.display(), "Loaded configuration");

        Ok(config)
    }

    /// Configuration file paths in order of priority: current directory,
    /// then `$XDG_CONFIG_HOME/auditly` (or `~/.config/auditly`)
    pub fn default_paths() -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = FORMATS
            .iter()
            .flat_map(|format| format.extensions())
            .map(|ext| PathBuf::from(format!("auditly.{}", ext)))
            .collect();

        if let Some(config_home) = config_home() {
            let dir = config_home.join("auditly");
            paths.extend(
                FORMATS
                    .iter()
                    .flat_map(|format| format.extensions())
                    .map(|ext| dir.join(format!("config.{}", ext))),
            );
        }

        paths
    }

    /// Returns the first configuration file found, or None if no config exists
    pub fn from_default_paths() -> Result<Option<Self>> {
        for path in Self::default_paths() {
            if path.exists() {
                return Ok(Some(Self::from_file(&path)?));
            }
        }
        Ok(None)
    }

    /// Loads the explicitly given file, or falls back to the default paths
    pub fn load(path: Option<&str>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(Path::new(path)),
            None => Ok(Self::from_default_paths()?.unwrap_or_default()),
        }
    }

    /// Merge this configuration with `crawl` arguments.
    /// Arguments that differ from their defaults take precedence
    pub fn merge_with_crawl_args(&self, args: &CrawlArgs) -> CrawlArgs {
        CrawlArgs {
            url: args.url.clone(),
            max_pages: if args.max_pages != DEFAULT_MAX_PAGES {
                args.max_pages
            } else {
                self.max_pages.unwrap_or(args.max_pages)
            },
            output: if args.output != DEFAULT_OUTPUT {
                args.output.clone()
            } else {
                self.output.clone().unwrap_or_else(|| args.output.clone())
            },
            save: args.save.clone().or_else(|| self.save.clone()),
            rate_limit: args.rate_limit.or(self.rate_limit),
            concurrency: if args.concurrency != DEFAULT_CONCURRENCY {
                args.concurrency
            } else {
                self.concurrency.unwrap_or(args.concurrency)
            },
            timeout: if args.timeout != DEFAULT_TIMEOUT {
                args.timeout
            } else {
                self.timeout.unwrap_or(args.timeout)
            },
            allowed_hosts: if !args.allowed_hosts.is_empty() {
                args.allowed_hosts.clone()
            } else {
                self.allowed_hosts.clone().unwrap_or_default()
            },
            follow_nofollow: args.follow_nofollow || self.follow_nofollow.unwrap_or(false),
            auth_user: args.auth_user.clone(),
            auth_password: args.auth_password.clone(),
        }
    }

    /// Merge this configuration with `serve` arguments.
    /// Arguments that differ from their defaults take precedence
    pub fn merge_with_serve_args(&self, args: &ServeArgs) -> ServeArgs {
        ServeArgs {
            listen: if args.listen != DEFAULT_LISTEN {
                args.listen.clone()
            } else {
                self.listen.clone().unwrap_or_else(|| args.listen.clone())
            },
            public_url: args.public_url.clone().or_else(|| self.public_url.clone()),
            max_pages: if args.max_pages != DEFAULT_MAX_PAGES {
                args.max_pages
            } else {
                self.max_pages.unwrap_or(args.max_pages)
            },
            concurrency: if args.concurrency != DEFAULT_CONCURRENCY {
                args.concurrency
            } else {
                self.concurrency.unwrap_or(args.concurrency)
            },
            rate_limit: args.rate_limit.or(self.rate_limit),
            timeout: if args.timeout != DEFAULT_TIMEOUT {
                args.timeout
            } else {
                self.timeout.unwrap_or(args.timeout)
            },
        }
    }
}
