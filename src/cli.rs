use clap::{Args, Parser, Subcommand};

pub const DEFAULT_MAX_PAGES: usize = 200;
pub const DEFAULT_CONCURRENCY: usize = 5;
pub const DEFAULT_TIMEOUT: u64 = 30;
pub const DEFAULT_OUTPUT: &str = "text";
pub const DEFAULT_LISTEN: &str = "127.0.0.1:9000";

#[derive(Parser, Debug)]
#[command(name = "auditly", version)]
#[command(about = "A website crawler and SEO auditor with live crawl progress", long_about = None)]
pub struct Cli {
    /// Path to configuration file (JSON, TOML, or YAML)
    #[arg(long, global = true)]
    pub config: Option<String>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Crawl a website and print an SEO audit report
    Crawl(CrawlArgs),
    /// Serve the crawl API and live progress websockets
    Serve(ServeArgs),
}

#[derive(Args, Debug, Clone, PartialEq)]
pub struct CrawlArgs {
    /// The URL to start crawling from
    #[arg(value_name = "URL")]
    pub url: String,

    /// Maximum number of pages to crawl (default: 200)
    #[arg(short, long, default_value_t = DEFAULT_MAX_PAGES)]
    pub max_pages: usize,

    /// Output format: text or json
    #[arg(short, long, default_value = DEFAULT_OUTPUT)]
    pub output: String,

    /// Save report to file
    #[arg(short, long)]
    pub save: Option<String>,

    /// Rate limit for requests per second (optional, e.g., 1.0 for 1 req/s)
    #[arg(short = 'r', long)]
    pub rate_limit: Option<f64>,

    /// Number of concurrent requests (default: 5)
    #[arg(short = 'c', long, default_value_t = DEFAULT_CONCURRENCY)]
    pub concurrency: usize,

    /// Request timeout in seconds (default: 30)
    #[arg(short = 't', long, default_value_t = DEFAULT_TIMEOUT)]
    pub timeout: u64,

    /// Additional host to crawl besides the start URL's host (repeatable)
    #[arg(long = "allow-host", value_name = "HOST")]
    pub allowed_hosts: Vec<String>,

    /// Also follow links marked rel="nofollow"
    #[arg(long)]
    pub follow_nofollow: bool,

    /// Username for HTTP basic authentication
    #[arg(long, requires = "auth_password")]
    pub auth_user: Option<String>,

    /// Password for HTTP basic authentication
    #[arg(long, requires = "auth_user")]
    pub auth_password: Option<String>,
}

#[derive(Args, Debug, Clone, PartialEq)]
pub struct ServeArgs {
    /// Address to listen on
    #[arg(short, long, default_value = DEFAULT_LISTEN)]
    pub listen: String,

    /// Public URL of the server, websocket connections must come from this origin
    #[arg(long)]
    pub public_url: Option<String>,

    /// Maximum number of pages per crawl (default: 200)
    #[arg(short, long, default_value_t = DEFAULT_MAX_PAGES)]
    pub max_pages: usize,

    /// Number of concurrent requests per crawl (default: 5)
    #[arg(short = 'c', long, default_value_t = DEFAULT_CONCURRENCY)]
    pub concurrency: usize,

    /// Rate limit for requests per second per crawl
    #[arg(short = 'r', long)]
    pub rate_limit: Option<f64>,

    /// Request timeout in seconds (default: 30)
    #[arg(short = 't', long, default_value_t = DEFAULT_TIMEOUT)]
    pub timeout: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_crawl_defaults() {
        let cli = Cli::try_parse_from(["auditly", "crawl", "https://example.com"]).unwrap();
        assert!(!cli.verbose);

        let Command::Crawl(args) = cli.command else {
            panic!("expected crawl command");
        };
        assert_eq!(args.url, "https://example.com");
        assert_eq!(args.max_pages, DEFAULT_MAX_PAGES);
        assert_eq!(args.concurrency, DEFAULT_CONCURRENCY);
        assert_eq!(args.output, "text");
        assert!(args.allowed_hosts.is_empty());
    }

    #[test]
    fn test_parse_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "auditly",
            "serve",
            "--listen",
            "0.0.0.0:8080",
            "-v",
            "--config",
            "auditly.toml",
        ])
        .unwrap();

        assert!(cli.verbose);
        assert_eq!(cli.config.as_deref(), Some("auditly.toml"));
        let Command::Serve(args) = cli.command else {
            panic!("expected serve command");
        };
        assert_eq!(args.listen, "0.0.0.0:8080");
    }

    #[test]
    fn test_auth_flags_require_each_other() {
        let result = Cli::try_parse_from([
            "auditly",
            "crawl",
            "https://example.com",
            "--auth-user",
            "admin",
        ]);
        assert!(result.is_err());
    }
}
