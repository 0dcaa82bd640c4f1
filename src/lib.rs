pub mod cli;
pub mod config;
pub mod crawler;
pub mod error;
pub mod fetcher;
pub mod frontier;
pub mod http_client;
pub mod issues;
pub mod live;
pub mod models;
pub mod parser;
pub mod pubsub;
pub mod reporter;
pub mod resolver;
pub mod server;
pub mod store;

use anyhow::{Context, Result};
use cli::{Cli, Command, CrawlArgs, ServeArgs};
use colored::*;
use config::Config;
use crawler::{CrawlerConfig, CrawlerService};
use indicatif::{ProgressBar, ProgressStyle};
use live::LiveTimings;
use models::Project;
use pubsub::{Broker, DEFAULT_QUEUE_SIZE, Message, crawl_topic};
use reporter::AuditReporter;
use server::AppState;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use store::MemoryStore;

pub async fn run(cli: Cli) -> Result<()> {
    let config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Command::Crawl(args) => run_crawl(config.merge_with_crawl_args(&args), &config).await,
        Command::Serve(args) => run_serve(config.merge_with_serve_args(&args), config).await,
    }
}

fn broker_for(config: &Config) -> Arc<Broker> {
    Arc::new(Broker::with_queue_size(
        config.queue_size.unwrap_or(DEFAULT_QUEUE_SIZE),
    ))
}

async fn run_crawl(args: CrawlArgs, config: &Config) -> Result<()> {
    let text_output = args.output != "json";

    if text_output {
        println!("{}", "Auditly - Website Crawler & SEO Auditor".bright_cyan().bold());
        println!("{}", "=".repeat(50).bright_blue());
        println!();
        println!("{} {}", "Starting crawl:".bright_white().bold(), args.url);
        println!("{} {}", "Max pages:".bright_white().bold(), args.max_pages);
        println!();
    }

    let project = Project {
        id: 1,
        owner_id: 0,
        url: args.url.clone(),
        basic_auth: args.auth_user.is_some(),
        auth_user: args.auth_user.clone(),
        auth_pass: args.auth_password.clone(),
    };

    let store = Arc::new(MemoryStore::with_projects([project.clone()]));
    let broker = broker_for(config);
    let crawler = CrawlerService::new(
        CrawlerConfig {
            max_pages: Some(args.max_pages),
            concurrent_requests: args.concurrency,
            requests_per_second: args.rate_limit,
            timeout_secs: args.timeout,
            allowed_hosts: args.allowed_hosts.clone(),
            follow_nofollow: args.follow_nofollow,
        },
        broker.clone(),
        store.clone(),
    );

    let progress = if text_output {
        ProgressBar::new_spinner()
    } else {
        ProgressBar::hidden()
    };
    progress.set_style(
        ProgressStyle::default_spinner()
            .template("[{elapsed_precise}] {spinner:.cyan} {msg}")
            .expect("Progress bar template should be valid"),
    );

    let subscriber = {
        let progress = progress.clone();
        broker.subscribe_with(&crawl_topic(project.id), move |message| {
            let progress = progress.clone();
            async move {
                match message {
                    Message::PageReport(page) => progress.set_message(format!(
                        "Crawled: {} pages, {} queued ({} {})",
                        page.crawled, page.discovered, page.status_code, page.url
                    )),
                    Message::CrawlEnd(total) => {
                        progress.set_message(format!("Crawl finished: {} pages", total))
                    }
                }
            }
        })
    };

    let running = crawler.start(&project).await?;
    progress.enable_steady_tick(Duration::from_millis(120));
    let wait = running.wait();
    tokio::pin!(wait);

    let outcome = tokio::select! {
        outcome = &mut wait => outcome,
        _ = tokio::signal::ctrl_c() => {
            progress.set_message("Stopping crawl...");
            crawler.stop(project.id);
            wait.await
        }
    }
    .context("Crawl task failed")?;

    broker.unsubscribe(&subscriber);
    progress.finish_and_clear();

    let issues = store.issues(outcome.crawl.id);
    let report =
        AuditReporter::generate_report(&args.url, &outcome.crawl, &outcome.counts, &issues);

    if text_output {
        println!(
            "{} {} pages crawled, {} issues found",
            "Success:".bright_green().bold(),
            outcome.crawl.total_urls,
            outcome.counts.total_issues
        );
        AuditReporter::print_text_report(&report);
    } else {
        let json = serde_json::to_string_pretty(&report)?;
        println!("{}", json);
    }

    if let Some(filename) = &args.save {
        AuditReporter::save_json_report(&report, filename)?;
    }

    Ok(())
}

async fn run_serve(args: ServeArgs, config: Config) -> Result<()> {
    let addr: SocketAddr = args
        .listen
        .parse()
        .with_context(|| format!("Invalid listen address: {}", args.listen))?;

    let projects = config.projects.clone().unwrap_or_default();
    if projects.is_empty() {
        tracing::warn!("No projects configured, every crawl request will be rejected");
    }

    let store = Arc::new(MemoryStore::with_projects(projects));
    let crawler = CrawlerService::new(
        CrawlerConfig {
            max_pages: Some(args.max_pages),
            concurrent_requests: args.concurrency,
            requests_per_second: args.rate_limit,
            timeout_secs: args.timeout,
            allowed_hosts: config.allowed_hosts.clone().unwrap_or_default(),
            follow_nofollow: config.follow_nofollow.unwrap_or(false),
        },
        broker_for(&config),
        store.clone(),
    );

    let state = AppState {
        crawler: Arc::new(crawler),
        projects: store,
        public_url: args.public_url,
        timings: LiveTimings::default(),
    };

    server::serve(state, addr).await
}
