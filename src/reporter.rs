use crate::issues::{ErrorType, Issue, IssueCount};
use crate::models::Crawl;
use anyhow::{Context, Result};
use colored::*;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Write;

/// Result of one audit, as printed or saved
#[derive(Debug, Clone, Serialize)]
pub struct AuditReport {
    pub start_url: String,
    pub crawl: Crawl,
    pub counts: IssueCount,
    /// Affected URLs per issue type
    pub issues: BTreeMap<ErrorType, Vec<String>>,
    pub timestamp: String,
}

pub struct AuditReporter;

impl AuditReporter {
    pub fn generate_report(
        start_url: &str,
        crawl: &Crawl,
        counts: &IssueCount,
        issues: &[Issue],
    ) -> AuditReport {
        let mut grouped: BTreeMap<ErrorType, Vec<String>> = BTreeMap::new();
        for issue in issues {
            grouped
                .entry(issue.error_type)
                .or_default()
                .push(issue.url.clone());
        }
        for urls in grouped.values_mut() {
            urls.sort();
            urls.dedup();
        }

        AuditReport {
            start_url: start_url.to_string(),
            crawl: crawl.clone(),
            counts: counts.clone(),
            issues: grouped,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn print_text_report(report: &AuditReport) {
        println!("\n{}", "=".repeat(80).bright_blue());
        println!("{}", "Auditly - SEO Audit Report".bright_cyan().bold());
        println!("{}", "=".repeat(80).bright_blue());
        println!();

        println!("{}: {}", "Start URL".bright_white().bold(), report.start_url);
        println!("{}: {}", "Timestamp".bright_white().bold(), report.timestamp);
        if let Some(end) = report.crawl.end {
            let elapsed = end - report.crawl.start;
            println!(
                "{}: {:.1}s",
                "Duration".bright_white().bold(),
                elapsed.num_milliseconds() as f64 / 1000.0
            );
        }
        println!();

        println!("{}", "Summary".bright_yellow().bold().underline());
        println!(
            "  Pages Crawled: {}",
            report.crawl.total_urls.to_string().bright_green()
        );
        println!(
            "  Issues Found:  {}",
            if report.counts.total_issues > 0 {
                report.counts.total_issues.to_string().bright_red()
            } else {
                report.counts.total_issues.to_string().bright_green()
            }
        );
        println!();

        if !report.counts.status_count.is_empty() {
            println!("{}", "Status Codes".bright_yellow().bold().underline());
            for (class, count) in &report.counts.status_count {
                println!("  {:<6} {}", class.label(), count);
            }
            println!();
        }

        if !report.counts.media_count.is_empty() {
            println!("{}", "Media Types".bright_yellow().bold().underline());
            for (media_type, count) in &report.counts.media_count {
                println!("  {:<30} {}", media_type, count);
            }
            println!();
        }

        if !report.issues.is_empty() {
            println!("{}", "Issues".bright_yellow().bold().underline());
            for (error_type, urls) in &report.issues {
                println!();
                let label = if is_critical(*error_type) {
                    "ERROR".bright_red()
                } else {
                    "WARN ".yellow()
                };
                println!(
                    "  [{}] {} ({})",
                    label,
                    error_type.description().bright_white().bold(),
                    urls.len()
                );
                for url in urls {
                    println!("      {}", url);
                }
            }
        }

        println!();
        println!("{}", "=".repeat(80).bright_blue());
    }

    pub fn save_json_report(report: &AuditReport, filename: &str) -> Result<()> {
        let json = serde_json::to_string_pretty(report)?;
        let mut file = File::create(filename)
            .with_context(|| format!("Failed to create report file: {}", filename))?;
        file.write_all(json.as_bytes())?;
        println!("Report saved to: {}", filename.bright_green());
        Ok(())
    }
}

/// Issues caused by the response status rather than the content
fn is_critical(error_type: ErrorType) -> bool {
    matches!(
        error_type,
        ErrorType::Error30x | ErrorType::Error40x | ErrorType::Error50x
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_critical() {
        assert!(is_critical(ErrorType::Error50x));
        assert!(!is_critical(ErrorType::ShortTitle));
    }
}
