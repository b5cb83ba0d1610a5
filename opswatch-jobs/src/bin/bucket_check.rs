//! Bucket Check Job
//!
//! Verifies that every configured bucket received objects today and sends
//! a notification for each one that did not.

use std::process;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use opswatch::config::FreshnessConfig;
use opswatch::freshness::{FreshnessChecker, ObjectStoreLister};
use opswatch::notify::{FanoutNotifier, LogNotifier, Notifier, Severity, WebhookConfig, WebhookNotifier};
use opswatch_jobs::{write_json, LogArgs};
use tracing::{error, info};

#[derive(Debug, Parser)]
#[command(name = "bucket-check", version, about = "Check buckets for today's objects")]
struct Cli {
    #[command(flatten)]
    log: LogArgs,

    /// Bucket to check; repeat for several. Overrides OPSWATCH_BUCKETS.
    #[arg(long = "bucket", value_name = "NAME")]
    buckets: Vec<String>,

    /// Key prefix to look for instead of today's UTC date
    #[arg(long)]
    prefix: Option<String>,

    /// Keys requested per bucket
    #[arg(long)]
    max_keys: Option<usize>,

    /// Post notifications to this webhook as well as the log.
    /// Overrides OPSWATCH_WEBHOOK_URL; the other OPSWATCH_WEBHOOK_* variables
    /// still apply.
    #[arg(long)]
    webhook_url: Option<String>,

    /// HMAC secret for signing webhook payloads. Overrides OPSWATCH_WEBHOOK_SECRET.
    #[arg(long)]
    webhook_secret: Option<String>,

    /// Lowest severity delivered to the webhook. Overrides OPSWATCH_WEBHOOK_MIN_SEVERITY.
    #[arg(long)]
    webhook_min_severity: Option<Severity>,

    /// Print the scan results as JSON on stdout
    #[arg(long)]
    report: bool,

    /// Exit with status 2 when any bucket is not fresh
    #[arg(long)]
    fail_on_stale: bool,
}

/// `OPSWATCH_WEBHOOK_*` settings with CLI flags layered on top.
fn webhook_config(cli: &Cli) -> Result<Option<WebhookConfig>> {
    let from_env = WebhookConfig::from_env()?;
    let flag_url = cli.webhook_url.as_deref().map(str::trim).filter(|u| !u.is_empty());
    let mut config = match (from_env, flag_url) {
        (Some(config), Some(url)) => config.with_url(url),
        (None, Some(url)) => WebhookConfig::new(url),
        (Some(config), None) => config,
        (None, None) => return Ok(None),
    };

    config = config.with_source("bucket-check");
    if let Some(secret) = cli.webhook_secret.as_deref().filter(|s| !s.is_empty()) {
        config = config.with_secret(secret);
    }
    if let Some(severity) = cli.webhook_min_severity {
        config = config.with_min_severity(severity);
    }
    Ok(Some(config))
}

fn notifier_from(cli: &Cli) -> Result<Arc<dyn Notifier>> {
    let mut fanout = FanoutNotifier::new().with(LogNotifier);
    if let Some(config) = webhook_config(cli)? {
        fanout = fanout.with(WebhookNotifier::new(config)?);
    }
    Ok(Arc::new(fanout))
}

async fn run(cli: &Cli) -> Result<bool> {
    let mut config = FreshnessConfig::from_env()?;
    if !cli.buckets.is_empty() {
        config = config.with_buckets(cli.buckets.iter().cloned());
    }
    if let Some(max_keys) = cli.max_keys {
        config = config.with_max_keys(max_keys);
    }
    config.validate()?;

    let mut checker = FreshnessChecker::new(
        Arc::new(ObjectStoreLister::s3(&config)),
        notifier_from(cli)?,
    )
    .with_max_keys(config.max_keys());
    if let Some(prefix) = &cli.prefix {
        checker = checker.with_prefix(prefix.as_str());
    }

    let report = checker.run(config.buckets()).await;
    info!(
        prefix = %report.prefix,
        notifications_sent = report.notifications_sent,
        notifications_failed = report.notifications_failed,
        "Bucket check complete"
    );

    if cli.report {
        write_json(&mut std::io::stdout(), &report)?;
    }
    Ok(report.all_fresh())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(e) = cli.log.init() {
        eprintln!("{e:#}");
    }

    match run(&cli).await {
        Ok(all_fresh) if !all_fresh && cli.fail_on_stale => process::exit(2),
        Ok(_) => {}
        Err(e) => {
            error!(error = %format!("{e:#}"), "Bucket check failed");
            process::exit(1);
        }
    }
}
