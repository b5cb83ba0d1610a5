//! Host Metrics Job
//!
//! Samples the host census and publishes it as EMF documents to the
//! CloudWatch agent, once under the instance dimension and once under the
//! autoscaling group.

use std::process;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use opswatch::config::{CollectorConfig, MetadataConfig};
use opswatch::host::metadata::{
    GroupResolver, ImdsClient, InstanceIdentity, InstanceMetadata, StaticMetadata,
};
use opswatch::host::sink::{AgentSink, EmfSink, LogSink, MetricsSink};
use opswatch::host::HostCollector;
use opswatch_jobs::{write_json, LogArgs};
use tracing::error;

#[derive(Debug, Parser)]
#[command(name = "host-metrics", version, about = "Publish host metrics")]
struct Cli {
    #[command(flatten)]
    log: LogArgs,

    /// Log each metric instead of publishing it
    #[arg(long, conflicts_with = "stdout")]
    dry_run: bool,

    /// Write EMF to stdout instead of the agent, for function runtimes
    #[arg(long)]
    stdout: bool,

    /// CloudWatch agent EMF listener, tcp://host:port
    #[arg(long, value_name = "URL")]
    emf_endpoint: Option<String>,

    /// Metric namespace
    #[arg(long, env = "OPSWATCH_NAMESPACE")]
    namespace: Option<String>,

    /// Skip the metadata service and use this instance id
    #[arg(long, requires = "availability_zone")]
    instance_id: Option<String>,

    /// Availability zone to pair with --instance-id
    #[arg(long, requires = "instance_id")]
    availability_zone: Option<String>,

    /// Autoscaling group to pair with --instance-id
    #[arg(long, requires = "instance_id")]
    group: Option<String>,

    /// Include virtual filesystems in the partition scan
    #[arg(long)]
    all_partitions: bool,

    /// Print a JSON run summary to stderr when done
    #[arg(long)]
    summary: bool,
}

type Metadata = (Arc<dyn InstanceMetadata>, Arc<dyn GroupResolver>);

fn metadata_from(cli: &Cli) -> Result<Metadata> {
    if let (Some(id), Some(az)) = (&cli.instance_id, &cli.availability_zone) {
        let fixed = Arc::new(StaticMetadata::new(
            InstanceIdentity::new(id.as_str(), az.as_str()),
            cli.group.clone(),
        ));
        return Ok((fixed.clone(), fixed));
    }
    let imds = Arc::new(ImdsClient::new(MetadataConfig::from_env()?)?);
    Ok((imds.clone(), imds))
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = CollectorConfig::from_env()?;
    if let Some(namespace) = &cli.namespace {
        config = config.with_namespace(namespace.as_str());
    }
    if cli.all_partitions {
        config = config.with_all_partitions(true);
    }
    if let Some(endpoint) = &cli.emf_endpoint {
        config = config.with_emf_endpoint(endpoint.as_str());
    }

    let (metadata, groups) = metadata_from(&cli)?;
    let sink: Arc<dyn MetricsSink> = if cli.dry_run {
        Arc::new(LogSink)
    } else if cli.stdout {
        Arc::new(EmfSink::stdout())
    } else {
        Arc::new(AgentSink::new(config.emf_endpoint())?)
    };

    let summary = HostCollector::new(config, metadata, groups, sink)
        .with_log_config(cli.log.log_config())
        .run()
        .await?;

    if cli.summary {
        write_json(&mut std::io::stderr(), &summary)?;
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(e) = cli.log.init() {
        eprintln!("{e:#}");
    }

    if let Err(e) = run(cli).await {
        error!(error = %format!("{e:#}"), "Host metrics run failed");
        process::exit(1);
    }
}
