//! Parse Logs Job
//!
//! Decodes a log subscription delivery read from stdin (or a file) and
//! prints each record as pretty JSON, in delivery order. Control messages
//! (the service's health checks) are logged and print nothing.

use std::io::{self, Write};
use std::path::PathBuf;
use std::process;

use anyhow::Result;
use clap::Parser;
use opswatch::logging::truncate_field;
use opswatch::logs::{decode, parse_event};
use opswatch_jobs::{read_input, write_json, LogArgs};
use tracing::{debug, error, info};

#[derive(Debug, Parser)]
#[command(
    name = "parse-logs",
    version,
    about = "Decode a log subscription delivery",
    long_about = "Decode a log subscription delivery (base64, gzip, JSON) and print each \
record in delivery order.\n\nControl messages sent by the log service to check the \
subscription are not printed; they are reported on stderr and the job exits 0."
)]
struct Cli {
    #[command(flatten)]
    log: LogArgs,

    /// Delivery event JSON file; stdin when omitted or `-`
    input: Option<PathBuf>,

    /// One record per line instead of pretty JSON
    #[arg(long)]
    compact: bool,
}

fn run(cli: &Cli) -> Result<usize> {
    let log_config = cli.log.log_config();
    let event = parse_event(&read_input(cli.input.as_deref())?)?;
    let batch = decode(&event)?;

    if batch.is_control_message() {
        info!(
            owner = batch.owner.as_deref().unwrap_or("-"),
            "Control message received, nothing to print"
        );
        return Ok(0);
    }

    let stdout = io::stdout();
    let mut out = stdout.lock();
    for record in &batch.log_events {
        if log_config.log_records {
            debug!(
                id = record.id().unwrap_or("-"),
                message = %truncate_field(record.message().unwrap_or_default(), log_config.max_field_length),
                "Record"
            );
        }
        if cli.compact {
            serde_json::to_writer(&mut out, record)?;
            writeln!(out)?;
        } else {
            write_json(&mut out, record)?;
        }
    }
    out.flush()?;

    info!(
        records = batch.len(),
        log_group = batch.log_group.as_deref().unwrap_or("-"),
        "Delivery decoded"
    );
    Ok(batch.len())
}

fn main() {
    let cli = Cli::parse();
    if let Err(e) = cli.log.init() {
        eprintln!("{e:#}");
    }

    if let Err(e) = run(&cli) {
        error!(error = %format!("{e:#}"), "Failed to decode delivery");
        process::exit(1);
    }
}
