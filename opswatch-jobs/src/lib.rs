//! opswatch jobs - command-line entry points for the opswatch library
//!
//! Shared plumbing for the `host-metrics`, `parse-logs` and `bucket-check`
//! binaries: logging flags, input reading and JSON output.

use anyhow::{anyhow, Context, Result};
use clap::Args;
use serde::Serialize;
use std::fs;
use std::io::{self, Read, Write};
use std::path::Path;

use opswatch::logging::setup::{init_logging, LoggingConfig};
use opswatch::logging::LogConfig;

/// Logging flags common to every job.
#[derive(Debug, Clone, Default, Args)]
pub struct LogArgs {
    /// Debug-level logs for opswatch components
    #[arg(short, long, env = "OPSWATCH_VERBOSE")]
    pub verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, env = "OPSWATCH_LOG_JSON")]
    pub json: bool,
}

impl LogArgs {
    pub fn logging_config(&self) -> LoggingConfig {
        let base = if self.verbose {
            LoggingConfig::development()
        } else {
            LoggingConfig::default()
        };
        base.with_json_format(self.json).with_stderr(true)
    }

    pub fn log_config(&self) -> LogConfig {
        if self.verbose {
            LogConfig::verbose()
        } else {
            LogConfig::default()
        }
    }

    /// Install the global subscriber. Logs always go to stderr.
    pub fn init(&self) -> Result<()> {
        init_logging(self.logging_config())
            .map_err(|e| anyhow!("failed to initialise logging: {e}"))
    }
}

/// Read all of `path`, or stdin when no path (or `-`) is given.
pub fn read_input(path: Option<&Path>) -> Result<String> {
    match path {
        Some(p) if p != Path::new("-") => {
            fs::read_to_string(p).with_context(|| format!("failed to read {}", p.display()))
        }
        _ => {
            let mut buffer = String::new();
            io::stdin()
                .read_to_string(&mut buffer)
                .context("failed to read stdin")?;
            Ok(buffer)
        }
    }
}

/// Write `value` as pretty JSON followed by a newline.
pub fn write_json<W: Write, T: Serialize>(out: &mut W, value: &T) -> Result<()> {
    serde_json::to_writer_pretty(&mut *out, value)?;
    writeln!(out)?;
    Ok(())
}
