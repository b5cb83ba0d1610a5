//! Metrics sinks.
//!
//! Every sink ships CloudWatch Embedded Metric Format documents, one per
//! datum. `AgentSink` streams them to the CloudWatch agent's EMF listener,
//! which is how a scheduled job on an instance gets them turned into custom
//! metrics. `EmfSink` writes them to a writer, for function runtimes whose
//! stdout is collected as a log stream. `LogSink` only logs, for dry runs.

use std::io::{self, Write};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::{debug, info};

use super::types::MetricDatum;

/// Errors from a metrics sink.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("failed to write metric '{name}': {source}")]
    Write {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to connect to EMF agent at {address}: {source}")]
    Connect {
        address: String,
        #[source]
        source: io::Error,
    },

    #[error("Serialization error: {message}")]
    Serialization { message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("sink rejected metric '{name}': {message}")]
    Rejected { name: String, message: String },
}

/// Accepts one datum per call. Success or failure is the whole contract.
#[async_trait]
pub trait MetricsSink: Send + Sync {
    async fn put(&self, datum: &MetricDatum) -> Result<(), SinkError>;
}

/// Build the EMF document for a single datum.
pub fn emf_document(datum: &MetricDatum) -> Value {
    let mut doc = json!({
        "_aws": {
            "Timestamp": datum.timestamp.timestamp_millis(),
            "CloudWatchMetrics": [{
                "Namespace": datum.namespace,
                "Dimensions": [[datum.dimension.name]],
                "Metrics": [{
                    "Name": datum.name,
                    "Unit": datum.unit.as_str(),
                }],
            }],
        },
    });
    if let Some(map) = doc.as_object_mut() {
        map.insert(
            datum.dimension.name.clone(),
            Value::String(datum.dimension.value.clone()),
        );
        map.insert(datum.name.clone(), json!(datum.value));
    }
    doc
}

fn emf_line(datum: &MetricDatum) -> Result<String, SinkError> {
    let mut line =
        serde_json::to_string(&emf_document(datum)).map_err(|e| SinkError::Serialization {
            message: e.to_string(),
        })?;
    line.push('\n');
    Ok(line)
}

/// Streams EMF JSON lines to the CloudWatch agent over TCP.
///
/// The connection is opened on the first datum and reopened once when a
/// write on it fails.
pub struct AgentSink {
    address: String,
    connect_timeout: Duration,
    stream: tokio::sync::Mutex<Option<TcpStream>>,
}

impl AgentSink {
    /// `endpoint` takes the agent's `tcp://host:port` form.
    pub fn new(endpoint: &str) -> Result<Self, SinkError> {
        let address = endpoint
            .trim()
            .strip_prefix("tcp://")
            .map(|a| a.trim_end_matches('/'))
            .filter(|a| !a.is_empty())
            .ok_or_else(|| SinkError::Configuration {
                message: format!("EMF endpoint must be tcp://host:port, got '{endpoint}'"),
            })?;
        Ok(Self {
            address: address.to_string(),
            connect_timeout: Duration::from_secs(2),
            stream: tokio::sync::Mutex::new(None),
        })
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    async fn connect(&self) -> Result<TcpStream, SinkError> {
        let attempt = tokio::time::timeout(self.connect_timeout, TcpStream::connect(self.address.as_str()));
        let source = match attempt.await {
            Ok(Ok(stream)) => {
                debug!(address = %self.address, "Connected to EMF agent");
                return Ok(stream);
            }
            Ok(Err(e)) => e,
            Err(_) => io::Error::new(io::ErrorKind::TimedOut, "connect timed out"),
        };
        Err(SinkError::Connect {
            address: self.address.clone(),
            source,
        })
    }
}

#[async_trait]
impl MetricsSink for AgentSink {
    async fn put(&self, datum: &MetricDatum) -> Result<(), SinkError> {
        let line = emf_line(datum)?;
        let mut guard = self.stream.lock().await;

        if let Some(stream) = guard.as_mut() {
            match stream.write_all(line.as_bytes()).await {
                Ok(()) => return Ok(()),
                Err(e) => debug!(address = %self.address, error = %e, "EMF agent connection dropped, reconnecting"),
            }
        }

        let stream = guard.insert(self.connect().await?);
        stream
            .write_all(line.as_bytes())
            .await
            .map_err(|source| SinkError::Write {
                name: datum.name.clone(),
                source,
            })
    }
}

/// Writes EMF JSON lines to any writer.
pub struct EmfSink<W: Write + Send> {
    writer: Mutex<W>,
}

impl EmfSink<std::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

impl<W: Write + Send> EmfSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    /// Recover the writer, e.g. to inspect a buffer.
    pub fn into_inner(self) -> W {
        match self.writer.into_inner() {
            Ok(w) => w,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[async_trait]
impl<W: Write + Send> MetricsSink for EmfSink<W> {
    async fn put(&self, datum: &MetricDatum) -> Result<(), SinkError> {
        let line = emf_line(datum)?;

        let mut writer = match self.writer.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        writer
            .write_all(line.as_bytes())
            .and_then(|_| writer.flush())
            .map_err(|source| SinkError::Write {
                name: datum.name.clone(),
                source,
            })
    }
}

/// Logs each datum as a structured event and sends nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

#[async_trait]
impl MetricsSink for LogSink {
    async fn put(&self, datum: &MetricDatum) -> Result<(), SinkError> {
        info!(
            namespace = %datum.namespace,
            metric = %datum.name,
            value = datum.value,
            unit = %datum.unit,
            dimension = %datum.dimension,
            "Metric (dry run)"
        );
        Ok(())
    }
}
