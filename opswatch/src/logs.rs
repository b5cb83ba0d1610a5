//! Log record decoder.
//!
//! A subscription delivery carries a batch of log records as
//! base64(gzip(JSON)). Decoding is all or nothing: any stage failing yields an
//! error and no records.

use std::io::Read;
use std::path::Path;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use flate2::read::GzDecoder;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, instrument};

use crate::error::{ErrorContext, Result};

/// Message type of the probe deliveries the log service sends to check that
/// a destination is reachable.
pub const CONTROL_MESSAGE: &str = "CONTROL_MESSAGE";

/// Failure at one of the three decoding stages.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("payload is not valid base64: {0}")]
    Encoding(#[from] base64::DecodeError),

    #[error("payload is not a valid gzip stream: {0}")]
    Decompress(#[source] std::io::Error),

    #[error("payload is not a valid log batch: {0}")]
    Parse(#[source] serde_json::Error),
}

/// The event handed to the decoder. Routing metadata next to `awslogs` is
/// ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryEvent {
    pub awslogs: AwsLogs,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AwsLogs {
    pub data: String,
}

impl DeliveryEvent {
    pub fn new(data: impl Into<String>) -> Self {
        Self {
            awslogs: AwsLogs { data: data.into() },
        }
    }
}

/// One log record, kept exactly as delivered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LogRecord(Map<String, Value>);

impl LogRecord {
    pub fn id(&self) -> Option<&str> {
        self.0.get("id").and_then(Value::as_str)
    }

    /// Milliseconds since the epoch.
    pub fn timestamp(&self) -> Option<i64> {
        self.0.get("timestamp").and_then(Value::as_i64)
    }

    pub fn message(&self) -> Option<&str> {
        self.0.get("message").and_then(Value::as_str)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_inner(self) -> Map<String, Value> {
        self.0
    }
}

/// Decompressed payload of a delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogBatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_group: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_stream: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subscription_filters: Vec<String>,
    pub log_events: Vec<LogRecord>,
}

impl LogBatch {
    pub fn is_control_message(&self) -> bool {
        self.message_type.as_deref() == Some(CONTROL_MESSAGE)
    }

    pub fn len(&self) -> usize {
        self.log_events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.log_events.is_empty()
    }
}

/// base64 → gzip → JSON.
#[instrument(skip(event), fields(encoded_len = event.awslogs.data.len()))]
pub fn decode(event: &DeliveryEvent) -> std::result::Result<LogBatch, DecodeError> {
    let compressed = STANDARD.decode(event.awslogs.data.as_bytes())?;

    let mut json = Vec::new();
    GzDecoder::new(compressed.as_slice())
        .read_to_end(&mut json)
        .map_err(DecodeError::Decompress)?;

    let batch: LogBatch = serde_json::from_slice(&json).map_err(DecodeError::Parse)?;
    debug!(
        records = batch.len(),
        log_group = batch.log_group.as_deref().unwrap_or("-"),
        "Decoded log batch"
    );
    Ok(batch)
}

/// The records of a delivery, in their original order.
pub fn decode_records(event: &DeliveryEvent) -> std::result::Result<Vec<LogRecord>, DecodeError> {
    decode(event).map(|batch| batch.log_events)
}

/// Parse a delivery event from its JSON text.
pub fn parse_event(json: &str) -> Result<DeliveryEvent> {
    Ok(serde_json::from_str(json)?)
}

/// Read and parse a delivery event file.
pub fn read_event(path: &Path) -> Result<DeliveryEvent> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read delivery event {}", path.display()))?;
    parse_event(&content)
}
