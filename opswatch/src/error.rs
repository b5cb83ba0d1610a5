//! Error types for opswatch.
//!
//! Each job keeps its own error enum next to the code that produces it
//! (`ProbeError`, `MetadataError`, `SinkError`, `DecodeError`, `ListError`,
//! `NotifyError`). Probe, sink, listing and notification failures are
//! reported per item and never abort a run. `OpsError` carries the failures
//! that do: metadata, decoding, configuration and I/O.

use thiserror::Error;

use crate::host::metadata::MetadataError;
use crate::logs::DecodeError;

/// The main error type for opswatch.
#[derive(Error, Debug)]
pub enum OpsError {
    /// The instance metadata provider or group query failed.
    #[error("Metadata error: {0}")]
    Metadata(#[from] MetadataError),

    /// A log delivery event could not be decoded.
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Error from I/O operations.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Error related to configuration.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Error from serialization/deserialization operations.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic internal error for unexpected conditions.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A type alias for `Result<T, OpsError>`.
pub type Result<T> = std::result::Result<T, OpsError>;

impl OpsError {
    /// Creates a new configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }
}

impl From<serde_json::Error> for OpsError {
    fn from(err: serde_json::Error) -> Self {
        OpsError::Serialization(err.to_string())
    }
}

/// Extension trait for adding context to errors.
pub trait ErrorContext<T> {
    /// Adds context to an error.
    fn context(self, msg: &str) -> Result<T>;

    /// Adds context with a lazy message.
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T, E> ErrorContext<T> for std::result::Result<T, E>
where
    E: Into<OpsError>,
{
    fn context(self, msg: &str) -> Result<T> {
        self.map_err(|e| match e.into() {
            OpsError::Internal(inner) => OpsError::Internal(format!("{msg}: {inner}")),
            other => OpsError::Internal(format!("{msg}: {other}")),
        })
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| {
            let msg = f();
            match e.into() {
                OpsError::Internal(inner) => OpsError::Internal(format!("{msg}: {inner}")),
                other => OpsError::Internal(format!("{msg}: {other}")),
            }
        })
    }
}
