use thiserror::Error;

/// Errors raised while delivering a notification.
#[derive(Debug, Error)]
pub enum NotifyError {
    /// Network error (connection failed, timeout, etc.).
    #[error("Network error: {message}")]
    Network { message: String },

    /// The receiving endpoint answered with a non-success status.
    #[error("Server error ({status}): {message}")]
    ServerError { status: u16, message: String },

    #[error("Serialization error: {message}")]
    Serialization { message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },
}

impl NotifyError {
    /// Returns true if a later attempt could succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            NotifyError::Network { .. } => true,
            NotifyError::ServerError { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

pub type NotifyResult<T> = std::result::Result<T, NotifyError>;
