//! Error types for contentreq.

use thiserror::Error;

/// Main error type for work-tracker operations.
#[derive(Error, Debug)]
pub enum Error {
    /// HTTP request failed before a response arrived
    #[error("HTTP error: {0}")]
    Http(String),

    /// Credential rejected (401)
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Credential lacks permission (403)
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Entity does not exist (404)
    #[error("Not found: {0}")]
    NotFound(String),

    /// API returned a client-side error
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    /// API returned a 5xx
    #[error("Server error: {status} - {message}")]
    ServerError { status: u16, message: String },

    /// Response could not be interpreted
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// Serialization/deserialization failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic error
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Classify a non-success HTTP status.
    pub fn from_status(status: u16, message: String) -> Self {
        match status {
            401 => Error::Unauthorized(message),
            403 => Error::Forbidden(message),
            404 => Error::NotFound(message),
            500..=599 => Error::ServerError { status, message },
            _ => Error::Api { status, message },
        }
    }

    /// Whether this error means the remote system could not serve the call.
    ///
    /// These are the failures the tool handlers answer with fallback data.
    /// Configuration errors are local and never recovered that way.
    pub fn is_remote_failure(&self) -> bool {
        !matches!(self, Error::Config(_))
    }
}

/// Result type alias for contentreq operations.
pub type Result<T> = std::result::Result<T, Error>;
