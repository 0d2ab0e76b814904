//! Error types for metric construction.

/// Error type for tracer and collector construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Invalid configuration, such as malformed histogram buckets.
    InvalidConfig(String),
}

impl std::error::Error for Error {}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::InvalidConfig(msg) => write!(f, "Invalid configuration: {}", msg),
        }
    }
}

/// Result type alias for metric construction.
pub type Result<T> = std::result::Result<T, Error>;
