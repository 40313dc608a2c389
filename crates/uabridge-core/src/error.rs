//! Error types shared across uabridge crates.

/// Core error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A value could not be converted to the requested type.
    #[error("Cannot convert {value} to {expected}")]
    TypeMismatch { value: String, expected: String },

    /// A configuration value is invalid.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Serialization failure.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias using the core [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
