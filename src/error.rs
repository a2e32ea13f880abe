//! Error types for the Riskgate service.
//!
//! Only setup paths (configuration, policy files, store connections) return
//! these. Admission checks never fail; they degrade instead.

use thiserror::Error;

/// Main error type for Riskgate operations.
#[derive(Error, Debug)]
pub enum RiskgateError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Shared store errors
    #[error("Store error: {0}")]
    Store(#[from] redis::RedisError),

    /// A remote round trip exceeded its deadline
    #[error("Store operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// Event encoding/decoding errors
    #[error("Event codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Riskgate operations.
pub type Result<T> = std::result::Result<T, RiskgateError>;
