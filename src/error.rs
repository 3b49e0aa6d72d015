//! Error types for the analytics engine.

use thiserror::Error;

/// Main error type for the analytics engine.
#[derive(Error, Debug)]
pub enum QuantError {
    #[error("Portfolio is empty")]
    EmptyPortfolio,

    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    #[error("Insufficient data overlap: {0}")]
    InsufficientOverlap(String),

    #[error("Covariance matrix is not positive definite: {0}")]
    NonPositiveDefiniteCovariance(String),

    #[error("Optimization failed: {0}")]
    OptimizationDidNotConverge(String),

    #[error("Data unavailable for {symbol}: {reason}")]
    DataUnavailable { symbol: String, reason: String },

    #[error("Risk Rejection: {0}")]
    InvalidTrade(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    #[error("CSV parsing error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Date parsing error: {0}")]
    DateParseError(#[from] chrono::ParseError),

    #[error("JSON serialization error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),
}

impl QuantError {
    /// Shorthand for a data-unavailable failure.
    pub fn unavailable(symbol: impl Into<String>, reason: impl Into<String>) -> Self {
        QuantError::DataUnavailable {
            symbol: symbol.into(),
            reason: reason.into(),
        }
    }

    /// Whether a collaborator boundary may retry the failed call.
    ///
    /// Only fetch and IO failures qualify.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            QuantError::DataUnavailable { .. } | QuantError::IoError(_) | QuantError::CsvError(_)
        )
    }
}

/// Result type alias for analytics operations.
pub type Result<T> = std::result::Result<T, QuantError>;
