//! Error types for the keeper service

use range_types::{ChainError, InvariantError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum KeeperError {
    #[error("Chain error: {0}")]
    Chain(#[from] ChainError),

    #[error("Invariant violated: {0}")]
    Invariant(#[from] InvariantError),

    #[error("Unusable price {price}")]
    InvalidPrice { price: f64 },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Position monitor is already running")]
    MonitorAlreadyRunning,

    #[error("Position monitor is not running")]
    MonitorNotRunning,
}

impl KeeperError {
    /// Create an invalid parameter error
    pub fn invalid_parameter(parameter: &str, value: &str, expected: &str) -> Self {
        KeeperError::InvalidConfig(format!(
            "'{}' got '{}', expected {}",
            parameter, value, expected
        ))
    }

    /// Operator-facing classification of a failure
    pub fn category(&self) -> &'static str {
        match self {
            KeeperError::Chain(ChainError::LiquidityTooSmall { .. }) => "liquidity_too_small",
            KeeperError::Chain(ChainError::InsufficientBalance { .. }) => "insufficient_balance",
            KeeperError::Chain(err) if err.is_ambiguous() => "confirmation_unknown",
            KeeperError::Chain(err) if err.is_retryable() => "transient",
            KeeperError::Chain(_) => "chain_rejected",
            KeeperError::Invariant(_) | KeeperError::InvalidPrice { .. } => "invariant",
            KeeperError::InvalidConfig(_) => "config",
            KeeperError::Persistence(_) | KeeperError::Serialization(_) => "persistence",
            KeeperError::MonitorAlreadyRunning | KeeperError::MonitorNotRunning => "monitor",
        }
    }
}

impl From<std::io::Error> for KeeperError {
    fn from(err: std::io::Error) -> Self {
        KeeperError::Persistence(err.to_string())
    }
}

impl From<serde_json::Error> for KeeperError {
    fn from(err: serde_json::Error) -> Self {
        KeeperError::Serialization(err.to_string())
    }
}

impl From<config::ConfigError> for KeeperError {
    fn from(err: config::ConfigError) -> Self {
        KeeperError::InvalidConfig(err.to_string())
    }
}

/// Result type alias for keeper operations
pub type KeeperResult<T> = Result<T, KeeperError>;
