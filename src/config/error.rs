//! Configuration error types

use thiserror::Error;

/// Errors that can occur during configuration loading
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration loading failed: {0}")]
    LoadError(#[from] config::ConfigError),

    #[error("Validation failed: {0}")]
    ValidationFailed(#[from] ValidationError),
}

/// Errors that can occur during configuration validation
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Required configuration missing: {0}")]
    MissingRequired(&'static str),

    #[error("Invalid port number")]
    InvalidPort,

    #[error("Invalid request timeout")]
    InvalidTimeout,

    #[error("Invalid log format: {0}")]
    InvalidLogFormat(String),

    #[error("Invalid database URL format")]
    InvalidDatabaseUrl,

    #[error("Pool min_connections exceeds max_connections")]
    InvalidPoolSize,

    #[error("Pool size exceeds maximum allowed (100)")]
    PoolSizeTooLarge,

    #[error("JWT secret must be at least 32 bytes")]
    WeakJwtSecret,

    #[error("Invalid URL for {0}")]
    InvalidUrl(&'static str),

    #[error("{0}: min amount exceeds max amount")]
    InvalidAmountRange(&'static str),

    #[error("{0}: unsupported currency {1}")]
    InvalidCurrency(&'static str, String),

    #[error("{0}: invalid IP address {1}")]
    InvalidIpAddress(&'static str, String),

    #[error("Invalid promo tier entry: {0}")]
    InvalidPromoTier(String),

    #[error("Referral percent must be between 0 and 100")]
    InvalidReferralPercent,

    #[error("{0} must be greater than zero")]
    MustBePositive(&'static str),
}
