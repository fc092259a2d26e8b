//! Error types for the exposure pipeline.
//!
//! None of these escape the public reporting surface: [`ExposureReporter::report`]
//! and [`ExposureWorker::enqueue`] log them at debug level and degrade silently.
//!
//! [`ExposureReporter::report`]: crate::reporter::ExposureReporter::report
//! [`ExposureWorker::enqueue`]: crate::worker::ExposureWorker::enqueue

use thiserror::Error;

/// Top-level error type for the exposure pipeline.
#[derive(Error, Debug)]
pub enum ExposureError {
    /// The evaluation result or context lacks a field the event needs.
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Errors raised while delivering a batch to the collector.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("transport I/O failed: {0}")]
    Runtime(#[from] std::io::Error),

    #[error("failed to encode batch: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("invalid collector URL: {0}")]
    InvalidUrl(String),

    /// The transport panicked while sending; the batch was dropped.
    #[error("transport panicked during send")]
    Panicked,
}

/// Errors related to loading or validating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, ExposureError>;
