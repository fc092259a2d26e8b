//! Observability infrastructure for beacon.
//!
//! This crate provides the logging bootstrap shared by beacon binaries:
//! - `tracing-subscriber` installation with env-filter support
//! - Pretty or JSON output

pub mod logging;

pub use logging::{LogFormat, LoggingConfig, LoggingError, build_filter, init_logging};
