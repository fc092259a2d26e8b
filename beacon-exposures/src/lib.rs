//! Exposure telemetry pipeline for feature-flag evaluations.
//!
//! Every evaluation that should be reported goes through
//! [`ExposureReporter::report`], which builds an [`ExposureEvent`], drops it if
//! the same subject already saw the same variant recently, and hands it to an
//! [`ExposureWorker`]. The worker buffers events in a bounded, lossy queue and
//! ships them in batches from a background thread. Nothing in the pipeline
//! returns an error to the evaluation call site.
//!
//! # Key Types
//!
//! - [`ExposureReporter`] - Hot-path entry point
//! - [`ExposureDeduplicator`] - Value-aware LRU dedup cache
//! - [`ExposureBuffer`] - Bounded buffer that overwrites the oldest entry
//! - [`BatchBuilder`] - Wraps events with deployment context
//! - [`ExposureWorker`] - Background flushing and shutdown
//! - [`ExposureTransport`] - Delivery seam, with [`HttpTransport`] and [`MemoryTransport`]
//! - [`ExposurePipeline`] - Wires all of the above from an [`ExposureConfig`]

pub mod batch;
pub mod buffer;
pub mod config;
pub mod dedup;
pub mod error;
pub mod event;
pub mod pipeline;
pub mod reporter;
pub mod transport;
pub mod worker;

// Re-exports
pub use batch::{BatchBuilder, BatchContext, ExposureBatch};
pub use buffer::{Drained, ExposureBuffer};
pub use config::{CollectorConfig, DeliverySettings, ExposureConfig, SettingsField, parse_tags};
pub use dedup::ExposureDeduplicator;
pub use error::{ConfigError, ExposureError, Result, TransportError};
pub use event::{AttributeValue, EvaluationContext, EvaluationResult, ExposureEvent};
pub use pipeline::ExposurePipeline;
pub use reporter::ExposureReporter;
pub use transport::{
    ExposureTransport, HttpTransport, MemoryTransport, SendBehavior, TransportResponse,
};
pub use worker::{ExposureWorker, WorkerState, WorkerStats};
