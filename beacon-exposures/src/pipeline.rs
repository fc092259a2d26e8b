//! Wiring of worker and reporter from one config.

use std::sync::Arc;

use crate::config::ExposureConfig;
use crate::error::Result;
use crate::reporter::ExposureReporter;
use crate::transport::{ExposureTransport, HttpTransport};
use crate::worker::{ExposureWorker, WorkerStats};

/// A reporter and the worker it feeds.
#[derive(Debug)]
pub struct ExposurePipeline {
    config: ExposureConfig,
    worker: Arc<ExposureWorker>,
    reporter: ExposureReporter,
}

impl ExposurePipeline {
    /// Build a pipeline delivering through `transport`.
    pub fn new(config: ExposureConfig, transport: Arc<dyn ExposureTransport>) -> Result<Self> {
        config.validate()?;

        let worker = Arc::new(ExposureWorker::new(&config, transport));
        let reporter = ExposureReporter::new(Arc::clone(&worker), config.dedup_cache_capacity);

        Ok(Self {
            config,
            worker,
            reporter,
        })
    }

    /// Build a pipeline delivering to the configured collector over HTTP.
    pub fn with_http(config: ExposureConfig) -> Result<Self> {
        config.validate()?;
        let transport = HttpTransport::new(&config.collector)?;
        Self::new(config, Arc::new(transport))
    }

    #[must_use]
    pub fn reporter(&self) -> &ExposureReporter {
        &self.reporter
    }

    #[must_use]
    pub fn worker(&self) -> &Arc<ExposureWorker> {
        &self.worker
    }

    #[must_use]
    pub fn config(&self) -> &ExposureConfig {
        &self.config
    }

    /// Stop the worker with the configured shutdown timeout and return final stats.
    pub fn shutdown(&self) -> WorkerStats {
        self.worker.stop(false, self.config.shutdown_timeout);
        self.worker.stats()
    }
}
