//! Hot-path entry point for exposure reporting.

use std::sync::Arc;

use tracing::debug;

use crate::dedup::ExposureDeduplicator;
use crate::error::Result;
use crate::event::{self, EvaluationContext, EvaluationResult, ExposureEvent};
use crate::worker::ExposureWorker;

/// Builds, deduplicates, and enqueues exposures. Never fails the caller.
#[derive(Debug)]
pub struct ExposureReporter {
    deduplicator: ExposureDeduplicator,
    worker: Arc<ExposureWorker>,
}

impl ExposureReporter {
    #[must_use]
    pub fn new(worker: Arc<ExposureWorker>, dedup_cache_capacity: usize) -> Self {
        Self {
            deduplicator: ExposureDeduplicator::new(dedup_cache_capacity),
            worker,
        }
    }

    /// Report one evaluation. Returns `true` if an event was enqueued.
    ///
    /// Returns `false` when the result opts out of logging, when the same
    /// (flag, subject) was last reported with the same allocation and variant,
    /// or when the inputs are malformed. Errors are logged at debug level.
    pub fn report(
        &self,
        result: &EvaluationResult,
        flag_key: &str,
        context: &EvaluationContext,
    ) -> bool {
        match self.try_report(result, flag_key, context) {
            Ok(enqueued) => enqueued,
            Err(e) => {
                debug!(flag = flag_key, error = %e, "Failed to report exposure");
                false
            }
        }
    }

    fn try_report(
        &self,
        result: &EvaluationResult,
        flag_key: &str,
        context: &EvaluationContext,
    ) -> Result<bool> {
        if !result.do_log {
            return Ok(false);
        }

        let exposure = ExposureEvent::build(result, flag_key, context)?;
        let key = event::cache_key(result, flag_key, context)?;
        let value = event::cache_value(result, flag_key, context)?;

        if self.deduplicator.is_duplicate(&key, &value) {
            return Ok(false);
        }

        Ok(self.worker.enqueue(exposure))
    }

    #[must_use]
    pub fn worker(&self) -> &Arc<ExposureWorker> {
        &self.worker
    }
}
