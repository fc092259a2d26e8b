//! Delivery of exposure batches to the collector.
//!
//! The worker only sees the [`ExposureTransport`] trait. [`HttpTransport`]
//! posts JSON to the local agent; [`MemoryTransport`] records batches and is
//! used by tests and dry runs.

use parking_lot::Mutex;
use reqwest::header::CONTENT_TYPE;
use tracing::trace;

use crate::batch::ExposureBatch;
use crate::config::CollectorConfig;
use crate::error::TransportError;

/// Header naming the intake the agent forwards to.
pub const SUBDOMAIN_HEADER: &str = "X-Datadog-EVP-Subdomain";

/// Outcome of a delivery attempt that reached the collector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportResponse {
    status: u16,
}

impl TransportResponse {
    #[must_use]
    pub fn new(status: u16) -> Self {
        Self { status }
    }

    #[must_use]
    pub fn status(&self) -> u16 {
        self.status
    }

    /// Whether the collector accepted the batch (2xx).
    #[must_use]
    pub fn is_ok(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Sends batches to the collector. Implementations may block.
pub trait ExposureTransport: Send + Sync {
    fn send_exposures(&self, batch: &ExposureBatch) -> Result<TransportResponse, TransportError>;
}

/// JSON-over-HTTP transport to the agent's exposure intake.
///
/// Requests are driven on a private current-thread runtime so callers stay
/// synchronous. Calling from inside an async context is an error, not a panic,
/// and dropping the transport there is safe.
pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: url::Url,
    subdomain: String,
    // Always `Some` until drop.
    runtime: Option<tokio::runtime::Runtime>,
}

impl HttpTransport {
    pub fn new(config: &CollectorConfig) -> Result<Self, TransportError> {
        let endpoint = config
            .endpoint()
            .map_err(|e| TransportError::InvalidUrl(e.to_string()))?;
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;

        Ok(Self {
            client,
            endpoint,
            subdomain: config.subdomain.clone(),
            runtime: Some(runtime),
        })
    }

    #[must_use]
    pub fn endpoint(&self) -> &url::Url {
        &self.endpoint
    }
}

impl ExposureTransport for HttpTransport {
    fn send_exposures(&self, batch: &ExposureBatch) -> Result<TransportResponse, TransportError> {
        if tokio::runtime::Handle::try_current().is_ok() {
            return Err(TransportError::Runtime(std::io::Error::other(
                "HttpTransport cannot block inside an async runtime",
            )));
        }
        let Some(runtime) = self.runtime.as_ref() else {
            return Err(TransportError::Runtime(std::io::Error::other(
                "HttpTransport runtime already shut down",
            )));
        };

        let body = serde_json::to_vec(batch)?;
        let request = self
            .client
            .post(self.endpoint.clone())
            .header(CONTENT_TYPE, "application/json")
            .header(SUBDOMAIN_HEADER, &self.subdomain)
            .body(body);

        let response = runtime.block_on(request.send())?;
        let status = response.status().as_u16();
        trace!(status, exposures = batch.len(), endpoint = %self.endpoint, "Exposure batch posted");

        Ok(TransportResponse::new(status))
    }
}

impl Drop for HttpTransport {
    fn drop(&mut self) {
        // A blocking shutdown panics when dropped on an async thread.
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport")
            .field("endpoint", &self.endpoint.as_str())
            .field("subdomain", &self.subdomain)
            .finish()
    }
}

/// How a [`MemoryTransport`] answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendBehavior {
    /// Record the batch and answer with this status.
    Respond(u16),
    /// Record the batch and return a transport error.
    Fail,
    /// Record the batch and panic.
    Panic,
}

/// In-memory transport that records every batch it is given.
#[derive(Debug)]
pub struct MemoryTransport {
    batches: Mutex<Vec<ExposureBatch>>,
    behavior: Mutex<SendBehavior>,
}

impl MemoryTransport {
    #[must_use]
    pub fn new() -> Self {
        Self {
            batches: Mutex::new(Vec::new()),
            behavior: Mutex::new(SendBehavior::Respond(202)),
        }
    }

    pub fn set_behavior(&self, behavior: SendBehavior) {
        *self.behavior.lock() = behavior;
    }

    /// Number of `send_exposures` calls so far.
    pub fn calls(&self) -> usize {
        self.batches.lock().len()
    }

    pub fn batches(&self) -> Vec<ExposureBatch> {
        self.batches.lock().clone()
    }

    /// Total exposures across all recorded batches.
    pub fn exposure_count(&self) -> usize {
        self.batches.lock().iter().map(ExposureBatch::len).sum()
    }
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl ExposureTransport for MemoryTransport {
    fn send_exposures(&self, batch: &ExposureBatch) -> Result<TransportResponse, TransportError> {
        self.batches.lock().push(batch.clone());

        match *self.behavior.lock() {
            SendBehavior::Respond(status) => Ok(TransportResponse::new(status)),
            SendBehavior::Fail => Err(TransportError::Runtime(std::io::Error::other(
                "simulated transport failure",
            ))),
            SendBehavior::Panic => panic!("simulated transport panic"),
        }
    }
}
