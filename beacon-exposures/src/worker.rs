//! Background flushing of buffered exposures.
//!
//! The worker owns the buffer and the batch builder. A dedicated thread wakes
//! every `flush_interval` to drain the buffer and send a batch. A producer
//! that pushes the buffer to `flush_threshold` wakes that thread early rather
//! than sending itself, so producers never do network I/O. Every send goes
//! through one flush lock, so at most one is in flight.
//!
//! Delivery failures are logged at debug level and the batch is dropped.
//! Nothing here returns an error to the caller.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, info, trace};

use crate::batch::BatchBuilder;
use crate::buffer::ExposureBuffer;
use crate::config::ExposureConfig;
use crate::error::TransportError;
use crate::event::ExposureEvent;
use crate::transport::ExposureTransport;

/// Name given to the background flush thread.
const THREAD_NAME: &str = "beacon-exposures";

/// How often `stop` checks whether the loop thread has exited.
const JOIN_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Lifecycle state of an [`ExposureWorker`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Constructed, loop not started.
    Idle,
    /// Background loop active.
    Running,
    /// `stop` was called. Terminal.
    Stopped,
}

impl std::fmt::Display for WorkerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Running => write!(f, "running"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// Snapshot of the worker's delivery counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    /// Batches handed to the transport.
    pub flushes: u64,
    /// Exposures in batches the collector accepted.
    pub events_sent: u64,
    /// Exposures overwritten in the buffer before they could be sent.
    pub events_dropped: u64,
    /// Batches rejected by the collector or lost to a transport error.
    pub send_failures: u64,
}

#[derive(Debug, Default)]
struct Counters {
    flushes: AtomicU64,
    events_sent: AtomicU64,
    events_dropped: AtomicU64,
    send_failures: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> WorkerStats {
        WorkerStats {
            flushes: self.flushes.load(Ordering::Relaxed),
            events_sent: self.events_sent.load(Ordering::Relaxed),
            events_dropped: self.events_dropped.load(Ordering::Relaxed),
            send_failures: self.send_failures.load(Ordering::Relaxed),
        }
    }
}

/// State shared between the worker handle and its loop thread.
struct Shared {
    enabled: bool,
    flush_interval: Duration,
    flush_threshold: usize,
    buffer: ExposureBuffer<ExposureEvent>,
    batch_builder: BatchBuilder,
    transport: Arc<dyn ExposureTransport>,
    flush_lock: Mutex<()>,
    counters: Counters,
}

impl Shared {
    /// Drain and send. Caller must hold `flush_lock`.
    fn perform(&self) -> usize {
        let drained = self.buffer.drain();

        if drained.dropped > 0 {
            self.counters
                .events_dropped
                .fetch_add(drained.dropped, Ordering::Relaxed);
            debug!(
                dropped = drained.dropped,
                "Exposure buffer full, oldest events were dropped"
            );
        }

        if drained.is_empty() {
            return 0;
        }

        let count = drained.items.len();
        self.send_events(drained.items);
        count
    }

    fn send_events(&self, events: Vec<ExposureEvent>) {
        let count = events.len() as u64;
        let batch = self.batch_builder.payload_for(events);

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            self.transport.send_exposures(&batch)
        }))
        .unwrap_or(Err(TransportError::Panicked));

        self.counters.flushes.fetch_add(1, Ordering::Relaxed);

        match outcome {
            Ok(response) if response.is_ok() => {
                self.counters.events_sent.fetch_add(count, Ordering::Relaxed);
                trace!(exposures = count, status = response.status(), "Exposure batch sent");
            }
            Ok(response) => {
                self.counters.send_failures.fetch_add(1, Ordering::Relaxed);
                debug!(
                    exposures = count,
                    status = response.status(),
                    "Collector rejected exposure batch"
                );
            }
            Err(e) => {
                self.counters.send_failures.fetch_add(1, Ordering::Relaxed);
                debug!(exposures = count, error = %e, "Failed to send exposure batch");
            }
        }
    }
}

#[derive(Debug, Default)]
struct LoopSignals {
    stop: bool,
    flush: bool,
}

/// Stop and flush-now flags for one run of the loop thread.
#[derive(Default)]
struct LoopControl {
    signals: Mutex<LoopSignals>,
    wakeup: Condvar,
}

impl LoopControl {
    fn request_stop(&self) {
        self.signals.lock().stop = true;
        self.wakeup.notify_all();
    }

    fn request_flush(&self) {
        self.signals.lock().flush = true;
        self.wakeup.notify_all();
    }

    /// Sleep for `interval`, until a flush is requested, or until stopped.
    /// Returns `true` if stopped.
    fn wait(&self, interval: Duration) -> bool {
        let deadline = Instant::now() + interval;
        let mut signals = self.signals.lock();
        while !signals.stop && !signals.flush {
            if self.wakeup.wait_until(&mut signals, deadline).timed_out() {
                break;
            }
        }
        signals.flush = false;
        signals.stop
    }
}

struct RunningLoop {
    handle: JoinHandle<()>,
    control: Arc<LoopControl>,
}

struct Lifecycle {
    state: WorkerState,
    running_loop: Option<RunningLoop>,
}

fn run_loop(shared: Arc<Shared>, control: Arc<LoopControl>) {
    while !control.wait(shared.flush_interval) {
        let _flushing = shared.flush_lock.lock();
        shared.perform();
    }
    trace!("Exposure flush loop exited");
}

/// Owns the exposure buffer and flushes it in the background.
pub struct ExposureWorker {
    shared: Arc<Shared>,
    running: AtomicBool,
    lifecycle: Mutex<Lifecycle>,
}

impl ExposureWorker {
    /// Create an idle worker. The loop starts on `start` or the first `enqueue`.
    #[must_use]
    pub fn new(config: &ExposureConfig, transport: Arc<dyn ExposureTransport>) -> Self {
        let shared = Shared {
            enabled: config.enabled,
            flush_interval: config.flush_interval,
            flush_threshold: config.flush_threshold,
            buffer: ExposureBuffer::new(config.buffer_capacity),
            batch_builder: BatchBuilder::new(&config.settings),
            transport,
            flush_lock: Mutex::new(()),
            counters: Counters::default(),
        };

        Self {
            shared: Arc::new(shared),
            running: AtomicBool::new(false),
            lifecycle: Mutex::new(Lifecycle {
                state: WorkerState::Idle,
                running_loop: None,
            }),
        }
    }

    /// Buffer an event for the next flush. Always returns `true`.
    ///
    /// The loop is started if it is not running. Reaching the flush threshold
    /// wakes the loop for an immediate flush; the send never happens on the
    /// calling thread.
    pub fn enqueue(&self, event: ExposureEvent) -> bool {
        self.shared.buffer.push(event);

        if !self.shared.enabled {
            return true;
        }

        if !self.is_running() {
            self.start();
        }

        if self.shared.buffer.len() >= self.shared.flush_threshold
            && let Some(running_loop) = self.lifecycle.lock().running_loop.as_ref()
        {
            running_loop.control.request_flush();
        }

        true
    }

    /// Start the background loop. Returns `true` if a loop was spawned.
    ///
    /// No-op when disabled, already running, or stopped.
    pub fn start(&self) -> bool {
        if !self.shared.enabled {
            return false;
        }

        let mut lifecycle = self.lifecycle.lock();
        if lifecycle.state != WorkerState::Idle {
            return false;
        }

        let control = Arc::new(LoopControl::default());
        let spawned = thread::Builder::new().name(THREAD_NAME.to_string()).spawn({
            let shared = Arc::clone(&self.shared);
            let control = Arc::clone(&control);
            move || run_loop(shared, control)
        });

        match spawned {
            Ok(handle) => {
                lifecycle.running_loop = Some(RunningLoop { handle, control });
                lifecycle.state = WorkerState::Running;
                self.running.store(true, Ordering::Release);
                info!(
                    interval = ?self.shared.flush_interval,
                    "Exposure worker started"
                );
                true
            }
            Err(e) => {
                debug!(error = %e, "Failed to spawn exposure worker thread");
                false
            }
        }
    }

    /// Stop the loop and flush whatever is buffered, within `timeout`.
    ///
    /// Without `force`, waits up to `timeout` for the loop thread to exit.
    /// With `force`, the thread is detached immediately; it exits at its next
    /// wakeup. The final flush is skipped only if an in-flight flush still
    /// holds the lock when `timeout` runs out. Returns `true` if the loop
    /// thread was joined (or never ran).
    pub fn stop(&self, force: bool, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;

        let running_loop = {
            let mut lifecycle = self.lifecycle.lock();
            lifecycle.state = WorkerState::Stopped;
            self.running.store(false, Ordering::Release);
            lifecycle.running_loop.take()
        };

        let joined = match running_loop {
            Some(RunningLoop { handle, control }) => {
                control.request_stop();
                if force {
                    handle.is_finished()
                } else {
                    join_until(handle, deadline)
                }
            }
            None => true,
        };

        match self.shared.flush_lock.try_lock_until(deadline) {
            Some(_flushing) => {
                let flushed = self.shared.perform();
                info!(flushed, "Exposure worker stopped");
            }
            None => {
                debug!("Exposure worker stopped without final flush, send still in flight");
            }
        }

        joined
    }

    /// Drain and send now, on the calling thread. Returns the number of events sent.
    pub fn flush(&self) -> usize {
        let _flushing = self.shared.flush_lock.lock();
        self.shared.perform()
    }

    /// Reset after `fork` in the child process.
    ///
    /// The parent's loop thread does not exist in the child, so its handle is
    /// forgotten rather than joined. Events inherited from the parent are
    /// discarded (the parent still owns them), and the loop is restarted if
    /// the worker was not stopped.
    pub fn after_fork(&self) {
        let restart = {
            let mut lifecycle = self.lifecycle.lock();
            if let Some(stale) = lifecycle.running_loop.take() {
                std::mem::forget(stale);
            }
            self.running.store(false, Ordering::Release);
            if lifecycle.state == WorkerState::Running {
                lifecycle.state = WorkerState::Idle;
            }
            lifecycle.state == WorkerState::Idle
        };

        let inherited = self.shared.buffer.drain();
        if !inherited.is_empty() {
            debug!(
                discarded = inherited.items.len(),
                "Discarded exposures inherited across fork"
            );
        }

        if restart {
            self.start();
        }
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.shared.enabled
    }

    pub fn state(&self) -> WorkerState {
        self.lifecycle.lock().state
    }

    /// Events currently waiting in the buffer.
    pub fn buffered(&self) -> usize {
        self.shared.buffer.len()
    }

    pub fn stats(&self) -> WorkerStats {
        self.shared.counters.snapshot()
    }
}

impl Drop for ExposureWorker {
    fn drop(&mut self) {
        if let Some(running_loop) = self.lifecycle.get_mut().running_loop.take() {
            running_loop.control.request_stop();
        }
    }
}

impl std::fmt::Debug for ExposureWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExposureWorker")
            .field("enabled", &self.shared.enabled)
            .field("running", &self.is_running())
            .field("buffered", &self.buffered())
            .finish()
    }
}

/// Join `handle` if it exits before `deadline`; otherwise detach it.
fn join_until(handle: JoinHandle<()>, deadline: Instant) -> bool {
    while !handle.is_finished() {
        if Instant::now() >= deadline {
            debug!("Exposure flush loop did not exit in time, detaching");
            return false;
        }
        thread::sleep(JOIN_POLL_INTERVAL);
    }

    if handle.join().is_err() {
        debug!("Exposure flush loop panicked");
    }
    true
}
