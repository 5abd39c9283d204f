//! # Worker Module
//!
//! The worker drains queue items into the adapter. One [`Worker`] core
//! carries the delivery loop (fetch, adapter readiness, attempt, classify)
//! and is scheduled two ways:
//!
//! - inline on the caller's task, draining for a bounded work budget per
//!   emission, or
//! - as a dedicated background task ([`BackgroundWorker`]) that blocks on
//!   the queue with `max_work_time` wake-ups and observes stop/halt/flush
//!   control sentinels at the queue head and tail.
//!
//! Adapter reopens are gated by a per-worker backoff tracker so a dead
//! sink is retried on an escalating schedule rather than per item.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::adapters::BoxedAdapter;
use crate::backoff::{Backoff, Tracker};
use crate::config::Config;
use crate::error::{AdapterError, QueueError, WorkerError};
use crate::queue::{Queue, QueueItem, QueuePayload};

/// Escalating steps for the adapter reopen tracker
const ADAPTER_BACKOFF_ATTEMPTS: u32 = 10;

/// Timing knobs shared by worker and transport
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    /// Per-iteration work budget / background wake interval
    pub max_work_time: Duration,

    /// Upper bound for adapter flush
    pub max_flush_time: Duration,

    /// Upper bound for graceful stop
    pub max_stopping_time: Duration,

    /// The adapter tracker is only cleared on reset once its attempts
    /// exceed this floor, preventing thrash from rapid start/stop churn
    pub reset_attempt_floor: i64,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            max_work_time: Duration::from_millis(500),
            max_flush_time: Duration::from_secs(10),
            max_stopping_time: Duration::from_secs(30),
            reset_attempt_floor: 5,
        }
    }
}

impl From<&Config> for WorkerSettings {
    fn from(config: &Config) -> Self {
        Self {
            max_work_time: config.work_time(),
            max_flush_time: config.flush_time(),
            max_stopping_time: config.stopping_time(),
            ..Default::default()
        }
    }
}

/// Queue drainer bound to one adapter instance
pub struct Worker {
    queue: Arc<Queue>,
    adapter: BoxedAdapter,
    tracker: Tracker,
    settings: WorkerSettings,
    flush_pending: bool,
    stopping: bool,
    halting: bool,
    halt_deadline: Option<Instant>,
    generation: u64,
    live_generation: Arc<AtomicU64>,
}

impl Worker {
    /// Create a worker draining `queue` into `adapter`
    pub fn new(
        queue: Arc<Queue>,
        adapter: BoxedAdapter,
        settings: WorkerSettings,
        generation: u64,
        live_generation: Arc<AtomicU64>,
    ) -> Self {
        Self {
            queue,
            adapter,
            tracker: Tracker::new(Arc::new(Backoff::new(ADAPTER_BACKOFF_ATTEMPTS))),
            settings,
            flush_pending: false,
            stopping: false,
            halting: false,
            halt_deadline: None,
            generation,
            live_generation,
        }
    }

    /// Open the adapter eagerly
    pub async fn start(&mut self) -> std::result::Result<(), AdapterError> {
        self.adapter.open().await
    }

    /// Drain the queue inline until `timeout` elapses or no eligible item
    /// remains
    pub async fn work(&mut self, timeout: Duration) {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            if !self.process(remaining, false).await {
                break;
            }
        }
    }

    /// Graceful inline stop: make everything eligible, drain for `timeout`,
    /// flush, close
    pub async fn stop(&mut self, timeout: Duration) {
        self.reset();
        self.work(timeout).await;
        if let Err(error) = self.flush(self.settings.max_flush_time).await {
            warn!(%error, "flush during stop failed");
        }
        self.adapter.close().await;
    }

    /// Immediate inline halt: no drain, no flush
    pub async fn halt(&mut self) {
        self.adapter.close().await;
    }

    /// Flush the adapter; a closed adapter has nothing to flush and is not
    /// an error
    pub async fn flush(&mut self, timeout: Duration) -> std::result::Result<(), AdapterError> {
        match self.adapter.flush(timeout).await {
            Err(AdapterError::Closed { .. }) => Ok(()),
            other => other,
        }
    }

    /// Make all queued items eligible again. The adapter tracker is only
    /// cleared past the attempt floor so rapid start/stop churn cannot
    /// defeat the reopen schedule.
    pub fn reset(&mut self) {
        if self.tracker.attempts() > self.settings.reset_attempt_floor {
            self.tracker.reset();
        }
        self.queue.reset();
    }

    /// One fetch-and-deliver iteration. Returns false when no eligible
    /// item remained or the adapter had to be closed.
    async fn process(&mut self, timeout: Duration, block: bool) -> bool {
        match self.process_queue(timeout, block).await {
            Ok(more) => more,
            Err(error) => {
                // The open attempt failed or the connection dropped while
                // emitting. Close so the next iteration reopens cleanly.
                self.adapter.close().await;
                warn!(
                    %error,
                    attempts = self.tracker.attempts(),
                    "adapter is closed and could not deliver"
                );
                false
            }
        }
    }

    async fn process_queue(
        &mut self,
        timeout: Duration,
        block: bool,
    ) -> std::result::Result<bool, AdapterError> {
        let timeout_arg = if block { Some(timeout) } else { None };
        let item = match self.queue.get(block, timeout_arg).await {
            Ok(item) => item,
            Err(QueueError::Empty) => return Ok(false),
        };

        if let Err(error) = self.check_adapter(timeout).await {
            // Keep the fetched item; the reopen gets another chance on the
            // next iteration.
            self.queue.put_item(item).await;
            return Err(error);
        }
        self.process_item(item).await?;
        Ok(true)
    }

    /// Ensure the adapter is ready to emit. Returns false when the reopen
    /// backoff makes it pointless to wait within `timeout`.
    async fn check_adapter(
        &mut self,
        timeout: Duration,
    ) -> std::result::Result<bool, AdapterError> {
        if self.adapter.closed() || self.tracker.attempts() > 0 {
            if self.tracker.remaining() > timeout {
                debug!(
                    attempts = self.tracker.attempts(),
                    "remaining backoff exceeds the current timeout"
                );
                return Ok(false);
            }

            self.tracker.wait(timeout).await;

            // Still inside the backoff period after waiting means another
            // attempt bumped the tracker concurrently.
            if !self.tracker.expired() {
                warn!(
                    attempts = self.tracker.attempts(),
                    "tracker did not expire despite waiting"
                );
                return Ok(false);
            }

            self.tracker.attempt();
            self.adapter.open().await?;
            self.tracker.reset();
        }
        Ok(true)
    }

    /// Deliver one item, classifying failures per the adapter taxonomy
    async fn process_item(
        &mut self,
        mut item: QueueItem,
    ) -> std::result::Result<(), AdapterError> {
        let body = match item.payload {
            QueuePayload::Stop(duration) => {
                self.stopping = true;
                self.halt_deadline = Some(Instant::now() + duration);
                return Ok(());
            }
            QueuePayload::Halt => {
                self.stopping = true;
                self.halting = true;
                return Ok(());
            }
            QueuePayload::Flush => {
                self.flush_pending = true;
                return Ok(());
            }
            QueuePayload::Body(ref body) => body.clone(),
        };

        item.attempt();
        self.flush_pending = true;

        match self.adapter.emit(&body).await {
            Ok(()) => Ok(()),
            // The payload can never be delivered, drop it.
            Err(error @ AdapterError::EmitPermanent { .. }) => {
                error!(%error, attempts = item.attempts(), "permanent failure, dropping item");
                Ok(())
            }
            // The adapter stays healthy, return the item for retry.
            Err(AdapterError::Emit { .. }) => {
                self.queue.put_item(item).await;
                Ok(())
            }
            // Connection loss: return the item and surface the failure so
            // the adapter gets closed and reopened.
            Err(error @ AdapterError::Closed { .. }) => {
                self.queue.put_item(item).await;
                Err(error)
            }
        }
    }

    /// Flush the adapter once the queue went idle after traffic
    async fn check_flush(&mut self) {
        if self.flush_pending {
            if let Err(error) = self.adapter.flush(self.settings.max_flush_time).await {
                debug!(%error, "idle flush skipped");
            }
            self.flush_pending = false;
        }
    }

    /// Stop and halt if a newer worker has taken over this transport
    fn check_superseded(&mut self) {
        if self.stopping {
            return;
        }
        if self.live_generation.load(Ordering::Acquire) != self.generation {
            info!("another worker now owns this transport, halting");
            self.stopping = true;
            self.halting = true;
        }
    }

    /// The background task body: run until stopped, then drain and close
    async fn run(mut self) {
        debug!(generation = self.generation, "worker started");

        while !self.stopping {
            self.process(self.settings.max_work_time, true).await;
            self.check_superseded();
            self.check_flush().await;
        }

        if !self.halting {
            self.reset();

            while !self.halting {
                if self
                    .halt_deadline
                    .map_or(false, |deadline| Instant::now() >= deadline)
                {
                    self.halting = true;
                    break;
                }
                if self.queue.is_empty() {
                    self.halting = true;
                } else {
                    self.process(self.settings.max_work_time, true).await;
                }
                self.check_flush().await;
            }

            if !self.queue.is_empty() {
                warn!(
                    remaining = self.queue.len(),
                    "worker exiting with items still in the queue"
                );
            }
            if let Err(error) = self.flush(self.settings.max_flush_time).await {
                warn!(%error, "final flush failed");
            }
        }

        self.adapter.close().await;
        debug!(generation = self.generation, "worker exited");
    }
}

/// Handle to a worker running as a dedicated background task. Control is
/// signalled through sentinel items on the shared queue; stop and halt
/// join the task.
pub struct BackgroundWorker {
    queue: Arc<Queue>,
    handle: JoinHandle<()>,
    generation: u64,
}

impl BackgroundWorker {
    /// Spawn the worker onto the runtime
    pub fn spawn(worker: Worker) -> Self {
        let queue = Arc::clone(&worker.queue);
        let generation = worker.generation;
        let handle = tokio::spawn(worker.run());
        Self {
            queue,
            handle,
            generation,
        }
    }

    /// Generation token this worker holds
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Returns true once the task has exited
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Verify the worker is still able to accept control requests
    pub fn check(&self) -> std::result::Result<(), WorkerError> {
        if self.is_finished() {
            return Err(WorkerError::Stopped);
        }
        Ok(())
    }

    /// Request a graceful stop bounded by `timeout` and join the task
    pub async fn stop(self, timeout: Duration) -> std::result::Result<(), WorkerError> {
        self.check()?;
        self.queue.put_head(QueuePayload::Stop(timeout)).await;
        let _ = self.handle.await;
        Ok(())
    }

    /// Request an immediate halt and join the task
    pub async fn halt(self) -> std::result::Result<(), WorkerError> {
        self.check()?;
        self.queue.put_head(QueuePayload::Halt).await;
        let _ = self.handle.await;
        Ok(())
    }

    /// Request a flush on the worker's next idle iteration
    pub async fn flush(&self) -> std::result::Result<(), WorkerError> {
        self.check()?;
        self.queue.put_tail(QueuePayload::Flush).await;
        Ok(())
    }
}
