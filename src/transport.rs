//! # Transport Module
//!
//! A transport binds one queue, one adapter, and one worker. It exposes
//! the lifecycle surface the emitter drives: `start`, `stop`, `halt`,
//! `flush`, and `emit`. State transitions are serialized by an async
//! mutex; `emit` enqueues without holding it so producers never serialize
//! behind lifecycle operations.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::adapters::{self, BoxedAdapter, NoopAdapter};
use crate::backoff::Backoff;
use crate::config::{Config, WorkerMode};
use crate::error::{Result, WorkerError};
use crate::queue::{Queue, QueuePayload, QueueStat};
use crate::worker::{BackgroundWorker, Worker, WorkerSettings};

enum WorkerRuntime {
    /// Drains inline on the caller's task during `emit`
    Inline(Worker),

    /// Dedicated background task signalled through queue sentinels
    Background(BackgroundWorker),
}

impl WorkerRuntime {
    fn alive(&self) -> bool {
        match self {
            WorkerRuntime::Inline(_) => true,
            WorkerRuntime::Background(worker) => !worker.is_finished(),
        }
    }
}

struct TransportState {
    /// Prototype adapter; each worker gets its own copy via the factory
    /// contract so two tasks never share a sink
    adapter: BoxedAdapter,
    runtime: Option<WorkerRuntime>,
}

/// Binds a queue, an adapter, and a worker into one deliverable unit
pub struct Transport {
    queue: Arc<Queue>,
    settings: WorkerSettings,
    mode: WorkerMode,
    generation: Arc<AtomicU64>,
    state: Mutex<TransportState>,
}

impl Transport {
    /// Create a transport delivering to the given adapter
    pub fn new(adapter: BoxedAdapter, config: &Config) -> Self {
        Self {
            queue: Arc::new(Queue::new(
                config.queue_capacity(),
                Arc::new(Backoff::default()),
            )),
            settings: WorkerSettings::from(config),
            mode: config.worker_mode,
            generation: Arc::new(AtomicU64::new(0)),
            state: Mutex::new(TransportState {
                adapter,
                runtime: None,
            }),
        }
    }

    /// Create a transport from configuration alone: `adapter_url` selects
    /// the sink, empty means noop
    pub fn from_config(config: &Config) -> Result<Self> {
        let adapter = if config.adapter_url.is_empty() {
            Box::new(NoopAdapter::new()) as BoxedAdapter
        } else {
            adapters::from_url(&config.adapter_url)?
        };
        Ok(Self::new(adapter, config))
    }

    /// Returns true while a worker is bound to this transport
    pub async fn running(&self) -> bool {
        self.state.lock().await.runtime.is_some()
    }

    /// Number of items currently queued
    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Point-in-time queue statistics
    pub fn queue_stat(&self) -> QueueStat {
        self.queue.stat()
    }

    /// Start a worker if none is running
    pub async fn start(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        self.start_locked(&mut state).await
    }

    async fn start_locked(&self, state: &mut TransportState) -> Result<()> {
        if matches!(&state.runtime, Some(runtime) if runtime.alive()) {
            return Ok(());
        }

        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let worker = Worker::new(
            Arc::clone(&self.queue),
            state.adapter.clone_adapter(),
            self.settings.clone(),
            generation,
            Arc::clone(&self.generation),
        );

        match self.mode {
            WorkerMode::Background => {
                state.runtime = Some(WorkerRuntime::Background(BackgroundWorker::spawn(worker)));
            }
            WorkerMode::Inline => {
                state.runtime = Some(WorkerRuntime::Inline(worker));
                if let Some(WorkerRuntime::Inline(worker)) = &mut state.runtime {
                    worker.start().await?;
                }
            }
        }
        Ok(())
    }

    /// Graceful stop: drain for at most `timeout` (default
    /// `max_stopping_time`), flush, close. Items still queued at the
    /// deadline are dropped with a warning.
    pub async fn stop(&self, timeout: Option<Duration>) -> Result<()> {
        let timeout = timeout.unwrap_or(self.settings.max_stopping_time);
        let mut state = self.state.lock().await;

        match state.runtime.take() {
            None => Ok(()),
            Some(WorkerRuntime::Inline(mut worker)) => {
                worker.stop(timeout).await;
                Ok(())
            }
            Some(WorkerRuntime::Background(worker)) => match worker.stop(timeout).await {
                Ok(()) | Err(WorkerError::Stopped) => Ok(()),
            },
        }
    }

    /// Immediate halt: no drain, no flush; queued items stay queued
    pub async fn halt(&self) -> Result<()> {
        let mut state = self.state.lock().await;

        match state.runtime.take() {
            None => Ok(()),
            Some(WorkerRuntime::Inline(mut worker)) => {
                worker.halt().await;
                Ok(())
            }
            Some(WorkerRuntime::Background(worker)) => match worker.halt().await {
                Ok(()) | Err(WorkerError::Stopped) => Ok(()),
            },
        }
    }

    /// Ask the adapter to relinquish its buffers within `timeout`
    pub async fn flush(&self, timeout: Option<Duration>) -> Result<()> {
        let timeout = timeout.unwrap_or(self.settings.max_flush_time);
        let mut state = self.state.lock().await;

        match &mut state.runtime {
            None => Ok(()),
            Some(WorkerRuntime::Inline(worker)) => {
                worker.flush(timeout).await?;
                Ok(())
            }
            Some(WorkerRuntime::Background(worker)) => match worker.flush().await {
                Ok(()) => Ok(()),
                Err(WorkerError::Stopped) => {
                    // The worker died with the request unserved; drop the
                    // runtime so the next emit starts a fresh one.
                    state.runtime = None;
                    Ok(())
                }
            },
        }
    }

    /// Enqueue one serialized event and make sure a worker is draining.
    /// In inline mode this also drains for up to `timeout` (default
    /// `max_work_time`) on the caller's task.
    pub async fn emit(&self, payload: String, timeout: Option<Duration>) -> Result<()> {
        // Enqueue before taking the state lock so producers are not
        // serialized behind lifecycle operations.
        self.queue.put(QueuePayload::Body(payload)).await;

        let mut state = self.state.lock().await;
        let needs_start = !matches!(&state.runtime, Some(runtime) if runtime.alive());
        if needs_start {
            debug!("starting worker");
            self.start_locked(&mut state).await?;
        }

        if let Some(WorkerRuntime::Inline(worker)) = &mut state.runtime {
            worker
                .work(timeout.unwrap_or(self.settings.max_work_time))
                .await;
        }
        Ok(())
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        // A dropped transport gives a live background worker one last
        // bounded drain; the detached task finishes on its own.
        if let Ok(state) = self.state.try_lock() {
            if let Some(WorkerRuntime::Background(worker)) = &state.runtime {
                if !worker.is_finished() {
                    warn!("transport dropped while running, requesting bounded stop");
                    self.queue
                        .push_control(QueuePayload::Stop(self.settings.max_stopping_time));
                }
            }
        }
    }
}
