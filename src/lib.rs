//! # emit
//!
//! A client-side event emission library with an asynchronous delivery
//! pipeline:
//! - Contextual events with typed-suffix field validation and
//!   stutter-free name composition across nested scopes
//! - A priority-ordered retry queue with per-item exponential backoff
//! - A worker (inline or background task) that drains the queue into a
//!   pluggable sink, classifying failures as transient, permanent, or
//!   connection loss
//! - Sinks for AMQP, HTTP, files, stdout/stderr, fan-out, and in-memory
//!   capture
//!
//! Producers never block on sink I/O: `emit` enqueues canonical JSON and
//! returns, while the worker retries transient failures on an escalating
//! schedule.
//!
//! ```no_run
//! use emit::{Config, Emitter};
//!
//! # async fn example() -> emit::Result<()> {
//! let mut emitter = Emitter::new(Config::from_env()?)?;
//! emitter.set_system("billing");
//! emitter.set_component("invoicer");
//! emitter.set_tid("7f7c6b1e");
//!
//! let event = emitter.emit(["invoice.created"]).await?;
//! assert!(event.is_some());
//!
//! let scope = emitter.open(["nightly-run"]).await?;
//! let _ = scope.emit(["step"]).await?;
//! scope.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod adapters;
pub mod backoff;
pub mod config;
pub mod emitter;
pub mod error;
pub mod event;
pub mod queue;
pub mod stack;
pub mod transport;
pub mod worker;

pub use adapters::{Adapter, BoxedAdapter, FileAdapter, ListAdapter, MultiAdapter, NoopAdapter};
pub use backoff::{Backoff, Tracker};
pub use config::{Config, WorkerMode};
pub use emitter::{Emitter, EmitterScope};
pub use error::{
    AdapterError, ConfigError, EmitterError, EventError, QueueError, Result, WorkerError,
};
pub use event::{canonicalize, Event, EventArg};
pub use queue::{Queue, QueueItem, QueuePayload, QueueStat};
pub use stack::EventStack;
pub use transport::Transport;
pub use worker::{BackgroundWorker, Worker, WorkerSettings};

#[cfg(feature = "amqp")]
pub use adapters::AmqpAdapter;

#[cfg(feature = "http")]
pub use adapters::HttpAdapter;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
