//! # Error Handling Module
//!
//! This module defines the error types shared across the emission pipeline:
//! the three-tier adapter taxonomy consumed by the worker, worker lifecycle
//! errors surfaced to the transport, and the event validation taxonomy
//! surfaced to emitter callers.

use thiserror::Error;

/// Sink-level error taxonomy.
///
/// The worker drives its retry policy off these three tiers:
/// - [`AdapterError::Closed`] means the adapter cannot currently accept
///   events and must be reopened before retrying.
/// - [`AdapterError::Emit`] means one payload failed but the adapter is
///   still healthy; the payload should be requeued.
/// - [`AdapterError::EmitPermanent`] means the payload can never be
///   delivered and should be dropped.
#[derive(Error, Debug)]
pub enum AdapterError {
    /// The adapter is no longer open (failed open, lost connection/channel)
    #[error("adapter closed: {message}")]
    Closed { message: String },

    /// A single payload could not be delivered; the adapter remains healthy
    #[error("emit failed: {message}")]
    Emit { message: String },

    /// The payload can never be delivered (malformed, policy rejection)
    #[error("emit failed permanently: {message}")]
    EmitPermanent { message: String },
}

impl AdapterError {
    /// Create a closed error
    pub fn closed<S: Into<String>>(message: S) -> Self {
        Self::Closed {
            message: message.into(),
        }
    }

    /// Create a transient emit error
    pub fn emit<S: Into<String>>(message: S) -> Self {
        Self::Emit {
            message: message.into(),
        }
    }

    /// Create a permanent emit error
    pub fn emit_permanent<S: Into<String>>(message: S) -> Self {
        Self::EmitPermanent {
            message: message.into(),
        }
    }

    /// Check if the payload that triggered this error should be retried
    pub fn is_retryable(&self) -> bool {
        match self {
            AdapterError::Closed { .. } => true,
            AdapterError::Emit { .. } => true,
            AdapterError::EmitPermanent { .. } => false,
        }
    }

    /// True when the adapter should be reopened before the next attempt
    pub fn is_closed(&self) -> bool {
        matches!(self, AdapterError::Closed { .. })
    }

    /// Get the error category for diagnostics
    pub fn category(&self) -> &'static str {
        match self {
            AdapterError::Closed { .. } => "closed",
            AdapterError::Emit { .. } => "emit",
            AdapterError::EmitPermanent { .. } => "emit_permanent",
        }
    }
}

#[cfg(feature = "amqp")]
impl From<lapin::Error> for AdapterError {
    fn from(err: lapin::Error) -> Self {
        use lapin::Error as Lapin;
        match err {
            // Connection or channel level failures require a reopen.
            Lapin::InvalidConnectionState(_)
            | Lapin::InvalidChannelState(_)
            | Lapin::IOError(_)
            | Lapin::ProtocolError(_) => AdapterError::closed(err.to_string()),
            _ => AdapterError::emit(err.to_string()),
        }
    }
}

#[cfg(feature = "http")]
impl From<reqwest::Error> for AdapterError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) if status.is_client_error() => {
                AdapterError::emit_permanent(err.to_string())
            }
            _ => AdapterError::emit(err.to_string()),
        }
    }
}

/// Worker lifecycle errors surfaced to the transport
#[derive(Error, Debug)]
pub enum WorkerError {
    /// The worker is not running; the caller must start a fresh one
    #[error("worker is not running")]
    Stopped,
}

/// Queue fetch errors
#[derive(Error, Debug)]
pub enum QueueError {
    /// No eligible item was available within the allowed wait
    #[error("queue is empty")]
    Empty,
}

/// Event validation failure taxonomy
#[derive(Error, Debug)]
pub enum EventError {
    /// One or more required keys are missing
    #[error("event was missing required keys: {}", keys.join(", "))]
    MissingKeys { keys: Vec<String> },

    /// Keys outside the allowed set were present
    #[error("event had extraneous keys: {}", keys.join(", "))]
    ExtraneousKeys { keys: Vec<String> },

    /// A value had the wrong shape for its key
    #[error("`{key}` {expected}")]
    InvalidType { key: String, expected: String },

    /// A required string key was empty at final validation
    #[error("`{key}` must not be empty")]
    EmptyValue { key: String },

    /// A `fields` value did not satisfy its typed suffix
    #[error("`{key}` value `{value}` did not match suffix type")]
    InvalidField { key: String, value: String },

    /// A positional argument could not be absorbed
    #[error("update() takes at most 5 string arguments, extra was `{extra}`")]
    TooManyStrings { extra: String },

    /// A key outside the allowed set was referenced
    #[error("`{key}` key is not allowed")]
    KeyNotAllowed { key: String },
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Environment or file sources could not be read
    #[error("configuration load error: {0}")]
    Load(String),

    /// Collected sources could not be deserialized
    #[error("configuration parse error: {0}")]
    Parse(String),
}

/// Top-level error type for the emission library
#[derive(Error, Debug)]
pub enum EmitterError {
    /// Event construction or validation failed
    #[error(transparent)]
    Event(#[from] EventError),

    /// The adapter reported a delivery failure
    #[error(transparent)]
    Adapter(#[from] AdapterError),

    /// The worker is not in a state to accept the request
    #[error(transparent)]
    Worker(#[from] WorkerError),

    /// The queue had no eligible item
    #[error(transparent)]
    Queue(#[from] QueueError),

    /// Configuration could not be loaded
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// JSON encoding failed
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The adapter URL scheme is not recognized
    #[error("`{url}` is not a known adapter type")]
    UnknownAdapterUrl { url: String },
}

/// Result type for emission operations
pub type Result<T> = std::result::Result<T, EmitterError>;
