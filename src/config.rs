//! # Configuration Module
//!
//! This module defines the configuration for the emission pipeline. Values
//! are loaded from environment variables with the `EMIT_` prefix (e.g.
//! `EMIT_MAX_FLUSH_TIME=5`), falling back to the defaults below.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::ConfigError;

/// Environment variable prefix for all recognized keys
pub const ENV_PREFIX: &str = "EMIT";

/// Scheduling strategy for the transport worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WorkerMode {
    /// One dedicated worker task per transport, launched on first start
    #[default]
    Background,

    /// The worker drains inline on the caller's task during `emit`
    Inline,
}

/// Main configuration structure for the emission pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Adapter URL consulted when no adapter is supplied; empty selects noop
    pub adapter_url: String,

    /// Worker scheduling strategy
    pub worker_mode: WorkerMode,

    /// Queue capacity; producers block when full. -1 means unbounded.
    pub max_queue_size: i64,

    /// Upper bound in seconds for adapter flush
    pub max_flush_time: f64,

    /// Upper bound in seconds for graceful stop
    pub max_stopping_time: f64,

    /// Per-iteration work budget / background wake interval in seconds
    pub max_work_time: f64,

    /// Propagate exceptions from `emit`; pretty-print JSON
    pub debug: bool,

    /// Pretty-print JSON unconditionally
    pub pretty: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            adapter_url: String::new(),
            worker_mode: WorkerMode::Background,
            max_queue_size: -1,
            max_flush_time: 10.0,
            max_stopping_time: 30.0,
            max_work_time: 0.5,
            debug: false,
            pretty: false,
        }
    }
}

impl Config {
    /// Load configuration from `EMIT_`-prefixed environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let settings = config::Config::builder()
            .set_default("adapter_url", "")
            .map_err(|e| ConfigError::Load(e.to_string()))?
            .set_default("worker_mode", "background")
            .map_err(|e| ConfigError::Load(e.to_string()))?
            .set_default("max_queue_size", -1i64)
            .map_err(|e| ConfigError::Load(e.to_string()))?
            .set_default("max_flush_time", 10.0)
            .map_err(|e| ConfigError::Load(e.to_string()))?
            .set_default("max_stopping_time", 30.0)
            .map_err(|e| ConfigError::Load(e.to_string()))?
            .set_default("max_work_time", 0.5)
            .map_err(|e| ConfigError::Load(e.to_string()))?
            .set_default("debug", false)
            .map_err(|e| ConfigError::Load(e.to_string()))?
            .set_default("pretty", false)
            .map_err(|e| ConfigError::Load(e.to_string()))?
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| ConfigError::Load(e.to_string()))?;

        settings
            .try_deserialize()
            .map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Queue capacity as an optional bound
    pub fn queue_capacity(&self) -> Option<usize> {
        if self.max_queue_size < 0 {
            None
        } else {
            Some(self.max_queue_size as usize)
        }
    }

    /// Flush bound as a duration
    pub fn flush_time(&self) -> Duration {
        Duration::from_secs_f64(self.max_flush_time.max(0.0))
    }

    /// Graceful stop bound as a duration
    pub fn stopping_time(&self) -> Duration {
        Duration::from_secs_f64(self.max_stopping_time.max(0.0))
    }

    /// Per-iteration work budget as a duration
    pub fn work_time(&self) -> Duration {
        Duration::from_secs_f64(self.max_work_time.max(0.0))
    }

    /// True when event JSON should be pretty-printed
    pub fn pretty_json(&self) -> bool {
        self.debug || self.pretty
    }
}
