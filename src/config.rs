//! Stage configuration.

use crate::error::{Error, Result};
use crate::observability::TracingConfig;
use std::num::NonZeroUsize;

/// Default stage name, used in spans and metric labels.
pub const DEFAULT_STAGE_NAME: &str = "webpd";

/// Configuration for a processor stage.
///
/// # Example
///
/// ```rust
/// use std::num::NonZeroUsize;
/// use webpd::config::StageConfig;
///
/// let config = StageConfig::new("webp-dec-0")
///     .with_max_iterations(NonZeroUsize::new(32).unwrap())
///     .with_scratch_size(4096);
/// config.validate().unwrap();
/// ```
#[derive(Debug, Clone)]
pub struct StageConfig {
    /// Stage name.
    pub name: String,
    /// Cap on claim/transform iterations per notification.
    ///
    /// `None` loops until a claim fails.
    pub max_iterations: Option<NonZeroUsize>,
    /// Relinquish an output buffer as soon as it is full.
    pub release_full_output: bool,
    /// Scratch bytes reserved per port on allocation.
    pub scratch_size: usize,
    /// Tracing behavior.
    pub tracing: TracingConfig,
}

impl Default for StageConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_STAGE_NAME.to_string(),
            max_iterations: None,
            release_full_output: true,
            scratch_size: 0,
            tracing: TracingConfig::default(),
        }
    }
}

impl StageConfig {
    /// Create a default config with a custom name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Cap loop iterations per notification.
    pub fn with_max_iterations(mut self, max: NonZeroUsize) -> Self {
        self.max_iterations = Some(max);
        self
    }

    /// Keep full output buffers until end of stream or stop.
    pub fn hold_full_output(mut self) -> Self {
        self.release_full_output = false;
        self
    }

    /// Reserve `bytes` of scratch space per port.
    pub fn with_scratch_size(mut self, bytes: usize) -> Self {
        self.scratch_size = bytes;
        self
    }

    /// Set the tracing behavior.
    pub fn with_tracing(mut self, tracing: TracingConfig) -> Self {
        self.tracing = tracing;
        self
    }

    /// Check the configuration for invalid values.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::Config("stage name must not be empty".into()));
        }
        Ok(())
    }
}
