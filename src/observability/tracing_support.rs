//! Tracing integration for structured logging and spans.

use crate::buffer::BufferHandle;
use crate::port::PortId;
use tracing::{Level, Span, span};

/// Configuration for tracing behavior.
#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// Whether to create a span per buffer-ready notification.
    pub notification_spans: bool,
    /// Whether to create spans for lifecycle operations.
    pub lifecycle_spans: bool,
    /// Whether to emit an event per claim and relinquish.
    pub buffer_events: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            notification_spans: true,
            lifecycle_spans: true,
            buffer_events: false, // Can be expensive
        }
    }
}

impl TracingConfig {
    /// Create a new tracing config with everything enabled.
    pub fn all() -> Self {
        Self {
            notification_spans: true,
            lifecycle_spans: true,
            buffer_events: true,
        }
    }

    /// Disable all spans and buffer events.
    pub fn none() -> Self {
        Self {
            notification_spans: false,
            lifecycle_spans: false,
            buffer_events: false,
        }
    }
}

/// Create a span for a stage operation.
#[inline]
pub fn span_stage(stage: &str, operation: &'static str) -> Span {
    span!(Level::DEBUG, "stage", name = %stage, op = operation)
}

/// Enter a stage span if `enabled`, otherwise a disabled span.
pub fn instrument_stage(
    stage: &str,
    operation: &'static str,
    enabled: bool,
) -> tracing::span::EnteredSpan {
    if enabled {
        span_stage(stage, operation).entered()
    } else {
        Span::none().entered()
    }
}

/// Log a buffer claimed from the broker.
#[inline]
pub fn trace_claim(stage: &str, port: PortId, handle: &BufferHandle) {
    tracing::trace!(
        stage = %stage,
        port = %port,
        buffer = %handle.id(),
        filled_len = handle.filled_len(),
        "claimed buffer"
    );
}

/// Log a buffer relinquished to the broker.
#[inline]
pub fn trace_relinquish(stage: &str, port: PortId, handle: &BufferHandle) {
    tracing::trace!(
        stage = %stage,
        port = %port,
        buffer = %handle.id(),
        filled_len = handle.filled_len(),
        eos = handle.flags().is_eos(),
        "relinquished buffer"
    );
}

/// Log end-of-stream propagation.
#[inline]
pub fn trace_eos(stage: &str, handle: &BufferHandle) {
    tracing::info!(
        stage = %stage,
        buffer = %handle.id(),
        filled_len = handle.filled_len(),
        "propagating end of stream"
    );
}

/// Log a port phase change.
#[inline]
pub fn trace_phase_change(stage: &str, port: PortId, phase: &dyn std::fmt::Display) {
    tracing::debug!(
        stage = %stage,
        port = %port,
        phase = %phase,
        "port phase changed"
    );
}

/// Log an error surfaced to the host.
#[inline]
pub fn trace_error(stage: &str, error: &dyn std::error::Error) {
    tracing::error!(
        stage = %stage,
        error = %error,
        "stage error"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracing_config_default() {
        let config = TracingConfig::default();
        assert!(config.notification_spans);
        assert!(config.lifecycle_spans);
        assert!(!config.buffer_events);
    }

    #[test]
    fn test_tracing_config_presets() {
        assert!(TracingConfig::all().buffer_events);
        assert!(!TracingConfig::none().notification_spans);
    }

    #[test]
    fn test_trace_functions() {
        // These should not panic even without a subscriber
        let handle = BufferHandle::with_data(8, b"abc").unwrap();
        let _guard = instrument_stage("test", "on_buffers_ready", true);
        trace_claim("test", PortId::Input, &handle);
        trace_relinquish("test", PortId::Input, &handle);
        trace_eos("test", &handle);
        trace_phase_change("test", PortId::Output, &"Prepared");
    }
}
