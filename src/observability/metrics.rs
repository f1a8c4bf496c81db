//! Metrics collection using metrics-rs.

use crate::port::PortId;
use metrics::{Counter, Unit, counter};
use std::sync::atomic::{AtomicBool, Ordering};

/// Whether metrics have been initialized.
static METRICS_INITIALIZED: AtomicBool = AtomicBool::new(false);

const BUFFERS_CLAIMED: &str = "webpd_buffers_claimed";
const BUFFERS_RELINQUISHED: &str = "webpd_buffers_relinquished";
const BYTES_CONSUMED: &str = "webpd_bytes_consumed";
const BYTES_PRODUCED: &str = "webpd_bytes_produced";
const EOS_PROPAGATED: &str = "webpd_eos_propagated";
const TRANSFORM_ERRORS: &str = "webpd_transform_errors";

/// Initialize metrics descriptions.
///
/// Safe to call multiple times (subsequent calls are no-ops).
pub fn init_metrics() {
    if METRICS_INITIALIZED.swap(true, Ordering::SeqCst) {
        return;
    }

    metrics::describe_counter!(
        BUFFERS_CLAIMED,
        Unit::Count,
        "Buffers claimed from the broker, per port"
    );
    metrics::describe_counter!(
        BUFFERS_RELINQUISHED,
        Unit::Count,
        "Buffers relinquished to the broker, per port"
    );
    metrics::describe_counter!(
        BYTES_CONSUMED,
        Unit::Bytes,
        "Input bytes consumed by the transform"
    );
    metrics::describe_counter!(
        BYTES_PRODUCED,
        Unit::Bytes,
        "Output bytes produced by the transform"
    );
    metrics::describe_counter!(
        EOS_PROPAGATED,
        Unit::Count,
        "Output buffers relinquished with the EOS flag"
    );
    metrics::describe_counter!(
        TRANSFORM_ERRORS,
        Unit::Count,
        "Transform invocations that failed"
    );
}

/// Metrics collector for a single stage.
///
/// Counters are resolved once at construction with the stage label, so
/// recording is a plain increment.
#[derive(Clone)]
pub struct StageMetrics {
    stage: String,
    claimed: [Counter; 2],
    relinquished: [Counter; 2],
    bytes_consumed: Counter,
    bytes_produced: Counter,
    eos: Counter,
    transform_errors: Counter,
}

impl StageMetrics {
    /// Create a new stage metrics collector.
    pub fn new(stage: &str) -> Self {
        let per_port = |name: &'static str| {
            PortId::ALL.map(|port| {
                counter!(
                    name,
                    "stage" => stage.to_string(),
                    "port" => port_label(port)
                )
            })
        };

        Self {
            stage: stage.to_string(),
            claimed: per_port(BUFFERS_CLAIMED),
            relinquished: per_port(BUFFERS_RELINQUISHED),
            bytes_consumed: counter!(BYTES_CONSUMED, "stage" => stage.to_string()),
            bytes_produced: counter!(BYTES_PRODUCED, "stage" => stage.to_string()),
            eos: counter!(EOS_PROPAGATED, "stage" => stage.to_string()),
            transform_errors: counter!(TRANSFORM_ERRORS, "stage" => stage.to_string()),
        }
    }

    /// Record a buffer claimed on `port`.
    #[inline]
    pub fn record_claim(&self, port: PortId) {
        self.claimed[port.index()].increment(1);
    }

    /// Record a buffer relinquished on `port`.
    #[inline]
    pub fn record_relinquish(&self, port: PortId) {
        self.relinquished[port.index()].increment(1);
    }

    /// Record transform progress.
    #[inline]
    pub fn record_bytes(&self, consumed: usize, produced: usize) {
        self.bytes_consumed.increment(consumed as u64);
        self.bytes_produced.increment(produced as u64);
    }

    /// Record an EOS flag propagated downstream.
    #[inline]
    pub fn record_eos(&self) {
        self.eos.increment(1);
    }

    /// Record a failed transform.
    #[inline]
    pub fn record_transform_error(&self) {
        self.transform_errors.increment(1);
    }
}

impl std::fmt::Debug for StageMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageMetrics")
            .field("stage", &self.stage)
            .finish()
    }
}

fn port_label(port: PortId) -> &'static str {
    match port {
        PortId::Input => "input",
        PortId::Output => "output",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_metrics() {
        init_metrics();
        init_metrics();
    }

    #[test]
    fn test_stage_metrics() {
        // No recorder installed: every call is a no-op.
        let metrics = StageMetrics::new("webpd-test");
        metrics.record_claim(PortId::Input);
        metrics.record_relinquish(PortId::Output);
        metrics.record_bytes(10, 10);
        metrics.record_eos();
        metrics.record_transform_error();

        assert!(format!("{metrics:?}").contains("webpd-test"));
    }
}
