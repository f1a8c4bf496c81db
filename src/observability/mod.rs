//! Observability features: metrics and tracing.
//!
//! - **Metrics**: per-stage counters via `metrics-rs`
//! - **Tracing**: spans per notification and lifecycle operation via `tracing`
//!
//! | Metric | Type | Description |
//! |--------|------|-------------|
//! | `webpd_buffers_claimed` | Counter | Buffers claimed, by stage and port |
//! | `webpd_buffers_relinquished` | Counter | Buffers relinquished, by stage and port |
//! | `webpd_bytes_consumed` | Counter | Input bytes consumed by the transform |
//! | `webpd_bytes_produced` | Counter | Output bytes produced by the transform |
//! | `webpd_eos_propagated` | Counter | Output buffers sent with the EOS flag |
//! | `webpd_transform_errors` | Counter | Failed transform calls |

mod metrics;
mod tracing_support;

pub use self::metrics::{StageMetrics, init_metrics};
pub use tracing_support::{
    TracingConfig, instrument_stage, span_stage, trace_claim, trace_eos, trace_error,
    trace_phase_change, trace_relinquish,
};
