//! Stage capability and the two-port processor stage.
//!
//! [`Stage`] is the interface a host drives: resource lifecycle operations
//! plus the buffer-ready notification. [`ProcessorStage`] implements it by
//! pairing a [`StageController`] with a per-port [`Lifecycle`].
//!
//! # Example
//!
//! ```rust
//! use webpd::broker::QueueBroker;
//! use webpd::buffer::BufferHandle;
//! use webpd::port::{PortId, PortScope};
//! use webpd::stage::{Stage, passthrough};
//!
//! let mut stage = passthrough(QueueBroker::new()).unwrap();
//! stage.allocate_resources(PortScope::All).unwrap();
//! stage.prepare_to_transfer(PortScope::All).unwrap();
//! stage.transfer_and_process(PortScope::All).unwrap();
//!
//! stage.broker_mut().supply(PortId::Input, BufferHandle::with_data(64, b"data").unwrap());
//! stage.broker_mut().supply(PortId::Output, BufferHandle::new(64).unwrap());
//! let progress = stage.on_buffers_ready().unwrap();
//! assert_eq!(progress.transforms, 1);
//!
//! stage.stop_and_return().unwrap();
//! stage.deallocate_resources().unwrap();
//! ```

use crate::broker::PortBroker;
use crate::config::StageConfig;
use crate::controller::{Progress, StageController, StageState};
use crate::error::{Error, Result};
use crate::lifecycle::{Lifecycle, PortPhase};
use crate::observability::{instrument_stage, trace_error, trace_phase_change};
use crate::port::{PortId, PortScope};
use crate::transform::{PassThrough, TransformHook};
use crate::webp::WebpDecoder;

/// A single pipeline stage between one input and one output port.
///
/// The host calls these serially from one thread of control. Lifecycle
/// operations must follow allocate, prepare, transfer, stop, deallocate.
pub trait Stage {
    /// Stage name (for debugging/logging).
    fn name(&self) -> &str;

    /// Acquire per-port resources. Idempotent per port.
    fn allocate_resources(&mut self, scope: PortScope) -> Result<()>;

    /// Release per-port resources, including after a partial allocation.
    fn deallocate_resources(&mut self) -> Result<()>;

    /// Signal readiness to exchange buffers. Claims nothing.
    fn prepare_to_transfer(&mut self, scope: PortScope) -> Result<()>;

    /// Start exchanging buffers on the given ports.
    fn transfer_and_process(&mut self, scope: PortScope) -> Result<()>;

    /// Return every held buffer and stop claiming.
    fn stop_and_return(&mut self) -> Result<()>;

    /// React to buffers becoming available on either port.
    fn on_buffers_ready(&mut self) -> Result<Progress>;
}

/// Two-port processor stage running a [`TransformHook`].
pub struct ProcessorStage<B: PortBroker, T: TransformHook> {
    controller: StageController<B, T>,
    lifecycle: Lifecycle,
    config: StageConfig,
    scratch: [Option<Box<[u8]>>; 2],
}

impl<B: PortBroker, T: TransformHook> ProcessorStage<B, T> {
    /// Create a stage. No resources are allocated yet.
    pub fn new(broker: B, transform: T, config: StageConfig) -> Result<Self> {
        config.validate()?;
        tracing::trace!(stage = %config.name, transform = transform.name(), "constructing stage");

        Ok(Self {
            controller: StageController::new(broker, transform, &config),
            lifecycle: Lifecycle::new(),
            config,
            scratch: [None, None],
        })
    }

    /// Box this stage behind the [`Stage`] capability.
    pub fn boxed(self) -> Box<dyn Stage>
    where
        B: 'static,
        T: 'static,
    {
        Box::new(self)
    }

    /// Current buffer state.
    pub fn state(&self) -> &StageState {
        self.controller.state()
    }

    /// Current lifecycle.
    pub fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    /// Phase of one port.
    pub fn phase(&self, port: PortId) -> PortPhase {
        self.lifecycle.phase(port)
    }

    /// Stage configuration.
    pub fn config(&self) -> &StageConfig {
        &self.config
    }

    /// The broker.
    pub fn broker(&self) -> &B {
        self.controller.broker()
    }

    /// Mutable access to the broker.
    pub fn broker_mut(&mut self) -> &mut B {
        self.controller.broker_mut()
    }

    /// The transform hook.
    pub fn transform(&self) -> &T {
        self.controller.transform()
    }

    /// Scratch region allocated for `port`, if any.
    pub fn scratch(&self, port: PortId) -> Option<&[u8]> {
        self.scratch[port.index()].as_deref()
    }

    /// Signal that the input side will deliver no more data.
    pub fn signal_end_of_stream(&mut self) {
        self.controller.signal_end_of_stream();
    }

    fn span(&self, operation: &'static str) -> tracing::span::EnteredSpan {
        instrument_stage(
            &self.config.name,
            operation,
            self.config.tracing.lifecycle_spans,
        )
    }

    fn allocate_port(&mut self, port: PortId) -> Result<()> {
        self.controller.transform_mut().allocate(port)?;

        if self.config.scratch_size > 0 && self.scratch[port.index()].is_none() {
            let mut region = Vec::new();
            region
                .try_reserve_exact(self.config.scratch_size)
                .map_err(|e| {
                    Error::AllocationFailed(format!("scratch for {port}: {e}"))
                })?;
            region.resize(self.config.scratch_size, 0);
            self.scratch[port.index()] = Some(region.into_boxed_slice());
        }

        trace_phase_change(&self.config.name, port, &PortPhase::Allocated);
        Ok(())
    }

    fn log_phase_changes(&self, ports: &[PortId], phase: PortPhase) {
        for port in ports {
            trace_phase_change(&self.config.name, *port, &phase);
        }
    }
}

impl<B: PortBroker, T: TransformHook> Stage for ProcessorStage<B, T> {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn allocate_resources(&mut self, scope: PortScope) -> Result<()> {
        let _span = self.span("allocate_resources");

        let prior = self.lifecycle.clone();
        let changed = self.lifecycle.allocate(scope)?;

        for (i, port) in changed.iter().enumerate() {
            if let Err(e) = self.allocate_port(*port) {
                // Ports not yet backed by resources keep their old phase.
                for pending in &changed[i..] {
                    self.lifecycle.restore(*pending, prior.phase(*pending));
                }
                trace_error(&self.config.name, &e);
                return Err(e);
            }
        }
        tracing::trace!(stage = %self.config.name, scope = %scope, "resource allocation complete");
        Ok(())
    }

    fn deallocate_resources(&mut self) -> Result<()> {
        let _span = self.span("deallocate_resources");

        let changed = self.lifecycle.deallocate()?;
        self.controller.transform_mut().deallocate();
        self.scratch = [None, None];

        self.log_phase_changes(&changed, PortPhase::Unallocated);
        tracing::trace!(stage = %self.config.name, "resource deallocation complete");
        Ok(())
    }

    fn prepare_to_transfer(&mut self, scope: PortScope) -> Result<()> {
        let _span = self.span("prepare_to_transfer");

        let changed = self.lifecycle.prepare(scope)?;
        self.log_phase_changes(&changed, PortPhase::Prepared);
        Ok(())
    }

    fn transfer_and_process(&mut self, scope: PortScope) -> Result<()> {
        let _span = self.span("transfer_and_process");

        let changed = self.lifecycle.transfer(scope)?;
        self.log_phase_changes(&changed, PortPhase::Transferring);
        Ok(())
    }

    fn stop_and_return(&mut self) -> Result<()> {
        let _span = self.span("stop_and_return");

        let changed = self.lifecycle.stop()?;
        self.log_phase_changes(&changed, PortPhase::Stopped);

        let released = self.controller.release_all().inspect_err(|e| {
            trace_error(&self.config.name, e);
        })?;
        tracing::debug!(stage = %self.config.name, released, "stopped and returned buffers");
        Ok(())
    }

    fn on_buffers_ready(&mut self) -> Result<Progress> {
        self.lifecycle.ensure_transferring("on_buffers_ready")?;

        let _span = instrument_stage(
            &self.config.name,
            "on_buffers_ready",
            self.config.tracing.notification_spans,
        );
        tracing::trace!(stage = %self.config.name, "buffers ready");
        self.controller.on_buffers_ready()
    }
}

impl<B: PortBroker, T: TransformHook> Drop for ProcessorStage<B, T> {
    fn drop(&mut self) {
        if !self.controller.state().holds_any() {
            return;
        }

        tracing::warn!(
            stage = %self.config.name,
            "stage dropped while holding buffers, returning them to the broker"
        );
        if let Err(e) = self.controller.release_all() {
            trace_error(&self.config.name, &e);
        }
    }
}

impl<B: PortBroker, T: TransformHook> std::fmt::Debug for ProcessorStage<B, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessorStage")
            .field("name", &self.config.name)
            .field("lifecycle", &self.lifecycle)
            .field("state", self.controller.state())
            .finish()
    }
}

/// Build a WebP decoder stage.
pub fn webp_decoder<B: PortBroker>(
    broker: B,
    config: StageConfig,
) -> Result<ProcessorStage<B, WebpDecoder>> {
    ProcessorStage::new(broker, WebpDecoder::new(), config)
}

/// Build a stage that copies input to output unchanged.
pub fn passthrough<B: PortBroker>(broker: B) -> Result<ProcessorStage<B, PassThrough>> {
    ProcessorStage::new(broker, PassThrough::new(), StageConfig::new("passthrough"))
}
