//! Stage controller: the claim / transform / relinquish loop.
//!
//! The controller holds at most one input and one output [`BufferHandle`].
//! On every buffer-ready notification it:
//!
//! 1. claims an input buffer if none is held (stops if none is available),
//! 2. claims an output buffer if none is held (stops if none is available),
//! 3. runs the [`TransformHook`] once,
//! 4. relinquishes the input buffer once it is fully consumed,
//!
//! and repeats until a claim fails. A full output buffer is relinquished
//! when the held input still has bytes for it, so the loop can claim a fresh
//! one. After the loop, if the stream has ended and all input is drained,
//! the held output buffer goes back to the broker with the EOS flag set.
//!
//! End of stream is reached when an input buffer carrying the EOS flag (or
//! an explicit [`signal_end_of_stream`](StageController::signal_end_of_stream))
//! has been seen *and* no input is left in flight. A signalled stream still
//! drains whatever input the broker already has; an EOS-flagged input buffer
//! is the last one claimed. Once the flag has been sent downstream nothing
//! is claimed on either port.

use crate::broker::PortBroker;
use crate::buffer::{BufferHandle, BufferId};
use crate::config::StageConfig;
use crate::error::{Error, Result};
use crate::observability::{
    StageMetrics, trace_claim, trace_eos, trace_error, trace_relinquish,
};
use crate::port::{PortId, PortSet};
use crate::transform::TransformHook;
use std::num::NonZeroUsize;

/// Per-instance mutable state of a stage.
#[derive(Debug, Default)]
pub struct StageState {
    input: Option<BufferHandle>,
    output: Option<BufferHandle>,
    /// Input side signalled EOS; becomes `end_of_stream` once drained.
    eos_pending: bool,
    /// An EOS-flagged input buffer was claimed; no input follows it.
    input_closed: bool,
    end_of_stream: bool,
    eos_propagated: bool,
}

impl StageState {
    /// Create an empty state: no handles, stream not ended.
    pub fn new() -> Self {
        Self::default()
    }

    /// The held input handle, if any.
    pub fn input_handle(&self) -> Option<&BufferHandle> {
        self.input.as_ref()
    }

    /// The held output handle, if any.
    pub fn output_handle(&self) -> Option<&BufferHandle> {
        self.output.as_ref()
    }

    /// Whether the input side ended and all buffered input was drained.
    pub fn end_of_stream(&self) -> bool {
        self.end_of_stream
    }

    /// Whether the EOS flag has already been sent downstream.
    pub fn eos_propagated(&self) -> bool {
        self.eos_propagated
    }

    /// Whether any handle is held.
    pub fn holds_any(&self) -> bool {
        self.input.is_some() || self.output.is_some()
    }

    fn slot(&self, port: PortId) -> &Option<BufferHandle> {
        match port {
            PortId::Input => &self.input,
            PortId::Output => &self.output,
        }
    }

    fn slot_mut(&mut self, port: PortId) -> &mut Option<BufferHandle> {
        match port {
            PortId::Input => &mut self.input,
            PortId::Output => &mut self.output,
        }
    }

    fn fill(&self) -> FillSnapshot {
        let of = |h: &Option<BufferHandle>| h.as_ref().map(|h| (h.id(), h.offset(), h.filled_len()));
        FillSnapshot {
            input: of(&self.input),
            output: of(&self.output),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FillSnapshot {
    input: Option<(BufferId, usize, usize)>,
    output: Option<(BufferId, usize, usize)>,
}

/// What a single buffer-ready notification achieved.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Progress {
    /// Input buffers claimed.
    pub inputs_claimed: usize,
    /// Output buffers claimed.
    pub outputs_claimed: usize,
    /// Input buffers relinquished.
    pub inputs_relinquished: usize,
    /// Output buffers relinquished (with or without EOS).
    pub outputs_relinquished: usize,
    /// Transform invocations.
    pub transforms: usize,
    /// The EOS flag was sent downstream during this notification.
    pub eos_propagated: bool,
    /// The loop stopped at the iteration cap with work possibly left.
    pub yielded: bool,
}

impl Progress {
    /// Check that nothing was claimed, relinquished or transformed.
    pub fn is_idle(&self) -> bool {
        *self == Self::default()
    }
}

/// Runs the buffer exchange protocol against a broker.
pub struct StageController<B, T> {
    name: String,
    broker: B,
    transform: T,
    state: StageState,
    max_iterations: Option<NonZeroUsize>,
    release_full_output: bool,
    buffer_events: bool,
    metrics: StageMetrics,
}

impl<B: PortBroker, T: TransformHook> StageController<B, T> {
    /// Create a controller with empty state.
    pub fn new(broker: B, transform: T, config: &StageConfig) -> Self {
        Self {
            name: config.name.clone(),
            broker,
            transform,
            state: StageState::new(),
            max_iterations: config.max_iterations,
            release_full_output: config.release_full_output,
            buffer_events: config.tracing.buffer_events,
            metrics: StageMetrics::new(&config.name),
        }
    }

    /// Stage name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current stage state.
    pub fn state(&self) -> &StageState {
        &self.state
    }

    /// The broker.
    pub fn broker(&self) -> &B {
        &self.broker
    }

    /// Mutable access to the broker, for the host side of the exchange.
    pub fn broker_mut(&mut self) -> &mut B {
        &mut self.broker
    }

    /// The transform hook.
    pub fn transform(&self) -> &T {
        &self.transform
    }

    /// Mutable access to the transform hook.
    pub fn transform_mut(&mut self) -> &mut T {
        &mut self.transform
    }

    /// Signal that no further input will arrive.
    ///
    /// The stream ends once the input buffer in flight, if any, is drained.
    /// Input the broker already has is still processed before the EOS flag
    /// goes downstream.
    pub fn signal_end_of_stream(&mut self) {
        self.state.eos_pending = true;
        self.update_end_of_stream();
    }

    fn update_end_of_stream(&mut self) {
        if self.state.eos_pending && self.state.input.is_none() && !self.state.end_of_stream {
            self.state.end_of_stream = true;
            tracing::debug!(stage = %self.name, "input drained, end of stream reached");
        }
    }

    /// Claim one buffer on `port` if the broker has one.
    ///
    /// Returns `Ok(false)` when nothing is available.
    pub(crate) fn claim(&mut self, port: PortId) -> Result<bool> {
        if self.state.slot(port).is_some() {
            return Err(Error::protocol(format!(
                "stage '{}' attempted to claim on {port} while already holding a buffer",
                self.name
            )));
        }

        let ready = self.broker.select_ready_ports(PortSet::only(port))?;
        if !ready.contains(port) {
            tracing::trace!(stage = %self.name, port = %port, "no buffer available");
            return Ok(false);
        }

        let Some(handle) = self.broker.claim_buffer(port)? else {
            return Ok(false);
        };

        if self.buffer_events {
            trace_claim(&self.name, port, &handle);
        }
        self.metrics.record_claim(port);
        if port == PortId::Input && handle.flags().is_eos() {
            self.state.eos_pending = true;
            self.state.input_closed = true;
        }
        *self.state.slot_mut(port) = Some(handle);
        Ok(true)
    }

    /// Hand the buffer held on `port` back to the broker.
    fn relinquish(&mut self, port: PortId) -> Result<()> {
        let Some(handle) = self.state.slot_mut(port).take() else {
            return Err(Error::protocol(format!(
                "stage '{}' attempted to relinquish on {port} without holding a buffer",
                self.name
            )));
        };

        if self.buffer_events {
            trace_relinquish(&self.name, port, &handle);
        }
        match self.broker.relinquish_buffer(port, handle) {
            Ok(()) => {
                self.metrics.record_relinquish(port);
                Ok(())
            }
            Err(rejected) => {
                // Ownership came back; keep holding the handle.
                trace_error(&self.name, &rejected.error);
                *self.state.slot_mut(port) = Some(rejected.handle);
                Err(rejected.error)
            }
        }
    }

    fn run_transform(&mut self) -> Result<()> {
        let result = self
            .transform
            .transform(self.state.input.as_mut(), self.state.output.as_mut());

        if let Err(e) = &result {
            self.metrics.record_transform_error();
            trace_error(&self.name, e);
        }
        result
    }

    /// Make as much progress as possible without blocking.
    ///
    /// Returns once a needed port has nothing to claim. A transform failure
    /// stops the loop with both handles still held.
    pub fn on_buffers_ready(&mut self) -> Result<Progress> {
        let mut progress = Progress::default();
        let mut iterations = 0usize;

        self.update_end_of_stream();

        loop {
            if let Some(max) = self.max_iterations
                && iterations >= max.get()
            {
                tracing::debug!(stage = %self.name, iterations, "iteration cap reached");
                progress.yielded = true;
                break;
            }

            if self.state.input.is_none() {
                if self.state.input_closed
                    || self.state.eos_propagated
                    || !self.claim(PortId::Input)?
                {
                    break;
                }
                progress.inputs_claimed += 1;
            }

            let mut released = false;

            if self.release_full_output && self.output_blocks_input() {
                self.relinquish(PortId::Output)?;
                progress.outputs_relinquished += 1;
                released = true;
            }

            if self.state.output.is_none() {
                if self.state.eos_propagated || !self.claim(PortId::Output)? {
                    break;
                }
                progress.outputs_claimed += 1;
            }

            iterations += 1;
            let before = self.state.fill();
            self.run_transform()?;
            progress.transforms += 1;
            let after = self.state.fill();
            self.record_bytes(before, after);

            if let Some(input) = self.state.input.as_mut()
                && input.filled_len() == 0
            {
                input.set_offset(0);
                self.relinquish(PortId::Input)?;
                progress.inputs_relinquished += 1;
                released = true;
                self.update_end_of_stream();
            }

            if !released && before == after {
                tracing::debug!(stage = %self.name, "transform made no progress, deferring");
                break;
            }
        }

        self.propagate_end_of_stream(&mut progress)?;

        Ok(progress)
    }

    /// Send the EOS flag downstream on the held output buffer.
    ///
    /// Does nothing unless the stream ended, the input is drained and an
    /// output buffer is held.
    fn propagate_end_of_stream(&mut self, progress: &mut Progress) -> Result<()> {
        if !self.eos_reached() || self.state.eos_propagated {
            return Ok(());
        }
        let Some(output) = self.state.output.as_mut() else {
            return Ok(());
        };

        output.flags_mut().set_eos(true);
        trace_eos(&self.name, output);
        if let Err(e) = self.relinquish(PortId::Output) {
            self.unmark_output_eos();
            return Err(e);
        }
        self.state.eos_propagated = true;
        self.metrics.record_eos();
        progress.outputs_relinquished += 1;
        progress.eos_propagated = true;
        Ok(())
    }

    fn unmark_output_eos(&mut self) {
        if let Some(output) = self.state.output.as_mut() {
            output.flags_mut().set_eos(false);
        }
    }

    /// End of stream was reached and no input is in flight.
    fn eos_reached(&self) -> bool {
        self.state.end_of_stream && self.state.input.is_none()
    }

    /// The held output is full while the held input still has bytes.
    fn output_blocks_input(&self) -> bool {
        let input_pending = self.state.input.as_ref().is_some_and(|h| !h.is_empty());
        input_pending && self.state.output.as_ref().is_some_and(BufferHandle::is_full)
    }

    /// Return every held buffer to the broker as-is.
    ///
    /// The output buffer only carries the EOS flag if end of stream was
    /// reached and not yet propagated. Both ports are attempted even if the
    /// first fails; the first error is returned.
    pub fn release_all(&mut self) -> Result<usize> {
        let mut released = 0;
        let mut first_err = None;
        let eos_reached = self.eos_reached();

        if self.state.input.is_some() {
            match self.relinquish(PortId::Input) {
                Ok(()) => released += 1,
                Err(e) => first_err = first_err.or(Some(e)),
            }
        }

        if let Some(output) = self.state.output.as_mut() {
            let mark_eos = eos_reached && !self.state.eos_propagated;
            if mark_eos {
                output.flags_mut().set_eos(true);
                trace_eos(&self.name, output);
            }
            match self.relinquish(PortId::Output) {
                Ok(()) => {
                    released += 1;
                    if mark_eos {
                        self.state.eos_propagated = true;
                        self.metrics.record_eos();
                    }
                }
                Err(e) => {
                    if mark_eos {
                        self.unmark_output_eos();
                    }
                    first_err = first_err.or(Some(e));
                }
            }
        }

        match first_err {
            Some(e) => Err(e),
            None => Ok(released),
        }
    }

    fn record_bytes(&self, before: FillSnapshot, after: FillSnapshot) {
        let consumed = match (before.input, after.input) {
            (Some((_, _, b)), Some((_, _, a))) => b.saturating_sub(a),
            _ => 0,
        };
        let produced = match (before.output, after.output) {
            (Some((_, _, b)), Some((_, _, a))) => a.saturating_sub(b),
            _ => 0,
        };
        self.metrics.record_bytes(consumed, produced);
    }
}

impl<B, T> std::fmt::Debug for StageController<B, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageController")
            .field("name", &self.name)
            .field("state", &self.state)
            .field("max_iterations", &self.max_iterations)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::QueueBroker;
    use crate::transform::{FnTransform, PassThrough};

    fn controller(broker: QueueBroker) -> StageController<QueueBroker, PassThrough> {
        StageController::new(broker, PassThrough::new(), &StageConfig::default())
    }

    fn input(data: &[u8]) -> BufferHandle {
        BufferHandle::with_data(64, data).unwrap()
    }

    fn output() -> BufferHandle {
        BufferHandle::new(64).unwrap()
    }

    #[test]
    fn test_claim_while_holding_is_protocol_violation() {
        let mut broker = QueueBroker::new();
        broker.supply(PortId::Input, input(b"a"));
        broker.supply(PortId::Input, input(b"b"));
        let mut ctl = controller(broker);

        assert!(ctl.claim(PortId::Input).unwrap());
        let err = ctl.claim(PortId::Input).unwrap_err();
        assert!(err.kind().is_fatal());
        assert_eq!(ctl.broker().outstanding(PortId::Input), 1);
    }

    #[test]
    fn test_relinquish_without_handle_is_protocol_violation() {
        let mut ctl = controller(QueueBroker::new());
        assert!(matches!(
            ctl.relinquish(PortId::Output),
            Err(Error::ProtocolViolation(_))
        ));
    }

    #[test]
    fn test_input_only_does_not_transform() {
        let mut broker = QueueBroker::new();
        broker.supply(PortId::Input, input(b"data"));
        let mut ctl = controller(broker);

        let progress = ctl.on_buffers_ready().unwrap();
        assert_eq!(progress.inputs_claimed, 1);
        assert_eq!(progress.transforms, 0);
        assert!(ctl.state().input_handle().is_some());
        assert!(ctl.state().output_handle().is_none());
    }

    #[test]
    fn test_eos_flag_on_input_ends_stream_after_drain() {
        let mut broker = QueueBroker::new();
        let mut last = input(b"tail");
        last.flags_mut().set_eos(true);
        broker.supply(PortId::Input, last);
        broker.supply(PortId::Output, output());
        let mut ctl = controller(broker);

        let progress = ctl.on_buffers_ready().unwrap();

        assert!(progress.eos_propagated);
        assert!(ctl.state().end_of_stream());
        assert!(!ctl.state().holds_any());

        let out = ctl.broker_mut().take_returned(PortId::Output).unwrap();
        assert!(out.flags().is_eos());
        assert_eq!(out.filled(), b"tail");
    }

    #[test]
    fn test_signal_eos_waits_for_input_drain() {
        let mut broker = QueueBroker::new();
        broker.supply(PortId::Input, input(b"0123456789"));
        broker.supply(PortId::Output, BufferHandle::new(4).unwrap());
        let mut ctl = StageController::new(
            broker,
            PassThrough::new(),
            &StageConfig::default().hold_full_output(),
        );

        ctl.on_buffers_ready().unwrap();
        ctl.signal_end_of_stream();
        // Six bytes are still waiting in the input buffer.
        assert!(!ctl.state().end_of_stream());
    }

    #[test]
    fn test_full_output_is_released_and_replaced() {
        let mut broker = QueueBroker::new();
        broker.supply(PortId::Input, input(b"0123456789"));
        broker.supply(PortId::Output, BufferHandle::new(4).unwrap());
        broker.supply(PortId::Output, BufferHandle::new(4).unwrap());
        broker.supply(PortId::Output, BufferHandle::new(4).unwrap());
        let mut ctl = controller(broker);

        let progress = ctl.on_buffers_ready().unwrap();

        assert_eq!(progress.outputs_claimed, 3);
        assert_eq!(progress.outputs_relinquished, 2);
        assert_eq!(progress.inputs_relinquished, 1);

        let returned = ctl.broker_mut().drain_returned(PortId::Output);
        let bytes: Vec<u8> = returned.iter().flat_map(|h| h.filled().to_vec()).collect();
        assert_eq!(bytes, b"01234567");
        assert_eq!(ctl.state().output_handle().unwrap().filled(), b"89");
    }

    #[test]
    fn test_stalled_transform_defers() {
        let mut broker = QueueBroker::new();
        broker.supply(PortId::Input, input(b"stuck"));
        broker.supply(PortId::Output, output());
        let idle = FnTransform::new("idle", |_i, _o| Ok(()));
        let mut ctl = StageController::new(broker, idle, &StageConfig::default());

        let progress = ctl.on_buffers_ready().unwrap();
        assert_eq!(progress.transforms, 1);
        assert!(ctl.state().input_handle().is_some());
        assert!(ctl.state().output_handle().is_some());
    }

    #[test]
    fn test_iteration_cap_yields() {
        let mut broker = QueueBroker::new();
        for i in 0..5u8 {
            broker.supply(PortId::Input, input(&[i]));
        }
        broker.supply(PortId::Output, output());
        let config = StageConfig::default().with_max_iterations(NonZeroUsize::new(2).unwrap());
        let mut ctl = StageController::new(broker, PassThrough::new(), &config);

        let progress = ctl.on_buffers_ready().unwrap();
        assert!(progress.yielded);
        assert_eq!(progress.transforms, 2);
        assert_eq!(ctl.broker().available(PortId::Input), 3);

        let progress = ctl.on_buffers_ready().unwrap();
        assert_eq!(progress.transforms, 2);
    }

    #[test]
    fn test_transform_failure_keeps_handles() {
        let mut broker = QueueBroker::new();
        broker.supply(PortId::Input, input(b"corrupt"));
        broker.supply(PortId::Output, output());
        let failing = FnTransform::new("failing", |_i, _o| {
            Err(Error::TransformFailure("bad chunk header".into()))
        });
        let mut ctl = StageController::new(broker, failing, &StageConfig::default());

        let err = ctl.on_buffers_ready().unwrap_err();
        assert!(matches!(err, Error::TransformFailure(_)));
        assert!(ctl.state().input_handle().is_some());
        assert!(ctl.state().output_handle().is_some());
        assert_eq!(ctl.broker().returned(PortId::Input), 0);
    }

    #[test]
    fn test_release_all_returns_partial_buffers() {
        let mut broker = QueueBroker::new();
        broker.supply(PortId::Input, input(b"0123456789"));
        broker.supply(PortId::Output, BufferHandle::new(4).unwrap());
        let mut ctl = StageController::new(
            broker,
            PassThrough::new(),
            &StageConfig::default().hold_full_output(),
        );
        ctl.on_buffers_ready().unwrap();

        assert_eq!(ctl.release_all().unwrap(), 2);
        assert!(!ctl.state().holds_any());
        assert!(ctl.broker().is_balanced());

        let returned_input = ctl.broker_mut().take_returned(PortId::Input).unwrap();
        assert_eq!(returned_input.filled(), b"456789");
        let returned_output = ctl.broker_mut().take_returned(PortId::Output).unwrap();
        assert!(!returned_output.flags().is_eos());
    }

    #[test]
    fn test_signalled_eos_drains_available_input() {
        let mut broker = QueueBroker::new();
        broker.supply(PortId::Input, input(b"0123456789"));
        broker.supply(PortId::Output, output());
        let mut ctl = controller(broker);

        ctl.signal_end_of_stream();
        let progress = ctl.on_buffers_ready().unwrap();

        assert_eq!(progress.inputs_claimed, 1);
        assert_eq!(progress.transforms, 1);
        assert!(progress.eos_propagated);
        assert_eq!(ctl.broker().available(PortId::Input), 0);

        let out = ctl.broker_mut().take_returned(PortId::Output).unwrap();
        assert_eq!(out.filled(), b"0123456789");
        assert!(out.flags().is_eos());
    }

    #[test]
    fn test_eos_without_held_output_claims_nothing() {
        let mut broker = QueueBroker::new();
        broker.supply(PortId::Output, output());
        let mut ctl = controller(broker);

        ctl.signal_end_of_stream();
        let progress = ctl.on_buffers_ready().unwrap();

        assert!(progress.is_idle());
        assert!(ctl.state().end_of_stream());
        assert!(!ctl.state().eos_propagated());
        assert_eq!(ctl.broker().available(PortId::Output), 1);
    }

    #[test]
    fn test_nothing_claimed_after_eos_propagated() {
        let mut broker = QueueBroker::new();
        broker.supply(PortId::Input, input(b"data"));
        broker.supply(PortId::Output, output());
        let mut ctl = controller(broker);

        ctl.signal_end_of_stream();
        assert!(ctl.on_buffers_ready().unwrap().eos_propagated);

        ctl.broker_mut().supply(PortId::Output, output());
        ctl.broker_mut().supply(PortId::Input, input(b"late"));
        let progress = ctl.on_buffers_ready().unwrap();
        assert!(progress.is_idle());
        assert_eq!(ctl.broker().available(PortId::Output), 1);
        assert_eq!(ctl.broker().available(PortId::Input), 1);
    }

    #[test]
    fn test_input_after_eos_flag_is_not_claimed() {
        let mut broker = QueueBroker::new();
        let mut last = input(b"end");
        last.flags_mut().set_eos(true);
        broker.supply(PortId::Input, last);
        broker.supply(PortId::Input, input(b"next stream"));
        let mut ctl = controller(broker);

        ctl.on_buffers_ready().unwrap();
        ctl.broker_mut().supply(PortId::Output, output());
        let progress = ctl.on_buffers_ready().unwrap();

        assert!(progress.eos_propagated);
        assert_eq!(ctl.broker().available(PortId::Input), 1);
    }

    #[test]
    fn test_release_all_keeps_eos_for_undrained_input() {
        let mut broker = QueueBroker::new();
        let mut last = input(&[7u8; 40]);
        last.flags_mut().set_eos(true);
        broker.supply(PortId::Input, last);
        broker.supply(PortId::Output, BufferHandle::new(16).unwrap());
        let mut ctl = StageController::new(
            broker,
            PassThrough::new(),
            &StageConfig::default().hold_full_output(),
        );
        ctl.on_buffers_ready().unwrap();
        assert!(!ctl.state().end_of_stream());

        assert_eq!(ctl.release_all().unwrap(), 2);
        assert!(!ctl.state().end_of_stream());
        assert!(!ctl.state().eos_propagated());

        let returned_input = ctl.broker_mut().take_returned(PortId::Input).unwrap();
        assert_eq!(returned_input.filled_len(), 24);
        let returned_output = ctl.broker_mut().take_returned(PortId::Output).unwrap();
        assert_eq!(returned_output.filled_len(), 16);
        assert!(!returned_output.flags().is_eos());
    }

    #[test]
    fn test_release_all_marks_reached_eos() {
        let mut broker = QueueBroker::new();
        broker.supply(PortId::Input, input(b"data"));
        broker.supply(PortId::Output, output());
        let mut ctl = StageController::new(
            broker,
            PassThrough::new(),
            &StageConfig::default().with_max_iterations(NonZeroUsize::new(1).unwrap()),
        );

        ctl.on_buffers_ready().unwrap();
        ctl.signal_end_of_stream();
        assert!(ctl.state().end_of_stream());

        assert_eq!(ctl.release_all().unwrap(), 1);
        assert!(ctl.state().eos_propagated());
        let out = ctl.broker_mut().take_returned(PortId::Output).unwrap();
        assert!(out.flags().is_eos());
    }

    /// Broker that refuses every relinquish on one port.
    struct RefusingBroker {
        inner: QueueBroker,
        refuse: PortId,
    }

    impl PortBroker for RefusingBroker {
        fn select_ready_ports(&mut self, interest: PortSet) -> Result<PortSet> {
            self.inner.select_ready_ports(interest)
        }

        fn claim_buffer(&mut self, port: PortId) -> Result<Option<BufferHandle>> {
            self.inner.claim_buffer(port)
        }

        fn relinquish_buffer(
            &mut self,
            port: PortId,
            handle: BufferHandle,
        ) -> crate::broker::RelinquishResult {
            if port == self.refuse {
                return Err(crate::broker::Rejected {
                    error: Error::protocol("port closed"),
                    handle,
                });
            }
            self.inner.relinquish_buffer(port, handle)
        }
    }

    #[test]
    fn test_rejected_relinquish_keeps_handle() {
        let mut inner = QueueBroker::new();
        inner.supply(PortId::Input, input(b"data"));
        inner.supply(PortId::Output, output());
        let broker = RefusingBroker {
            inner,
            refuse: PortId::Input,
        };
        let mut ctl = StageController::new(broker, PassThrough::new(), &StageConfig::default());

        let err = ctl.on_buffers_ready().unwrap_err();
        assert!(err.kind().is_fatal());

        // The exhausted input is still held, not lost.
        let held = ctl.state().input_handle().unwrap();
        assert_eq!(held.filled_len(), 0);
        assert!(ctl.state().output_handle().is_some());
        assert_eq!(ctl.broker().inner.outstanding(PortId::Input), 1);

        // Stop returns what it can and reports the refusal.
        assert!(ctl.release_all().is_err());
        assert!(ctl.state().input_handle().is_some());
        assert!(ctl.state().output_handle().is_none());
        assert_eq!(ctl.broker().inner.returned(PortId::Output), 1);
    }
}
