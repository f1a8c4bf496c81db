//! Per-port resource lifecycle.
//!
//! Each port moves through the phases below. Buffer-ready handling is only
//! eligible once every port is [`Transferring`](PortPhase::Transferring).
//!
//! ```text
//!              allocate          prepare          transfer
//! Unallocated ----------> Allocated -------> Prepared -------> Transferring
//!      ^                      ^                  |                  |
//!      |                      |   allocate       | stop             | stop
//!      |                      +------------ Stopped <---------------+
//!      |                                       |
//!      +------------------ deallocate ---------+
//! ```
//!
//! `deallocate` is accepted from every phase except `Transferring`, so it
//! also cleans up after a partially failed allocation.

use crate::error::{Error, Result};
use crate::port::{PortId, PortScope};
use smallvec::SmallVec;
use std::fmt;

/// Lifecycle phase of one port.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum PortPhase {
    /// No resources held.
    #[default]
    Unallocated,
    /// Resources acquired, buffer exchange not yet prepared.
    Allocated,
    /// Ready to exchange buffers; no claims yet.
    Prepared,
    /// Actively exchanging buffers.
    Transferring,
    /// Buffer exchange stopped; held buffers returned.
    Stopped,
}

impl PortPhase {
    /// Check if state transition is valid for the named operation.
    pub fn can_transition_to(&self, next: Self) -> bool {
        use PortPhase::*;
        matches!(
            (self, next),
            (Unallocated, Allocated)
                | (Stopped, Allocated)
                | (Allocated, Allocated)
                | (Allocated, Prepared)
                | (Prepared, Prepared)
                | (Prepared, Transferring)
                | (Transferring, Transferring)
                | (Allocated, Stopped)
                | (Prepared, Stopped)
                | (Transferring, Stopped)
                | (Stopped, Stopped)
                | (Unallocated, Unallocated)
                | (Allocated, Unallocated)
                | (Prepared, Unallocated)
                | (Stopped, Unallocated)
        )
    }
}

impl fmt::Display for PortPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unallocated => write!(f, "Unallocated"),
            Self::Allocated => write!(f, "Allocated"),
            Self::Prepared => write!(f, "Prepared"),
            Self::Transferring => write!(f, "Transferring"),
            Self::Stopped => write!(f, "Stopped"),
        }
    }
}

/// Lifecycle state machine for both ports of a stage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Lifecycle {
    ports: [PortPhase; 2],
}

impl Lifecycle {
    /// Create a lifecycle with every port unallocated.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current phase of a port.
    pub fn phase(&self, port: PortId) -> PortPhase {
        self.ports[port.index()]
    }

    /// Move every port in `scope` to `next`, or none of them.
    ///
    /// Returns the ports whose phase actually changed.
    fn transition(
        &mut self,
        operation: &'static str,
        scope: PortScope,
        next: PortPhase,
    ) -> Result<SmallVec<[PortId; 2]>> {
        let ports = scope.ports();
        for port in &ports {
            let phase = self.phase(*port);
            if !phase.can_transition_to(next) {
                return Err(Error::LifecycleOrderViolation { operation, phase });
            }
        }

        let mut changed = SmallVec::new();
        for port in ports {
            let slot = &mut self.ports[port.index()];
            if *slot != next {
                *slot = next;
                changed.push(port);
            }
        }
        Ok(changed)
    }

    /// Record resource allocation. Idempotent per port.
    pub fn allocate(&mut self, scope: PortScope) -> Result<SmallVec<[PortId; 2]>> {
        self.transition("allocate_resources", scope, PortPhase::Allocated)
    }

    /// Record readiness to exchange buffers.
    pub fn prepare(&mut self, scope: PortScope) -> Result<SmallVec<[PortId; 2]>> {
        self.transition("prepare_to_transfer", scope, PortPhase::Prepared)
    }

    /// Record that buffer exchange has started.
    pub fn transfer(&mut self, scope: PortScope) -> Result<SmallVec<[PortId; 2]>> {
        self.transition("transfer_and_process", scope, PortPhase::Transferring)
    }

    /// Stop every port that holds resources.
    ///
    /// Fails if no port was ever allocated.
    pub fn stop(&mut self) -> Result<SmallVec<[PortId; 2]>> {
        let active: SmallVec<[PortId; 2]> = PortId::ALL
            .into_iter()
            .filter(|p| self.phase(*p) != PortPhase::Unallocated)
            .collect();
        if active.is_empty() {
            return Err(Error::LifecycleOrderViolation {
                operation: "stop_and_return",
                phase: PortPhase::Unallocated,
            });
        }

        let mut changed = SmallVec::new();
        for port in active {
            changed.extend(self.transition("stop_and_return", port.into(), PortPhase::Stopped)?);
        }
        Ok(changed)
    }

    /// Release every port back to `Unallocated`.
    pub fn deallocate(&mut self) -> Result<SmallVec<[PortId; 2]>> {
        self.transition("deallocate_resources", PortScope::All, PortPhase::Unallocated)
    }

    /// Put a port back into `phase` after a failed operation.
    pub(crate) fn restore(&mut self, port: PortId, phase: PortPhase) {
        self.ports[port.index()] = phase;
    }

    /// Check that buffer-ready handling may run.
    pub fn ensure_transferring(&self, operation: &'static str) -> Result<()> {
        match PortId::ALL
            .into_iter()
            .map(|p| self.phase(p))
            .find(|phase| *phase != PortPhase::Transferring)
        {
            Some(phase) => Err(Error::LifecycleOrderViolation { operation, phase }),
            None => Ok(()),
        }
    }

    /// Check if buffer-ready handling may run.
    pub fn is_transferring(&self) -> bool {
        self.ensure_transferring("is_transferring").is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn running() -> Lifecycle {
        let mut lc = Lifecycle::new();
        lc.allocate(PortScope::All).unwrap();
        lc.prepare(PortScope::All).unwrap();
        lc.transfer(PortScope::All).unwrap();
        lc
    }

    #[test]
    fn test_full_cycle() {
        let mut lc = running();
        assert!(lc.is_transferring());

        lc.stop().unwrap();
        assert_eq!(lc.phase(PortId::Input), PortPhase::Stopped);
        assert!(!lc.is_transferring());

        lc.deallocate().unwrap();
        assert_eq!(lc, Lifecycle::new());
    }

    #[test]
    fn test_allocate_is_idempotent() {
        let mut lc = Lifecycle::new();
        let changed = lc.allocate(PortId::Input.into()).unwrap();
        assert_eq!(changed.as_slice(), &[PortId::Input]);

        let changed = lc.allocate(PortId::Input.into()).unwrap();
        assert!(changed.is_empty());
        assert_eq!(lc.phase(PortId::Output), PortPhase::Unallocated);
    }

    #[test]
    fn test_prepare_requires_allocation() {
        let mut lc = Lifecycle::new();
        let err = lc.prepare(PortScope::All).unwrap_err();
        assert!(matches!(
            err,
            Error::LifecycleOrderViolation {
                operation: "prepare_to_transfer",
                phase: PortPhase::Unallocated
            }
        ));
    }

    #[test]
    fn test_scope_transition_is_all_or_nothing() {
        let mut lc = Lifecycle::new();
        lc.allocate(PortId::Input.into()).unwrap();

        assert!(lc.prepare(PortScope::All).is_err());
        assert_eq!(lc.phase(PortId::Input), PortPhase::Allocated);
    }

    #[test]
    fn test_transfer_after_stop_needs_fresh_cycle() {
        let mut lc = running();
        lc.stop().unwrap();

        assert!(lc.transfer(PortScope::All).is_err());
        assert!(lc.prepare(PortScope::All).is_err());

        lc.allocate(PortScope::All).unwrap();
        lc.prepare(PortScope::All).unwrap();
        lc.transfer(PortScope::All).unwrap();
        assert!(lc.is_transferring());
    }

    #[test]
    fn test_partial_transfer_is_not_eligible() {
        let mut lc = Lifecycle::new();
        lc.allocate(PortScope::All).unwrap();
        lc.prepare(PortScope::All).unwrap();
        lc.transfer(PortId::Input.into()).unwrap();

        let err = lc.ensure_transferring("on_buffers_ready").unwrap_err();
        assert!(matches!(
            err,
            Error::LifecycleOrderViolation {
                phase: PortPhase::Prepared,
                ..
            }
        ));
    }

    #[test]
    fn test_stop_without_allocation_fails() {
        let mut lc = Lifecycle::new();
        assert!(lc.stop().is_err());
    }

    #[test]
    fn test_deallocate_rejected_while_transferring() {
        let mut lc = running();
        assert!(lc.deallocate().is_err());
    }

    #[test]
    fn test_deallocate_after_partial_allocation() {
        let mut lc = Lifecycle::new();
        lc.allocate(PortId::Output.into()).unwrap();
        lc.deallocate().unwrap();
        assert_eq!(lc.phase(PortId::Output), PortPhase::Unallocated);
    }
}
