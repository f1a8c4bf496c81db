//! Port buffer broker.
//!
//! The broker owns the buffer queues of each port. A stage asks it which
//! ports have buffers available, claims buffers (ownership moves to the
//! stage) and relinquishes them (ownership moves back).
//!
//! - [`PortBroker`]: the interface a stage consumes
//! - [`QueueBroker`]: an in-process broker with per-port FIFO queues and
//!   claim accounting
//!
//! # Example
//!
//! ```rust
//! use webpd::broker::{PortBroker, QueueBroker};
//! use webpd::buffer::BufferHandle;
//! use webpd::port::{PortId, PortSet};
//!
//! let mut broker = QueueBroker::new();
//! broker.supply(PortId::Input, BufferHandle::with_data(64, b"RIFF").unwrap());
//!
//! let ready = broker.select_ready_ports(PortSet::all()).unwrap();
//! assert!(ready.contains(PortId::Input));
//!
//! let handle = broker.claim_buffer(PortId::Input).unwrap().unwrap();
//! broker.relinquish_buffer(PortId::Input, handle).unwrap();
//!
//! // A handle the broker never handed out comes back with the error.
//! let stray = BufferHandle::new(8).unwrap();
//! let rejected = broker.relinquish_buffer(PortId::Input, stray).unwrap_err();
//! assert_eq!(rejected.handle.capacity(), 8);
//! assert_eq!(broker.returned(PortId::Input), 1);
//! ```

mod queue;

pub use queue::{BrokerStats, PortStats, QueueBroker};

use crate::buffer::BufferHandle;
use crate::error::{Error, Result};
use crate::port::{PortId, PortSet};

/// A relinquish the broker refused, with the handle given back.
///
/// The caller still owns `handle` and must keep it or retry.
#[derive(Debug, thiserror::Error)]
#[error("relinquish rejected: {error}")]
pub struct Rejected {
    /// Why the broker refused the handle.
    #[source]
    pub error: Error,
    /// The handle, unchanged.
    pub handle: BufferHandle,
}

/// Result of [`PortBroker::relinquish_buffer`].
pub type RelinquishResult = std::result::Result<(), Rejected>;

/// Buffer exchange interface between a stage and its pipeline.
///
/// All operations are non-blocking. A port with nothing to claim is
/// reported as `Ok(None)` from [`claim_buffer`](Self::claim_buffer), which is
/// not an error. `Err` is reserved for broker faults and misuse.
pub trait PortBroker {
    /// Report which ports in `interest` have at least one buffer available.
    fn select_ready_ports(&mut self, interest: PortSet) -> Result<PortSet>;

    /// Claim one buffer from `port`, transferring ownership to the caller.
    fn claim_buffer(&mut self, port: PortId) -> Result<Option<BufferHandle>>;

    /// Return a buffer previously claimed on `port`.
    ///
    /// On failure ownership stays with the caller through [`Rejected`].
    fn relinquish_buffer(&mut self, port: PortId, handle: BufferHandle) -> RelinquishResult;
}

impl<B: PortBroker + ?Sized> PortBroker for &mut B {
    fn select_ready_ports(&mut self, interest: PortSet) -> Result<PortSet> {
        (**self).select_ready_ports(interest)
    }

    fn claim_buffer(&mut self, port: PortId) -> Result<Option<BufferHandle>> {
        (**self).claim_buffer(port)
    }

    fn relinquish_buffer(&mut self, port: PortId, handle: BufferHandle) -> RelinquishResult {
        (**self).relinquish_buffer(port, handle)
    }
}

impl<B: PortBroker + ?Sized> PortBroker for Box<B> {
    fn select_ready_ports(&mut self, interest: PortSet) -> Result<PortSet> {
        (**self).select_ready_ports(interest)
    }

    fn claim_buffer(&mut self, port: PortId) -> Result<Option<BufferHandle>> {
        (**self).claim_buffer(port)
    }

    fn relinquish_buffer(&mut self, port: PortId, handle: BufferHandle) -> RelinquishResult {
        (**self).relinquish_buffer(port, handle)
    }
}
