//! In-process broker with per-port FIFO queues.

use super::{PortBroker, Rejected, RelinquishResult};
use crate::buffer::{BufferHandle, BufferId};
use crate::error::{Error, Result};
use crate::port::{PortId, PortSet};
use std::collections::{HashSet, VecDeque};

/// Statistics about one port's buffer traffic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PortStats {
    /// Buffers waiting to be claimed.
    pub available: usize,
    /// Buffers currently claimed and not yet relinquished.
    pub outstanding: usize,
    /// Relinquished buffers not yet taken by the downstream side.
    pub returned: usize,
    /// Total successful claims.
    pub claims: u64,
    /// Total relinquishes.
    pub relinquishes: u64,
    /// Relinquished buffers that carried the EOS flag.
    pub eos_returned: u64,
}

/// Statistics for both ports.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BrokerStats {
    /// Input port statistics.
    pub input: PortStats,
    /// Output port statistics.
    pub output: PortStats,
}

impl BrokerStats {
    /// Statistics of a single port.
    pub fn port(&self, port: PortId) -> &PortStats {
        match port {
            PortId::Input => &self.input,
            PortId::Output => &self.output,
        }
    }
}

#[derive(Default)]
struct PortQueue {
    available: VecDeque<BufferHandle>,
    returned: VecDeque<BufferHandle>,
    outstanding: HashSet<BufferId>,
    claims: u64,
    relinquishes: u64,
    eos_returned: u64,
}

impl PortQueue {
    fn stats(&self) -> PortStats {
        PortStats {
            available: self.available.len(),
            outstanding: self.outstanding.len(),
            returned: self.returned.len(),
            claims: self.claims,
            relinquishes: self.relinquishes,
            eos_returned: self.eos_returned,
        }
    }
}

/// A broker holding buffers in memory, one FIFO per port.
///
/// The host side feeds buffers with [`supply`](Self::supply) and collects
/// what the stage relinquished with [`take_returned`](Self::take_returned).
/// Every claim is recorded so that relinquishing a foreign handle, or a
/// handle on the wrong port, is caught as a protocol violation.
#[derive(Default)]
pub struct QueueBroker {
    ports: [PortQueue; 2],
}

impl QueueBroker {
    /// Create an empty broker.
    pub fn new() -> Self {
        Self::default()
    }

    fn queue(&self, port: PortId) -> &PortQueue {
        &self.ports[port.index()]
    }

    fn queue_mut(&mut self, port: PortId) -> &mut PortQueue {
        &mut self.ports[port.index()]
    }

    /// Make a buffer available for claiming on `port`.
    pub fn supply(&mut self, port: PortId, handle: BufferHandle) {
        self.queue_mut(port).available.push_back(handle);
    }

    /// Number of buffers waiting to be claimed on `port`.
    pub fn available(&self, port: PortId) -> usize {
        self.queue(port).available.len()
    }

    /// Number of buffers claimed on `port` and not yet relinquished.
    pub fn outstanding(&self, port: PortId) -> usize {
        self.queue(port).outstanding.len()
    }

    /// Number of relinquished buffers waiting on `port`.
    pub fn returned(&self, port: PortId) -> usize {
        self.queue(port).returned.len()
    }

    /// Take the oldest relinquished buffer of `port`.
    pub fn take_returned(&mut self, port: PortId) -> Option<BufferHandle> {
        self.queue_mut(port).returned.pop_front()
    }

    /// Take every relinquished buffer of `port`, oldest first.
    pub fn drain_returned(&mut self, port: PortId) -> Vec<BufferHandle> {
        self.queue_mut(port).returned.drain(..).collect()
    }

    /// Reset every relinquished buffer of `port` and make it available again.
    ///
    /// Returns the number of buffers recycled.
    pub fn recycle(&mut self, port: PortId) -> usize {
        let queue = self.queue_mut(port);
        let count = queue.returned.len();
        while let Some(mut handle) = queue.returned.pop_front() {
            handle.reset();
            queue.available.push_back(handle);
        }
        count
    }

    /// Check that no buffer is claimed on either port.
    pub fn is_balanced(&self) -> bool {
        self.ports.iter().all(|q| q.outstanding.is_empty())
    }

    /// Get broker statistics.
    pub fn stats(&self) -> BrokerStats {
        BrokerStats {
            input: self.queue(PortId::Input).stats(),
            output: self.queue(PortId::Output).stats(),
        }
    }
}

impl PortBroker for QueueBroker {
    fn select_ready_ports(&mut self, interest: PortSet) -> Result<PortSet> {
        Ok(interest
            .iter()
            .filter(|port| !self.queue(*port).available.is_empty())
            .collect())
    }

    fn claim_buffer(&mut self, port: PortId) -> Result<Option<BufferHandle>> {
        let queue = self.queue_mut(port);
        let Some(handle) = queue.available.pop_front() else {
            return Ok(None);
        };

        queue.outstanding.insert(handle.id());
        queue.claims += 1;
        Ok(Some(handle))
    }

    fn relinquish_buffer(&mut self, port: PortId, handle: BufferHandle) -> RelinquishResult {
        let id = handle.id();

        if !self.queue_mut(port).outstanding.remove(&id) {
            let other = match port {
                PortId::Input => PortId::Output,
                PortId::Output => PortId::Input,
            };
            let reason = if self.queue(other).outstanding.contains(&id) {
                format!("buffer {id} relinquished on {port} but was claimed on {other}")
            } else {
                format!("buffer {id} relinquished on {port} was never claimed")
            };
            return Err(Rejected {
                error: Error::ProtocolViolation(reason),
                handle,
            });
        }

        let queue = self.queue_mut(port);
        queue.relinquishes += 1;
        if handle.flags().is_eos() {
            queue.eos_returned += 1;
        }
        queue.returned.push_back(handle);
        Ok(())
    }
}

impl std::fmt::Debug for QueueBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueBroker")
            .field("stats", &self.stats())
            .finish()
    }
}
