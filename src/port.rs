//! Port identifiers for a two-port stage.
//!
//! A processor stage has exactly one input port (index 0) and one output
//! port (index 1). [`PortSet`] is the mask type used when asking the broker
//! which ports have buffers available.

use smallvec::SmallVec;
use std::fmt;

/// Identifier of a stage port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PortId {
    /// The input port (receives encoded data).
    Input,
    /// The output port (receives decoded data).
    Output,
}

impl PortId {
    /// All ports of the stage, in index order.
    pub const ALL: [PortId; 2] = [PortId::Input, PortId::Output];

    /// Numeric port index (input = 0, output = 1).
    #[inline]
    pub fn index(&self) -> usize {
        match self {
            Self::Input => 0,
            Self::Output => 1,
        }
    }

    /// Look up a port by its numeric index.
    pub fn from_index(index: usize) -> Option<Self> {
        match index {
            0 => Some(Self::Input),
            1 => Some(Self::Output),
            _ => None,
        }
    }

    #[inline]
    fn bit(&self) -> u8 {
        1 << self.index()
    }
}

impl fmt::Display for PortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Input => write!(f, "input(0)"),
            Self::Output => write!(f, "output(1)"),
        }
    }
}

/// A set of ports, stored as a bitmask.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct PortSet(u8);

impl PortSet {
    /// The empty set.
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Both ports.
    pub const fn all() -> Self {
        Self(0b11)
    }

    /// A set with a single port.
    pub fn only(port: PortId) -> Self {
        Self(port.bit())
    }

    /// Add a port to the set.
    pub fn insert(&mut self, port: PortId) {
        self.0 |= port.bit();
    }

    /// Check whether the set contains a port.
    #[inline]
    pub fn contains(&self, port: PortId) -> bool {
        self.0 & port.bit() != 0
    }

    /// Check whether the set is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Iterate the ports in index order.
    pub fn iter(&self) -> impl Iterator<Item = PortId> {
        let set = *self;
        PortId::ALL.into_iter().filter(move |p| set.contains(*p))
    }
}

impl FromIterator<PortId> for PortSet {
    fn from_iter<I: IntoIterator<Item = PortId>>(iter: I) -> Self {
        let mut set = Self::empty();
        for port in iter {
            set.insert(port);
        }
        set
    }
}

/// Target of a per-port lifecycle operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PortScope {
    /// Every port of the stage.
    All,
    /// A single port.
    Port(PortId),
}

impl PortScope {
    /// The ports this scope covers.
    pub fn ports(&self) -> SmallVec<[PortId; 2]> {
        match self {
            Self::All => SmallVec::from_buf(PortId::ALL),
            Self::Port(port) => smallvec::smallvec![*port],
        }
    }
}

impl From<PortId> for PortScope {
    fn from(port: PortId) -> Self {
        Self::Port(port)
    }
}

impl fmt::Display for PortScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => write!(f, "all"),
            Self::Port(port) => write!(f, "{port}"),
        }
    }
}
