//! Buffer handles exchanged between the broker and the stage.
//!
//! A [`BufferHandle`] owns a fixed-capacity byte region plus its fill state
//! (`offset`, `filled_len`) and [`Metadata`]. Handles are deliberately not
//! `Clone`: claiming moves one out of the broker, relinquishing moves it
//! back, so a handle can never be reachable from both sides at once.
//!
//! ```text
//!  0        offset        offset + filled_len          capacity
//!  |----------|====== filled ======|------ remaining ------|
//! ```

use crate::error::{Error, Result};
use crate::metadata::{BufferFlags, Metadata};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_BUFFER_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a buffer handle, stable across claim/relinquish cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(u64);

impl BufferId {
    fn next() -> Self {
        Self(NEXT_BUFFER_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw numeric value.
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for BufferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Exclusive handle to a fixed-capacity buffer.
pub struct BufferHandle {
    id: BufferId,
    /// Backing storage; its length is the capacity and never changes.
    data: Box<[u8]>,
    /// Start of valid data.
    offset: usize,
    /// Bytes of valid data starting at `offset`.
    filled_len: usize,
    metadata: Metadata,
}

impl BufferHandle {
    /// Allocate an empty, zeroed buffer.
    ///
    /// # Errors
    ///
    /// Returns an error if `capacity` is 0.
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(Error::AllocationFailed(
                "buffer capacity must be greater than 0".into(),
            ));
        }

        Ok(Self {
            id: BufferId::next(),
            data: vec![0u8; capacity].into_boxed_slice(),
            offset: 0,
            filled_len: 0,
            metadata: Metadata::new(),
        })
    }

    /// Allocate a buffer of `capacity` bytes pre-filled with `bytes`.
    ///
    /// # Errors
    ///
    /// Returns an error if `capacity` is 0 or smaller than `bytes`.
    pub fn with_data(capacity: usize, bytes: &[u8]) -> Result<Self> {
        if bytes.len() > capacity {
            return Err(Error::AllocationFailed(format!(
                "{} bytes do not fit a buffer of capacity {}",
                bytes.len(),
                capacity
            )));
        }
        let mut handle = Self::new(capacity)?;
        handle.append(bytes);
        Ok(handle)
    }

    /// Buffer identity.
    #[inline]
    pub fn id(&self) -> BufferId {
        self.id
    }

    /// Total capacity in bytes.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Offset of the first valid byte.
    #[inline]
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Number of valid bytes.
    #[inline]
    pub fn filled_len(&self) -> usize {
        self.filled_len
    }

    /// Check if the buffer holds no valid data.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.filled_len == 0
    }

    /// Bytes that can still be appended after the valid region.
    #[inline]
    pub fn remaining_capacity(&self) -> usize {
        self.capacity() - (self.offset + self.filled_len)
    }

    /// Check if nothing more can be appended.
    #[inline]
    pub fn is_full(&self) -> bool {
        self.remaining_capacity() == 0
    }

    /// The valid bytes.
    pub fn filled(&self) -> &[u8] {
        &self.data[self.offset..self.offset + self.filled_len]
    }

    /// The whole backing region, regardless of fill state.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// The whole backing region, mutably.
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Set the offset of the valid region.
    ///
    /// # Panics
    ///
    /// Panics if `offset + filled_len` would exceed the capacity.
    pub fn set_offset(&mut self, offset: usize) {
        assert!(
            offset + self.filled_len <= self.capacity(),
            "offset exceeds buffer capacity"
        );
        self.offset = offset;
    }

    /// Set the number of valid bytes after the offset.
    ///
    /// # Panics
    ///
    /// Panics if `offset + len` would exceed the capacity.
    pub fn set_filled_len(&mut self, len: usize) {
        assert!(
            self.offset + len <= self.capacity(),
            "length exceeds buffer capacity"
        );
        self.filled_len = len;
    }

    /// Mark up to `n` leading valid bytes as consumed.
    ///
    /// Returns the number of bytes actually consumed.
    pub fn consume(&mut self, n: usize) -> usize {
        let n = n.min(self.filled_len);
        self.offset += n;
        self.filled_len -= n;
        n
    }

    /// Append bytes after the valid region, as many as fit.
    ///
    /// Returns the number of bytes written.
    pub fn append(&mut self, bytes: &[u8]) -> usize {
        let n = bytes.len().min(self.remaining_capacity());
        let start = self.offset + self.filled_len;
        self.data[start..start + n].copy_from_slice(&bytes[..n]);
        self.filled_len += n;
        n
    }

    /// Drop all valid data and flags, keeping identity and capacity.
    pub fn reset(&mut self) {
        self.offset = 0;
        self.filled_len = 0;
        self.metadata = Metadata::new();
    }

    /// Buffer metadata.
    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// Mutable buffer metadata.
    pub fn metadata_mut(&mut self) -> &mut Metadata {
        &mut self.metadata
    }

    /// Buffer flags.
    pub fn flags(&self) -> &BufferFlags {
        &self.metadata.flags
    }

    /// Mutable buffer flags.
    pub fn flags_mut(&mut self) -> &mut BufferFlags {
        &mut self.metadata.flags
    }
}

impl fmt::Debug for BufferHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferHandle")
            .field("id", &self.id)
            .field("capacity", &self.capacity())
            .field("offset", &self.offset)
            .field("filled_len", &self.filled_len)
            .field("flags", &self.metadata.flags)
            .finish()
    }
}
