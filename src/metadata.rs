//! Buffer metadata types.

use std::time::Duration;

/// Flags indicating buffer properties.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BufferFlags {
    /// Buffer marks end of stream.
    pub eos: bool,
}

impl BufferFlags {
    /// Set the end-of-stream flag.
    pub fn set_eos(&mut self, value: bool) {
        self.eos = value;
    }

    /// Check if end-of-stream flag is set.
    pub fn is_eos(&self) -> bool {
        self.eos
    }

    /// Clear every flag.
    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

/// Metadata associated with a buffer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Metadata {
    /// Presentation timestamp.
    pub pts: Option<Duration>,

    /// Monotonic sequence number within a stream.
    pub sequence: u64,

    /// Buffer flags.
    pub flags: BufferFlags,
}

impl Metadata {
    /// Create new metadata with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create metadata with a sequence number.
    pub fn with_sequence(sequence: u64) -> Self {
        Self {
            sequence,
            ..Default::default()
        }
    }

    /// Set the presentation timestamp.
    pub fn with_pts(mut self, pts: Duration) -> Self {
        self.pts = Some(pts);
        self
    }

    /// Mark as end-of-stream.
    pub fn with_eos(mut self) -> Self {
        self.flags.eos = true;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_builders() {
        let meta = Metadata::with_sequence(7)
            .with_pts(Duration::from_millis(40))
            .with_eos();
        assert_eq!(meta.sequence, 7);
        assert_eq!(meta.pts, Some(Duration::from_millis(40)));
        assert!(meta.flags.is_eos());
    }

    #[test]
    fn test_flags_clear() {
        let mut flags = BufferFlags { eos: true };
        flags.clear();
        assert_eq!(flags, BufferFlags::default());
    }
}
