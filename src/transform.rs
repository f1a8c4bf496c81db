//! Transform hook: the single extension point where a codec plugs in.
//!
//! The stage controller calls [`TransformHook::transform`] with whichever
//! handles it currently holds. A transform consumes from the input handle
//! (shrinking its `filled_len`) and produces into the output handle
//! (growing its `filled_len`). Partial progress is fine: leaving input
//! unconsumed means the controller keeps the handle and calls again.
//!
//! The crate ships no decoder. [`PassThrough`] copies bytes unchanged and is
//! what the WebP decode stage runs until a codec is plugged in.

use crate::buffer::BufferHandle;
use crate::error::Result;
use crate::port::PortId;

/// Transform invoked by the stage controller once per loop iteration.
pub trait TransformHook {
    /// Consume from `input` and/or produce into `output`, in place.
    ///
    /// Returning an error halts the current notification; the controller
    /// keeps both handles and surfaces the error to the host.
    fn transform(
        &mut self,
        input: Option<&mut BufferHandle>,
        output: Option<&mut BufferHandle>,
    ) -> Result<()>;

    /// Acquire per-port resources (codec context, scratch state).
    ///
    /// Called from the stage's resource allocation; must tolerate being
    /// called again for a port that is already allocated.
    fn allocate(&mut self, _port: PortId) -> Result<()> {
        Ok(())
    }

    /// Release everything acquired by [`allocate`](Self::allocate).
    ///
    /// Must be safe to call when allocation never happened or only partly
    /// succeeded.
    fn deallocate(&mut self) {}

    /// Get the name of this transform (for debugging/logging).
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

impl<T: TransformHook + ?Sized> TransformHook for Box<T> {
    fn transform(
        &mut self,
        input: Option<&mut BufferHandle>,
        output: Option<&mut BufferHandle>,
    ) -> Result<()> {
        (**self).transform(input, output)
    }

    fn allocate(&mut self, port: PortId) -> Result<()> {
        (**self).allocate(port)
    }

    fn deallocate(&mut self) {
        (**self).deallocate()
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

/// Copies input bytes to the output unchanged.
///
/// Copies as much as the output has room for; whatever does not fit stays
/// in the input handle for the next call. Timing metadata of the first
/// input chunk written into an empty output carries over.
///
/// # Example
///
/// ```rust
/// use webpd::buffer::BufferHandle;
/// use webpd::transform::{PassThrough, TransformHook};
///
/// let mut input = BufferHandle::with_data(16, b"webp").unwrap();
/// let mut output = BufferHandle::new(16).unwrap();
///
/// PassThrough::new()
///     .transform(Some(&mut input), Some(&mut output))
///     .unwrap();
///
/// assert_eq!(input.filled_len(), 0);
/// assert_eq!(output.filled(), b"webp");
/// ```
#[derive(Debug, Default)]
pub struct PassThrough {
    bytes: u64,
}

impl PassThrough {
    /// Create a new pass-through transform.
    pub fn new() -> Self {
        Self::default()
    }

    /// Total bytes copied so far.
    pub fn bytes(&self) -> u64 {
        self.bytes
    }
}

impl TransformHook for PassThrough {
    fn transform(
        &mut self,
        input: Option<&mut BufferHandle>,
        output: Option<&mut BufferHandle>,
    ) -> Result<()> {
        let (Some(input), Some(output)) = (input, output) else {
            return Ok(());
        };

        if output.is_empty() && !input.is_empty() {
            let meta = output.metadata_mut();
            meta.pts = input.metadata().pts;
            meta.sequence = input.metadata().sequence;
        }

        let written = output.append(input.filled());
        input.consume(written);
        self.bytes += written as u64;
        Ok(())
    }

    fn name(&self) -> &str {
        "passthrough"
    }
}

/// Adapts a closure into a [`TransformHook`].
pub struct FnTransform<F> {
    name: String,
    f: F,
}

impl<F> FnTransform<F>
where
    F: FnMut(Option<&mut BufferHandle>, Option<&mut BufferHandle>) -> Result<()>,
{
    /// Wrap a closure.
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

impl<F> TransformHook for FnTransform<F>
where
    F: FnMut(Option<&mut BufferHandle>, Option<&mut BufferHandle>) -> Result<()>,
{
    fn transform(
        &mut self,
        input: Option<&mut BufferHandle>,
        output: Option<&mut BufferHandle>,
    ) -> Result<()> {
        (self.f)(input, output)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl<F> std::fmt::Debug for FnTransform<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnTransform")
            .field("name", &self.name)
            .finish()
    }
}
