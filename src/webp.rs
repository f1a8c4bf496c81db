//! WebP decode transform.
//!
//! Pixel decoding is not implemented yet: [`WebpDecoder`] checks the RIFF
//! container signature at the start of the stream and then forwards bytes
//! unchanged through [`PassThrough`]. A stream that does not start with
//! `RIFF????WEBP` fails the transform.

use crate::buffer::BufferHandle;
use crate::error::{Error, Result};
use crate::port::PortId;
use crate::transform::{PassThrough, TransformHook};
use smallvec::SmallVec;

/// Length of the RIFF/WebP file header.
pub const HEADER_LEN: usize = 12;

const RIFF_TAG: &[u8; 4] = b"RIFF";
const WEBP_TAG: &[u8; 4] = b"WEBP";

/// Check a (possibly partial) header prefix.
///
/// Bytes 4..8 hold the little-endian RIFF size and are not checked.
fn check_header(prefix: &[u8]) -> Result<()> {
    let riff = &prefix[..prefix.len().min(4)];
    let webp = prefix.get(8..).map(|tail| &tail[..tail.len().min(4)]);

    let riff_ok = RIFF_TAG.starts_with(riff);
    let webp_ok = webp.is_none_or(|tag| WEBP_TAG.starts_with(tag));
    if riff_ok && webp_ok {
        Ok(())
    } else {
        Err(Error::TransformFailure(format!(
            "not a WebP stream: bad header {:02x?}",
            prefix
        )))
    }
}

/// WebP decode stage transform.
#[derive(Debug, Default)]
pub struct WebpDecoder {
    inner: PassThrough,
    header: SmallVec<[u8; HEADER_LEN]>,
    validated: bool,
    contexts: [bool; 2],
}

impl WebpDecoder {
    /// Create a decoder waiting for a stream header.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a complete, valid header has been seen.
    pub fn header_validated(&self) -> bool {
        self.validated
    }

    /// Whether decode context for `port` is allocated.
    pub fn has_context(&self, port: PortId) -> bool {
        self.contexts[port.index()]
    }
}

impl TransformHook for WebpDecoder {
    fn transform(
        &mut self,
        input: Option<&mut BufferHandle>,
        output: Option<&mut BufferHandle>,
    ) -> Result<()> {
        let Some(input) = input else {
            return Ok(());
        };

        if !self.validated {
            let need = HEADER_LEN - self.header.len();
            let peek = &input.filled()[..need.min(input.filled_len())];
            let mut candidate = self.header.clone();
            candidate.extend_from_slice(peek);
            check_header(&candidate)?;
            if candidate.len() == HEADER_LEN {
                self.validated = true;
            }
        }

        let before = input.filled_len();
        let start = input.offset();
        self.inner.transform(Some(&mut *input), output)?;

        if !self.validated {
            let consumed = before - input.filled_len();
            let need = HEADER_LEN - self.header.len();
            // Consumed bytes stay in the backing region behind the new offset.
            let taken = consumed.min(need);
            self.header
                .extend_from_slice(&input.data()[start..start + taken]);
        }
        Ok(())
    }

    fn allocate(&mut self, port: PortId) -> Result<()> {
        if !self.contexts[port.index()] {
            tracing::debug!(port = %port, "allocating webp decode context");
            self.contexts[port.index()] = true;
        }
        Ok(())
    }

    fn deallocate(&mut self) {
        self.contexts = [false; 2];
        self.header.clear();
        self.validated = false;
    }

    fn name(&self) -> &str {
        "webpdec"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &[u8] = b"RIFF\x24\x00\x00\x00WEBPVP8 ";

    fn run(dec: &mut WebpDecoder, data: &[u8], out: &mut BufferHandle) -> Result<()> {
        let mut input = BufferHandle::with_data(64, data).unwrap();
        dec.transform(Some(&mut input), Some(out))
    }

    #[test]
    fn test_valid_header_passes_through() {
        let mut dec = WebpDecoder::new();
        let mut out = BufferHandle::new(64).unwrap();

        run(&mut dec, HEADER, &mut out).unwrap();
        assert!(dec.header_validated());
        assert_eq!(out.filled(), HEADER);
    }

    #[test]
    fn test_header_split_across_buffers() {
        let mut dec = WebpDecoder::new();
        let mut out = BufferHandle::new(64).unwrap();

        run(&mut dec, &HEADER[..6], &mut out).unwrap();
        assert!(!dec.header_validated());

        run(&mut dec, &HEADER[6..], &mut out).unwrap();
        assert!(dec.header_validated());
        assert_eq!(out.filled(), HEADER);
    }

    #[test]
    fn test_bad_signature_fails() {
        let mut dec = WebpDecoder::new();
        let mut out = BufferHandle::new(64).unwrap();

        let err = run(&mut dec, b"\x89PNG\r\n\x1a\n", &mut out).unwrap_err();
        assert!(matches!(err, Error::TransformFailure(_)));
        assert!(out.is_empty());
    }

    #[test]
    fn test_bad_form_type_fails() {
        let mut dec = WebpDecoder::new();
        let mut out = BufferHandle::new(64).unwrap();

        assert!(run(&mut dec, b"RIFF\x24\x00\x00\x00WAVE", &mut out).is_err());
    }

    #[test]
    fn test_deallocate_resets_stream() {
        let mut dec = WebpDecoder::new();
        dec.allocate(PortId::Input).unwrap();
        assert!(dec.has_context(PortId::Input));

        let mut out = BufferHandle::new(64).unwrap();
        run(&mut dec, HEADER, &mut out).unwrap();

        dec.deallocate();
        assert!(!dec.header_validated());
        assert!(!dec.has_context(PortId::Input));
    }
}
