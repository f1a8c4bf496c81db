//! WebP decode stage example.
//!
//! Feeds a small WebP stream through a decoder stage in chunks, with the
//! output side pulling finished buffers as they come back.
//!
//! ```text
//! [input chunks] -> (webpdec) -> [output buffers]
//! ```
//!
//! Run with: cargo run --example decode_stage
//! Set `RUST_LOG=webpd=trace` to see every claim and relinquish.

use tracing_subscriber::EnvFilter;
use webpd::observability::{TracingConfig, init_metrics};
use webpd::prelude::*;

/// A minimal lossless WebP file: 1x1 pixel.
const STREAM: &[u8] = &[
    b'R', b'I', b'F', b'F', 0x1a, 0x00, 0x00, 0x00, b'W', b'E', b'B', b'P', b'V', b'P', b'8',
    b'L', 0x0d, 0x00, 0x00, 0x00, 0x2f, 0x00, 0x00, 0x00, 0x10, 0x07, 0x10, 0x11, 0x11, 0x88,
    0x88, 0xfe, 0x07, 0x00,
];

const CHUNK: usize = 10;
const OUTPUT_CAPACITY: usize = 16;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("webpd=debug")),
        )
        .init();
    init_metrics();

    println!("=== WebP Decode Stage Example ===\n");

    let config = StageConfig::new("webpdec0")
        .with_scratch_size(4096)
        .with_tracing(TracingConfig::all());
    let mut stage = webp_decoder(QueueBroker::new(), config)?;

    stage.allocate_resources(PortScope::All)?;
    stage.prepare_to_transfer(PortScope::All)?;
    stage.transfer_and_process(PortScope::All)?;

    let chunks: Vec<&[u8]> = STREAM.chunks(CHUNK).collect();
    let last = chunks.len() - 1;
    let mut received = Vec::new();

    for (i, chunk) in chunks.into_iter().enumerate() {
        let mut buffer = BufferHandle::with_data(CHUNK, chunk)?;
        *buffer.metadata_mut() = Metadata::with_sequence(i as u64);
        if i == last {
            buffer.flags_mut().set_eos(true);
        }
        stage.broker_mut().supply(PortId::Input, buffer);
        stage
            .broker_mut()
            .supply(PortId::Output, BufferHandle::new(OUTPUT_CAPACITY)?);

        let progress = stage.on_buffers_ready()?;
        println!(
            "chunk {i}: {} in / {} out, eos={}",
            progress.inputs_relinquished, progress.outputs_relinquished, progress.eos_propagated
        );

        while let Some(out) = stage.broker_mut().take_returned(PortId::Output) {
            println!(
                "  output seq={} len={} eos={}",
                out.metadata().sequence,
                out.filled_len(),
                out.flags().is_eos()
            );
            received.extend_from_slice(out.filled());
        }
    }

    println!(
        "\nheader valid: {}, {} of {} bytes forwarded",
        stage.transform().header_validated(),
        received.len(),
        STREAM.len()
    );

    stage.stop_and_return()?;
    stage.deallocate_resources()?;
    println!("\n=== Done ===");
    Ok(())
}
