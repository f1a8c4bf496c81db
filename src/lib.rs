//! # webpd
//!
//! A WebP decoder processor stage for streaming media pipelines.
//!
//! A stage sits between one input port and one output port. Buffers are
//! owned by a broker; the stage claims them, runs a transform over the
//! pair, and relinquishes them again, carrying an end-of-stream marker
//! through to the output exactly once.
//!
//! ## Features
//!
//! - **Move-only buffer handles**: claiming and relinquishing transfer ownership
//! - **Non-blocking broker seam**: plug in any buffer source via [`broker::PortBroker`]
//! - **Pluggable transforms**: [`transform::TransformHook`] with a WebP decoder built in
//! - **Per-port lifecycle**: allocate, prepare, transfer, stop, deallocate
//! - **Observability**: `tracing` spans and `metrics` counters
//!
//! ## Quick Start
//!
//! ```rust
//! use webpd::prelude::*;
//!
//! let mut stage = webp_decoder(QueueBroker::new(), StageConfig::default())?;
//! stage.allocate_resources(PortScope::All)?;
//! stage.prepare_to_transfer(PortScope::All)?;
//! stage.transfer_and_process(PortScope::All)?;
//!
//! stage.broker_mut().supply(PortId::Input, BufferHandle::with_data(64, b"RIFF\0\0\0\0WEBPVP8 ")?);
//! stage.broker_mut().supply(PortId::Output, BufferHandle::new(64)?);
//! stage.on_buffers_ready()?;
//!
//! stage.signal_end_of_stream();
//! stage.on_buffers_ready()?;
//!
//! let out = stage.broker_mut().take_returned(PortId::Output).unwrap();
//! assert!(out.flags().is_eos());
//! assert_eq!(out.filled_len(), 16);
//!
//! stage.stop_and_return()?;
//! stage.deallocate_resources()?;
//! # Ok::<(), webpd::Error>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod broker;
pub mod buffer;
pub mod config;
pub mod controller;
pub mod error;
pub mod lifecycle;
pub mod metadata;
pub mod observability;
pub mod port;
pub mod stage;
pub mod transform;
pub mod webp;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::broker::{PortBroker, QueueBroker};
    pub use crate::buffer::BufferHandle;
    pub use crate::config::StageConfig;
    pub use crate::controller::Progress;
    pub use crate::error::{Error, Result};
    pub use crate::lifecycle::PortPhase;
    pub use crate::metadata::Metadata;
    pub use crate::port::{PortId, PortScope, PortSet};
    pub use crate::stage::{ProcessorStage, Stage, passthrough, webp_decoder};
    pub use crate::transform::TransformHook;
    pub use crate::webp::WebpDecoder;
}

pub use error::{Error, Result};
