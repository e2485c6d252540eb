//! Wire protocol for the extraction backend: the line-framed event stream
//! emitted by `/extract-batch` and the payload types carried inside it.
//!
//! This crate knows nothing about HTTP or documents: it turns byte chunks
//! into `(event, data)` frames and gives those frames serde shapes. Transport
//! and state reconciliation live in `extracta-core`.

pub mod decoder;
pub mod wire;

pub use decoder::{EventStreamDecoder, Frame};
pub use wire::{BatchResultEvent, ErrorEvent, ResultMetadata};
