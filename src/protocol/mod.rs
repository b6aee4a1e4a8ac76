//! Protocol module - wire format, framing, and frame types.
//!
//! This module implements the generic frame envelope every domain payload
//! rides on:
//! - 29-byte header encoding/decoding
//! - frame buffer for accumulating partial reads
//! - typed request/response frames with a closed outcome enum

mod frame;
mod frame_buffer;
mod wire;

pub use frame::{Frame, RequestFrame, ResponseFrame, ResponseOutcome, ServerError};
pub use frame_buffer::FrameBuffer;
pub use wire::{kind, Header, RequestId, DEFAULT_MAX_PAYLOAD_SIZE, HEADER_SIZE};
