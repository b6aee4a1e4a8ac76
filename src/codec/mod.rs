//! Codec module - serialization for structured frame bodies.
//!
//! Domain payloads are opaque to this layer; the codec exists for the
//! structured pieces this crate does own (the server-error body) and for
//! collaborators that need a concrete encoding for their payloads.

mod msgpack;

pub use msgpack::MsgPackCodec;
