//! Wire format encoding and decoding.
//!
//! Implements the 29-byte frame header:
//! ```text
//! ┌────────────┬───────┬──────────┬──────────┐
//! │ Request ID │ Kind  │ Aux      │ Length   │
//! │ 16 bytes   │ 1 byte│ 8 bytes  │ 4 bytes  │
//! │ UUID bytes │       │ u64 BE   │ u32 BE   │
//! └────────────┴───────┴──────────┴──────────┘
//! ```
//!
//! The `aux` field is overloaded per kind: for initial requests it carries
//! the latency hint in milliseconds (0 = no hint), for result responses it
//! carries the server-reported processing time in milliseconds. All
//! multi-byte integers are Big Endian.

use std::fmt;

use uuid::Uuid;

use crate::error::{Result, TxError};

/// Header size in bytes (fixed, exactly 29).
pub const HEADER_SIZE: usize = 29;

/// Default maximum payload size (1 GB).
pub const DEFAULT_MAX_PAYLOAD_SIZE: u32 = 1_073_741_824;

/// Frame kind constants.
///
/// Bit 4 distinguishes direction: responses have it set, requests do not.
pub mod kind {
    /// Initial request frame, starts a logical exchange.
    pub const REQUEST: u8 = 0x01;
    /// Continuation frame, reuses an existing request id to pull the next page.
    pub const CONTINUATION: u8 = 0x02;

    /// Response with no outcome set. A server bug, never silently ignored.
    pub const RES_NOT_SET: u8 = 0x10;
    /// Response carrying a result payload.
    pub const RES_RESULT: u8 = 0x11;
    /// Server signal: a continuation frame is required for more results.
    pub const RES_CONTINUE: u8 = 0x12;
    /// Server signal: the logical exchange is complete.
    pub const RES_DONE: u8 = 0x13;
    /// Response carrying an application-level failure body.
    pub const RES_ERROR: u8 = 0x14;

    /// Mask selecting the response direction bit.
    pub const RESPONSE_BIT: u8 = 0x10;

    /// Check whether a kind byte denotes a server-to-client frame.
    #[inline]
    pub fn is_response(kind: u8) -> bool {
        kind & RESPONSE_BIT != 0
    }

    /// Check whether a kind byte is one this protocol defines.
    pub fn is_known(kind: u8) -> bool {
        matches!(
            kind,
            REQUEST | CONTINUATION | RES_NOT_SET | RES_RESULT | RES_CONTINUE | RES_DONE | RES_ERROR
        )
    }
}

/// Process-unique identifier for one logical request.
///
/// Generated by the issuer; every frame of a logical exchange (initial
/// request, continuations, all responses) carries the same id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(Uuid);

impl RequestId {
    /// Generate a fresh process-unique id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Reconstruct an id from its 16 raw bytes.
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }

    /// The 16 raw bytes of this id, as written on the wire.
    #[inline]
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Decoded header from wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Logical request identifier.
    pub request_id: RequestId,
    /// Frame kind (see the `kind` module).
    pub kind: u8,
    /// Kind-dependent auxiliary value (latency hint or processing millis).
    pub aux: u64,
    /// Payload length in bytes.
    pub payload_length: u32,
}

impl Header {
    /// Create a new header.
    pub fn new(request_id: RequestId, kind: u8, aux: u64, payload_length: u32) -> Self {
        Self {
            request_id,
            kind,
            aux,
            payload_length,
        }
    }

    /// Encode header to bytes (Big Endian).
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..16].copy_from_slice(self.request_id.as_bytes());
        buf[16] = self.kind;
        buf[17..25].copy_from_slice(&self.aux.to_be_bytes());
        buf[25..29].copy_from_slice(&self.payload_length.to_be_bytes());
        buf
    }

    /// Decode header from bytes (Big Endian).
    ///
    /// Returns `None` if the buffer is too short.
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < HEADER_SIZE {
            return None;
        }
        let mut id = [0u8; 16];
        id.copy_from_slice(&buf[0..16]);
        let mut aux = [0u8; 8];
        aux.copy_from_slice(&buf[17..25]);
        let mut len = [0u8; 4];
        len.copy_from_slice(&buf[25..29]);
        Some(Self {
            request_id: RequestId::from_bytes(id),
            kind: buf[16],
            aux: u64::from_be_bytes(aux),
            payload_length: u32::from_be_bytes(len),
        })
    }

    /// Validate the header for protocol compliance.
    ///
    /// Checks that the kind byte is known and the payload length does not
    /// exceed the configured maximum.
    pub fn validate(&self, max_payload_size: u32) -> Result<()> {
        if !kind::is_known(self.kind) {
            return Err(TxError::Protocol(format!(
                "unknown frame kind 0x{:02x}",
                self.kind
            )));
        }

        if self.payload_length > max_payload_size {
            return Err(TxError::Protocol(format!(
                "payload size {} exceeds maximum {}",
                self.payload_length, max_payload_size
            )));
        }

        Ok(())
    }
}
