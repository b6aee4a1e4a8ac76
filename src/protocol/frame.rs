//! Typed request and response frames.
//!
//! A raw [`Frame`] is what the re-assembly buffer produces: a decoded
//! header plus payload bytes. [`RequestFrame`] and [`ResponseFrame`] are
//! the typed views the rest of the crate works with. The response outcome
//! is a closed enum, so every consuming match is checked exhaustively at
//! compile time.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use super::wire::{kind, Header, RequestId};
use crate::codec::MsgPackCodec;
use crate::error::{Result, TxError};

/// A complete raw protocol frame.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Decoded header.
    pub header: Header,
    /// Payload bytes (zero-copy via `bytes::Bytes`).
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame from header and payload.
    pub fn new(header: Header, payload: Bytes) -> Self {
        Self { header, payload }
    }
}

/// A client-to-server frame.
#[derive(Debug, Clone)]
pub struct RequestFrame {
    /// Logical request identifier, shared by all frames of the exchange.
    pub id: RequestId,
    /// Opaque domain payload. Empty for continuations.
    pub payload: Bytes,
    /// One-way latency hint in milliseconds, attached to initial streaming
    /// requests so the server can tune prefetch sizing. Best-effort only.
    pub latency_hint_millis: Option<u64>,
    /// Whether this frame pulls the next page of an existing exchange.
    pub continuation: bool,
}

impl RequestFrame {
    /// Create the initial frame of a logical exchange.
    pub fn initial(id: RequestId, payload: Bytes) -> Self {
        Self {
            id,
            payload,
            latency_hint_millis: None,
            continuation: false,
        }
    }

    /// Create a continuation frame reusing an existing id.
    pub fn continuation(id: RequestId) -> Self {
        Self {
            id,
            payload: Bytes::new(),
            latency_hint_millis: None,
            continuation: true,
        }
    }

    /// Attach a latency hint to an initial frame.
    pub fn with_latency_hint(mut self, millis: u64) -> Self {
        self.latency_hint_millis = Some(millis);
        self
    }

    /// Build the wire header for this frame.
    pub fn header(&self) -> Header {
        let kind = if self.continuation {
            kind::CONTINUATION
        } else {
            kind::REQUEST
        };
        Header::new(
            self.id,
            kind,
            self.latency_hint_millis.unwrap_or(0),
            self.payload.len() as u32,
        )
    }

    /// Reconstruct a typed request from a raw frame.
    ///
    /// Used by in-process test servers; the client never reads requests.
    pub fn try_from_frame(frame: Frame) -> Result<Self> {
        match frame.header.kind {
            kind::REQUEST => Ok(Self {
                id: frame.header.request_id,
                payload: frame.payload,
                latency_hint_millis: (frame.header.aux != 0).then_some(frame.header.aux),
                continuation: false,
            }),
            kind::CONTINUATION => Ok(Self::continuation(frame.header.request_id)),
            other => Err(TxError::Protocol(format!(
                "expected request frame, got kind 0x{other:02x}"
            ))),
        }
    }
}

/// Structured application-level failure carried by an error response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerError {
    /// Stable machine-readable error code.
    pub code: String,
    /// Human-readable description.
    pub message: String,
}

impl ServerError {
    /// Create a new server error body.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

impl From<ServerError> for TxError {
    fn from(err: ServerError) -> Self {
        TxError::ServerReported {
            code: err.code,
            message: err.message,
        }
    }
}

/// The outcome carried by one response frame.
#[derive(Debug, Clone)]
pub enum ResponseOutcome {
    /// A result payload for the exchange.
    Result(Bytes),
    /// The server has more results but requires a continuation frame first.
    Continue,
    /// The exchange is complete; no further frames will arrive for this id.
    Done,
    /// An application-level failure local to this exchange.
    Error(ServerError),
    /// No outcome was set. Protocol violation, surfaced as an error by the
    /// consumer, never dropped.
    NotSet,
}

/// A server-to-client frame.
#[derive(Debug, Clone)]
pub struct ResponseFrame {
    /// Logical request identifier this frame answers.
    pub id: RequestId,
    /// The tagged outcome.
    pub outcome: ResponseOutcome,
    /// Server-reported processing time in milliseconds. Only meaningful on
    /// the open-handshake result; zero elsewhere.
    pub processing_millis: u64,
}

impl ResponseFrame {
    /// Create a result response.
    pub fn result(id: RequestId, payload: Bytes) -> Self {
        Self {
            id,
            outcome: ResponseOutcome::Result(payload),
            processing_millis: 0,
        }
    }

    /// Create a result response carrying a processing-time report.
    pub fn result_with_processing(id: RequestId, payload: Bytes, processing_millis: u64) -> Self {
        Self {
            id,
            outcome: ResponseOutcome::Result(payload),
            processing_millis,
        }
    }

    /// Create a continue signal.
    pub fn continue_signal(id: RequestId) -> Self {
        Self {
            id,
            outcome: ResponseOutcome::Continue,
            processing_millis: 0,
        }
    }

    /// Create a done signal.
    pub fn done(id: RequestId) -> Self {
        Self {
            id,
            outcome: ResponseOutcome::Done,
            processing_millis: 0,
        }
    }

    /// Create an error response.
    pub fn error(id: RequestId, err: ServerError) -> Self {
        Self {
            id,
            outcome: ResponseOutcome::Error(err),
            processing_millis: 0,
        }
    }

    /// Build the wire header and payload for this frame.
    ///
    /// Used by in-process test servers; the client never writes responses.
    pub fn encode_parts(&self) -> Result<(Header, Bytes)> {
        let (kind, aux, payload) = match &self.outcome {
            ResponseOutcome::Result(payload) => {
                (kind::RES_RESULT, self.processing_millis, payload.clone())
            }
            ResponseOutcome::Continue => (kind::RES_CONTINUE, 0, Bytes::new()),
            ResponseOutcome::Done => (kind::RES_DONE, 0, Bytes::new()),
            ResponseOutcome::Error(err) => {
                (kind::RES_ERROR, 0, Bytes::from(MsgPackCodec::encode(err)?))
            }
            ResponseOutcome::NotSet => (kind::RES_NOT_SET, 0, Bytes::new()),
        };
        let header = Header::new(self.id, kind, aux, payload.len() as u32);
        Ok((header, payload))
    }

    /// Reconstruct a typed response from a raw frame.
    pub fn try_from_frame(frame: Frame) -> Result<Self> {
        let id = frame.header.request_id;
        let outcome = match frame.header.kind {
            kind::RES_RESULT => ResponseOutcome::Result(frame.payload),
            kind::RES_CONTINUE => ResponseOutcome::Continue,
            kind::RES_DONE => ResponseOutcome::Done,
            kind::RES_ERROR => ResponseOutcome::Error(MsgPackCodec::decode(&frame.payload)?),
            kind::RES_NOT_SET => ResponseOutcome::NotSet,
            other => {
                return Err(TxError::Protocol(format!(
                    "expected response frame, got kind 0x{other:02x}"
                )))
            }
        };
        Ok(Self {
            id,
            outcome,
            processing_millis: frame.header.aux,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::FrameBuffer;

    fn roundtrip_response(response: &ResponseFrame) -> ResponseFrame {
        let (header, payload) = response.encode_parts().unwrap();
        let mut bytes = header.encode().to_vec();
        bytes.extend_from_slice(&payload);

        let mut buffer = FrameBuffer::new();
        let frames = buffer.push(&bytes).unwrap();
        assert_eq!(frames.len(), 1);
        ResponseFrame::try_from_frame(frames.into_iter().next().unwrap()).unwrap()
    }

    #[test]
    fn test_initial_request_header() {
        let id = RequestId::generate();
        let frame = RequestFrame::initial(id, Bytes::from_static(b"match $x"));
        let header = frame.header();

        assert_eq!(header.request_id, id);
        assert_eq!(header.kind, kind::REQUEST);
        assert_eq!(header.aux, 0);
        assert_eq!(header.payload_length, 8);
    }

    #[test]
    fn test_latency_hint_in_aux() {
        let frame = RequestFrame::initial(RequestId::generate(), Bytes::new()).with_latency_hint(35);
        assert_eq!(frame.header().aux, 35);
    }

    #[test]
    fn test_continuation_has_empty_payload() {
        let id = RequestId::generate();
        let frame = RequestFrame::continuation(id);
        assert!(frame.continuation);
        assert!(frame.payload.is_empty());
        assert_eq!(frame.header().kind, kind::CONTINUATION);
    }

    #[test]
    fn test_request_from_raw_frame() {
        let id = RequestId::generate();
        let header = Header::new(id, kind::REQUEST, 20, 3);
        let parsed =
            RequestFrame::try_from_frame(Frame::new(header, Bytes::from_static(b"abc"))).unwrap();
        assert_eq!(parsed.id, id);
        assert_eq!(parsed.latency_hint_millis, Some(20));
        assert!(!parsed.continuation);
    }

    #[test]
    fn test_request_from_response_kind_rejected() {
        let header = Header::new(RequestId::generate(), kind::RES_DONE, 0, 0);
        let result = RequestFrame::try_from_frame(Frame::new(header, Bytes::new()));
        assert!(matches!(result, Err(TxError::Protocol(_))));
    }

    #[test]
    fn test_result_response_roundtrip() {
        let id = RequestId::generate();
        let original = ResponseFrame::result_with_processing(id, Bytes::from_static(b"rows"), 5);
        let parsed = roundtrip_response(&original);

        assert_eq!(parsed.id, id);
        assert_eq!(parsed.processing_millis, 5);
        match parsed.outcome {
            ResponseOutcome::Result(payload) => assert_eq!(&payload[..], b"rows"),
            other => panic!("expected result outcome, got {other:?}"),
        }
    }

    #[test]
    fn test_error_response_roundtrip() {
        let id = RequestId::generate();
        let original = ResponseFrame::error(id, ServerError::new("TXN08", "commit conflict"));
        let parsed = roundtrip_response(&original);

        match parsed.outcome {
            ResponseOutcome::Error(err) => {
                assert_eq!(err.code, "TXN08");
                assert_eq!(err.message, "commit conflict");
            }
            other => panic!("expected error outcome, got {other:?}"),
        }
    }

    #[test]
    fn test_signal_responses_have_empty_payload() {
        for response in [
            ResponseFrame::continue_signal(RequestId::generate()),
            ResponseFrame::done(RequestId::generate()),
        ] {
            let (header, payload) = response.encode_parts().unwrap();
            assert_eq!(header.payload_length, 0);
            assert!(payload.is_empty());
        }
    }

    #[test]
    fn test_not_set_outcome_survives_decode() {
        let id = RequestId::generate();
        let parsed = roundtrip_response(&ResponseFrame {
            id,
            outcome: ResponseOutcome::NotSet,
            processing_millis: 0,
        });
        assert!(matches!(parsed.outcome, ResponseOutcome::NotSet));
    }

    #[test]
    fn test_server_error_into_tx_error() {
        let err: TxError = ServerError::new("QRY01", "invalid payload").into();
        assert!(matches!(err, TxError::ServerReported { .. }));
    }
}
