//! Paginated result cursor: a lazy, pull-driven sequence over one logical
//! request.
//!
//! The cursor owns the request's inbox. It never reads from the inbox, and
//! therefore never requests another page, until the consumer advances past
//! the locally buffered elements, so a slow consumer naturally
//! backpressures the server. Finite, forward-only, not restartable.

use std::collections::VecDeque;

use bytes::Bytes;

use crate::channel::Channel;
use crate::error::{Result, TxError};
use crate::pending::InboxReceiver;
use crate::protocol::{RequestFrame, RequestId, ResponseOutcome};

/// Page transform: decode one result payload into zero or more elements.
pub type PageTransform<T> = Box<dyn Fn(Bytes) -> Result<Vec<T>> + Send>;

/// Cursor progression state.
///
/// "Buffered" from the protocol's point of view is `Fetching` with a
/// non-empty local buffer; the buffer is checked before the state.
#[derive(Debug, PartialEq, Eq)]
enum State {
    /// More frames may arrive for this request.
    Fetching,
    /// `Done` observed; no more elements, no more frames.
    Exhausted,
    /// An error was observed and has been yielded; the cursor is fused.
    Failed,
}

/// A lazy, finite, forward-only sequence of `T` produced by one streaming
/// request.
pub struct ResultCursor<T> {
    id: RequestId,
    channel: Channel,
    receiver: InboxReceiver,
    transform: PageTransform<T>,
    buffered: VecDeque<T>,
    state: State,
}

impl<T> ResultCursor<T> {
    /// Wire a cursor to an already-sent request's inbox.
    pub(crate) fn new(
        id: RequestId,
        channel: Channel,
        receiver: InboxReceiver,
        transform: PageTransform<T>,
    ) -> Self {
        Self {
            id,
            channel,
            receiver,
            transform,
            buffered: VecDeque::new(),
            state: State::Fetching,
        }
    }

    /// The id of the logical request this cursor consumes.
    pub fn request_id(&self) -> RequestId {
        self.id
    }

    /// Advance to the next element.
    ///
    /// Returns `None` once the sequence is exhausted (or after an error has
    /// been yielded). Empty pages are legal and are never surfaced; the
    /// cursor keeps pulling until it has an element, a `Done`, or an error.
    pub async fn next(&mut self) -> Option<Result<T>> {
        loop {
            if let Some(element) = self.buffered.pop_front() {
                return Some(Ok(element));
            }
            match self.state {
                State::Exhausted | State::Failed => return None,
                State::Fetching => {}
            }

            let frame = match self.receiver.take().await {
                Ok(frame) => frame,
                Err(e) => return Some(self.fail(e)),
            };

            match frame.outcome {
                ResponseOutcome::Result(payload) => match (self.transform)(payload) {
                    // An empty page re-enters the fetch loop.
                    Ok(elements) => self.buffered.extend(elements),
                    Err(e) => return Some(self.fail(e)),
                },
                ResponseOutcome::Continue => {
                    let continuation = RequestFrame::continuation(self.id);
                    if let Err(e) = self.channel.send(&continuation).await {
                        return Some(self.fail(e));
                    }
                }
                ResponseOutcome::Done => {
                    self.channel.deregister(&self.id);
                    self.state = State::Exhausted;
                    return None;
                }
                ResponseOutcome::Error(err) => return Some(self.fail(err.into())),
                ResponseOutcome::NotSet => {
                    return Some(self.fail(TxError::MissingResponse(self.id)))
                }
            }
        }
    }

    /// Drain the remaining elements into a vector.
    pub async fn collect(mut self) -> Result<Vec<T>> {
        let mut elements = Vec::new();
        while let Some(element) = self.next().await {
            elements.push(element?);
        }
        Ok(elements)
    }

    /// Enter the terminal failed state and hand the error to the consumer.
    fn fail(&mut self, err: TxError) -> Result<T> {
        self.channel.deregister(&self.id);
        self.state = State::Failed;
        Err(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::ChannelConfig;
    use crate::codec::MsgPackCodec;
    use crate::protocol::{ResponseFrame, ServerError};
    use bytes::Bytes;
    use tokio::io::{duplex, AsyncWriteExt, DuplexStream};

    fn u64_pages(payload: Bytes) -> Result<Vec<u64>> {
        MsgPackCodec::decode(&payload)
    }

    async fn write_response(server: &mut DuplexStream, response: &ResponseFrame) {
        let (header, payload) = response.encode_parts().unwrap();
        server.write_all(&header.encode()).await.unwrap();
        server.write_all(&payload).await.unwrap();
    }

    fn page(id: RequestId, elements: &[u64]) -> ResponseFrame {
        ResponseFrame::result(id, Bytes::from(MsgPackCodec::encode(&elements).unwrap()))
    }

    /// Start a cursor over a spawned channel without a request round trip;
    /// the server script below writes responses directly.
    fn wired_cursor(
        io: DuplexStream,
    ) -> (ResultCursor<u64>, RequestId) {
        let channel = Channel::spawn(io, ChannelConfig::default());
        let frame = RequestFrame::initial(RequestId::generate(), Bytes::new());
        let receiver = channel.register(&frame).unwrap();
        let cursor = ResultCursor::new(frame.id, channel, receiver, Box::new(u64_pages));
        (cursor, frame.id)
    }

    #[tokio::test]
    async fn test_elements_in_frame_order() {
        let (client_io, mut server) = duplex(4096);
        let (mut cursor, id) = wired_cursor(client_io);

        write_response(&mut server, &page(id, &[1, 2])).await;
        write_response(&mut server, &page(id, &[3])).await;
        write_response(&mut server, &ResponseFrame::done(id)).await;

        let mut seen = Vec::new();
        while let Some(element) = cursor.next().await {
            seen.push(element.unwrap());
        }
        assert_eq!(seen, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_empty_pages_not_surfaced() {
        let (client_io, mut server) = duplex(4096);
        let (cursor, id) = wired_cursor(client_io);

        write_response(&mut server, &page(id, &[])).await;
        write_response(&mut server, &page(id, &[])).await;
        write_response(&mut server, &page(id, &[7])).await;
        write_response(&mut server, &ResponseFrame::done(id)).await;

        assert_eq!(cursor.collect().await.unwrap(), vec![7]);
    }

    #[tokio::test]
    async fn test_exhausted_cursor_is_fused() {
        let (client_io, mut server) = duplex(4096);
        let (mut cursor, id) = wired_cursor(client_io);

        write_response(&mut server, &ResponseFrame::done(id)).await;

        assert!(cursor.next().await.is_none());
        assert!(cursor.next().await.is_none());
    }

    #[tokio::test]
    async fn test_server_error_yielded_once() {
        let (client_io, mut server) = duplex(4096);
        let (mut cursor, id) = wired_cursor(client_io);

        write_response(&mut server, &page(id, &[1])).await;
        write_response(
            &mut server,
            &ResponseFrame::error(id, ServerError::new("QRY02", "evaluation failed")),
        )
        .await;

        assert_eq!(cursor.next().await.unwrap().unwrap(), 1);
        assert!(matches!(
            cursor.next().await,
            Some(Err(TxError::ServerReported { .. }))
        ));
        assert!(cursor.next().await.is_none());
    }

    #[tokio::test]
    async fn test_transform_failure_fails_cursor() {
        let (client_io, mut server) = duplex(4096);
        let (mut cursor, id) = wired_cursor(client_io);

        write_response(
            &mut server,
            &ResponseFrame::result(id, Bytes::from_static(b"\xc1 not msgpack")),
        )
        .await;

        assert!(matches!(cursor.next().await, Some(Err(TxError::Codec(_)))));
        assert!(cursor.next().await.is_none());
    }

    #[tokio::test]
    async fn test_not_set_outcome_is_an_error() {
        let (client_io, mut server) = duplex(4096);
        let (mut cursor, id) = wired_cursor(client_io);

        write_response(
            &mut server,
            &ResponseFrame {
                id,
                outcome: ResponseOutcome::NotSet,
                processing_millis: 0,
            },
        )
        .await;

        assert!(matches!(
            cursor.next().await,
            Some(Err(TxError::MissingResponse(_)))
        ));
    }
}
