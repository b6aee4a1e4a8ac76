//! Duplex channel adapter: one stream, many logical requests.
//!
//! The channel owns both halves of the underlying stream. Outbound frames
//! go through the dedicated writer task; inbound bytes are re-assembled by
//! an owned read loop that dispatches each response frame to its inbox by
//! request id. Termination of that loop, for any reason, is the single
//! trigger for draining the pending-request table.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::task::AbortHandle;

use crate::error::{Result, TxError};
use crate::pending::{Inbox, InboxReceiver, PendingRequests};
use crate::protocol::{
    FrameBuffer, RequestFrame, RequestId, ResponseFrame, DEFAULT_MAX_PAYLOAD_SIZE,
};
use crate::writer::{spawn_writer_task, OutboundFrame, WriterHandle, DEFAULT_WRITE_QUEUE_CAPACITY};

/// Configuration for a channel.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Capacity of the outbound frame queue.
    pub write_queue_capacity: usize,
    /// Maximum accepted inbound payload size in bytes.
    pub max_payload_size: u32,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            write_queue_capacity: DEFAULT_WRITE_QUEUE_CAPACITY,
            max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE,
        }
    }
}

/// The duplex channel adapter.
///
/// Cheaply cloneable; every clone shares the same stream, writer task and
/// pending-request table. Exclusively owned by one transaction session.
#[derive(Clone)]
pub struct Channel {
    writer: WriterHandle,
    pending: Arc<PendingRequests>,
    open: Arc<AtomicBool>,
    tasks: Arc<Mutex<Vec<AbortHandle>>>,
}

impl Channel {
    /// Spawn a channel over a connected duplex stream.
    pub fn spawn<S>(io: S, config: ChannelConfig) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, write_half) = tokio::io::split(io);
        let (writer, writer_task) = spawn_writer_task(write_half, config.write_queue_capacity);

        let pending = Arc::new(PendingRequests::new());
        let open = Arc::new(AtomicBool::new(true));

        let read_task = tokio::spawn(Self::read_loop(
            reader,
            pending.clone(),
            open.clone(),
            config.max_payload_size,
        ));

        Self {
            writer,
            pending,
            open,
            tasks: Arc::new(Mutex::new(vec![
                read_task.abort_handle(),
                writer_task.abort_handle(),
            ])),
        }
    }

    /// Whether the channel is still accepting requests.
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// The pending-request table shared with the read loop.
    pub fn pending(&self) -> &Arc<PendingRequests> {
        &self.pending
    }

    /// Register an inbox for a request about to be sent.
    pub fn register(&self, frame: &RequestFrame) -> Result<InboxReceiver> {
        if !self.is_open() {
            return Err(TxError::TransactionClosed);
        }
        let (inbox, receiver) = Inbox::new();
        self.pending.register(frame.id, inbox)?;
        Ok(receiver)
    }

    /// Remove a request's table entry.
    pub fn deregister(&self, id: &RequestId) {
        self.pending.remove(id);
    }

    /// Write a request frame to the stream.
    ///
    /// Fails immediately and locally with `TransactionClosed` once the
    /// channel is closed; no network round trip is attempted.
    pub async fn send(&self, frame: &RequestFrame) -> Result<()> {
        if !self.is_open() {
            return Err(TxError::TransactionClosed);
        }
        let outbound = OutboundFrame::new(&frame.header(), frame.payload.clone());
        self.writer.send(outbound).await
    }

    /// Register, send, then await exactly one terminal frame.
    ///
    /// The single-shot building block under `execute`, the open handshake
    /// and the keepalive pulse.
    pub async fn single(&self, frame: RequestFrame) -> Result<ResponseFrame> {
        let mut receiver = self.register(&frame)?;
        if let Err(e) = self.send(&frame).await {
            self.deregister(&frame.id);
            return Err(e);
        }
        let response = receiver.take().await;
        self.deregister(&frame.id);
        response
    }

    /// Close the channel, failing every pending request with `err`.
    ///
    /// Idempotent: only the first call drains and stops the tasks.
    pub fn close_with(&self, err: TxError) {
        if self.open.swap(false, Ordering::AcqRel) {
            tracing::debug!("channel closing: {}", err);
            self.pending.drain_with_error(err);
            let tasks = {
                let mut guard = self.tasks.lock().expect("task list poisoned");
                std::mem::take(&mut *guard)
            };
            for task in tasks {
                task.abort();
            }
        }
    }

    /// Main read loop: re-assemble inbound frames and dispatch by id.
    ///
    /// The loop exits on EOF, I/O failure, a malformed frame, or a frame
    /// for an unregistered id (a fatal protocol violation, since entry
    /// removal is caller-driven). Whatever the cause, the exit drains the
    /// table exactly once.
    async fn read_loop<R>(
        mut reader: R,
        pending: Arc<PendingRequests>,
        open: Arc<AtomicBool>,
        max_payload_size: u32,
    ) where
        R: AsyncRead + Unpin,
    {
        let err = Self::read_frames(&mut reader, &pending, max_payload_size).await;
        match &err {
            TxError::Transport(_) => tracing::debug!("channel read loop ended: {}", err),
            other => tracing::error!("channel read loop failed: {}", other),
        }
        open.store(false, Ordering::Release);
        pending.drain_with_error(err);
    }

    /// Inner receive loop; returns the error that terminates the channel.
    async fn read_frames<R>(
        reader: &mut R,
        pending: &PendingRequests,
        max_payload_size: u32,
    ) -> TxError
    where
        R: AsyncRead + Unpin,
    {
        let mut parser = FrameBuffer::with_max_payload(max_payload_size);
        let mut buf = vec![0u8; 64 * 1024];

        loop {
            let n = match reader.read(&mut buf).await {
                Ok(0) => return TxError::Transport("stream closed by server".to_string()),
                Ok(n) => n,
                Err(e) => return TxError::from(e),
            };

            let frames = match parser.push(&buf[..n]) {
                Ok(frames) => frames,
                Err(e) => return e,
            };

            for frame in frames {
                let response = match ResponseFrame::try_from_frame(frame) {
                    Ok(response) => response,
                    Err(e) => return e,
                };
                if let Err(e) = pending.deliver(response) {
                    tracing::error!("dispatch failed: {}", e);
                    return e;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Header, RequestId, ResponseOutcome};
    use bytes::Bytes;
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt};

    async fn write_response(
        server: &mut (impl tokio::io::AsyncWrite + Unpin),
        response: &ResponseFrame,
    ) {
        let (header, payload) = response.encode_parts().unwrap();
        server.write_all(&header.encode()).await.unwrap();
        server.write_all(&payload).await.unwrap();
        server.flush().await.unwrap();
    }

    async fn read_request(server: &mut (impl tokio::io::AsyncRead + Unpin)) -> RequestFrame {
        let mut parser = FrameBuffer::new();
        let mut buf = vec![0u8; 4096];
        loop {
            let n = server.read(&mut buf).await.unwrap();
            assert!(n > 0);
            let mut frames = parser.push(&buf[..n]).unwrap();
            if let Some(frame) = frames.pop() {
                return RequestFrame::try_from_frame(frame).unwrap();
            }
        }
    }

    #[tokio::test]
    async fn test_single_round_trip() {
        let (client_io, mut server) = duplex(4096);
        let channel = Channel::spawn(client_io, ChannelConfig::default());

        let frame = RequestFrame::initial(RequestId::generate(), Bytes::from_static(b"ping"));
        let id = frame.id;

        let server_side = tokio::spawn(async move {
            let request = read_request(&mut server).await;
            assert_eq!(request.id, id);
            assert_eq!(&request.payload[..], b"ping");
            write_response(&mut server, &ResponseFrame::result(id, Bytes::from_static(b"pong")))
                .await;
            server
        });

        let response = channel.single(frame).await.unwrap();
        match response.outcome {
            ResponseOutcome::Result(payload) => assert_eq!(&payload[..], b"pong"),
            other => panic!("expected result, got {other:?}"),
        }
        assert!(channel.pending().is_empty());
        let _ = server_side.await.unwrap();
    }

    #[tokio::test]
    async fn test_stream_end_drains_pending() {
        let (client_io, server) = duplex(4096);
        let channel = Channel::spawn(client_io, ChannelConfig::default());

        let frame = RequestFrame::initial(RequestId::generate(), Bytes::from_static(b"query"));
        let mut receiver = channel.register(&frame).unwrap();
        channel.send(&frame).await.unwrap();

        drop(server);

        assert!(matches!(receiver.take().await, Err(TxError::Transport(_))));
        assert!(channel.pending().is_drained());
    }

    #[tokio::test]
    async fn test_unknown_request_id_is_fatal() {
        let (client_io, mut server) = duplex(4096);
        let channel = Channel::spawn(client_io, ChannelConfig::default());

        // A registered request that should be failed by the violation.
        let frame = RequestFrame::initial(RequestId::generate(), Bytes::new());
        let mut receiver = channel.register(&frame).unwrap();
        channel.send(&frame).await.unwrap();

        // A response for an id that was never registered.
        write_response(&mut server, &ResponseFrame::done(RequestId::generate())).await;

        assert!(matches!(
            receiver.take().await,
            Err(TxError::UnknownRequestId(_))
        ));
    }

    #[tokio::test]
    async fn test_malformed_frame_is_fatal() {
        let (client_io, mut server) = duplex(4096);
        let channel = Channel::spawn(client_io, ChannelConfig::default());

        let frame = RequestFrame::initial(RequestId::generate(), Bytes::new());
        let mut receiver = channel.register(&frame).unwrap();
        channel.send(&frame).await.unwrap();

        // Unknown kind byte.
        let bogus = Header::new(RequestId::generate(), 0x7F, 0, 0);
        server.write_all(&bogus.encode()).await.unwrap();

        assert!(matches!(receiver.take().await, Err(TxError::Protocol(_))));
    }

    #[tokio::test]
    async fn test_send_after_close_fails_locally() {
        let (client_io, _server) = duplex(4096);
        let channel = Channel::spawn(client_io, ChannelConfig::default());

        channel.close_with(TxError::TransactionClosed);

        let frame = RequestFrame::initial(RequestId::generate(), Bytes::new());
        assert!(matches!(
            channel.send(&frame).await,
            Err(TxError::TransactionClosed)
        ));
        assert!(matches!(
            channel.register(&frame),
            Err(TxError::TransactionClosed)
        ));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (client_io, _server) = duplex(4096);
        let channel = Channel::spawn(client_io, ChannelConfig::default());

        let frame = RequestFrame::initial(RequestId::generate(), Bytes::new());
        let mut receiver = channel.register(&frame).unwrap();

        channel.close_with(TxError::TransactionClosed);
        channel.close_with(TxError::Transport("duplicate signal".to_string()));

        // Exactly one failure delivered, from the first close.
        assert!(matches!(
            receiver.take().await,
            Err(TxError::TransactionClosed)
        ));
        assert!(!channel.is_open());
    }
}
