//! Dedicated writer task for outbound frames.
//!
//! All request frames, from however many concurrent logical requests, are
//! funneled through one mpsc channel into a single task that owns the
//! write half of the stream. That single-writer discipline is what keeps
//! frame boundaries intact under concurrent sends; the bounded channel
//! doubles as natural backpressure.
//!
//! ```text
//! execute()  ─┐
//! cursor     ─┼─► mpsc::Sender<OutboundFrame> ─► writer task ─► stream
//! pulse      ─┘
//! ```

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{Result, TxError};
use crate::protocol::{Header, HEADER_SIZE};

/// Default channel capacity for the outbound queue.
pub const DEFAULT_WRITE_QUEUE_CAPACITY: usize = 256;

/// Maximum frames coalesced into a single write.
const MAX_BATCH_SIZE: usize = 64;

/// A frame ready to be written to the stream.
#[derive(Debug)]
pub struct OutboundFrame {
    /// Pre-encoded header.
    pub header: [u8; HEADER_SIZE],
    /// Payload bytes (may be empty, e.g. continuations).
    pub payload: Bytes,
}

impl OutboundFrame {
    /// Create a new outbound frame.
    #[inline]
    pub fn new(header: &Header, payload: Bytes) -> Self {
        Self {
            header: header.encode(),
            payload,
        }
    }

    /// Total size of this frame (header + payload).
    #[inline]
    pub fn size(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }
}

/// Handle for sending frames to the writer task.
///
/// Cheaply cloneable; shared by every concurrent issuer.
#[derive(Clone)]
pub struct WriterHandle {
    tx: mpsc::Sender<OutboundFrame>,
}

impl WriterHandle {
    /// Queue a frame for writing.
    ///
    /// Waits when the queue is full. Fails with a transport error if the
    /// writer task has terminated.
    pub async fn send(&self, frame: OutboundFrame) -> Result<()> {
        self.tx
            .send(frame)
            .await
            .map_err(|_| TxError::Transport("write channel closed".to_string()))
    }
}

/// Spawn the writer task over the write half of the stream.
///
/// Returns the sending handle and the task's join handle.
pub fn spawn_writer_task<W>(
    writer: W,
    queue_capacity: usize,
) -> (WriterHandle, JoinHandle<Result<()>>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(queue_capacity);
    let task = tokio::spawn(writer_loop(rx, writer));
    (WriterHandle { tx }, task)
}

/// Main writer loop: coalesce queued frames and write them out.
///
/// Frames are copied into one contiguous buffer per batch; a batch is
/// whatever is immediately available, capped at [`MAX_BATCH_SIZE`].
async fn writer_loop<W>(mut rx: mpsc::Receiver<OutboundFrame>, mut writer: W) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut buf = BytesMut::with_capacity(16 * 1024);

    loop {
        let first = match rx.recv().await {
            Some(frame) => frame,
            // All senders dropped: clean shutdown.
            None => return Ok(()),
        };

        buf.clear();
        append_frame(&mut buf, &first);

        let mut batched = 1;
        while batched < MAX_BATCH_SIZE {
            match rx.try_recv() {
                Ok(frame) => {
                    append_frame(&mut buf, &frame);
                    batched += 1;
                }
                Err(_) => break,
            }
        }

        writer.write_all(&buf).await?;
        writer.flush().await?;
    }
}

fn append_frame(buf: &mut BytesMut, frame: &OutboundFrame) {
    buf.reserve(frame.size());
    buf.put_slice(&frame.header);
    buf.put_slice(&frame.payload);
}
