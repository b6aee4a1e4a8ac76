//! Pending-request table and per-request result inboxes.
//!
//! [`PendingRequests`] is the single point of truth for what is in flight:
//! a mutex-guarded map from request id to [`Inbox`]. The read loop is the
//! sole writer into any inbox; exactly one logical consumer awaits it via
//! [`InboxReceiver::take`]. Multiple concurrent `take` calls on the same
//! inbox are a caller bug, not a condition the inbox defends against.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::mpsc;

use crate::error::{Result, TxError};
use crate::protocol::{RequestId, ResponseFrame};

/// Delivery side of a per-request inbox.
///
/// Held by the pending-request table; delivering never blocks.
#[derive(Debug)]
pub struct Inbox {
    tx: mpsc::UnboundedSender<Result<ResponseFrame>>,
}

/// Consumer side of a per-request inbox.
///
/// FIFO: frames come out in exactly the order they were delivered.
#[derive(Debug)]
pub struct InboxReceiver {
    rx: mpsc::UnboundedReceiver<Result<ResponseFrame>>,
}

impl Inbox {
    /// Create a connected inbox pair.
    pub fn new() -> (Inbox, InboxReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Inbox { tx }, InboxReceiver { rx })
    }

    /// Append a frame to the inbox.
    pub fn deliver(&self, frame: ResponseFrame) {
        // The receiver may already be dropped (e.g. a caller abandoned the
        // cursor); a frame nobody will read is fine to discard.
        let _ = self.tx.send(Ok(frame));
    }

    /// Append an error; the consumer's next `take` resolves to it.
    pub fn deliver_error(&self, err: TxError) {
        let _ = self.tx.send(Err(err));
    }
}

impl InboxReceiver {
    /// Take the oldest delivered entry, waiting if the inbox is empty.
    ///
    /// A delivered error resolves this call to a failure the caller must
    /// propagate, not retry.
    pub async fn take(&mut self) -> Result<ResponseFrame> {
        match self.rx.recv().await {
            Some(entry) => entry,
            // The delivery side was dropped without a terminal frame. Only
            // reachable once the table has been drained, so report closure.
            None => Err(TxError::TransactionClosed),
        }
    }
}

/// Mapping from request id to inbox; owned 1:1 by a transaction session.
///
/// `None` inside the mutex means the table has been drained: the channel
/// terminated or the session closed, and no further registration is
/// allowed.
#[derive(Debug)]
pub struct PendingRequests {
    entries: Mutex<Option<HashMap<RequestId, Inbox>>>,
}

impl PendingRequests {
    /// Create an empty, accepting table.
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Some(HashMap::new())),
        }
    }

    /// Insert an inbox for a request about to be sent.
    ///
    /// Fails with `TransactionClosed` once the table has been drained.
    pub fn register(&self, id: RequestId, inbox: Inbox) -> Result<()> {
        let mut guard = self.entries.lock().expect("pending table poisoned");
        match guard.as_mut() {
            Some(entries) => {
                entries.insert(id, inbox);
                Ok(())
            }
            None => Err(TxError::TransactionClosed),
        }
    }

    /// Deliver a response frame to its registered inbox.
    ///
    /// A miss is a protocol error surfaced to the caller, never swallowed:
    /// entry removal is caller-driven, so the adapter cannot have raced a
    /// legitimate completion.
    pub fn deliver(&self, frame: ResponseFrame) -> Result<()> {
        let guard = self.entries.lock().expect("pending table poisoned");
        match guard.as_ref().and_then(|entries| entries.get(&frame.id)) {
            Some(inbox) => {
                inbox.deliver(frame);
                Ok(())
            }
            None => Err(TxError::UnknownRequestId(frame.id)),
        }
    }

    /// Remove a completed request's entry.
    ///
    /// Called by the consumer after the terminal frame, or on explicit
    /// cancellation to keep the table from growing unboundedly.
    pub fn remove(&self, id: &RequestId) {
        let mut guard = self.entries.lock().expect("pending table poisoned");
        if let Some(entries) = guard.as_mut() {
            entries.remove(id);
        }
    }

    /// Deliver `err` to every registered inbox and empty the table.
    ///
    /// Idempotent: the second and later calls are no-ops, so duplicate
    /// error/end signals from the stream cannot double-fail a request.
    pub fn drain_with_error(&self, err: TxError) {
        let drained = {
            let mut guard = self.entries.lock().expect("pending table poisoned");
            guard.take()
        };
        if let Some(entries) = drained {
            for (_, inbox) in entries {
                inbox.deliver_error(err.clone());
            }
        }
    }

    /// Whether the table has been drained.
    pub fn is_drained(&self) -> bool {
        self.entries
            .lock()
            .expect("pending table poisoned")
            .is_none()
    }

    /// Number of requests currently in flight.
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .expect("pending table poisoned")
            .as_ref()
            .map_or(0, HashMap::len)
    }

    /// Whether nothing is in flight.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for PendingRequests {
    fn default() -> Self {
        Self::new()
    }
}
