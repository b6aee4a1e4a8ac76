//! Transaction session lifecycle.
//!
//! The session is the façade through which all requests and streams are
//! issued. It owns the channel for its lifetime, performs the open
//! handshake (recording the one-way latency estimate), and is the only
//! component allowed to close the channel.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::watch;

use crate::channel::{Channel, ChannelConfig};
use crate::cursor::ResultCursor;
use crate::error::{Result, TxError};
use crate::protocol::{RequestFrame, RequestId, ResponseFrame, ResponseOutcome};
use crate::pulse::{spawn_pulse, PulseConfig};

/// The kind of transaction being opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionType {
    Read,
    Write,
    Schema,
}

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Initializing,
    Open,
    Closed,
}

const STATE_INITIALIZING: u8 = 0;
const STATE_OPEN: u8 = 1;
const STATE_CLOSED: u8 = 2;

/// Atomic cell holding the session state.
#[derive(Debug)]
struct StateCell(AtomicU8);

impl StateCell {
    fn new() -> Self {
        Self(AtomicU8::new(STATE_INITIALIZING))
    }

    fn get(&self) -> State {
        match self.0.load(Ordering::Acquire) {
            STATE_INITIALIZING => State::Initializing,
            STATE_OPEN => State::Open,
            _ => State::Closed,
        }
    }

    fn set_open(&self) {
        self.0.store(STATE_OPEN, Ordering::Release);
    }

    /// Transition to `Closed`; returns whether this call did the closing.
    fn close(&self) -> bool {
        self.0.swap(STATE_CLOSED, Ordering::AcqRel) != STATE_CLOSED
    }
}

/// Configuration for opening a transaction.
#[derive(Debug, Clone, Default)]
pub struct TransactionConfig {
    /// Channel tuning.
    pub channel: ChannelConfig,
    /// Optional keepalive pulse; `None` disables it.
    pub pulse: Option<PulseConfig>,
}

/// A transaction session multiplexing many logical requests over one
/// duplex stream.
pub struct Transaction {
    transaction_type: TransactionType,
    state: Arc<StateCell>,
    channel: Channel,
    latency: Duration,
    pulse_shutdown: Option<watch::Sender<bool>>,
}

impl Transaction {
    /// Open a session over a connected duplex stream.
    ///
    /// Sends the handshake payload, awaits its response, and records the
    /// one-way latency estimate: wall-clock round-trip time minus the
    /// server-reported processing time. The estimate annotates subsequent
    /// streaming requests so the server can tune prefetch sizing; it is a
    /// best-effort hint, not a correctness-affecting value.
    pub async fn open<S>(
        io: S,
        transaction_type: TransactionType,
        handshake: Bytes,
        config: TransactionConfig,
    ) -> Result<Self>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let channel = Channel::spawn(io, config.channel);
        let frame = RequestFrame::initial(RequestId::generate(), handshake);

        let started = Instant::now();
        let response = match channel.single(frame).await {
            Ok(response) => response,
            Err(e) => {
                channel.close_with(TxError::TransactionClosed);
                return Err(TxError::OpenFailed(e.to_string()));
            }
        };
        let round_trip = started.elapsed();

        let processing = Duration::from_millis(response.processing_millis);
        match response.outcome {
            ResponseOutcome::Result(_) => {}
            ResponseOutcome::Error(err) => {
                channel.close_with(TxError::TransactionClosed);
                return Err(TxError::OpenFailed(format!("[{}] {}", err.code, err.message)));
            }
            other => {
                channel.close_with(TxError::TransactionClosed);
                return Err(TxError::OpenFailed(format!(
                    "unexpected handshake outcome: {other:?}"
                )));
            }
        }

        let state = Arc::new(StateCell::new());
        state.set_open();

        let pulse_shutdown = config.pulse.map(|pulse| spawn_pulse(channel.clone(), pulse));

        tracing::debug!(
            "transaction open ({:?}), estimated one-way latency {:?}",
            transaction_type,
            estimate_latency(round_trip, processing)
        );

        Ok(Self {
            transaction_type,
            state,
            channel,
            latency: estimate_latency(round_trip, processing),
            pulse_shutdown,
        })
    }

    /// The kind this session was opened as.
    pub fn transaction_type(&self) -> TransactionType {
        self.transaction_type
    }

    /// Whether the session is open.
    ///
    /// Returns `false` once the session is closed or the underlying
    /// channel has terminated, even if `close()` was never called.
    pub fn is_open(&self) -> bool {
        self.state.get() == State::Open && self.channel.is_open()
    }

    /// The one-way network latency estimate recorded at open.
    pub fn estimated_latency(&self) -> Duration {
        self.latency
    }

    /// Single-shot request/response exchange.
    pub async fn execute(&self, payload: Bytes) -> Result<Bytes> {
        self.ensure_open()?;
        let frame = RequestFrame::initial(RequestId::generate(), payload);
        let response = self.channel.single(frame).await?;
        single_result(response)
    }

    /// Issue a streaming request and return its cursor.
    ///
    /// The cursor, not this method, owns frame-by-frame progression; no
    /// continuation is requested until the consumer advances past what is
    /// buffered.
    pub async fn stream<T, F>(&self, payload: Bytes, transform: F) -> Result<ResultCursor<T>>
    where
        F: Fn(Bytes) -> Result<Vec<T>> + Send + 'static,
    {
        self.ensure_open()?;
        let frame = RequestFrame::initial(RequestId::generate(), payload)
            .with_latency_hint(latency_hint_millis(self.latency));

        let receiver = self.channel.register(&frame)?;
        if let Err(e) = self.channel.send(&frame).await {
            self.channel.deregister(&frame.id);
            return Err(e);
        }
        Ok(ResultCursor::new(
            frame.id,
            self.channel.clone(),
            receiver,
            Box::new(transform),
        ))
    }

    /// Commit the transaction.
    ///
    /// The server treats commit as terminal either way, so the session
    /// transitions to `Closed` even when the commit itself fails; the
    /// server-reported failure (e.g. a conflict) is then returned.
    pub async fn commit(&self, payload: Bytes) -> Result<()> {
        self.ensure_open()?;
        let frame = RequestFrame::initial(RequestId::generate(), payload);
        let result = self.channel.single(frame).await.and_then(single_result);
        self.close();
        result.map(|_| ())
    }

    /// Roll back the transaction, leaving the session open for further use.
    pub async fn rollback(&self, payload: Bytes) -> Result<()> {
        self.execute(payload).await.map(|_| ())
    }

    /// Close the session.
    ///
    /// Idempotent. Fails every outstanding request with
    /// `TransactionClosed`, stops the pulse, and releases the channel.
    /// Any request issued afterwards fails immediately and locally.
    pub fn close(&self) {
        if self.state.close() {
            if let Some(shutdown) = &self.pulse_shutdown {
                let _ = shutdown.send(true);
            }
            self.channel.close_with(TxError::TransactionClosed);
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(TxError::TransactionClosed)
        }
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        self.close();
    }
}

/// One-way latency estimate: round trip minus server processing, floored
/// at zero.
fn estimate_latency(round_trip: Duration, processing: Duration) -> Duration {
    round_trip.saturating_sub(processing)
}

/// Millisecond value for the header aux field, saturating at `u64::MAX`.
fn latency_hint_millis(latency: Duration) -> u64 {
    u64::try_from(latency.as_millis()).unwrap_or(u64::MAX)
}

/// Interpret the terminal frame of a single-shot exchange.
fn single_result(response: ResponseFrame) -> Result<Bytes> {
    match response.outcome {
        ResponseOutcome::Result(payload) => Ok(payload),
        ResponseOutcome::Error(err) => Err(err.into()),
        ResponseOutcome::Continue | ResponseOutcome::Done => Err(TxError::Protocol(format!(
            "unexpected streaming signal for single-shot request {}",
            response.id
        ))),
        ResponseOutcome::NotSet => Err(TxError::MissingResponse(response.id)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latency_estimate_subtracts_processing() {
        let estimate =
            estimate_latency(Duration::from_millis(40), Duration::from_millis(5));
        assert_eq!(estimate, Duration::from_millis(35));
    }

    #[test]
    fn test_latency_estimate_floors_at_zero() {
        let estimate =
            estimate_latency(Duration::from_millis(3), Duration::from_millis(10));
        assert_eq!(estimate, Duration::ZERO);
    }

    #[test]
    fn test_latency_hint_saturates() {
        assert_eq!(latency_hint_millis(Duration::from_millis(35)), 35);
        assert_eq!(latency_hint_millis(Duration::MAX), u64::MAX);
    }

    #[test]
    fn test_state_cell_transitions() {
        let cell = StateCell::new();
        assert_eq!(cell.get(), State::Initializing);

        cell.set_open();
        assert_eq!(cell.get(), State::Open);

        assert!(cell.close());
        assert_eq!(cell.get(), State::Closed);
        // Second close is a no-op.
        assert!(!cell.close());
    }

    #[test]
    fn test_single_result_outcomes() {
        let id = RequestId::generate();

        let ok = single_result(ResponseFrame::result(id, Bytes::from_static(b"ok")));
        assert_eq!(&ok.unwrap()[..], b"ok");

        let done = single_result(ResponseFrame::done(id));
        assert!(matches!(done, Err(TxError::Protocol(_))));

        let not_set = single_result(ResponseFrame {
            id,
            outcome: ResponseOutcome::NotSet,
            processing_millis: 0,
        });
        assert!(matches!(not_set, Err(TxError::MissingResponse(_))));
    }
}
