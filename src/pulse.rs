//! Session keepalive pulse.
//!
//! A periodic liveness request sharing the transaction's channel and its
//! failure/close semantics. A failed pulse most commonly means the session
//! is already gone server-side, which is not an error for the client, so
//! failure stops the task silently.

use std::time::Duration;

use bytes::Bytes;
use tokio::sync::watch;

use crate::channel::Channel;
use crate::protocol::{RequestFrame, RequestId, ResponseOutcome};

/// Default pulse cadence.
pub const DEFAULT_PULSE_INTERVAL: Duration = Duration::from_secs(5);

/// Keepalive configuration.
#[derive(Debug, Clone)]
pub struct PulseConfig {
    /// Opaque liveness payload, built by the domain layer.
    pub payload: Bytes,
    /// Delay between pulses.
    pub interval: Duration,
}

impl PulseConfig {
    /// Pulse with the given payload at the default interval.
    pub fn new(payload: Bytes) -> Self {
        Self {
            payload,
            interval: DEFAULT_PULSE_INTERVAL,
        }
    }

    /// Override the pulse interval.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }
}

/// Spawn the pulse task.
///
/// Returns the shutdown signal; sending on it (or dropping it) stops the
/// task deterministically, leaving no dangling timer behind a closed
/// session.
pub(crate) fn spawn_pulse(channel: Channel, config: PulseConfig) -> watch::Sender<bool> {
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => break,
                _ = tokio::time::sleep(config.interval) => {
                    if !channel.is_open() {
                        break;
                    }
                    let frame = RequestFrame::initial(RequestId::generate(), config.payload.clone());
                    match channel.single(frame).await {
                        Ok(response) => match response.outcome {
                            ResponseOutcome::Result(_) | ResponseOutcome::Done => {}
                            other => {
                                tracing::debug!("pulse got non-result outcome, stopping: {other:?}");
                                break;
                            }
                        },
                        Err(e) => {
                            tracing::debug!("pulse failed, stopping: {}", e);
                            break;
                        }
                    }
                }
            }
        }
    });

    shutdown_tx
}
