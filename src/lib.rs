//! # txmux
//!
//! Multiplexed transaction transport for database drivers: turns a single
//! physical duplex stream into many independent, concurrently-awaited
//! logical request/response exchanges, and turns paginated server
//! responses into lazily-pulled result sequences.
//!
//! ## Architecture
//!
//! - **Channel** owns the stream: a dedicated writer task for outbound
//!   frames and a read loop that dispatches inbound frames to per-request
//!   inboxes by id.
//! - **Transaction** orchestrates the open/commit/rollback/close
//!   lifecycle and is the façade all requests go through.
//! - **ResultCursor** converts server `Continue`/`Done` signals into a
//!   lazy, pull-driven element sequence.
//!
//! Domain payloads are opaque bytes to this crate; request builders and
//! the typed object model live with the caller.
//!
//! ## Example
//!
//! ```ignore
//! use bytes::Bytes;
//! use txmux::{Transaction, TransactionConfig, TransactionType};
//!
//! # async fn run(io: tokio::net::TcpStream) -> txmux::Result<()> {
//! let tx = Transaction::open(
//!     io,
//!     TransactionType::Write,
//!     Bytes::from_static(b"open-req"),
//!     TransactionConfig::default(),
//! )
//! .await?;
//!
//! let rows = tx
//!     .stream(Bytes::from_static(b"query"), |page| Ok(vec![page]))
//!     .await?
//!     .collect()
//!     .await?;
//!
//! tx.commit(Bytes::from_static(b"commit-req")).await?;
//! # Ok(())
//! # }
//! ```

pub mod channel;
pub mod codec;
pub mod cursor;
pub mod error;
pub mod pending;
pub mod protocol;
pub mod pulse;
pub mod transaction;

mod writer;

pub use channel::{Channel, ChannelConfig};
pub use cursor::ResultCursor;
pub use error::{Result, TxError};
pub use protocol::{RequestFrame, RequestId, ResponseFrame, ResponseOutcome, ServerError};
pub use pulse::PulseConfig;
pub use transaction::{Transaction, TransactionConfig, TransactionType};
