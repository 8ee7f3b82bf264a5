//! Resilient streaming channel to a daemon endpoint.
//!
//! One generic channel serves both the console and the stats stream. The
//! two differ only in configuration:
//!
//! - a [`ChannelSink`] that decodes frames and stores the results,
//! - a [`BackoffPolicy`](crate::backoff::BackoffPolicy) for reconnects,
//! - whether stopping the channel resets the sink.
//!
//! # Architecture
//!
//! ```text
//!   StreamChannel (handle)            driver task
//!         │  start/stop/send ──────►  ChannelMachine ─► actions
//!         │                              │  Dial / Hangup / Retry
//!         │  state() ◄── watch ───────   │  Notice / ResetSink
//!         │                              ▼
//!   Arc<Mutex<Sink>> ◄── frames ───── Transport (WebSocket)
//! ```
//!
//! The driver is a single task, so sink mutations from socket events are
//! sequential. The state machine in [`machine`] performs no I/O.
//!
//! Rust guideline compliant 2025-01

pub mod machine;
pub mod stream;
pub mod transport;

use crate::backoff::BackoffPolicy;
use crate::line_buffer::LogLine;

pub use machine::{Action, ChannelMachine, ConnectionState};
pub use stream::StreamChannel;
pub use transport::{FrameReader, FrameWriter, Link, Transport, WsTransport};

/// Static configuration of one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelSpec {
    /// Tag used in log output (`console`, `stats`).
    pub name: &'static str,
    /// Reconnect delays and retry budget.
    pub policy: BackoffPolicy,
    /// Whether [`ChannelSink::reset`] runs when the channel is stopped.
    pub reset_on_stop: bool,
}

/// Consumer of a channel's inbound traffic.
///
/// Called from the driver task only, one event at a time.
pub trait ChannelSink: Send + 'static {
    /// Handle one inbound text frame.
    fn on_frame(&mut self, raw: &str);

    /// Record a locally generated line (connection notices, local errors).
    fn on_notice(&mut self, line: LogLine);

    /// Drop accumulated state. Runs on stop when [`ChannelSpec::reset_on_stop`] is set.
    fn reset(&mut self) {}
}
