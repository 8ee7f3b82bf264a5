//! Daemon Stream - live console and telemetry client for remote daemons.
//!
//! This crate keeps a persistent WebSocket connection to a per-instance
//! daemon, decodes console and stats frames, derives network rates and
//! recovers from disconnects on its own.
//!
//! # Architecture
//!
//! - **Decoder** - raw frame to typed event, no state
//! - **Channel** - generic reconnecting stream (state machine + driver task)
//! - **Console** - channel whose sink is a bounded [`LineBuffer`]
//! - **Stats** - channel whose sink is a [`MetricsAggregator`]
//!
//! # Modules
//!
//! - [`channel`] - connection state machine, transport seam, driver
//! - [`decoder`] - wire envelope decoding and control-code stripping
//! - [`config`] - configuration loading

// Library modules
pub mod backoff;
pub mod channel;
pub mod config;
pub mod console;
pub mod decoder;
pub mod endpoint;
pub mod error;
pub mod line_buffer;
pub mod metrics;
pub mod stats;
pub mod ws;

// Re-export commonly used types
pub use backoff::{BackoffPolicy, BackoffState};
pub use channel::{ConnectionState, StreamChannel, Transport, WsTransport};
pub use config::StreamConfig;
pub use console::ConsoleStream;
pub use endpoint::{AccessControl, ConnectionEndpoint, StaticAccess, StreamEndpoints};
pub use error::{DecodeError, StreamError};
pub use line_buffer::{LineBuffer, LineKind, LogLine};
pub use metrics::{MetricSample, MetricsAggregator, MetricsSnapshot, RateSample};
pub use stats::StatsStream;
