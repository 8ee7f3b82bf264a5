//! Console channel: decoded log lines plus the command dispatcher.

// Rust guideline compliant 2026-02

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;

use crate::backoff::BackoffPolicy;
use crate::channel::{ChannelSink, ChannelSpec, ConnectionState, StreamChannel, Transport};
use crate::decoder::{decode, Decoded};
use crate::endpoint::ConnectionEndpoint;
use crate::error::StreamError;
use crate::line_buffer::{LineBuffer, LineKind, LogLine};

/// Outbound command frame: `{"type":"command","data":"..."}`.
#[derive(Debug, Serialize)]
struct CommandFrame<'a> {
    #[serde(rename = "type")]
    frame_type: &'static str,
    data: &'a str,
}

/// Channel configuration for the console stream. Stopping keeps history.
#[must_use]
pub fn console_spec(policy: BackoffPolicy) -> ChannelSpec {
    ChannelSpec {
        name: "console",
        policy,
        reset_on_stop: false,
    }
}

/// Sink that decodes console frames into a [`LineBuffer`].
#[derive(Debug, Default)]
pub struct ConsoleSink {
    buffer: LineBuffer,
}

impl ConsoleSink {
    /// Sink retaining at most `max_lines` lines.
    #[must_use]
    pub fn new(max_lines: usize) -> Self {
        Self {
            buffer: LineBuffer::new(max_lines),
        }
    }

    /// The underlying buffer.
    #[must_use]
    pub fn buffer(&self) -> &LineBuffer {
        &self.buffer
    }
}

impl ChannelSink for ConsoleSink {
    fn on_frame(&mut self, raw: &str) {
        match decode(raw, Utc::now()) {
            Ok(Decoded::Line(line)) => self.buffer.append(line),
            Ok(Decoded::Sample(_)) => log::debug!("[console] Ignoring stats frame"),
            Ok(Decoded::Connected | Decoded::Ignored) => {}
            Err(e) => {
                log::debug!("[console] {e}");
                let err = StreamError::from(e);
                self.buffer.append(LogLine::error(err.to_string()));
            }
        }
    }

    fn on_notice(&mut self, line: LogLine) {
        self.buffer.append(line);
    }
}

/// Live console for one daemon.
#[derive(Debug)]
pub struct ConsoleStream {
    channel: StreamChannel<ConsoleSink>,
}

impl ConsoleStream {
    /// Spawn the console channel. Nothing connects until [`Self::start`].
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn spawn(policy: BackoffPolicy, max_lines: usize, transport: Arc<dyn Transport>) -> Self {
        Self {
            channel: StreamChannel::spawn(console_spec(policy), ConsoleSink::new(max_lines), transport),
        }
    }

    /// Connect to `endpoint`.
    pub fn start(&self, endpoint: ConnectionEndpoint) {
        self.channel.start(endpoint);
    }

    /// Disconnect. Buffered lines are kept.
    pub fn stop(&self) {
        self.channel.stop();
    }

    /// Reconnect now with a fresh retry budget.
    pub fn force_reconnect(&self) {
        self.channel.force_reconnect();
    }

    /// Send a command to the daemon.
    ///
    /// Whitespace-only input is ignored. While disconnected the command is
    /// dropped and an error line is added instead. Once the frame has been
    /// written, the command is echoed as a `command` line.
    pub fn send_command(&self, text: &str) -> Result<(), StreamError> {
        if text.trim().is_empty() {
            return Ok(());
        }
        let frame = CommandFrame {
            frame_type: "command",
            data: text,
        };
        let payload = serde_json::to_string(&frame)
            .map_err(|e| StreamError::SendFailure(e.to_string()))?;
        self.channel
            .send_with_echo(payload, LogLine::new(text, LineKind::Command, Utc::now()))
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.channel.state()
    }

    /// Receiver for state changes.
    #[must_use]
    pub fn subscribe_state(&self) -> tokio::sync::watch::Receiver<ConnectionState> {
        self.channel.subscribe_state()
    }

    /// Snapshot of buffered lines, oldest first.
    #[must_use]
    pub fn lines(&self) -> Vec<LogLine> {
        self.channel.with_sink(|sink| sink.buffer.snapshot())
    }

    /// Lines appended after sequence number `seq`, plus the sequence number
    /// to pass next time.
    #[must_use]
    pub fn since(&self, seq: u64) -> (Vec<LogLine>, u64) {
        self.channel.with_sink(|sink| sink.buffer.since(seq))
    }

    /// Number of buffered lines.
    #[must_use]
    pub fn len(&self) -> usize {
        self.channel.with_sink(|sink| sink.buffer.len())
    }

    /// Whether the buffer is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Empty the buffer.
    pub fn clear(&self) {
        self.channel.with_sink(|sink| sink.buffer.clear());
    }
}
