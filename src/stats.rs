//! Stats channel: resource samples into a [`MetricsAggregator`].
//!
//! Unlike the console, stopping this channel clears everything it has
//! aggregated.

use std::sync::Arc;

use chrono::Utc;

use crate::backoff::BackoffPolicy;
use crate::channel::{ChannelSink, ChannelSpec, ConnectionState, StreamChannel, Transport};
use crate::decoder::{decode, Decoded};
use crate::endpoint::ConnectionEndpoint;
use crate::line_buffer::LogLine;
use crate::metrics::{MetricsAggregator, MetricsSnapshot};

/// Channel configuration for the stats stream. Stopping resets history.
#[must_use]
pub fn stats_spec(policy: BackoffPolicy) -> ChannelSpec {
    ChannelSpec {
        name: "stats",
        policy,
        reset_on_stop: true,
    }
}

/// Sink that feeds `stats` frames to a [`MetricsAggregator`].
#[derive(Debug, Default)]
pub struct StatsSink {
    aggregator: MetricsAggregator,
}

impl StatsSink {
    /// Sink keeping `window` points per history.
    #[must_use]
    pub fn new(window: usize) -> Self {
        Self {
            aggregator: MetricsAggregator::new(window),
        }
    }

    /// The underlying aggregator.
    #[must_use]
    pub fn aggregator(&self) -> &MetricsAggregator {
        &self.aggregator
    }
}

impl ChannelSink for StatsSink {
    fn on_frame(&mut self, raw: &str) {
        match decode(raw, Utc::now()) {
            Ok(Decoded::Sample(sample)) => {
                let rates = self.aggregator.ingest(sample);
                log::trace!(
                    "[stats] cpu={:.1}% mem={:.1}% rx={:.0}B/s tx={:.0}B/s",
                    sample.cpu_percent,
                    sample.memory_percent,
                    rates.rx_rate,
                    rates.tx_rate
                );
            }
            Ok(_) => {}
            // Decode failures on this channel are skipped.
            Err(e) => log::debug!("[stats] Skipping frame: {e}"),
        }
    }

    fn on_notice(&mut self, line: LogLine) {
        log::debug!("[stats] {}", line.text);
    }

    fn reset(&mut self) {
        self.aggregator.reset();
    }
}

/// Live resource metrics for one daemon.
#[derive(Debug)]
pub struct StatsStream {
    channel: StreamChannel<StatsSink>,
}

impl StatsStream {
    /// Spawn the stats channel. Nothing connects until [`Self::start`].
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn spawn(policy: BackoffPolicy, window: usize, transport: Arc<dyn Transport>) -> Self {
        Self {
            channel: StreamChannel::spawn(stats_spec(policy), StatsSink::new(window), transport),
        }
    }

    /// Connect to `endpoint`.
    pub fn start(&self, endpoint: ConnectionEndpoint) {
        self.channel.start(endpoint);
    }

    /// Disconnect and clear all histories.
    pub fn stop(&self) {
        self.channel.stop();
    }

    /// Reconnect now. Histories are kept.
    pub fn force_reconnect(&self) {
        self.channel.force_reconnect();
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

    /// Copy of every history plus the latest sample and rates.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        self.channel.with_sink(|sink| sink.aggregator.snapshot())
    }

    /// Samples ingested over the channel's lifetime.
    #[must_use]
    pub fn ingested(&self) -> u64 {
        self.channel.with_sink(|sink| sink.aggregator.ingested())
    }
}
