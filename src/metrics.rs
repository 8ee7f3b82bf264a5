//! Rolling resource-usage history with network rate derivation.
//!
//! The daemon reports network and block-I/O byte counters cumulatively
//! since it started. Rates are derived by differencing consecutive
//! samples. A negative delta means the daemon restarted and its counters
//! went back to zero: that sample reports a rate of 0 for both directions
//! and becomes the new baseline.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default number of points kept per history.
pub const DEFAULT_HISTORY_WINDOW: usize = 60;

/// One decoded `stats` frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    /// CPU usage, percent.
    pub cpu_percent: f64,
    /// Memory usage, percent.
    pub memory_percent: f64,
    /// Cumulative bytes read from block devices.
    pub disk_read_bytes_total: u64,
    /// Cumulative bytes written to block devices.
    pub disk_write_bytes_total: u64,
    /// Cumulative bytes received.
    pub network_rx_bytes_total: u64,
    /// Cumulative bytes transmitted.
    pub network_tx_bytes_total: u64,
    /// When the sample was received.
    pub timestamp: DateTime<Utc>,
}

/// Network throughput derived from two consecutive samples.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RateSample {
    /// Received bytes per second.
    pub rx_rate: f64,
    /// Transmitted bytes per second.
    pub tx_rate: f64,
}

/// A timestamped value in a [`RollingHistory`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricPoint {
    /// Sample time.
    pub timestamp: DateTime<Utc>,
    /// Value at that time.
    pub value: f64,
}

/// FIFO of at most `window` points.
#[derive(Debug, Clone)]
pub struct RollingHistory {
    points: VecDeque<MetricPoint>,
    window: usize,
}

impl RollingHistory {
    /// Create an empty history.
    ///
    /// # Panics
    ///
    /// Panics if `window == 0`.
    #[must_use]
    pub fn new(window: usize) -> Self {
        assert!(window > 0, "RollingHistory window must be > 0");
        Self {
            points: VecDeque::with_capacity(window),
            window,
        }
    }

    /// Append a point, dropping the oldest when over the window.
    pub fn push(&mut self, timestamp: DateTime<Utc>, value: f64) {
        if self.points.len() == self.window {
            self.points.pop_front();
        }
        self.points.push_back(MetricPoint { timestamp, value });
    }

    /// Points oldest first.
    #[must_use]
    pub fn points(&self) -> Vec<MetricPoint> {
        self.points.iter().copied().collect()
    }

    /// Most recent value.
    #[must_use]
    pub fn last(&self) -> Option<f64> {
        self.points.back().map(|p| p.value)
    }

    /// Number of points held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// True if empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    fn clear(&mut self) {
        self.points.clear();
    }
}

/// Copy of all histories for rendering.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    /// CPU percent history.
    pub cpu: Vec<MetricPoint>,
    /// Memory percent history.
    pub memory: Vec<MetricPoint>,
    /// Cumulative disk-read history.
    pub disk_read: Vec<MetricPoint>,
    /// Cumulative disk-write history.
    pub disk_write: Vec<MetricPoint>,
    /// Receive rate history (bytes/sec).
    pub rx_rate: Vec<MetricPoint>,
    /// Transmit rate history (bytes/sec).
    pub tx_rate: Vec<MetricPoint>,
    /// Last sample ingested, if any.
    pub latest: Option<MetricSample>,
    /// Rates derived for `latest`.
    pub rates: RateSample,
}

/// Ingests samples into bounded histories and derives network rates.
#[derive(Debug, Clone)]
pub struct MetricsAggregator {
    cpu: RollingHistory,
    memory: RollingHistory,
    disk_read: RollingHistory,
    disk_write: RollingHistory,
    rx_rate: RollingHistory,
    tx_rate: RollingHistory,
    previous: Option<MetricSample>,
    last_rates: RateSample,
    ingested: u64,
}

impl Default for MetricsAggregator {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_WINDOW)
    }
}

impl MetricsAggregator {
    /// Create an aggregator keeping `window` points per history.
    #[must_use]
    pub fn new(window: usize) -> Self {
        Self {
            cpu: RollingHistory::new(window),
            memory: RollingHistory::new(window),
            disk_read: RollingHistory::new(window),
            disk_write: RollingHistory::new(window),
            rx_rate: RollingHistory::new(window),
            tx_rate: RollingHistory::new(window),
            previous: None,
            last_rates: RateSample::default(),
            ingested: 0,
        }
    }

    /// Record a sample and return the rates derived for it.
    pub fn ingest(&mut self, sample: MetricSample) -> RateSample {
        let rates = self
            .previous
            .map(|prev| derive_rates(&prev, &sample))
            .unwrap_or_default();

        let ts = sample.timestamp;
        self.cpu.push(ts, sample.cpu_percent);
        self.memory.push(ts, sample.memory_percent);
        self.disk_read.push(ts, sample.disk_read_bytes_total as f64);
        self.disk_write.push(ts, sample.disk_write_bytes_total as f64);
        self.rx_rate.push(ts, rates.rx_rate);
        self.tx_rate.push(ts, rates.tx_rate);

        // Rebaseline unconditionally so a counter reset is absorbed here.
        self.previous = Some(sample);
        self.last_rates = rates;
        self.ingested += 1;
        rates
    }

    /// Forget every history and the baseline sample.
    pub fn reset(&mut self) {
        for history in [
            &mut self.cpu,
            &mut self.memory,
            &mut self.disk_read,
            &mut self.disk_write,
            &mut self.rx_rate,
            &mut self.tx_rate,
        ] {
            history.clear();
        }
        self.previous = None;
        self.last_rates = RateSample::default();
    }

    /// Baseline used for the next rate derivation.
    #[must_use]
    pub fn previous(&self) -> Option<&MetricSample> {
        self.previous.as_ref()
    }

    /// Total samples ingested since creation, across resets.
    #[must_use]
    pub fn ingested(&self) -> u64 {
        self.ingested
    }

    /// True when no history is held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cpu.is_empty() && self.previous.is_none()
    }

    /// CPU percent history.
    #[must_use]
    pub fn cpu(&self) -> &RollingHistory {
        &self.cpu
    }

    /// Memory percent history.
    #[must_use]
    pub fn memory(&self) -> &RollingHistory {
        &self.memory
    }

    /// Receive rate history.
    #[must_use]
    pub fn rx_rate(&self) -> &RollingHistory {
        &self.rx_rate
    }

    /// Transmit rate history.
    #[must_use]
    pub fn tx_rate(&self) -> &RollingHistory {
        &self.tx_rate
    }

    /// Copy every history for rendering.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            cpu: self.cpu.points(),
            memory: self.memory.points(),
            disk_read: self.disk_read.points(),
            disk_write: self.disk_write.points(),
            rx_rate: self.rx_rate.points(),
            tx_rate: self.tx_rate.points(),
            latest: self.previous,
            rates: self.last_rates,
        }
    }
}

/// Bytes/sec between two cumulative snapshots.
///
/// Both rates are zero unless time moved forward and neither counter went
/// backwards.
fn derive_rates(prev: &MetricSample, current: &MetricSample) -> RateSample {
    let elapsed = (current.timestamp - prev.timestamp)
        .num_microseconds()
        .map_or(0.0, |us| us as f64 / 1_000_000.0);
    let rx_delta = current.network_rx_bytes_total as i128 - prev.network_rx_bytes_total as i128;
    let tx_delta = current.network_tx_bytes_total as i128 - prev.network_tx_bytes_total as i128;

    if elapsed > 0.0 && rx_delta >= 0 && tx_delta >= 0 {
        RateSample {
            rx_rate: rx_delta as f64 / elapsed,
            tx_rate: tx_delta as f64 / elapsed,
        }
    } else {
        RateSample::default()
    }
}
