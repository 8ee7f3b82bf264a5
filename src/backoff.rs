//! Reconnect delay policies.
//!
//! A [`BackoffPolicy`] maps an attempt number to a delay and says whether
//! the attempt is allowed at all. [`BackoffState`] is the counter the
//! connection state machine threads through its reconnect loop.

// Rust guideline compliant 2026-02

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How long to wait before reconnect attempt `n`, and how many attempts
/// are permitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackoffPolicy {
    /// `min(cap_ms, base_ms * 2^attempt)`.
    Exponential {
        /// Delay before the first retry.
        base_ms: u64,
        /// Upper bound on any single delay.
        cap_ms: u64,
        /// Retries allowed before giving up. `None` retries forever.
        max_attempts: Option<u32>,
    },
    /// The same delay before every retry.
    Fixed {
        /// Delay before each retry.
        delay_ms: u64,
        /// Retries allowed before giving up. `None` retries forever.
        max_attempts: Option<u32>,
    },
}

impl BackoffPolicy {
    /// Console channel: 1s doubling to 30s, five retries.
    pub const CONSOLE: Self = Self::Exponential {
        base_ms: 1_000,
        cap_ms: 30_000,
        max_attempts: Some(5),
    };

    /// Stats channel: every 3s, forever.
    pub const STATS: Self = Self::Fixed {
        delay_ms: 3_000,
        max_attempts: None,
    };

    /// Delay before retry number `attempt` (zero-based).
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        match *self {
            Self::Exponential { base_ms, cap_ms, .. } => {
                let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
                Duration::from_millis(base_ms.saturating_mul(factor).min(cap_ms))
            }
            Self::Fixed { delay_ms, .. } => Duration::from_millis(delay_ms),
        }
    }

    /// Retry limit, if any.
    #[must_use]
    pub fn max_attempts(&self) -> Option<u32> {
        match *self {
            Self::Exponential { max_attempts, .. } | Self::Fixed { max_attempts, .. } => {
                max_attempts
            }
        }
    }
}

/// Retry counter for one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffState {
    /// Retries scheduled since the last successful open.
    pub attempt: u32,
    /// Limit copied from the policy. `None` means unlimited.
    pub max_attempts: Option<u32>,
}

impl BackoffState {
    /// Fresh counter for `policy`.
    #[must_use]
    pub fn new(policy: &BackoffPolicy) -> Self {
        Self {
            attempt: 0,
            max_attempts: policy.max_attempts(),
        }
    }

    /// Whether another retry is allowed.
    #[must_use]
    pub fn can_retry(&self) -> bool {
        match self.max_attempts {
            Some(max) => self.attempt < max,
            None => true,
        }
    }

    /// Consume one retry, returning its delay.
    ///
    /// Returns `None` when the retry budget is exhausted.
    pub fn next_delay(&mut self, policy: &BackoffPolicy) -> Option<Duration> {
        if !self.can_retry() {
            return None;
        }
        let delay = policy.delay(self.attempt);
        self.attempt = self.attempt.saturating_add(1);
        Some(delay)
    }

    /// Back to attempt zero.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}
