//! Configuration loading.
//!
//! Defaults, then an optional JSON file, then environment overrides.

// Rust guideline compliant 2026-02

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::backoff::BackoffPolicy;
use crate::line_buffer::DEFAULT_MAX_LINES;
use crate::metrics::DEFAULT_HISTORY_WINDOW;

/// Environment variable naming a config file.
pub const CONFIG_ENV: &str = "DAEMON_STREAM_CONFIG";

/// Tunables for the console and stats channels.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct StreamConfig {
    /// Console lines retained before the oldest are evicted.
    pub max_lines: usize,
    /// Points kept per metric history.
    pub history_window: usize,
    /// Reconnect policy for the console channel.
    pub console_retry: BackoffPolicy,
    /// Reconnect policy for the stats channel.
    pub stats_retry: BackoffPolicy,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            max_lines: DEFAULT_MAX_LINES,
            history_window: DEFAULT_HISTORY_WINDOW,
            console_retry: BackoffPolicy::CONSOLE,
            stats_retry: BackoffPolicy::STATS,
        }
    }
}

impl StreamConfig {
    /// Platform config file location (`~/.config/daemon-stream/config.json`
    /// on Linux).
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("daemon-stream").join("config.json"))
    }

    /// Load configuration.
    ///
    /// File selection priority:
    /// 1. `explicit` (the `--config` flag); must exist
    /// 2. `DAEMON_STREAM_CONFIG`; must exist
    /// 3. [`Self::default_path`], if present
    ///
    /// Environment overrides are applied last, then the result is validated.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let from_env = std::env::var_os(CONFIG_ENV).map(PathBuf::from);
        let mut config = match explicit.map(Path::to_path_buf).or(from_env) {
            Some(path) => Self::load_from_file(&path)?,
            None => match Self::default_path().filter(|p| p.exists()) {
                Some(path) => Self::load_from_file(&path)?,
                None => Self::default(),
            },
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Parse a config file. Missing fields take their defaults.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config = serde_json::from_str(&content)
            .with_context(|| format!("Invalid config file {}", path.display()))?;
        log::debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Apply `DAEMON_STREAM_*` overrides read through `lookup`.
    /// Values that do not parse are ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let parsed = |key: &str| lookup(key).and_then(|v| v.trim().parse::<u64>().ok());

        if let Some(max_lines) = parsed("DAEMON_STREAM_MAX_LINES") {
            if let Ok(max_lines) = usize::try_from(max_lines) {
                self.max_lines = max_lines;
            }
        }

        if let Some(window) = parsed("DAEMON_STREAM_HISTORY_WINDOW") {
            if let Ok(window) = usize::try_from(window) {
                self.history_window = window;
            }
        }

        if let Some(attempts) = parsed("DAEMON_STREAM_CONSOLE_MAX_ATTEMPTS") {
            if let Ok(attempts) = u32::try_from(attempts) {
                match &mut self.console_retry {
                    BackoffPolicy::Exponential { max_attempts, .. }
                    | BackoffPolicy::Fixed { max_attempts, .. } => *max_attempts = Some(attempts),
                }
            }
        }

        if let Some(delay) = parsed("DAEMON_STREAM_STATS_DELAY_MS") {
            match &mut self.stats_retry {
                BackoffPolicy::Fixed { delay_ms, .. } => *delay_ms = delay,
                BackoffPolicy::Exponential { base_ms, .. } => *base_ms = delay,
            }
        }
    }

    /// Reject values that would make a buffer unusable.
    pub fn validate(&self) -> Result<()> {
        if self.max_lines == 0 {
            anyhow::bail!("max_lines must be at least 1");
        }
        if self.history_window == 0 {
            anyhow::bail!("history_window must be at least 1");
        }
        Ok(())
    }
}
