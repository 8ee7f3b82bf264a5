//! Bounded scrollback of decoded console lines.
//!
//! When the buffer is full, appending evicts the oldest line from the
//! front. Contents survive reconnects; only [`LineBuffer::clear`] empties
//! the buffer.

// Rust guideline compliant 2026-02

use std::collections::VecDeque;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default number of retained console lines.
pub const DEFAULT_MAX_LINES: usize = 500;

/// Origin of a console line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LineKind {
    /// Process standard output.
    Stdout,
    /// Process standard error.
    Stderr,
    /// Echo of a command the local user sent.
    Command,
    /// Local connection notice.
    Info,
    /// Local or daemon-reported error.
    Error,
}

impl fmt::Display for LineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Stdout => "stdout",
            Self::Stderr => "stderr",
            Self::Command => "command",
            Self::Info => "info",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

/// One immutable console line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogLine {
    /// Display text, already stripped of control sequences.
    pub text: String,
    /// Classification.
    pub kind: LineKind,
    /// When the line was produced (daemon timestamp when provided).
    pub timestamp: DateTime<Utc>,
}

impl LogLine {
    /// Create a line stamped with the given time.
    pub fn new(text: impl Into<String>, kind: LineKind, timestamp: DateTime<Utc>) -> Self {
        Self {
            text: text.into(),
            kind,
            timestamp,
        }
    }

    /// Local notice stamped now.
    pub fn info(text: impl Into<String>) -> Self {
        Self::new(text, LineKind::Info, Utc::now())
    }

    /// Local error stamped now.
    pub fn error(text: impl Into<String>) -> Self {
        Self::new(text, LineKind::Error, Utc::now())
    }
}

/// Fixed-capacity FIFO of [`LogLine`]s.
#[derive(Debug, Clone)]
pub struct LineBuffer {
    lines: VecDeque<LogLine>,
    max_lines: usize,
    /// Lines ever appended; used as a cursor by incremental readers.
    appended: u64,
}

impl Default for LineBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_LINES)
    }
}

impl LineBuffer {
    /// Create a buffer holding at most `max_lines` lines.
    ///
    /// # Panics
    ///
    /// Panics if `max_lines == 0`.
    #[must_use]
    pub fn new(max_lines: usize) -> Self {
        assert!(max_lines > 0, "LineBuffer max_lines must be > 0");
        Self {
            lines: VecDeque::with_capacity(max_lines.min(1024)),
            max_lines,
            appended: 0,
        }
    }

    /// Append a line, evicting from the front until within `max_lines`.
    pub fn append(&mut self, line: LogLine) {
        self.lines.push_back(line);
        self.appended += 1;
        while self.lines.len() > self.max_lines {
            self.lines.pop_front();
        }
    }

    /// Drop every buffered line. The append cursor keeps counting.
    pub fn clear(&mut self) {
        self.lines.clear();
    }

    /// Copy of all buffered lines, oldest first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<LogLine> {
        self.lines.iter().cloned().collect()
    }

    /// Iterate buffered lines, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &LogLine> {
        self.lines.iter()
    }

    /// Lines appended after cursor `seq` that are still buffered, plus the
    /// cursor to pass next time.
    ///
    /// Lines evicted before the reader caught up are skipped.
    #[must_use]
    pub fn since(&self, seq: u64) -> (Vec<LogLine>, u64) {
        let first_retained = self.appended - self.lines.len() as u64;
        let skip = seq.saturating_sub(first_retained) as usize;
        let lines = self.lines.iter().skip(skip).cloned().collect();
        (lines, self.appended)
    }

    /// Number of buffered lines.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    /// True if no lines are buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Configured maximum line count.
    #[must_use]
    pub fn max_lines(&self) -> usize {
        self.max_lines
    }
}
