//! Connection lifecycle state machine.
//!
//! The machine owns the [`ConnectionState`] and [`BackoffState`] and turns
//! each lifecycle event into a list of [`Action`]s for the driver to carry
//! out. It never touches a socket or a timer, which keeps every transition
//! testable without a runtime.
//!
//! # State Machine
//!
//! ```text
//!               start()                 opened()
//! Disconnected ─────────► Connecting ─────────────► Connected
//!                           ▲    │ closed()              │ closed()
//!             retry_due()   │    ▼                       ▼
//!                     Reconnecting ◄──(budget left)── Disconnected
//!                                                        │ (budget spent)
//!                                                        ▼
//!   any ── stop() ─────────────────────────────────► Terminated
//! ```

// Rust guideline compliant 2026-02

use std::time::Duration;

use crate::backoff::{BackoffPolicy, BackoffState};
use crate::line_buffer::LogLine;

use super::ChannelSpec;

/// Lifecycle of one channel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ConnectionState {
    /// Never started, or the socket just closed.
    #[default]
    Disconnected,
    /// Dialling the endpoint.
    Connecting,
    /// Socket open; frames flowing.
    Connected,
    /// Waiting for a scheduled retry.
    Reconnecting {
        /// Retry number (1-based) that will fire next.
        attempt: u32,
        /// Milliseconds until it fires.
        next_retry_ms: u64,
    },
    /// Stopped explicitly or retry budget exhausted. Only `start()` leaves.
    Terminated,
}

impl ConnectionState {
    /// True when outbound frames can be sent.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Reconnecting {
                attempt,
                next_retry_ms,
            } => write!(f, "reconnecting (attempt {attempt} in {next_retry_ms}ms)"),
            Self::Terminated => write!(f, "terminated"),
        }
    }
}

/// Side effect requested by the machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Publish a state change.
    Enter(ConnectionState),
    /// Drop any socket or pending dial, then dial the endpoint.
    Dial,
    /// Close the socket and abandon any pending dial.
    Hangup,
    /// Fire `retry_due()` after the delay.
    ScheduleRetry(Duration),
    /// Forget any scheduled retry.
    CancelRetry,
    /// Hand a local line to the sink.
    Notice(LogLine),
    /// Clear the sink's accumulated state.
    ResetSink,
}

/// Sans-IO connection state machine.
#[derive(Debug, Clone)]
pub struct ChannelMachine {
    spec: ChannelSpec,
    state: ConnectionState,
    backoff: BackoffState,
}

impl ChannelMachine {
    /// New machine in `Disconnected`.
    #[must_use]
    pub fn new(spec: ChannelSpec) -> Self {
        Self {
            backoff: BackoffState::new(&spec.policy),
            spec,
            state: ConnectionState::Disconnected,
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    /// Current retry counter.
    #[must_use]
    pub fn backoff(&self) -> BackoffState {
        self.backoff
    }

    /// Reconnect policy in force.
    #[must_use]
    pub fn policy(&self) -> &BackoffPolicy {
        &self.spec.policy
    }

    /// Begin (or restart) connecting. Valid from every state.
    pub fn start(&mut self) -> Vec<Action> {
        self.backoff.reset();
        let mut actions = vec![Action::CancelRetry];
        actions.extend(self.enter(ConnectionState::Connecting));
        actions.push(Action::Dial);
        actions
    }

    /// The dial completed and the socket is open.
    pub fn opened(&mut self) -> Vec<Action> {
        if self.state != ConnectionState::Connecting {
            return Vec::new();
        }
        self.backoff.reset();
        let mut actions: Vec<Action> = self.enter(ConnectionState::Connected).into_iter().collect();
        actions.push(Action::Notice(LogLine::info("Connected")));
        actions
    }

    /// The socket closed or the dial failed.
    pub fn closed(&mut self) -> Vec<Action> {
        let was_connected = match self.state {
            ConnectionState::Connected => true,
            ConnectionState::Connecting => false,
            // Late event from a socket already torn down.
            _ => return Vec::new(),
        };

        let mut actions = vec![Action::Hangup];
        actions.extend(self.enter(ConnectionState::Disconnected));
        if was_connected {
            actions.push(Action::Notice(LogLine::info("Disconnected")));
        }

        let policy = self.spec.policy;
        if let Some(delay) = self.backoff.next_delay(&policy) {
            actions.extend(self.enter(ConnectionState::Reconnecting {
                attempt: self.backoff.attempt,
                next_retry_ms: delay.as_millis() as u64,
            }));
            actions.push(Action::ScheduleRetry(delay));
        } else {
            actions.extend(self.enter(ConnectionState::Terminated));
            actions.push(Action::Notice(LogLine::error(format!(
                "Connection lost: gave up after {} reconnect attempts",
                self.backoff.attempt
            ))));
        }
        actions
    }

    /// A scheduled retry fired.
    pub fn retry_due(&mut self) -> Vec<Action> {
        if !matches!(self.state, ConnectionState::Reconnecting { .. }) {
            return Vec::new();
        }
        let mut actions: Vec<Action> = self.enter(ConnectionState::Connecting).into_iter().collect();
        actions.push(Action::Dial);
        actions
    }

    /// Tear everything down. Idempotent.
    pub fn stop(&mut self) -> Vec<Action> {
        let mut actions = vec![Action::CancelRetry, Action::Hangup];
        actions.extend(self.enter(ConnectionState::Terminated));
        if self.spec.reset_on_stop {
            actions.push(Action::ResetSink);
        }
        actions
    }

    /// Reconnect now, skipping any pending backoff delay.
    ///
    /// Unlike [`Self::stop`] this never resets the sink: the channel is not
    /// being disabled.
    pub fn force_reconnect(&mut self) -> Vec<Action> {
        let mut actions = vec![Action::Hangup];
        actions.extend(self.start());
        actions
    }

    fn enter(&mut self, next: ConnectionState) -> Option<Action> {
        if self.state == next {
            return None;
        }
        self.state = next.clone();
        Some(Action::Enter(next))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::line_buffer::LineKind;

    fn console() -> ChannelMachine {
        ChannelMachine::new(ChannelSpec {
            name: "console",
            policy: BackoffPolicy::CONSOLE,
            reset_on_stop: false,
        })
    }

    fn stats() -> ChannelMachine {
        ChannelMachine::new(ChannelSpec {
            name: "stats",
            policy: BackoffPolicy::STATS,
            reset_on_stop: true,
        })
    }

    fn states(actions: &[Action]) -> Vec<ConnectionState> {
        actions
            .iter()
            .filter_map(|a| match a {
                Action::Enter(s) => Some(s.clone()),
                _ => None,
            })
            .collect()
    }

    fn notices(actions: &[Action]) -> Vec<(LineKind, String)> {
        actions
            .iter()
            .filter_map(|a| match a {
                Action::Notice(l) => Some((l.kind, l.text.clone())),
                _ => None,
            })
            .collect()
    }

    fn retry_delay(actions: &[Action]) -> Option<Duration> {
        actions.iter().find_map(|a| match a {
            Action::ScheduleRetry(d) => Some(*d),
            _ => None,
        })
    }

    #[test]
    fn new_machine_is_disconnected() {
        assert_eq!(console().state(), &ConnectionState::Disconnected);
    }

    #[test]
    fn start_dials() {
        let mut m = console();
        let actions = m.start();
        assert_eq!(states(&actions), [ConnectionState::Connecting]);
        assert!(actions.contains(&Action::Dial));
        assert!(actions.contains(&Action::CancelRetry));
    }

    #[test]
    fn open_announces_connected_and_resets_backoff() {
        let mut m = console();
        m.start();
        m.closed();
        m.retry_due();
        assert_eq!(m.backoff().attempt, 1);

        let actions = m.opened();
        assert_eq!(m.state(), &ConnectionState::Connected);
        assert_eq!(m.backoff().attempt, 0);
        assert_eq!(notices(&actions), [(LineKind::Info, "Connected".to_string())]);
    }

    #[test]
    fn connected_close_cycles_follow_expected_sequence() {
        let mut m = console();
        let mut seen = Vec::new();
        for _ in 0..3 {
            let mut actions = if m.state() == &ConnectionState::Disconnected {
                m.start()
            } else {
                m.retry_due()
            };
            actions.extend(m.opened());
            let closed = m.closed();
            assert_eq!(retry_delay(&closed), Some(Duration::from_secs(1)));
            assert!(notices(&closed).contains(&(LineKind::Info, "Disconnected".to_string())));
            actions.extend(closed);
            seen.extend(states(&actions));
        }
        let cycle = [
            ConnectionState::Connecting,
            ConnectionState::Connected,
            ConnectionState::Disconnected,
            ConnectionState::Reconnecting {
                attempt: 1,
                next_retry_ms: 1000,
            },
        ];
        let expected: Vec<ConnectionState> = cycle.iter().cycle().take(12).cloned().collect();
        assert_eq!(seen, expected);
    }

    #[test]
    fn failed_dials_back_off_exponentially_then_terminate() {
        let mut m = console();
        m.start();
        let mut delays = Vec::new();
        loop {
            let actions = m.closed();
            match retry_delay(&actions) {
                Some(d) => {
                    delays.push(d.as_millis() as u64);
                    assert!(notices(&actions).is_empty(), "dial failures are silent");
                    m.retry_due();
                }
                None => {
                    assert_eq!(m.state(), &ConnectionState::Terminated);
                    let n = notices(&actions);
                    assert_eq!(n.len(), 1);
                    assert_eq!(n[0].0, LineKind::Error);
                    break;
                }
            }
        }
        assert_eq!(delays, [1_000, 2_000, 4_000, 8_000, 16_000]);

        // No automatic way out of Terminated.
        assert!(m.retry_due().is_empty());
        assert!(m.closed().is_empty());
        assert!(m.opened().is_empty());
        assert_eq!(m.state(), &ConnectionState::Terminated);
    }

    #[test]
    fn start_after_exhaustion_restores_budget() {
        let mut m = console();
        m.start();
        while m.state() != &ConnectionState::Terminated {
            m.closed();
            m.retry_due();
        }
        m.start();
        assert_eq!(m.backoff().attempt, 0);
        let actions = m.closed();
        assert_eq!(retry_delay(&actions), Some(Duration::from_secs(1)));
    }

    #[test]
    fn stats_policy_never_terminates_on_its_own() {
        let mut m = stats();
        m.start();
        for _ in 0..100 {
            let actions = m.closed();
            assert_eq!(retry_delay(&actions), Some(Duration::from_secs(3)));
            m.retry_due();
        }
        assert_eq!(m.state(), &ConnectionState::Connecting);
    }

    #[test]
    fn stop_is_idempotent_and_cancels_retry() {
        let mut m = console();
        m.start();
        m.closed();
        assert!(matches!(m.state(), ConnectionState::Reconnecting { .. }));

        let first = m.stop();
        assert!(first.contains(&Action::CancelRetry));
        assert!(first.contains(&Action::Hangup));
        assert_eq!(states(&first), [ConnectionState::Terminated]);

        let second = m.stop();
        assert!(states(&second).is_empty());
        assert_eq!(m.state(), &ConnectionState::Terminated);

        // A retry timer that raced the stop is ignored.
        assert!(m.retry_due().is_empty());
    }

    #[test]
    fn stop_resets_sink_only_when_configured() {
        let mut c = console();
        c.start();
        assert!(!c.stop().contains(&Action::ResetSink));

        let mut s = stats();
        s.start();
        assert!(s.stop().contains(&Action::ResetSink));
    }

    #[test]
    fn force_reconnect_skips_pending_delay() {
        let mut m = console();
        m.start();
        m.closed();
        m.retry_due();
        m.closed();
        assert_eq!(m.backoff().attempt, 2);

        let actions = m.force_reconnect();
        assert_eq!(m.backoff().attempt, 0);
        assert_eq!(m.state(), &ConnectionState::Connecting);
        assert!(actions.contains(&Action::CancelRetry));
        assert!(actions.contains(&Action::Dial));
        assert!(!actions.contains(&Action::ResetSink));
    }

    #[test]
    fn late_close_after_stop_is_ignored() {
        let mut m = console();
        m.start();
        m.opened();
        m.stop();
        assert!(m.closed().is_empty());
    }
}
