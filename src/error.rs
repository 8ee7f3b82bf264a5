//! Error taxonomy for the streaming client.
//!
//! None of these are fatal to the host process. Channel operations turn
//! them into local `error` log lines or retry decisions instead of
//! returning them to the caller.

use std::fmt;

/// Errors surfaced by the streaming channels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamError {
    /// The transport could not establish the connection.
    ConnectFailure(String),
    /// A single frame did not match any known shape.
    ProtocolDecode(DecodeError),
    /// An outbound frame could not be written.
    SendFailure(String),
    /// A send was attempted while the channel was not connected.
    NotConnected,
    /// The access-control service refused to issue endpoints.
    Unauthorized(String),
}

impl fmt::Display for StreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectFailure(msg) => write!(f, "Connection failed: {msg}"),
            Self::ProtocolDecode(err) => write!(f, "Protocol decode failed: {err}"),
            Self::SendFailure(msg) => write!(f, "Send failed: {msg}"),
            Self::NotConnected => write!(f, "Cannot send command: not connected"),
            Self::Unauthorized(msg) => write!(f, "Unauthorized: {msg}"),
        }
    }
}

impl std::error::Error for StreamError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::ProtocolDecode(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DecodeError> for StreamError {
    fn from(err: DecodeError) -> Self {
        Self::ProtocolDecode(err)
    }
}

/// A frame parsed as an envelope but its payload had the wrong shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeError {
    /// Envelope `type` of the offending frame.
    pub frame_type: String,
    /// What was wrong with it.
    pub reason: String,
}

impl DecodeError {
    pub(crate) fn new(frame_type: &str, reason: impl Into<String>) -> Self {
        Self {
            frame_type: frame_type.to_string(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "malformed '{}' frame: {}", self.frame_type, self.reason)
    }
}

impl std::error::Error for DecodeError {}
