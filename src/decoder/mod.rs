//! Inbound frame decoding.
//!
//! The daemon speaks a JSON envelope `{"type": ..., "data": ...}`. Each
//! text frame is turned into at most one typed event:
//!
//! | `type`                  | result                                  |
//! |-------------------------|-----------------------------------------|
//! | `log`                   | stdout/stderr [`LogLine`]               |
//! | `stats`                 | [`MetricSample`]                        |
//! | `connected`             | [`Decoded::Connected`] (no line)        |
//! | `error`                 | error [`LogLine`]                       |
//! | `output`, `stdout`      | stdout [`LogLine`] (legacy daemons)     |
//! | `stderr`                | stderr [`LogLine`] (legacy daemons)     |
//! | anything else           | [`Decoded::Ignored`]                    |
//!
//! Frames that are not a JSON envelope at all are shown verbatim as
//! stdout text.
//!
//! Decoding is a pure function of the frame and the receive time.

pub mod ansi;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

use crate::error::DecodeError;
use crate::line_buffer::{LineKind, LogLine};
use crate::metrics::MetricSample;

pub use ansi::strip_control_codes;

/// Result of decoding one inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    /// A console line to buffer.
    Line(LogLine),
    /// A resource-usage sample to aggregate.
    Sample(MetricSample),
    /// Daemon handshake acknowledgement.
    Connected,
    /// Nothing to show (unknown type, empty line).
    Ignored,
}

/// Wire envelope shared by every inbound frame.
#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    frame_type: String,
    #[serde(default)]
    data: Value,
    #[serde(default)]
    message: Option<Value>,
}

/// Payload of a `log` frame.
#[derive(Debug, Default, Deserialize)]
struct LogPayload {
    #[serde(rename = "type", default)]
    stream: Option<String>,
    #[serde(default)]
    data: String,
    #[serde(default)]
    timestamp: Option<String>,
}

/// Every frame shape the client understands.
#[derive(Debug)]
enum Frame {
    Log(LogPayload),
    Stats(Value),
    Connected,
    DaemonError(String),
    Output { kind: LineKind, text: String },
    Unknown(String),
}

impl TryFrom<Envelope> for Frame {
    type Error = DecodeError;

    fn try_from(env: Envelope) -> Result<Self, DecodeError> {
        let frame = match env.frame_type.as_str() {
            "log" => Self::Log(log_payload(&env)?),
            "stats" => Self::Stats(stats_payload(&env)?),
            "connected" => Self::Connected,
            "error" => Self::DaemonError(error_text(&env)),
            "output" | "stdout" => Self::Output {
                kind: LineKind::Stdout,
                text: legacy_text(&env)?,
            },
            "stderr" => Self::Output {
                kind: LineKind::Stderr,
                text: legacy_text(&env)?,
            },
            _ => Self::Unknown(env.frame_type),
        };
        Ok(frame)
    }
}

/// Decode one raw text frame received at `received_at`.
///
/// # Errors
///
/// Returns [`DecodeError`] when the frame is a valid envelope whose
/// payload does not have the shape its `type` requires. Non-JSON input is
/// never an error.
pub fn decode(raw: &str, received_at: DateTime<Utc>) -> Result<Decoded, DecodeError> {
    let Ok(envelope) = serde_json::from_str::<Envelope>(raw) else {
        return Ok(plain_text(raw, received_at));
    };

    let decoded = match Frame::try_from(envelope)? {
        Frame::Log(payload) => {
            let kind = match payload.stream.as_deref() {
                Some(s) if s.eq_ignore_ascii_case("stderr") => LineKind::Stderr,
                _ => LineKind::Stdout,
            };
            let timestamp = payload
                .timestamp
                .as_deref()
                .and_then(parse_timestamp)
                .unwrap_or(received_at);
            clean_line(&payload.data, true)
                .map_or(Decoded::Ignored, |text| Decoded::Line(LogLine::new(text, kind, timestamp)))
        }
        Frame::Stats(data) => Decoded::Sample(stats_sample(&data, received_at)),
        Frame::Connected => Decoded::Connected,
        Frame::DaemonError(text) => Decoded::Line(LogLine::new(text, LineKind::Error, received_at)),
        Frame::Output { kind, text } => clean_line(&text, false)
            .map_or(Decoded::Ignored, |text| Decoded::Line(LogLine::new(text, kind, received_at))),
        Frame::Unknown(frame_type) => {
            log::trace!("[decoder] Ignoring frame type '{}'", frame_type);
            Decoded::Ignored
        }
    };
    Ok(decoded)
}

fn plain_text(raw: &str, received_at: DateTime<Utc>) -> Decoded {
    clean_line(raw, false).map_or(Decoded::Ignored, |text| {
        Decoded::Line(LogLine::new(text, LineKind::Stdout, received_at))
    })
}

/// Strip control codes, one trailing newline and (for `log` frames) a
/// leading timestamp. `None` when nothing visible remains.
fn clean_line(raw: &str, strip_timestamp: bool) -> Option<String> {
    let stripped = strip_control_codes(raw);
    let mut text = stripped.strip_suffix('\n').unwrap_or(&stripped);
    if strip_timestamp {
        text = strip_timestamp_prefix(text);
    }
    if text.trim().is_empty() {
        None
    } else {
        Some(text.to_string())
    }
}

/// Remove a leading ISO-8601 timestamp token (`2024-05-01T12:00:00.123Z `).
fn strip_timestamp_prefix(text: &str) -> &str {
    let token_end = text.find(char::is_whitespace).unwrap_or(text.len());
    let token = &text[..token_end];
    if token.len() < 19 || parse_timestamp(token).is_none() {
        return text;
    }
    let rest = &text[token_end..];
    rest.strip_prefix(' ').unwrap_or(rest)
}

fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

fn log_payload(env: &Envelope) -> Result<LogPayload, DecodeError> {
    match &env.data {
        Value::String(text) => Ok(LogPayload {
            data: text.clone(),
            ..LogPayload::default()
        }),
        Value::Object(_) => serde_json::from_value(env.data.clone())
            .map_err(|e| DecodeError::new("log", e.to_string())),
        other => Err(DecodeError::new("log", format!("unexpected data: {other}"))),
    }
}

/// Stats data is normally an object; some daemons send it JSON-encoded.
fn stats_payload(env: &Envelope) -> Result<Value, DecodeError> {
    match &env.data {
        Value::Object(_) => Ok(env.data.clone()),
        Value::String(encoded) => match serde_json::from_str::<Value>(encoded) {
            Ok(inner @ Value::Object(_)) => Ok(inner),
            _ => Err(DecodeError::new("stats", "data string is not a JSON object")),
        },
        Value::Null => Ok(Value::Object(serde_json::Map::new())),
        other => Err(DecodeError::new("stats", format!("unexpected data: {other}"))),
    }
}

fn error_text(env: &Envelope) -> String {
    let from_data = match &env.data {
        Value::String(s) => Some(s.clone()),
        Value::Object(map) => map.get("message").and_then(Value::as_str).map(str::to_string),
        _ => None,
    };
    let text = from_data
        .or_else(|| env.message.as_ref().and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| "Unknown daemon error".to_string());
    strip_control_codes(&text)
}

fn legacy_text(env: &Envelope) -> Result<String, DecodeError> {
    match &env.data {
        Value::String(s) => Ok(s.clone()),
        other => Err(DecodeError::new(
            &env.frame_type,
            format!("expected string data, got {other}"),
        )),
    }
}

/// Read nested numeric fields, treating anything missing or non-numeric as 0.
fn stats_sample(data: &Value, received_at: DateTime<Utc>) -> MetricSample {
    MetricSample {
        cpu_percent: gauge(data, "/cpu/usage_percent"),
        memory_percent: gauge(data, "/memory/usage_percent"),
        disk_read_bytes_total: counter(data, "/block_io/read_bytes"),
        disk_write_bytes_total: counter(data, "/block_io/write_bytes"),
        network_rx_bytes_total: counter(data, "/network/rx_bytes"),
        network_tx_bytes_total: counter(data, "/network/tx_bytes"),
        timestamp: received_at,
    }
}

fn gauge(data: &Value, pointer: &str) -> f64 {
    data.pointer(pointer)
        .and_then(Value::as_f64)
        .filter(|v| v.is_finite())
        .unwrap_or(0.0)
}

fn counter(data: &Value, pointer: &str) -> u64 {
    match data.pointer(pointer) {
        Some(v) => v
            .as_u64()
            .or_else(|| v.as_f64().filter(|f| *f > 0.0).map(|f| f as u64))
            .unwrap_or(0),
        None => 0,
    }
}
