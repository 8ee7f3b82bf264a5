//! WebSocket plumbing for daemon sockets.
//!
//! [`open`] dials a daemon and returns the two halves of the socket, already
//! wired to the channel's [`FrameWriter`] / [`FrameReader`] traits. Nothing
//! outside this module touches `tokio-tungstenite` directly.

// Rust guideline compliant 2026-02

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::{self, Message};

use crate::channel::{FrameReader, FrameWriter};

type Socket = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

/// Close code reported when the stream ends without a close frame.
pub const ABNORMAL_CLOSURE: u16 = 1006;

/// Close code for a close frame that carried no status.
const NO_STATUS: u16 = 1005;

/// Inbound traffic as the channel driver sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WsMessage {
    /// Text frame.
    Text(String),
    /// Binary frame; decoded as lossy UTF-8 downstream.
    Binary(Vec<u8>),
    /// Ping/pong. Tungstenite answers pings on its own.
    Control,
    /// The daemon closed the socket.
    Close {
        /// Status code (1000 normal, 1005 none given).
        code: u16,
        /// Reason text, possibly empty.
        reason: String,
    },
}

/// Map a raw tungstenite message. `None` for raw frames, which a reader
/// never surfaces.
fn translate(message: Message) -> Option<WsMessage> {
    let translated = match message {
        Message::Text(text) => WsMessage::Text(text),
        Message::Binary(data) => WsMessage::Binary(data),
        Message::Ping(_) | Message::Pong(_) => WsMessage::Control,
        Message::Close(frame) => match frame {
            Some(frame) => WsMessage::Close {
                code: frame.code.into(),
                reason: frame.reason.into_owned(),
            },
            None => WsMessage::Close {
                code: NO_STATUS,
                reason: String::new(),
            },
        },
        Message::Frame(_) => return None,
    };
    Some(translated)
}

/// Outbound half of a daemon socket.
#[derive(Debug)]
pub struct SocketSink(SplitSink<Socket, Message>);

/// Inbound half of a daemon socket.
#[derive(Debug)]
pub struct SocketSource(SplitStream<Socket>);

#[async_trait]
impl FrameWriter for SocketSink {
    async fn send_text(&mut self, text: &str) -> Result<()> {
        self.0
            .send(Message::Text(text.to_owned()))
            .await
            .context("WebSocket write failed")
    }

    async fn close(&mut self) -> Result<()> {
        self.0.close().await.context("WebSocket close failed")
    }
}

#[async_trait]
impl FrameReader for SocketSource {
    async fn recv(&mut self) -> Option<Result<WsMessage>> {
        loop {
            match self.0.next().await? {
                Ok(message) => {
                    if let Some(translated) = translate(message) {
                        return Some(Ok(translated));
                    }
                }
                Err(e) => return Some(Err(anyhow::anyhow!("WebSocket read failed: {e}"))),
            }
        }
    }
}

/// Dial `url` and split the socket.
///
/// The URL already carries the access token (see
/// [`crate::endpoint::ConnectionEndpoint::connect_url`]), so no headers are
/// attached.
///
/// # Errors
///
/// Returns an error if the URL is invalid or the handshake fails.
pub async fn open(url: &str) -> Result<(SocketSink, SocketSource)> {
    use tungstenite::client::IntoClientRequest;

    let request = url
        .into_client_request()
        .with_context(|| format!("invalid WebSocket URL: {}", redact_token(url)))?;

    let (socket, response) = tokio_tungstenite::connect_async(request)
        .await
        .with_context(|| format!("WebSocket handshake with {} failed", redact_token(url)))?;
    log::debug!("[ws] Handshake complete (status {})", response.status());

    let (sink, source) = socket.split();
    Ok((SocketSink(sink), SocketSource(source)))
}

/// Rewrite `http(s)://` to `ws(s)://`. Other schemes pass through.
#[must_use]
pub fn http_to_ws_scheme(url: &str) -> String {
    if let Some(rest) = url.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = url.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        url.to_owned()
    }
}

/// Mask the `token` query parameter so URLs are safe to log.
#[must_use]
pub fn redact_token(url: &str) -> String {
    let Ok(mut parsed) = url::Url::parse(url) else {
        return url.to_string();
    };
    if !parsed.query_pairs().any(|(k, _)| k == "token") {
        return url.to_string();
    }
    let pairs: Vec<(String, String)> = parsed
        .query_pairs()
        .map(|(k, v)| {
            let v = if k == "token" { "***".to_string() } else { v.into_owned() };
            (k.into_owned(), v)
        })
        .collect();
    parsed.query_pairs_mut().clear().extend_pairs(pairs);
    parsed.to_string()
}
