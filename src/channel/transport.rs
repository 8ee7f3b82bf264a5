//! Transport seam between the channel driver and the network.
//!
//! The driver only needs "dial a URL, then read and write text frames".
//! [`WsTransport`] provides that over [`crate::ws`]; tests substitute an
//! in-memory transport.

// Rust guideline compliant 2026-02

use anyhow::Result;
use async_trait::async_trait;

use crate::ws::WsMessage;

/// Outbound half of an open link.
#[async_trait]
pub trait FrameWriter: Send {
    /// Write one text frame.
    async fn send_text(&mut self, text: &str) -> Result<()>;

    /// Close the link.
    async fn close(&mut self) -> Result<()>;
}

/// Inbound half of an open link.
#[async_trait]
pub trait FrameReader: Send {
    /// Next message, or `None` once the link has ended.
    async fn recv(&mut self) -> Option<Result<WsMessage>>;
}

/// An open connection, split into halves.
pub struct Link {
    /// Outbound half.
    pub writer: Box<dyn FrameWriter>,
    /// Inbound half.
    pub reader: Box<dyn FrameReader>,
}

impl std::fmt::Debug for Link {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Link").finish_non_exhaustive()
    }
}

/// Dials endpoints.
#[async_trait]
pub trait Transport: Send + Sync + std::fmt::Debug {
    /// Open a link to `url`.
    ///
    /// A failure here is a connect failure and goes through the channel's
    /// retry policy exactly like a close.
    async fn connect(&self, url: &str) -> Result<Link>;
}

/// WebSocket transport backed by `tokio-tungstenite`.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsTransport;

#[async_trait]
impl Transport for WsTransport {
    async fn connect(&self, url: &str) -> Result<Link> {
        let (sink, source) = crate::ws::open(url).await?;
        Ok(Link {
            writer: Box::new(sink),
            reader: Box::new(source),
        })
    }
}
