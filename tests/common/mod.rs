//! In-memory daemon used by the integration tests.
//!
//! `ScriptedTransport` records every dial and either refuses it or hands
//! back a link whose far end is a [`Remote`] the test drives.

#![allow(dead_code, reason = "each test binary uses a different subset")]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use daemon_stream::channel::{FrameReader, FrameWriter, Link, Transport};
use daemon_stream::ws::WsMessage;
use daemon_stream::ConnectionState;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

/// Far end of one accepted link.
#[derive(Debug, Clone)]
pub struct Remote {
    inbound: mpsc::UnboundedSender<Result<WsMessage>>,
    sent: Arc<Mutex<Vec<String>>>,
    fail_writes: Arc<AtomicBool>,
    closed: Arc<AtomicBool>,
}

impl Remote {
    /// Deliver a text frame to the client.
    pub fn push_text(&self, text: &str) {
        let _ = self.inbound.send(Ok(WsMessage::Text(text.to_string())));
    }

    /// Deliver a binary frame to the client.
    pub fn push_binary(&self, data: &[u8]) {
        let _ = self.inbound.send(Ok(WsMessage::Binary(data.to_vec())));
    }

    /// Close the link from the daemon side.
    pub fn close(&self) {
        let _ = self.inbound.send(Ok(WsMessage::Close {
            code: 1000,
            reason: "bye".to_string(),
        }));
    }

    /// Frames the client has written.
    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }

    /// Make every later client write fail.
    pub fn fail_writes(&self) {
        self.fail_writes.store(true, Ordering::SeqCst);
    }

    /// Whether the client closed its side.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

struct ScriptedWriter {
    sent: Arc<Mutex<Vec<String>>>,
    fail_writes: Arc<AtomicBool>,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl FrameWriter for ScriptedWriter {
    async fn send_text(&mut self, text: &str) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            anyhow::bail!("broken pipe");
        }
        self.sent.lock().unwrap().push(text.to_string());
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

struct ScriptedReader {
    inbound: mpsc::UnboundedReceiver<Result<WsMessage>>,
}

#[async_trait]
impl FrameReader for ScriptedReader {
    async fn recv(&mut self) -> Option<Result<WsMessage>> {
        self.inbound.recv().await
    }
}

/// Transport that accepts or refuses dials on demand.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    refuse: AtomicBool,
    dials: Mutex<Vec<(Instant, String)>>,
    remotes: Mutex<Vec<Remote>>,
}

impl ScriptedTransport {
    /// Accepting transport.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Transport that refuses every dial until [`Self::accept`] is called.
    pub fn refusing() -> Arc<Self> {
        let transport = Self::new();
        transport.refuse.store(true, Ordering::SeqCst);
        transport
    }

    /// Accept later dials.
    pub fn accept(&self) {
        self.refuse.store(false, Ordering::SeqCst);
    }

    /// Refuse later dials.
    pub fn refuse(&self) {
        self.refuse.store(true, Ordering::SeqCst);
    }

    /// URLs dialled so far.
    pub fn dialed(&self) -> Vec<String> {
        self.dials.lock().unwrap().iter().map(|(_, url)| url.clone()).collect()
    }

    /// Number of dials so far.
    pub fn dial_count(&self) -> usize {
        self.dials.lock().unwrap().len()
    }

    /// Gaps between consecutive dials, in milliseconds.
    pub fn dial_gaps_ms(&self) -> Vec<u128> {
        let dials = self.dials.lock().unwrap();
        dials
            .windows(2)
            .map(|pair| (pair[1].0 - pair[0].0).as_millis())
            .collect()
    }

    /// When each dial happened.
    pub fn dial_times(&self) -> Vec<Instant> {
        self.dials.lock().unwrap().iter().map(|(at, _)| *at).collect()
    }

    /// Far end of the most recently accepted link.
    pub fn last_remote(&self) -> Remote {
        self.remotes.lock().unwrap().last().cloned().expect("no link accepted yet")
    }

    /// Number of accepted links.
    pub fn accepted(&self) -> usize {
        self.remotes.lock().unwrap().len()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn connect(&self, url: &str) -> Result<Link> {
        self.dials.lock().unwrap().push((Instant::now(), url.to_string()));
        if self.refuse.load(Ordering::SeqCst) {
            anyhow::bail!("connection refused");
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let remote = Remote {
            inbound: tx,
            sent: Arc::default(),
            fail_writes: Arc::default(),
            closed: Arc::default(),
        };
        let link = Link {
            writer: Box::new(ScriptedWriter {
                sent: Arc::clone(&remote.sent),
                fail_writes: Arc::clone(&remote.fail_writes),
                closed: Arc::clone(&remote.closed),
            }),
            reader: Box::new(ScriptedReader { inbound: rx }),
        };
        self.remotes.lock().unwrap().push(remote);
        Ok(link)
    }
}

/// Wait until the published state satisfies `pred`.
pub async fn wait_for_state(
    rx: &mut watch::Receiver<ConnectionState>,
    pred: impl FnMut(&ConnectionState) -> bool,
) {
    tokio::time::timeout(Duration::from_secs(600), rx.wait_for(pred))
        .await
        .expect("timed out waiting for state")
        .expect("state channel closed");
}

/// Poll `cond` until it holds.
pub async fn eventually(mut cond: impl FnMut() -> bool) {
    for _ in 0..200 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition never became true");
}

/// Log frame as the daemon sends it.
pub fn log_frame(stream: &str, text: &str) -> String {
    serde_json::json!({"type": "log", "data": {"type": stream, "data": text}}).to_string()
}

/// Stats frame with the given counters.
pub fn stats_frame(cpu: f64, rx: u64, tx: u64) -> String {
    serde_json::json!({
        "type": "stats",
        "data": {
            "cpu": {"usage_percent": cpu},
            "memory": {"usage_percent": 50.0},
            "network": {"rx_bytes": rx, "tx_bytes": tx},
            "block_io": {"read_bytes": 0, "write_bytes": 0}
        }
    })
    .to_string()
}
