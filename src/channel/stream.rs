//! Channel handle and the background task that drives it.
//!
//! [`StreamChannel`] is the public face: `start`, `stop`,
//! `force_reconnect` and `send` return immediately. The spawned driver task
//! owns the socket, the retry timer and the [`ChannelMachine`], and runs
//! each event to completion before taking the next.

// Rust guideline compliant 2026-02

use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures_util::future::BoxFuture;
use tokio::sync::{mpsc, watch};

use super::machine::{Action, ChannelMachine, ConnectionState};
use super::transport::{Link, Transport};
use super::{ChannelSink, ChannelSpec};
use crate::endpoint::ConnectionEndpoint;
use crate::error::StreamError;
use crate::line_buffer::LogLine;
use crate::ws::{redact_token, WsMessage, ABNORMAL_CLOSURE};

/// Upper bound on a graceful close before the socket is simply dropped.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Request from the handle to the driver task.
#[derive(Debug)]
enum Command {
    Start(ConnectionEndpoint),
    Stop,
    ForceReconnect,
    Send { text: String, echo: Option<LogLine> },
}

/// Handle to one resilient streaming channel.
///
/// Dropping the handle stops the channel: the socket is closed and any
/// pending retry is cancelled.
pub struct StreamChannel<S: ChannelSink> {
    name: &'static str,
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ConnectionState>,
    sink: Arc<Mutex<S>>,
}

impl<S: ChannelSink> std::fmt::Debug for StreamChannel<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamChannel")
            .field("name", &self.name)
            .field("state", &*self.state.borrow())
            .finish_non_exhaustive()
    }
}

impl<S: ChannelSink> StreamChannel<S> {
    /// Create the channel and spawn its driver task. The channel starts
    /// `Disconnected`; nothing is dialled until [`Self::start`].
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn spawn(spec: ChannelSpec, sink: S, transport: Arc<dyn Transport>) -> Self {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let sink = Arc::new(Mutex::new(sink));

        let driver = Driver {
            spec,
            machine: ChannelMachine::new(spec),
            transport,
            sink: Arc::clone(&sink),
            state_tx,
            endpoint: None,
            link: None,
            dial: None,
            retry: None,
        };
        tokio::spawn(driver.run(commands_rx));

        Self {
            name: spec.name,
            commands: commands_tx,
            state: state_rx,
            sink,
        }
    }

    /// Connect to `endpoint`, replacing any existing connection.
    pub fn start(&self, endpoint: ConnectionEndpoint) {
        self.command(Command::Start(endpoint));
    }

    /// Disconnect and stay disconnected. Safe to call repeatedly.
    pub fn stop(&self) {
        self.command(Command::Stop);
    }

    /// Drop the current connection and dial again immediately with a fresh
    /// retry budget.
    pub fn force_reconnect(&self) {
        self.command(Command::ForceReconnect);
    }

    /// Send a text frame.
    ///
    /// Never waits on the network. When the channel is not connected the
    /// frame is dropped and an error line goes to the sink instead; a write
    /// that fails later is reported the same way.
    pub fn send(&self, text: impl Into<String>) -> Result<(), StreamError> {
        self.dispatch(text.into(), None)
    }

    /// Like [`Self::send`], but `echo` is handed to the sink once the frame
    /// has been written to the live socket.
    pub(crate) fn send_with_echo(&self, text: String, echo: LogLine) -> Result<(), StreamError> {
        self.dispatch(text, Some(echo))
    }

    fn dispatch(&self, text: String, echo: Option<LogLine>) -> Result<(), StreamError> {
        let queued = self.state.borrow().is_connected()
            && self.commands.send(Command::Send { text, echo }).is_ok();
        if !queued {
            self.with_sink(|sink| sink.on_notice(LogLine::error(StreamError::NotConnected.to_string())));
            return Err(StreamError::NotConnected);
        }
        Ok(())
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state.borrow().clone()
    }

    /// Receiver that observes every published state change.
    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Run `f` with exclusive access to the sink.
    pub fn with_sink<R>(&self, f: impl FnOnce(&mut S) -> R) -> R {
        let mut guard = self.sink.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }

    /// Channel name used in logs.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    fn command(&self, command: Command) {
        if self.commands.send(command).is_err() {
            log::warn!("[{}] Driver task has exited; command dropped", self.name);
        }
    }
}

/// State owned by the driver task.
struct Driver<S: ChannelSink> {
    spec: ChannelSpec,
    machine: ChannelMachine,
    transport: Arc<dyn Transport>,
    sink: Arc<Mutex<S>>,
    state_tx: watch::Sender<ConnectionState>,
    endpoint: Option<ConnectionEndpoint>,
    link: Option<Link>,
    dial: Option<BoxFuture<'static, anyhow::Result<Link>>>,
    retry: Option<Pin<Box<tokio::time::Sleep>>>,
}

impl<S: ChannelSink> Driver<S> {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        loop {
            tokio::select! {
                command = commands.recv() => {
                    let Some(command) = command else {
                        log::debug!("[{}] Handle dropped, shutting down", self.spec.name);
                        let actions = self.machine.stop();
                        self.apply(actions).await;
                        return;
                    };
                    self.handle_command(command).await;
                }

                result = pending_dial(&mut self.dial) => {
                    self.dial = None;
                    let actions = match result {
                        Ok(link) => {
                            log::info!("[{}] Connected", self.spec.name);
                            self.link = Some(link);
                            self.machine.opened()
                        }
                        Err(e) => {
                            let err = StreamError::ConnectFailure(format!("{e:#}"));
                            log::warn!("[{}] {}", self.spec.name, err);
                            self.machine.closed()
                        }
                    };
                    self.apply(actions).await;
                }

                message = next_message(&mut self.link) => {
                    self.handle_message(message).await;
                }

                () = retry_timer(&mut self.retry) => {
                    self.retry = None;
                    let actions = self.machine.retry_due();
                    self.apply(actions).await;
                }
            }
        }
    }

    async fn handle_command(&mut self, command: Command) {
        let actions = match command {
            Command::Start(endpoint) => {
                self.endpoint = Some(endpoint);
                self.machine.start()
            }
            Command::Stop => {
                log::info!("[{}] Stopping", self.spec.name);
                self.machine.stop()
            }
            Command::ForceReconnect => {
                if self.endpoint.is_none() {
                    log::debug!("[{}] Reconnect requested before start; ignoring", self.spec.name);
                    return;
                }
                self.machine.force_reconnect()
            }
            Command::Send { text, echo } => {
                self.write(&text, echo).await;
                return;
            }
        };
        self.apply(actions).await;
    }

    async fn handle_message(&mut self, message: Option<anyhow::Result<WsMessage>>) {
        let (code, reason) = match message {
            Some(Ok(WsMessage::Text(text))) => {
                log::trace!("[{}] Frame: {} bytes", self.spec.name, text.len());
                self.with_sink(|sink| sink.on_frame(&text));
                return;
            }
            Some(Ok(WsMessage::Binary(data))) => {
                let text = String::from_utf8_lossy(&data);
                self.with_sink(|sink| sink.on_frame(&text));
                return;
            }
            Some(Ok(WsMessage::Control)) => return,
            Some(Ok(WsMessage::Close { code, reason })) => (code, reason),
            Some(Err(e)) => (ABNORMAL_CLOSURE, format!("{e:#}")),
            None => (ABNORMAL_CLOSURE, "stream ended".to_string()),
        };

        log::info!(
            "[{}] Connection closed (code={}, reason={})",
            self.spec.name,
            code,
            reason
        );
        let actions = self.machine.closed();
        self.apply(actions).await;
    }

    async fn write(&mut self, text: &str, echo: Option<LogLine>) {
        // The link may have dropped between the handle's check and now.
        let Some(link) = self.link.as_mut() else {
            self.with_sink(|sink| sink.on_notice(LogLine::error(StreamError::NotConnected.to_string())));
            return;
        };
        match link.writer.send_text(text).await {
            Ok(()) => {
                if let Some(line) = echo {
                    self.with_sink(|sink| sink.on_notice(line));
                }
            }
            Err(e) => {
                log::warn!("[{}] Send failed: {:#}", self.spec.name, e);
                let err = StreamError::SendFailure(format!("{e:#}"));
                self.with_sink(|sink| sink.on_notice(LogLine::error(err.to_string())));
            }
        }
    }

    async fn apply(&mut self, actions: Vec<Action>) {
        for action in actions {
            match action {
                Action::Enter(state) => {
                    log::debug!("[{}] State -> {}", self.spec.name, state);
                    self.state_tx.send_replace(state);
                }
                Action::Dial => {
                    self.hangup().await;
                    self.dial = Some(self.dial_future());
                }
                Action::Hangup => self.hangup().await,
                Action::ScheduleRetry(delay) => {
                    log::debug!("[{}] Reconnecting in {}ms", self.spec.name, delay.as_millis());
                    self.retry = Some(Box::pin(tokio::time::sleep(delay)));
                }
                Action::CancelRetry => self.retry = None,
                Action::Notice(line) => self.with_sink(|sink| sink.on_notice(line)),
                Action::ResetSink => self.with_sink(ChannelSink::reset),
            }
        }
    }

    /// An unusable endpoint yields a dial that fails at once, so it runs
    /// through the retry policy like any other connect failure.
    fn dial_future(&self) -> BoxFuture<'static, anyhow::Result<Link>> {
        let url = match self.endpoint.as_ref().map(ConnectionEndpoint::connect_url) {
            Some(Ok(url)) => url,
            Some(Err(e)) => return Box::pin(async move { Err(e) }),
            None => return Box::pin(async { Err(anyhow::anyhow!("no endpoint configured")) }),
        };
        log::info!("[{}] Connecting to {}", self.spec.name, redact_token(&url));
        let transport = Arc::clone(&self.transport);
        Box::pin(async move { transport.connect(&url).await })
    }

    async fn hangup(&mut self) {
        self.dial = None;
        if let Some(mut link) = self.link.take() {
            match tokio::time::timeout(CLOSE_TIMEOUT, link.writer.close()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => log::debug!("[{}] Close failed: {:#}", self.spec.name, e),
                Err(_) => log::debug!("[{}] Close timed out", self.spec.name),
            }
        }
    }

    fn with_sink<R>(&self, f: impl FnOnce(&mut S) -> R) -> R {
        let mut guard = self.sink.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }
}

async fn pending_dial(dial: &mut Option<BoxFuture<'static, anyhow::Result<Link>>>) -> anyhow::Result<Link> {
    match dial {
        Some(fut) => fut.await,
        None => std::future::pending().await,
    }
}

async fn next_message(link: &mut Option<Link>) -> Option<anyhow::Result<WsMessage>> {
    match link {
        Some(link) => link.reader.recv().await,
        None => std::future::pending().await,
    }
}

async fn retry_timer(retry: &mut Option<Pin<Box<tokio::time::Sleep>>>) {
    match retry {
        Some(sleep) => sleep.as_mut().await,
        None => std::future::pending().await,
    }
}
