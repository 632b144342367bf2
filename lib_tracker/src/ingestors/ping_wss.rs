//! # Ping WSS Ingestor
//!
//! WebSocket client for the live aircraft ping feed. A `StreamTransport` owns
//! one *logical* connection and hides the churn of the underlying sockets from
//! its subscribers.
//!
//! ## Lifecycle
//!
//! `DISCONNECTED → CONNECTING → CONNECTED`, then on any close that was not
//! asked for, back to `CONNECTING` after a fixed delay, until the retry cap is
//! reached. `disconnect()` returns to `DISCONNECTED` from any state.
//!
//! ## Reconnection
//!
//! - One reconnect is scheduled per close, after `reconnect_delay`. There is no
//!   backoff growth and no jitter.
//! - The attempt counter increments when the timer fires and resets to zero on
//!   every successful open.
//! - When the counter has reached `max_retries` the transport goes quiet. Only
//!   an explicit `connect()` starts another attempt.
//! - At most one reconnect timer is pending. Scheduling a new one cancels the
//!   previous one first.
//!
//! ## Inbound frames
//!
//! Every text frame goes through `PingEnvelope::parse_frame`. Valid pings are
//! handed to each subscriber in registration order; anything else is logged
//! and dropped.
//!
//! All public methods return immediately, except that `disconnect()` waits
//! for a delivery already in flight on another thread. Once it returns no
//! subscriber is called again until the next `connect()`. The socket and the
//! reconnect timer run as Tokio tasks, so `connect()` must be called from
//! inside a runtime. Dropping the last handle disconnects.

use std::cell::Cell;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use tokio_util::sync::CancellationToken;

use crate::core::dispatcher::{Dispatcher, Handler};
use crate::model::envelope::{FrameError, PingEnvelope};

/// Callback invoked once per validated ping.
pub type MessageHandler = Handler<PingEnvelope>;

/// Connection parameters. All of them come from the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportConfig {
    /// WebSocket endpoint, `ws://` or `wss://`.
    pub url: String,
    /// Fixed wait between a close and the next connection attempt.
    pub reconnect_delay: Duration,
    /// Consecutive reconnect attempts allowed before giving up.
    pub max_retries: u32,
}

impl TransportConfig {
    pub fn new(url: impl Into<String>, reconnect_delay: Duration, max_retries: u32) -> Self {
        Self {
            url: url.into(),
            reconnect_delay,
            max_retries,
        }
    }
}

/// Errors surfaced by `StreamTransport::send`.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The socket is not open; the payload was dropped.
    #[error("WebSocket is not connected")]
    NotConnected,

    /// The payload could not be encoded as JSON.
    #[error("Failed to serialize outbound payload: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Snapshot of the underlying socket's readiness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Closing,
    Closed,
    /// The transport state could not be read.
    Unknown,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Disconnected => "DISCONNECTED",
            ConnectionStatus::Connecting => "CONNECTING",
            ConnectionStatus::Connected => "CONNECTED",
            ConnectionStatus::Closing => "CLOSING",
            ConnectionStatus::Closed => "CLOSED",
            ConnectionStatus::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SocketState {
    Connecting,
    Open,
    Closing,
    Closed,
}

/// The live socket task and the channel feeding its write half.
struct Session {
    generation: u64,
    cancel: CancellationToken,
    outbound: mpsc::UnboundedSender<Message>,
}

#[derive(Default)]
struct TransportState {
    /// `None` until the first `connect()` and after `disconnect()`.
    socket: Option<SocketState>,
    session: Option<Session>,
    reconnect: Option<CancellationToken>,
    retry_count: u32,
    exhausted: bool,
    generation: u64,
}

impl TransportState {
    fn status(&self) -> ConnectionStatus {
        match self.socket {
            None => ConnectionStatus::Disconnected,
            Some(SocketState::Connecting) => ConnectionStatus::Connecting,
            Some(SocketState::Open) => ConnectionStatus::Connected,
            Some(SocketState::Closing) => ConnectionStatus::Closing,
            Some(SocketState::Closed) => ConnectionStatus::Closed,
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        self.session.as_ref().is_some_and(|s| s.generation == generation)
    }
}

thread_local! {
    /// Set while this thread is running subscribers.
    static IN_DELIVERY: Cell<bool> = const { Cell::new(false) };
}

/// Marks the current thread as delivering until dropped.
struct DeliveryScope;

impl DeliveryScope {
    fn enter() -> Self {
        IN_DELIVERY.with(|flag| flag.set(true));
        DeliveryScope
    }
}

impl Drop for DeliveryScope {
    fn drop(&mut self) {
        IN_DELIVERY.with(|flag| flag.set(false));
    }
}

struct Inner {
    config: TransportConfig,
    state: Mutex<TransportState>,
    /// Held for the whole of a broadcast.
    delivery: Mutex<()>,
    dispatcher: Dispatcher<PingEnvelope>,
    status_tx: watch::Sender<ConnectionStatus>,
}

/// Shared by every handle; the last one to go shuts the tasks down.
struct HandleGuard {
    inner: Weak<Inner>,
}

impl Drop for HandleGuard {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.upgrade() {
            log::debug!("WebSocket: last handle dropped");
            inner.shutdown();
        }
    }
}

/// # Stream Transport
///
/// Resilient WebSocket client delivering validated `PingEnvelope`s to its
/// subscribers. Cloning yields another handle to the same connection.
#[derive(Clone)]
pub struct StreamTransport {
    inner: Arc<Inner>,
    _guard: Arc<HandleGuard>,
}

impl StreamTransport {
    /// Creates an idle transport. Nothing is opened until `connect()`.
    pub fn new(config: TransportConfig) -> Self {
        let (status_tx, _) = watch::channel(ConnectionStatus::Disconnected);
        let inner = Arc::new(Inner {
            config,
            state: Mutex::new(TransportState::default()),
            delivery: Mutex::new(()),
            dispatcher: Dispatcher::new(),
            status_tx,
        });
        let guard = HandleGuard {
            inner: Arc::downgrade(&inner),
        };
        Self {
            inner,
            _guard: Arc::new(guard),
        }
    }

    pub fn config(&self) -> &TransportConfig {
        &self.inner.config
    }

    /// # Connect
    ///
    /// Starts establishing the logical connection. A no-op while a socket is
    /// already connecting or open. Cancels a pending reconnect timer and
    /// attempts immediately otherwise.
    ///
    /// Failures are never returned: they are logged and fed into the
    /// reconnection path.
    pub fn connect(&self) {
        let mut state = self.inner.lock();
        if matches!(state.socket, Some(SocketState::Connecting | SocketState::Open)) {
            log::debug!("WebSocket: connect() ignored, already {}", state.status());
            return;
        }
        if let Some(timer) = state.reconnect.take() {
            timer.cancel();
        }
        state.exhausted = false;
        self.inner.open_session(&mut state);
    }

    /// # Disconnect
    ///
    /// Closes the socket, if any, and cancels any pending reconnect. Safe from
    /// every state, including from inside a subscriber. Once it returns no
    /// subscriber is called and nothing is attempted until the next
    /// `connect()`.
    pub fn disconnect(&self) {
        self.inner.shutdown();
    }

    /// Registers `handler` for validated pings. Registering the same `Arc`
    /// twice has no further effect.
    pub fn on_message(&self, handler: MessageHandler) {
        if !self.inner.dispatcher.add_handler(handler) {
            log::debug!("WebSocket: handler already registered");
        }
    }

    /// Unregisters `handler`. Unknown handlers are ignored.
    pub fn off_message(&self, handler: &MessageHandler) {
        self.inner.dispatcher.remove_handler(handler);
    }

    /// # Send
    ///
    /// Serializes `payload` to JSON and queues it on the open socket.
    ///
    /// # Errors
    /// `TransportError::NotConnected` when the socket is not open. The payload
    /// is dropped, not kept for a later connection.
    pub fn send<T: Serialize + ?Sized>(&self, payload: &T) -> Result<(), TransportError> {
        let state = self.inner.lock();
        let session = match (state.socket, state.session.as_ref()) {
            (Some(SocketState::Open), Some(session)) => session,
            _ => {
                log::error!("WebSocket is not connected");
                return Err(TransportError::NotConnected);
            }
        };
        let text = serde_json::to_string(payload)?;
        session
            .outbound
            .send(Message::Text(text.into()))
            .map_err(|_| TransportError::NotConnected)
    }

    /// Current socket readiness. Polled; see `watch_status` for a push feed.
    pub fn status(&self) -> ConnectionStatus {
        match self.inner.state.lock() {
            Ok(state) => state.status(),
            Err(_) => ConnectionStatus::Unknown,
        }
    }

    /// Receiver that observes every status transition.
    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.inner.status_tx.subscribe()
    }

    /// Consecutive reconnect attempts since the last successful open.
    pub fn retry_count(&self) -> u32 {
        self.inner.lock().retry_count
    }

    /// `true` once the retry cap has stopped reconnection. Cleared by the next
    /// successful open, `connect()` or `disconnect()`.
    pub fn retries_exhausted(&self) -> bool {
        self.inner.lock().exhausted
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.dispatcher.len()
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, TransportState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, state: &TransportState) {
        self.status_tx.send_replace(state.status());
    }

    fn shutdown(&self) {
        {
            let mut state = self.lock();
            if let Some(session) = state.session.take() {
                log::info!("Disconnecting WebSocket");
                session.cancel.cancel();
            }
            if let Some(timer) = state.reconnect.take() {
                timer.cancel();
            }
            state.socket = None;
            state.exhausted = false;
            self.publish(&state);
        }
        // A subscriber calling in here already holds the delivery lock.
        if !IN_DELIVERY.with(Cell::get) {
            drop(self.delivery.lock().unwrap_or_else(PoisonError::into_inner));
        }
    }

    /// Replaces the current session, if any, with a fresh connection attempt.
    fn open_session(self: &Arc<Self>, state: &mut TransportState) {
        if let Some(previous) = state.session.take() {
            previous.cancel.cancel();
        }

        let runtime = match Handle::try_current() {
            Ok(runtime) => runtime,
            Err(e) => {
                log::error!("WebSocket connection error: no Tokio runtime ({})", e);
                state.socket = Some(SocketState::Closed);
                self.publish(state);
                return;
            }
        };

        state.generation += 1;
        let generation = state.generation;
        let cancel = CancellationToken::new();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        state.session = Some(Session {
            generation,
            cancel: cancel.clone(),
            outbound: outbound_tx,
        });
        state.socket = Some(SocketState::Connecting);
        self.publish(state);

        runtime.spawn(Arc::clone(self).run_session(generation, cancel, outbound_rx));
    }

    /// Drives one socket from connect to close.
    async fn run_session(
        self: Arc<Self>,
        generation: u64,
        cancel: CancellationToken,
        mut outbound: mpsc::UnboundedReceiver<Message>,
    ) {
        log::info!("Connecting to ping stream: {}", self.config.url);

        let connected = tokio::select! {
            _ = cancel.cancelled() => return,
            result = connect_async(self.config.url.as_str()) => result,
        };
        let ws_stream = match connected {
            Ok((ws_stream, _)) => ws_stream,
            Err(e) => {
                log::error!("WebSocket connection error: {}", e);
                self.on_session_closed(generation);
                return;
            }
        };
        if !self.on_session_open(generation) {
            return;
        }

        let (mut write, mut read) = ws_stream.split();
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    let _ = write.close().await;
                    return;
                }
                Some(msg) = outbound.recv() => {
                    if let Err(e) = write.send(msg).await {
                        log::error!("Failed to send on WebSocket: {}", e);
                        break;
                    }
                }
                frame = read.next() => match frame {
                    Some(Ok(Message::Text(text))) => self.handle_frame(generation, text.as_str()),
                    Some(Ok(Message::Binary(bin))) => match std::str::from_utf8(&bin) {
                        Ok(text) => self.handle_frame(generation, text),
                        Err(_) => log::warn!("Dropping non UTF-8 binary frame ({} bytes)", bin.len()),
                    },
                    Some(Ok(Message::Close(close))) => {
                        match close {
                            Some(cf) if u16::from(cf.code) != 1000 => {
                                log::warn!("WebSocket: Disconnected {} {}", u16::from(cf.code), cf.reason.as_str());
                            }
                            _ => log::info!("WebSocket: Closed by remote host"),
                        }
                        self.mark_closing(generation);
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        log::error!("WebSocket error: {}", e);
                        break;
                    }
                    None => {
                        log::warn!("WebSocket: Stream ended");
                        break;
                    }
                }
            }
        }

        self.on_session_closed(generation);
    }

    /// Parses one frame and delivers it, unless `generation` was closed
    /// meanwhile.
    fn handle_frame(&self, generation: u64, text: &str) {
        let ping = match PingEnvelope::parse_frame(text) {
            Ok(ping) => ping,
            Err(FrameError::Json(e)) => {
                log::error!("Error processing WebSocket message: {}", e);
                return;
            }
            Err(e) => {
                log::warn!("Invalid flight data received: {}", e);
                return;
            }
        };

        let _delivery = self.delivery.lock().unwrap_or_else(PoisonError::into_inner);
        if !self.lock().is_current(generation) {
            log::debug!("Dropping ping {} from a closed session", ping.id);
            return;
        }
        log::trace!("Ping {} for {}", ping.id, ping.identity());
        let _scope = DeliveryScope::enter();
        self.dispatcher.broadcast(&ping);
    }

    fn on_session_open(&self, generation: u64) -> bool {
        let mut state = self.lock();
        if !state.is_current(generation) {
            return false;
        }
        log::info!("WebSocket: Connected");
        state.socket = Some(SocketState::Open);
        state.retry_count = 0;
        state.exhausted = false;
        self.publish(&state);
        true
    }

    fn mark_closing(&self, generation: u64) {
        let mut state = self.lock();
        if state.is_current(generation) {
            state.socket = Some(SocketState::Closing);
            self.publish(&state);
        }
    }

    /// Any close that `disconnect()` did not cause ends up here.
    fn on_session_closed(self: &Arc<Self>, generation: u64) {
        let mut state = self.lock();
        if !state.is_current(generation) {
            return;
        }
        state.session = None;
        state.socket = Some(SocketState::Closed);
        self.publish(&state);
        self.schedule_reconnect(&mut state);
    }

    fn schedule_reconnect(self: &Arc<Self>, state: &mut TransportState) {
        if state.retry_count >= self.config.max_retries {
            log::error!(
                "WebSocket: Max reconnection attempts reached ({})",
                self.config.max_retries
            );
            state.exhausted = true;
            return;
        }

        if let Some(previous) = state.reconnect.take() {
            previous.cancel();
        }

        let runtime = match Handle::try_current() {
            Ok(runtime) => runtime,
            Err(e) => {
                log::error!("WebSocket: cannot schedule reconnect without a Tokio runtime ({})", e);
                return;
            }
        };

        let timer = CancellationToken::new();
        state.reconnect = Some(timer.clone());
        let inner = Arc::clone(self);
        let delay = self.config.reconnect_delay;
        runtime.spawn(async move {
            tokio::select! {
                _ = timer.cancelled() => {}
                _ = tokio::time::sleep(delay) => inner.fire_reconnect(&timer),
            }
        });
    }

    fn fire_reconnect(self: &Arc<Self>, timer: &CancellationToken) {
        let mut state = self.lock();
        // Cancellation happens under this lock, so a stale timer is caught here.
        if timer.is_cancelled() {
            return;
        }
        state.reconnect = None;
        state.retry_count += 1;
        log::info!(
            "WebSocket: Reconnection attempt {}/{}",
            state.retry_count,
            self.config.max_retries
        );
        self.open_session(&mut state);
    }
}
