//! Pooled WebSocket connection.
//!
//! One physical socket is shared by every consumer. Callers `acquire()` a
//! [`ConnectionLease`]; the socket stays open while any lease is held and
//! closes after a short grace window once the last lease is released.
//! A re-acquire inside the grace window cancels the pending close.
//!
//! While leases are outstanding, an unexpected drop is healed by
//! reconnecting with exponential backoff. The [`FrameHandler`] supplies the
//! subscribe requests to replay on the new socket.

use crate::error::{WsError, WsResult};
use crate::heartbeat::Heartbeat;
use crate::message::{ChannelMessage, WsMessage, WsRequest};
use futures_util::future::{BoxFuture, FutureExt, Shared};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use perpview_telemetry::Metrics;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::{
    connect_async_tls_with_config, tungstenite::Message, MaybeTlsStream, WebSocketStream,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// WebSocket URL.
    pub url: String,
    /// Upper bound on a single connect attempt.
    pub connect_timeout_ms: u64,
    /// Delay between the last release and the physical close.
    pub release_grace_ms: u64,
    /// Maximum reconnection attempts per outage (0 = infinite).
    pub max_reconnect_attempts: u32,
    /// Base delay for exponential backoff.
    pub reconnect_base_delay_ms: u64,
    /// Maximum delay for exponential backoff.
    pub reconnect_max_delay_ms: u64,
    /// Idle time before an application-level ping is sent.
    pub heartbeat_interval_ms: u64,
    /// Time to wait for a pong before the link is treated as dead.
    pub heartbeat_timeout_ms: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            url: "wss://api.perpview.exchange/ws".to_string(),
            connect_timeout_ms: 10_000,
            release_grace_ms: 500,
            max_reconnect_attempts: 0,
            reconnect_base_delay_ms: 1_000,
            reconnect_max_delay_ms: 30_000,
            heartbeat_interval_ms: 45_000,
            heartbeat_timeout_ms: 10_000,
        }
    }
}

impl ConnectionConfig {
    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Backoff before reconnect attempt `attempt` (1-based).
    ///
    /// `base * 2^(attempt-1)`, capped at `reconnect_max_delay_ms`, plus up to
    /// one second of jitter (never more than half the delay).
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(10);
        let delay = self
            .reconnect_base_delay_ms
            .saturating_mul(1u64 << exponent)
            .min(self.reconnect_max_delay_ms);
        let jitter_cap = (delay / 2).min(1_000);
        Duration::from_millis(delay + rand_jitter(jitter_cap))
    }
}

/// Generate pseudo-random jitter in `0..=cap` ms.
fn rand_jitter(cap: u64) -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    if cap == 0 {
        return 0;
    }
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    u64::from(nanos) % (cap + 1)
}

/// Physical link state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    /// Reconnect attempts exhausted. The next `acquire()` starts over.
    Failed,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Failed => "failed",
        }
    }
}

/// Link transitions reported to the frame handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// The socket dropped unexpectedly; a reconnect is under way.
    Down,
    /// A reconnect succeeded and subscriptions were replayed.
    Restored,
    /// Reconnect attempts were exhausted.
    Failed(String),
}

/// Receiver of inbound data frames.
///
/// Called from the session task in wire order. Implementations must not
/// block.
pub trait FrameHandler: Send + Sync + 'static {
    /// A market data frame.
    fn on_frame(&self, msg: ChannelMessage);

    fn on_link_event(&self, event: LinkEvent);

    /// Subscribe requests to send on a freshly reconnected socket.
    fn replay_requests(&self) -> Vec<WsRequest>;
}

#[derive(Debug, Clone)]
enum ConnectFailure {
    Timeout(u64),
    Failed(String),
}

impl fmt::Display for ConnectFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout(ms) => write!(f, "timed out after {ms}ms"),
            Self::Failed(reason) => f.write_str(reason),
        }
    }
}

impl From<ConnectFailure> for WsError {
    fn from(failure: ConnectFailure) -> Self {
        match failure {
            ConnectFailure::Timeout(ms) => WsError::Timeout(ms),
            ConnectFailure::Failed(reason) => WsError::ConnectionFailed(reason),
        }
    }
}

/// In-flight connect shared by every concurrent acquirer.
type ConnectAttempt = Shared<BoxFuture<'static, Result<(), ConnectFailure>>>;

struct Session {
    shutdown: CancellationToken,
    outbound: mpsc::UnboundedSender<String>,
}

enum Link {
    Idle,
    Connecting {
        generation: u64,
        attempt: ConnectAttempt,
    },
    Open {
        generation: u64,
        session: Session,
    },
}

struct PoolState {
    ref_count: usize,
    generation: u64,
    close_ticket: u64,
    pending_close: Option<(u64, CancellationToken)>,
    link: Link,
}

struct Inner {
    config: ConnectionConfig,
    handler: Arc<dyn FrameHandler>,
    pool: Mutex<PoolState>,
    state_tx: watch::Sender<ConnectionState>,
}

/// Reference-counted owner of the shared WebSocket.
///
/// Cheap to clone; clones share the same socket.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl ConnectionManager {
    pub fn new(config: ConnectionConfig, handler: Arc<dyn FrameHandler>) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            inner: Arc::new(Inner {
                config,
                handler,
                pool: Mutex::new(PoolState {
                    ref_count: 0,
                    generation: 0,
                    close_ticket: 0,
                    pending_close: None,
                    link: Link::Idle,
                }),
                state_tx,
            }),
        }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.inner.config
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state_tx.borrow()
    }

    /// Watch channel following every state transition.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    /// Number of outstanding leases.
    pub fn ref_count(&self) -> usize {
        self.inner.pool.lock().ref_count
    }

    /// Take a lease on the shared socket, opening it if needed.
    ///
    /// Resolves once the socket is open. Concurrent callers share one connect
    /// attempt; if it fails every waiter gets the error and the next call
    /// starts a fresh attempt.
    pub async fn acquire(&self) -> WsResult<ConnectionLease> {
        let (lease, attempt) = {
            let mut pool = self.inner.pool.lock();
            pool.ref_count += 1;
            Metrics::ws_leases(pool.ref_count);
            // Held across the connect wait so a dropped caller still releases.
            let lease = ConnectionLease {
                inner: Arc::clone(&self.inner),
                released: AtomicBool::new(false),
            };

            if let Some((_, token)) = pool.pending_close.take() {
                token.cancel();
                debug!("Acquired within grace window, pending close cancelled");
            }

            let attempt = if matches!(pool.link, Link::Idle) {
                Some(Inner::start_connect(&self.inner, &mut pool))
            } else if let Link::Connecting { attempt, .. } = &pool.link {
                Some(attempt.clone())
            } else {
                None
            };
            (lease, attempt)
        };

        if let Some(attempt) = attempt {
            attempt.await?;
        }
        Ok(lease)
    }

    /// Queue a request on the open socket.
    ///
    /// While a reconnect is in progress the frame is queued and later
    /// superseded by the replay.
    pub fn send(&self, request: &WsRequest) -> WsResult<()> {
        let frame = serde_json::to_string(request)?;
        let pool = self.inner.pool.lock();
        match &pool.link {
            Link::Open { session, .. } => session
                .outbound
                .send(frame)
                .map_err(|_| WsError::SendFailed("session task has exited".to_string())),
            _ => Err(WsError::NotConnected),
        }
    }

    /// Close the socket now, regardless of outstanding leases.
    ///
    /// Leases stay valid; releasing them afterwards is a no-op beyond the
    /// count. A later `acquire()` opens a new socket.
    pub fn shutdown(&self) {
        let mut pool = self.inner.pool.lock();
        if let Some((_, token)) = pool.pending_close.take() {
            token.cancel();
        }
        self.inner.close_link(&mut pool);
    }
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("url", &self.inner.config.url)
            .field("state", &self.state())
            .field("ref_count", &self.ref_count())
            .finish()
    }
}

impl Inner {
    fn set_state(&self, state: ConnectionState) {
        self.state_tx.send_replace(state);
        Metrics::ws_state_set(state.as_str());
    }

    /// Update state only if `generation` still owns the link.
    fn set_state_if_current(&self, generation: u64, state: ConnectionState) {
        let pool = self.pool.lock();
        if matches!(pool.link, Link::Open { generation: g, .. } if g == generation) {
            self.set_state(state);
        }
    }

    fn start_connect(inner: &Arc<Self>, pool: &mut PoolState) -> ConnectAttempt {
        pool.generation += 1;
        let generation = pool.generation;

        let task_inner = Arc::clone(inner);
        let handle = tokio::spawn(async move { task_inner.connect_once(generation).await });
        let attempt = async move {
            match handle.await {
                Ok(result) => result,
                Err(e) => Err(ConnectFailure::Failed(format!("connect task aborted: {e}"))),
            }
        }
        .boxed()
        .shared();

        pool.link = Link::Connecting {
            generation,
            attempt: attempt.clone(),
        };
        inner.set_state(ConnectionState::Connecting);
        attempt
    }

    async fn connect_once(self: Arc<Self>, generation: u64) -> Result<(), ConnectFailure> {
        info!(url = %self.config.url, generation, "Connecting to WebSocket");
        match open_stream(&self.config).await {
            Ok(stream) => {
                self.on_connected(generation, stream);
                Ok(())
            }
            Err(failure) => {
                warn!(url = %self.config.url, error = %failure, "WebSocket connect failed");
                self.on_connect_failed(generation);
                Err(failure)
            }
        }
    }

    fn on_connected(self: &Arc<Self>, generation: u64, stream: WsStream) {
        let mut pool = self.pool.lock();
        if !matches!(pool.link, Link::Connecting { generation: g, .. } if g == generation) {
            debug!(generation, "Stale connect result discarded");
            return;
        }

        let shutdown = CancellationToken::new();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        pool.link = Link::Open {
            generation,
            session: Session {
                shutdown: shutdown.clone(),
                outbound: outbound_tx,
            },
        };
        self.set_state(ConnectionState::Connected);
        Metrics::ws_connected();
        info!(generation, "WebSocket connected");

        tokio::spawn(Arc::clone(self).run_session(generation, stream, outbound_rx, shutdown));

        // Every acquirer gave up while the connect was in flight.
        if pool.ref_count == 0 {
            self.schedule_close(&mut pool);
        }
    }

    fn on_connect_failed(&self, generation: u64) {
        let mut pool = self.pool.lock();
        if matches!(pool.link, Link::Connecting { generation: g, .. } if g == generation) {
            pool.link = Link::Idle;
            self.set_state(ConnectionState::Disconnected);
        }
    }

    fn release_one(self: &Arc<Self>) {
        let mut pool = self.pool.lock();
        if pool.ref_count == 0 {
            warn!("Release with no outstanding leases ignored");
            return;
        }
        pool.ref_count -= 1;
        Metrics::ws_leases(pool.ref_count);

        if pool.ref_count == 0 && matches!(pool.link, Link::Open { .. }) {
            self.schedule_close(&mut pool);
        }
    }

    fn schedule_close(self: &Arc<Self>, pool: &mut PoolState) {
        let grace = Duration::from_millis(self.config.release_grace_ms);
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) if !grace.is_zero() => runtime,
            _ => {
                self.close_link(pool);
                return;
            }
        };

        pool.close_ticket += 1;
        let ticket = pool.close_ticket;
        let token = CancellationToken::new();
        if let Some((_, previous)) = pool.pending_close.replace((ticket, token.clone())) {
            previous.cancel();
        }

        debug!(grace_ms = self.config.release_grace_ms, "Last lease released, close scheduled");
        let inner = Arc::clone(self);
        runtime.spawn(async move {
            tokio::select! {
                () = token.cancelled() => {}
                () = tokio::time::sleep(grace) => inner.close_if_idle(ticket),
            }
        });
    }

    fn close_if_idle(&self, ticket: u64) {
        let mut pool = self.pool.lock();
        let still_pending = matches!(pool.pending_close, Some((t, _)) if t == ticket);
        if !still_pending || pool.ref_count > 0 {
            return;
        }
        pool.pending_close = None;
        self.close_link(&mut pool);
    }

    fn close_link(&self, pool: &mut PoolState) {
        match std::mem::replace(&mut pool.link, Link::Idle) {
            Link::Open {
                generation,
                session,
            } => {
                info!(generation, "Closing idle WebSocket");
                session.shutdown.cancel();
                Metrics::ws_disconnected();
                self.set_state(ConnectionState::Disconnected);
            }
            // The connect task closes it on arrival if nobody holds a lease.
            connecting @ Link::Connecting { .. } => pool.link = connecting,
            Link::Idle => {}
        }
    }

    async fn run_session(
        self: Arc<Self>,
        generation: u64,
        stream: WsStream,
        mut outbound_rx: mpsc::UnboundedReceiver<String>,
        shutdown: CancellationToken,
    ) {
        let mut stream = stream;
        let mut replay: Vec<WsRequest> = Vec::new();

        loop {
            let outcome = self
                .drive_link(stream, &replay, &mut outbound_rx, &shutdown)
                .await;
            if shutdown.is_cancelled() {
                debug!(generation, "Session closed");
                return;
            }

            let reason = match &outcome {
                Ok(()) => "stream ended".to_string(),
                Err(e) => e.to_string(),
            };
            warn!(generation, %reason, "WebSocket link lost");
            Metrics::ws_disconnected();
            self.set_state_if_current(generation, ConnectionState::Reconnecting);
            self.handler.on_link_event(LinkEvent::Down);

            stream = match self.reconnect(&shutdown, disconnect_label(&outcome)).await {
                Some(next) => next,
                None if shutdown.is_cancelled() => return,
                None => {
                    self.fail_session(generation, reason);
                    return;
                }
            };

            // Frames queued for the dead socket are covered by the replay.
            while outbound_rx.try_recv().is_ok() {}
            replay = self.handler.replay_requests();

            self.set_state_if_current(generation, ConnectionState::Connected);
            Metrics::ws_connected();
            self.handler.on_link_event(LinkEvent::Restored);
        }
    }

    /// Retry with backoff; every attempt is counted under `reason`.
    async fn reconnect(&self, shutdown: &CancellationToken, reason: &str) -> Option<WsStream> {
        let max_attempts = self.config.max_reconnect_attempts;
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            if max_attempts > 0 && attempt > max_attempts {
                error!(max_attempts, "Max reconnection attempts exceeded");
                return None;
            }

            let delay = self.config.backoff_delay(attempt);
            warn!(attempt, delay_ms = delay.as_millis() as u64, "Reconnecting");
            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                () = shutdown.cancelled() => return None,
            }

            Metrics::ws_reconnect(reason);
            match open_stream(&self.config).await {
                Ok(stream) => {
                    info!(attempt, "WebSocket reconnected");
                    return Some(stream);
                }
                Err(failure) => warn!(attempt, error = %failure, "Reconnect attempt failed"),
            }
        }
    }

    fn fail_session(&self, generation: u64, reason: String) {
        {
            let mut pool = self.pool.lock();
            if matches!(pool.link, Link::Open { generation: g, .. } if g == generation) {
                pool.link = Link::Idle;
                self.set_state(ConnectionState::Failed);
            }
        }
        self.handler.on_link_event(LinkEvent::Failed(reason));
    }

    /// Pump one physical socket until it closes or shutdown is requested.
    async fn drive_link(
        &self,
        stream: WsStream,
        replay: &[WsRequest],
        outbound_rx: &mut mpsc::UnboundedReceiver<String>,
        shutdown: &CancellationToken,
    ) -> WsResult<()> {
        let (mut write, mut read) = stream.split();

        for request in replay {
            write
                .send(Message::Text(serde_json::to_string(request)?))
                .await?;
        }
        if !replay.is_empty() {
            info!(count = replay.len(), "Subscriptions replayed");
        }

        let mut heartbeat = Heartbeat::new(
            self.config.heartbeat_interval_ms,
            self.config.heartbeat_timeout_ms,
        );

        loop {
            tokio::select! {
                () = shutdown.cancelled() => {
                    if let Err(e) = write.send(Message::Close(None)).await {
                        debug!(error = %e, "Close frame not delivered");
                    }
                    return Ok(());
                }

                msg = read.next() => match msg {
                    Some(Ok(Message::Text(text))) => {
                        heartbeat.record_message();
                        self.handle_text(&text, &mut heartbeat);
                    }
                    Some(Ok(Message::Ping(data))) => {
                        heartbeat.record_message();
                        write.send(Message::Pong(data)).await?;
                    }
                    Some(Ok(Message::Pong(_))) => heartbeat.record_pong(),
                    Some(Ok(Message::Close(frame))) => {
                        let (code, reason) = frame
                            .map(|f| (u16::from(f.code), f.reason.to_string()))
                            .unwrap_or((1005, String::new()));
                        return Err(WsError::ConnectionClosed { code, reason });
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(e.into()),
                    None => {
                        return Err(WsError::ConnectionClosed {
                            code: 1006,
                            reason: "stream ended".to_string(),
                        });
                    }
                },

                Some(frame) = outbound_rx.recv() => {
                    write.send(Message::Text(frame)).await?;
                }

                () = heartbeat.wait_for_check() => {
                    if heartbeat.is_timed_out() {
                        return Err(WsError::HeartbeatTimeout);
                    }
                    if heartbeat.should_send_ping() {
                        let ping = serde_json::to_string(&WsRequest::ping())?;
                        write.send(Message::Text(ping)).await?;
                        heartbeat.record_ping();
                    }
                }
            }
        }
    }

    fn handle_text(&self, text: &str, heartbeat: &mut Heartbeat) {
        let msg: WsMessage = match serde_json::from_str(text) {
            Ok(msg) => msg,
            Err(e) => {
                warn!(error = %e, "Unparseable frame dropped");
                return;
            }
        };

        match msg {
            WsMessage::Pong(pong) => {
                if pong.is_pong() {
                    heartbeat.record_pong();
                }
            }
            WsMessage::Channel(msg) => match msg.channel.as_str() {
                "pong" => heartbeat.record_pong(),
                "subscriptionResponse" => {
                    debug!(subscription = ?msg.acknowledged_subscription(), "Subscription acknowledged");
                }
                "error" => warn!(data = %msg.data, "Feed reported an error"),
                _ => self.handler.on_frame(msg),
            },
        }
    }
}

async fn open_stream(config: &ConnectionConfig) -> Result<WsStream, ConnectFailure> {
    let timeout = Duration::from_millis(config.connect_timeout_ms);
    // TCP_NODELAY on: ticks are small and latency-sensitive.
    match tokio::time::timeout(
        timeout,
        connect_async_tls_with_config(&config.url, None, true, None),
    )
    .await
    {
        Ok(Ok((stream, _response))) => Ok(stream),
        Ok(Err(e)) => Err(ConnectFailure::Failed(e.to_string())),
        Err(_) => Err(ConnectFailure::Timeout(config.connect_timeout_ms)),
    }
}

fn disconnect_label(outcome: &WsResult<()>) -> &'static str {
    match outcome {
        Err(WsError::HeartbeatTimeout) => "heartbeat",
        Err(WsError::ConnectionClosed { .. }) | Ok(()) => "closed",
        Err(_) => "error",
    }
}

/// Claim on the shared socket.
///
/// Released exactly once, either explicitly or on drop.
pub struct ConnectionLease {
    inner: Arc<Inner>,
    released: AtomicBool,
}

impl ConnectionLease {
    /// Give the claim back. Further calls are no-ops.
    pub fn release(&self) {
        if !self.released.swap(true, Ordering::AcqRel) {
            self.inner.release_one();
        }
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }
}

impl Drop for ConnectionLease {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for ConnectionLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionLease")
            .field("released", &self.is_released())
            .finish()
    }
}
