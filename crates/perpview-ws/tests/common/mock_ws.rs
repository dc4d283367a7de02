//! Mock market-data WebSocket server for integration tests.
//!
//! Accepts connections, acknowledges subscribe/unsubscribe requests,
//! answers application pings, records every text frame it receives,
//! and lets the test push frames to (or kick) every connected client.

#![allow(dead_code)]

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio_tungstenite::{accept_async, tungstenite::Message};

#[derive(Debug, Clone)]
enum ServerCommand {
    Push(String),
    Kick,
}

pub struct MockWsServer {
    addr: SocketAddr,
    shutdown_tx: mpsc::Sender<()>,
    commands: broadcast::Sender<ServerCommand>,
    messages: Arc<Mutex<Vec<Value>>>,
    connections: Arc<AtomicU32>,
    active: Arc<AtomicU32>,
}

impl MockWsServer {
    /// Start a new mock server on an available port.
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let messages = Arc::new(Mutex::new(Vec::new()));
        let connections = Arc::new(AtomicU32::new(0));
        let active = Arc::new(AtomicU32::new(0));
        let (commands, _) = broadcast::channel(64);
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

        let state = ConnectionContext {
            messages: messages.clone(),
            connections: connections.clone(),
            active: active.clone(),
            commands: commands.clone(),
        };

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    Ok((stream, _)) = listener.accept() => {
                        tokio::spawn(handle_connection(stream, state.clone()));
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
        });

        Self {
            addr,
            shutdown_tx,
            commands,
            messages,
            connections,
            active,
        }
    }

    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Total connections accepted since start.
    pub fn connection_count(&self) -> u32 {
        self.connections.load(Ordering::SeqCst)
    }

    /// Connections currently open.
    pub fn active_connections(&self) -> u32 {
        self.active.load(Ordering::SeqCst)
    }

    pub async fn received_messages(&self) -> Vec<Value> {
        self.messages.lock().await.clone()
    }

    /// Received requests with the given method, e.g. "subscribe".
    pub async fn requests(&self, method: &str) -> Vec<Value> {
        self.received_messages()
            .await
            .into_iter()
            .filter(|m| m.get("method").and_then(Value::as_str) == Some(method))
            .collect()
    }

    /// Poll until `count` requests with `method` have arrived.
    pub async fn wait_for_requests(&self, method: &str, count: usize) -> Vec<Value> {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let found = self.requests(method).await;
            if found.len() >= count || tokio::time::Instant::now() >= deadline {
                return found;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Poll until the number of open connections equals `expected`.
    pub async fn wait_for_active(&self, expected: u32) -> bool {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while tokio::time::Instant::now() < deadline {
            if self.active_connections() == expected {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    /// Send a text frame to every connected client.
    pub fn push(&self, frame: Value) {
        let _ = self.commands.send(ServerCommand::Push(frame.to_string()));
    }

    /// Push a `price` frame for a market.
    pub fn push_price(&self, market: &str, mark_price: &str, time_ms: i64) {
        self.push(json!({
            "channel": "price",
            "data": {
                "market": market,
                "markPrice": mark_price,
                "openInterest": "1000",
                "transactionTime": time_ms,
            }
        }));
    }

    /// Drop every client connection without a close handshake.
    pub fn kick_all(&self) {
        let _ = self.commands.send(ServerCommand::Kick);
    }

    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
    }
}

#[derive(Clone)]
struct ConnectionContext {
    messages: Arc<Mutex<Vec<Value>>>,
    connections: Arc<AtomicU32>,
    active: Arc<AtomicU32>,
    commands: broadcast::Sender<ServerCommand>,
}

async fn handle_connection(stream: TcpStream, ctx: ConnectionContext) {
    let mut commands = ctx.commands.subscribe();
    // Counted before the handshake completes so the client never observes
    // an open socket the server has not counted yet.
    ctx.connections.fetch_add(1, Ordering::SeqCst);
    ctx.active.fetch_add(1, Ordering::SeqCst);
    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            eprintln!("WebSocket handshake failed: {e}");
            ctx.active.fetch_sub(1, Ordering::SeqCst);
            return;
        }
    };

    let (mut write, mut read) = ws_stream.split();

    loop {
        tokio::select! {
            msg = read.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    let Ok(parsed) = serde_json::from_str::<Value>(&text) else {
                        continue;
                    };
                    ctx.messages.lock().await.push(parsed.clone());
                    if let Some(reply) = reply_for(&parsed) {
                        let _ = write.send(Message::Text(reply.to_string())).await;
                    }
                }
                Some(Ok(Message::Ping(data))) => {
                    let _ = write.send(Message::Pong(data)).await;
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
            cmd = commands.recv() => match cmd {
                Ok(ServerCommand::Push(frame)) => {
                    let _ = write.send(Message::Text(frame)).await;
                }
                Ok(ServerCommand::Kick) => break,
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }

    ctx.active.fetch_sub(1, Ordering::SeqCst);
}

fn reply_for(request: &Value) -> Option<Value> {
    match request.get("method").and_then(Value::as_str)? {
        "ping" => Some(json!({"channel": "pong"})),
        method @ ("subscribe" | "unsubscribe") => Some(json!({
            "channel": "subscriptionResponse",
            "data": {
                "method": method,
                "subscription": request.get("subscription")?,
            }
        })),
        _ => None,
    }
}
