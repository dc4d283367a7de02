//! Heartbeat tracking for a single WebSocket link.
//!
//! A ping is sent only after the link has been quiet for a full interval;
//! any inbound frame counts as proof of life. Owned by the session task,
//! so no interior locking is needed.

use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Heartbeat state for one link.
#[derive(Debug)]
pub struct Heartbeat {
    interval: Duration,
    timeout: Duration,
    last_ping: Option<Instant>,
    last_message: Instant,
    waiting_for_pong: bool,
}

impl Heartbeat {
    pub fn new(interval_ms: u64, timeout_ms: u64) -> Self {
        Self {
            interval: Duration::from_millis(interval_ms.max(1)),
            timeout: Duration::from_millis(timeout_ms),
            last_ping: None,
            last_message: Instant::now(),
            waiting_for_pong: false,
        }
    }

    pub fn record_ping(&mut self) {
        self.last_ping = Some(Instant::now());
        self.waiting_for_pong = true;
    }

    pub fn record_pong(&mut self) {
        self.waiting_for_pong = false;
        if let Some(ping) = self.last_ping {
            debug!(rtt_ms = ping.elapsed().as_millis() as u64, "Received pong");
        }
        self.last_message = Instant::now();
    }

    /// Any inbound frame resets the idle clock.
    pub fn record_message(&mut self) {
        self.last_message = Instant::now();
    }

    /// True once a ping has gone unanswered for longer than the timeout.
    pub fn is_timed_out(&self) -> bool {
        match (self.waiting_for_pong, self.last_ping) {
            (true, Some(ping)) => ping.elapsed() > self.timeout,
            _ => false,
        }
    }

    pub fn should_send_ping(&self) -> bool {
        !self.waiting_for_pong && self.last_message.elapsed() >= self.interval
    }

    /// Sleep until the next heartbeat check.
    pub async fn wait_for_check(&self) {
        tokio::time::sleep(self.interval / 2).await;
    }
}
