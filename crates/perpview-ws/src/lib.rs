//! WebSocket client for the perpview market-data feed.
//!
//! Provides one shared physical connection for many consumers:
//! - Reference-counted leases with a deferred, cancellable close
//! - Single-flight connect shared by concurrent acquirers
//! - Automatic reconnection with exponential backoff and subscription replay
//! - Heartbeat monitoring (application-level ping, pong timeout detection)
//! - Per-(market, channel) multiplexing onto independent consumer streams

pub mod connection;
pub mod error;
pub mod heartbeat;
pub mod message;
pub mod subscription;

pub use connection::{
    ConnectionConfig, ConnectionLease, ConnectionManager, ConnectionState, FrameHandler, LinkEvent,
};
pub use error::{WsError, WsResult};
pub use message::{ChannelMessage, PongMessage, Topic, WsMessage, WsRequest};
pub use subscription::{Subscription, SubscriptionEvent, SubscriptionMultiplexer};

use std::sync::Once;

static INIT_CRYPTO: Once = Once::new();

/// Initialize the TLS crypto provider.
/// Must be called before any `wss://` connection is made.
pub fn init_crypto() {
    INIT_CRYPTO.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}
