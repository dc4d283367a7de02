//! WebSocket message types.
//!
//! Outgoing frames are `{"method": ..., "subscription": {...}}` requests.
//! Incoming frames are channel-tagged:
//! - "pong": heartbeat response
//! - "price", "depth": market data, with the market id in `data.market`
//! - "subscriptionResponse": subscribe/unsubscribe acknowledgement
//! - "error": feed-side error report

use perpview_core::{Channel, MarketId};
use serde::{Deserialize, Serialize};

/// Incoming WebSocket message wrapper.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WsMessage {
    /// Pong response (no data field, just channel: "pong").
    Pong(PongMessage),
    /// Channel-based message (everything carrying a data field).
    Channel(ChannelMessage),
}

impl WsMessage {
    pub fn channel(&self) -> &str {
        match self {
            Self::Pong(p) => &p.channel,
            Self::Channel(c) => &c.channel,
        }
    }
}

/// Channel-tagged frame with a JSON payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelMessage {
    pub channel: String,
    pub data: serde_json::Value,
}

impl ChannelMessage {
    /// Market id carried in the payload, if any.
    pub fn market(&self) -> Option<&str> {
        self.data.get("market").and_then(|v| v.as_str())
    }

    /// Data channel this frame belongs to, if it is a market data frame.
    pub fn data_channel(&self) -> Option<Channel> {
        self.channel.parse().ok()
    }

    /// Subscription echoed back in a `subscriptionResponse`.
    pub fn acknowledged_subscription(&self) -> Option<Topic> {
        if self.channel != "subscriptionResponse" {
            return None;
        }
        self.data
            .get("subscription")
            .and_then(|s| serde_json::from_value(s.clone()).ok())
    }
}

/// Pong response message (`{"channel": "pong"}`).
/// `deny_unknown_fields` keeps it distinct from `ChannelMessage`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PongMessage {
    pub channel: String,
}

impl PongMessage {
    pub fn is_pong(&self) -> bool {
        self.channel == "pong"
    }
}

/// Wire subscription key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Topic {
    #[serde(rename = "type")]
    pub channel: Channel,
    pub market: MarketId,
}

impl Topic {
    pub fn new(market: MarketId, channel: Channel) -> Self {
        Self { channel, market }
    }
}

/// Outgoing request to WebSocket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WsRequest {
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscription: Option<Topic>,
}

impl WsRequest {
    /// Create a ping request.
    pub fn ping() -> Self {
        Self {
            method: "ping".to_string(),
            subscription: None,
        }
    }

    /// Create a subscribe request.
    pub fn subscribe(topic: Topic) -> Self {
        Self {
            method: "subscribe".to_string(),
            subscription: Some(topic),
        }
    }

    /// Create an unsubscribe request.
    pub fn unsubscribe(topic: Topic) -> Self {
        Self {
            method: "unsubscribe".to_string(),
            subscription: Some(topic),
        }
    }
}
