//! Common data types for market data.
//!
//! Contains price ticks, order book levels and ladders, stream channel
//! kinds, and the explicit stream status surfaced to consumers.

use crate::error::{CoreError, Result};
use crate::market::MarketId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Single mark-price update from the feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceTick {
    pub market_id: MarketId,
    pub mark_price: f64,
    pub open_interest: f64,
    /// Exchange transaction time (ms since epoch).
    pub transaction_time_ms: i64,
}

/// Raw price level as received from the feed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DepthLevel {
    pub price: f64,
    pub size: f64,
}

impl DepthLevel {
    pub fn new(price: f64, size: f64) -> Self {
        Self { price, size }
    }

    /// A level is usable when both fields are finite and size is positive.
    pub fn is_valid(&self) -> bool {
        self.price.is_finite() && self.size.is_finite() && self.size > 0.0
    }
}

/// Ladder level annotated with the running cumulative size.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LadderLevel {
    pub price: f64,
    pub size: f64,
    pub total: f64,
}

/// Bounded-depth order book view.
///
/// Bids are sorted by price descending, asks ascending. `total` on each
/// level is the sum of sizes from the top of that side down to the level.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DepthLadder {
    pub bids: Vec<LadderLevel>,
    pub asks: Vec<LadderLevel>,
    pub best_bid: Option<f64>,
    pub best_ask: Option<f64>,
}

impl DepthLadder {
    /// Best ask minus best bid, when both sides are present.
    pub fn spread(&self) -> Option<f64> {
        match (self.best_bid, self.best_ask) {
            (Some(bid), Some(ask)) => Some(ask - bid),
            _ => None,
        }
    }

    /// Midpoint of best bid and best ask.
    pub fn mid(&self) -> Option<f64> {
        match (self.best_bid, self.best_ask) {
            (Some(bid), Some(ask)) => Some((bid + ask) / 2.0),
            _ => None,
        }
    }

    /// True when the best bid exceeds the best ask.
    pub fn is_crossed(&self) -> bool {
        matches!((self.best_bid, self.best_ask), (Some(bid), Some(ask)) if bid > ask)
    }

    pub fn is_empty(&self) -> bool {
        self.bids.is_empty() && self.asks.is_empty()
    }
}

/// Streaming channel kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    /// Mark price ticks.
    Price,
    /// Order book snapshots/deltas.
    Depth,
}

impl Channel {
    /// Wire name of the channel.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Price => "price",
            Self::Depth => "depth",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Channel {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "price" => Ok(Self::Price),
            "depth" => Ok(Self::Depth),
            other => Err(CoreError::InvalidChannel(other.to_string())),
        }
    }
}

/// Machine-readable health of a live stream.
///
/// Lets consumers tell "no data yet" apart from "feed failed".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedStatus {
    /// Waiting for the link or for the first message after (re)connect.
    Connecting,
    /// Messages are flowing.
    Live,
    /// Link is up but nothing arrived within the stall window.
    Stalled,
    /// Stream terminated with an error; no further updates will arrive.
    Failed,
}

impl FeedStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Failed)
    }
}

impl fmt::Display for FeedStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connecting => write!(f, "CONNECTING"),
            Self::Live => write!(f, "LIVE"),
            Self::Stalled => write!(f, "STALLED"),
            Self::Failed => write!(f, "FAILED"),
        }
    }
}
