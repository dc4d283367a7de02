//! Core domain types for the perpview market-data layer.
//!
//! This crate provides the types shared by every other crate:
//! - `MarketId`, `Symbol`: exchange identifier and human-readable pair name
//! - `PriceTick`: a single mark-price update from the feed
//! - `Candle`, `Resolution`: OHLC bars and their bucket widths
//! - `DepthLevel`, `DepthLadder`: order book levels with cumulative totals
//! - `Channel`, `FeedStatus`: stream channel kinds and stream health

pub mod candle;
pub mod error;
pub mod market;
pub mod serde_num;
pub mod types;

pub use candle::{Candle, Resolution};
pub use error::{CoreError, Result};
pub use market::{MarketId, Symbol};
pub use types::{Channel, DepthLadder, DepthLevel, FeedStatus, LadderLevel, PriceTick};
