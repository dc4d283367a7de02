//! Market data aggregation for perpview.
//!
//! Folds raw feed payloads into consumer-facing views:
//! - `CandleAggregator`: price ticks into OHLC bars, merged with history
//! - `DepthAggregator`: bid/ask samples into a bounded, corrected ladder
//! - `FeedStream`: drives an aggregator from a live subscription and
//!   reports stream health as `FeedStatus`

pub mod candle;
pub mod depth;
pub mod error;
pub mod parser;
pub mod stream;

pub use candle::{rebucket, CandleAggregator};
pub use depth::DepthAggregator;
pub use error::{FeedError, FeedResult};
pub use parser::{parse_depth, parse_price, DepthUpdate};
pub use stream::{CandleStream, DepthStream, FeedFold, FeedStream, StreamEvent};
