//! Payload parsing for the `price` and `depth` channels.
//!
//! Price payload:
//! `{"market": "APT_USD", "markPrice": "8.51", "openInterest": "1200", "transactionTime": 1700000000000}`
//!
//! Depth payload (levels as objects or `[price, size]` pairs):
//! `{"market": "APT_USD", "bids": [{"price": "8.50", "size": "10"}], "asks": [["8.52", "4"]]}`
//!
//! Numeric fields may be JSON numbers or strings.

use crate::error::{FeedError, FeedResult};
use perpview_core::serde_num::{f64_lenient, i64_lenient};
use perpview_core::{DepthLevel, MarketId, PriceTick};
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPrice {
    market: String,
    #[serde(deserialize_with = "f64_lenient")]
    mark_price: f64,
    #[serde(default, deserialize_with = "f64_lenient")]
    open_interest: f64,
    #[serde(deserialize_with = "i64_lenient")]
    transaction_time: i64,
}

#[derive(Debug, Deserialize)]
struct PairLevel(
    #[serde(deserialize_with = "f64_lenient")] f64,
    #[serde(deserialize_with = "f64_lenient")] f64,
);

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawLevel {
    Object {
        #[serde(deserialize_with = "f64_lenient")]
        price: f64,
        #[serde(deserialize_with = "f64_lenient")]
        size: f64,
    },
    Pair(PairLevel),
}

impl From<RawLevel> for DepthLevel {
    fn from(raw: RawLevel) -> Self {
        match raw {
            RawLevel::Object { price, size } => DepthLevel::new(price, size),
            RawLevel::Pair(PairLevel(price, size)) => DepthLevel::new(price, size),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawDepth {
    market: String,
    #[serde(default)]
    bids: Vec<RawLevel>,
    #[serde(default)]
    asks: Vec<RawLevel>,
    #[serde(default)]
    time: Option<i64>,
}

/// One depth sample as received.
#[derive(Debug, Clone, PartialEq)]
pub struct DepthUpdate {
    pub market_id: MarketId,
    pub bids: Vec<DepthLevel>,
    pub asks: Vec<DepthLevel>,
    pub time_ms: Option<i64>,
}

/// Parse a `price` channel payload.
pub fn parse_price(data: &Value) -> FeedResult<PriceTick> {
    let raw = RawPrice::deserialize(data).map_err(|e| FeedError::ParseError(e.to_string()))?;
    if !raw.mark_price.is_finite() {
        return Err(FeedError::InvalidData(format!(
            "non-finite mark price for {}",
            raw.market
        )));
    }

    Ok(PriceTick {
        market_id: MarketId::new(raw.market),
        mark_price: raw.mark_price,
        open_interest: raw.open_interest,
        transaction_time_ms: raw.transaction_time,
    })
}

/// Parse a `depth` channel payload.
///
/// Levels are passed through unvalidated; the depth aggregator discards
/// unusable ones.
pub fn parse_depth(data: &Value) -> FeedResult<DepthUpdate> {
    let raw = RawDepth::deserialize(data).map_err(|e| FeedError::ParseError(e.to_string()))?;
    Ok(DepthUpdate {
        market_id: MarketId::new(raw.market),
        bids: raw.bids.into_iter().map(DepthLevel::from).collect(),
        asks: raw.asks.into_iter().map(DepthLevel::from).collect(),
        time_ms: raw.time,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_price_string_fields() {
        let tick = parse_price(&json!({
            "market": "APT_USD",
            "markPrice": "8.51",
            "openInterest": "1200.5",
            "transactionTime": 1_700_000_000_000i64
        }))
        .unwrap();

        assert_eq!(tick.market_id, MarketId::new("APT_USD"));
        assert_eq!(tick.mark_price, 8.51);
        assert_eq!(tick.open_interest, 1200.5);
        assert_eq!(tick.transaction_time_ms, 1_700_000_000_000);
    }

    #[test]
    fn test_parse_price_missing_open_interest() {
        let tick = parse_price(&json!({
            "market": "BTC_USD",
            "markPrice": 64000,
            "transactionTime": "1700000000000"
        }))
        .unwrap();
        assert_eq!(tick.open_interest, 0.0);
        assert_eq!(tick.mark_price, 64000.0);
    }

    #[test]
    fn test_parse_price_rejects_missing_price() {
        let err = parse_price(&json!({"market": "APT_USD", "transactionTime": 1})).unwrap_err();
        assert!(matches!(err, FeedError::ParseError(_)));
    }

    #[test]
    fn test_parse_price_rejects_nan() {
        let err = parse_price(&json!({
            "market": "APT_USD",
            "markPrice": "NaN",
            "transactionTime": 1
        }))
        .unwrap_err();
        assert!(matches!(err, FeedError::InvalidData(_)));
    }

    #[test]
    fn test_parse_depth_mixed_level_shapes() {
        let update = parse_depth(&json!({
            "market": "APT_USD",
            "bids": [{"price": "8.50", "size": "10"}, {"price": 8.49, "size": 3}],
            "asks": [["8.52", "4"]],
            "time": 1_700_000_000_000i64
        }))
        .unwrap();

        assert_eq!(
            update.bids,
            vec![DepthLevel::new(8.50, 10.0), DepthLevel::new(8.49, 3.0)]
        );
        assert_eq!(update.asks, vec![DepthLevel::new(8.52, 4.0)]);
        assert_eq!(update.time_ms, Some(1_700_000_000_000));
    }

    #[test]
    fn test_parse_depth_empty_sides() {
        let update = parse_depth(&json!({"market": "APT_USD"})).unwrap();
        assert!(update.bids.is_empty());
        assert!(update.asks.is_empty());
        assert_eq!(update.time_ms, None);
    }
}
