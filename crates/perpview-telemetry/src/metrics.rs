//! Prometheus metrics for perpview.
//!
//! Covers:
//! - Connection state, leases and reconnects
//! - Feed message throughput and parse failures
//! - Candle and depth aggregation corrections
//! - Market resolution cache behaviour
//!
//! # Panics
//!
//! Metric registration uses `unwrap()`. A failure means duplicate metric
//! names, which is a programming error surfaced on first use.

use crate::error::{TelemetryError, TelemetryResult};
use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_gauge, register_gauge_vec, register_int_gauge, CounterVec,
    Encoder, Gauge, GaugeVec, IntGauge, TextEncoder,
};

/// WebSocket connection state (1 = connected, 0 = disconnected).
pub static WS_CONNECTED: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!(
        "perpview_ws_connected",
        "WebSocket connection state (1=connected)"
    )
    .unwrap()
});

/// Connection state machine current state.
/// Labels: state (disconnected/connecting/connected/reconnecting/failed)
pub static WS_STATE: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "perpview_ws_state",
        "Connection state machine current state (1=active, 0=inactive)",
        &["state"]
    )
    .unwrap()
});

/// Total reconnection attempts.
pub static WS_RECONNECT_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "perpview_ws_reconnect_total",
        "Total WebSocket reconnection attempts",
        &["reason"]
    )
    .unwrap()
});

/// Outstanding connection leases (reference count).
pub static WS_LEASES: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "perpview_ws_leases",
        "Outstanding connection leases held by consumers"
    )
    .unwrap()
});

/// Wire-level subscriptions currently open.
pub static WS_WIRE_SUBSCRIPTIONS: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "perpview_ws_wire_subscriptions",
        "Wire-level subscriptions currently open",
        &["channel"]
    )
    .unwrap()
});

/// Feed messages dispatched to consumers.
pub static FEED_MESSAGES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "perpview_feed_messages_total",
        "Feed messages dispatched to consumers",
        &["channel"]
    )
    .unwrap()
});

/// Feed payloads that could not be parsed.
pub static FEED_PARSE_ERRORS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "perpview_feed_parse_errors_total",
        "Feed payloads that failed to parse",
        &["channel"]
    )
    .unwrap()
});

/// Price ticks folded into candles.
pub static CANDLE_TICKS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "perpview_candle_ticks_total",
        "Price ticks folded into candle bars",
        &["market"]
    )
    .unwrap()
});

/// Late ticks dropped by the candle aggregator.
pub static CANDLE_LATE_TICKS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "perpview_candle_late_ticks_total",
        "Out-of-order ticks dropped by the candle aggregator",
        &["market"]
    )
    .unwrap()
});

/// Crossed depth samples corrected by the depth aggregator.
pub static DEPTH_CROSSED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "perpview_depth_crossed_total",
        "Crossed order book samples seen by the depth aggregator",
        &["market"]
    )
    .unwrap()
});

/// Resolver lookups by outcome.
/// Labels: outcome (hit/static/unknown)
pub static RESOLVER_LOOKUPS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "perpview_resolver_lookups_total",
        "Market resolution lookups by outcome",
        &["outcome"]
    )
    .unwrap()
});

/// Resolver listing refreshes by outcome.
/// Labels: outcome (ok/failed)
pub static RESOLVER_REFRESH_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "perpview_resolver_refresh_total",
        "Market listing refreshes by outcome",
        &["outcome"]
    )
    .unwrap()
});

/// Metrics helper.
pub struct Metrics;

impl Metrics {
    /// Record WebSocket connected.
    pub fn ws_connected() {
        WS_CONNECTED.set(1.0);
    }

    /// Record WebSocket disconnected.
    pub fn ws_disconnected() {
        WS_CONNECTED.set(0.0);
    }

    /// Set connection state machine state.
    /// Only the active state is set to 1, all others to 0.
    pub fn ws_state_set(state: &str) {
        for s in &[
            "disconnected",
            "connecting",
            "connected",
            "reconnecting",
            "failed",
        ] {
            WS_STATE.with_label_values(&[s]).set(0.0);
        }
        WS_STATE.with_label_values(&[state]).set(1.0);
    }

    /// Record reconnection attempt.
    pub fn ws_reconnect(reason: &str) {
        WS_RECONNECT_TOTAL.with_label_values(&[reason]).inc();
    }

    /// Set outstanding lease count.
    pub fn ws_leases(count: usize) {
        WS_LEASES.set(count as i64);
    }

    /// Set number of open wire subscriptions for a channel.
    pub fn ws_wire_subscriptions(channel: &str, count: usize) {
        WS_WIRE_SUBSCRIPTIONS
            .with_label_values(&[channel])
            .set(count as f64);
    }

    /// Record a dispatched feed message.
    pub fn feed_message(channel: &str) {
        FEED_MESSAGES_TOTAL.with_label_values(&[channel]).inc();
    }

    /// Record a feed payload parse failure.
    pub fn feed_parse_error(channel: &str) {
        FEED_PARSE_ERRORS_TOTAL.with_label_values(&[channel]).inc();
    }

    /// Record a tick folded into a candle.
    pub fn candle_tick(market: &str) {
        CANDLE_TICKS_TOTAL.with_label_values(&[market]).inc();
    }

    /// Record a late tick dropped by the candle aggregator.
    pub fn candle_late_tick(market: &str) {
        CANDLE_LATE_TICKS_TOTAL.with_label_values(&[market]).inc();
    }

    /// Record a crossed depth sample.
    pub fn depth_crossed(market: &str) {
        DEPTH_CROSSED_TOTAL.with_label_values(&[market]).inc();
    }

    /// Record a resolver lookup outcome.
    pub fn resolver_lookup(outcome: &str) {
        RESOLVER_LOOKUPS_TOTAL.with_label_values(&[outcome]).inc();
    }

    /// Record a listing refresh outcome.
    pub fn resolver_refresh(outcome: &str) {
        RESOLVER_REFRESH_TOTAL.with_label_values(&[outcome]).inc();
    }

    /// Render all registered metrics in the Prometheus text format.
    pub fn encode_text() -> TelemetryResult<String> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&prometheus::gather(), &mut buffer)
            .map_err(|e| TelemetryError::Metrics(e.to_string()))?;
        String::from_utf8(buffer).map_err(|e| TelemetryError::Metrics(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ws_state_is_exclusive() {
        Metrics::ws_state_set("connecting");
        Metrics::ws_state_set("connected");
        assert_eq!(WS_STATE.with_label_values(&["connected"]).get(), 1.0);
        assert_eq!(WS_STATE.with_label_values(&["connecting"]).get(), 0.0);
    }

    #[test]
    fn test_counters_increment() {
        let before = CANDLE_LATE_TICKS_TOTAL
            .with_label_values(&["TEST_MARKET"])
            .get();
        Metrics::candle_late_tick("TEST_MARKET");
        let after = CANDLE_LATE_TICKS_TOTAL
            .with_label_values(&["TEST_MARKET"])
            .get();
        assert_eq!(after - before, 1.0);
    }

    #[test]
    fn test_encode_text_contains_registered_metric() {
        Metrics::resolver_refresh("ok");
        let text = Metrics::encode_text().unwrap();
        assert!(text.contains("perpview_resolver_refresh_total"));
    }
}
