//! Live aggregated streams.
//!
//! A [`FeedStream`] owns one subscription and one aggregator. Raw events are
//! folded as they arrive and surfaced as [`StreamEvent`]s: either an updated
//! view or a change of [`FeedStatus`].
//!
//! Status transitions:
//! - `Connecting` until the first usable payload, and again after a link drop
//! - `Live` while payloads arrive
//! - `Stalled` when the link is open but nothing arrived within the stall
//!   window, whether the stream was `Live` or still `Connecting`
//! - `Failed` when the link gave up; the stream then ends
//!
//! The stall window is not armed while the link is down; reconnect
//! progress is reported by the connection layer instead.

use crate::candle::CandleAggregator;
use crate::depth::DepthAggregator;
use crate::error::FeedResult;
use crate::parser::{parse_depth, parse_price};
use perpview_core::{Candle, Channel, DepthLadder, FeedStatus, Resolution};
use perpview_telemetry::Metrics;
use perpview_ws::{Subscription, SubscriptionEvent};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

/// Folds raw channel payloads into a view.
pub trait FeedFold: Send {
    type Output: Send;

    /// Channel the payloads come from.
    const CHANNEL: Channel;

    /// Fold one payload. `Ok(None)` means it was valid but changed nothing.
    fn fold(&mut self, data: &Value) -> FeedResult<Option<Self::Output>>;
}

impl FeedFold for CandleAggregator {
    type Output = Candle;
    const CHANNEL: Channel = Channel::Price;

    fn fold(&mut self, data: &Value) -> FeedResult<Option<Candle>> {
        let tick = parse_price(data)?;
        Ok(self.apply(&tick))
    }
}

impl FeedFold for DepthAggregator {
    type Output = DepthLadder;
    const CHANNEL: Channel = Channel::Depth;

    fn fold(&mut self, data: &Value) -> FeedResult<Option<DepthLadder>> {
        let update = parse_depth(data)?;
        Ok(Some(self.apply(update.bids, update.asks)))
    }
}

/// Item yielded by a [`FeedStream`].
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent<T> {
    Update(T),
    Status(FeedStatus),
}

/// Aggregated live stream over one subscription.
pub struct FeedStream<F: FeedFold> {
    subscription: Subscription,
    aggregator: F,
    stall_timeout: Duration,
    status: FeedStatus,
    /// False between `LinkDown` and `LinkRestored`.
    link_up: bool,
    pending: Option<F::Output>,
    finished: bool,
}

pub type CandleStream = FeedStream<CandleAggregator>;
pub type DepthStream = FeedStream<DepthAggregator>;

impl<F: FeedFold> FeedStream<F> {
    /// A zero `stall_timeout` disables stall detection.
    pub fn new(subscription: Subscription, aggregator: F, stall_timeout: Duration) -> Self {
        Self {
            subscription,
            aggregator,
            stall_timeout,
            status: FeedStatus::Connecting,
            link_up: true,
            pending: None,
            finished: false,
        }
    }

    pub fn status(&self) -> FeedStatus {
        self.status
    }

    pub fn aggregator(&self) -> &F {
        &self.aggregator
    }

    pub fn subscription(&self) -> &Subscription {
        &self.subscription
    }

    /// Stop the stream and release its connection lease. Idempotent.
    pub fn cancel(&self) {
        self.subscription.cancel();
    }

    /// Next update or status change. `None` once the stream has ended.
    pub async fn next_event(&mut self) -> Option<StreamEvent<F::Output>> {
        loop {
            if let Some(output) = self.pending.take() {
                return Some(StreamEvent::Update(output));
            }
            if self.finished {
                return None;
            }

            let event = if self.stall_armed() {
                match tokio::time::timeout(self.stall_timeout, self.subscription.recv()).await {
                    Ok(event) => event,
                    Err(_) => {
                        debug!(
                            market = %self.subscription.market_id(),
                            channel = %F::CHANNEL,
                            "No data within stall window"
                        );
                        return Some(self.transition(FeedStatus::Stalled));
                    }
                }
            } else {
                self.subscription.recv().await
            };

            match event {
                Some(SubscriptionEvent::Data(data)) => match self.aggregator.fold(&data) {
                    Ok(output) => {
                        self.pending = output;
                        if self.status != FeedStatus::Live {
                            return Some(self.transition(FeedStatus::Live));
                        }
                    }
                    Err(e) => {
                        Metrics::feed_parse_error(F::CHANNEL.as_str());
                        warn!(
                            market = %self.subscription.market_id(),
                            channel = %F::CHANNEL,
                            error = %e,
                            "Payload skipped"
                        );
                    }
                },
                Some(SubscriptionEvent::LinkDown) => {
                    self.link_up = false;
                    return Some(self.transition(FeedStatus::Connecting));
                }
                // Stays Connecting until data flows again.
                Some(SubscriptionEvent::LinkRestored) => self.link_up = true,
                Some(SubscriptionEvent::Failed(reason)) => {
                    warn!(market = %self.subscription.market_id(), %reason, "Stream failed");
                    self.finished = true;
                    return Some(self.transition(FeedStatus::Failed));
                }
                None => {
                    self.finished = true;
                    if self.subscription.is_cancelled() || self.status == FeedStatus::Failed {
                        return None;
                    }
                    return Some(self.transition(FeedStatus::Failed));
                }
            }
        }
    }

    fn stall_armed(&self) -> bool {
        self.link_up
            && !self.stall_timeout.is_zero()
            && matches!(self.status, FeedStatus::Live | FeedStatus::Connecting)
    }

    fn transition(&mut self, status: FeedStatus) -> StreamEvent<F::Output> {
        debug!(
            market = %self.subscription.market_id(),
            channel = %F::CHANNEL,
            from = %self.status,
            to = %status,
            "Stream status changed"
        );
        self.status = status;
        StreamEvent::Status(status)
    }
}

impl FeedStream<CandleAggregator> {
    /// Switch resolution. Bar state is rebuilt from `history`.
    pub fn set_resolution(&mut self, resolution: Resolution, history: Vec<Candle>) {
        self.aggregator.reset(resolution, history);
    }

    pub fn bars(&self) -> &[Candle] {
        self.aggregator.bars()
    }
}

impl<F: FeedFold> std::fmt::Debug for FeedStream<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedStream")
            .field("subscription", &self.subscription)
            .field("status", &self.status)
            .field("link_up", &self.link_up)
            .field("finished", &self.finished)
            .finish()
    }
}
