//! Subscription multiplexing over the shared connection.
//!
//! Every (market, channel) pair maps to one wire-level subscription no
//! matter how many consumers read it. The first consumer sends `subscribe`,
//! the last one to cancel sends `unsubscribe`. Each consumer owns an
//! unbounded queue fed in wire order.

use crate::connection::{ConnectionConfig, ConnectionLease, ConnectionManager, FrameHandler, LinkEvent};
use crate::error::WsResult;
use crate::message::{ChannelMessage, Topic, WsRequest};
use futures_util::Stream;
use parking_lot::RwLock;
use perpview_core::{Channel, MarketId};
use perpview_telemetry::Metrics;
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Item yielded by a [`Subscription`].
#[derive(Debug, Clone, PartialEq)]
pub enum SubscriptionEvent {
    /// Payload of a data frame (the `data` object).
    Data(serde_json::Value),
    /// The link dropped; a reconnect is in progress.
    LinkDown,
    /// The link is back and the subscription was replayed.
    LinkRestored,
    /// Reconnect gave up. The sequence ends after this event.
    Failed(String),
}

struct Consumer {
    id: u64,
    tx: mpsc::UnboundedSender<SubscriptionEvent>,
}

/// Topic table shared by the multiplexer and the session task.
#[derive(Default)]
struct Router {
    topics: RwLock<HashMap<Topic, Vec<Consumer>>>,
    next_id: AtomicU64,
}

impl Router {
    /// Add a consumer. Returns its id and whether it is the first on the topic.
    fn register(
        &self,
        topic: &Topic,
        tx: mpsc::UnboundedSender<SubscriptionEvent>,
    ) -> (u64, bool) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut topics = self.topics.write();
        let consumers = topics.entry(topic.clone()).or_default();
        consumers.push(Consumer { id, tx });
        let first = consumers.len() == 1;
        if first {
            Self::record_wire_count(&topics, topic.channel);
        }
        (id, first)
    }

    /// Remove a consumer. Returns true if it was the last one on the topic.
    fn unregister(&self, topic: &Topic, id: u64) -> bool {
        let mut topics = self.topics.write();
        let Some(consumers) = topics.get_mut(topic) else {
            return false;
        };
        let before = consumers.len();
        consumers.retain(|c| c.id != id);
        if consumers.len() == before || !consumers.is_empty() {
            return false;
        }
        topics.remove(topic);
        Self::record_wire_count(&topics, topic.channel);
        true
    }

    fn consumer_count(&self, topic: &Topic) -> usize {
        self.topics.read().get(topic).map_or(0, Vec::len)
    }

    fn broadcast(&self, event: &SubscriptionEvent) {
        for consumer in self.topics.read().values().flatten() {
            let _ = consumer.tx.send(event.clone());
        }
    }

    fn record_wire_count(topics: &HashMap<Topic, Vec<Consumer>>, channel: Channel) {
        let count = topics.keys().filter(|s| s.channel == channel).count();
        Metrics::ws_wire_subscriptions(channel.as_str(), count);
    }
}

impl FrameHandler for Router {
    fn on_frame(&self, msg: ChannelMessage) {
        let Some(channel) = msg.data_channel() else {
            debug!(channel = %msg.channel, "Frame on unknown channel ignored");
            return;
        };
        let Some(market) = msg.market() else {
            warn!(channel = %msg.channel, "Data frame without market id dropped");
            return;
        };

        let topic = Topic::new(MarketId::new(market), channel);
        let topics = self.topics.read();
        let Some(consumers) = topics.get(&topic) else {
            debug!(market, %channel, "Frame for unsubscribed topic ignored");
            return;
        };

        Metrics::feed_message(channel.as_str());
        for consumer in consumers {
            // A closed receiver belongs to a consumer mid-cancel.
            let _ = consumer.tx.send(SubscriptionEvent::Data(msg.data.clone()));
        }
    }

    fn on_link_event(&self, event: LinkEvent) {
        match event {
            LinkEvent::Down => self.broadcast(&SubscriptionEvent::LinkDown),
            LinkEvent::Restored => self.broadcast(&SubscriptionEvent::LinkRestored),
            LinkEvent::Failed(reason) => {
                // Dropping the senders ends every consumer's sequence.
                let topics = std::mem::take(&mut *self.topics.write());
                let event = SubscriptionEvent::Failed(reason);
                for topic in topics.keys() {
                    Metrics::ws_wire_subscriptions(topic.channel.as_str(), 0);
                }
                for consumer in topics.values().flatten() {
                    let _ = consumer.tx.send(event.clone());
                }
            }
        }
    }

    fn replay_requests(&self) -> Vec<WsRequest> {
        self.topics
            .read()
            .keys()
            .cloned()
            .map(WsRequest::subscribe)
            .collect()
    }
}

/// Fans one shared connection out to many per-topic consumers.
#[derive(Clone)]
pub struct SubscriptionMultiplexer {
    router: Arc<Router>,
    connection: ConnectionManager,
}

impl SubscriptionMultiplexer {
    pub fn new(config: ConnectionConfig) -> Self {
        let router = Arc::new(Router::default());
        let connection = ConnectionManager::new(config, router.clone());
        Self { router, connection }
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    /// Number of live consumers on a topic.
    pub fn consumer_count(&self, market_id: &MarketId, channel: Channel) -> usize {
        self.router
            .consumer_count(&Topic::new(market_id.clone(), channel))
    }

    /// Open a consumer on `(market_id, channel)`.
    ///
    /// Takes a connection lease for the lifetime of the subscription.
    pub async fn subscribe(&self, market_id: MarketId, channel: Channel) -> WsResult<Subscription> {
        let lease = self.connection.acquire().await?;
        let topic = Topic::new(market_id, channel);
        let (tx, rx) = mpsc::unbounded_channel();
        let (consumer_id, first) = self.router.register(&topic, tx);

        if first {
            if let Err(e) = self.connection.send(&WsRequest::subscribe(topic.clone())) {
                self.router.unregister(&topic, consumer_id);
                return Err(e);
            }
            info!(market = %topic.market, %channel, "Subscribed");
        } else {
            debug!(market = %topic.market, %channel, consumer_id, "Joined existing subscription");
        }

        Ok(Subscription {
            topic,
            consumer_id,
            rx,
            router: Arc::clone(&self.router),
            connection: self.connection.clone(),
            lease,
            cancelled: AtomicBool::new(false),
        })
    }
}

/// One consumer's view of a topic.
///
/// Yields [`SubscriptionEvent`]s until cancelled, dropped, or the link fails.
pub struct Subscription {
    topic: Topic,
    consumer_id: u64,
    rx: mpsc::UnboundedReceiver<SubscriptionEvent>,
    router: Arc<Router>,
    connection: ConnectionManager,
    lease: ConnectionLease,
    cancelled: AtomicBool,
}

impl Subscription {
    pub fn market_id(&self) -> &MarketId {
        &self.topic.market
    }

    pub fn channel(&self) -> Channel {
        self.topic.channel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Next event, or `None` once the sequence has ended.
    pub async fn recv(&mut self) -> Option<SubscriptionEvent> {
        if self.is_cancelled() {
            return None;
        }
        self.rx.recv().await
    }

    /// Stop receiving and give the connection lease back.
    ///
    /// Safe to call repeatedly and after the connection has closed.
    pub fn cancel(&self) {
        if self.cancelled.swap(true, Ordering::AcqRel) {
            return;
        }

        if self.router.unregister(&self.topic, self.consumer_id) {
            match self.connection.send(&WsRequest::unsubscribe(self.topic.clone())) {
                Ok(()) => info!(market = %self.topic.market, channel = %self.topic.channel, "Unsubscribed"),
                Err(e) => debug!(error = %e, "Unsubscribe not sent"),
            }
        }
        self.lease.release();
    }
}

impl Stream for Subscription {
    type Item = SubscriptionEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.is_cancelled() {
            return Poll::Ready(None);
        }
        this.rx.poll_recv(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("market", &self.topic.market)
            .field("channel", &self.topic.channel)
            .field("consumer_id", &self.consumer_id)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
