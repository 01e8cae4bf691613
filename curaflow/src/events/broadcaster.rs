//! Per-project fan-out of status events.

use dashmap::DashMap;
use futures::stream::{self, BoxStream, Stream, StreamExt};
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, warn};

use crate::core::{ProjectId, StatusEvent};

/// Counters for broadcaster monitoring.
#[derive(Debug, Default)]
pub struct BroadcastMetrics {
    published: AtomicU64,
    delivered_to: AtomicU64,
    dropped: AtomicU64,
}

impl BroadcastMetrics {
    fn record_publish(&self, receivers: usize) {
        self.published.fetch_add(1, Ordering::Relaxed);
        self.delivered_to.fetch_add(receivers as u64, Ordering::Relaxed);
    }

    fn record_drop(&self, count: u64) {
        self.dropped.fetch_add(count, Ordering::Relaxed);
    }

    /// Returns the number of published events.
    #[must_use]
    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    /// Returns the number of events dropped across all subscribers.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Converts metrics to JSON.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "published": self.published(),
            "deliveries": self.delivered_to.load(Ordering::Relaxed),
            "dropped": self.dropped(),
        })
    }
}

#[derive(Debug)]
struct ProjectChannel {
    sender: broadcast::Sender<StatusEvent>,
    sequence: u64,
}

/// Distributes status events to any number of subscribers.
#[derive(Debug)]
pub struct StatusBroadcaster {
    capacity: usize,
    channels: DashMap<ProjectId, ProjectChannel>,
    firehose: broadcast::Sender<StatusEvent>,
    metrics: Arc<BroadcastMetrics>,
    next_subscription: AtomicU64,
}

impl StatusBroadcaster {
    /// Creates a broadcaster whose subscribers each buffer up to `capacity`
    /// events. A capacity of zero is raised to one.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (firehose, _) = broadcast::channel(capacity);
        Self {
            capacity,
            channels: DashMap::new(),
            firehose,
            metrics: Arc::new(BroadcastMetrics::default()),
            next_subscription: AtomicU64::new(1),
        }
    }

    /// Returns the per-subscriber buffer size.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the broadcaster's counters.
    #[must_use]
    pub fn metrics(&self) -> &BroadcastMetrics {
        &self.metrics
    }

    /// Stamps the event with the project's next sequence number and delivers
    /// it to every current subscriber. Returns the stamped event.
    pub fn publish(&self, mut event: StatusEvent) -> StatusEvent {
        let receivers = {
            let mut channel = self
                .channels
                .entry(event.project_id)
                .or_insert_with(|| self.new_channel());
            channel.sequence += 1;
            event.sequence = channel.sequence;
            // No receivers is not an error.
            channel.sender.send(event.clone()).unwrap_or(0)
        };
        let receivers = receivers + self.firehose.send(event.clone()).unwrap_or(0);
        self.metrics.record_publish(receivers);

        debug!(
            project_id = %event.project_id,
            stage = ?event.stage_id,
            sequence = event.sequence,
            level = ?event.level,
            change = ?event.change,
            receivers,
            "Status event"
        );
        event
    }

    /// Subscribes to one project's events.
    ///
    /// The subscription receives events published from now on; a project
    /// without an active run is a valid target.
    pub fn subscribe(&self, project_id: ProjectId) -> StatusSubscription {
        let rx = self
            .channels
            .entry(project_id)
            .or_insert_with(|| self.new_channel())
            .sender
            .subscribe();
        self.subscription(Some(project_id), rx)
    }

    /// Subscribes to every project's events.
    pub fn subscribe_all(&self) -> StatusSubscription {
        self.subscription(None, self.firehose.subscribe())
    }

    /// Releases a subscription.
    pub fn unsubscribe(&self, subscription: StatusSubscription) {
        debug!(
            subscription = subscription.id,
            project_id = ?subscription.project_id,
            dropped = subscription.dropped(),
            "Unsubscribed"
        );
        drop(subscription);
    }

    /// Returns the number of live subscribers for a project.
    #[must_use]
    pub fn subscriber_count(&self, project_id: ProjectId) -> usize {
        self.channels
            .get(&project_id)
            .map_or(0, |c| c.sender.receiver_count())
    }

    /// Ends every stream subscribed to the project. Buffered events are
    /// still delivered before the streams finish.
    pub fn close_project(&self, project_id: ProjectId) {
        if self.channels.remove(&project_id).is_some() {
            debug!(project_id = %project_id, "Closed status channel");
        }
    }

    fn new_channel(&self) -> ProjectChannel {
        let (sender, _) = broadcast::channel(self.capacity);
        ProjectChannel { sender, sequence: 0 }
    }

    fn subscription(&self, project_id: Option<ProjectId>, rx: broadcast::Receiver<StatusEvent>) -> StatusSubscription {
        let id = self.next_subscription.fetch_add(1, Ordering::Relaxed);
        let dropped = Arc::new(AtomicU64::new(0));
        let metrics = self.metrics.clone();

        let stream = stream::unfold(
            (rx, dropped.clone(), metrics),
            move |(mut rx, dropped, metrics)| async move {
                loop {
                    match rx.recv().await {
                        Ok(event) => return Some((event, (rx, dropped, metrics))),
                        Err(RecvError::Lagged(count)) => {
                            dropped.fetch_add(count, Ordering::Relaxed);
                            metrics.record_drop(count);
                            warn!(subscription = id, dropped = count, "Subscriber lagged; oldest events dropped");
                        }
                        Err(RecvError::Closed) => return None,
                    }
                }
            },
        )
        .boxed();

        StatusSubscription {
            id,
            project_id,
            stream,
            dropped,
        }
    }
}

/// A lazily consumed stream of status events.
pub struct StatusSubscription {
    id: u64,
    project_id: Option<ProjectId>,
    stream: BoxStream<'static, StatusEvent>,
    dropped: Arc<AtomicU64>,
}

impl StatusSubscription {
    /// Returns the subscription id.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Returns the project this subscription follows, or `None` for the
    /// all-projects channel.
    #[must_use]
    pub fn project_id(&self) -> Option<ProjectId> {
        self.project_id
    }

    /// Returns how many events this subscriber has missed by lagging.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Waits for the next event. Returns `None` once the channel is closed.
    pub async fn recv(&mut self) -> Option<StatusEvent> {
        self.stream.next().await
    }
}

impl std::fmt::Debug for StatusSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusSubscription")
            .field("id", &self.id)
            .field("project_id", &self.project_id)
            .field("dropped", &self.dropped())
            .finish_non_exhaustive()
    }
}

impl Stream for StatusSubscription {
    type Item = StatusEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.stream.poll_next_unpin(cx)
    }
}
