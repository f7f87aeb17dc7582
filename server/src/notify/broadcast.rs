//! Status Broadcaster
//!
//! Registry of live status subscribers. The registry lock is only held to
//! mutate the map or copy it; sends happen after it is released.

use std::collections::HashMap;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Mutex,
};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use tokio::{sync::mpsc, time::timeout};

use crate::monitor::status::StatusSnapshot;

pub type SubscriberId = u64;

#[derive(Debug, Clone, Copy)]
pub struct BroadcastSettings {
    /// Upper bound for delivering one payload to one subscriber.
    pub send_timeout: Duration,
    pub channel_capacity: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum BroadcastError {
    #[error("subscriber connection closed")]
    Closed,
}

#[async_trait]
pub trait StatusSink: Send + Sync {
    async fn send(&self, payload: Arc<str>) -> Result<(), BroadcastError>;

    fn is_closed(&self) -> bool;
}

/// Subscriber backed by a bounded channel, drained by a connection task.
pub struct ChannelSubscriber {
    tx: mpsc::Sender<Arc<str>>,
}

impl ChannelSubscriber {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Arc<str>>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

#[async_trait]
impl StatusSink for ChannelSubscriber {
    async fn send(&self, payload: Arc<str>) -> Result<(), BroadcastError> {
        self.tx
            .send(payload)
            .await
            .map_err(|_| BroadcastError::Closed)
    }

    fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastSummary {
    pub delivered: usize,
    pub removed: usize,
}

enum SendOutcome {
    Delivered,
    Closed,
    Failed(BroadcastError),
    TimedOut,
}

struct BroadcasterInner {
    subscribers: Mutex<HashMap<SubscriberId, Arc<dyn StatusSink>>>,
    next_id: AtomicU64,
    settings: BroadcastSettings,
}

#[derive(Clone)]
pub struct StatusBroadcaster {
    inner: Arc<BroadcasterInner>,
}

impl StatusBroadcaster {
    pub fn new(settings: BroadcastSettings) -> Self {
        Self {
            inner: Arc::new(BroadcasterInner {
                subscribers: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                settings,
            }),
        }
    }

    pub fn settings(&self) -> BroadcastSettings {
        self.inner.settings
    }

    pub fn register(&self, subscriber: Arc<dyn StatusSink>) -> SubscriberId {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.subscribers.lock().unwrap().insert(id, subscriber);
        id
    }

    pub fn unregister(&self, id: SubscriberId) -> bool {
        self.inner.subscribers.lock().unwrap().remove(&id).is_some()
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.lock().unwrap().len()
    }

    /// Serializes `snapshots` once and sends the payload to every subscriber
    /// concurrently. Closed, failing and timed out subscribers are dropped.
    pub async fn broadcast(&self, snapshots: &[StatusSnapshot]) -> BroadcastSummary {
        let payload: Arc<str> = match serde_json::to_string(snapshots) {
            Ok(json) => json.into(),
            Err(e) => {
                tracing::error!("Failed to serialize status snapshots: {}", e);
                return BroadcastSummary::default();
            }
        };

        let targets: Vec<(SubscriberId, Arc<dyn StatusSink>)> = {
            let subscribers = self.inner.subscribers.lock().unwrap();
            subscribers
                .iter()
                .map(|(id, sink)| (*id, sink.clone()))
                .collect()
        };

        if targets.is_empty() {
            return BroadcastSummary::default();
        }

        let send_timeout = self.inner.settings.send_timeout;
        let sends = targets.into_iter().map(|(id, sink)| {
            let payload = payload.clone();
            async move {
                if sink.is_closed() {
                    return (id, SendOutcome::Closed);
                }
                let outcome = match timeout(send_timeout, sink.send(payload)).await {
                    Ok(Ok(())) => SendOutcome::Delivered,
                    Ok(Err(e)) => SendOutcome::Failed(e),
                    Err(_) => SendOutcome::TimedOut,
                };
                (id, outcome)
            }
        });

        let mut summary = BroadcastSummary::default();
        let mut dead = Vec::new();
        for (id, outcome) in join_all(sends).await {
            match outcome {
                SendOutcome::Delivered => summary.delivered += 1,
                SendOutcome::Closed => {
                    tracing::debug!("Status subscriber {} is closed", id);
                    dead.push(id);
                }
                SendOutcome::Failed(e) => {
                    tracing::warn!("Status update to subscriber {} failed: {}", id, e);
                    dead.push(id);
                }
                SendOutcome::TimedOut => {
                    tracing::warn!(
                        "Status subscriber {} did not accept an update within {:?}",
                        id,
                        send_timeout
                    );
                    dead.push(id);
                }
            }
        }

        if !dead.is_empty() {
            let mut subscribers = self.inner.subscribers.lock().unwrap();
            for id in &dead {
                subscribers.remove(id);
            }
        }
        summary.removed = dead.len();

        summary
    }
}
