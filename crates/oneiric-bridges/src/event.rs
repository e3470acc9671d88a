use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use oneiric_domain::{Domain, Key};
use oneiric_lifecycle::BoxError;
use oneiric_store::RuntimeStore;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::activity::check_activity;
use crate::error::BridgeError;

/// Receives events whose topic matches a subscription filter.
#[async_trait]
pub trait EventHandler: Send + Sync + 'static {
    async fn handle(&self, topic: &str, payload: &Value) -> Result<(), BoxError>;
}

/// How a published event fans out across matching subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FanoutStrategy {
    /// Deliver to every matching subscriber.
    #[default]
    All,
    /// Deliver to the first matching subscriber only.
    FirstMatch,
}

struct Subscription {
    id: Uuid,
    filter: String,
    handler: Arc<dyn EventHandler>,
}

/// Event facade: topic-filtered fan-out with per-subscriber retries.
///
/// The bus itself is a slot in the `event` domain (key `bus`), so pausing
/// or draining it rejects publishes like any other slot.
pub struct EventBridge {
    store: Arc<dyn RuntimeStore>,
    key: Key,
    strategy: FanoutStrategy,
    retries: u32,
    retry_delay: Duration,
    subscriptions: RwLock<Vec<Subscription>>,
}

impl EventBridge {
    pub fn new(store: Arc<dyn RuntimeStore>, strategy: FanoutStrategy) -> Self {
        Self {
            store,
            key: Key::new("bus"),
            strategy,
            retries: 2,
            retry_delay: Duration::from_millis(100),
            subscriptions: RwLock::new(Vec::new()),
        }
    }

    pub fn with_retries(mut self, retries: u32, delay: Duration) -> Self {
        self.retries = retries;
        self.retry_delay = delay;
        self
    }

    /// Subscribe a handler to topics starting with `filter`. Returns the
    /// subscription id for unsubscribe.
    pub async fn subscribe(
        &self,
        filter: impl Into<String>,
        handler: Arc<dyn EventHandler>,
    ) -> Uuid {
        let id = Uuid::new_v4();
        self.subscriptions.write().await.push(Subscription {
            id,
            filter: filter.into(),
            handler,
        });
        id
    }

    pub async fn unsubscribe(&self, id: Uuid) -> bool {
        let mut subs = self.subscriptions.write().await;
        let before = subs.len();
        subs.retain(|s| s.id != id);
        subs.len() < before
    }

    /// Publish to all matching subscribers (per strategy). Each failing
    /// subscriber is retried independently; one subscriber's failure never
    /// blocks the others. Returns how many deliveries succeeded.
    pub async fn publish(&self, topic: &str, payload: &Value) -> Result<usize, BridgeError> {
        check_activity(&self.store, Domain::Event, &self.key).await?;

        let matching: Vec<(Uuid, Arc<dyn EventHandler>)> = {
            let subs = self.subscriptions.read().await;
            let mut out = Vec::new();
            for sub in subs.iter() {
                if topic.starts_with(&sub.filter) {
                    out.push((sub.id, sub.handler.clone()));
                    if self.strategy == FanoutStrategy::FirstMatch {
                        break;
                    }
                }
            }
            out
        };

        let mut delivered = 0;
        for (id, handler) in matching {
            if self.deliver(&handler, topic, payload).await {
                delivered += 1;
            } else {
                warn!(topic = %topic, subscription = %id, "delivery failed after retries");
            }
        }
        debug!(topic = %topic, delivered, "event published");
        Ok(delivered)
    }

    async fn deliver(&self, handler: &Arc<dyn EventHandler>, topic: &str, payload: &Value) -> bool {
        let mut attempt = 0;
        loop {
            match handler.handle(topic, payload).await {
                Ok(()) => return true,
                Err(e) if attempt < self.retries => {
                    attempt += 1;
                    debug!(topic = %topic, attempt, error = %e, "retrying delivery");
                    tokio::time::sleep(self.retry_delay).await;
                }
                Err(_) => return false,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use chrono::Utc;
    use oneiric_domain::{ActivityRecord, ActivityState};
    use oneiric_store::InMemoryStore;
    use serde_json::json;

    struct Counter {
        calls: AtomicUsize,
        fail_first: usize,
    }

    #[async_trait]
    impl EventHandler for Counter {
        async fn handle(&self, _topic: &str, _payload: &Value) -> Result<(), BoxError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first {
                return Err("transient".into());
            }
            Ok(())
        }
    }

    fn counter(fail_first: usize) -> Arc<Counter> {
        Arc::new(Counter { calls: AtomicUsize::new(0), fail_first })
    }

    fn bridge() -> EventBridge {
        EventBridge::new(Arc::new(InMemoryStore::new()), FanoutStrategy::All)
            .with_retries(2, Duration::from_millis(1))
    }

    #[tokio::test]
    async fn fanout_delivers_to_matching_filters() {
        let bridge = bridge();
        let orders = counter(0);
        let all = counter(0);
        bridge.subscribe("orders.", orders.clone()).await;
        bridge.subscribe("", all.clone()).await;

        let delivered = bridge
            .publish("orders.created", &json!({"id": 1}))
            .await
            .unwrap();
        assert_eq!(delivered, 2);

        let delivered = bridge.publish("billing.paid", &json!({})).await.unwrap();
        assert_eq!(delivered, 1);
        assert_eq!(orders.calls.load(Ordering::SeqCst), 1);
        assert_eq!(all.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn first_match_stops_after_one() {
        let store: Arc<dyn RuntimeStore> = Arc::new(InMemoryStore::new());
        let bridge = EventBridge::new(store, FanoutStrategy::FirstMatch);
        let first = counter(0);
        let second = counter(0);
        bridge.subscribe("orders.", first.clone()).await;
        bridge.subscribe("orders.", second.clone()).await;

        let delivered = bridge.publish("orders.created", &json!({})).await.unwrap();
        assert_eq!(delivered, 1);
        assert_eq!(second.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn failing_subscriber_retried_then_succeeds() {
        let bridge = bridge();
        let flaky = counter(2); // fails twice, succeeds on third try
        bridge.subscribe("", flaky.clone()).await;

        let delivered = bridge.publish("topic", &json!({})).await.unwrap();
        assert_eq!(delivered, 1);
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausted_retries_do_not_block_others() {
        let bridge = bridge();
        let broken = counter(usize::MAX);
        let healthy = counter(0);
        bridge.subscribe("", broken).await;
        bridge.subscribe("", healthy.clone()).await;

        let delivered = bridge.publish("topic", &json!({})).await.unwrap();
        assert_eq!(delivered, 1);
        assert_eq!(healthy.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn paused_bus_rejects_publish() {
        let store = Arc::new(InMemoryStore::new());
        store
            .set_activity(&ActivityRecord {
                domain: Domain::Event,
                key: Key::new("bus"),
                state: ActivityState::Paused,
                since: Utc::now(),
                reason: None,
            })
            .await
            .unwrap();

        let bridge = EventBridge::new(store, FanoutStrategy::All);
        let err = bridge.publish("topic", &json!({})).await.unwrap_err();
        assert!(matches!(err, BridgeError::Paused { .. }));
    }

    #[tokio::test]
    async fn unsubscribe_removes_handler() {
        let bridge = bridge();
        let c = counter(0);
        let id = bridge.subscribe("", c.clone()).await;
        assert!(bridge.unsubscribe(id).await);
        assert!(!bridge.unsubscribe(id).await);

        let delivered = bridge.publish("topic", &json!({})).await.unwrap();
        assert_eq!(delivered, 0);
        assert_eq!(c.calls.load(Ordering::SeqCst), 0);
    }
}
