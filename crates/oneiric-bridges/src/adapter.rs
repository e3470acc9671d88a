use std::sync::Arc;

use oneiric_domain::{Domain, Key};
use oneiric_lifecycle::{CancelToken, LifecycleManager, ProviderInstance};
use oneiric_store::RuntimeStore;

use crate::activity::check_activity;
use crate::error::BridgeError;

/// Adapter facade: hand out ready instances, activating lazily on first
/// use.
#[derive(Clone)]
pub struct AdapterBridge {
    lifecycle: Arc<LifecycleManager>,
    store: Arc<dyn RuntimeStore>,
    cancel: CancelToken,
}

impl AdapterBridge {
    pub fn new(
        lifecycle: Arc<LifecycleManager>,
        store: Arc<dyn RuntimeStore>,
        cancel: CancelToken,
    ) -> Self {
        Self { lifecycle, store, cancel }
    }

    /// The ready instance for an adapter key. Activates lazily when the
    /// slot is idle; rejects when the slot is paused or draining.
    pub async fn use_adapter(&self, key: &Key) -> Result<Arc<dyn ProviderInstance>, BridgeError> {
        check_activity(&self.store, Domain::Adapter, key).await?;
        Ok(self
            .lifecycle
            .ensure_ready(Domain::Adapter, key, &self.cancel)
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use oneiric_domain::{ActivityRecord, ActivityState, Candidate, Source};
    use oneiric_lifecycle::{FactoryRegistry, LifecycleConfig};
    use oneiric_resolver::Resolver;
    use oneiric_security::FactoryAllowlist;
    use oneiric_store::InMemoryStore;

    struct Memory;

    #[async_trait::async_trait]
    impl ProviderInstance for Memory {}

    fn fixture() -> (AdapterBridge, Arc<InMemoryStore>) {
        let resolver = Arc::new(Resolver::new());
        let factories = Arc::new(FactoryRegistry::new());
        factories.register("oneiric.adapters.memory:build", |_| async {
            Ok(Arc::new(Memory) as Arc<dyn ProviderInstance>)
        });
        resolver.register(Candidate {
            domain: Domain::Adapter,
            key: Key::new("cache"),
            provider: "memory".to_string(),
            factory: "oneiric.adapters.memory:build".to_string(),
            priority: 0,
            stack_level: 0,
            source: Source::Inline,
            settings: serde_json::Value::Null,
            capabilities: Default::default(),
            metadata: Default::default(),
        });

        let store = Arc::new(InMemoryStore::new());
        let lifecycle = Arc::new(LifecycleManager::new(
            resolver,
            factories,
            Arc::new(FactoryAllowlist::builtin()),
            LifecycleConfig::default(),
        ));
        let bridge = AdapterBridge::new(
            lifecycle,
            store.clone() as Arc<dyn RuntimeStore>,
            CancelToken::new(),
        );
        (bridge, store)
    }

    #[tokio::test]
    async fn first_use_activates_lazily_then_reuses() {
        let (bridge, _) = fixture();
        let first = bridge.use_adapter(&Key::new("cache")).await.unwrap();
        let second = bridge.use_adapter(&Key::new("cache")).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn paused_adapter_rejected() {
        let (bridge, store) = fixture();
        store
            .set_activity(&ActivityRecord {
                domain: Domain::Adapter,
                key: Key::new("cache"),
                state: ActivityState::Paused,
                since: Utc::now(),
                reason: Some("maintenance".to_string()),
            })
            .await
            .unwrap();

        let err = bridge.use_adapter(&Key::new("cache")).await.err().unwrap();
        assert!(matches!(err, BridgeError::Paused { .. }));
    }
}
