use std::sync::Arc;

use oneiric_domain::{Domain, Key};
use oneiric_lifecycle::{CancelToken, LifecycleManager};
use oneiric_store::RuntimeStore;
use tracing::info;

use crate::activity::check_activity;
use crate::error::BridgeError;

/// Service facade: explicit start/stop verbs over activate/cleanup.
#[derive(Clone)]
pub struct ServiceBridge {
    lifecycle: Arc<LifecycleManager>,
    store: Arc<dyn RuntimeStore>,
    cancel: CancelToken,
}

impl ServiceBridge {
    pub fn new(
        lifecycle: Arc<LifecycleManager>,
        store: Arc<dyn RuntimeStore>,
        cancel: CancelToken,
    ) -> Self {
        Self { lifecycle, store, cancel }
    }

    /// Bring a service to `ready`. Idempotent: starting a running service
    /// is a no-op.
    pub async fn start(&self, key: &Key) -> Result<(), BridgeError> {
        check_activity(&self.store, Domain::Service, key).await?;
        self.lifecycle
            .ensure_ready(Domain::Service, key, &self.cancel)
            .await?;
        info!(key = %key, "service started");
        Ok(())
    }

    /// Stop a service and release its instance. Cleanup is shielded.
    pub async fn stop(&self, key: &Key) -> Result<(), BridgeError> {
        self.lifecycle.cleanup(Domain::Service, key).await?;
        info!(key = %key, "service stopped");
        Ok(())
    }
}
