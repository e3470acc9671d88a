use std::sync::Arc;

use oneiric_domain::{Domain, Key};
use oneiric_lifecycle::{CancelToken, LifecycleManager};
use oneiric_store::RuntimeStore;
use serde_json::Value;

use crate::activity::check_activity;
use crate::error::BridgeError;

/// Action facade: one-shot calls against stateless helper kits.
#[derive(Clone)]
pub struct ActionBridge {
    lifecycle: Arc<LifecycleManager>,
    store: Arc<dyn RuntimeStore>,
    cancel: CancelToken,
}

impl ActionBridge {
    pub fn new(
        lifecycle: Arc<LifecycleManager>,
        store: Arc<dyn RuntimeStore>,
        cancel: CancelToken,
    ) -> Self {
        Self { lifecycle, store, cancel }
    }

    /// Invoke `op` on the kit's resolved provider. The kit is activated
    /// lazily and stays resident for subsequent calls.
    pub async fn invoke(&self, kit: &Key, op: &str, args: Value) -> Result<Value, BridgeError> {
        check_activity(&self.store, Domain::Action, kit).await?;
        let instance = self
            .lifecycle
            .ensure_ready(Domain::Action, kit, &self.cancel)
            .await?;
        instance
            .invoke(op, args)
            .await
            .map_err(|e| BridgeError::InvokeFailed {
                key: kit.clone(),
                op: op.to_string(),
                reason: e.to_string(),
            })
    }
}
