use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result of an instance health probe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Health {
    pub ok: bool,
    pub detail: String,
}

impl Health {
    pub fn passing() -> Self {
        Self { ok: true, detail: String::new() }
    }

    pub fn failing(detail: impl Into<String>) -> Self {
        Self { ok: false, detail: detail.into() }
    }
}

/// A live provider produced by a factory and owned by the lifecycle
/// manager. Bridges borrow references; they never shut instances down
/// themselves.
#[async_trait]
pub trait ProviderInstance: Send + Sync + 'static {
    /// Pre-init hook, run after construction and before the activation
    /// health check. A failure here aborts the activation.
    async fn setup(&self) -> Result<(), BoxError> {
        Ok(())
    }

    async fn health(&self) -> Health {
        Health::passing()
    }

    /// One-shot operation surface used by the action and task bridges.
    /// Providers that are not invocable keep the default.
    async fn invoke(&self, op: &str, _args: Value) -> Result<Value, BoxError> {
        Err(format!("operation {op:?} not supported").into())
    }

    /// Release resources. Called exactly once, shielded from
    /// cancellation.
    async fn shutdown(&self) -> Result<(), BoxError> {
        Ok(())
    }
}
