use oneiric_domain::{Domain, Key, LifecycleState};
use oneiric_resolver::ResolveError;
use oneiric_security::SecurityError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// What happened to the previous instance after a failed swap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackReport {
    /// Whether the prior ready instance was restored.
    pub restored: bool,
    /// Provider that is active after the rollback, if any.
    pub active_provider: Option<String>,
}

impl std::fmt::Display for RollbackReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.restored, &self.active_provider) {
            (true, Some(p)) => write!(f, "restored previous provider {p}"),
            (true, None) => write!(f, "restored previous instance"),
            (false, _) => write!(f, "nothing to restore"),
        }
    }
}

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Security(#[from] SecurityError),

    #[error("no constructor registered for factory {0:?}")]
    FactoryMissing(String),

    #[error("activation of {provider} failed: {reason}")]
    ActivationFailed { provider: String, reason: String },

    #[error("health check for {provider} timed out")]
    HealthTimeout { provider: String },

    #[error("swap to {provider} failed ({rollback}): {cause}")]
    SwapFailed {
        provider: String,
        rollback: RollbackReport,
        #[source]
        cause: Box<LifecycleError>,
    },

    #[error("{domain}/{key} is already active")]
    AlreadyActive { domain: Domain, key: Key },

    #[error("{domain}/{key} is {state}, operation requires a different state")]
    NotReady {
        domain: Domain,
        key: Key,
        state: LifecycleState,
    },

    #[error("{domain}/{key} is paused")]
    Paused { domain: Domain, key: Key },

    #[error("{domain}/{key} is draining")]
    Draining { domain: Domain, key: Key },

    #[error("operation cancelled")]
    Cancelled,

    #[error("{what} timed out")]
    Timeout { what: &'static str },
}

impl LifecycleError {
    pub fn kind(&self) -> &'static str {
        match self {
            LifecycleError::Resolve(e) => e.kind(),
            LifecycleError::Security(e) => e.kind(),
            LifecycleError::FactoryMissing(_) => "factory_denied",
            LifecycleError::ActivationFailed { .. } => "activation_failed",
            LifecycleError::HealthTimeout { .. } => "health_timeout",
            LifecycleError::SwapFailed { .. } => "swap_failed",
            LifecycleError::AlreadyActive { .. } => "already_active",
            LifecycleError::NotReady { .. } => "not_ready",
            LifecycleError::Paused { .. } => "paused",
            LifecycleError::Draining { .. } => "draining",
            LifecycleError::Cancelled => "cancelled",
            LifecycleError::Timeout { .. } => "timeout",
        }
    }
}
