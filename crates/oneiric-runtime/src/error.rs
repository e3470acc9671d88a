use oneiric_bridges::BridgeError;
use oneiric_config::ConfigError;
use oneiric_domain::{ActivityState, Domain, Key};
use oneiric_lifecycle::LifecycleError;
use oneiric_remote::RemoteError;
use oneiric_resolver::ResolveError;
use oneiric_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error(transparent)]
    Bridge(#[from] BridgeError),

    #[error("{domain}/{key} is {state}: operation rejected")]
    ActivityBlocked {
        domain: Domain,
        key: Key,
        state: ActivityState,
    },

    #[error("remote sync is disabled")]
    RemoteDisabled,

    #[error("i/o error: {0}")]
    Io(String),
}

impl RuntimeError {
    pub fn kind(&self) -> &'static str {
        match self {
            RuntimeError::Config(_) => "config_invalid",
            RuntimeError::Store(_) => "internal",
            RuntimeError::Resolve(e) => e.kind(),
            RuntimeError::Lifecycle(e) => e.kind(),
            RuntimeError::Remote(e) => e.kind(),
            RuntimeError::Bridge(e) => e.kind(),
            RuntimeError::ActivityBlocked { state, .. } => match state {
                ActivityState::Paused => "paused",
                ActivityState::Draining => "draining",
                ActivityState::Accepting => "internal",
            },
            RuntimeError::RemoteDisabled => "remote_disabled",
            RuntimeError::Io(_) => "internal",
        }
    }
}
