use oneiric_domain::{Domain, Key};
use oneiric_lifecycle::LifecycleError;
use oneiric_store::StoreError;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("{domain}/{key} is paused: new work rejected")]
    Paused { domain: Domain, key: Key },

    #[error("{domain}/{key} is draining: new work rejected")]
    Draining { domain: Domain, key: Key },

    #[error("workflow {workflow} contains a cycle")]
    WorkflowCycle { workflow: Key },

    #[error("workflow {workflow}: node {node:?} depends on unknown node")]
    UnknownNode { workflow: Key, node: String },

    #[error("workflow {workflow} has no dag definition in its settings")]
    MissingDag { workflow: Key },

    #[error("unknown workflow run {0}")]
    UnknownRun(Uuid),

    #[error("workflow node {node:?} failed: {reason}")]
    NodeFailed { node: String, reason: String },

    #[error("action {key}:{op} failed: {reason}")]
    InvokeFailed { key: Key, op: String, reason: String },
}

impl BridgeError {
    pub fn kind(&self) -> &'static str {
        match self {
            BridgeError::Lifecycle(e) => e.kind(),
            BridgeError::Store(_) => "internal",
            BridgeError::Paused { .. } => "paused",
            BridgeError::Draining { .. } => "draining",
            BridgeError::WorkflowCycle { .. } => "workflow_cycle",
            BridgeError::UnknownNode { .. } => "workflow_invalid",
            BridgeError::MissingDag { .. } => "workflow_invalid",
            BridgeError::UnknownRun(_) => "unknown_run",
            BridgeError::NodeFailed { .. } => "node_failed",
            BridgeError::InvokeFailed { .. } => "invoke_failed",
        }
    }
}
