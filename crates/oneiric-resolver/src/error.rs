use oneiric_domain::{Domain, Key};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("no candidate registered for {domain}/{key}")]
    NoCandidate { domain: Domain, key: Key },

    #[error("override names unknown provider {provider:?} for {domain}/{key}")]
    OverrideUnsatisfied {
        domain: Domain,
        key: Key,
        provider: String,
    },
}

impl ResolveError {
    pub fn kind(&self) -> &'static str {
        match self {
            ResolveError::NoCandidate { .. } => "no_candidate",
            ResolveError::OverrideUnsatisfied { .. } => "override_unsatisfied",
        }
    }
}
