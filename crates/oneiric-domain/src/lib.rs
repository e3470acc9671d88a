mod error;
mod types;

pub use error::DomainError;
pub use types::{
    ActivityRecord, ActivityState, Candidate, CandidateIdentity, Domain, Key, LifecycleState,
    ResolutionResult, ResolutionTrace, Source, TraceDecision, TraceEntry,
};
