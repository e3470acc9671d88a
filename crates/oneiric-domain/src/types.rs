use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::DomainError;

// ── Identifiers ──────────────────────────────────────────────────────────────

/// Logical slot within a domain, e.g. `cache` or `payment_service`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Key(pub String);

impl Key {
    pub fn new(s: impl Into<String>) -> Self {
        Key(s.into())
    }

    /// Parse a key, enforcing the non-empty-ASCII rule used for anything
    /// that arrives from outside the process (config files, manifests).
    pub fn parse(s: &str) -> Result<Self, DomainError> {
        if s.is_empty() || !s.is_ascii() || s.chars().any(|c| c.is_control()) {
            return Err(DomainError::InvalidKey(s.to_string()));
        }
        Ok(Key(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── Enums ─────────────────────────────────────────────────────────────────────

/// Category of pluggable component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Domain {
    Adapter,
    Service,
    Task,
    Event,
    Workflow,
    Action,
}

impl Domain {
    pub const ALL: [Domain; 6] = [
        Domain::Adapter,
        Domain::Service,
        Domain::Task,
        Domain::Event,
        Domain::Workflow,
        Domain::Action,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::Adapter => "adapter",
            Domain::Service => "service",
            Domain::Task => "task",
            Domain::Event => "event",
            Domain::Workflow => "workflow",
            Domain::Action => "action",
        }
    }
}

impl std::fmt::Display for Domain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Domain {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "adapter" => Ok(Domain::Adapter),
            "service" => Ok(Domain::Service),
            "task" => Ok(Domain::Task),
            "event" => Ok(Domain::Event),
            "workflow" => Ok(Domain::Workflow),
            "action" => Ok(Domain::Action),
            other => Err(DomainError::UnknownDomain(other.to_string())),
        }
    }
}

/// Where a candidate registration came from. The variant order is the
/// precedence order: inline beats local config beats remote beats
/// entry-point discovery, regardless of priority or stack level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    Inline,
    LocalConfig,
    RemoteManifest,
    EntryPoint,
}

impl Source {
    /// Precedence tier; lower wins.
    pub fn tier(&self) -> u8 {
        match self {
            Source::Inline => 0,
            Source::LocalConfig => 1,
            Source::RemoteManifest => 2,
            Source::EntryPoint => 3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Inline => "inline",
            Source::LocalConfig => "local_config",
            Source::RemoteManifest => "remote_manifest",
            Source::EntryPoint => "entry_point",
        }
    }
}

impl std::fmt::Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ── Candidate ─────────────────────────────────────────────────────────────────

/// One registered way to satisfy a `(domain, key)` slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub domain: Domain,
    pub key: Key,
    /// Implementation variant name, e.g. `redis` or `memory`.
    pub provider: String,
    /// Constructor reference in canonical `module.path:symbol` form. Must
    /// pass the factory allowlist before any activation.
    pub factory: String,
    #[serde(default)]
    pub priority: i64,
    /// Environment-layer tag; breaks ties within a precedence tier before
    /// priority does.
    #[serde(default)]
    pub stack_level: i64,
    pub source: Source,
    /// Opaque configuration blob handed to the factory verbatim.
    #[serde(default)]
    pub settings: Value,
    #[serde(default)]
    pub capabilities: BTreeSet<String>,
    /// Free-form registration metadata (origin URL, digest, signature info).
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
}

impl Candidate {
    /// The registry identity tuple. Re-registering the same identity updates
    /// the candidate in place.
    pub fn identity(&self) -> CandidateIdentity {
        CandidateIdentity {
            domain: self.domain,
            key: self.key.clone(),
            provider: self.provider.clone(),
            source: self.source,
        }
    }
}

/// Uniqueness tuple for registrations: `(domain, key, provider, source)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CandidateIdentity {
    pub domain: Domain,
    pub key: Key,
    pub provider: String,
    pub source: Source,
}

impl std::fmt::Display for CandidateIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{}@{} ({})",
            self.domain, self.key, self.provider, self.source
        )
    }
}

// ── Resolution ────────────────────────────────────────────────────────────────

/// Outcome of resolving a `(domain, key)` slot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolutionResult {
    pub winner: Candidate,
    /// Candidates considered but not chosen, in precedence order.
    pub shadowed: Vec<Candidate>,
    pub trace: ResolutionTrace,
}

/// Ordered record of every candidate considered for a slot. `explain`
/// returns this even when resolution would fail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolutionTrace {
    pub domain: Domain,
    pub key: Key,
    /// Provider forced by the caller, if any.
    pub override_provider: Option<String>,
    /// Whether the requested override named a registered provider.
    /// `None` when no override was requested.
    pub override_satisfied: Option<bool>,
    pub considered: Vec<TraceEntry>,
}

impl ResolutionTrace {
    pub fn empty(domain: Domain, key: Key) -> Self {
        Self {
            domain,
            key,
            override_provider: None,
            override_satisfied: None,
            considered: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceEntry {
    pub provider: String,
    pub source: Source,
    pub stack_level: i64,
    pub priority: i64,
    pub decision: TraceDecision,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceDecision {
    Selected,
    Shadowed,
}

// ── Lifecycle state ───────────────────────────────────────────────────────────

/// Live state of a `(domain, key)` slot in the lifecycle manager.
///
/// Transitions:
///   Idle → Activating → Ready | Failed
///   Ready → Activating (swap, snapshot kept) → Ready | rollback
///   Ready ↔ Paused
///   Ready → Draining → Cleaning → Idle
///   any → Cleaning → Idle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    #[default]
    Idle,
    Activating,
    Ready,
    Failed,
    Draining,
    Paused,
    Cleaning,
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LifecycleState::Idle => "idle",
            LifecycleState::Activating => "activating",
            LifecycleState::Ready => "ready",
            LifecycleState::Failed => "failed",
            LifecycleState::Draining => "draining",
            LifecycleState::Paused => "paused",
            LifecycleState::Cleaning => "cleaning",
        };
        write!(f, "{}", s)
    }
}

// ── Activity ──────────────────────────────────────────────────────────────────

/// Whether a slot accepts new work. Persisted across restarts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ActivityState {
    #[default]
    Accepting,
    Paused,
    Draining,
}

impl std::fmt::Display for ActivityState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ActivityState::Accepting => "accepting",
            ActivityState::Paused => "paused",
            ActivityState::Draining => "draining",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityRecord {
    pub domain: Domain,
    pub key: Key,
    pub state: ActivityState,
    pub since: DateTime<Utc>,
    pub reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_tiers_order_inline_first() {
        assert!(Source::Inline.tier() < Source::LocalConfig.tier());
        assert!(Source::LocalConfig.tier() < Source::RemoteManifest.tier());
        assert!(Source::RemoteManifest.tier() < Source::EntryPoint.tier());
    }

    #[test]
    fn domain_round_trips_via_str() {
        for d in Domain::ALL {
            assert_eq!(d.as_str().parse::<Domain>().unwrap(), d);
        }
    }

    #[test]
    fn key_parse_rejects_empty_and_non_ascii() {
        assert!(Key::parse("").is_err());
        assert!(Key::parse("café").is_err());
        assert!(Key::parse("cache\u{7}").is_err());
        assert!(Key::parse("cache").is_ok());
    }

    #[test]
    fn candidate_serde_defaults() {
        // Registrations from sparse YAML/JSON omit most fields.
        let c: Candidate = serde_json::from_str(
            r#"{"domain":"adapter","key":"cache","provider":"memory",
                "factory":"oneiric.adapters.memory:build","source":"inline"}"#,
        )
        .unwrap();
        assert_eq!(c.priority, 0);
        assert_eq!(c.stack_level, 0);
        assert!(c.settings.is_null());
        assert!(c.capabilities.is_empty());
    }
}
