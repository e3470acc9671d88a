use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::RwLock;

use oneiric_domain::{
    Candidate, Domain, Key, ResolutionResult, ResolutionTrace, Source, TraceDecision, TraceEntry,
};
use tracing::debug;

use crate::error::ResolveError;

/// The authoritative mapping from `(domain, key)` to a ranked candidate
/// list.
///
/// Candidate lists are kept sorted on write, so every read sees the same
/// deterministic order: source tier first (inline beats local config beats
/// remote beats entry-point), then stack level descending, then priority
/// descending, then provider name ascending.
///
/// All methods are synchronous; the write lock is never held across a
/// suspension point.
#[derive(Debug, Default)]
pub struct Resolver {
    slots: RwLock<HashMap<(Domain, Key), Vec<Candidate>>>,
}

impl Resolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Upsert by identity tuple `(domain, key, provider, source)`.
    /// Re-registration with the same identity replaces settings, priority
    /// and metadata in place.
    pub fn register(&self, candidate: Candidate) {
        let slot = (candidate.domain, candidate.key.clone());
        let mut slots = self.slots.write().expect("resolver lock poisoned");
        let list = slots.entry(slot).or_default();
        let identity = candidate.identity();
        match list.iter_mut().find(|c| c.identity() == identity) {
            Some(existing) => {
                debug!(candidate = %identity, "re-registering candidate");
                *existing = candidate;
            }
            None => {
                debug!(candidate = %identity, "registering candidate");
                list.push(candidate);
            }
        }
        sort_slot(list);
    }

    /// Remove one registration. Returns whether anything was removed.
    pub fn unregister(&self, domain: Domain, key: &Key, provider: &str, source: Source) -> bool {
        let mut slots = self.slots.write().expect("resolver lock poisoned");
        let Some(list) = slots.get_mut(&(domain, key.clone())) else {
            return false;
        };
        let before = list.len();
        list.retain(|c| !(c.provider == provider && c.source == source));
        let removed = list.len() < before;
        if list.is_empty() {
            slots.remove(&(domain, key.clone()));
        }
        removed
    }

    /// Resolve the winner for a slot, applying the four-tier precedence and
    /// deterministic tie-breaks.
    ///
    /// When `override_provider` is set, that provider wins if it is
    /// registered for the slot; otherwise the call fails with
    /// `OverrideUnsatisfied` and the caller decides whether to fall back.
    pub fn resolve(
        &self,
        domain: Domain,
        key: &Key,
        override_provider: Option<&str>,
    ) -> Result<ResolutionResult, ResolveError> {
        let slots = self.slots.read().expect("resolver lock poisoned");
        let list = slots
            .get(&(domain, key.clone()))
            .filter(|l| !l.is_empty())
            .ok_or_else(|| ResolveError::NoCandidate {
                domain,
                key: key.clone(),
            })?;

        let winner_idx = match override_provider {
            Some(provider) => list
                .iter()
                .position(|c| c.provider == provider)
                .ok_or_else(|| ResolveError::OverrideUnsatisfied {
                    domain,
                    key: key.clone(),
                    provider: provider.to_string(),
                })?,
            None => 0,
        };

        let mut trace = ResolutionTrace::empty(domain, key.clone());
        trace.override_provider = override_provider.map(String::from);
        trace.override_satisfied = override_provider.map(|_| true);
        for (idx, c) in list.iter().enumerate() {
            trace.considered.push(TraceEntry {
                provider: c.provider.clone(),
                source: c.source,
                stack_level: c.stack_level,
                priority: c.priority,
                decision: if idx == winner_idx {
                    TraceDecision::Selected
                } else {
                    TraceDecision::Shadowed
                },
            });
        }

        let shadowed = list
            .iter()
            .enumerate()
            .filter(|(idx, _)| *idx != winner_idx)
            .map(|(_, c)| c.clone())
            .collect();

        Ok(ResolutionResult {
            winner: list[winner_idx].clone(),
            shadowed,
            trace,
        })
    }

    /// Full ordered view of a slot, including shadowed entries. Never
    /// fails; an unknown slot yields an empty trace.
    pub fn explain(&self, domain: Domain, key: &Key) -> ResolutionTrace {
        let slots = self.slots.read().expect("resolver lock poisoned");
        let mut trace = ResolutionTrace::empty(domain, key.clone());
        if let Some(list) = slots.get(&(domain, key.clone())) {
            for (idx, c) in list.iter().enumerate() {
                trace.considered.push(TraceEntry {
                    provider: c.provider.clone(),
                    source: c.source,
                    stack_level: c.stack_level,
                    priority: c.priority,
                    decision: if idx == 0 {
                        TraceDecision::Selected
                    } else {
                        TraceDecision::Shadowed
                    },
                });
            }
        }
        trace
    }

    /// Snapshot resolution of every known slot, optionally filtered by
    /// domain. Slots are returned in `(domain, key)` order.
    pub fn list(&self, domain: Option<Domain>) -> Vec<ResolutionResult> {
        let slots = self.slots.read().expect("resolver lock poisoned");
        let mut keys: Vec<(Domain, Key)> = slots
            .keys()
            .filter(|(d, _)| domain.map_or(true, |want| *d == want))
            .cloned()
            .collect();
        keys.sort();
        drop(slots);

        keys.into_iter()
            .filter_map(|(d, k)| self.resolve(d, &k, None).ok())
            .collect()
    }

    /// All candidates for one slot, in precedence order.
    pub fn candidates(&self, domain: Domain, key: &Key) -> Vec<Candidate> {
        let slots = self.slots.read().expect("resolver lock poisoned");
        slots
            .get(&(domain, key.clone()))
            .cloned()
            .unwrap_or_default()
    }

    /// Every candidate registered from `source`, across all slots. Used by
    /// the remote loader to diff a manifest against the live registry.
    pub fn candidates_by_source(&self, source: Source) -> Vec<Candidate> {
        let slots = self.slots.read().expect("resolver lock poisoned");
        slots
            .values()
            .flatten()
            .filter(|c| c.source == source)
            .cloned()
            .collect()
    }
}

fn sort_slot(list: &mut [Candidate]) {
    list.sort_by(candidate_order);
}

/// Total order over candidates within a slot.
fn candidate_order(a: &Candidate, b: &Candidate) -> Ordering {
    a.source
        .tier()
        .cmp(&b.source.tier())
        .then(b.stack_level.cmp(&a.stack_level))
        .then(b.priority.cmp(&a.priority))
        .then(a.provider.cmp(&b.provider))
}
