use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use oneiric_domain::{Candidate, Domain, Key, LifecycleState};
use oneiric_resolver::Resolver;
use oneiric_security::FactoryAllowlist;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{info, warn};

use crate::cancel::CancelToken;
use crate::error::{LifecycleError, RollbackReport};
use crate::factory::FactoryRegistry;
use crate::instance::{Health, ProviderInstance};

// ── Configuration ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    /// Budget for one health probe.
    pub health_timeout: Duration,
    /// Overall budget for a factory construction.
    pub activation_timeout: Duration,
    /// Window a swapped-in instance has to pass health before rollback.
    pub warmup: Duration,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            health_timeout: Duration::from_secs(5),
            activation_timeout: Duration::from_secs(30),
            warmup: Duration::from_secs(10),
        }
    }
}

// ── Records ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthRecord {
    pub ok: bool,
    pub detail: String,
    pub at: DateTime<Utc>,
}

impl HealthRecord {
    fn now(health: &Health) -> Self {
        Self {
            ok: health.ok,
            detail: health.detail.clone(),
            at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwapRecord {
    pub at: DateTime<Utc>,
    pub outgoing: Option<String>,
    pub incoming: String,
}

/// Serializable snapshot of one slot's live state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryStatus {
    pub domain: Domain,
    pub key: Key,
    pub state: LifecycleState,
    pub provider: Option<String>,
    pub last_health: Option<HealthRecord>,
    pub last_swap: Option<SwapRecord>,
    pub last_error: Option<String>,
}

// ── Entry ─────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct Entry {
    state: LifecycleState,
    active: Option<Candidate>,
    instance: Option<Arc<dyn ProviderInstance>>,
    last_health: Option<HealthRecord>,
    last_swap: Option<SwapRecord>,
    last_error: Option<String>,
}

impl Entry {
    fn status(&self, domain: Domain, key: &Key) -> EntryStatus {
        EntryStatus {
            domain,
            key: key.clone(),
            state: self.state,
            provider: self.active.as_ref().map(|c| c.provider.clone()),
            last_health: self.last_health.clone(),
            last_swap: self.last_swap.clone(),
            last_error: self.last_error.clone(),
        }
    }
}

// ── Manager ───────────────────────────────────────────────────────────────────

/// Owns live instances and drives the per-slot state machine.
///
/// Each `(domain, key)` slot is guarded by its own fair async mutex, so
/// lifecycle operations for one slot run strictly one at a time in FIFO
/// order while different slots proceed in parallel. The `cleaning` and
/// `activating` states can therefore never overlap for a slot: both only
/// occur while the slot lock is held.
pub struct LifecycleManager {
    resolver: Arc<Resolver>,
    factories: Arc<FactoryRegistry>,
    allowlist: Arc<FactoryAllowlist>,
    config: LifecycleConfig,
    entries: StdMutex<HashMap<(Domain, Key), Arc<Mutex<Entry>>>>,
}

impl LifecycleManager {
    pub fn new(
        resolver: Arc<Resolver>,
        factories: Arc<FactoryRegistry>,
        allowlist: Arc<FactoryAllowlist>,
        config: LifecycleConfig,
    ) -> Self {
        Self {
            resolver,
            factories,
            allowlist,
            config,
            entries: StdMutex::new(HashMap::new()),
        }
    }

    pub fn resolver(&self) -> &Arc<Resolver> {
        &self.resolver
    }

    fn entry(&self, domain: Domain, key: &Key) -> Arc<Mutex<Entry>> {
        let mut entries = self.entries.lock().expect("entry map lock poisoned");
        entries
            .entry((domain, key.clone()))
            .or_default()
            .clone()
    }

    fn peek(&self, domain: Domain, key: &Key) -> Option<Arc<Mutex<Entry>>> {
        let entries = self.entries.lock().expect("entry map lock poisoned");
        entries.get(&(domain, key.clone())).cloned()
    }

    // ── Activation ────────────────────────────────────────────────────────────

    /// Resolve the winner for a slot, construct it and bring it to
    /// `ready`. Fails with `AlreadyActive` when the slot is already ready;
    /// use [`ensure_ready`](Self::ensure_ready) for lazy activation.
    pub async fn activate(
        &self,
        domain: Domain,
        key: &Key,
        override_provider: Option<&str>,
        cancel: &CancelToken,
    ) -> Result<Arc<dyn ProviderInstance>, LifecycleError> {
        let cell = self.entry(domain, key);
        let mut entry = cell.lock().await;
        match entry.state {
            LifecycleState::Ready => Err(LifecycleError::AlreadyActive {
                domain,
                key: key.clone(),
            }),
            LifecycleState::Paused => Err(LifecycleError::Paused { domain, key: key.clone() }),
            LifecycleState::Draining => Err(LifecycleError::Draining { domain, key: key.clone() }),
            _ => {
                self.activate_locked(domain, key, override_provider, cancel, &mut entry)
                    .await
            }
        }
    }

    /// Return the ready instance for a slot, activating it lazily when
    /// idle. Paused and draining slots reject.
    pub async fn ensure_ready(
        &self,
        domain: Domain,
        key: &Key,
        cancel: &CancelToken,
    ) -> Result<Arc<dyn ProviderInstance>, LifecycleError> {
        let cell = self.entry(domain, key);
        let mut entry = cell.lock().await;
        match entry.state {
            LifecycleState::Ready => entry.instance.clone().ok_or_else(|| {
                LifecycleError::ActivationFailed {
                    provider: entry
                        .active
                        .as_ref()
                        .map(|c| c.provider.clone())
                        .unwrap_or_default(),
                    reason: "ready entry lost its instance".to_string(),
                }
            }),
            LifecycleState::Paused => Err(LifecycleError::Paused { domain, key: key.clone() }),
            LifecycleState::Draining => Err(LifecycleError::Draining { domain, key: key.clone() }),
            _ => {
                self.activate_locked(domain, key, None, cancel, &mut entry)
                    .await
            }
        }
    }

    async fn activate_locked(
        &self,
        domain: Domain,
        key: &Key,
        override_provider: Option<&str>,
        cancel: &CancelToken,
        entry: &mut Entry,
    ) -> Result<Arc<dyn ProviderInstance>, LifecycleError> {
        let prior_state = entry.state;
        entry.state = LifecycleState::Activating;

        let built = self
            .build_instance(domain, key, override_provider, cancel, self.config.health_timeout)
            .await;

        match built {
            Ok((candidate, instance, health)) => {
                info!(domain = %domain, key = %key, provider = %candidate.provider, "activated");
                entry.state = LifecycleState::Ready;
                entry.active = Some(candidate);
                entry.instance = Some(instance.clone());
                entry.last_health = Some(HealthRecord::now(&health));
                entry.last_error = None;
                Ok(instance)
            }
            Err(LifecycleError::Cancelled) => {
                // Cancelled before anything became visible; keep the slot as
                // it was.
                entry.state = prior_state;
                Err(LifecycleError::Cancelled)
            }
            Err(e) => {
                warn!(domain = %domain, key = %key, error = %e, "activation failed");
                entry.state = LifecycleState::Failed;
                entry.last_error = Some(e.to_string());
                Err(e)
            }
        }
    }

    /// Resolve, allowlist-check, construct, run the pre-init hook and the
    /// activation health probe. On any failure after construction the
    /// instance is shut down before the error is returned, so no partially
    /// constructed instance is ever retained.
    async fn build_instance(
        &self,
        domain: Domain,
        key: &Key,
        override_provider: Option<&str>,
        cancel: &CancelToken,
        health_window: Duration,
    ) -> Result<(Candidate, Arc<dyn ProviderInstance>, Health), LifecycleError> {
        if cancel.is_cancelled() {
            return Err(LifecycleError::Cancelled);
        }

        let resolution = self.resolver.resolve(domain, key, override_provider)?;
        let candidate = resolution.winner;
        self.allowlist.check(&candidate.factory)?;
        let build = self
            .factories
            .lookup(&candidate.factory)
            .ok_or_else(|| LifecycleError::FactoryMissing(candidate.factory.clone()))?;

        let provider = candidate.provider.clone();
        let construct = build(candidate.settings.clone());
        let instance = tokio::select! {
            _ = cancel.cancelled() => return Err(LifecycleError::Cancelled),
            result = timeout(self.config.activation_timeout, construct) => match result {
                Err(_) => return Err(LifecycleError::Timeout { what: "activation" }),
                Ok(Err(e)) => {
                    return Err(LifecycleError::ActivationFailed {
                        provider,
                        reason: e.to_string(),
                    })
                }
                Ok(Ok(instance)) => instance,
            },
        };

        if let Err(e) = instance.setup().await {
            shielded_shutdown(&instance).await;
            return Err(LifecycleError::ActivationFailed {
                provider,
                reason: format!("pre-init hook failed: {e}"),
            });
        }

        // Health window composes with the overall budget by taking the
        // smaller of the two at this boundary.
        let window = health_window.min(self.config.activation_timeout);
        let health = match timeout(window, instance.health()).await {
            Err(_) => {
                shielded_shutdown(&instance).await;
                return Err(LifecycleError::HealthTimeout { provider });
            }
            Ok(h) => h,
        };
        if !health.ok {
            shielded_shutdown(&instance).await;
            return Err(LifecycleError::ActivationFailed {
                provider,
                reason: format!("health check failed: {}", health.detail),
            });
        }

        Ok((candidate, instance, health))
    }

    // ── Swap ──────────────────────────────────────────────────────────────────

    /// Replace the active instance with a (possibly different) provider.
    ///
    /// The previous instance is kept as a rollback snapshot until the new
    /// one passes health inside the warmup window; on failure the snapshot
    /// is restored untouched and `SwapFailed` carries both the activation
    /// error and the rollback outcome.
    pub async fn swap(
        &self,
        domain: Domain,
        key: &Key,
        provider: Option<&str>,
        cancel: &CancelToken,
    ) -> Result<SwapRecord, LifecycleError> {
        let cell = self.entry(domain, key);
        let mut entry = cell.lock().await;

        match entry.state {
            LifecycleState::Paused => {
                return Err(LifecycleError::Paused { domain, key: key.clone() })
            }
            LifecycleState::Draining => {
                return Err(LifecycleError::Draining { domain, key: key.clone() })
            }
            LifecycleState::Ready => {}
            // Nothing active yet: a swap degenerates to an activation.
            _ => {
                self.activate_locked(domain, key, provider, cancel, &mut entry)
                    .await?;
                let record = SwapRecord {
                    at: Utc::now(),
                    outgoing: None,
                    incoming: entry
                        .active
                        .as_ref()
                        .map(|c| c.provider.clone())
                        .unwrap_or_default(),
                };
                entry.last_swap = Some(record.clone());
                return Ok(record);
            }
        }

        let snapshot_candidate = entry.active.clone();
        let snapshot_instance = entry.instance.clone();
        let outgoing = snapshot_candidate.as_ref().map(|c| c.provider.clone());
        entry.state = LifecycleState::Activating;

        let window = self.config.warmup.min(self.config.health_timeout);
        let built = self
            .build_instance(domain, key, provider, cancel, window)
            .await;

        match built {
            Ok((candidate, instance, health)) => {
                let incoming = candidate.provider.clone();
                // Retire the old instance while still holding the slot
                // lock; cleaning never overlaps a new activation.
                entry.state = LifecycleState::Cleaning;
                if let Some(old) = snapshot_instance {
                    shielded_shutdown(&old).await;
                }
                entry.active = Some(candidate);
                entry.instance = Some(instance);
                entry.last_health = Some(HealthRecord::now(&health));
                entry.last_error = None;
                let record = SwapRecord {
                    at: Utc::now(),
                    outgoing: outgoing.clone(),
                    incoming: incoming.clone(),
                };
                entry.last_swap = Some(record.clone());
                entry.state = LifecycleState::Ready;
                info!(
                    domain = %domain,
                    key = %key,
                    outgoing = outgoing.as_deref().unwrap_or("-"),
                    incoming = %incoming,
                    "swap complete"
                );
                Ok(record)
            }
            Err(LifecycleError::Cancelled) => {
                entry.active = snapshot_candidate;
                entry.instance = snapshot_instance;
                entry.state = LifecycleState::Ready;
                Err(LifecycleError::Cancelled)
            }
            Err(cause) => {
                // Restore the snapshot exactly as it was.
                entry.active = snapshot_candidate;
                entry.instance = snapshot_instance;
                entry.state = LifecycleState::Ready;
                let rollback = RollbackReport {
                    restored: true,
                    active_provider: outgoing,
                };
                warn!(
                    domain = %domain,
                    key = %key,
                    error = %cause,
                    "swap failed, previous instance restored"
                );
                Err(LifecycleError::SwapFailed {
                    provider: provider.unwrap_or("auto").to_string(),
                    rollback,
                    cause: Box::new(cause),
                })
            }
        }
    }

    // ── Pause / drain ─────────────────────────────────────────────────────────

    pub async fn pause(&self, domain: Domain, key: &Key) -> Result<(), LifecycleError> {
        let cell = self.entry(domain, key);
        let mut entry = cell.lock().await;
        match entry.state {
            LifecycleState::Ready => {
                entry.state = LifecycleState::Paused;
                Ok(())
            }
            state => Err(LifecycleError::NotReady { domain, key: key.clone(), state }),
        }
    }

    pub async fn resume(&self, domain: Domain, key: &Key) -> Result<(), LifecycleError> {
        let cell = self.entry(domain, key);
        let mut entry = cell.lock().await;
        match entry.state {
            LifecycleState::Paused => {
                entry.state = LifecycleState::Ready;
                Ok(())
            }
            state => Err(LifecycleError::NotReady { domain, key: key.clone(), state }),
        }
    }

    /// Start draining: the instance stays resident, bridges reject new
    /// work, and [`drain_complete`](Self::drain_complete) finishes the
    /// teardown once in-flight work has finished.
    pub async fn drain(&self, domain: Domain, key: &Key) -> Result<(), LifecycleError> {
        let cell = self.entry(domain, key);
        let mut entry = cell.lock().await;
        match entry.state {
            LifecycleState::Ready => {
                entry.state = LifecycleState::Draining;
                Ok(())
            }
            state => Err(LifecycleError::NotReady { domain, key: key.clone(), state }),
        }
    }

    /// Completion signal from the owning bridge: in-flight work is done,
    /// clean up and return the slot to idle.
    pub async fn drain_complete(&self, domain: Domain, key: &Key) -> Result<(), LifecycleError> {
        let cell = self.entry(domain, key);
        let mut entry = cell.lock().await;
        match entry.state {
            LifecycleState::Draining => {
                entry.state = LifecycleState::Cleaning;
                if let Some(instance) = entry.instance.take() {
                    shielded_shutdown(&instance).await;
                }
                entry.active = None;
                entry.state = LifecycleState::Idle;
                Ok(())
            }
            state => Err(LifecycleError::NotReady { domain, key: key.clone(), state }),
        }
    }

    /// Complete a drain once no one outside the manager still borrows the
    /// instance (the entry's own reference is the last one). Returns
    /// whether the drain finished. Called periodically by the supervisor.
    pub async fn try_drain_complete(&self, domain: Domain, key: &Key) -> Result<bool, LifecycleError> {
        let Some(cell) = self.peek(domain, key) else {
            return Ok(false);
        };
        let mut entry = cell.lock().await;
        if entry.state != LifecycleState::Draining {
            return Ok(false);
        }
        let borrowed = entry.instance.as_ref().map_or(0, Arc::strong_count);
        if borrowed > 1 {
            return Ok(false);
        }
        entry.state = LifecycleState::Cleaning;
        if let Some(instance) = entry.instance.take() {
            shielded_shutdown(&instance).await;
        }
        entry.active = None;
        entry.state = LifecycleState::Idle;
        Ok(true)
    }

    // ── Cleanup ───────────────────────────────────────────────────────────────

    /// Tear down whatever the slot holds and return it to idle. Shielded:
    /// once started, the instance shutdown runs to completion even if the
    /// caller is cancelled. Idempotent on idle slots.
    pub async fn cleanup(&self, domain: Domain, key: &Key) -> Result<(), LifecycleError> {
        let Some(cell) = self.peek(domain, key) else {
            return Ok(());
        };
        let mut entry = cell.lock().await;
        entry.state = LifecycleState::Cleaning;
        if let Some(instance) = entry.instance.take() {
            shielded_shutdown(&instance).await;
        }
        entry.active = None;
        entry.state = LifecycleState::Idle;
        Ok(())
    }

    /// Clean up every slot that currently holds an instance. Used at
    /// orchestrator shutdown.
    pub async fn cleanup_all(&self) {
        let slots: Vec<(Domain, Key)> = {
            let entries = self.entries.lock().expect("entry map lock poisoned");
            entries.keys().cloned().collect()
        };
        for (domain, key) in slots {
            if let Err(e) = self.cleanup(domain, &key).await {
                warn!(domain = %domain, key = %key, error = %e, "cleanup failed");
            }
        }
    }

    // ── Observation ───────────────────────────────────────────────────────────

    /// The ready instance for a slot, if any. Does not activate.
    pub async fn ready_instance(
        &self,
        domain: Domain,
        key: &Key,
    ) -> Option<Arc<dyn ProviderInstance>> {
        let cell = self.peek(domain, key)?;
        let entry = cell.lock().await;
        if entry.state == LifecycleState::Ready {
            entry.instance.clone()
        } else {
            None
        }
    }

    /// Probe a ready instance and record the result. A failing probe only
    /// updates `last_health`; it never changes the slot state.
    pub async fn poll_health(&self, domain: Domain, key: &Key) -> Option<Health> {
        let cell = self.peek(domain, key)?;
        let instance = {
            let entry = cell.lock().await;
            if entry.state != LifecycleState::Ready {
                return None;
            }
            entry.instance.clone()?
        };

        let health = match timeout(self.config.health_timeout, instance.health()).await {
            Ok(h) => h,
            Err(_) => Health::failing("health check timed out"),
        };
        if !health.ok {
            warn!(domain = %domain, key = %key, detail = %health.detail, "health check failing");
        }

        let mut entry = cell.lock().await;
        entry.last_health = Some(HealthRecord::now(&health));
        Some(health)
    }

    pub async fn entry_status(&self, domain: Domain, key: &Key) -> Option<EntryStatus> {
        let cell = self.peek(domain, key)?;
        let entry = cell.lock().await;
        Some(entry.status(domain, key))
    }

    pub async fn status_all(&self) -> Vec<EntryStatus> {
        let mut slots: Vec<(Domain, Key)> = {
            let entries = self.entries.lock().expect("entry map lock poisoned");
            entries.keys().cloned().collect()
        };
        slots.sort();

        let mut statuses = Vec::with_capacity(slots.len());
        for (domain, key) in slots {
            if let Some(status) = self.entry_status(domain, &key).await {
                statuses.push(status);
            }
        }
        statuses
    }
}

/// Run an instance shutdown on its own task so the caller being cancelled
/// cannot abort it mid-way.
async fn shielded_shutdown(instance: &Arc<dyn ProviderInstance>) {
    let instance = instance.clone();
    let handle = tokio::spawn(async move {
        if let Err(e) = instance.shutdown().await {
            warn!(error = %e, "instance shutdown reported an error");
        }
    });
    let _ = handle.await;
}
