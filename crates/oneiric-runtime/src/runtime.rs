use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use oneiric_bridges::{
    ActionBridge, AdapterBridge, EventBridge, FanoutStrategy, ServiceBridge, TaskBridge,
    WorkflowBridge,
};
use oneiric_config::{SelectionChange, SelectionDoc, Settings};
use oneiric_domain::{
    ActivityRecord, ActivityState, Candidate, Domain, Key, LifecycleState, ResolutionTrace, Source,
};
use oneiric_lifecycle::{
    CancelToken, EntryStatus, FactoryRegistry, LifecycleConfig, LifecycleManager, SwapRecord,
};
use oneiric_security::FactoryAllowlist;
use oneiric_remote::{
    BreakerConfig, RemoteConfig, RemoteError, RemoteLoader, SyncSummary, TransportSet, UrlStatus,
};
use oneiric_resolver::Resolver;
use oneiric_store::{RedbStore, RuntimeStore};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::builtin::{entry_point_candidates, register_builtins};
use crate::error::RuntimeError;
use crate::snapshot::HealthSnapshot;
use crate::supervisor::Supervisor;
use crate::watcher::SelectionWatcher;

/// One row of the `list` view: resolution, live state and activity for a
/// slot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlotRow {
    pub domain: Domain,
    pub key: Key,
    pub resolved_provider: String,
    pub source: Source,
    pub active_provider: Option<String>,
    pub state: LifecycleState,
    pub activity: ActivityState,
}

/// The sole long-lived owner of the core: resolver, lifecycle, store,
/// loader and bridges. Tests build fresh runtimes; nothing here is
/// process-global.
pub struct Runtime {
    settings: Settings,
    resolver: Arc<Resolver>,
    factories: Arc<FactoryRegistry>,
    store: Arc<dyn RuntimeStore>,
    lifecycle: Arc<LifecycleManager>,
    loader: Option<Arc<RemoteLoader>>,
    adapters: AdapterBridge,
    services: ServiceBridge,
    tasks: TaskBridge,
    events: Arc<EventBridge>,
    workflows: WorkflowBridge,
    actions: ActionBridge,
    cancel: CancelToken,
    applied_selection: Mutex<SelectionDoc>,
}

impl Runtime {
    /// Build against the durable redb store at the configured path.
    pub fn build(settings: Settings) -> Result<Arc<Self>, RuntimeError> {
        let store: Arc<dyn RuntimeStore> = Arc::new(RedbStore::open(&settings.store.path)?);
        Ok(Self::build_with_store(settings, store))
    }

    /// Build against any store implementation (tests use the in-memory
    /// one).
    pub fn build_with_store(settings: Settings, store: Arc<dyn RuntimeStore>) -> Arc<Self> {
        let allowlist = Arc::new(FactoryAllowlist::with_additions(
            settings.security.allowlist.iter().cloned(),
        ));
        let resolver = Arc::new(Resolver::new());
        let factories = Arc::new(FactoryRegistry::new());
        register_builtins(&factories);

        let lifecycle = Arc::new(LifecycleManager::new(
            resolver.clone(),
            factories.clone(),
            allowlist.clone(),
            LifecycleConfig {
                health_timeout: settings.lifecycle.health_timeout,
                activation_timeout: settings.lifecycle.activation_timeout,
                warmup: settings.lifecycle.warmup,
            },
        ));

        let loader = settings.remote.enabled.then(|| {
            Arc::new(RemoteLoader::new(
                RemoteConfig {
                    manifest_urls: settings.remote.manifests.clone(),
                    public_key: settings.remote.public_key.clone(),
                    refresh_interval: settings.remote.refresh_interval,
                    http_timeout: settings.remote.http_timeout,
                    max_manifest_bytes: settings.remote.max_manifest_bytes,
                    cache_root: settings.cache_root.clone(),
                    breaker: BreakerConfig {
                        failure_threshold: settings.remote.failure_threshold,
                        cooldown: settings.remote.cooldown,
                        ..Default::default()
                    },
                },
                TransportSet::with_defaults(),
                resolver.clone(),
                allowlist.clone(),
                store.clone(),
            ))
        });

        let cancel = CancelToken::new();
        let adapters = AdapterBridge::new(lifecycle.clone(), store.clone(), cancel.clone());
        let services = ServiceBridge::new(lifecycle.clone(), store.clone(), cancel.clone());
        let tasks = TaskBridge::new(lifecycle.clone(), store.clone(), cancel.clone());
        let events = Arc::new(EventBridge::new(store.clone(), FanoutStrategy::All));
        let actions = ActionBridge::new(lifecycle.clone(), store.clone(), cancel.clone());
        let workflows = WorkflowBridge::new(resolver.clone(), actions.clone(), store.clone());

        Arc::new(Self {
            settings,
            resolver,
            factories,
            store,
            lifecycle,
            loader,
            adapters,
            services,
            tasks,
            events,
            workflows,
            actions,
            cancel,
            applied_selection: Mutex::new(SelectionDoc::default()),
        })
    }

    // ── Accessors ─────────────────────────────────────────────────────────────

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn resolver(&self) -> &Arc<Resolver> {
        &self.resolver
    }

    /// Register additional constructors before boot (the "process image"
    /// surface).
    pub fn factories(&self) -> &Arc<FactoryRegistry> {
        &self.factories
    }

    pub fn store(&self) -> &Arc<dyn RuntimeStore> {
        &self.store
    }

    pub fn lifecycle(&self) -> &Arc<LifecycleManager> {
        &self.lifecycle
    }

    pub fn cancel(&self) -> &CancelToken {
        &self.cancel
    }

    pub fn adapters(&self) -> &AdapterBridge {
        &self.adapters
    }

    pub fn services(&self) -> &ServiceBridge {
        &self.services
    }

    pub fn tasks(&self) -> &TaskBridge {
        &self.tasks
    }

    pub fn events(&self) -> &Arc<EventBridge> {
        &self.events
    }

    pub fn workflows(&self) -> &WorkflowBridge {
        &self.workflows
    }

    pub fn actions(&self) -> &ActionBridge {
        &self.actions
    }

    /// Programmatic registration; always lands in the highest tier.
    pub fn register_inline(&self, mut candidate: Candidate) {
        candidate.source = Source::Inline;
        self.resolver.register(candidate);
    }

    // ── Boot & shutdown ───────────────────────────────────────────────────────

    /// Bring the runtime up in the documented order: local-config
    /// candidates, entry-point discovery, a synchronous first remote sync,
    /// the periodic remote loop, the initial selection, the selection
    /// watcher and the supervisor.
    pub async fn boot(self: &Arc<Self>) -> Result<(), RuntimeError> {
        self.boot_registry();

        if let Some(loader) = &self.loader {
            // First sync runs to completion so initial activations see a
            // complete registry.
            for (url, result) in loader.sync_all().await {
                if let Err(e) = result {
                    warn!(url = %url, error = %e, "initial manifest sync failed");
                }
            }
            self.spawn_remote_loop(loader.clone());
        }

        let initial = self.settings.selection.clone();
        if !initial.is_empty() {
            self.apply_selection(initial.entries()).await;
            *self.applied_selection.lock().await = initial;
        }

        for key in self.settings.services.clone() {
            let key = Key::new(&key);
            if let Err(e) = self.services.start(&key).await {
                warn!(key = %key, error = %e, "service failed to start at boot");
            }
        }

        if self.settings.watcher.enabled && self.settings.watcher.selection_path.is_some() {
            SelectionWatcher::spawn(self.clone());
        }
        if self.settings.supervisor.enabled {
            Supervisor::spawn(self.clone());
        }

        info!("runtime booted");
        Ok(())
    }

    /// Registration-only boot: local-config candidates plus entry-point
    /// discovery, no background loops. One-shot CLI commands use this.
    pub fn boot_registry(&self) {
        for candidate in self.settings.candidates.clone() {
            self.resolver.register(candidate);
        }
        for candidate in entry_point_candidates() {
            self.resolver.register(candidate);
        }
    }

    fn spawn_remote_loop(self: &Arc<Self>, loader: Arc<RemoteLoader>) {
        let cancel = self.cancel.clone();
        let interval = loader.refresh_interval();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
                for (url, result) in loader.sync_all().await {
                    if let Err(e) = result {
                        warn!(url = %url, error = %e, "periodic manifest sync failed");
                    }
                }
            }
        });
    }

    /// Stop watchers and timers, clean up every live instance (shielded)
    /// and leave the store flushed. Idempotent.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        self.lifecycle.cleanup_all().await;
        info!("runtime stopped");
    }

    // ── Selection ─────────────────────────────────────────────────────────────

    /// Apply a new selection document (in-memory update path). Diffs
    /// against the last applied document and dispatches swaps.
    pub async fn update_selection(self: &Arc<Self>, doc: SelectionDoc) {
        let changes = {
            let applied = self.applied_selection.lock().await;
            applied.diff(&doc)
        };
        if changes.is_empty() {
            return;
        }
        self.apply_selection(changes).await;
        *self.applied_selection.lock().await = doc;
    }

    /// Dispatch selection changes, batched per domain; batches run
    /// concurrently, entries within a batch in order.
    pub async fn apply_selection(self: &Arc<Self>, changes: Vec<SelectionChange>) {
        let mut by_domain: HashMap<Domain, Vec<SelectionChange>> = HashMap::new();
        for change in changes {
            by_domain.entry(change.domain).or_default().push(change);
        }

        let mut handles = Vec::new();
        for (_, batch) in by_domain {
            let runtime = self.clone();
            handles.push(tokio::spawn(async move {
                for change in batch {
                    runtime.apply_selection_change(change).await;
                }
            }));
        }
        for handle in handles {
            let _ = handle.await;
        }
    }

    async fn apply_selection_change(&self, change: SelectionChange) {
        let SelectionChange { domain, key, provider } = change;

        if let Some(status) = self.lifecycle.entry_status(domain, &key).await {
            if status.state == LifecycleState::Ready
                && status.provider.as_deref() == Some(provider.as_str())
            {
                return;
            }
        }
        match self.store.get_activity(domain, &key).await {
            Ok(Some(record)) if record.state != ActivityState::Accepting => {
                info!(domain = %domain, key = %key, state = %record.state,
                    "selection change skipped, slot not accepting");
                return;
            }
            Err(e) => {
                warn!(domain = %domain, key = %key, error = %e, "activity lookup failed");
                return;
            }
            _ => {}
        }

        match self
            .lifecycle
            .swap(domain, &key, Some(&provider), &self.cancel)
            .await
        {
            Ok(record) => info!(
                domain = %domain,
                key = %key,
                outgoing = record.outgoing.as_deref().unwrap_or("-"),
                incoming = %record.incoming,
                "selection applied"
            ),
            Err(e) => warn!(domain = %domain, key = %key, provider = %provider, error = %e,
                "selection swap failed"),
        }
    }

    // ── Operations backing the CLI and HTTP surfaces ──────────────────────────

    pub async fn list(&self, domain: Option<Domain>) -> Vec<SlotRow> {
        let mut rows = Vec::new();
        for result in self.resolver.list(domain) {
            let domain = result.winner.domain;
            let key = result.winner.key.clone();
            let status = self.lifecycle.entry_status(domain, &key).await;
            let activity = self
                .store
                .get_activity(domain, &key)
                .await
                .ok()
                .flatten()
                .map(|r| r.state)
                .unwrap_or_default();
            rows.push(SlotRow {
                domain,
                key,
                resolved_provider: result.winner.provider.clone(),
                source: result.winner.source,
                active_provider: status.as_ref().and_then(|s| s.provider.clone()),
                state: status.map(|s| s.state).unwrap_or_default(),
                activity,
            });
        }
        rows
    }

    pub fn explain(&self, domain: Domain, key: &Key) -> ResolutionTrace {
        self.resolver.explain(domain, key)
    }

    /// Explicit swap. Rejected while the slot is paused or draining.
    pub async fn swap(
        &self,
        domain: Domain,
        key: &Key,
        provider: &str,
    ) -> Result<SwapRecord, RuntimeError> {
        if let Some(record) = self.store.get_activity(domain, key).await? {
            if record.state != ActivityState::Accepting {
                return Err(RuntimeError::ActivityBlocked {
                    domain,
                    key: key.clone(),
                    state: record.state,
                });
            }
        }
        Ok(self
            .lifecycle
            .swap(domain, key, Some(provider), &self.cancel)
            .await?)
    }

    pub async fn pause(
        &self,
        domain: Domain,
        key: &Key,
        reason: Option<String>,
    ) -> Result<(), RuntimeError> {
        self.store
            .set_activity(&ActivityRecord {
                domain,
                key: key.clone(),
                state: ActivityState::Paused,
                since: Utc::now(),
                reason,
            })
            .await?;
        // The lifecycle entry pauses too when it is resident; an idle slot
        // only carries the durable record.
        if let Err(e) = self.lifecycle.pause(domain, key).await {
            tracing::debug!(domain = %domain, key = %key, reason = %e, "no live instance to pause");
        }
        info!(domain = %domain, key = %key, "paused");
        Ok(())
    }

    pub async fn resume(&self, domain: Domain, key: &Key) -> Result<(), RuntimeError> {
        self.store
            .set_activity(&ActivityRecord {
                domain,
                key: key.clone(),
                state: ActivityState::Accepting,
                since: Utc::now(),
                reason: None,
            })
            .await?;
        if let Err(e) = self.lifecycle.resume(domain, key).await {
            tracing::debug!(domain = %domain, key = %key, reason = %e, "no paused instance to resume");
        }
        info!(domain = %domain, key = %key, "resumed");
        Ok(())
    }

    /// Start draining: bridges reject new work immediately; the
    /// supervisor completes the teardown once the instance is no longer
    /// borrowed.
    pub async fn drain(
        &self,
        domain: Domain,
        key: &Key,
        reason: Option<String>,
    ) -> Result<(), RuntimeError> {
        self.store
            .set_activity(&ActivityRecord {
                domain,
                key: key.clone(),
                state: ActivityState::Draining,
                since: Utc::now(),
                reason,
            })
            .await?;
        if let Err(e) = self.lifecycle.drain(domain, key).await {
            tracing::debug!(domain = %domain, key = %key, reason = %e, "no live instance to drain");
        }
        info!(domain = %domain, key = %key, "draining");
        Ok(())
    }

    /// Finish drains whose instances are no longer borrowed; prune their
    /// activity records. Called by the supervisor on its poll tick.
    pub async fn sweep_drains(&self) -> usize {
        let mut finished = 0;
        for status in self.lifecycle.status_all().await {
            if status.state != LifecycleState::Draining {
                continue;
            }
            match self.lifecycle.try_drain_complete(status.domain, &status.key).await {
                Ok(true) => {
                    finished += 1;
                    let domain = status.domain;
                    let key = status.key.clone();
                    let result = self
                        .store
                        .prune_activity(&move |r: &ActivityRecord| {
                            !(r.domain == domain
                                && r.key == key
                                && r.state == ActivityState::Draining)
                        })
                        .await;
                    if let Err(e) = result {
                        warn!(error = %e, "failed to prune drained activity record");
                    }
                    info!(domain = %status.domain, key = %status.key, "drain complete");
                }
                Ok(false) => {}
                Err(e) => warn!(error = %e, "drain completion failed"),
            }
        }
        finished
    }

    pub async fn activity(&self) -> Result<Vec<ActivityRecord>, RuntimeError> {
        let mut records = self.store.activity_snapshot().await?;
        records.sort_by(|a, b| (a.domain, &a.key).cmp(&(b.domain, &b.key)));
        Ok(records)
    }

    pub async fn status(&self) -> Vec<EntryStatus> {
        self.lifecycle.status_all().await
    }

    pub async fn health(&self) -> HealthSnapshot {
        HealthSnapshot::from_entries(&self.lifecycle.status_all().await)
    }

    // ── Remote ────────────────────────────────────────────────────────────────

    pub async fn remote_sync(
        &self,
        url: Option<&str>,
    ) -> Result<Vec<(String, Result<SyncSummary, RemoteError>)>, RuntimeError> {
        let loader = self.loader.as_ref().ok_or(RuntimeError::RemoteDisabled)?;
        match url {
            Some(url) => {
                let result = loader.sync(url).await;
                Ok(vec![(url.to_string(), result)])
            }
            None => Ok(loader.sync_all().await),
        }
    }

    pub fn remote_status(&self) -> Result<Vec<UrlStatus>, RuntimeError> {
        let loader = self.loader.as_ref().ok_or(RuntimeError::RemoteDisabled)?;
        Ok(loader.status())
    }

    // ── Workflows ─────────────────────────────────────────────────────────────

    /// Accept a workflow invocation. With an idempotency key, repeated
    /// submissions return the original run id instead of starting a new
    /// run.
    pub async fn submit_workflow(
        &self,
        workflow: &Key,
        inputs: Value,
        idempotency_key: Option<&str>,
    ) -> Result<Uuid, RuntimeError> {
        if let Some(idem) = idempotency_key {
            if let Some(existing) = self.store.get_workflow_idempotency(idem).await? {
                info!(workflow = %workflow, run_id = %existing, "idempotent resubmission");
                return Ok(existing);
            }
        }
        let run_id = self.workflows.submit(workflow, inputs).await?;
        if let Some(idem) = idempotency_key {
            self.store.set_workflow_idempotency(idem, run_id).await?;
        }
        Ok(run_id)
    }
}
