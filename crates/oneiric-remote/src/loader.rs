use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use oneiric_domain::{Candidate, CandidateIdentity, Key, Source};
use oneiric_resolver::Resolver;
use oneiric_security::{
    contained_join, sha256_hex, verify_digest, FactoryAllowlist, SecurityError, SignatureVerifier,
};
use oneiric_store::RuntimeStore;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::breaker::{BreakerConfig, BreakerState, CircuitBreaker};
use crate::error::RemoteError;
use crate::manifest::{parse_document, ManifestEntry, RemoteManifest};
use crate::transport::{FetchLimits, TransportSet};

// ── Configuration ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct RemoteConfig {
    pub manifest_urls: Vec<String>,
    /// Base64 Ed25519 public key. When absent, the manifest's embedded
    /// `public_key` is used; a manifest with neither is rejected.
    pub public_key: Option<String>,
    pub refresh_interval: Duration,
    pub http_timeout: Duration,
    pub max_manifest_bytes: usize,
    pub cache_root: PathBuf,
    pub breaker: BreakerConfig,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            manifest_urls: Vec::new(),
            public_key: None,
            refresh_interval: Duration::from_secs(300),
            http_timeout: Duration::from_secs(30),
            max_manifest_bytes: 16 * 1024 * 1024,
            cache_root: PathBuf::from(".oneiric/cache"),
            breaker: BreakerConfig::default(),
        }
    }
}

// ── Status & summaries ────────────────────────────────────────────────────────

/// Structured outcome of one manifest application.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSummary {
    pub url: String,
    pub digest: String,
    pub added: usize,
    pub removed: usize,
    pub updated: usize,
    /// True when the manifest digest matched the last applied one and the
    /// sync was a no-op.
    pub unchanged: bool,
    pub entry_errors: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UrlStatus {
    pub url: String,
    pub breaker: BreakerState,
    pub consecutive_failures: u32,
    /// Disabled after an integrity failure; only a config change
    /// re-enables it.
    pub disabled: bool,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub last_result: Option<String>,
}

#[derive(Debug, Clone)]
struct LastSync {
    at: DateTime<Utc>,
    result: String,
}

struct UrlState {
    breaker: CircuitBreaker,
    disabled: AtomicBool,
    next_attempt: Mutex<Option<Instant>>,
    last: Mutex<Option<LastSync>>,
}

impl UrlState {
    fn new(breaker: BreakerConfig) -> Self {
        Self {
            breaker: CircuitBreaker::new(breaker),
            disabled: AtomicBool::new(false),
            next_attempt: Mutex::new(None),
            last: Mutex::new(None),
        }
    }

    fn note(&self, result: impl Into<String>) {
        *self.last.lock().expect("url state lock poisoned") = Some(LastSync {
            at: Utc::now(),
            result: result.into(),
        });
    }
}

// ── Loader ────────────────────────────────────────────────────────────────────

/// Fetches, verifies and reconciles remote manifests into the registry.
///
/// The cache directory is owned exclusively by the loader; artifacts are
/// stored content-addressed under `artifacts/<d2>/<digest>/` with
/// sanitized filenames.
pub struct RemoteLoader {
    config: RemoteConfig,
    transports: TransportSet,
    resolver: Arc<Resolver>,
    allowlist: Arc<FactoryAllowlist>,
    store: Arc<dyn RuntimeStore>,
    states: Mutex<HashMap<String, Arc<UrlState>>>,
}

impl RemoteLoader {
    pub fn new(
        config: RemoteConfig,
        transports: TransportSet,
        resolver: Arc<Resolver>,
        allowlist: Arc<FactoryAllowlist>,
        store: Arc<dyn RuntimeStore>,
    ) -> Self {
        Self {
            config,
            transports,
            resolver,
            allowlist,
            store,
            states: Mutex::new(HashMap::new()),
        }
    }

    pub fn refresh_interval(&self) -> Duration {
        self.config.refresh_interval
    }

    fn url_state(&self, url: &str) -> Arc<UrlState> {
        let mut states = self.states.lock().expect("loader state lock poisoned");
        states
            .entry(url.to_string())
            .or_insert_with(|| Arc::new(UrlState::new(self.config.breaker.clone())))
            .clone()
    }

    /// Sync every configured manifest URL, honouring per-URL backoff
    /// windows. Used by the orchestrator's periodic loop.
    pub async fn sync_all(&self) -> Vec<(String, Result<SyncSummary, RemoteError>)> {
        let mut results = Vec::new();
        for url in self.config.manifest_urls.clone() {
            let state = self.url_state(&url);
            let backing_off = state
                .next_attempt
                .lock()
                .expect("url state lock poisoned")
                .map_or(false, |at| at > Instant::now());
            if backing_off {
                debug!(url = %url, "skipping manifest sync, still backing off");
                continue;
            }
            let result = self.sync(&url).await;
            results.push((url, result));
        }
        results
    }

    /// Run the full pipeline for one manifest URL: fetch, verify, parse,
    /// stage artifacts, diff and apply, persist the applied digest.
    pub async fn sync(&self, url: &str) -> Result<SyncSummary, RemoteError> {
        let state = self.url_state(url);

        if state.disabled.load(Ordering::SeqCst) {
            return Err(RemoteError::IntegrityFailure(format!(
                "{url} is disabled after an integrity failure; change configuration to re-enable"
            )));
        }
        if !state.breaker.try_acquire() {
            return Err(RemoteError::CircuitOpen(url.to_string()));
        }

        let limits = FetchLimits {
            timeout: self.config.http_timeout,
            max_bytes: self.config.max_manifest_bytes,
        };
        let bytes = match self.transports.fetch(url, &limits).await {
            Ok(bytes) => {
                state.breaker.record_success();
                *state.next_attempt.lock().expect("url state lock poisoned") = None;
                bytes
            }
            Err(e) => {
                let delay = state.breaker.record_failure();
                *state.next_attempt.lock().expect("url state lock poisoned") =
                    Some(Instant::now() + delay);
                state.note(format!("fetch failed: {e}"));
                warn!(url = %url, error = %e, backoff_ms = delay.as_millis() as u64, "manifest fetch failed");
                return Err(e);
            }
        };

        // Idempotence: an unchanged manifest is a no-op beyond the digest
        // comparison.
        let digest = sha256_hex(&bytes);
        if self.store.get_manifest_digest(url).await?.as_deref() == Some(digest.as_str()) {
            state.note("unchanged");
            debug!(url = %url, "manifest unchanged");
            return Ok(SyncSummary {
                url: url.to_string(),
                digest,
                added: 0,
                removed: 0,
                updated: 0,
                unchanged: true,
                entry_errors: Vec::new(),
            });
        }

        let doc = match parse_document(&bytes) {
            Ok(doc) => doc,
            Err(e) => {
                state.note(format!("parse failed: {e}"));
                return Err(e);
            }
        };

        if let Err(e) = self.verify_document(&doc) {
            state.disabled.store(true, Ordering::SeqCst);
            state.note(format!("integrity failure: {e}"));
            warn!(url = %url, error = %e, "manifest signature rejected, url disabled");
            return Err(RemoteError::IntegrityFailure(e.to_string()));
        }

        let manifest = match RemoteManifest::from_value(doc) {
            Ok(m) => m,
            Err(e) => {
                state.note(format!("parse failed: {e}"));
                return Err(e);
            }
        };

        // Stage everything before touching the registry so an integrity
        // failure promotes zero entries.
        let verifier = self.artifact_verifier(&manifest);
        let mut staged: Vec<Candidate> = Vec::new();
        let mut entry_errors: Vec<String> = Vec::new();
        for entry in &manifest.entries {
            match self.stage_entry(url, entry, verifier.as_ref()).await {
                Ok(candidate) => staged.push(candidate),
                Err(e) if e.is_integrity() => {
                    state.disabled.store(true, Ordering::SeqCst);
                    state.note(format!("integrity failure: {e}"));
                    warn!(url = %url, error = %e, "manifest aborted, zero entries applied");
                    return Err(e);
                }
                Err(e) => {
                    warn!(url = %url, key = %entry.key, provider = %entry.provider, error = %e,
                        "skipping manifest entry");
                    entry_errors.push(format!("{}/{}: {e}", entry.key, entry.provider));
                }
            }
        }

        let summary = self.apply(url, &manifest, staged, digest, entry_errors).await?;
        state.note(format!(
            "applied: +{} -{} ~{}",
            summary.added, summary.removed, summary.updated
        ));
        Ok(summary)
    }

    fn verify_document(&self, doc: &Value) -> Result<(), SecurityError> {
        let verifier = match &self.config.public_key {
            Some(key) => SignatureVerifier::from_base64(key)?,
            None => {
                let embedded = doc
                    .get("public_key")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| {
                        SecurityError::SignatureInvalid("no public key configured or embedded".into())
                    })?;
                SignatureVerifier::from_base64(embedded)?
            }
        };
        verifier.verify_manifest(doc)
    }

    fn artifact_verifier(&self, manifest: &RemoteManifest) -> Option<SignatureVerifier> {
        let key = self
            .config
            .public_key
            .as_deref()
            .or(manifest.public_key.as_deref())?;
        SignatureVerifier::from_base64(key).ok()
    }

    /// Validate one entry and, when it ships an artifact, download it into
    /// the content-addressed cache. Digest or artifact-signature mismatch
    /// is an integrity failure that aborts the whole manifest; anything
    /// else is an entry-level failure.
    async fn stage_entry(
        &self,
        url: &str,
        entry: &ManifestEntry,
        verifier: Option<&SignatureVerifier>,
    ) -> Result<Candidate, RemoteError> {
        entry.validate(&self.allowlist)?;
        let mut candidate = entry.to_candidate(url);

        if let Some(uri) = &entry.uri {
            let digest = entry
                .digest_sha256
                .as_ref()
                .ok_or_else(|| RemoteError::EntryInvalid("artifact without digest".into()))?;

            let dir = self
                .config
                .cache_root
                .join("artifacts")
                .join(&digest[..2])
                .join(digest);
            let target = contained_join(&dir, artifact_file_name(uri))?;

            if !target.exists() {
                let limits = FetchLimits {
                    timeout: self.config.http_timeout,
                    max_bytes: self.config.max_manifest_bytes,
                };
                let bytes = self.transports.fetch(uri, &limits).await?;

                verify_digest(digest, &bytes)?;
                if let (Some(signature), Some(verifier)) = (&entry.signature, verifier) {
                    verifier.verify(&bytes, signature).map_err(|e| {
                        RemoteError::IntegrityFailure(format!("artifact {uri}: {e}"))
                    })?;
                }

                write_atomic(&target, &bytes).await?;
                debug!(uri = %uri, path = %target.display(), "artifact cached");
            }

            candidate.metadata.insert(
                "artifact_path".to_string(),
                Value::String(target.display().to_string()),
            );
        }

        Ok(candidate)
    }

    /// Diff staged candidates against the registry's current view of this
    /// manifest URL and apply registrations, updates and removals.
    async fn apply(
        &self,
        url: &str,
        manifest: &RemoteManifest,
        staged: Vec<Candidate>,
        digest: String,
        entry_errors: Vec<String>,
    ) -> Result<SyncSummary, RemoteError> {
        let current: Vec<Candidate> = self
            .resolver
            .candidates_by_source(Source::RemoteManifest)
            .into_iter()
            .filter(|c| {
                c.metadata.get("origin").and_then(|v| v.as_str()) == Some(url)
            })
            .collect();
        let current_by_identity: HashMap<CandidateIdentity, &Candidate> =
            current.iter().map(|c| (c.identity(), c)).collect();

        // Identities named by the manifest, including entries that failed
        // entry-level validation: a previously applied candidate is never
        // removed just because its replacement entry is broken.
        let named: HashSet<CandidateIdentity> = manifest
            .entries
            .iter()
            .map(|e| CandidateIdentity {
                domain: e.domain,
                key: Key::new(&e.key),
                provider: e.provider.clone(),
                source: Source::RemoteManifest,
            })
            .collect();

        let mut added = 0;
        let mut updated = 0;
        for candidate in staged {
            match current_by_identity.get(&candidate.identity()) {
                Some(existing) if **existing == candidate => {}
                Some(_) => {
                    self.resolver.register(candidate);
                    updated += 1;
                }
                None => {
                    self.resolver.register(candidate);
                    added += 1;
                }
            }
        }

        let mut removed = 0;
        for existing in &current {
            if !named.contains(&existing.identity()) {
                self.resolver.unregister(
                    existing.domain,
                    &existing.key,
                    &existing.provider,
                    existing.source,
                );
                removed += 1;
            }
        }

        self.store.set_manifest_digest(url, &digest).await?;
        info!(
            url = %url,
            added,
            removed,
            updated,
            entry_errors = entry_errors.len(),
            "remote manifest applied"
        );

        Ok(SyncSummary {
            url: url.to_string(),
            digest,
            added,
            removed,
            updated,
            unchanged: false,
            entry_errors,
        })
    }

    /// Per-URL breaker and sync status, for `remote-status`.
    pub fn status(&self) -> Vec<UrlStatus> {
        let states = self.states.lock().expect("loader state lock poisoned");
        let mut urls: Vec<&String> = states.keys().collect();
        urls.sort();
        urls.into_iter()
            .map(|url| {
                let state = &states[url];
                let last = state.last.lock().expect("url state lock poisoned").clone();
                UrlStatus {
                    url: url.clone(),
                    breaker: state.breaker.state(),
                    consecutive_failures: state.breaker.consecutive_failures(),
                    disabled: state.disabled.load(Ordering::SeqCst),
                    last_sync_at: last.as_ref().map(|l| l.at),
                    last_result: last.map(|l| l.result),
                }
            })
            .collect()
    }
}

/// Filename for an artifact uri. Remote uris use their final path
/// segment; scheme-less (local) references are sanitized whole, so a
/// traversal like `../../etc/passwd` is rejected rather than truncated.
fn artifact_file_name(uri: &str) -> &str {
    match uri.split_once("://") {
        Some((_, rest)) => rest.rsplit('/').next().unwrap_or(rest),
        None => uri,
    }
}

async fn write_atomic(target: &Path, bytes: &[u8]) -> Result<(), RemoteError> {
    let parent = target
        .parent()
        .ok_or_else(|| RemoteError::Io(format!("{} has no parent", target.display())))?;
    tokio::fs::create_dir_all(parent)
        .await
        .map_err(|e| RemoteError::Io(e.to_string()))?;
    let tmp = target.with_extension("part");
    tokio::fs::write(&tmp, bytes)
        .await
        .map_err(|e| RemoteError::Io(e.to_string()))?;
    tokio::fs::rename(&tmp, target)
        .await
        .map_err(|e| RemoteError::Io(e.to_string()))?;
    Ok(())
}
