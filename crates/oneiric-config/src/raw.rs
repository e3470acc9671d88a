use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Raw YAML representation of the settings file. Every field has a
/// default so sparse files and pure-env configurations both work.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RawSettings {
    pub profile: Option<String>,
    pub store: RawStore,
    pub cache_root: Option<String>,
    pub remote: RawRemote,
    pub lifecycle: RawLifecycle,
    pub watcher: RawWatcher,
    pub supervisor: RawSupervisor,
    pub http: RawHttp,
    pub security: RawSecurity,
    pub candidates: Vec<RawCandidate>,
    /// `domain -> key -> provider`
    pub selection: BTreeMap<String, BTreeMap<String, String>>,
    pub services: Vec<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RawStore {
    pub path: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RawRemote {
    pub enabled: Option<bool>,
    pub manifests: Vec<String>,
    pub public_key: Option<String>,
    pub refresh_interval_seconds: Option<u64>,
    pub http_timeout_seconds: Option<u64>,
    pub max_manifest_bytes: Option<usize>,
    pub failure_threshold: Option<u32>,
    pub cooldown_seconds: Option<u64>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RawLifecycle {
    pub health_timeout_seconds: Option<u64>,
    pub activation_timeout_seconds: Option<u64>,
    pub warmup_seconds: Option<u64>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RawWatcher {
    pub enabled: Option<bool>,
    pub selection_path: Option<String>,
    pub debounce_ms: Option<u64>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RawSupervisor {
    pub enabled: Option<bool>,
    pub health_poll_seconds: Option<u64>,
    pub snapshot_path: Option<String>,
    pub snapshot_interval_seconds: Option<u64>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RawHttp {
    pub enabled: Option<bool>,
    pub bind: Option<String>,
    pub port: Option<u16>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RawSecurity {
    pub allowlist: Vec<String>,
}

/// One locally configured candidate.
#[derive(Debug, Serialize, Deserialize)]
pub struct RawCandidate {
    pub domain: String,
    pub key: String,
    pub provider: String,
    pub factory: String,
    #[serde(default)]
    pub priority: i64,
    #[serde(default)]
    pub stack_level: i64,
    #[serde(default)]
    pub settings: Value,
    #[serde(default)]
    pub capabilities: Vec<String>,
}
