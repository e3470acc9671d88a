use std::path::PathBuf;
use std::time::Duration;

use oneiric_domain::Candidate;

use crate::selection::SelectionDoc;

/// Fully validated runtime settings, produced by the loader from YAML,
/// `ONEIRIC_` environment overrides and an optional profile preset.
#[derive(Debug, Clone)]
pub struct Settings {
    pub profile: Option<String>,
    pub store: StoreSettings,
    pub cache_root: PathBuf,
    pub remote: RemoteSettings,
    pub lifecycle: LifecycleSettings,
    pub watcher: WatcherSettings,
    pub supervisor: SupervisorSettings,
    pub http: HttpSettings,
    pub security: SecuritySettings,
    /// Candidates declared in local configuration, already tagged
    /// `source = local_config`.
    pub candidates: Vec<Candidate>,
    /// Initial provider selection applied at boot.
    pub selection: SelectionDoc,
    /// Service keys the supervisor activates at boot.
    pub services: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            profile: None,
            store: StoreSettings::default(),
            cache_root: PathBuf::from(".oneiric/cache"),
            remote: RemoteSettings::default(),
            lifecycle: LifecycleSettings::default(),
            watcher: WatcherSettings::default(),
            supervisor: SupervisorSettings::default(),
            http: HttpSettings::default(),
            security: SecuritySettings::default(),
            candidates: Vec::new(),
            selection: SelectionDoc::default(),
            services: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StoreSettings {
    pub path: PathBuf,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self { path: PathBuf::from(".oneiric/state.redb") }
    }
}

#[derive(Debug, Clone)]
pub struct RemoteSettings {
    pub enabled: bool,
    pub manifests: Vec<String>,
    pub public_key: Option<String>,
    pub refresh_interval: Duration,
    pub http_timeout: Duration,
    pub max_manifest_bytes: usize,
    pub failure_threshold: u32,
    pub cooldown: Duration,
}

impl Default for RemoteSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            manifests: Vec::new(),
            public_key: None,
            refresh_interval: Duration::from_secs(300),
            http_timeout: Duration::from_secs(30),
            max_manifest_bytes: 16 * 1024 * 1024,
            failure_threshold: 5,
            cooldown: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LifecycleSettings {
    pub health_timeout: Duration,
    pub activation_timeout: Duration,
    pub warmup: Duration,
}

impl Default for LifecycleSettings {
    fn default() -> Self {
        Self {
            health_timeout: Duration::from_secs(5),
            activation_timeout: Duration::from_secs(30),
            warmup: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WatcherSettings {
    pub enabled: bool,
    pub selection_path: Option<PathBuf>,
    pub debounce: Duration,
}

impl Default for WatcherSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            selection_path: None,
            debounce: Duration::from_millis(250),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    pub enabled: bool,
    pub health_poll: Duration,
    pub snapshot_path: Option<PathBuf>,
    pub snapshot_interval: Duration,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            health_poll: Duration::from_secs(30),
            snapshot_path: None,
            snapshot_interval: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpSettings {
    pub enabled: bool,
    pub bind: String,
    pub port: u16,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            bind: "127.0.0.1".to_string(),
            port: 8920,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SecuritySettings {
    /// Extra allowlist patterns on top of the builtin namespaces.
    pub allowlist: Vec<String>,
}
