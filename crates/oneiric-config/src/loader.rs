use std::path::{Path, PathBuf};
use std::time::Duration;

use oneiric_domain::{Candidate, Domain, Key, Source};
use serde_json::Value;
use tracing::debug;

use crate::error::ConfigError;
use crate::raw::{RawCandidate, RawSettings};
use crate::selection::SelectionDoc;
use crate::settings::{
    HttpSettings, LifecycleSettings, RemoteSettings, SecuritySettings, Settings, StoreSettings,
    SupervisorSettings, WatcherSettings,
};

/// Environment variables prefixed with this override settings fields;
/// `__` separates nesting levels, e.g. `ONEIRIC_HTTP__PORT=9000`.
pub const ENV_PREFIX: &str = "ONEIRIC_";

/// Load settings: YAML file (when given), then `ONEIRIC_` environment
/// overrides, then the selected profile preset.
pub fn load_settings(path: Option<&Path>) -> Result<Settings, ConfigError> {
    let (raw, origin) = match path {
        Some(p) => {
            let content = std::fs::read_to_string(p).map_err(|e| ConfigError::Io {
                path: p.display().to_string(),
                source: e,
            })?;
            let raw: RawSettings =
                serde_yaml::from_str(&content).map_err(|e| ConfigError::YamlParse {
                    path: p.display().to_string(),
                    source: e,
                })?;
            debug!("loaded settings from {}", p.display());
            (raw, p.display().to_string())
        }
        None => (RawSettings::default(), "<defaults>".to_string()),
    };

    let raw = apply_env(raw, std::env::vars(), &origin)?;
    let mut settings = convert(raw, &origin)?;
    if let Some(profile) = settings.profile.clone() {
        apply_profile(&mut settings, &profile)?;
    }
    Ok(settings)
}

/// Load a selection document (`domain -> key -> provider`) from YAML.
pub fn load_selection(path: &Path) -> Result<SelectionDoc, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
        path: path.display().to_string(),
        source: e,
    })?;
    serde_yaml::from_str(&content).map_err(|e| ConfigError::YamlParse {
        path: path.display().to_string(),
        source: e,
    })
}

// ── Environment overrides ─────────────────────────────────────────────────────

fn apply_env(
    raw: RawSettings,
    vars: impl Iterator<Item = (String, String)>,
    origin: &str,
) -> Result<RawSettings, ConfigError> {
    let mut tree = serde_json::to_value(&raw).map_err(|e| ConfigError::Conversion {
        path: origin.to_string(),
        message: e.to_string(),
    })?;

    for (name, value) in vars {
        let Some(rest) = name.strip_prefix(ENV_PREFIX) else {
            continue;
        };
        let path: Vec<String> = rest.split("__").map(|s| s.to_ascii_lowercase()).collect();
        set_path(&mut tree, &path, parse_env_scalar(&value));
    }

    serde_json::from_value(tree).map_err(|e| ConfigError::Conversion {
        path: origin.to_string(),
        message: format!("environment override rejected: {e}"),
    })
}

/// Parse an env value as a YAML scalar so booleans, numbers and flow
/// lists (`[a, b]`) come through typed; anything else stays a string.
fn parse_env_scalar(value: &str) -> Value {
    match serde_yaml::from_str::<Value>(value) {
        Ok(Value::Null) => Value::String(value.to_string()),
        Ok(parsed) => parsed,
        Err(_) => Value::String(value.to_string()),
    }
}

fn set_path(tree: &mut Value, path: &[String], value: Value) {
    let Some((leaf, parents)) = path.split_last() else {
        return;
    };
    let mut node = tree;
    for part in parents {
        if !node.is_object() {
            return;
        }
        node = node
            .as_object_mut()
            .expect("checked object")
            .entry(part.clone())
            .or_insert_with(|| Value::Object(Default::default()));
    }
    if let Some(obj) = node.as_object_mut() {
        obj.insert(leaf.clone(), value);
    }
}

// ── Conversion ────────────────────────────────────────────────────────────────

fn convert(raw: RawSettings, origin: &str) -> Result<Settings, ConfigError> {
    let defaults = Settings::default();

    let candidates = raw
        .candidates
        .into_iter()
        .map(|c| convert_candidate(c, origin))
        .collect::<Result<Vec<_>, _>>()?;

    let mut selection = SelectionDoc::default();
    for (domain, keys) in raw.selection {
        let domain: Domain = domain.parse()?;
        for (key, provider) in keys {
            selection.set(domain, Key::parse(&key)?, provider);
        }
    }

    Ok(Settings {
        profile: raw.profile,
        store: StoreSettings {
            path: raw
                .store
                .path
                .map(PathBuf::from)
                .unwrap_or(defaults.store.path),
        },
        cache_root: raw
            .cache_root
            .map(PathBuf::from)
            .unwrap_or(defaults.cache_root),
        remote: RemoteSettings {
            // Configuring manifests implies enabling remote sync unless
            // explicitly turned off.
            enabled: raw.remote.enabled.unwrap_or(!raw.remote.manifests.is_empty()),
            manifests: raw.remote.manifests,
            public_key: raw.remote.public_key,
            refresh_interval: secs(
                raw.remote.refresh_interval_seconds,
                defaults.remote.refresh_interval,
            ),
            http_timeout: secs(raw.remote.http_timeout_seconds, defaults.remote.http_timeout),
            max_manifest_bytes: raw
                .remote
                .max_manifest_bytes
                .unwrap_or(defaults.remote.max_manifest_bytes),
            failure_threshold: raw
                .remote
                .failure_threshold
                .unwrap_or(defaults.remote.failure_threshold),
            cooldown: secs(raw.remote.cooldown_seconds, defaults.remote.cooldown),
        },
        lifecycle: LifecycleSettings {
            health_timeout: secs(
                raw.lifecycle.health_timeout_seconds,
                defaults.lifecycle.health_timeout,
            ),
            activation_timeout: secs(
                raw.lifecycle.activation_timeout_seconds,
                defaults.lifecycle.activation_timeout,
            ),
            warmup: secs(raw.lifecycle.warmup_seconds, defaults.lifecycle.warmup),
        },
        watcher: WatcherSettings {
            enabled: raw.watcher.enabled.unwrap_or(defaults.watcher.enabled),
            selection_path: raw.watcher.selection_path.map(PathBuf::from),
            debounce: raw
                .watcher
                .debounce_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.watcher.debounce),
        },
        supervisor: SupervisorSettings {
            enabled: raw.supervisor.enabled.unwrap_or(defaults.supervisor.enabled),
            health_poll: secs(
                raw.supervisor.health_poll_seconds,
                defaults.supervisor.health_poll,
            ),
            snapshot_path: raw.supervisor.snapshot_path.map(PathBuf::from),
            snapshot_interval: secs(
                raw.supervisor.snapshot_interval_seconds,
                defaults.supervisor.snapshot_interval,
            ),
        },
        http: HttpSettings {
            enabled: raw.http.enabled.unwrap_or(defaults.http.enabled),
            bind: raw.http.bind.unwrap_or(defaults.http.bind),
            port: raw.http.port.unwrap_or(defaults.http.port),
        },
        security: SecuritySettings { allowlist: raw.security.allowlist },
        candidates,
        selection,
        services: raw.services,
    })
}

fn convert_candidate(raw: RawCandidate, origin: &str) -> Result<Candidate, ConfigError> {
    let domain: Domain = raw.domain.parse()?;
    let key = Key::parse(&raw.key)?;
    if raw.provider.is_empty() {
        return Err(ConfigError::Conversion {
            path: origin.to_string(),
            message: format!("candidate {}/{} has an empty provider", domain, key),
        });
    }
    Ok(Candidate {
        domain,
        key,
        provider: raw.provider,
        factory: raw.factory,
        priority: raw.priority,
        stack_level: raw.stack_level,
        source: Source::LocalConfig,
        settings: raw.settings,
        capabilities: raw.capabilities.into_iter().collect(),
        metadata: Default::default(),
    })
}

fn secs(value: Option<u64>, default: Duration) -> Duration {
    value.map(Duration::from_secs).unwrap_or(default)
}

// ── Profiles ──────────────────────────────────────────────────────────────────

/// Named presets. `serverless` runs without watchers or remote sync but
/// keeps the supervisor.
pub fn apply_profile(settings: &mut Settings, profile: &str) -> Result<(), ConfigError> {
    match profile {
        "default" => {}
        "serverless" => {
            settings.watcher.enabled = false;
            settings.remote.enabled = false;
            settings.supervisor.enabled = true;
        }
        other => return Err(ConfigError::UnknownProfile(other.to_string())),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    fn write_config(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn sparse_file_gets_defaults() {
        let file = write_config("http:\n  port: 9000\n");
        let settings = convert(
            serde_yaml::from_str(&std::fs::read_to_string(file.path()).unwrap()).unwrap(),
            "test",
        )
        .unwrap();
        assert_eq!(settings.http.port, 9000);
        assert_eq!(settings.remote.refresh_interval, Duration::from_secs(300));
        assert!(!settings.remote.enabled);
    }

    #[test]
    fn candidates_and_selection_convert() {
        let yaml = r#"
candidates:
  - domain: adapter
    key: cache
    provider: memory
    factory: oneiric.adapters.memory:build
    priority: 10
selection:
  adapter:
    cache: memory
services: [worker]
"#;
        let settings = convert(serde_yaml::from_str(yaml).unwrap(), "test").unwrap();
        assert_eq!(settings.candidates.len(), 1);
        assert_eq!(settings.candidates[0].source, Source::LocalConfig);
        assert_eq!(
            settings.selection.get(Domain::Adapter, &Key::new("cache")),
            Some("memory")
        );
        assert_eq!(settings.services, vec!["worker"]);
    }

    #[test]
    fn unknown_candidate_domain_rejected() {
        let yaml = r#"
candidates:
  - domain: gadget
    key: cache
    provider: memory
    factory: oneiric.adapters.memory:build
"#;
        let raw: RawSettings = serde_yaml::from_str(yaml).unwrap();
        assert!(matches!(convert(raw, "test"), Err(ConfigError::Domain(_))));
    }

    #[test]
    fn env_overrides_nest_and_type() {
        let raw = RawSettings::default();
        let vars = vec![
            ("ONEIRIC_HTTP__PORT".to_string(), "9100".to_string()),
            ("ONEIRIC_WATCHER__ENABLED".to_string(), "false".to_string()),
            (
                "ONEIRIC_REMOTE__MANIFESTS".to_string(),
                "[https://a/m.json, https://b/m.json]".to_string(),
            ),
            ("ONEIRIC_PROFILE".to_string(), "serverless".to_string()),
            ("UNRELATED".to_string(), "ignored".to_string()),
        ];
        let raw = apply_env(raw, vars.into_iter(), "test").unwrap();
        let mut settings = convert(raw, "test").unwrap();
        let profile = settings.profile.clone().unwrap();
        apply_profile(&mut settings, &profile).unwrap();

        assert_eq!(settings.http.port, 9100);
        assert!(!settings.watcher.enabled);
        assert_eq!(settings.remote.manifests.len(), 2);
        assert!(!settings.remote.enabled, "serverless profile disables remote");
        assert!(!settings.watcher.enabled);
    }

    #[test]
    fn manifests_imply_remote_enabled() {
        let yaml = "remote:\n  manifests: [\"https://example.com/m.json\"]\n";
        let settings = convert(serde_yaml::from_str(yaml).unwrap(), "test").unwrap();
        assert!(settings.remote.enabled);
    }

    #[test]
    fn unknown_profile_rejected() {
        let mut settings = Settings::default();
        assert!(matches!(
            apply_profile(&mut settings, "galactic"),
            Err(ConfigError::UnknownProfile(_))
        ));
    }

    #[test]
    fn load_selection_parses_yaml() {
        let file = write_config("adapter:\n  cache: redis\n");
        let doc = load_selection(file.path()).unwrap();
        assert_eq!(doc.get(Domain::Adapter, &Key::new("cache")), Some("redis"));
    }
}
