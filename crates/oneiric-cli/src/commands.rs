use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use oneiric_config::{apply_profile, load_settings, ConfigError};
use oneiric_domain::{Domain, Key};
use oneiric_runtime::{Runtime, RuntimeError};
use oneiric_security::{canonical_json, sha256_hex};
use tracing::info;

use crate::cli::{Cli, Command, ManifestCommand};
use crate::output;

/// Dispatch a parsed invocation; returns the process exit code.
pub async fn run(cli: Cli) -> Result<i32, RuntimeError> {
    let config = cli.config.clone();
    let json = cli.json;
    match cli.command {
        Command::List { domain } => list(config, domain, json).await,
        Command::Explain { domain, key } => explain(config, domain, key, json).await,
        Command::Swap { domain, key, provider } => swap(config, domain, key, provider, json).await,
        Command::Status => status(config, json).await,
        Command::Health { probe } => health(config, probe, json).await,
        Command::Pause { domain, key, reason } => pause(config, domain, key, reason).await,
        Command::Resume { domain, key } => resume(config, domain, key).await,
        Command::Drain { domain, key } => drain(config, domain, key).await,
        Command::Activity => activity(config, json).await,
        Command::RemoteSync { manifest, refresh_interval } => {
            remote_sync(config, manifest, refresh_interval, json).await
        }
        Command::RemoteStatus => remote_status(config, json).await,
        Command::Orchestrate { profile, http_port, no_remote, health_path } => {
            orchestrate(config, profile, http_port, no_remote, health_path).await
        }
        Command::Manifest { command } => match command {
            ManifestCommand::Pack { input, output } => manifest_pack(input, output).await,
        },
    }
}

fn parse_slot(domain: &str, key: &str) -> Result<(Domain, Key), RuntimeError> {
    let domain: Domain = domain.parse().map_err(ConfigError::from)?;
    let key = Key::parse(key).map_err(ConfigError::from)?;
    Ok((domain, key))
}

/// Build a runtime for a one-shot command: registrations only, no
/// background loops.
fn one_shot(config: Option<PathBuf>) -> Result<Arc<Runtime>, RuntimeError> {
    let mut settings = load_settings(config.as_deref())?;
    settings.watcher.enabled = false;
    settings.supervisor.enabled = false;
    let runtime = Runtime::build(settings)?;
    runtime.boot_registry();
    Ok(runtime)
}

async fn list(
    config: Option<PathBuf>,
    domain: Option<String>,
    json: bool,
) -> Result<i32, RuntimeError> {
    let domain = domain
        .map(|d| d.parse::<Domain>().map_err(ConfigError::from))
        .transpose()?;
    let runtime = one_shot(config)?;
    let rows = runtime.list(domain).await;
    if json {
        println!("{}", serde_json::to_string_pretty(&rows).unwrap_or_default());
    } else {
        print!("{}", output::render_slots(&rows));
    }
    Ok(0)
}

async fn explain(
    config: Option<PathBuf>,
    domain: String,
    key: String,
    json: bool,
) -> Result<i32, RuntimeError> {
    let (domain, key) = parse_slot(&domain, &key)?;
    let runtime = one_shot(config)?;
    let trace = runtime.explain(domain, &key);
    if json {
        println!("{}", serde_json::to_string_pretty(&trace).unwrap_or_default());
    } else {
        print!("{}", output::render_trace(&trace));
    }
    Ok(0)
}

async fn swap(
    config: Option<PathBuf>,
    domain: String,
    key: String,
    provider: String,
    json: bool,
) -> Result<i32, RuntimeError> {
    let (domain, key) = parse_slot(&domain, &key)?;
    let runtime = one_shot(config)?;
    let record = runtime.swap(domain, &key, &provider).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&record).unwrap_or_default());
    } else {
        println!(
            "swapped {}/{}: {} -> {}",
            domain,
            key,
            record.outgoing.as_deref().unwrap_or("-"),
            record.incoming
        );
    }
    runtime.shutdown().await;
    Ok(0)
}

async fn status(config: Option<PathBuf>, json: bool) -> Result<i32, RuntimeError> {
    let runtime = one_shot(config)?;
    let entries = runtime.status().await;
    if json {
        println!("{}", serde_json::to_string_pretty(&entries).unwrap_or_default());
    } else {
        print!("{}", output::render_status(&entries));
    }
    Ok(0)
}

async fn health(config: Option<PathBuf>, probe: bool, json: bool) -> Result<i32, RuntimeError> {
    let settings = load_settings(config.as_deref())?;

    // Prefer the snapshot an orchestrator wrote; fall back to an
    // in-process view.
    let snapshot = match settings
        .supervisor
        .snapshot_path
        .as_ref()
        .filter(|p| p.exists())
    {
        Some(path) => {
            let bytes = std::fs::read(path).map_err(|e| RuntimeError::Io(e.to_string()))?;
            serde_json::from_slice(&bytes).map_err(|e| RuntimeError::Io(e.to_string()))?
        }
        None => {
            let runtime = one_shot(config)?;
            runtime.health().await
        }
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&snapshot).unwrap_or_default());
    } else {
        print!("{}", output::render_health(&snapshot));
    }
    if probe && !snapshot.ok {
        return Ok(2);
    }
    Ok(0)
}

async fn pause(
    config: Option<PathBuf>,
    domain: String,
    key: String,
    reason: Option<String>,
) -> Result<i32, RuntimeError> {
    let (domain, key) = parse_slot(&domain, &key)?;
    let runtime = one_shot(config)?;
    runtime.pause(domain, &key, reason).await?;
    println!("paused {}/{}", domain, key);
    Ok(0)
}

async fn resume(
    config: Option<PathBuf>,
    domain: String,
    key: String,
) -> Result<i32, RuntimeError> {
    let (domain, key) = parse_slot(&domain, &key)?;
    let runtime = one_shot(config)?;
    runtime.resume(domain, &key).await?;
    println!("resumed {}/{}", domain, key);
    Ok(0)
}

async fn drain(
    config: Option<PathBuf>,
    domain: String,
    key: String,
) -> Result<i32, RuntimeError> {
    let (domain, key) = parse_slot(&domain, &key)?;
    let runtime = one_shot(config)?;
    runtime.drain(domain, &key, None).await?;
    println!("draining {}/{}", domain, key);
    Ok(0)
}

async fn activity(config: Option<PathBuf>, json: bool) -> Result<i32, RuntimeError> {
    let runtime = one_shot(config)?;
    let records = runtime.activity().await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&records).unwrap_or_default());
    } else {
        print!("{}", output::render_activity(&records));
    }
    Ok(0)
}

async fn remote_sync(
    config: Option<PathBuf>,
    manifest: Option<String>,
    refresh_interval: Option<u64>,
    json: bool,
) -> Result<i32, RuntimeError> {
    let mut settings = load_settings(config.as_deref())?;
    settings.watcher.enabled = false;
    settings.supervisor.enabled = false;
    if let Some(url) = &manifest {
        if !settings.remote.manifests.contains(url) {
            settings.remote.manifests.push(url.clone());
        }
        settings.remote.enabled = true;
    }
    if let Some(seconds) = refresh_interval {
        settings.remote.refresh_interval = Duration::from_secs(seconds);
    }
    let interval = settings.remote.refresh_interval;
    let runtime = Runtime::build(settings)?;
    runtime.boot_registry();

    loop {
        let results = runtime.remote_sync(manifest.as_deref()).await?;
        let mut first_error = None;
        for (url, result) in results {
            match result {
                Ok(summary) => {
                    if json {
                        println!("{}", serde_json::to_string_pretty(&summary).unwrap_or_default());
                    } else if summary.unchanged {
                        println!("{url}: unchanged");
                    } else {
                        println!(
                            "{url}: +{} -{} ~{} ({} entry errors)",
                            summary.added,
                            summary.removed,
                            summary.updated,
                            summary.entry_errors.len()
                        );
                    }
                }
                Err(e) => {
                    eprintln!("{url}: {e}");
                    first_error.get_or_insert(e);
                }
            }
        }

        match refresh_interval {
            None => {
                return match first_error {
                    Some(e) => Err(e.into()),
                    None => Ok(0),
                }
            }
            Some(_) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => return Ok(0),
                    _ = tokio::time::sleep(interval) => {}
                }
            }
        }
    }
}

async fn remote_status(config: Option<PathBuf>, json: bool) -> Result<i32, RuntimeError> {
    let runtime = one_shot(config)?;
    let statuses = runtime.remote_status()?;
    if json {
        println!("{}", serde_json::to_string_pretty(&statuses).unwrap_or_default());
    } else {
        print!("{}", output::render_remote(&statuses));
    }
    Ok(0)
}

async fn orchestrate(
    config: Option<PathBuf>,
    profile: Option<String>,
    http_port: Option<u16>,
    no_remote: bool,
    health_path: Option<PathBuf>,
) -> Result<i32, RuntimeError> {
    let mut settings = load_settings(config.as_deref())?;
    if let Some(profile) = &profile {
        apply_profile(&mut settings, profile)?;
        settings.profile = Some(profile.clone());
    }
    if no_remote {
        settings.remote.enabled = false;
    }
    if let Some(port) = http_port {
        settings.http.port = port;
    }
    if let Some(path) = health_path {
        settings.supervisor.snapshot_path = Some(path);
    }
    let http_enabled = settings.http.enabled;
    let addr = format!("{}:{}", settings.http.bind, settings.http.port);

    let runtime = Runtime::build(settings)?;
    runtime.boot().await?;

    if http_enabled {
        oneiric_api::serve(runtime.clone(), &addr)
            .await
            .map_err(|e| RuntimeError::Io(e.to_string()))?;
    } else {
        info!("running without http endpoints, ctrl-c to stop");
        let _ = tokio::signal::ctrl_c().await;
    }

    runtime.shutdown().await;
    Ok(0)
}

async fn manifest_pack(input: PathBuf, output: PathBuf) -> Result<i32, RuntimeError> {
    let bytes = std::fs::read(&input).map_err(|e| RuntimeError::Io(e.to_string()))?;
    let doc = oneiric_remote::parse_document(&bytes)?;
    let canonical = canonical_json(&doc);
    std::fs::write(&output, &canonical).map_err(|e| RuntimeError::Io(e.to_string()))?;
    println!(
        "packed {} -> {} (sha256 {})",
        input.display(),
        output.display(),
        sha256_hex(&canonical)
    );
    Ok(0)
}
