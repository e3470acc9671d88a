use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(
    name = "oneiric",
    about = "Resolution and hot-swap runtime for pluggable components",
    version
)]
pub struct Cli {
    /// Path to the settings file.
    #[arg(long, env = "ONEIRIC_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Emit machine-readable JSON instead of tables.
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// List slots with their resolution, live state and activity.
    List {
        /// Filter to one domain.
        #[arg(long)]
        domain: Option<String>,
    },

    /// Show the full resolution trace for a slot, shadowed entries
    /// included.
    Explain { domain: String, key: String },

    /// Swap a slot to a specific provider.
    Swap {
        domain: String,
        key: String,
        #[arg(long)]
        provider: String,
    },

    /// Show live lifecycle state for every slot.
    Status,

    /// Report readiness and per-entry health.
    Health {
        /// Exit non-zero when unhealthy (for use as a liveness probe).
        #[arg(long)]
        probe: bool,
    },

    /// Reject new work for a slot; the instance stays resident.
    Pause {
        domain: String,
        key: String,
        #[arg(long)]
        reason: Option<String>,
    },

    /// Accept work again after a pause.
    Resume { domain: String, key: String },

    /// Reject new work and tear down once in-flight work completes.
    Drain { domain: String, key: String },

    /// Show persisted activity state.
    Activity,

    /// Fetch, verify and apply remote manifests.
    RemoteSync {
        /// Sync one manifest URI instead of the configured set.
        #[arg(long)]
        manifest: Option<String>,

        /// Keep syncing on this interval instead of exiting.
        #[arg(long)]
        refresh_interval: Option<u64>,
    },

    /// Show per-manifest breaker and sync state.
    RemoteStatus,

    /// Run the long-lived coordinator: registry, remote loop, watcher,
    /// supervisor and HTTP endpoints.
    Orchestrate {
        /// Apply a named settings profile (e.g. `serverless`).
        #[arg(long)]
        profile: Option<String>,

        #[arg(long)]
        http_port: Option<u16>,

        /// Disable remote manifest sync for this run.
        #[arg(long)]
        no_remote: bool,

        /// Write the periodic health snapshot to this file.
        #[arg(long)]
        health_path: Option<PathBuf>,
    },

    /// Manifest tooling.
    Manifest {
        #[command(subcommand)]
        command: ManifestCommand,
    },
}

#[derive(Debug, Subcommand)]
pub enum ManifestCommand {
    /// Canonicalize a YAML/JSON manifest into the signed byte form.
    Pack {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        output: PathBuf,
    },
}
