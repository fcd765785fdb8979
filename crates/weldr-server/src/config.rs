//! Command line and configuration file.
//!
//! Settings come from an optional TOML file; command line flags override it.

use crate::{Listener, ServerError};
use clap::Parser;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use weldr_backend::{
    Catalog, CatalogDepsolver, Depsolver, InMemoryJobQueue, RegistryConfig, RepoRegistry,
    StaticRepoRegistry, DEFAULT_REQUEST_TIMEOUT,
};
use weldr_core::{Adapters, WeldrConfig};

pub const DEFAULT_SOCKET: &str = "/run/weldr/api.socket";
pub const DEFAULT_STATE_DIR: &str = "/var/lib/weldr";

#[derive(Debug, Parser)]
#[command(
    name = "weldr",
    version,
    about = "Blueprint and compose control plane serving the Weldr API"
)]
pub struct Cli {
    /// Unix socket to listen on.
    #[arg(long)]
    pub socket: Option<PathBuf>,

    /// Listen on a TCP address instead of the Unix socket (tests and debugging).
    #[arg(long)]
    pub listen: Option<String>,

    /// Directory holding state.json and compose artifacts.
    #[arg(long)]
    pub state_dir: Option<PathBuf>,

    /// TOML configuration file.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Enable verbose (debug) logging output.
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,

    /// Enable trace-level logging (more detailed than --verbose).
    #[arg(long, default_value_t = false)]
    pub trace: bool,
}

impl Cli {
    /// Log level implied by the flags, if any.
    pub fn log_level(&self) -> Option<&'static str> {
        if self.trace {
            Some("trace")
        } else if self.verbose {
            Some("debug")
        } else {
            None
        }
    }
}

/// Contents of the configuration file. Every key is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub socket: Option<PathBuf>,
    pub listen: Option<String>,
    pub state_dir: Option<PathBuf>,
    /// JSON package catalog the depsolver resolves against.
    pub catalog: Option<PathBuf>,
    pub request_timeout_secs: Option<u64>,
    /// Run the in-process worker that completes queued builds.
    pub local_worker: Option<bool>,
    /// Host distribution, architectures, image types, and system repositories.
    pub registry: Option<RegistryConfig>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self, ServerError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ServerError::Config(format!("failed to read {}: {e}", path.display())))?;
        toml::from_str(&text)
            .map_err(|e| ServerError::Config(format!("invalid config {}: {e}", path.display())))
    }
}

/// Effective settings after merging the file and the flags.
#[derive(Debug, Clone)]
pub struct Settings {
    pub listener: Listener,
    pub state_dir: PathBuf,
    pub catalog: Option<PathBuf>,
    pub request_timeout: Duration,
    pub local_worker: bool,
    pub registry: Option<RegistryConfig>,
}

impl Settings {
    pub fn resolve(cli: &Cli) -> Result<Self, ServerError> {
        let file = match &cli.config {
            Some(path) => FileConfig::load(path)?,
            None => FileConfig::default(),
        };
        Ok(Self::merge(cli, file))
    }

    pub fn merge(cli: &Cli, file: FileConfig) -> Self {
        let listener = match (&cli.listen, &cli.socket) {
            (Some(addr), _) => Listener::Tcp(addr.clone()),
            (None, Some(path)) => Listener::Unix(path.clone()),
            (None, None) => match (file.listen, file.socket) {
                (Some(addr), _) => Listener::Tcp(addr),
                (None, Some(path)) => Listener::Unix(path),
                (None, None) => Listener::Unix(PathBuf::from(DEFAULT_SOCKET)),
            },
        };
        Self {
            listener,
            state_dir: cli
                .state_dir
                .clone()
                .or(file.state_dir)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_STATE_DIR)),
            catalog: file.catalog,
            request_timeout: file
                .request_timeout_secs
                .map_or(DEFAULT_REQUEST_TIMEOUT, Duration::from_secs),
            local_worker: file.local_worker.unwrap_or(true),
            registry: file.registry,
        }
    }

    pub fn weldr_config(&self) -> WeldrConfig {
        WeldrConfig {
            state_dir: self.state_dir.clone(),
            request_timeout: self.request_timeout,
        }
    }

    /// Build the adapters. The in-memory queue is returned separately so a
    /// local worker can be attached to it.
    pub fn adapters(&self) -> Result<(Adapters, Arc<InMemoryJobQueue>), ServerError> {
        let registry: Arc<dyn RepoRegistry> = match &self.registry {
            Some(config) => Arc::new(StaticRepoRegistry::from_config(config.clone())?),
            None => Arc::new(StaticRepoRegistry::fedora_default()),
        };
        let depsolver: Arc<dyn Depsolver> = match &self.catalog {
            Some(path) => Arc::new(CatalogDepsolver::from_file(path)?),
            None => Arc::new(CatalogDepsolver::new(Catalog::default())),
        };
        let queue = Arc::new(InMemoryJobQueue::new());
        let adapters = Adapters {
            depsolver,
            queue: queue.clone(),
            registry,
        };
        Ok((adapters, queue))
    }
}
