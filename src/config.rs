//! Control-plane configuration, read from `.shipyard/hosting.toml`.
//!
//! ```toml
//! [server]
//! port = 5000
//! control_hosts = ["localhost", "api.localhost"]
//!
//! [runtime]
//! network = "app-network"
//! memory = "512m"
//! memory_swap = "1024m"
//!
//! [activity]
//! check_interval_secs = 30
//! inactivity_threshold_secs = 1800
//!
//! [reconcile]
//! strategy = "events"
//!
//! [proxy]
//! upstream_port = 80
//! address = "name"
//!
//! [store]
//! database_url = "https://db.example.com/database/hosting"
//! auth_url = "https://db.example.com/auth"
//! timeout_secs = 10
//! ```
//!
//! Every key is optional. Environment variables override the file:
//! `SHIPYARD_PORT`, `SHIPYARD_STORE_URL`, `SHIPYARD_AUTH_URL`,
//! `SHIPYARD_RECONCILE_STRATEGY`.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Default location of the config file relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = ".shipyard/hosting.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HostingConfig {
    pub server: ServerSection,
    pub runtime: RuntimeSection,
    pub activity: ActivitySection,
    pub reconcile: ReconcileSection,
    pub proxy: ProxySection,
    pub store: StoreSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub host: String,
    pub port: u16,
    /// Hosts served by the control API. Any other host is proxied.
    pub control_hosts: Vec<String>,
    /// Permissive CORS for a locally served UI.
    pub dev_mode: bool,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
            control_hosts: vec![
                "localhost".to_string(),
                "127.0.0.1".to_string(),
                "api.localhost".to_string(),
            ],
            dev_mode: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeSection {
    /// Network every project container is attached to.
    pub network: String,
    pub memory: String,
    pub memory_swap: String,
    pub cpu_quota: i64,
    pub cpu_period: i64,
    /// Seconds a container gets to exit after SIGTERM before it is killed.
    pub stop_grace_secs: u64,
    pub dockerfile: String,
    /// Parent of temporary clone directories; the system temp dir if unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clone_dir: Option<PathBuf>,
}

impl Default for RuntimeSection {
    fn default() -> Self {
        Self {
            network: "app-network".to_string(),
            memory: "512m".to_string(),
            memory_swap: "1024m".to_string(),
            cpu_quota: 100_000,
            cpu_period: 100_000,
            stop_grace_secs: 10,
            dockerfile: "Dockerfile".to_string(),
            clone_dir: None,
        }
    }
}

impl RuntimeSection {
    pub fn stop_grace(&self) -> Duration {
        Duration::from_secs(self.stop_grace_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ActivitySection {
    pub enabled: bool,
    pub check_interval_secs: u64,
    pub inactivity_threshold_secs: u64,
    /// Containers that are never auto-stopped, matched by exact name.
    pub infrastructure: Vec<String>,
    /// Containers whose name starts with this prefix are never auto-stopped.
    pub reserved_prefix: String,
}

impl Default for ActivitySection {
    fn default() -> Self {
        Self {
            enabled: true,
            check_interval_secs: 30,
            inactivity_threshold_secs: 1800,
            infrastructure: [
                "hosting_project-backend-1",
                "hosting_project-ui-1",
                "hosting_project-nginx-1",
                "backend-1",
                "ui-1",
                "nginx-1",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            reserved_prefix: "hosting_project-".to_string(),
        }
    }
}

impl ActivitySection {
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }

    pub fn inactivity_threshold(&self) -> Duration {
        Duration::from_secs(self.inactivity_threshold_secs)
    }
}

/// Which reconciliation strategy live sessions use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReconcileStrategy {
    /// Re-inspect every container on a fixed tick and diff.
    #[default]
    Poll,
    /// Follow the runtime's event feed; metrics on their own interval.
    Events,
}

impl FromStr for ReconcileStrategy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "poll" => Ok(Self::Poll),
            "events" => Ok(Self::Events),
            _ => anyhow::bail!(
                "Invalid reconcile strategy '{}'. Valid values: poll, events",
                s
            ),
        }
    }
}

impl std::fmt::Display for ReconcileStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Poll => write!(f, "poll"),
            Self::Events => write!(f, "events"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileSection {
    pub strategy: ReconcileStrategy,
    pub poll_interval_ms: u64,
    pub metrics_interval_ms: u64,
    /// How often a session re-reads its project list from the store.
    pub project_refresh_secs: u64,
    pub event_queue_capacity: usize,
}

impl Default for ReconcileSection {
    fn default() -> Self {
        Self {
            strategy: ReconcileStrategy::Poll,
            poll_interval_ms: 2000,
            metrics_interval_ms: 2000,
            project_refresh_secs: 30,
            event_queue_capacity: 64,
        }
    }
}

impl ReconcileSection {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn metrics_interval(&self) -> Duration {
        Duration::from_millis(self.metrics_interval_ms)
    }

    pub fn project_refresh(&self) -> Duration {
        Duration::from_secs(self.project_refresh_secs)
    }
}

/// How the proxy addresses a running container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyAddress {
    /// `http://<container-name>:<port>`, resolved by the network's DNS.
    #[default]
    Name,
    /// The container's IP address on the orchestration network.
    Ip,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxySection {
    pub upstream_port: u16,
    pub address: ProxyAddress,
    pub timeout_secs: u64,
}

impl Default for ProxySection {
    fn default() -> Self {
        Self {
            upstream_port: 80,
            address: ProxyAddress::Name,
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSection {
    /// Base URL of the remote project table service.
    pub database_url: String,
    /// Base URL of the remote identity service.
    pub auth_url: String,
    /// Per-request limit for both services.
    pub timeout_secs: u64,
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            database_url: String::new(),
            auth_url: String::new(),
            timeout_secs: 10,
        }
    }
}

impl StoreSection {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl HostingConfig {
    /// Load config from `path`, falling back to defaults when the file is
    /// missing, then apply environment overrides and validate.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            toml::from_str::<HostingConfig>(&content)
                .with_context(|| format!("Failed to parse {}", path.display()))?
        } else {
            Self::default()
        };

        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    pub fn default_path() -> PathBuf {
        PathBuf::from(DEFAULT_CONFIG_PATH)
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(port) = std::env::var("SHIPYARD_PORT") {
            self.server.port = port
                .parse()
                .with_context(|| format!("Invalid SHIPYARD_PORT '{}'", port))?;
        }
        if let Ok(url) = std::env::var("SHIPYARD_STORE_URL") {
            self.store.database_url = url;
        }
        if let Ok(url) = std::env::var("SHIPYARD_AUTH_URL") {
            self.store.auth_url = url;
        }
        if let Ok(strategy) = std::env::var("SHIPYARD_RECONCILE_STRATEGY") {
            self.reconcile.strategy = strategy.parse()?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        parse_memory(&self.runtime.memory).context("Invalid runtime.memory")?;
        parse_memory(&self.runtime.memory_swap).context("Invalid runtime.memory_swap")?;
        if self.activity.check_interval_secs == 0 {
            anyhow::bail!("activity.check_interval_secs must be greater than zero");
        }
        if self.reconcile.poll_interval_ms == 0 || self.reconcile.metrics_interval_ms == 0 {
            anyhow::bail!("reconcile intervals must be greater than zero");
        }
        if self.reconcile.event_queue_capacity == 0 {
            anyhow::bail!("reconcile.event_queue_capacity must be greater than zero");
        }
        if self.runtime.network.is_empty() {
            anyhow::bail!("runtime.network must not be empty");
        }
        if self.store.timeout_secs == 0 {
            anyhow::bail!("store.timeout_secs must be greater than zero");
        }
        Ok(())
    }

    /// Render the effective configuration as TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration")
    }
}

/// Parse a memory size such as `512m`, `2g`, `1024k` or `1048576` into bytes.
pub fn parse_memory(value: &str) -> Result<i64> {
    let value = value.trim().to_lowercase();
    let (digits, multiplier) = match value.chars().last() {
        Some('b') => (&value[..value.len() - 1], 1),
        Some('k') => (&value[..value.len() - 1], 1024),
        Some('m') => (&value[..value.len() - 1], 1024 * 1024),
        Some('g') => (&value[..value.len() - 1], 1024 * 1024 * 1024),
        Some(c) if c.is_ascii_digit() => (value.as_str(), 1),
        _ => anyhow::bail!("Invalid memory size '{}'", value),
    };
    let amount: i64 = digits
        .parse()
        .with_context(|| format!("Invalid memory size '{}'", value))?;
    Ok(amount * multiplier)
}
