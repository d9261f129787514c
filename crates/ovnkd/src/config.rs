//! Configuration management for ovnkd.
//!
//! Loads settings from /etc/ovnk/config.toml or uses defaults.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, warn};

/// Config file path
pub const CONFIG_PATH: &str = "/etc/ovnk/config.toml";

/// Default config file path for fallback
pub const DEFAULT_CONFIG_PATH: &str = "/var/lib/ovnk/config.toml";

/// Which operation families the daemon serves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Mode {
    LiveCluster,
    Offline,
    Both,
}

impl Mode {
    pub fn serves_live(&self) -> bool {
        matches!(self, Mode::LiveCluster | Mode::Both)
    }

    pub fn serves_offline(&self) -> bool {
        matches!(self, Mode::Offline | Mode::Both)
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Mode::LiveCluster => "live-cluster",
            Mode::Offline => "offline",
            Mode::Both => "both",
        })
    }
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "live-cluster" => Ok(Mode::LiveCluster),
            "offline" => Ok(Mode::Offline),
            "both" => Ok(Mode::Both),
            other => Err(format!(
                "unknown mode '{}' (expected live-cluster, offline or both)",
                other
            )),
        }
    }
}

/// Daemon configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default = "default_mode")]
    pub mode: Mode,

    #[serde(default = "default_socket_path")]
    pub socket_path: String,

    /// Filter directive used when RUST_LOG is not set
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_mode() -> Mode {
    Mode::LiveCluster
}

fn default_socket_path() -> String {
    ovnk_common::SOCKET_PATH.to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            mode: default_mode(),
            socket_path: default_socket_path(),
            log_level: default_log_level(),
        }
    }
}

/// Cluster access and debug pod lifecycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    #[serde(default = "default_kubectl_path")]
    pub kubectl_path: String,

    #[serde(default)]
    pub kubeconfig: Option<String>,

    /// Namespace debug pods are created in
    #[serde(default = "default_debug_namespace")]
    pub debug_namespace: String,

    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Bound on waiting for a debug pod to reach Running
    #[serde(default = "default_ready_timeout")]
    pub ready_timeout_secs: u64,

    /// Bound on a single teardown, independent of the request
    #[serde(default = "default_teardown_grace")]
    pub teardown_grace_secs: u64,
}

fn default_kubectl_path() -> String {
    "kubectl".to_string()
}

fn default_debug_namespace() -> String {
    "default".to_string()
}

fn default_poll_interval() -> u64 {
    500
}

fn default_ready_timeout() -> u64 {
    60
}

fn default_teardown_grace() -> u64 {
    30
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            kubectl_path: default_kubectl_path(),
            kubeconfig: None,
            debug_namespace: default_debug_namespace(),
            poll_interval_ms: default_poll_interval(),
            ready_timeout_secs: default_ready_timeout(),
            teardown_grace_secs: default_teardown_grace(),
        }
    }
}

impl ClusterConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_secs(self.ready_timeout_secs)
    }

    pub fn teardown_grace(&self) -> Duration {
        Duration::from_secs(self.teardown_grace_secs)
    }
}

/// Images for tools that ship their own debug image
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageConfig {
    #[serde(default = "default_tcpdump_image")]
    pub tcpdump_image: String,

    #[serde(default = "default_pwru_image")]
    pub pwru_image: String,
}

fn default_tcpdump_image() -> String {
    "nicolaka/netshoot:v0.13".to_string()
}

fn default_pwru_image() -> String {
    "docker.io/cilium/pwru:v1.0.10".to_string()
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            tcpdump_image: default_tcpdump_image(),
            pwru_image: default_pwru_image(),
        }
    }
}

/// Local tools used against support archives
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfflineConfig {
    #[serde(default = "default_omc_path")]
    pub omc_path: String,

    #[serde(default = "default_ovsdb_tool_path")]
    pub ovsdb_tool_path: String,
}

fn default_omc_path() -> String {
    "omc".to_string()
}

fn default_ovsdb_tool_path() -> String {
    "ovsdb-tool".to_string()
}

impl Default for OfflineConfig {
    fn default() -> Self {
        Self {
            omc_path: default_omc_path(),
            ovsdb_tool_path: default_ovsdb_tool_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "default_max_lines")]
    pub default_max_lines: usize,
}

fn default_max_lines() -> usize {
    ovnk_common::output::DEFAULT_MAX_LINES
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            default_max_lines: default_max_lines(),
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub daemon: DaemonConfig,

    #[serde(default)]
    pub cluster: ClusterConfig,

    #[serde(default)]
    pub images: ImageConfig,

    #[serde(default)]
    pub offline: OfflineConfig,

    #[serde(default)]
    pub output: OutputConfig,
}

impl Config {
    /// Load config from file, or return defaults
    pub fn load() -> Self {
        Self::load_from_path(CONFIG_PATH)
            .or_else(|_| Self::load_from_path(DEFAULT_CONFIG_PATH))
            .unwrap_or_else(|e| {
                warn!("Config not found, using defaults: {}", e);
                Config::default()
            })
    }

    /// Load config from specific path
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        info!("Loaded config from {}", path.display());
        Ok(config)
    }
}
