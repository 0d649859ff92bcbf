//! Daemon configuration
//!
//! Loaded from TOML. Search order:
//! 1. Explicit `--config` path
//! 2. `OD_DAEMON_CONFIG` env var
//! 3. `./od-daemon.toml`
//! 4. `$XDG_CONFIG_HOME/od-daemon/config.toml`
//! 5. `~/.od-daemon.toml`
//! 6. Built-in defaults
//!
//! An explicit or env-provided file that fails to parse is an error; files
//! found by searching are skipped with a warning.

use std::collections::HashMap;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::types::{LaunchSpec, WorkerAddress};

pub const CONFIG_ENV_VAR: &str = "OD_DAEMON_CONFIG";

// ============================================================================
// Configuration Types
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Address the daemon's MCP endpoint binds to
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_daemon_port")]
    pub port: u16,
    /// Stop the worker when the daemon shuts down
    #[serde(default)]
    pub stop_worker_on_exit: bool,
    /// Permit non-loopback hosts for the daemon and worker
    #[serde(default)]
    pub allow_remote: bool,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_daemon_port() -> u16 {
    23002
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_daemon_port(),
            stop_worker_on_exit: false,
            allow_remote: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerConfig {
    #[serde(default = "default_program")]
    pub program: String,
    #[serde(default = "default_args")]
    pub args: Vec<String>,
    /// Working directory for the worker (project root)
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_worker_port")]
    pub port: u16,
    /// Append `--host <host> --port <port>` to the worker arguments
    #[serde(default = "default_true")]
    pub append_address_args: bool,
    /// Command-line substring identifying a worker started outside the daemon
    #[serde(default = "default_match_pattern")]
    pub match_pattern: Option<String>,
    /// Take over a matching worker found in the process table
    #[serde(default = "default_true")]
    pub adopt_existing: bool,
    /// Append worker stdout/stderr to this file
    #[serde(default)]
    pub log_file: Option<PathBuf>,
}

fn default_program() -> String {
    "uv".to_string()
}

fn default_args() -> Vec<String> {
    ["run", "--env-file", ".env", "python", "src/zzz_mcp/zzz_mcp_server.py"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_worker_port() -> u16 {
    23001
}

fn default_true() -> bool {
    true
}

fn default_match_pattern() -> Option<String> {
    Some("zzz_mcp_server.py".to_string())
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            program: default_program(),
            args: default_args(),
            working_dir: None,
            env: HashMap::new(),
            host: default_host(),
            port: default_worker_port(),
            append_address_args: true,
            match_pattern: default_match_pattern(),
            adopt_existing: true,
            log_file: None,
        }
    }
}

/// Every wait in the control plane is bounded by one of these (milliseconds)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutConfig {
    #[serde(default = "default_readiness_timeout")]
    pub readiness_timeout_ms: u64,
    #[serde(default = "default_probe_interval")]
    pub probe_interval_ms: u64,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_stop_grace")]
    pub stop_grace_ms: u64,
    #[serde(default = "default_kill_timeout")]
    pub kill_timeout_ms: u64,
    #[serde(default = "default_exit_poll_interval")]
    pub exit_poll_interval_ms: u64,
    #[serde(default = "default_port_release_timeout")]
    pub port_release_timeout_ms: u64,
    #[serde(default = "default_cpu_sample")]
    pub cpu_sample_ms: u64,
}

fn default_readiness_timeout() -> u64 {
    30_000
}

fn default_probe_interval() -> u64 {
    250
}

fn default_connect_timeout() -> u64 {
    500
}

fn default_stop_grace() -> u64 {
    5_000
}

fn default_kill_timeout() -> u64 {
    3_000
}

fn default_exit_poll_interval() -> u64 {
    100
}

fn default_port_release_timeout() -> u64 {
    2_000
}

fn default_cpu_sample() -> u64 {
    200
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            readiness_timeout_ms: default_readiness_timeout(),
            probe_interval_ms: default_probe_interval(),
            connect_timeout_ms: default_connect_timeout(),
            stop_grace_ms: default_stop_grace(),
            kill_timeout_ms: default_kill_timeout(),
            exit_poll_interval_ms: default_exit_poll_interval(),
            port_release_timeout_ms: default_port_release_timeout(),
            cpu_sample_ms: default_cpu_sample(),
        }
    }
}

/// Control-plane timing, as durations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub readiness: Duration,
    pub probe_interval: Duration,
    pub connect: Duration,
    pub stop_grace: Duration,
    pub kill: Duration,
    pub exit_poll_interval: Duration,
    pub port_release: Duration,
    pub cpu_sample: Duration,
}

impl From<&TimeoutConfig> for Timeouts {
    fn from(t: &TimeoutConfig) -> Self {
        Self {
            readiness: Duration::from_millis(t.readiness_timeout_ms),
            probe_interval: Duration::from_millis(t.probe_interval_ms),
            connect: Duration::from_millis(t.connect_timeout_ms),
            stop_grace: Duration::from_millis(t.stop_grace_ms),
            kill: Duration::from_millis(t.kill_timeout_ms),
            exit_poll_interval: Duration::from_millis(t.exit_poll_interval_ms),
            port_release: Duration::from_millis(t.port_release_timeout_ms),
            cpu_sample: Duration::from_millis(t.cpu_sample_ms),
        }
    }
}

// ============================================================================
// Loading
// ============================================================================

impl Config {
    /// Load config from the standard locations; returns the file used, if any
    pub fn load(explicit: Option<&Path>) -> Result<(Self, Option<PathBuf>)> {
        if let Some(path) = explicit {
            let config = Self::load_from_path(path)?;
            tracing::info!("Loaded config from {}", path.display());
            return Ok((config, Some(path.to_path_buf())));
        }

        if let Ok(env_path) = std::env::var(CONFIG_ENV_VAR) {
            let path = PathBuf::from(&env_path);
            if path.exists() {
                let config = Self::load_from_path(&path)?;
                tracing::info!("Loaded config from {}={}", CONFIG_ENV_VAR, path.display());
                return Ok((config, Some(path)));
            }
            tracing::warn!("{}={} does not exist", CONFIG_ENV_VAR, env_path);
        }

        for path in Self::search_paths() {
            if !path.exists() {
                continue;
            }
            match Self::load_from_path(&path) {
                Ok(config) => {
                    tracing::info!("Loaded config from {}", path.display());
                    return Ok((config, Some(path)));
                }
                Err(e) => {
                    tracing::warn!("Skipping config {}: {:#}", path.display(), e);
                }
            }
        }

        tracing::info!("Using default configuration");
        Ok((Self::default(), None))
    }

    /// Load from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config {}", path.display()))
    }

    fn search_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from("od-daemon.toml")];
        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("od-daemon").join("config.toml"));
        }
        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(".od-daemon.toml"));
        }
        paths
    }

    // ========================================================================
    // Validation and derived views
    // ========================================================================

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.daemon.port == 0 {
            return Err(ConfigError::Zero { field: "daemon.port" });
        }
        if self.worker.port == 0 {
            return Err(ConfigError::Zero { field: "worker.port" });
        }
        if self.daemon.port == self.worker.port && self.daemon.host == self.worker.host {
            return Err(ConfigError::PortClash(self.daemon.port));
        }
        if self.worker.program.trim().is_empty() {
            return Err(ConfigError::EmptyProgram);
        }

        let t = &self.timeouts;
        for (field, value) in [
            ("timeouts.readiness_timeout_ms", t.readiness_timeout_ms),
            ("timeouts.probe_interval_ms", t.probe_interval_ms),
            ("timeouts.connect_timeout_ms", t.connect_timeout_ms),
            ("timeouts.stop_grace_ms", t.stop_grace_ms),
            ("timeouts.kill_timeout_ms", t.kill_timeout_ms),
            ("timeouts.exit_poll_interval_ms", t.exit_poll_interval_ms),
            ("timeouts.cpu_sample_ms", t.cpu_sample_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::Zero { field });
            }
        }
        if t.probe_interval_ms > t.readiness_timeout_ms {
            return Err(ConfigError::IntervalExceedsBudget {
                interval: "timeouts.probe_interval_ms",
                budget: "timeouts.readiness_timeout_ms",
            });
        }
        if t.exit_poll_interval_ms > t.stop_grace_ms {
            return Err(ConfigError::IntervalExceedsBudget {
                interval: "timeouts.exit_poll_interval_ms",
                budget: "timeouts.stop_grace_ms",
            });
        }

        if !self.daemon.allow_remote {
            for (field, host) in [
                ("daemon.host", &self.daemon.host),
                ("worker.host", &self.worker.host),
            ] {
                if !is_loopback(host) {
                    return Err(ConfigError::NotLoopback {
                        field,
                        host: host.clone(),
                    });
                }
            }
        }

        Ok(())
    }

    pub fn worker_address(&self) -> WorkerAddress {
        WorkerAddress::new(self.worker.host.clone(), self.worker.port)
    }

    pub fn timeouts(&self) -> Timeouts {
        Timeouts::from(&self.timeouts)
    }

    /// Launch spec for the worker, with the address arguments appended
    pub fn launch_spec(&self) -> LaunchSpec {
        let mut args = self.worker.args.clone();
        if self.worker.append_address_args {
            args.extend([
                "--host".to_string(),
                self.worker.host.clone(),
                "--port".to_string(),
                self.worker.port.to_string(),
            ]);
        }
        LaunchSpec {
            program: self.worker.program.clone(),
            args,
            working_dir: self.worker.working_dir.clone(),
            env: self.worker.env.clone(),
            log_file: self.worker.log_file.clone(),
        }
    }
}

fn is_loopback(host: &str) -> bool {
    host.eq_ignore_ascii_case("localhost")
        || host
            .parse::<IpAddr>()
            .map(|ip| ip.is_loopback())
            .unwrap_or(false)
}
