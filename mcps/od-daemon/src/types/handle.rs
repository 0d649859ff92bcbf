//! Worker identity and lifecycle types

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Host/port the worker listens on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerAddress {
    pub host: String,
    pub port: u16,
}

impl WorkerAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for WorkerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Lifecycle state of the managed worker
///
/// `Absent → Starting → Running → Stopping → Absent`, with `Crashed` reached
/// from `Starting`/`Running` when the process disappears on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Absent,
    Starting,
    Running,
    Stopping,
    Crashed,
}

impl LifecycleState {
    /// States that occupy the worker port (at most one handle may be in them)
    pub fn is_active(self) -> bool {
        matches!(self, LifecycleState::Starting | LifecycleState::Running)
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecycleState::Absent => write!(f, "absent"),
            LifecycleState::Starting => write!(f, "starting"),
            LifecycleState::Running => write!(f, "running"),
            LifecycleState::Stopping => write!(f, "stopping"),
            LifecycleState::Crashed => write!(f, "crashed"),
        }
    }
}

/// Everything needed to launch the worker process
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LaunchSpec {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    pub env: HashMap<String, String>,
    /// Append stdout/stderr here instead of discarding them
    pub log_file: Option<PathBuf>,
}

impl LaunchSpec {
    /// Program followed by its arguments
    pub fn command_line(&self) -> Vec<String> {
        std::iter::once(self.program.clone())
            .chain(self.args.iter().cloned())
            .collect()
    }
}

/// The supervisor's record of the worker it manages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManagedProcessHandle {
    pub pid: u32,
    pub started_at: DateTime<Utc>,
    pub address: WorkerAddress,
    pub command_line: Vec<String>,
    pub state: LifecycleState,
    /// Found already running instead of spawned by this daemon
    pub adopted: bool,
    /// Bumped for every new handle; lets readers notice a swap underneath them
    pub generation: u64,
}

impl ManagedProcessHandle {
    pub fn spawned(
        pid: u32,
        address: WorkerAddress,
        command_line: Vec<String>,
        generation: u64,
    ) -> Self {
        Self {
            pid,
            started_at: Utc::now(),
            address,
            command_line,
            state: LifecycleState::Starting,
            adopted: false,
            generation,
        }
    }

    pub fn adopted(pid: u32, address: WorkerAddress, generation: u64) -> Self {
        Self {
            pid,
            started_at: Utc::now(),
            address,
            command_line: Vec::new(),
            state: LifecycleState::Running,
            adopted: true,
            generation,
        }
    }
}
