//! Error types for the worker supervisor

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Failures of the process launcher collaborator
#[derive(Error, Debug)]
pub enum LaunchError {
    #[error("Program not found: {0}")]
    ProgramNotFound(String),

    #[error("Working directory does not exist: {0}")]
    WorkingDirMissing(PathBuf),

    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to open log file {path}: {source}")]
    LogFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Spawned process exited before its pid could be read")]
    NoPid,

    #[error("Failed to signal process {pid}: {reason}")]
    Signal { pid: u32, reason: String },
}

/// Control-plane error taxonomy
///
/// `AlreadyRunning` and `NotRunning` resolve to successful results at the
/// server boundary. Drift between the handle and the OS process table is
/// reconciled silently and never becomes an error.
#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error("Worker is already running (pid {pid})")]
    AlreadyRunning { pid: u32 },

    #[error("Worker is not running")]
    NotRunning,

    #[error("Failed to start worker: {0}")]
    SpawnFailure(#[from] LaunchError),

    #[error("Worker (pid {pid}) did not accept connections on port {port} within {waited_ms}ms", waited_ms = .waited.as_millis())]
    ReadinessTimeout {
        pid: u32,
        port: u16,
        waited: Duration,
    },

    #[error("Worker (pid {pid}) exited before it became ready")]
    ExitedDuringStartup { pid: u32 },

    #[error("Worker (pid {pid}) did not exit after forced termination; still alive: {survivors:?}")]
    TerminationTimeout { pid: u32, survivors: Vec<u32> },

    #[error("Port {port} is already in use by another program")]
    PortInUse { port: u16 },

    #[error("Lifecycle task failed: {0}")]
    TaskFailed(String),
}

impl SupervisorError {
    /// Errors that are reported as success (idempotent no-ops)
    pub fn is_benign(&self) -> bool {
        matches!(
            self,
            SupervisorError::AlreadyRunning { .. } | SupervisorError::NotRunning
        )
    }
}

/// Invalid configuration values
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{field} must not be zero")]
    Zero { field: &'static str },

    #[error("{interval} must not exceed {budget}")]
    IntervalExceedsBudget {
        interval: &'static str,
        budget: &'static str,
    },

    #[error("{field} = {host} is not a loopback address; set daemon.allow_remote = true to allow it")]
    NotLoopback { field: &'static str, host: String },

    #[error("daemon.port and worker.port must differ (both {0})")]
    PortClash(u16),

    #[error("worker.program must not be empty")]
    EmptyProgram,
}
