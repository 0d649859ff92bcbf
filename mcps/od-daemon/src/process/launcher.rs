//! Worker process creation and termination

use std::fs::OpenOptions;
use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;

use crate::error::LaunchError;
use crate::types::LaunchSpec;

/// Creates and signals OS processes
#[async_trait]
pub trait ProcessLauncher: Send + Sync {
    /// Start `spec` detached from the daemon and return its pid
    async fn spawn(&self, spec: &LaunchSpec) -> Result<u32, LaunchError>;

    /// Ask `pid` to exit (SIGTERM where the platform has it)
    async fn terminate(&self, pid: u32) -> Result<(), LaunchError>;

    /// Force `pid` to exit
    async fn kill(&self, pid: u32) -> Result<(), LaunchError>;
}

/// [`ProcessLauncher`] that spawns real processes with `tokio::process`
///
/// Spawned children are reaped by a background task that logs their exit
/// status, so an exited worker never lingers as a zombie.
#[derive(Debug, Clone, Default)]
pub struct SystemLauncher;

impl SystemLauncher {
    pub fn new() -> Self {
        Self
    }

    fn build_command(spec: &LaunchSpec) -> Result<Command, LaunchError> {
        if let Some(dir) = &spec.working_dir {
            if !dir.is_dir() {
                return Err(LaunchError::WorkingDirMissing(dir.clone()));
            }
        }

        // Explicit paths are checked up front; bare names are resolved via PATH at spawn
        let program_path = Path::new(&spec.program);
        if program_path.components().count() > 1 {
            let resolved = match &spec.working_dir {
                Some(dir) if program_path.is_relative() => dir.join(program_path),
                _ => program_path.to_path_buf(),
            };
            if !resolved.exists() {
                return Err(LaunchError::ProgramNotFound(spec.program.clone()));
            }
        }

        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args).stdin(Stdio::null());

        if let Some(dir) = &spec.working_dir {
            cmd.current_dir(dir);
        }
        for (key, value) in &spec.env {
            cmd.env(key, value);
        }

        match &spec.log_file {
            Some(path) => {
                let open_err = |source| LaunchError::LogFile {
                    path: path.clone(),
                    source,
                };
                let stdout = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .map_err(open_err)?;
                let stderr = stdout.try_clone().map_err(open_err)?;
                cmd.stdout(Stdio::from(stdout)).stderr(Stdio::from(stderr));
            }
            None => {
                cmd.stdout(Stdio::null()).stderr(Stdio::null());
            }
        }

        detach(&mut cmd);
        Ok(cmd)
    }
}

/// Put the worker in its own process group so terminal signals aimed at the
/// daemon do not reach it
#[cfg(unix)]
fn detach(cmd: &mut Command) {
    cmd.process_group(0);
}

#[cfg(windows)]
fn detach(cmd: &mut Command) {
    const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
    const CREATE_NO_WINDOW: u32 = 0x0800_0000;
    cmd.creation_flags(CREATE_NEW_PROCESS_GROUP | CREATE_NO_WINDOW);
}

#[cfg(not(any(unix, windows)))]
fn detach(_cmd: &mut Command) {}

#[async_trait]
impl ProcessLauncher for SystemLauncher {
    async fn spawn(&self, spec: &LaunchSpec) -> Result<u32, LaunchError> {
        let mut cmd = Self::build_command(spec)?;

        let mut child = cmd.spawn().map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                LaunchError::ProgramNotFound(spec.program.clone())
            } else {
                LaunchError::Spawn {
                    program: spec.program.clone(),
                    source,
                }
            }
        })?;

        let pid = child.id().ok_or(LaunchError::NoPid)?;
        tracing::debug!("Spawned {} as pid {}", spec.program, pid);

        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) => tracing::info!("Worker process {} exited: {}", pid, status),
                Err(e) => tracing::warn!("Failed to wait on worker process {}: {}", pid, e),
            }
        });

        Ok(pid)
    }

    async fn terminate(&self, pid: u32) -> Result<(), LaunchError> {
        signal(pid, Signal::Terminate)
    }

    async fn kill(&self, pid: u32) -> Result<(), LaunchError> {
        signal(pid, Signal::Kill)
    }
}

#[derive(Debug, Clone, Copy)]
enum Signal {
    Terminate,
    Kill,
}

/// A pid that is already gone counts as signalled
#[cfg(unix)]
fn signal(pid: u32, signal: Signal) -> Result<(), LaunchError> {
    // kill(0, ..) would hit our own process group
    let raw = libc::pid_t::try_from(pid)
        .ok()
        .filter(|raw| *raw > 0)
        .ok_or_else(|| LaunchError::Signal {
            pid,
            reason: "pid out of range".to_string(),
        })?;
    let signum = match signal {
        Signal::Terminate => libc::SIGTERM,
        Signal::Kill => libc::SIGKILL,
    };

    if unsafe { libc::kill(raw, signum) } == 0 {
        return Ok(());
    }

    let err = std::io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::ESRCH) {
        return Ok(());
    }
    Err(LaunchError::Signal {
        pid,
        reason: err.to_string(),
    })
}

/// Windows has no graceful signal for console-less processes; both map to
/// TerminateProcess via sysinfo
#[cfg(not(unix))]
fn signal(pid: u32, signal: Signal) -> Result<(), LaunchError> {
    use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};

    let target = Pid::from_u32(pid);
    let mut sys = System::new();
    sys.refresh_processes_specifics(
        ProcessesToUpdate::Some(&[target]),
        true,
        ProcessRefreshKind::new(),
    );

    let Some(process) = sys.process(target) else {
        return Ok(());
    };

    let delivered = match signal {
        Signal::Terminate => process
            .kill_with(sysinfo::Signal::Term)
            .unwrap_or_else(|| process.kill()),
        Signal::Kill => process.kill(),
    };

    if delivered {
        Ok(())
    } else {
        Err(LaunchError::Signal {
            pid,
            reason: "termination request was refused".to_string(),
        })
    }
}
