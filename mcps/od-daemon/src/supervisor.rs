//! Worker lifecycle supervisor
//!
//! Owns the single [`ManagedProcessHandle`] and is the only thing allowed to
//! change it. Two locks are involved:
//!
//! - the *operation lock* serialises `start`, `stop` and `restart` for their
//!   whole duration, including the readiness and exit waits
//! - the *handle lock* guards the handle itself and is only held for the
//!   instant of a read or a transition
//!
//! Each lifecycle operation runs in its own task that owns the operation
//! lock guard. If the caller gives up (RPC deadline, dropped future) the task
//! still finishes the transition, so the handle never goes stale and a spawned
//! worker is never left untracked.
//!
//! `status` never waits on the operation lock. It only reconciles drift
//! (pid gone from the process table) when no operation is in flight.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::config::{Config, Timeouts};
use crate::error::SupervisorError;
use crate::probe::{poll_until, wait_until_ready, PollPolicy, ProbeOutcome, ReadinessProbe, TcpProbe};
use crate::process::{ProcessInspector, ProcessLauncher, SysinfoInspector, SystemLauncher};
use crate::types::{
    bytes_to_mb, format_uptime, CommandResult, LaunchSpec, LifecycleState, ManagedProcessHandle,
    ProcessStatusSnapshot, WorkerAddress,
};

/// Static inputs of the supervisor
#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    pub address: WorkerAddress,
    pub launch: LaunchSpec,
    pub timeouts: Timeouts,
    /// Command-line substring identifying an externally started worker
    pub match_pattern: Option<String>,
    pub adopt_existing: bool,
}

impl SupervisorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            address: config.worker_address(),
            launch: config.launch_spec(),
            timeouts: config.timeouts(),
            match_pattern: config.worker.match_pattern.clone(),
            adopt_existing: config.worker.adopt_existing,
        }
    }
}

/// Handle to the supervisor; cheap to clone, all clones share one worker
#[derive(Clone)]
pub struct Supervisor {
    inner: Arc<Inner>,
}

struct Inner {
    settings: SupervisorSettings,
    launcher: Arc<dyn ProcessLauncher>,
    inspector: Arc<dyn ProcessInspector>,
    probe: Arc<dyn ReadinessProbe>,
    operation: Arc<Mutex<()>>,
    handle: Mutex<Option<ManagedProcessHandle>>,
    generation: AtomicU64,
}

impl Supervisor {
    pub fn new(
        settings: SupervisorSettings,
        launcher: Arc<dyn ProcessLauncher>,
        inspector: Arc<dyn ProcessInspector>,
        probe: Arc<dyn ReadinessProbe>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                settings,
                launcher,
                inspector,
                probe,
                operation: Arc::new(Mutex::new(())),
                handle: Mutex::new(None),
                generation: AtomicU64::new(0),
            }),
        }
    }

    /// Supervisor wired to the real OS: tokio spawning, sysinfo, TCP probing
    pub fn from_config(config: &Config) -> Self {
        let settings = SupervisorSettings::from_config(config);
        let timeouts = settings.timeouts;
        Self::new(
            settings,
            Arc::new(SystemLauncher::new()),
            Arc::new(SysinfoInspector::new(timeouts.cpu_sample)),
            Arc::new(TcpProbe::new(timeouts.connect)),
        )
    }

    pub fn settings(&self) -> &SupervisorSettings {
        &self.inner.settings
    }

    /// Current handle, if any (a copy; the supervisor keeps ownership)
    pub async fn handle(&self) -> Option<ManagedProcessHandle> {
        self.inner.handle.lock().await.clone()
    }

    /// Current lifecycle state as last recorded (no OS query)
    pub async fn state(&self) -> LifecycleState {
        self.handle()
            .await
            .map(|h| h.state)
            .unwrap_or(LifecycleState::Absent)
    }

    // ========================================================================
    // Public operations - every one returns a result, never an error
    // ========================================================================

    /// Start the worker, or report the one already running
    pub async fn start(&self) -> CommandResult {
        self.run_exclusive("start", |this| async move { this.start_locked().await })
            .await
    }

    /// Stop the worker and everything it spawned
    pub async fn stop(&self) -> CommandResult {
        self.run_exclusive("stop", |this| async move { this.stop_locked().await })
            .await
    }

    /// Stop to completion, wait for the port to free up, then start
    pub async fn restart(&self) -> CommandResult {
        self.run_exclusive("restart", |this| async move { this.restart_locked().await })
            .await
    }

    /// Report the worker's live status from the OS process table
    pub async fn status(&self) -> CommandResult {
        // A handle swapped mid-read is re-read once; a second swap is reported as seen
        for _ in 0..2 {
            let Some(handle) = self.handle().await else {
                return self.status_absent().await;
            };

            match self.snapshot(&handle).await {
                Some(snapshot) => {
                    if self.current_generation().await != Some(handle.generation) {
                        continue;
                    }
                    return CommandResult::ok(
                        format!("Worker is {} (pid {})", handle.state, handle.pid),
                        Some(snapshot),
                    );
                }
                None => {
                    let message = match self.reconcile_if_idle(&handle).await {
                        Some(gone) if gone.state == LifecycleState::Crashed => format!(
                            "Worker (pid {}) exited unexpectedly; it is no longer running",
                            gone.pid
                        ),
                        _ => format!("Worker (pid {}) is no longer running", handle.pid),
                    };
                    let port_in_use = self.port_in_use().await;
                    return CommandResult::not_running(message, port_in_use);
                }
            }
        }

        match self.handle().await {
            Some(handle) => CommandResult::ok(
                format!("Worker is {} (pid {})", handle.state, handle.pid),
                self.snapshot(&handle).await,
            ),
            None => self.status_absent().await,
        }
    }

    // ========================================================================
    // Serialised operations
    // ========================================================================

    async fn run_exclusive<F, Fut>(&self, name: &'static str, op: F) -> CommandResult
    where
        F: FnOnce(Supervisor) -> Fut + Send + 'static,
        Fut: Future<Output = Result<CommandResult, SupervisorError>> + Send + 'static,
    {
        let guard = self.inner.operation.clone().lock_owned().await;
        let this = self.clone();

        let task = tokio::spawn(async move {
            let _guard = guard;
            tracing::debug!("Lifecycle operation '{}' started", name);
            op(this).await
        });

        let result = match task.await {
            Ok(result) => result,
            Err(e) => Err(SupervisorError::TaskFailed(e.to_string())),
        };

        match result {
            Ok(result) => result,
            Err(e) if e.is_benign() => CommandResult::ok(e.to_string(), None),
            Err(e) => {
                tracing::error!("Lifecycle operation '{}' failed: {}", name, e);
                CommandResult::failure(e.to_string())
            }
        }
    }

    async fn start_locked(&self) -> Result<CommandResult, SupervisorError> {
        let mut crash_note = None;

        if let Some(handle) = self.handle().await {
            if self.inner.inspector.is_alive(handle.pid).await {
                if handle.state == LifecycleState::Starting {
                    tracing::info!(
                        "Resuming readiness wait for worker pid {} from an abandoned start",
                        handle.pid
                    );
                    return self.await_readiness(handle).await;
                }
                tracing::info!("Worker already running (pid {})", handle.pid);
                let snapshot = self.snapshot(&handle).await;
                let message = SupervisorError::AlreadyRunning { pid: handle.pid }.to_string();
                return Ok(CommandResult::ok(message, snapshot));
            }

            if let Some(gone) = self.reconcile(handle.generation).await {
                if gone.state == LifecycleState::Crashed {
                    crash_note = Some(format!(
                        "Previous worker (pid {}) had exited unexpectedly. ",
                        gone.pid
                    ));
                }
            }
        }

        if let Some(handle) = self.adopt_existing().await {
            let snapshot = self.snapshot(&handle).await;
            return Ok(CommandResult::ok(
                format!(
                    "{}Worker already running outside the daemon (pid {}); now tracking it",
                    crash_note.unwrap_or_default(),
                    handle.pid
                ),
                snapshot,
            ));
        }

        let settings = &self.inner.settings;
        if self.port_in_use().await {
            return Err(SupervisorError::PortInUse {
                port: settings.address.port,
            });
        }

        let pid = self.inner.launcher.spawn(&settings.launch).await?;
        let handle = ManagedProcessHandle::spawned(
            pid,
            settings.address.clone(),
            settings.launch.command_line(),
            self.next_generation(),
        );
        *self.inner.handle.lock().await = Some(handle.clone());
        tracing::info!(
            "Spawned worker pid {} ({}), waiting for {}",
            pid,
            handle.command_line.join(" "),
            handle.address
        );

        let mut result = self.await_readiness(handle).await?;
        if let Some(note) = crash_note {
            result.message = format!("{}{}", note, result.message);
        }
        Ok(result)
    }

    /// Wait for a `Starting` handle to become reachable and promote it
    async fn await_readiness(
        &self,
        handle: ManagedProcessHandle,
    ) -> Result<CommandResult, SupervisorError> {
        let timeouts = self.inner.settings.timeouts;
        let policy = PollPolicy::new(timeouts.probe_interval, timeouts.readiness);
        let inspector = self.inner.inspector.clone();
        let pid = handle.pid;

        let outcome = wait_until_ready(self.inner.probe.as_ref(), &handle.address, policy, || {
            let inspector = inspector.clone();
            async move { inspector.is_alive(pid).await }
        })
        .await;

        match outcome {
            ProbeOutcome::Ready { attempts } => {
                let handle = self
                    .transition(handle.generation, LifecycleState::Running)
                    .await
                    .unwrap_or(handle);
                tracing::info!(
                    "Worker pid {} ready on {} after {} probe(s)",
                    pid,
                    handle.address,
                    attempts
                );
                let snapshot = self.snapshot(&handle).await;
                Ok(CommandResult::ok(
                    format!(
                        "Worker started (pid {}, port {})",
                        pid, handle.address.port
                    ),
                    snapshot,
                ))
            }
            ProbeOutcome::Exited { .. } => {
                self.clear(handle.generation).await;
                Err(SupervisorError::ExitedDuringStartup { pid })
            }
            ProbeOutcome::TimedOut { attempts } => {
                tracing::warn!(
                    "Worker pid {} not reachable on {} after {} probe(s); terminating it",
                    pid,
                    handle.address,
                    attempts
                );
                let timed_out = SupervisorError::ReadinessTimeout {
                    pid,
                    port: handle.address.port,
                    waited: timeouts.readiness,
                };
                match self.terminate_tree(pid).await {
                    Ok(_) => {
                        self.clear(handle.generation).await;
                        Err(timed_out)
                    }
                    Err(e) => {
                        // Still alive: stay `Starting` so a later start resumes and stop retries
                        tracing::error!("Cleanup of unready worker failed: {}", e);
                        Ok(CommandResult::failure(format!(
                            "{}; cleanup failed, still tracking it: {}",
                            timed_out, e
                        )))
                    }
                }
            }
        }
    }

    async fn stop_locked(&self) -> Result<CommandResult, SupervisorError> {
        let Some(handle) = self.handle().await else {
            return Err(SupervisorError::NotRunning);
        };

        if !self.inner.inspector.is_alive(handle.pid).await {
            self.reconcile(handle.generation).await;
            return Ok(CommandResult::ok(
                format!(
                    "Worker (pid {}) had already exited; state cleared",
                    handle.pid
                ),
                None,
            ));
        }

        self.transition(handle.generation, LifecycleState::Stopping)
            .await;
        tracing::info!("Stopping worker pid {}", handle.pid);

        match self.terminate_tree(handle.pid).await {
            Ok(forced) => {
                self.clear(handle.generation).await;
                let how = if forced { " (forced)" } else { "" };
                Ok(CommandResult::ok(
                    format!("Worker stopped (pid {}){}", handle.pid, how),
                    None,
                ))
            }
            Err(e) => {
                // Still alive, so keep tracking it and let a later stop retry
                self.transition(handle.generation, handle.state).await;
                Err(e)
            }
        }
    }

    async fn restart_locked(&self) -> Result<CommandResult, SupervisorError> {
        let stopped = match self.stop_locked().await {
            Ok(result) => result,
            Err(SupervisorError::NotRunning) => {
                CommandResult::ok(SupervisorError::NotRunning.to_string(), None)
            }
            Err(e) => {
                return Ok(CommandResult::failure(format!(
                    "Restart aborted, stop failed: {}",
                    e
                )))
            }
        };

        let timeouts = self.inner.settings.timeouts;
        let this = self;
        let released = poll_until(
            PollPolicy::new(timeouts.exit_poll_interval, timeouts.port_release),
            move || async move { !this.port_in_use().await },
        )
        .await;
        if !released {
            tracing::warn!(
                "Port {} still busy {}ms after stop",
                self.inner.settings.address.port,
                timeouts.port_release.as_millis()
            );
        }

        let started = match self.start_locked().await {
            Ok(result) => result,
            Err(e) => CommandResult::failure(e.to_string()),
        };

        Ok(CommandResult {
            success: started.success,
            message: format!("{}\n{}", stopped.message, started.message),
            status: started.status,
            port_in_use: None,
        })
    }

    // ========================================================================
    // Process tree termination
    // ========================================================================

    /// Graceful stop of `pid` and its descendants, escalating to kill
    ///
    /// Returns whether force was needed.
    async fn terminate_tree(&self, pid: u32) -> Result<bool, SupervisorError> {
        let launcher = &self.inner.launcher;
        let timeouts = self.inner.settings.timeouts;

        let mut tree = self.inner.inspector.descendants(pid).await;
        tree.push(pid);

        for &member in &tree {
            if let Err(e) = launcher.terminate(member).await {
                tracing::warn!("{}", e);
            }
        }

        let grace = PollPolicy::new(timeouts.exit_poll_interval, timeouts.stop_grace);
        if self.wait_for_exit(&tree, grace).await {
            return Ok(false);
        }

        let survivors = self.alive_among(&tree).await;
        tracing::warn!(
            "Graceful stop timed out after {}ms, killing {:?}",
            timeouts.stop_grace.as_millis(),
            survivors
        );
        for &member in &survivors {
            if let Err(e) = launcher.kill(member).await {
                tracing::warn!("{}", e);
            }
        }

        let kill = PollPolicy::new(timeouts.exit_poll_interval, timeouts.kill);
        if self.wait_for_exit(&survivors, kill).await {
            return Ok(true);
        }

        Err(SupervisorError::TerminationTimeout {
            pid,
            survivors: self.alive_among(&survivors).await,
        })
    }

    async fn wait_for_exit(&self, pids: &[u32], policy: PollPolicy) -> bool {
        let this = self;
        poll_until(policy, move || async move {
            this.alive_among(pids).await.is_empty()
        })
        .await
    }

    async fn alive_among(&self, pids: &[u32]) -> Vec<u32> {
        let mut alive = Vec::new();
        for &pid in pids {
            if self.inner.inspector.is_alive(pid).await {
                alive.push(pid);
            }
        }
        alive
    }

    // ========================================================================
    // Handle bookkeeping
    // ========================================================================

    fn next_generation(&self) -> u64 {
        self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    async fn current_generation(&self) -> Option<u64> {
        self.inner.handle.lock().await.as_ref().map(|h| h.generation)
    }

    /// Move the handle to `state` if it is still the same generation
    async fn transition(
        &self,
        generation: u64,
        state: LifecycleState,
    ) -> Option<ManagedProcessHandle> {
        let mut slot = self.inner.handle.lock().await;
        match slot.as_mut() {
            Some(handle) if handle.generation == generation => {
                tracing::debug!("Worker pid {}: {} -> {}", handle.pid, handle.state, state);
                handle.state = state;
                Some(handle.clone())
            }
            _ => None,
        }
    }

    async fn clear(&self, generation: u64) -> Option<ManagedProcessHandle> {
        let mut slot = self.inner.handle.lock().await;
        if slot.as_ref().map(|h| h.generation) == Some(generation) {
            slot.take()
        } else {
            None
        }
    }

    /// Drop a handle whose process is gone, marking unexpected exits as crashes
    async fn reconcile(&self, generation: u64) -> Option<ManagedProcessHandle> {
        let mut gone = self.clear(generation).await?;
        if gone.state.is_active() {
            tracing::warn!(
                "Worker pid {} exited without a stop request ({} -> crashed)",
                gone.pid,
                gone.state
            );
            gone.state = LifecycleState::Crashed;
        } else {
            tracing::info!("Worker pid {} is gone; state reconciled to absent", gone.pid);
        }
        Some(gone)
    }

    /// Reconcile only if no lifecycle operation currently owns the handle
    async fn reconcile_if_idle(
        &self,
        handle: &ManagedProcessHandle,
    ) -> Option<ManagedProcessHandle> {
        let _guard = self.inner.operation.try_lock().ok()?;
        if self.inner.inspector.is_alive(handle.pid).await {
            return None;
        }
        self.reconcile(handle.generation).await
    }

    /// Track a matching worker that was started outside the daemon
    ///
    /// Caller must hold the operation lock.
    async fn adopt_existing(&self) -> Option<ManagedProcessHandle> {
        let settings = &self.inner.settings;
        if !settings.adopt_existing {
            return None;
        }
        let pattern = settings.match_pattern.as_deref()?;
        let pid = self.inner.inspector.find_by_command_line(pattern).await?;

        let handle =
            ManagedProcessHandle::adopted(pid, settings.address.clone(), self.next_generation());
        let mut slot = self.inner.handle.lock().await;
        if slot.is_some() {
            return None;
        }
        *slot = Some(handle.clone());
        tracing::info!(
            "Adopted worker pid {} found by command line match '{}'",
            pid,
            pattern
        );
        Some(handle)
    }

    async fn status_absent(&self) -> CommandResult {
        let adopted = match self.inner.operation.try_lock() {
            Ok(_guard) => self.adopt_existing().await,
            Err(_) => None,
        };
        if let Some(handle) = adopted {
            if let Some(snapshot) = self.snapshot(&handle).await {
                return CommandResult::ok(
                    format!(
                        "Worker is running outside the daemon (pid {}); now tracking it",
                        handle.pid
                    ),
                    Some(snapshot),
                );
            }
        }

        let port_in_use = self.port_in_use().await;
        let message = if port_in_use {
            format!(
                "Worker is not running, but port {} is in use by another program",
                self.inner.settings.address.port
            )
        } else {
            "Worker is not running".to_string()
        };
        CommandResult::not_running(message, port_in_use)
    }

    async fn port_in_use(&self) -> bool {
        self.inner.probe.is_ready(&self.inner.settings.address).await
    }

    // ========================================================================
    // Telemetry
    // ========================================================================

    /// Fresh snapshot of `handle`'s process, `None` if it is gone
    async fn snapshot(&self, handle: &ManagedProcessHandle) -> Option<ProcessStatusSnapshot> {
        let metrics = self.inner.inspector.metrics(handle.pid).await?;

        let started_at = i64::try_from(metrics.started_at_unix)
            .ok()
            .filter(|secs| *secs > 0)
            .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
            .unwrap_or(handle.started_at);
        let uptime_secs = u64::try_from((Utc::now() - started_at).num_seconds()).unwrap_or(0);

        Some(ProcessStatusSnapshot {
            pid: handle.pid,
            state: handle.state,
            started_at,
            uptime: format_uptime(uptime_secs),
            uptime_secs,
            cpu_percent: metrics.cpu_percent,
            memory_mb: bytes_to_mb(metrics.memory_bytes),
            child_process_count: metrics.child_process_count,
            port: handle.address.port,
            adopted: handle.adopted,
        })
    }
}
