//! Process table inspection

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sysinfo::{Pid, ProcessRefreshKind, ProcessStatus, ProcessesToUpdate, System, UpdateKind};
use tokio::sync::Mutex;

use crate::types::ProcessMetrics;

/// Read-only view of the OS process table
///
/// Every method re-reads the table; nothing is cached between calls. A pid
/// that disappears halfway through is reported as gone, never as an error.
#[async_trait]
pub trait ProcessInspector: Send + Sync {
    /// Whether `pid` exists and has not exited (zombies count as exited)
    async fn is_alive(&self, pid: u32) -> bool;

    /// All live descendants of `pid`, deepest first
    async fn descendants(&self, pid: u32) -> Vec<u32>;

    /// Lowest pid whose command line contains `needle`
    async fn find_by_command_line(&self, needle: &str) -> Option<u32>;

    /// CPU, memory, start time and child count for `pid`
    async fn metrics(&self, pid: u32) -> Option<ProcessMetrics>;
}

/// [`ProcessInspector`] backed by `sysinfo`
#[derive(Clone)]
pub struct SysinfoInspector {
    system: Arc<Mutex<System>>,
    cpu_sample: Duration,
}

impl SysinfoInspector {
    /// `cpu_sample` is the window CPU usage is measured over
    pub fn new(cpu_sample: Duration) -> Self {
        Self {
            system: Arc::new(Mutex::new(System::new())),
            cpu_sample: cpu_sample.max(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL),
        }
    }

    fn refresh_table(sys: &mut System) {
        sys.refresh_processes_specifics(ProcessesToUpdate::All, true, ProcessRefreshKind::new());
    }
}

fn is_running(process: &sysinfo::Process) -> bool {
    !matches!(process.status(), ProcessStatus::Zombie | ProcessStatus::Dead)
}

/// Descendants of `root` in the current table, children before their parents
fn collect_descendants(sys: &System, root: u32) -> Vec<u32> {
    let mut children: HashMap<u32, Vec<u32>> = HashMap::new();
    for (pid, process) in sys.processes() {
        // Linux lists threads as tasks of their process; skip them
        if process.thread_kind().is_some() || !is_running(process) {
            continue;
        }
        if let Some(parent) = process.parent() {
            children
                .entry(parent.as_u32())
                .or_default()
                .push(pid.as_u32());
        }
    }

    let mut order = Vec::new();
    let mut stack = vec![root];
    while let Some(current) = stack.pop() {
        if let Some(kids) = children.get(&current) {
            for &kid in kids {
                if kid != root && !order.contains(&kid) {
                    order.push(kid);
                    stack.push(kid);
                }
            }
        }
    }
    order.reverse();
    order
}

#[async_trait]
impl ProcessInspector for SysinfoInspector {
    async fn is_alive(&self, pid: u32) -> bool {
        let target = Pid::from_u32(pid);
        let mut sys = self.system.lock().await;
        sys.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[target]),
            true,
            ProcessRefreshKind::new(),
        );
        sys.process(target).map(is_running).unwrap_or(false)
    }

    async fn descendants(&self, pid: u32) -> Vec<u32> {
        let mut sys = self.system.lock().await;
        Self::refresh_table(&mut sys);
        collect_descendants(&sys, pid)
    }

    async fn find_by_command_line(&self, needle: &str) -> Option<u32> {
        let own_pid = std::process::id();
        let mut sys = self.system.lock().await;
        sys.refresh_processes_specifics(
            ProcessesToUpdate::All,
            true,
            ProcessRefreshKind::new().with_cmd(UpdateKind::OnlyIfNotSet),
        );

        sys.processes()
            .iter()
            .filter(|(pid, process)| {
                pid.as_u32() != own_pid
                    && process.thread_kind().is_none()
                    && is_running(process)
                    && process
                        .cmd()
                        .iter()
                        .any(|arg| arg.to_string_lossy().contains(needle))
            })
            .map(|(pid, _)| pid.as_u32())
            .min()
    }

    async fn metrics(&self, pid: u32) -> Option<ProcessMetrics> {
        let target = Pid::from_u32(pid);
        let refresh = ProcessRefreshKind::new().with_cpu().with_memory();

        let mut sys = self.system.lock().await;
        sys.refresh_processes_specifics(ProcessesToUpdate::Some(&[target]), true, refresh);
        if !sys.process(target).map(is_running).unwrap_or(false) {
            return None;
        }

        tokio::time::sleep(self.cpu_sample).await;
        sys.refresh_processes_specifics(ProcessesToUpdate::Some(&[target]), true, refresh);

        let (cpu_percent, memory_bytes, started_at_unix) = {
            let process = sys.process(target).filter(|p| is_running(p))?;
            (process.cpu_usage(), process.memory(), process.start_time())
        };

        Self::refresh_table(&mut sys);
        let child_process_count = collect_descendants(&sys, pid).len();

        Some(ProcessMetrics {
            pid,
            cpu_percent,
            memory_bytes,
            started_at_unix,
            child_process_count,
        })
    }
}
