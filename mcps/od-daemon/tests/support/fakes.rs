//! Deterministic stand-ins for the OS: a scripted process table, a launcher
//! that records every spawn and signal, and a probe whose answer depends on
//! what is "listening" in that table.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use od_daemon::config::Timeouts;
use od_daemon::probe::ReadinessProbe;
use od_daemon::process::{ProcessInspector, ProcessLauncher};
use od_daemon::types::{LaunchSpec, ProcessMetrics, WorkerAddress};
use od_daemon::{LaunchError, Supervisor, SupervisorSettings};

pub const FIRST_PID: u32 = 4242;
pub const WORKER_PORT: u16 = 23001;
pub const MATCH_PATTERN: &str = "zzz_mcp_server.py";

/// Something the fake OS was asked to do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Spawn(u32),
    Term(u32),
    Kill(u32),
}

/// How the next spawned worker behaves
#[derive(Debug, Clone, Default)]
pub struct SpawnPlan {
    /// Probes answered "not yet" before the worker listens; `None` never listens
    pub ready_after_probes: Option<u32>,
    /// The worker dies on its own after this many probes
    pub exit_after_probes: Option<u32>,
    pub ignore_term: bool,
    pub ignore_kill: bool,
    /// Direct children the worker starts (each a plain process)
    pub children: u32,
    /// Spawn fails as if the program were missing
    pub fail: bool,
}

impl SpawnPlan {
    pub fn ready_after(probes: u32) -> Self {
        Self {
            ready_after_probes: Some(probes),
            ..Default::default()
        }
    }

    pub fn never_ready() -> Self {
        Self::default()
    }
}

#[derive(Debug, Clone)]
pub struct FakeProc {
    pub parent: Option<u32>,
    pub alive: bool,
    pub command_line: String,
    pub listens_after: Option<u32>,
    pub exits_after: Option<u32>,
    pub ignore_term: bool,
    pub ignore_kill: bool,
    pub started_at_unix: u64,
}

impl FakeProc {
    fn plain(parent: Option<u32>, command_line: impl Into<String>) -> Self {
        Self {
            parent,
            alive: true,
            command_line: command_line.into(),
            listens_after: None,
            exits_after: None,
            ignore_term: false,
            ignore_kill: false,
            started_at_unix: chrono::Utc::now().timestamp() as u64,
        }
    }

    fn is_listening(&self) -> bool {
        self.alive && self.listens_after == Some(0)
    }
}

#[derive(Debug)]
pub struct World {
    pub next_pid: u32,
    pub procs: BTreeMap<u32, FakeProc>,
    pub events: Vec<Event>,
    pub plan: SpawnPlan,
    /// A program that is not our worker holds the port
    pub foreign_listener: bool,
    pub probe_calls: u32,
}

impl World {
    pub fn new(plan: SpawnPlan) -> Self {
        Self {
            next_pid: FIRST_PID,
            procs: BTreeMap::new(),
            events: Vec::new(),
            plan,
            foreign_listener: false,
            probe_calls: 0,
        }
    }

    fn alloc_pid(&mut self) -> u32 {
        let pid = self.next_pid;
        self.next_pid += 1;
        pid
    }

    pub fn is_alive(&self, pid: u32) -> bool {
        self.procs.get(&pid).map(|p| p.alive).unwrap_or(false)
    }

    pub fn descendants(&self, pid: u32) -> Vec<u32> {
        let mut found = Vec::new();
        let mut frontier = vec![pid];
        while let Some(current) = frontier.pop() {
            for (&child, proc_) in &self.procs {
                if proc_.alive && proc_.parent == Some(current) && !found.contains(&child) {
                    found.push(child);
                    frontier.push(child);
                }
            }
        }
        found.reverse();
        found
    }

    pub fn spawns(&self) -> Vec<u32> {
        self.events
            .iter()
            .filter_map(|e| match e {
                Event::Spawn(pid) => Some(*pid),
                _ => None,
            })
            .collect()
    }

    pub fn signals(&self) -> Vec<Event> {
        self.events
            .iter()
            .copied()
            .filter(|e| !matches!(e, Event::Spawn(_)))
            .collect()
    }

    /// The worker dies without anyone asking it to
    pub fn crash(&mut self, pid: u32) {
        if let Some(p) = self.procs.get_mut(&pid) {
            p.alive = false;
        }
    }

    /// A worker started by someone else, already listening on the port
    pub fn add_external_worker(&mut self) -> u32 {
        let pid = 7000;
        let mut proc_ = FakeProc::plain(
            None,
            format!("uv run python src/zzz_mcp/{}", MATCH_PATTERN),
        );
        proc_.listens_after = Some(0);
        self.procs.insert(pid, proc_);
        pid
    }

    /// Some other live process with the given command line
    pub fn add_process(&mut self, command_line: &str) -> u32 {
        let pid = 8000 + self.procs.len() as u32;
        self.procs.insert(pid, FakeProc::plain(None, command_line));
        pid
    }
}

pub type SharedWorld = Arc<Mutex<World>>;

fn lock(world: &SharedWorld) -> MutexGuard<'_, World> {
    world.lock().unwrap()
}

// ============================================================================
// Collaborators
// ============================================================================

pub struct FakeLauncher(pub SharedWorld);

#[async_trait]
impl ProcessLauncher for FakeLauncher {
    async fn spawn(&self, spec: &LaunchSpec) -> Result<u32, LaunchError> {
        tokio::task::yield_now().await;
        let mut world = lock(&self.0);
        let plan = world.plan.clone();
        if plan.fail {
            return Err(LaunchError::ProgramNotFound(spec.program.clone()));
        }

        let pid = world.alloc_pid();
        let mut worker = FakeProc::plain(None, spec.command_line().join(" "));
        worker.listens_after = plan.ready_after_probes;
        worker.exits_after = plan.exit_after_probes;
        worker.ignore_term = plan.ignore_term;
        worker.ignore_kill = plan.ignore_kill;
        world.procs.insert(pid, worker);

        for _ in 0..plan.children {
            let child = world.alloc_pid();
            world
                .procs
                .insert(child, FakeProc::plain(Some(pid), "python -m worker_child"));
        }

        world.events.push(Event::Spawn(pid));
        Ok(pid)
    }

    async fn terminate(&self, pid: u32) -> Result<(), LaunchError> {
        let mut world = lock(&self.0);
        world.events.push(Event::Term(pid));
        if let Some(p) = world.procs.get_mut(&pid) {
            if !p.ignore_term {
                p.alive = false;
            }
        }
        Ok(())
    }

    async fn kill(&self, pid: u32) -> Result<(), LaunchError> {
        let mut world = lock(&self.0);
        world.events.push(Event::Kill(pid));
        if let Some(p) = world.procs.get_mut(&pid) {
            if !p.ignore_kill {
                p.alive = false;
            }
        }
        Ok(())
    }
}

pub struct FakeInspector(pub SharedWorld);

#[async_trait]
impl ProcessInspector for FakeInspector {
    async fn is_alive(&self, pid: u32) -> bool {
        lock(&self.0).is_alive(pid)
    }

    async fn descendants(&self, pid: u32) -> Vec<u32> {
        lock(&self.0).descendants(pid)
    }

    async fn find_by_command_line(&self, needle: &str) -> Option<u32> {
        lock(&self.0)
            .procs
            .iter()
            .filter(|(_, p)| p.alive && p.command_line.contains(needle))
            .map(|(pid, _)| *pid)
            .min()
    }

    async fn metrics(&self, pid: u32) -> Option<ProcessMetrics> {
        let world = lock(&self.0);
        let proc_ = world.procs.get(&pid).filter(|p| p.alive)?;
        Some(ProcessMetrics {
            pid,
            cpu_percent: 2.5,
            memory_bytes: 64 * 1024 * 1024,
            started_at_unix: proc_.started_at_unix,
            child_process_count: world.descendants(pid).len(),
        })
    }
}

/// Answers for whatever "listens" on the port in the fake world
pub struct FakeProbe(pub SharedWorld);

#[async_trait]
impl ReadinessProbe for FakeProbe {
    async fn is_ready(&self, _address: &WorkerAddress) -> bool {
        let mut world = lock(&self.0);
        world.probe_calls += 1;
        if world.foreign_listener {
            return true;
        }

        let mut listening = false;
        for proc_ in world.procs.values_mut().filter(|p| p.alive) {
            if let Some(n) = proc_.exits_after {
                if n == 0 {
                    proc_.alive = false;
                    continue;
                }
                proc_.exits_after = Some(n - 1);
            }
            match proc_.listens_after {
                Some(0) => listening = true,
                Some(n) => proc_.listens_after = Some(n - 1),
                None => {}
            }
        }
        listening
    }
}

// ============================================================================
// Harness
// ============================================================================

pub fn timeouts() -> Timeouts {
    Timeouts {
        readiness: Duration::from_secs(2),
        probe_interval: Duration::from_millis(50),
        connect: Duration::from_millis(100),
        stop_grace: Duration::from_millis(500),
        kill: Duration::from_millis(300),
        exit_poll_interval: Duration::from_millis(20),
        port_release: Duration::from_millis(200),
        cpu_sample: Duration::from_millis(10),
    }
}

pub fn settings() -> SupervisorSettings {
    SupervisorSettings {
        address: WorkerAddress::new("127.0.0.1", WORKER_PORT),
        launch: LaunchSpec {
            program: "uv".to_string(),
            args: ["run", "python", "src/zzz_mcp/zzz_mcp_server.py"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            ..Default::default()
        },
        timeouts: timeouts(),
        match_pattern: Some(MATCH_PATTERN.to_string()),
        adopt_existing: false,
    }
}

pub struct Harness {
    pub world: SharedWorld,
    pub supervisor: Supervisor,
}

impl Harness {
    pub fn new(plan: SpawnPlan) -> Self {
        Self::with_settings(settings(), plan)
    }

    pub fn with_settings(settings: SupervisorSettings, plan: SpawnPlan) -> Self {
        let world = Arc::new(Mutex::new(World::new(plan)));
        let supervisor = Supervisor::new(
            settings,
            Arc::new(FakeLauncher(world.clone())),
            Arc::new(FakeInspector(world.clone())),
            Arc::new(FakeProbe(world.clone())),
        );
        Self { world, supervisor }
    }

    pub fn world(&self) -> MutexGuard<'_, World> {
        lock(&self.world)
    }

    pub fn set_plan(&self, plan: SpawnPlan) {
        self.world().plan = plan;
    }
}
