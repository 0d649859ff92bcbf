//! Real OS processes: spawn `sh`/`sleep`, inspect them with sysinfo, signal them

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use od_daemon::probe::{poll_until, PollPolicy, ReadinessProbe};
use od_daemon::process::{ProcessInspector, SysinfoInspector, SystemLauncher};
use od_daemon::types::{LaunchSpec, WorkerAddress};
use od_daemon::{LifecycleState, Supervisor, SupervisorSettings};

use crate::fakes::timeouts;

/// Port free on the pre-start check, reachable on every probe after it
struct SecondCallReady {
    calls: AtomicU32,
}

#[async_trait]
impl ReadinessProbe for SecondCallReady {
    async fn is_ready(&self, _address: &WorkerAddress) -> bool {
        self.calls.fetch_add(1, Ordering::SeqCst) > 0
    }
}

fn supervisor(program: &str, args: &[&str]) -> (Supervisor, Arc<SysinfoInspector>) {
    let mut timeouts = timeouts();
    timeouts.stop_grace = Duration::from_secs(3);
    timeouts.kill = Duration::from_secs(2);
    timeouts.cpu_sample = Duration::from_millis(200);

    let inspector = Arc::new(SysinfoInspector::new(timeouts.cpu_sample));
    let settings = SupervisorSettings {
        address: WorkerAddress::new("127.0.0.1", 1),
        launch: LaunchSpec {
            program: program.to_string(),
            args: args.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        },
        timeouts,
        match_pattern: None,
        adopt_existing: false,
    };
    let supervisor = Supervisor::new(
        settings,
        Arc::new(SystemLauncher::new()),
        inspector.clone(),
        Arc::new(SecondCallReady {
            calls: AtomicU32::new(0),
        }),
    );
    (supervisor, inspector)
}

#[tokio::test]
async fn real_worker_start_status_stop() {
    let (supervisor, inspector) = supervisor("sleep", &["30"]);

    let started = supervisor.start().await;
    assert!(started.success, "{}", started.message);
    let pid = started.status.expect("running").pid;
    assert!(inspector.is_alive(pid).await);

    let status = supervisor.status().await;
    let snapshot = status.status.expect("still running");
    assert_eq!(snapshot.pid, pid);
    assert!(snapshot.memory_mb > 0.0);

    let stopped = supervisor.stop().await;
    assert!(stopped.success, "{}", stopped.message);
    assert_eq!(supervisor.state().await, LifecycleState::Absent);
    assert!(!inspector.is_alive(pid).await);
}

#[tokio::test]
async fn real_worker_children_are_stopped() {
    let (supervisor, inspector) = supervisor("sh", &["-c", "sleep 30 & sleep 30 & wait"]);

    let started = supervisor.start().await;
    assert!(started.success, "{}", started.message);
    let pid = started.status.expect("running").pid;

    let policy = PollPolicy::new(Duration::from_millis(50), Duration::from_secs(5));
    let spawned_children = poll_until(policy, || {
        let inspector = inspector.clone();
        async move { inspector.descendants(pid).await.len() >= 2 }
    })
    .await;
    assert!(spawned_children, "shell never started its children");
    let children = inspector.descendants(pid).await;

    assert!(supervisor.stop().await.success);
    for child in children {
        assert!(!inspector.is_alive(child).await, "child {} survived", child);
    }
}

#[tokio::test]
async fn missing_program_is_a_spawn_failure() {
    let (supervisor, _) = supervisor("od-daemon-test-no-such-program", &[]);

    let result = supervisor.start().await;

    assert!(!result.success);
    assert!(result.message.contains("od-daemon-test-no-such-program"), "{}", result.message);
    assert_eq!(supervisor.state().await, LifecycleState::Absent);
}
