//! Status reporting and drift reconciliation

use od_daemon::LifecycleState;

use crate::fakes::{settings, Event, Harness, SpawnPlan, FIRST_PID, WORKER_PORT};

#[tokio::test(start_paused = true)]
async fn status_when_absent() {
    let h = Harness::new(SpawnPlan::ready_after(0));

    let result = h.supervisor.status().await;

    assert!(result.success);
    assert!(result.status.is_none());
    assert_eq!(result.port_in_use, Some(false));
}

#[tokio::test(start_paused = true)]
async fn status_reports_live_metrics() {
    let h = Harness::new(SpawnPlan {
        children: 3,
        ..SpawnPlan::ready_after(1)
    });
    assert!(h.supervisor.start().await.success);

    let result = h.supervisor.status().await;

    assert!(result.success);
    let status = result.status.expect("running");
    assert_eq!(status.pid, FIRST_PID);
    assert_eq!(status.port, WORKER_PORT);
    assert_eq!(status.child_process_count, 3);
    assert_eq!(status.memory_mb, 64.0);
    assert_eq!(status.cpu_percent, 2.5);
    assert!(!status.adopted);
    assert!(!status.uptime.is_empty());
}

#[tokio::test(start_paused = true)]
async fn status_reconciles_a_crash() {
    let h = Harness::new(SpawnPlan::ready_after(0));
    assert!(h.supervisor.start().await.success);
    h.world().crash(FIRST_PID);

    let result = h.supervisor.status().await;

    assert!(result.success);
    assert!(result.status.is_none());
    assert!(result.message.contains("exited unexpectedly"), "{}", result.message);
    assert_eq!(result.port_in_use, Some(false));
    assert_eq!(h.supervisor.state().await, LifecycleState::Absent);
    assert!(h.supervisor.handle().await.is_none());
}

#[tokio::test(start_paused = true)]
async fn start_after_crash_spawns_fresh() {
    let h = Harness::new(SpawnPlan::ready_after(0));
    assert!(h.supervisor.start().await.success);
    h.world().crash(FIRST_PID);

    let result = h.supervisor.start().await;

    assert!(result.success, "{}", result.message);
    assert!(result.message.contains("exited unexpectedly"), "{}", result.message);
    assert_eq!(result.status.map(|s| s.pid), Some(FIRST_PID + 1));
    assert_eq!(h.world().spawns(), vec![FIRST_PID, FIRST_PID + 1]);
}

#[tokio::test(start_paused = true)]
async fn stop_after_crash_sends_no_signals() {
    let h = Harness::new(SpawnPlan::ready_after(0));
    assert!(h.supervisor.start().await.success);
    h.world().crash(FIRST_PID);

    let result = h.supervisor.stop().await;

    assert!(result.success);
    assert!(result.message.contains("already exited"), "{}", result.message);
    assert!(h.world().signals().is_empty());
    assert_eq!(h.supervisor.state().await, LifecycleState::Absent);
}

#[tokio::test(start_paused = true)]
async fn status_reports_foreign_port_owner() {
    let h = Harness::new(SpawnPlan::ready_after(0));
    h.world().foreign_listener = true;

    let result = h.supervisor.status().await;

    assert!(result.success);
    assert!(result.status.is_none());
    assert_eq!(result.port_in_use, Some(true));
}

#[tokio::test(start_paused = true)]
async fn external_worker_is_adopted() {
    let h = Harness::with_settings(
        od_daemon::SupervisorSettings {
            adopt_existing: true,
            ..settings()
        },
        SpawnPlan::ready_after(0),
    );
    let external = h.world().add_external_worker();

    let status = h.supervisor.status().await;
    assert!(status.success);
    let snapshot = status.status.expect("adopted worker is running");
    assert_eq!(snapshot.pid, external);
    assert!(snapshot.adopted);

    let start = h.supervisor.start().await;
    assert!(start.success);
    assert!(start.message.contains("already running"), "{}", start.message);
    assert!(h.world().spawns().is_empty());

    assert!(h.supervisor.stop().await.success);
    assert_eq!(h.world().signals(), vec![Event::Term(external)]);
}

#[tokio::test(start_paused = true)]
async fn external_worker_ignored_without_adoption() {
    let h = Harness::new(SpawnPlan::ready_after(0));
    h.world().add_external_worker();

    let status = h.supervisor.status().await;
    assert!(status.status.is_none());
    assert_eq!(status.port_in_use, Some(true));

    // It holds the port, so we refuse to start a second one
    assert!(!h.supervisor.start().await.success);
    assert!(h.world().spawns().is_empty());
}

#[tokio::test(start_paused = true)]
async fn adoption_skips_processes_that_only_mention_the_worker() {
    let h = Harness::with_settings(
        od_daemon::SupervisorSettings {
            adopt_existing: true,
            ..settings()
        },
        SpawnPlan::ready_after(0),
    );
    h.world().add_process("tail -f zzz_mcp_server.log");

    let status = h.supervisor.status().await;

    assert!(status.status.is_none(), "{}", status.message);
    assert!(h.supervisor.handle().await.is_none());
}
