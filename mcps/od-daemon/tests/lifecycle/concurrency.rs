//! Serialisation of concurrent and abandoned requests

use std::time::Duration;

use od_daemon::LifecycleState;

use crate::fakes::{Event, Harness, SpawnPlan, FIRST_PID};

#[tokio::test(start_paused = true)]
async fn concurrent_starts_spawn_once() {
    let h = Harness::new(SpawnPlan::ready_after(3));
    let a = h.supervisor.clone();
    let b = h.supervisor.clone();

    let (first, second) = tokio::join!(a.start(), b.start());

    assert!(first.success, "{}", first.message);
    assert!(second.success, "{}", second.message);
    assert_eq!(h.world().spawns(), vec![FIRST_PID]);
    assert_eq!(first.status.map(|s| s.pid), Some(FIRST_PID));
    assert_eq!(second.status.map(|s| s.pid), Some(FIRST_PID));
}

#[tokio::test(start_paused = true)]
async fn start_and_stop_do_not_interleave() {
    let h = Harness::new(SpawnPlan::ready_after(3));
    let a = h.supervisor.clone();
    let b = h.supervisor.clone();

    let (started, stopped) = tokio::join!(a.start(), b.stop());

    assert!(started.success, "{}", started.message);
    assert!(stopped.success, "{}", stopped.message);
    // The stop waited for the start to finish, then stopped what it started
    assert_eq!(
        h.world().events,
        vec![Event::Spawn(FIRST_PID), Event::Term(FIRST_PID)]
    );
    assert_eq!(h.supervisor.state().await, LifecycleState::Absent);
}

#[tokio::test(start_paused = true)]
async fn status_does_not_wait_for_start() {
    let h = Harness::new(SpawnPlan::ready_after(10));
    let starter = h.supervisor.clone();
    let pending = tokio::spawn(async move { starter.start().await });

    tokio::time::sleep(Duration::from_millis(60)).await;
    let status = h.supervisor.status().await;

    assert!(status.success);
    let snapshot = status.status.expect("spawned worker is visible");
    assert_eq!(snapshot.state, LifecycleState::Starting);

    let started = pending.await.unwrap();
    assert!(started.success, "{}", started.message);
}

#[tokio::test(start_paused = true)]
async fn abandoned_start_still_completes() {
    let h = Harness::new(SpawnPlan::ready_after(5));
    let starter = h.supervisor.clone();
    let pending = tokio::spawn(async move { starter.start().await });

    tokio::time::sleep(Duration::from_millis(60)).await;
    pending.abort();

    // Queues behind the abandoned start, which runs to completion
    let result = h.supervisor.start().await;

    assert!(result.success, "{}", result.message);
    assert!(result.message.contains("already running"), "{}", result.message);
    assert_eq!(h.world().spawns(), vec![FIRST_PID]);
    assert_eq!(h.supervisor.state().await, LifecycleState::Running);
}
