//! Supervisor behavior against scripted worker processes.

mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;

use common::FakeSpawner;
use task_queue::config::PoolConfig;
use task_queue::logging::LoggingHandle;
use task_queue::supervisor::{ControlCommand, PoolSupervisor};
use task_queue::worker::{ControlMessage, WorkerReport};

fn pool_config() -> PoolConfig {
    PoolConfig {
        min_workers: 3,
        max_workers: 10,
        ..PoolConfig::default()
    }
}

fn supervisor(
    config: PoolConfig,
    spawner: Arc<FakeSpawner>,
) -> (PoolSupervisor, mpsc::UnboundedSender<ControlCommand>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        PoolSupervisor::new(config, spawner, rx, LoggingHandle::default()),
        tx,
    )
}

#[tokio::test]
async fn test_first_tick_starts_midpoint() {
    let spawner = FakeSpawner::new();
    let (mut supervisor, _tx) = supervisor(pool_config(), spawner.clone());

    let summary = supervisor.tick_at(Instant::now()).await;

    assert_eq!(summary.spawned, 6);
    assert_eq!(spawner.spawned(), 6);
    assert_eq!(supervisor.pool().process_count(), 6);
    assert_eq!(supervisor.target().target(), 6);
}

#[tokio::test]
async fn test_crashed_workers_are_replaced() {
    let spawner = FakeSpawner::new();
    let (mut supervisor, _tx) = supervisor(pool_config(), spawner.clone());
    let t0 = Instant::now();
    supervisor.tick_at(t0).await;

    let handles = spawner.handles();
    for handle in &handles[..4] {
        handle.crash();
    }

    let summary = supervisor.tick_at(t0 + Duration::from_secs(60)).await;

    assert_eq!(summary.exited.len(), 4);
    assert_eq!(summary.spawned, 4);
    assert_eq!(spawner.spawned(), 10);
    assert_eq!(spawner.alive().len(), 6);
    let remaining = supervisor.pool().pids();
    for handle in &handles[..4] {
        assert!(!remaining.contains(&handle.pid));
    }
}

#[tokio::test]
async fn test_silent_worker_is_killed_and_replaced() {
    let spawner = FakeSpawner::new();
    let (mut supervisor, _tx) = supervisor(pool_config(), spawner.clone());
    let t0 = Instant::now();
    supervisor.tick_at(t0).await;

    let handles = spawner.handles();
    let (silent, talkative) = handles.split_first().unwrap();
    for handle in talkative {
        handle.heartbeat();
    }

    let summary = supervisor.tick_at(t0 + Duration::from_secs(601)).await;

    assert_eq!(summary.killed, vec![silent.pid]);
    assert!(silent.is_killed());
    assert!(talkative.iter().all(|handle| !handle.is_killed()));
    assert_eq!(summary.spawned, 1);
    assert_eq!(supervisor.pool().process_count(), 6);
    assert!(!supervisor.pool().pids().contains(&silent.pid));
}

#[tokio::test]
async fn test_job_reports_show_in_health() {
    let spawner = FakeSpawner::new();
    let (mut supervisor, _tx) = supervisor(pool_config(), spawner.clone());
    let t0 = Instant::now();
    supervisor.tick_at(t0).await;

    let busy = &spawner.handles()[2];
    busy.report(WorkerReport::JobStarted {
        class: "video".to_string(),
        operation: "transcode".to_string(),
        job_id: Some(42),
    });
    supervisor.drain_reports(t0 + Duration::from_secs(5));

    let health = supervisor
        .pool()
        .health(supervisor.target().target(), t0 + Duration::from_secs(5));
    assert_eq!(health.busy_count(), 1);
    let worker = health
        .workers
        .iter()
        .find(|worker| worker.pid == busy.pid)
        .unwrap();
    assert_eq!(worker.current_job.as_ref().unwrap().job_id, Some(42));
    assert_eq!(worker.heartbeat_age, Duration::ZERO);
}

#[tokio::test]
async fn test_add_worker_stops_at_max() {
    let spawner = FakeSpawner::new();
    let (mut supervisor, _tx) = supervisor(pool_config(), spawner.clone());
    supervisor.tick_at(Instant::now()).await;

    for _ in 0..6 {
        supervisor.handle_command(ControlCommand::AddWorker).await;
    }

    assert_eq!(supervisor.target().target(), 10);
    assert_eq!(spawner.spawned(), 10);
    assert_eq!(supervisor.pool().process_count(), 10);
}

#[tokio::test]
async fn test_scale_down_then_refill_to_min() {
    let spawner = FakeSpawner::new();
    let (mut supervisor, _tx) = supervisor(pool_config(), spawner.clone());
    let t0 = Instant::now();
    supervisor.tick_at(t0).await;
    let originals = spawner.handles();

    supervisor.handle_command(ControlCommand::ScaleDown).await;

    assert_eq!(supervisor.target().target(), 3);
    for handle in &originals {
        assert_eq!(handle.received(), vec![ControlMessage::Shutdown]);
        assert!(handle.has_exited());
    }

    let summary = supervisor.tick_at(t0 + Duration::from_secs(60)).await;
    assert_eq!(summary.exited.len(), 6);
    assert_eq!(summary.spawned, 3);
    assert_eq!(spawner.alive().len(), 3);
}

#[tokio::test]
async fn test_reopen_logs_reaches_workers() {
    let spawner = FakeSpawner::new();
    let (mut supervisor, _tx) = supervisor(pool_config(), spawner.clone());
    supervisor.tick_at(Instant::now()).await;

    supervisor.handle_command(ControlCommand::ReopenLogs).await;

    for handle in spawner.handles() {
        assert_eq!(handle.received(), vec![ControlMessage::ReopenLogs]);
    }
}

#[tokio::test]
async fn test_overdue_graceful_stop_is_escalated() {
    let spawner = FakeSpawner::stubborn();
    let config = PoolConfig {
        shutdown_grace_seconds: Some(30),
        ..pool_config()
    };
    let (mut supervisor, _tx) = supervisor(config, spawner.clone());
    let t0 = Instant::now();
    supervisor.tick_at(t0).await;

    supervisor.handle_command(ControlCommand::ScaleDown).await;
    let now = Instant::now();
    for handle in spawner.handles() {
        handle.heartbeat();
    }

    // Replacements start while the stopping workers linger
    let summary = supervisor.tick_at(now + Duration::from_secs(10)).await;
    assert!(summary.killed.is_empty());
    assert_eq!(summary.spawned, 3);
    assert_eq!(supervisor.pool().process_count(), 9);

    for handle in spawner.handles() {
        handle.heartbeat();
    }
    let summary = supervisor.tick_at(now + Duration::from_secs(31)).await;
    assert_eq!(summary.killed.len(), 6);
    assert_eq!(supervisor.pool().process_count(), 3);
}

#[tokio::test]
async fn test_stopping_workers_finish_their_jobs_by_default() {
    let spawner = FakeSpawner::stubborn();
    let (mut supervisor, _tx) = supervisor(pool_config(), spawner.clone());
    let t0 = Instant::now();
    supervisor.tick_at(t0).await;

    let busy = spawner.handles()[0].clone();
    busy.report(WorkerReport::JobStarted {
        class: "video".to_string(),
        operation: "transcode".to_string(),
        job_id: Some(7),
    });
    supervisor.handle_command(ControlCommand::ScaleDown).await;

    // Long past any fixed grace, but every worker keeps heartbeating
    let mut now = t0;
    for _ in 0..6 {
        now += Duration::from_secs(300);
        for handle in spawner.handles() {
            handle.heartbeat();
        }
        let summary = supervisor.tick_at(now).await;
        assert!(summary.killed.is_empty());
    }

    assert!(!busy.is_killed());
    assert!(supervisor.pool().pids().contains(&busy.pid));
}

#[tokio::test]
async fn test_shutdown_waits_for_workers_without_grace() {
    let spawner = FakeSpawner::stubborn();
    let (mut supervisor, _tx) = supervisor(pool_config(), spawner.clone());
    supervisor.tick_at(Instant::now()).await;

    let waited = tokio::time::timeout(Duration::from_millis(500), supervisor.shutdown()).await;

    assert!(waited.is_err());
    for handle in spawner.handles() {
        assert_eq!(handle.received(), vec![ControlMessage::Shutdown]);
        assert!(!handle.is_killed());
    }
}

#[tokio::test]
async fn test_shutdown_kills_stubborn_workers() {
    let spawner = FakeSpawner::stubborn();
    let config = PoolConfig {
        shutdown_grace_seconds: Some(0),
        ..pool_config()
    };
    let (mut supervisor, _tx) = supervisor(config, spawner.clone());
    supervisor.tick_at(Instant::now()).await;

    supervisor.shutdown().await.unwrap();

    assert!(supervisor.pool().is_empty());
    for handle in spawner.handles() {
        assert_eq!(handle.received(), vec![ControlMessage::Shutdown]);
        assert!(handle.is_killed());
    }
}

#[tokio::test]
async fn test_run_stops_on_shutdown_command() {
    let spawner = FakeSpawner::new();
    let (supervisor, tx) = supervisor(pool_config(), spawner.clone());
    tx.send(ControlCommand::Shutdown).unwrap();

    tokio::time::timeout(Duration::from_secs(5), supervisor.run())
        .await
        .expect("supervisor did not stop")
        .unwrap();

    assert_eq!(spawner.spawned(), 6);
    assert!(spawner.alive().is_empty());
    assert!(spawner.handles().iter().all(|handle| !handle.is_killed()));
}
