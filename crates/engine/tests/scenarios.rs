// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end scenarios across the registries, orchestrator and task engine

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use chrono::{DateTime, TimeZone, Utc};
use keeper_adapters::{FakeSessionProvider, SessionCall};
use keeper_core::{
    Clock, Event, EventBus, EventReceiver, FakeClock, InstanceDraft, InstanceId, InstanceState,
    PowerAction, SequentialIdGen, StopStrategy, TaskAction, TaskDraft,
};
use keeper_engine::{LifecycleConfig, Orchestrator, TaskEngine, TaskEngineConfig, TaskError};
use keeper_storage::{InstanceRegistry, TaskRegistry, TASKS_FILE};
use std::path::PathBuf;
use std::time::Duration;
use tempfile::TempDir;

struct World {
    orchestrator: Orchestrator<FakeSessionProvider, FakeClock, SequentialIdGen>,
    engine: TaskEngine<FakeSessionProvider, FakeClock, SequentialIdGen>,
    provider: FakeSessionProvider,
    clock: FakeClock,
    events: EventReceiver,
    data: TempDir,
    server_dir: PathBuf,
}

fn world() -> World {
    let data = tempfile::tempdir().unwrap();
    let server_dir = data.path().join("srv");
    std::fs::create_dir_all(&server_dir).unwrap();

    let provider = FakeSessionProvider::new();
    let clock = FakeClock::new();
    let ids = SequentialIdGen::new("id");
    let bus = EventBus::new();
    let events = bus.subscribe();
    let orchestrator = Orchestrator::new(
        InstanceRegistry::open(data.path(), Duration::from_secs(1)).unwrap(),
        provider.clone(),
        clock.clone(),
        ids.clone(),
        bus,
        LifecycleConfig::default(),
    );
    let engine = TaskEngine::new(
        TaskRegistry::open(data.path()).unwrap(),
        orchestrator.clone(),
        clock.clone(),
        ids,
        TaskEngineConfig::default(),
    );
    World {
        orchestrator,
        engine,
        provider,
        clock,
        events,
        data,
        server_dir,
    }
}

impl World {
    fn server(&self) -> InstanceId {
        self.orchestrator
            .create_instance(
                InstanceDraft::new("srv", &self.server_dir)
                    .with_command("./start.sh")
                    .with_stop_strategy(StopStrategy::TypedStopCommand),
            )
            .unwrap()
            .id
    }

    fn drain(&mut self) -> Vec<Event> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }

    fn assert_invariant(&self) {
        for snapshot in self.orchestrator.list() {
            let status = &snapshot.status;
            assert_eq!(
                status.session_id.is_some(),
                matches!(
                    status.state,
                    InstanceState::Starting | InstanceState::Running | InstanceState::Stopping
                ),
                "{:?}",
                status
            );
        }
    }

    async fn sleep_until(&self, at: DateTime<Utc>) {
        let delay = (at - self.clock.now()).to_std().unwrap_or_default();
        tokio::time::sleep(delay).await;
    }
}

#[tokio::test(start_paused = true)]
async fn scenario_a_start_writes_the_command_and_runs() {
    let w = world();
    let id = w.server();

    let session_id = w.orchestrator.start(&id).await.unwrap();

    assert_eq!(
        w.orchestrator.status(&id).unwrap().state,
        InstanceState::Running
    );
    assert_eq!(w.provider.writes(&session_id), vec![b"./start.sh\n".to_vec()]);
    match &w.provider.calls()[0] {
        SessionCall::Create { cwd, .. } => assert_eq!(cwd, &w.server_dir),
        other => panic!("expected create, got {:?}", other),
    }
    w.assert_invariant();
}

#[tokio::test(start_paused = true)]
async fn scenario_b_hung_process_is_force_closed_after_grace() {
    let w = world();
    w.provider.set_ignore_stop();
    let id = w.server();
    let session_id = w.orchestrator.start(&id).await.unwrap();

    w.orchestrator.stop(&id).await.unwrap();
    assert_eq!(w.provider.writes(&session_id).last().unwrap(), b"stop\n");
    w.assert_invariant();

    tokio::time::sleep(Duration::from_secs(10) + Duration::from_millis(1)).await;

    assert_eq!(w.provider.close_count(&session_id), 1);
    assert_eq!(
        w.orchestrator.status(&id).unwrap().state,
        InstanceState::Stopped
    );
    w.assert_invariant();
}

#[tokio::test(start_paused = true)]
async fn scenario_c_cron_restart_fires_once_and_moves_on() {
    let mut w = world();
    let id = w.server();
    w.orchestrator.start(&id).await.unwrap();
    let task = w
        .engine
        .create_task(TaskDraft::new(
            "five minutely restart",
            id.clone(),
            TaskAction::power(PowerAction::Restart),
            "0 */5 * * * *",
        ))
        .unwrap();
    let boundary = Utc.with_ymd_and_hms(2026, 1, 1, 0, 5, 0).unwrap();
    assert_eq!(task.next_run, Some(boundary));
    w.drain();

    w.sleep_until(boundary + chrono::TimeDelta::seconds(4)).await;

    let states: Vec<_> = w
        .drain()
        .into_iter()
        .filter_map(|e| match e {
            Event::InstanceStatusChanged { state, .. } => Some(state),
            _ => None,
        })
        .collect();
    assert_eq!(
        states,
        vec![
            InstanceState::Stopping,
            InstanceState::Stopped,
            InstanceState::Starting,
            InstanceState::Running,
        ]
    );
    let task = w.engine.get_task(&task.id).unwrap();
    assert_eq!(
        task.next_run,
        Some(boundary + chrono::TimeDelta::minutes(5))
    );
    w.assert_invariant();
}

#[tokio::test(start_paused = true)]
async fn scenario_d_invalid_cron_persists_nothing() {
    let w = world();
    let id = w.server();

    let err = w
        .engine
        .create_task(TaskDraft::new(
            "broken",
            id,
            TaskAction::command("say hi"),
            "not-a-cron",
        ))
        .unwrap_err();

    assert!(matches!(err, TaskError::InvalidSchedule(_)));
    assert!(w.engine.list_tasks().is_empty());
    assert!(!w.data.path().join(TASKS_FILE).exists());
}

#[tokio::test(start_paused = true)]
async fn definitions_survive_a_restart_but_status_does_not() {
    let w = world();
    let id = w.server();
    w.orchestrator.start(&id).await.unwrap();
    w.orchestrator.shutdown().await.unwrap();

    let registry = InstanceRegistry::open(w.data.path(), Duration::from_secs(1)).unwrap();
    let reborn = Orchestrator::new(
        registry,
        FakeSessionProvider::new(),
        w.clock.clone(),
        SequentialIdGen::new("boot"),
        EventBus::new(),
        LifecycleConfig::default(),
    );

    let status = reborn.status(&id).unwrap();
    assert_eq!(status.state, InstanceState::Stopped);
    assert_eq!(status.session_id, None);
    assert_eq!(reborn.definition(&id).unwrap().name, "srv");
}

#[tokio::test(start_paused = true)]
async fn invariant_holds_through_a_busy_sequence() {
    let w = world();
    let a = w.server();
    let b = w.server();

    w.orchestrator.start(&a).await.unwrap();
    w.assert_invariant();
    w.provider.set_never_ready();
    let _ = w.orchestrator.start(&b).await;
    w.assert_invariant();
    w.provider.reset_behavior();
    w.orchestrator.start(&b).await.unwrap();
    w.provider.set_ignore_stop();
    w.orchestrator.stop(&a).await.unwrap();
    w.assert_invariant();
    w.orchestrator.restart(&b).await.unwrap();
    w.assert_invariant();
    tokio::time::sleep(Duration::from_secs(30)).await;
    w.assert_invariant();
    w.orchestrator.shutdown().await.unwrap();
    w.assert_invariant();
}
