// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::config::LifecycleConfig;
use chrono::TimeZone;
use keeper_adapters::{FakeSessionProvider, SessionCall};
use keeper_core::{
    EventBus, EventReceiver, FakeClock, InstanceDraft, InstanceState, SequentialIdGen,
    StopStrategy,
};
use keeper_storage::{load_list, InstanceRegistry, TASKS_FILE};
use std::time::Duration;
use tempfile::TempDir;

type TestEngine = TaskEngine<FakeSessionProvider, FakeClock, SequentialIdGen>;

struct Harness {
    engine: TestEngine,
    orchestrator: Orchestrator<FakeSessionProvider, FakeClock, SequentialIdGen>,
    provider: FakeSessionProvider,
    clock: FakeClock,
    events: EventReceiver,
    instance: InstanceId,
    dir: TempDir,
}

impl Harness {
    fn executions(&mut self) -> Vec<(bool, Option<String>)> {
        let mut out = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            if let Event::TaskExecuted { success, error, .. } = event {
                out.push((success, error));
            }
        }
        out
    }

    fn sessions_created(&self) -> usize {
        self.provider
            .calls()
            .iter()
            .filter(|c| matches!(c, SessionCall::Create { .. }))
            .count()
    }

    fn task(&self, action: TaskAction, schedule: &str) -> Result<ScheduledTask, TaskError> {
        self.engine.create_task(TaskDraft::new(
            "nightly",
            self.instance.clone(),
            action,
            schedule,
        ))
    }

    /// Sleep until the fake wall clock reads `at`
    async fn sleep_until(&self, at: DateTime<Utc>) {
        let delay = (at - self.clock.now()).to_std().unwrap_or_default();
        tokio::time::sleep(delay).await;
    }
}

fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 1, h, m, s).unwrap()
}

fn engine_over(
    dir: &TempDir,
    orchestrator: &Orchestrator<FakeSessionProvider, FakeClock, SequentialIdGen>,
    clock: &FakeClock,
) -> TestEngine {
    TaskEngine::new(
        TaskRegistry::open(dir.path()).unwrap(),
        orchestrator.clone(),
        clock.clone(),
        SequentialIdGen::new("task"),
        TaskEngineConfig::default(),
    )
}

fn setup() -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let clock = FakeClock::new();
    let provider = FakeSessionProvider::new();
    let bus = EventBus::new();
    let events = bus.subscribe();
    let orchestrator = Orchestrator::new(
        InstanceRegistry::open(dir.path(), Duration::from_secs(1)).unwrap(),
        provider.clone(),
        clock.clone(),
        SequentialIdGen::new("id"),
        bus,
        LifecycleConfig::default(),
    );
    let instance = orchestrator
        .create_instance(
            InstanceDraft::new("survival", dir.path())
                .with_command("java -jar server.jar nogui")
                .with_stop_strategy(StopStrategy::TypedStopCommand),
        )
        .unwrap()
        .id;
    let engine = engine_over(&dir, &orchestrator, &clock);
    Harness {
        engine,
        orchestrator,
        provider,
        clock,
        events,
        instance,
        dir,
    }
}

// =============================================================================
// create / validate
// =============================================================================

#[tokio::test(start_paused = true)]
async fn create_computes_next_run_and_arms() {
    let h = setup();

    let task = h
        .task(TaskAction::power(PowerAction::Restart), "0 */5 * * * *")
        .unwrap();

    assert_eq!(task.next_run, Some(at(0, 5, 0)));
    assert_eq!(task.instance_name, "survival");
    assert!(task.last_run.is_none());
    assert!(h.engine.is_armed(&task.id));

    let on_disk: Vec<ScheduledTask> = load_list(&h.dir.path().join(TASKS_FILE)).unwrap();
    assert_eq!(on_disk, vec![task]);
}

#[tokio::test(start_paused = true)]
async fn five_field_expressions_fire_on_the_minute() {
    let h = setup();

    let task = h
        .task(TaskAction::command("save-all"), "*/15 * * * *")
        .unwrap();

    assert_eq!(task.schedule, "*/15 * * * *");
    assert_eq!(task.next_run, Some(at(0, 15, 0)));
}

#[tokio::test(start_paused = true)]
async fn invalid_schedule_is_rejected_and_nothing_persisted() {
    let h = setup();

    let err = h
        .task(TaskAction::power(PowerAction::Start), "not-a-cron")
        .unwrap_err();

    assert!(matches!(err, TaskError::InvalidSchedule(_)));
    assert!(h.engine.list_tasks().is_empty());
    assert!(!h.dir.path().join(TASKS_FILE).exists());
    assert_eq!(h.engine.armed_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn unknown_instance_is_rejected() {
    let h = setup();

    let err = h
        .engine
        .create_task(TaskDraft::new(
            "orphan",
            InstanceId::new("ghost"),
            TaskAction::power(PowerAction::Start),
            "0 0 4 * * *",
        ))
        .unwrap_err();

    assert!(matches!(err, TaskError::InstanceNotFound(_)));
}

#[tokio::test(start_paused = true)]
async fn disabled_tasks_are_stored_but_not_armed() {
    let h = setup();

    let task = h
        .engine
        .create_task(
            TaskDraft::new(
                "later",
                h.instance.clone(),
                TaskAction::power(PowerAction::Stop),
                "0 0 * * * *",
            )
            .disabled(),
        )
        .unwrap();

    assert!(!task.enabled);
    assert_eq!(task.next_run, None);
    assert!(!h.engine.is_armed(&task.id));
    assert_eq!(h.engine.get_task(&task.id), Some(task));
}

#[tokio::test(start_paused = true)]
async fn next_run_time_uses_the_configured_zone() {
    let h = setup();

    // 04:00 in Shanghai is 20:00 UTC the previous day
    let next = h.engine.next_run_time("0 0 4 * * *").unwrap();
    assert_eq!(next, Some(at(20, 0, 0)));

    assert!(h.engine.next_run_time("61 * * * * *").is_err());
}

// =============================================================================
// firing
// =============================================================================

#[tokio::test(start_paused = true)]
async fn power_restart_fires_once_per_boundary() {
    let mut h = setup();
    h.orchestrator.start(&h.instance).await.unwrap();
    let task = h
        .task(TaskAction::power(PowerAction::Restart), "0 */5 * * * *")
        .unwrap();

    h.sleep_until(at(0, 4, 59)).await;
    assert_eq!(h.sessions_created(), 1);

    // Restart includes the 2s settle delay
    h.sleep_until(at(0, 5, 3)).await;

    assert_eq!(h.sessions_created(), 2);
    assert_eq!(
        h.orchestrator.status(&h.instance).unwrap().state,
        InstanceState::Running
    );
    let task = h.engine.get_task(&task.id).unwrap();
    assert_eq!(task.next_run, Some(at(0, 10, 0)));
    let last_run = task.last_run.unwrap();
    assert!(last_run >= at(0, 5, 0) && last_run < at(0, 5, 3));
    assert_eq!(h.executions(), vec![(true, None)]);
    assert!(h.engine.is_armed(&task.id));
}

#[tokio::test(start_paused = true)]
async fn schedule_edited_mid_restart_is_the_one_rearmed() {
    let mut h = setup();
    h.orchestrator.start(&h.instance).await.unwrap();
    let task = h
        .task(TaskAction::power(PowerAction::Restart), "0 */5 * * * *")
        .unwrap();

    // The restart is still in its settle delay
    h.sleep_until(at(0, 5, 0) + chrono::TimeDelta::milliseconds(300))
        .await;
    assert_eq!(h.sessions_created(), 1);
    let edited = h
        .engine
        .update_task(
            &task.id,
            TaskPatch {
                schedule: Some("0 0 */6 * * *".into()),
                ..Default::default()
            },
        )
        .unwrap();
    // 12:00 in Asia/Shanghai
    assert_eq!(edited.next_run, Some(at(4, 0, 0)));

    h.sleep_until(at(0, 5, 30)).await;

    assert_eq!(h.sessions_created(), 2);
    let stored = h.engine.get_task(&task.id).unwrap();
    assert_eq!(stored.schedule, "0 0 */6 * * *");
    assert!(stored.last_run.is_some());
    assert_eq!(stored.next_run, Some(at(4, 0, 0)));
    assert!(h.engine.is_armed(&task.id));

    // The old boundary no longer fires
    h.sleep_until(at(0, 10, 30)).await;
    assert_eq!(h.sessions_created(), 2);
    assert_eq!(h.executions(), vec![(true, None)]);
}

#[tokio::test(start_paused = true)]
async fn rename_mid_restart_does_not_fire_again() {
    let mut h = setup();
    h.orchestrator.start(&h.instance).await.unwrap();
    let task = h
        .task(TaskAction::power(PowerAction::Restart), "0 */5 * * * *")
        .unwrap();

    h.sleep_until(at(0, 5, 0) + chrono::TimeDelta::milliseconds(300))
        .await;
    let renamed = h
        .engine
        .update_task(
            &task.id,
            TaskPatch {
                name: Some("hourly".into()),
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(renamed.next_run, Some(at(0, 10, 0)));

    h.sleep_until(at(0, 9, 0)).await;

    assert_eq!(h.sessions_created(), 2);
    assert_eq!(h.executions(), vec![(true, None)]);
    let stored = h.engine.get_task(&task.id).unwrap();
    assert_eq!(stored.name, "hourly");
    assert_eq!(stored.next_run, Some(at(0, 10, 0)));
}

#[tokio::test(start_paused = true)]
async fn command_is_typed_then_confirmed_with_enter() {
    let mut h = setup();
    let session_id = h.orchestrator.start(&h.instance).await.unwrap();
    h.task(TaskAction::command("say Restarting soon"), "0 * * * * *")
        .unwrap();

    h.sleep_until(at(0, 1, 1)).await;

    let writes = h.provider.writes(&session_id);
    assert_eq!(
        writes[1..],
        [b"say Restarting soon\n".to_vec(), b"\n".to_vec()]
    );
    assert_eq!(h.executions(), vec![(true, None)]);
}

#[tokio::test(start_paused = true)]
async fn failures_are_reported_and_the_task_keeps_firing() {
    let mut h = setup();
    let task = h
        .task(TaskAction::command("save-all"), "0 * * * * *")
        .unwrap();

    h.sleep_until(at(0, 2, 30)).await;

    let executions = h.executions();
    assert_eq!(executions.len(), 2);
    for (success, error) in executions {
        assert!(!success);
        assert!(error.unwrap().contains("not running"));
    }
    let task = h.engine.get_task(&task.id).unwrap();
    assert!(task.enabled);
    assert_eq!(task.next_run, Some(at(0, 3, 0)));
}

#[tokio::test(start_paused = true)]
async fn every_firing_moves_next_run_past_the_firing() {
    let mut h = setup();
    h.orchestrator.start(&h.instance).await.unwrap();
    let task = h
        .task(TaskAction::command("list"), "*/10 * * * * *")
        .unwrap();

    let mut previous = task.next_run.unwrap();
    for _ in 0..3 {
        h.sleep_until(previous + chrono::TimeDelta::milliseconds(500))
            .await;
        let current = h.engine.get_task(&task.id).unwrap();
        let last_run = current.last_run.unwrap();
        let next_run = current.next_run.unwrap();
        assert!(last_run >= previous);
        assert!(next_run > last_run);
        previous = next_run;
    }
    assert_eq!(h.executions().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn run_task_now_uses_the_firing_path() {
    let mut h = setup();
    let task = h
        .task(TaskAction::power(PowerAction::Start), "0 0 4 * * *")
        .unwrap();

    h.engine.run_task_now(&task.id).await.unwrap();

    assert_eq!(
        h.orchestrator.status(&h.instance).unwrap().state,
        InstanceState::Running
    );
    let stamped = h.engine.get_task(&task.id).unwrap();
    assert_eq!(stamped.last_run, Some(h.clock.now()));
    assert_eq!(stamped.next_run, task.next_run);
    assert_eq!(h.executions(), vec![(true, None)]);

    // Starting again fails but is still recorded
    let err = h.engine.run_task_now(&task.id).await.unwrap_err();
    assert!(matches!(err, TaskError::Lifecycle(_)));
    assert_eq!(h.executions().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn run_task_now_leaves_a_disabled_task_disarmed() {
    let h = setup();
    let task = h
        .engine
        .create_task(
            TaskDraft::new(
                "manual",
                h.instance.clone(),
                TaskAction::power(PowerAction::Start),
                "0 0 4 * * *",
            )
            .disabled(),
        )
        .unwrap();

    h.engine.run_task_now(&task.id).await.unwrap();

    let stamped = h.engine.get_task(&task.id).unwrap();
    assert_eq!(stamped.last_run, Some(h.clock.now()));
    assert_eq!(stamped.next_run, None);
    assert!(!h.engine.is_armed(&task.id));
}

// =============================================================================
// edit / toggle / delete
// =============================================================================

#[tokio::test(start_paused = true)]
async fn disabling_cancels_and_enabling_recomputes_from_now() {
    let mut h = setup();
    h.orchestrator.start(&h.instance).await.unwrap();
    let task = h
        .task(TaskAction::command("save-all"), "0 */5 * * * *")
        .unwrap();

    let disabled = h.engine.toggle_task(&task.id, false).unwrap();
    assert!(!disabled.enabled);
    assert!(!h.engine.is_armed(&task.id));

    h.sleep_until(at(0, 12, 0)).await;
    assert!(h.executions().is_empty());

    let enabled = h.engine.toggle_task(&task.id, true).unwrap();
    assert_eq!(enabled.next_run, Some(at(0, 15, 0)));
    assert!(h.engine.is_armed(&task.id));

    h.sleep_until(at(0, 15, 1)).await;
    assert_eq!(h.executions().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn update_validates_before_changing_anything() {
    let h = setup();
    let task = h
        .task(TaskAction::power(PowerAction::Restart), "0 0 4 * * *")
        .unwrap();

    let err = h
        .engine
        .update_task(
            &task.id,
            TaskPatch {
                name: Some("renamed".to_string()),
                schedule: Some("every tuesday".to_string()),
                ..Default::default()
            },
        )
        .unwrap_err();
    assert!(matches!(err, TaskError::InvalidSchedule(_)));
    assert_eq!(h.engine.get_task(&task.id), Some(task.clone()));
    assert!(h.engine.is_armed(&task.id));

    let err = h
        .engine
        .update_task(
            &task.id,
            TaskPatch {
                instance_id: Some(InstanceId::new("ghost")),
                ..Default::default()
            },
        )
        .unwrap_err();
    assert!(matches!(err, TaskError::InstanceNotFound(_)));
}

#[tokio::test(start_paused = true)]
async fn update_recomputes_next_run_on_schedule_change() {
    let h = setup();
    let task = h
        .task(TaskAction::power(PowerAction::Restart), "0 0 4 * * *")
        .unwrap();

    let renamed = h
        .engine
        .update_task(
            &task.id,
            TaskPatch {
                name: Some("lunch".to_string()),
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(renamed.next_run, task.next_run);

    let moved = h
        .engine
        .update_task(
            &task.id,
            TaskPatch {
                schedule: Some("0 30 * * * *".to_string()),
                action: Some(TaskAction::command("save-all")),
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(moved.name, "lunch");
    assert_eq!(moved.next_run, Some(at(0, 30, 0)));
    assert_eq!(moved.action, TaskAction::command("save-all"));
    assert!(h.engine.is_armed(&task.id));
}

#[tokio::test(start_paused = true)]
async fn update_retargets_and_snapshots_the_instance_name() {
    let h = setup();
    let task = h
        .task(TaskAction::power(PowerAction::Restart), "0 0 4 * * *")
        .unwrap();
    let other = h
        .orchestrator
        .create_instance(InstanceDraft::new("creative", h.dir.path()))
        .unwrap()
        .id;

    let moved = h
        .engine
        .update_task(
            &task.id,
            TaskPatch {
                instance_id: Some(other.clone()),
                ..Default::default()
            },
        )
        .unwrap();

    assert_eq!(moved.instance_id, other);
    assert_eq!(moved.instance_name, "creative");
    assert_eq!(h.engine.tasks_for_instance(&other), vec![moved]);
    assert!(h.engine.tasks_for_instance(&h.instance).is_empty());
}

#[tokio::test(start_paused = true)]
async fn delete_cancels_the_timer() {
    let mut h = setup();
    h.orchestrator.start(&h.instance).await.unwrap();
    let task = h
        .task(TaskAction::command("save-all"), "0 * * * * *")
        .unwrap();

    h.engine.delete_task(&task.id).unwrap();
    assert!(!h.engine.is_armed(&task.id));

    h.sleep_until(at(0, 3, 0)).await;
    assert!(h.executions().is_empty());

    let err = h.engine.delete_task(&task.id).unwrap_err();
    assert!(matches!(err, TaskError::NotFound(_)));
}

// =============================================================================
// boot / shutdown
// =============================================================================

#[tokio::test(start_paused = true)]
async fn start_rearms_from_now_without_replaying() {
    let mut h = setup();
    let enabled = h
        .task(TaskAction::command("save-all"), "0 0 * * * *")
        .unwrap();
    let disabled = h
        .engine
        .create_task(
            TaskDraft::new(
                "off",
                h.instance.clone(),
                TaskAction::command("save-all"),
                "0 0 * * * *",
            )
            .disabled(),
        )
        .unwrap();
    h.engine.shutdown().await;
    assert_eq!(h.engine.armed_count(), 0);

    // Daemon was down across several occurrences
    h.clock.set(at(5, 30, 0));
    let engine = engine_over(&h.dir, &h.orchestrator, &h.clock);
    assert_eq!(engine.start(), 1);

    let rearmed = engine.get_task(&enabled.id).unwrap();
    assert_eq!(rearmed.next_run, Some(at(6, 0, 0)));
    assert!(engine.is_armed(&enabled.id));
    assert!(!engine.is_armed(&disabled.id));
    assert!(h.executions().is_empty());
}

#[tokio::test(start_paused = true)]
async fn shutdown_waits_for_a_firing_and_arms_nothing() {
    let h = setup();
    h.orchestrator.start(&h.instance).await.unwrap();
    let task = h
        .task(TaskAction::power(PowerAction::Restart), "0 */5 * * * *")
        .unwrap();

    // Mid restart: stopped, waiting out the settle delay
    h.sleep_until(at(0, 5, 0) + chrono::TimeDelta::milliseconds(300))
        .await;
    h.engine.shutdown().await;

    // The restart ran to completion before shutdown returned
    assert_eq!(h.sessions_created(), 2);
    assert_eq!(h.engine.armed_count(), 0);
    assert!(h.engine.get_task(&task.id).unwrap().last_run.is_some());

    h.orchestrator.shutdown().await.unwrap();
    assert_eq!(
        h.orchestrator.status(&h.instance).unwrap().state,
        InstanceState::Stopped
    );

    h.sleep_until(at(0, 15, 30)).await;
    assert_eq!(h.engine.armed_count(), 0);
    assert_eq!(h.sessions_created(), 2);
}

#[tokio::test(start_paused = true)]
async fn shutdown_disarms_every_timer() {
    let mut h = setup();
    h.orchestrator.start(&h.instance).await.unwrap();
    h.task(TaskAction::command("a"), "0 * * * * *").unwrap();
    h.task(TaskAction::command("b"), "30 * * * * *").unwrap();
    assert_eq!(h.engine.armed_count(), 2);

    h.engine.shutdown().await;
    h.sleep_until(at(0, 5, 0)).await;

    assert_eq!(h.engine.armed_count(), 0);
    assert!(h.executions().is_empty());
}
