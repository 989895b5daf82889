//! End-to-end scheduler behaviour through the public API

use kairos_core::scheduler::{
    ExecutionStatus, NewTask, SchedulerConfig, SchedulerError, TaskId, TaskScheduler, TaskStatus,
    TaskStore,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

struct TestContext {
    scheduler: TaskScheduler,
    _dir: TempDir,
}

async fn create_test_context(config: SchedulerConfig) -> TestContext {
    let dir = TempDir::new().unwrap();
    let store = TaskStore::from_path(&dir.path().join("kairos.db"))
        .await
        .unwrap();
    let scheduler = TaskScheduler::builder()
        .store(store)
        .config(config.with_check_interval(1).with_shutdown_timeout(5))
        .build()
        .unwrap();
    TestContext {
        scheduler,
        _dir: dir,
    }
}

/// Wait until `count` attempts are recorded and none is in flight
async fn wait_for_attempts(scheduler: &TaskScheduler, id: TaskId, count: usize) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let recorded = scheduler.task_history(id).await.unwrap().len();
        if recorded >= count && !scheduler.is_running(id) {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "task {id}: {recorded} of {count} attempts recorded"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_add_scheduled_task() {
    let ctx = create_test_context(SchedulerConfig::new()).await;
    let scheduler = &ctx.scheduler;
    scheduler.start().await.unwrap();

    let id = scheduler
        .add_task(
            NewTask::new("nightly_extraction")
                .with_priority("critical")
                .with_schedule("0 23 * * *"),
        )
        .await
        .unwrap();

    let task = scheduler.get_task_status(id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Pending);
    assert_eq!(task.schedule.as_deref(), Some("0 23 * * *"));
    assert_eq!(task.retry_count, 0);
    assert_eq!(task.max_retries, 3);
    assert!(task.next_run_at.unwrap() > task.created_at);

    scheduler.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_invalid_priority_persists_nothing() {
    let ctx = create_test_context(SchedulerConfig::new()).await;
    let scheduler = &ctx.scheduler;

    let result = scheduler
        .add_task(NewTask::new("x").with_priority("urgent"))
        .await;
    assert!(matches!(result, Err(SchedulerError::Validation(_))));

    let result = scheduler.add_task(NewTask::new("  ")).await;
    assert!(matches!(result, Err(SchedulerError::Validation(_))));

    assert!(scheduler.get_all_tasks(None).await.unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_invalid_schedule_is_soft_failure() {
    let ctx = create_test_context(SchedulerConfig::new()).await;
    let scheduler = &ctx.scheduler;
    scheduler.start().await.unwrap();

    let id = scheduler
        .add_task(NewTask::new("typo").with_schedule("every day at noon"))
        .await
        .unwrap();

    let task = scheduler.get_task_status(id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Pending);
    assert_eq!(task.schedule.as_deref(), Some("every day at noon"));
    assert!(task.next_run_at.is_none());

    scheduler.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_manual_retries_until_failed() {
    let ctx = create_test_context(SchedulerConfig::new()).await;
    let scheduler = &ctx.scheduler;
    scheduler.register("always_fails", || async {
        Err::<(), _>(anyhow::anyhow!("upstream unavailable"))
    });
    scheduler.start().await.unwrap();

    let id = scheduler
        .add_task(NewTask::new("always_fails").with_max_retries(3))
        .await
        .unwrap();

    let mut seen = Vec::new();
    for attempt in 1..=4 {
        assert!(scheduler.trigger_task(id).await.unwrap());
        wait_for_attempts(scheduler, id, attempt).await;
        let task = scheduler.get_task_status(id).await.unwrap().unwrap();
        assert!(task.retry_count <= task.max_retries);
        seen.push((task.status, task.retry_count));
    }

    assert_eq!(
        seen,
        vec![
            (TaskStatus::Pending, 1),
            (TaskStatus::Pending, 2),
            (TaskStatus::Pending, 3),
            (TaskStatus::Failed, 3),
        ]
    );

    let history = scheduler.task_history(id).await.unwrap();
    assert_eq!(history.len(), 4);
    assert!(history.windows(2).all(|w| w[0].started_at <= w[1].started_at));
    assert!(history
        .iter()
        .all(|r| r.error_message.as_deref() == Some("upstream unavailable")));

    scheduler.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_trigger_completed_task_is_noop() {
    let ctx = create_test_context(SchedulerConfig::new()).await;
    let scheduler = &ctx.scheduler;
    scheduler.register("once", || async { Ok::<_, anyhow::Error>(()) });
    scheduler.start().await.unwrap();

    let id = scheduler.add_task(NewTask::new("once")).await.unwrap();
    assert!(scheduler.trigger_task(id).await.unwrap());
    wait_for_attempts(scheduler, id, 1).await;

    let before = scheduler.get_task_status(id).await.unwrap().unwrap();
    assert_eq!(before.status, TaskStatus::Completed);

    assert!(!scheduler.trigger_task(id).await.unwrap());
    tokio::time::sleep(Duration::from_millis(100)).await;

    let after = scheduler.get_task_status(id).await.unwrap().unwrap();
    assert_eq!(before, after);
    assert_eq!(scheduler.task_history(id).await.unwrap().len(), 1);

    scheduler.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_cancelled_task_never_runs() {
    let ctx = create_test_context(SchedulerConfig::new()).await;
    let scheduler = &ctx.scheduler;
    let runs = Arc::new(AtomicUsize::new(0));
    let counter = runs.clone();
    scheduler.register("ticker", move || {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<_, anyhow::Error>(())
        }
    });
    scheduler.start().await.unwrap();

    let id = scheduler
        .add_task(NewTask::new("ticker").with_schedule("interval 1"))
        .await
        .unwrap();
    assert!(scheduler.cancel_task(id).await.unwrap());

    tokio::time::sleep(Duration::from_millis(2500)).await;

    let task = scheduler.get_task_status(id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Cancelled);
    assert_eq!(runs.load(Ordering::SeqCst), 0);
    assert!(scheduler.task_history(id).await.unwrap().is_empty());

    // Cancelled is final
    assert!(!scheduler.cancel_task(id).await.unwrap());
    assert!(!scheduler.trigger_task(id).await.unwrap());
    assert!(!scheduler.cancel_task(9999).await.unwrap());

    scheduler.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_interval_task_fires_repeatedly_without_overlap() {
    let ctx = create_test_context(SchedulerConfig::new()).await;
    let scheduler = &ctx.scheduler;

    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let (a, p) = (active.clone(), peak.clone());
    scheduler.register("slow_tick", move || {
        let (active, peak) = (a.clone(), p.clone());
        async move {
            let now = active.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            // Longer than the interval
            tokio::time::sleep(Duration::from_millis(1500)).await;
            active.fetch_sub(1, Ordering::SeqCst);
            Ok::<_, anyhow::Error>(())
        }
    });
    scheduler.start().await.unwrap();

    let id = scheduler
        .add_task(NewTask::new("slow_tick").with_schedule("interval 1"))
        .await
        .unwrap();

    // Firings keep coming while a run is in flight, so only wait for records
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while scheduler.task_history(id).await.unwrap().len() < 2 {
        assert!(tokio::time::Instant::now() < deadline, "second run never recorded");
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    assert_eq!(peak.load(Ordering::SeqCst), 1);
    let task = scheduler.get_task_status(id).await.unwrap().unwrap();
    assert!(task.last_run_at.is_some());

    scheduler.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_unregistered_type_is_recorded_as_failure() {
    let ctx = create_test_context(SchedulerConfig::new()).await;
    let scheduler = &ctx.scheduler;
    scheduler.start().await.unwrap();

    let id = scheduler
        .add_task(NewTask::new("not_registered").with_max_retries(0))
        .await
        .unwrap();
    assert!(scheduler.trigger_task(id).await.unwrap());
    wait_for_attempts(scheduler, id, 1).await;

    let history = scheduler.task_history(id).await.unwrap();
    assert_eq!(history[0].status, ExecutionStatus::Failed);
    assert!(history[0]
        .error_message
        .as_deref()
        .unwrap()
        .contains("no function registered"));

    let task = scheduler.get_task_status(id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Failed);

    let recent = scheduler.recent_executions(5).await.unwrap();
    assert_eq!(recent.len(), 1);

    scheduler.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_lifecycle_errors() {
    let ctx = create_test_context(SchedulerConfig::new()).await;
    let scheduler = &ctx.scheduler;

    assert!(matches!(
        scheduler.trigger_task(1).await,
        Err(SchedulerError::NotRunning)
    ));

    scheduler.start().await.unwrap();
    assert!(matches!(
        scheduler.start().await,
        Err(SchedulerError::AlreadyStarted)
    ));
    assert!(scheduler.is_started().await);

    scheduler.shutdown().await.unwrap();
    assert!(!scheduler.is_started().await);
    // Second shutdown is a no-op
    scheduler.shutdown().await.unwrap();
    assert!(matches!(
        scheduler.trigger_task(1).await,
        Err(SchedulerError::NotRunning)
    ));

    // Restartable
    scheduler.start().await.unwrap();
    scheduler.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_filters_and_ordering() {
    let ctx = create_test_context(SchedulerConfig::new()).await;
    let scheduler = &ctx.scheduler;
    scheduler.register("ok", || async { Ok::<_, anyhow::Error>(()) });
    scheduler.start().await.unwrap();

    let first = scheduler.add_task(NewTask::new("ok")).await.unwrap();
    let second = scheduler
        .add_task(NewTask::new("ok").with_priority("low"))
        .await
        .unwrap();
    assert!(second > first);

    assert!(scheduler.trigger_task(second).await.unwrap());
    wait_for_attempts(scheduler, second, 1).await;

    let all = scheduler.get_all_tasks(None).await.unwrap();
    assert_eq!(all.iter().map(|t| t.id).collect::<Vec<_>>(), vec![first, second]);

    let completed = scheduler
        .get_all_tasks(Some(TaskStatus::Completed))
        .await
        .unwrap();
    assert_eq!(completed.len(), 1);
    assert_eq!(completed[0].id, second);

    assert!(scheduler.running_tasks().is_empty());
    scheduler.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_schedules_survive_restart() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("restart.db");

    let id = {
        let store = TaskStore::from_path(&path).await.unwrap();
        let scheduler = TaskScheduler::new(store.clone(), SchedulerConfig::new());
        let id = scheduler
            .add_task(NewTask::new("hourly").with_schedule("0 * * * *"))
            .await
            .unwrap();
        store.close().await;
        id
    };

    let store = TaskStore::from_path(&path).await.unwrap();
    let scheduler = TaskScheduler::new(store, SchedulerConfig::new().with_check_interval(1));
    scheduler.register("hourly", || async { Ok::<_, anyhow::Error>(()) });
    scheduler.start().await.unwrap();

    let task = scheduler.get_task_status(id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Pending);
    assert!(task.next_run_at.is_some());
    assert!(scheduler.trigger_task(id).await.unwrap());
    wait_for_attempts(&scheduler, id, 1).await;

    scheduler.shutdown().await.unwrap();
}
