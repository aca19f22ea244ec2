//! DLQ replay against a real PostgreSQL instance: a normal replay back to
//! PENDING, and the DONE-guard that refuses replay against a task that has
//! since succeeded through some other path.

use a2a_core::dispatcher::{self, CreateTaskRequest, Identity, NextTask};
use a2a_core::error::DispatchError;
use a2a_core::metrics::Metrics;
use a2a_core::registry;
use a2a_core::dlq;
use a2a_db::models::TaskStatus;
use a2a_test_utils::{create_test_db, drop_test_db};

fn base_request(task_code: &str) -> CreateTaskRequest {
    CreateTaskRequest {
        task_code: task_code.to_string(),
        area: "ci/exchange".to_string(),
        owner_role: "SRE Engineer".to_string(),
        instructions: "investigate the failing job".to_string(),
        how_to_repro: "run the pipeline".to_string(),
        expected: "green build".to_string(),
        evidence_requirements: "ci log link".to_string(),
        message_id: Some(format!("msg:{task_code}")),
        max_retries: Some(0),
        ..Default::default()
    }
}

async fn dlq_a_task(pool: &sqlx::PgPool, metrics: &Metrics, task_code: &str) -> a2a_db::models::Task {
    registry::register(pool, "agent-1", "SRE Engineer", vec![], vec![], 2, 60, None)
        .await
        .ok();

    let created = dispatcher::create(pool, metrics, base_request(task_code)).await.unwrap();
    let dispatched = match dispatcher::next(pool, metrics, "agent-1").await.unwrap() {
        NextTask::Task(task) => task,
        NextTask::None => panic!("expected a task"),
    };
    assert_eq!(dispatched.task_id, created.task_id);

    dispatcher::result(
        pool,
        metrics,
        b"test-secret",
        Identity::TaskId(dispatched.task_id),
        Some(TaskStatus::Fail),
        None,
        Some("exec_error"),
        Some("boom"),
    )
    .await
    .unwrap()
}

#[tokio::test]
async fn replay_resets_dlq_entry_to_pending() {
    let (pool, db_name) = create_test_db().await;
    let metrics = Metrics::new();

    let dlq_task = dlq_a_task(&pool, &metrics, "TASK-R1").await;
    assert_eq!(dlq_task.status, TaskStatus::Dlq);

    let entry = dlq::get_by_task_code(&pool, "TASK-R1").await.unwrap().unwrap();
    let replayed = dlq::replay(&pool, entry.dlq_id, "operator", "retry after fix").await.unwrap();

    assert_eq!(replayed.task_id, dlq_task.task_id);
    assert_eq!(replayed.status, TaskStatus::Pending);
    assert_eq!(replayed.retry_count, 0);

    let reloaded_entry = dlq::get(&pool, entry.dlq_id).await.unwrap().unwrap();
    assert_eq!(reloaded_entry.replay_who.as_deref(), Some("operator"));

    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn replay_refuses_when_task_already_done() {
    let (pool, db_name) = create_test_db().await;
    let metrics = Metrics::new();

    let dlq_task = dlq_a_task(&pool, &metrics, "TASK-R2").await;
    let entry = dlq::get_by_task_code(&pool, "TASK-R2").await.unwrap().unwrap();

    // Simulate the task independently reaching DONE after it was captured.
    sqlx::query("UPDATE tasks SET status = 'DONE' WHERE task_id = $1")
        .bind(dlq_task.task_id)
        .execute(&pool)
        .await
        .unwrap();

    let err = dlq::replay(&pool, entry.dlq_id, "operator", "retry after fix")
        .await
        .unwrap_err();
    assert!(matches!(err, DispatchError::ReplayForbidden));

    drop_test_db(&db_name).await;
}
