//! End-to-end coverage of the Dispatcher against a real PostgreSQL
//! instance: create -> next -> heartbeat -> result, retry/DLQ promotion,
//! idempotent create, and dependency-failure propagation.

use a2a_core::dispatcher::{self, CreateTaskRequest, Identity, NextTask};
use a2a_core::metrics::Metrics;
use a2a_core::registry;
use a2a_db::models::TaskStatus;
use a2a_db::queries::tasks as task_db;
use a2a_test_utils::{create_test_db, drop_test_db};

async fn register_agent(pool: &sqlx::PgPool, agent_id: &str) {
    registry::register(
        pool,
        agent_id,
        "SRE Engineer",
        vec![],
        vec![],
        2,
        60,
        None,
    )
    .await
    .expect("register should succeed");
}

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
        ..Default::default()
    }
}

#[tokio::test]
async fn create_next_heartbeat_result_done() {
    let (pool, db_name) = create_test_db().await;
    let metrics = Metrics::new();
    register_agent(&pool, "agent-1").await;

    let created = dispatcher::create(&pool, &metrics, base_request("TASK-1"))
        .await
        .expect("create should succeed");
    assert_eq!(created.status, TaskStatus::Pending);
    assert_eq!(created.agent_id.as_deref(), Some("agent-1"));

    let dispatched = match dispatcher::next(&pool, &metrics, "agent-1").await.unwrap() {
        NextTask::Task(task) => task,
        NextTask::None => panic!("expected a task"),
    };
    assert_eq!(dispatched.task_id, created.task_id);
    assert_eq!(dispatched.status, TaskStatus::Running);

    let expiry = dispatcher::heartbeat(&pool, dispatched.task_id).await.unwrap();
    assert!(expiry > chrono::Utc::now());

    let result = dispatcher::result(
        &pool,
        &metrics,
        b"test-secret",
        Identity::TaskId(dispatched.task_id),
        Some(TaskStatus::Done),
        Some(serde_json::json!({"summary": "fixed"})),
        None,
        None,
    )
    .await
    .unwrap();
    assert_eq!(result.status, TaskStatus::Done);

    let agent = registry::get(&pool, "agent-1").await.unwrap().unwrap();
    assert_eq!(agent.available_capacity, agent.capacity);

    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn create_is_idempotent_by_message_id() {
    let (pool, db_name) = create_test_db().await;
    let metrics = Metrics::new();
    register_agent(&pool, "agent-1").await;

    let first = dispatcher::create(&pool, &metrics, base_request("TASK-2")).await.unwrap();
    let second = dispatcher::create(&pool, &metrics, base_request("TASK-2")).await.unwrap();
    assert_eq!(first.task_id, second.task_id);

    let agent = registry::get(&pool, "agent-1").await.unwrap().unwrap();
    assert_eq!(agent.available_capacity, agent.capacity - 1);

    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn fail_under_max_retries_requeues_to_pending() {
    let (pool, db_name) = create_test_db().await;
    let metrics = Metrics::new();
    register_agent(&pool, "agent-1").await;

    let mut req = base_request("TASK-3");
    req.max_retries = Some(2);
    let created = dispatcher::create(&pool, &metrics, req).await.unwrap();

    let dispatched = match dispatcher::next(&pool, &metrics, "agent-1").await.unwrap() {
        NextTask::Task(task) => task,
        NextTask::None => panic!("expected a task"),
    };
    assert_eq!(dispatched.task_id, created.task_id);

    let result = dispatcher::result(
        &pool,
        &metrics,
        b"test-secret",
        Identity::TaskId(dispatched.task_id),
        Some(TaskStatus::Fail),
        None,
        Some("exec_error"),
        Some("boom"),
    )
    .await
    .unwrap();
    assert_eq!(result.status, TaskStatus::Pending);
    assert_eq!(result.retry_count, 1);

    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn fail_past_max_retries_promotes_to_dlq() {
    let (pool, db_name) = create_test_db().await;
    let metrics = Metrics::new();
    register_agent(&pool, "agent-1").await;

    let mut req = base_request("TASK-4");
    req.max_retries = Some(0);
    let created = dispatcher::create(&pool, &metrics, req).await.unwrap();

    let dispatched = match dispatcher::next(&pool, &metrics, "agent-1").await.unwrap() {
        NextTask::Task(task) => task,
        NextTask::None => panic!("expected a task"),
    };

    let result = dispatcher::result(
        &pool,
        &metrics,
        b"test-secret",
        Identity::TaskId(dispatched.task_id),
        Some(TaskStatus::Fail),
        None,
        Some("exec_error"),
        Some("boom"),
    )
    .await
    .unwrap();
    assert_eq!(result.status, TaskStatus::Dlq);

    let dlq_entry = a2a_core::dlq::get_by_task_code(&pool, "TASK-4")
        .await
        .unwrap()
        .expect("dlq entry should exist");
    assert_eq!(dlq_entry.task_id, created.task_id);

    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn failed_dependency_blocks_pending_dependent() {
    let (pool, db_name) = create_test_db().await;
    let metrics = Metrics::new();
    register_agent(&pool, "agent-1").await;

    let mut upstream_req = base_request("TASK-5-upstream");
    upstream_req.max_retries = Some(0);
    let upstream = dispatcher::create(&pool, &metrics, upstream_req).await.unwrap();

    let mut downstream_req = base_request("TASK-5-downstream");
    downstream_req.dependencies = vec![upstream.task_id];
    let downstream = dispatcher::create(&pool, &metrics, downstream_req).await.unwrap();
    assert_eq!(downstream.status, TaskStatus::Pending);

    let dispatched = match dispatcher::next(&pool, &metrics, "agent-1").await.unwrap() {
        NextTask::Task(task) => task,
        NextTask::None => panic!("expected the upstream task"),
    };
    assert_eq!(dispatched.task_id, upstream.task_id);

    dispatcher::result(
        &pool,
        &metrics,
        b"test-secret",
        Identity::TaskId(dispatched.task_id),
        Some(TaskStatus::Fail),
        None,
        Some("exec_error"),
        Some("boom"),
    )
    .await
    .unwrap();

    let reloaded = task_db::get_task(&pool, downstream.task_id).await.unwrap().unwrap();
    assert_eq!(reloaded.status, TaskStatus::Blocked);
    assert_eq!(reloaded.reason_code.as_deref(), Some("dep_failed"));

    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn ack_loss_redelivers_same_task_with_extended_lease() {
    // S6: a worker that lost its previous `next` response sees the same
    // RUNNING task again, with a freshly extended lease, rather than a new
    // task or an empty response.
    let (pool, db_name) = create_test_db().await;
    let metrics = Metrics::new();
    register_agent(&pool, "agent-1").await;

    let created = dispatcher::create(&pool, &metrics, base_request("TASK-6")).await.unwrap();

    let first = match dispatcher::next(&pool, &metrics, "agent-1").await.unwrap() {
        NextTask::Task(task) => task,
        NextTask::None => panic!("expected a task"),
    };
    assert_eq!(first.task_id, created.task_id);
    assert_eq!(first.status, TaskStatus::Running);

    let second = match dispatcher::next(&pool, &metrics, "agent-1").await.unwrap() {
        NextTask::Task(task) => task,
        NextTask::None => panic!("expected ack-recovery to redeliver the same task"),
    };
    assert_eq!(second.task_id, first.task_id);
    assert_eq!(second.status, TaskStatus::Running);
    assert!(second.lease_expiry_ts.unwrap() >= first.lease_expiry_ts.unwrap());
    assert!(second.updated_at >= first.updated_at);

    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn concurrent_next_calls_deliver_a_pending_task_at_most_once() {
    // Testable property 2: under N concurrent `next(agent_id)` calls
    // contending for one PENDING task, exactly one returns it and the rest
    // report no task.
    let (pool, db_name) = create_test_db().await;
    let metrics = Metrics::new();
    register_agent(&pool, "agent-1").await;

    let created = dispatcher::create(&pool, &metrics, base_request("TASK-7")).await.unwrap();

    let attempts = futures::future::join_all(
        (0..8).map(|_| dispatcher::next(&pool, &metrics, "agent-1")),
    )
    .await;

    let winners: Vec<_> = attempts
        .into_iter()
        .map(|r| r.unwrap())
        .filter(|outcome| matches!(outcome, NextTask::Task(_)))
        .collect();
    assert_eq!(winners.len(), 1, "exactly one caller should win the task");

    if let NextTask::Task(task) = &winners[0] {
        assert_eq!(task.task_id, created.task_id);
        assert_eq!(task.status, TaskStatus::Running);
    }

    drop_test_db(&db_name).await;
}
