//! Integration coverage for the operations `a2ahub`'s CLI sub-commands sit
//! on top of, exercised directly against a real PostgreSQL instance:
//! agent lifecycle, DLQ pagination, routing audit, the Lease Sweeper, the
//! Priority Ager, and Workflow Recovery end to end.
//!
//! `a2a-cli` has no library target (only a `[[bin]]`), so these tests
//! drive `a2a-core`/`a2a-db` the same way the CLI command handlers do
//! rather than importing the binary crate.

use a2a_core::dispatcher::{self, CreateTaskRequest, Identity, NextTask};
use a2a_core::metrics::Metrics;
use a2a_core::routing::{self, TaskAttrs};
use a2a_core::{ager, recovery, registry, sweeper};
use a2a_db::models::TaskStatus;
use a2a_db::queries::{dlq as dlq_db, routing_audit, tasks as task_db, workflow as workflow_db};
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
        ..Default::default()
    }
}

#[tokio::test]
async fn agent_register_list_update_deregister() {
    let (pool, db_name) = create_test_db().await;

    let agent = registry::register(
        &pool,
        "agent-cli-1",
        "SRE Engineer",
        vec!["rust".to_string()],
        vec![],
        2,
        60,
        None,
    )
    .await
    .expect("register should succeed");
    assert_eq!(agent.capacity, 2);
    assert!(agent.online);

    let listed = registry::list(&pool).await.unwrap();
    assert!(listed.iter().any(|a| a.agent_id == "agent-cli-1"));

    registry::update(&pool, "agent-cli-1", Some(5), None, Some(false))
        .await
        .expect("update should succeed");
    let updated = registry::get(&pool, "agent-cli-1").await.unwrap().unwrap();
    assert_eq!(updated.capacity, 5);
    assert!(!updated.online);

    assert!(registry::deregister(&pool, "agent-cli-1").await.unwrap());
    assert!(registry::get(&pool, "agent-cli-1").await.unwrap().is_none());
    assert!(!registry::deregister(&pool, "agent-cli-1").await.unwrap());

    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn routing_decide_writes_an_audit_row_regardless_of_outcome() {
    let (pool, db_name) = create_test_db().await;

    let decision = routing::decide(
        &pool,
        &TaskAttrs {
            task_code: "ATA-99".to_string(),
            area: "unrouted".to_string(),
            owner_role: "nobody".to_string(),
            priority: 0,
        },
    )
    .await
    .unwrap();
    assert_eq!(decision.worker_type, "Trae"); // R5: task_code starts with "ATA-"

    let audit_rows = routing_audit::list_for_trace(&pool, decision.trace_id).await.unwrap();
    assert_eq!(audit_rows.len(), 1);
    assert_eq!(audit_rows[0].trace_id, decision.trace_id);

    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn dlq_list_is_paginated_and_replay_resets_to_pending() {
    let (pool, db_name) = create_test_db().await;
    let metrics = Metrics::new();

    registry::register(&pool, "agent-cli-2", "SRE Engineer", vec![], vec![], 3, 60, None)
        .await
        .unwrap();

    for i in 0..3 {
        let task_code = format!("CLI-DLQ-{i}");
        let mut req = base_request(&task_code);
        req.max_retries = Some(0);
        let created = dispatcher::create(&pool, &metrics, req).await.unwrap();
        let dispatched = match dispatcher::next(&pool, &metrics, "agent-cli-2").await.unwrap() {
            NextTask::Task(task) => task,
            NextTask::None => panic!("expected a task for {task_code}"),
        };
        assert_eq!(dispatched.task_id, created.task_id);
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
    }

    let total = dlq_db::count(&pool).await.unwrap();
    assert_eq!(total, 3);

    let page1 = dlq_db::list(&pool, 2, 0).await.unwrap();
    assert_eq!(page1.len(), 2);
    let page2 = dlq_db::list(&pool, 2, 2).await.unwrap();
    assert_eq!(page2.len(), 1);

    let entry = dlq_db::get_by_task_code(&pool, "CLI-DLQ-0").await.unwrap().unwrap();
    let replayed = a2a_core::dlq::replay(&pool, entry.dlq_id, "operator", "retry after fix")
        .await
        .unwrap();
    assert_eq!(replayed.status, TaskStatus::Pending);
    assert_eq!(replayed.retry_count, 0);

    let reloaded_entry = dlq_db::get(&pool, entry.dlq_id).await.unwrap().unwrap();
    assert_eq!(reloaded_entry.replay_who.as_deref(), Some("operator"));
    assert_eq!(reloaded_entry.replay_why.as_deref(), Some("retry after fix"));

    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn lease_sweeper_reclaims_expired_leases_and_restores_capacity() {
    let (pool, db_name) = create_test_db().await;
    let metrics = Metrics::new();

    registry::register(&pool, "agent-cli-3", "SRE Engineer", vec![], vec![], 1, 60, None)
        .await
        .unwrap();

    let created = dispatcher::create(&pool, &metrics, base_request("CLI-SWEEP-1")).await.unwrap();
    let dispatched = match dispatcher::next(&pool, &metrics, "agent-cli-3").await.unwrap() {
        NextTask::Task(task) => task,
        NextTask::None => panic!("expected a task"),
    };
    assert_eq!(dispatched.task_id, created.task_id);

    let agent_after_dispatch = registry::get(&pool, "agent-cli-3").await.unwrap().unwrap();
    assert_eq!(agent_after_dispatch.available_capacity, 0);

    // Force the lease into the past so the sweeper treats it as expired.
    sqlx::query("UPDATE tasks SET lease_expiry_ts = NOW() - INTERVAL '1 second' WHERE task_id = $1")
        .bind(dispatched.task_id)
        .execute(&pool)
        .await
        .unwrap();

    let reclaimed = sweeper::sweep_once(&pool, &metrics).await.unwrap();
    assert_eq!(reclaimed, 1);

    let swept = task_db::get_task(&pool, dispatched.task_id).await.unwrap().unwrap();
    assert_eq!(swept.status, TaskStatus::Pending);
    assert!(swept.lease_expiry_ts.is_none());

    let agent_after_sweep = registry::get(&pool, "agent-cli-3").await.unwrap().unwrap();
    assert_eq!(agent_after_sweep.available_capacity, 1);

    // Idempotent: a second sweep finds nothing left to reclaim.
    assert_eq!(sweeper::sweep_once(&pool, &metrics).await.unwrap(), 0);

    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn priority_ager_bumps_long_waiting_pending_tasks() {
    let (pool, db_name) = create_test_db().await;
    let metrics = Metrics::new();

    registry::register(&pool, "agent-cli-4", "SRE Engineer", vec![], vec![], 1, 60, None)
        .await
        .unwrap();

    let created = dispatcher::create(&pool, &metrics, base_request("CLI-AGE-1")).await.unwrap();
    assert_eq!(created.priority, 0);

    // Backdate creation past the aging threshold without waiting real time.
    sqlx::query("UPDATE tasks SET created_at = NOW() - INTERVAL '10 minutes' WHERE task_id = $1")
        .bind(created.task_id)
        .execute(&pool)
        .await
        .unwrap();

    let bumped = ager::age_once(&pool).await.unwrap();
    assert_eq!(bumped, 1);

    let aged = task_db::get_task(&pool, created.task_id).await.unwrap().unwrap();
    assert_eq!(aged.priority, 1);

    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn workflow_recovery_repairs_an_orphaned_running_task() {
    let (pool, db_name) = create_test_db().await;
    let metrics = Metrics::new();

    registry::register(&pool, "agent-cli-5", "SRE Engineer", vec![], vec![], 1, 60, None)
        .await
        .unwrap();

    let created = dispatcher::create(&pool, &metrics, base_request("CLI-RECOVER-1")).await.unwrap();
    let dispatched = match dispatcher::next(&pool, &metrics, "agent-cli-5").await.unwrap() {
        NextTask::Task(task) => task,
        NextTask::None => panic!("expected a task"),
    };
    assert_eq!(dispatched.task_id, created.task_id);

    // Simulate a crash that left the lease cleared without requeuing.
    sqlx::query("UPDATE tasks SET lease_expiry_ts = NULL WHERE task_id = $1")
        .bind(dispatched.task_id)
        .execute(&pool)
        .await
        .unwrap();

    let report = recovery::run(&pool).await.unwrap();
    assert!(report.healthy);
    assert_eq!(report.remaining.len(), 0);
    assert!(report.found.iter().any(|i| i.task_id() == dispatched.task_id));

    let repaired = task_db::get_task(&pool, dispatched.task_id).await.unwrap().unwrap();
    assert_eq!(repaired.status, TaskStatus::Pending);

    let workflow = workflow_db::get_or_init(&pool).await.unwrap();
    assert_eq!(workflow.recovery_status.as_deref(), Some("SUCCESS"));
    assert!(workflow.last_recovery_time.is_some());

    drop_test_db(&db_name).await;
}
