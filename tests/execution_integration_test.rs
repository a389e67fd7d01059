// ==========================================
// Execution trigger integration tests
// ==========================================
// At-most-once claim under concurrency, retry on transient failure,
// terminal failure on rejection and on the attempt ceiling.
// ==========================================


use scheduled_deliveries::domain::types::{OccurrenceStatus, Party};
use scheduled_deliveries::engine::collaborators::{DeliveryCreationError, NotificationKind};
use scheduled_deliveries::engine::SchedulerError;
use scheduled_deliveries::logging;
use test_helpers::{create_test_env, daily_input, dt, once_input, TestEnv};

/// Drive a one-shot schedule to a READY occurrence via the handshake.
async fn ready_occurrence(env: &TestEnv) -> String {
    let schedule = env
        .lifecycle
        .create(once_input(dt(2026, 9, 2, 10, 0)), dt(2026, 9, 1, 9, 0))
        .unwrap();
    env.coordination.dispatch_due(dt(2026, 9, 1, 12, 0)).await.unwrap();
    let occurrence_id = env.occurrences.list_by_schedule(&schedule.schedule_id).unwrap()[0]
        .occurrence_id
        .clone();
    env.coordination
        .record_confirmation(&occurrence_id, Party::Client, None, dt(2026, 9, 1, 13, 0))
        .await
        .unwrap();
    env.coordination
        .record_confirmation(&occurrence_id, Party::Counterparty, None, dt(2026, 9, 1, 13, 30))
        .await
        .unwrap();
    occurrence_id
}

#[tokio::test]
async fn test_successful_execution_records_reference() {
    logging::init_test();
    let env = create_test_env();
    let occurrence_id = ready_occurrence(&env).await;

    let attempted = env.execution.dispatch_due(dt(2026, 9, 2, 10, 0)).await.unwrap();
    assert_eq!(attempted, 1);

    let occurrence = env.occurrences.require(&occurrence_id).unwrap();
    assert_eq!(occurrence.status, OccurrenceStatus::Executed);
    assert_eq!(occurrence.delivery_reference.as_deref(), Some("DLV-0001"));
    assert!(occurrence.last_error.is_none());

    let schedule = env.schedules.require(&occurrence.schedule_id).unwrap();
    assert_eq!(schedule.total_executions, 1);
    assert_eq!(schedule.last_executed_at, Some(dt(2026, 9, 2, 10, 0)));

    assert_eq!(env.creator.call_count(), 1);
    assert_eq!(env.notifier.count_of_kind(NotificationKind::DeliveryCreated), 1);

    // The same tick re-run finds nothing due.
    let attempted = env.execution.dispatch_due(dt(2026, 9, 2, 10, 5)).await.unwrap();
    assert_eq!(attempted, 0);
    assert_eq!(env.creator.call_count(), 1);
}

#[tokio::test]
async fn test_execution_waits_for_scheduled_time() {
    logging::init_test();
    let env = create_test_env();
    ready_occurrence(&env).await;

    let attempted = env.execution.dispatch_due(dt(2026, 9, 2, 9, 59)).await.unwrap();
    assert_eq!(attempted, 0);
    assert_eq!(env.creator.call_count(), 0);
}

#[tokio::test]
async fn test_concurrent_triggers_execute_exactly_once() {
    logging::init_test();
    let env = create_test_env();
    let occurrence_id = ready_occurrence(&env).await;
    let now = dt(2026, 9, 2, 10, 0);

    let (a, b) = tokio::join!(
        env.execution.execute_now(&occurrence_id, now),
        env.execution.execute_now(&occurrence_id, now),
    );

    // Exactly one trigger wins the claim; the collaborator is called once.
    assert_eq!(env.creator.call_count(), 1);
    assert_eq!(
        [a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count(),
        1,
        "exactly one of the racing triggers should win"
    );

    let occurrence = env.occurrences.require(&occurrence_id).unwrap();
    assert_eq!(occurrence.status, OccurrenceStatus::Executed);
}

#[tokio::test]
async fn test_transient_failure_returns_to_ready_then_succeeds() {
    logging::init_test();
    let env = create_test_env();
    let occurrence_id = ready_occurrence(&env).await;

    env.creator
        .fail_next(DeliveryCreationError::Transport("connection reset".to_string()));
    let err = env
        .execution
        .execute_now(&occurrence_id, dt(2026, 9, 2, 10, 0))
        .await
        .unwrap_err();
    match err {
        SchedulerError::ExecutionFailure(msg) => assert!(msg.contains("connection reset")),
        other => panic!("expected ExecutionFailure, got {other:?}"),
    }

    let occurrence = env.occurrences.require(&occurrence_id).unwrap();
    assert_eq!(occurrence.status, OccurrenceStatus::Ready);
    assert_eq!(occurrence.attempt_count, 1);
    assert!(occurrence.last_error.as_deref().unwrap().contains("connection reset"));

    // The next tick picks it up again and succeeds.
    let attempted = env.execution.dispatch_due(dt(2026, 9, 2, 10, 10)).await.unwrap();
    assert_eq!(attempted, 1);

    let occurrence = env.occurrences.require(&occurrence_id).unwrap();
    assert_eq!(occurrence.status, OccurrenceStatus::Executed);
    assert_eq!(occurrence.attempt_count, 1);
    assert_eq!(env.creator.call_count(), 2);
}

#[tokio::test]
async fn test_rejection_is_terminal() {
    logging::init_test();
    let env = create_test_env();
    let occurrence_id = ready_occurrence(&env).await;

    env.creator
        .fail_next(DeliveryCreationError::Rejected("address unserviceable".to_string()));
    let err = env
        .execution
        .execute_now(&occurrence_id, dt(2026, 9, 2, 10, 0))
        .await
        .unwrap_err();
    assert!(matches!(err, SchedulerError::ExecutionFailure(_)));

    let occurrence = env.occurrences.require(&occurrence_id).unwrap();
    assert_eq!(occurrence.status, OccurrenceStatus::Failed);
    assert_eq!(occurrence.attempt_count, 1);

    // FAILED is not picked up by the due query.
    let attempted = env.execution.dispatch_due(dt(2026, 9, 2, 11, 0)).await.unwrap();
    assert_eq!(attempted, 0);
    assert_eq!(env.creator.call_count(), 1);
}

#[tokio::test]
async fn test_attempt_ceiling_fails_permanently() {
    logging::init_test();
    let env = create_test_env();
    let occurrence_id = ready_occurrence(&env).await;

    // Default ceiling is 3 attempts.
    for attempt in 1..=3 {
        env.creator
            .fail_next(DeliveryCreationError::Transport(format!("timeout #{attempt}")));
        let err = env
            .execution
            .execute_now(&occurrence_id, dt(2026, 9, 2, 10, attempt as u32))
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulerError::ExecutionFailure(_)));
    }

    let occurrence = env.occurrences.require(&occurrence_id).unwrap();
    assert_eq!(occurrence.status, OccurrenceStatus::Failed);
    assert_eq!(occurrence.attempt_count, 3);
    assert_eq!(env.creator.call_count(), 3);
}

#[tokio::test]
async fn test_execute_now_requires_ready_state() {
    logging::init_test();
    let env = create_test_env();
    let schedule = env
        .lifecycle
        .create(once_input(dt(2026, 9, 2, 10, 0)), dt(2026, 9, 1, 9, 0))
        .unwrap();
    let occurrence_id = env.occurrences.list_by_schedule(&schedule.schedule_id).unwrap()[0]
        .occurrence_id
        .clone();

    // Still PENDING: the claim cannot be taken.
    let err = env
        .execution
        .execute_now(&occurrence_id, dt(2026, 9, 1, 10, 0))
        .await
        .unwrap_err();
    assert!(matches!(err, SchedulerError::InvalidStateTransition { .. }));
    assert_eq!(env.creator.call_count(), 0);
}

#[tokio::test]
async fn test_manual_retry_reopens_failed_occurrence() {
    logging::init_test();
    let env = create_test_env();

    // Two deliveries so the parent stays ACTIVE after the first fails.
    let schedule = env
        .lifecycle
        .create(daily_input(dt(2026, 9, 2, 10, 0), 2), dt(2026, 9, 1, 9, 0))
        .unwrap();
    env.coordination.dispatch_due(dt(2026, 9, 1, 12, 0)).await.unwrap();
    let occurrence_id = env.occurrences.list_by_schedule(&schedule.schedule_id).unwrap()[0]
        .occurrence_id
        .clone();
    env.coordination
        .record_confirmation(&occurrence_id, Party::Client, None, dt(2026, 9, 1, 13, 0))
        .await
        .unwrap();
    env.coordination
        .record_confirmation(&occurrence_id, Party::Counterparty, None, dt(2026, 9, 1, 13, 30))
        .await
        .unwrap();

    env.creator
        .fail_next(DeliveryCreationError::Rejected("vehicle unavailable".to_string()));
    let err = env
        .execution
        .execute_now(&occurrence_id, dt(2026, 9, 2, 10, 0))
        .await
        .unwrap_err();
    assert!(matches!(err, SchedulerError::ExecutionFailure(_)));

    let occurrence = env.occurrences.require(&occurrence_id).unwrap();
    assert_eq!(occurrence.status, OccurrenceStatus::Failed);

    // The retry reopens it with a fresh attempt budget.
    let reopened = env.lifecycle.retry(&occurrence_id, dt(2026, 9, 2, 11, 0)).unwrap();
    assert_eq!(reopened.status, OccurrenceStatus::Ready);
    assert_eq!(reopened.attempt_count, 0);
    assert!(reopened.last_error.is_none());

    let executed = env
        .execution
        .execute_now(&occurrence_id, dt(2026, 9, 2, 12, 0))
        .await
        .unwrap();
    assert_eq!(executed.status, OccurrenceStatus::Executed);
    assert_eq!(executed.delivery_reference.as_deref(), Some("DLV-0002"));
}

#[tokio::test]
async fn test_retry_requires_failed_state() {
    logging::init_test();
    let env = create_test_env();
    let occurrence_id = ready_occurrence(&env).await;

    let err = env
        .lifecycle
        .retry(&occurrence_id, dt(2026, 9, 1, 14, 0))
        .unwrap_err();
    assert!(matches!(err, SchedulerError::InvalidStateTransition { .. }));

    let occurrence = env.occurrences.require(&occurrence_id).unwrap();
    assert_eq!(occurrence.status, OccurrenceStatus::Ready);
}

#[tokio::test]
async fn test_cancellation_racing_execution_aborts() {
    logging::init_test();
    let env = create_test_env();
    let occurrence_id = ready_occurrence(&env).await;
    let occurrence = env.occurrences.require(&occurrence_id).unwrap();

    // Cancel between the claim's due query and the trigger. The sweep
    // skips the READY row, so the claim itself fails cleanly.
    env.lifecycle
        .cancel(&occurrence.schedule_id, dt(2026, 9, 2, 9, 0))
        .unwrap();

    let attempted = env.execution.dispatch_due(dt(2026, 9, 2, 10, 0)).await.unwrap();
    assert_eq!(attempted, 0);
    assert_eq!(env.creator.call_count(), 0);

    let occurrence = env.occurrences.require(&occurrence_id).unwrap();
    assert_eq!(occurrence.status, OccurrenceStatus::Skipped);
}
