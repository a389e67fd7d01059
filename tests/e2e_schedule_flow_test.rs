// ==========================================
// End-to-end schedule flow tests
// ==========================================
// Full loop through the dispatcher: seeding, handshake, execution and
// completion, driven by simulated clock ticks only.
// ==========================================


use scheduled_deliveries::domain::types::{OccurrenceStatus, Party, ScheduleStatus};
use scheduled_deliveries::engine::dispatcher::ScheduleDispatcher;
use scheduled_deliveries::engine::SchedulerError;
use scheduled_deliveries::logging;
use test_helpers::{create_test_env, daily_input, dt, once_input};

#[tokio::test]
async fn test_daily_schedule_runs_to_completion() {
    logging::init_test();
    let env = create_test_env();
    let dispatcher = ScheduleDispatcher::new(
        env.lifecycle.clone(),
        env.coordination.clone(),
        env.execution.clone(),
    );

    // Three daily deliveries at 2000, starting Sep 2 10:00.
    let schedule = env
        .lifecycle
        .create(daily_input(dt(2026, 9, 2, 10, 0), 3), dt(2026, 9, 1, 9, 0))
        .unwrap();

    let confirm_both = |occurrence_id: String, at| {
        let coordination = env.coordination.clone();
        async move {
            coordination
                .record_confirmation(&occurrence_id, Party::Client, None, at)
                .await
                .unwrap();
            coordination
                .record_confirmation(&occurrence_id, Party::Counterparty, None, at)
                .await
                .unwrap();
        }
    };

    // Tick 1 (Sep 1 noon): occurrence for Sep 2 enters its handshake.
    let report = dispatcher.run_tick(dt(2026, 9, 1, 12, 0)).await.unwrap();
    assert_eq!(report.coordinations_opened, 1);
    assert_eq!(report.executions_attempted, 0);

    let occurrences = env.occurrences.list_by_schedule(&schedule.schedule_id).unwrap();
    confirm_both(occurrences[0].occurrence_id.clone(), dt(2026, 9, 1, 13, 0)).await;

    // Tick 2 (Sep 2 10:00): first delivery executes, second handshake opens.
    let report = dispatcher.run_tick(dt(2026, 9, 2, 10, 0)).await.unwrap();
    assert_eq!(report.coordinations_opened, 1);
    assert_eq!(report.executions_attempted, 1);
    confirm_both(occurrences[1].occurrence_id.clone(), dt(2026, 9, 2, 11, 0)).await;

    // Tick 3 (Sep 3 10:00): second executes, third handshake opens.
    let report = dispatcher.run_tick(dt(2026, 9, 3, 10, 0)).await.unwrap();
    assert_eq!(report.coordinations_opened, 1);
    assert_eq!(report.executions_attempted, 1);
    confirm_both(occurrences[2].occurrence_id.clone(), dt(2026, 9, 3, 11, 0)).await;

    // Tick 4 (Sep 4 10:00): third executes; nothing left to generate.
    let report = dispatcher.run_tick(dt(2026, 9, 4, 10, 0)).await.unwrap();
    assert_eq!(report.coordinations_opened, 0);
    assert_eq!(report.executions_attempted, 1);

    let schedule = env.schedules.require(&schedule.schedule_id).unwrap();
    assert_eq!(schedule.total_executions, 3);
    assert_eq!(schedule.status, ScheduleStatus::Completed);

    let occurrences = env.occurrences.list_by_schedule(&schedule.schedule_id).unwrap();
    assert!(occurrences.iter().all(|o| o.status == OccurrenceStatus::Executed));

    // Every execution went out at the template price.
    let requests = env.creator.requests();
    assert_eq!(requests.len(), 3);
    assert!(requests.iter().all(|r| r.price == 2000));

    // Ticks on a completed schedule are no-ops.
    let report = dispatcher.run_tick(dt(2026, 9, 5, 10, 0)).await.unwrap();
    assert_eq!(report.occurrences_seeded, 0);
    assert_eq!(report.coordinations_opened, 0);
    assert_eq!(report.executions_attempted, 0);
}

#[tokio::test]
async fn test_negotiated_price_flows_into_the_delivery_order() {
    logging::init_test();
    let env = create_test_env();

    let schedule = env
        .lifecycle
        .create(once_input(dt(2026, 9, 2, 10, 0)), dt(2026, 9, 1, 9, 0))
        .unwrap();
    env.coordination.dispatch_due(dt(2026, 9, 1, 12, 0)).await.unwrap();
    let occurrence_id = env.occurrences.list_by_schedule(&schedule.schedule_id).unwrap()[0]
        .occurrence_id
        .clone();

    // Client proposes 2500 against the 2000 template.
    env.coordination
        .record_confirmation(&occurrence_id, Party::Client, Some(2500), dt(2026, 9, 1, 13, 0))
        .await
        .unwrap();
    let session = env
        .negotiation
        .session_for_occurrence(&occurrence_id)
        .unwrap()
        .expect("session should be open");

    // Counterparty counters at 2300, client accepts.
    env.negotiation
        .counter_offer(&session.session_id, Party::Counterparty, 2300, None, dt(2026, 9, 1, 14, 0))
        .await
        .unwrap();
    env.negotiation
        .respond(&session.session_id, Party::Client, true, None, dt(2026, 9, 1, 15, 0))
        .unwrap();

    let attempted = env.execution.dispatch_due(dt(2026, 9, 2, 10, 0)).await.unwrap();
    assert_eq!(attempted, 1);

    let requests = env.creator.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].price, 2300);
    assert_eq!(requests[0].occurrence_id, occurrence_id);

    // The template is untouched for any future occurrence.
    let schedule = env.schedules.require(&schedule.schedule_id).unwrap();
    assert_eq!(schedule.proposed_price, 2000);
    assert_eq!(schedule.status, ScheduleStatus::Completed);
}

#[tokio::test]
async fn test_unanswered_handshake_times_out_through_the_dispatcher() {
    logging::init_test();
    let env = create_test_env();
    let dispatcher = ScheduleDispatcher::new(
        env.lifecycle.clone(),
        env.coordination.clone(),
        env.execution.clone(),
    );

    let schedule = env
        .lifecycle
        .create(once_input(dt(2026, 9, 2, 10, 0)), dt(2026, 9, 1, 9, 0))
        .unwrap();

    let report = dispatcher.run_tick(dt(2026, 9, 1, 12, 0)).await.unwrap();
    assert_eq!(report.coordinations_opened, 1);

    // Nobody answers; the 12h window closes at Sep 2 00:00.
    let report = dispatcher.run_tick(dt(2026, 9, 2, 10, 0)).await.unwrap();
    assert_eq!(report.coordinations_timed_out, 1);
    assert_eq!(report.executions_attempted, 0);

    let occurrence = &env.occurrences.list_by_schedule(&schedule.schedule_id).unwrap()[0];
    assert_eq!(occurrence.status, OccurrenceStatus::Failed);
    assert_eq!(env.creator.call_count(), 0);
}

#[tokio::test]
async fn test_manual_execution_bypasses_auto_create() {
    logging::init_test();
    let env = create_test_env();

    let mut input = once_input(dt(2026, 9, 2, 10, 0));
    input.auto_create_delivery = false;
    let schedule = env.lifecycle.create(input, dt(2026, 9, 1, 9, 0)).unwrap();

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

    // The automatic tick never touches a manual schedule.
    let attempted = env.execution.dispatch_due(dt(2026, 9, 2, 10, 0)).await.unwrap();
    assert_eq!(attempted, 0);

    // The manual trigger executes it, even ahead of scheduled_for.
    let occurrence = env
        .execution
        .execute_now(&occurrence_id, dt(2026, 9, 2, 8, 0))
        .await
        .unwrap();
    assert_eq!(occurrence.status, OccurrenceStatus::Executed);

    // A second manual trigger cannot double-execute.
    let err = env
        .execution
        .execute_now(&occurrence_id, dt(2026, 9, 2, 9, 0))
        .await
        .unwrap_err();
    assert!(matches!(err, SchedulerError::InvalidStateTransition { .. }));
    assert_eq!(env.creator.call_count(), 1);
}
