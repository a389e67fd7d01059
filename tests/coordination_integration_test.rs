// ==========================================
// Coordination protocol integration tests
// ==========================================
// Day-before handshake: opening, confirmations, timeout sweep, and
// the cases that must not open (paused parent, double dispatch).
// ==========================================


use scheduled_deliveries::domain::types::{CoordinationOutcome, OccurrenceStatus, Party};
use scheduled_deliveries::engine::collaborators::NotificationKind;
use scheduled_deliveries::engine::coordination::ConfirmationOutcome;
use scheduled_deliveries::engine::SchedulerError;
use scheduled_deliveries::logging;
use test_helpers::{create_test_env, daily_input, dt, once_input};

#[tokio::test]
async fn test_dispatch_opens_handshake_and_notifies_both() {
    logging::init_test();
    let env = create_test_env();
    let schedule = env
        .lifecycle
        .create(once_input(dt(2026, 9, 2, 10, 0)), dt(2026, 9, 1, 9, 0))
        .unwrap();

    // Before the notification window nothing opens.
    let opened = env.coordination.dispatch_due(dt(2026, 9, 1, 9, 30)).await.unwrap();
    assert_eq!(opened, 0);

    // 24h advance window: due from Sep 1 10:00.
    let now = dt(2026, 9, 1, 12, 0);
    let opened = env.coordination.dispatch_due(now).await.unwrap();
    assert_eq!(opened, 1);

    let occurrence = &env.occurrences.list_by_schedule(&schedule.schedule_id).unwrap()[0];
    assert_eq!(occurrence.status, OccurrenceStatus::Coordinating);
    // Default timeout is 12 hours.
    assert_eq!(occurrence.coordination_deadline, Some(dt(2026, 9, 2, 0, 0)));
    assert!(!occurrence.client_confirmed);
    assert!(!occurrence.counterparty_confirmed);

    let sent = env.notifier.sent();
    assert_eq!(sent.len(), 2);
    assert!(sent.iter().any(|(p, _, k)| p == "C001" && *k == NotificationKind::UpcomingDelivery));
    assert!(sent.iter().any(|(p, _, k)| p == "P001" && *k == NotificationKind::UpcomingDelivery));

    // A second tick at the same instant opens nothing more.
    let opened = env.coordination.dispatch_due(now).await.unwrap();
    assert_eq!(opened, 0);
    assert_eq!(env.notifier.sent().len(), 2);
}

#[tokio::test]
async fn test_paused_schedule_keeps_occurrences_pending() {
    logging::init_test();
    let env = create_test_env();
    let schedule = env
        .lifecycle
        .create(daily_input(dt(2026, 9, 2, 10, 0), 3), dt(2026, 9, 1, 9, 0))
        .unwrap();
    env.lifecycle.pause(&schedule.schedule_id, dt(2026, 9, 1, 9, 30)).unwrap();

    let opened = env.coordination.dispatch_due(dt(2026, 9, 1, 12, 0)).await.unwrap();
    assert_eq!(opened, 0);

    // Resuming makes the same occurrence due again (carry-over).
    env.lifecycle.resume(&schedule.schedule_id, dt(2026, 9, 1, 13, 0)).unwrap();
    let opened = env.coordination.dispatch_due(dt(2026, 9, 1, 14, 0)).await.unwrap();
    assert_eq!(opened, 1);
}

#[tokio::test]
async fn test_both_confirmations_make_occurrence_ready() {
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

    let outcome = env
        .coordination
        .record_confirmation(&occurrence_id, Party::Client, None, dt(2026, 9, 1, 13, 0))
        .await
        .unwrap();
    match outcome {
        ConfirmationOutcome::AwaitingOtherParty(o) => {
            assert!(o.client_confirmed);
            assert!(!o.counterparty_confirmed);
            assert_eq!(o.status, OccurrenceStatus::Coordinating);
        }
        other => panic!("expected AwaitingOtherParty, got {other:?}"),
    }

    // Confirming with the unchanged price counts as a plain confirmation.
    let outcome = env
        .coordination
        .record_confirmation(&occurrence_id, Party::Counterparty, Some(2000), dt(2026, 9, 1, 14, 0))
        .await
        .unwrap();
    match outcome {
        ConfirmationOutcome::Confirmed(o) => {
            assert_eq!(o.status, OccurrenceStatus::Ready);
            assert_eq!(
                o.coordination_outcome,
                Some(CoordinationOutcome::Confirmed { final_price: None })
            );
            assert!(o.final_price.is_none());
        }
        other => panic!("expected Confirmed, got {other:?}"),
    }
}

#[tokio::test]
async fn test_confirmation_outside_handshake_is_rejected() {
    logging::init_test();
    let env = create_test_env();
    let schedule = env
        .lifecycle
        .create(once_input(dt(2026, 9, 2, 10, 0)), dt(2026, 9, 1, 9, 0))
        .unwrap();
    let occurrence_id = env.occurrences.list_by_schedule(&schedule.schedule_id).unwrap()[0]
        .occurrence_id
        .clone();

    // Still PENDING, no handshake open.
    let err = env
        .coordination
        .record_confirmation(&occurrence_id, Party::Client, None, dt(2026, 9, 1, 9, 30))
        .await
        .unwrap_err();
    assert!(matches!(err, SchedulerError::InvalidStateTransition { .. }));
}

#[tokio::test]
async fn test_timeout_sweep_fails_unanswered_handshake() {
    logging::init_test();
    let env = create_test_env();
    let schedule = env
        .lifecycle
        .create(once_input(dt(2026, 9, 2, 10, 0)), dt(2026, 9, 1, 9, 0))
        .unwrap();
    env.coordination.dispatch_due(dt(2026, 9, 1, 12, 0)).await.unwrap();

    // One confirmation is not enough.
    let occurrence_id = env.occurrences.list_by_schedule(&schedule.schedule_id).unwrap()[0]
        .occurrence_id
        .clone();
    env.coordination
        .record_confirmation(&occurrence_id, Party::Client, None, dt(2026, 9, 1, 13, 0))
        .await
        .unwrap();

    // Deadline was Sep 2 00:00; sweep after it.
    let swept = env.coordination.expire_timed_out(dt(2026, 9, 2, 1, 0)).await.unwrap();
    assert_eq!(swept, 1);

    let occurrence = env.occurrences.require(&occurrence_id).unwrap();
    assert_eq!(occurrence.status, OccurrenceStatus::Failed);
    assert_eq!(occurrence.coordination_outcome, Some(CoordinationOutcome::TimedOut));
    assert_eq!(occurrence.last_error.as_deref(), Some("coordination_timeout"));

    assert_eq!(env.notifier.count_of_kind(NotificationKind::CoordinationTimedOut), 2);

    // Sweeping again finds nothing.
    let swept = env.coordination.expire_timed_out(dt(2026, 9, 2, 2, 0)).await.unwrap();
    assert_eq!(swept, 0);
}

#[tokio::test]
async fn test_differing_price_opens_negotiation() {
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

    let outcome = env
        .coordination
        .record_confirmation(&occurrence_id, Party::Counterparty, Some(2500), dt(2026, 9, 1, 13, 0))
        .await
        .unwrap();

    let session = match outcome {
        ConfirmationOutcome::NegotiationOpened(session) => session,
        other => panic!("expected NegotiationOpened, got {other:?}"),
    };
    assert_eq!(session.base_price, 2000);
    assert_eq!(session.current_offer, 2500);
    assert_eq!(session.current_offerer, Party::Counterparty);
    assert_eq!(session.round_count, 1);

    let occurrence = env.occurrences.require(&occurrence_id).unwrap();
    assert_eq!(occurrence.status, OccurrenceStatus::Negotiating);

    // The non-offering party gets the price proposal notification.
    assert!(env
        .notifier
        .sent()
        .iter()
        .any(|(p, _, k)| p == "C001" && *k == NotificationKind::PriceProposal));
}

#[test]
fn test_coordination_claim_sets_deadline_atomically() {
    logging::init_test();
    let env = create_test_env();
    let schedule = env
        .lifecycle
        .create(once_input(dt(2026, 9, 2, 10, 0)), dt(2026, 9, 1, 9, 0))
        .unwrap();
    let occurrence_id = env.occurrences.list_by_schedule(&schedule.schedule_id).unwrap()[0]
        .occurrence_id
        .clone();

    let deadline = dt(2026, 9, 2, 0, 0);
    let won = env
        .occurrences
        .claim_for_coordination(&occurrence_id, deadline, dt(2026, 9, 1, 12, 0))
        .unwrap();
    assert!(won);

    // Status, deadline and flag reset arrive together.
    let occurrence = env.occurrences.require(&occurrence_id).unwrap();
    assert_eq!(occurrence.status, OccurrenceStatus::Coordinating);
    assert_eq!(occurrence.coordination_deadline, Some(deadline));
    assert!(!occurrence.client_confirmed);
    assert!(!occurrence.counterparty_confirmed);

    // The row left PENDING, so a second claim loses.
    let won = env
        .occurrences
        .claim_for_coordination(&occurrence_id, deadline, dt(2026, 9, 1, 12, 5))
        .unwrap();
    assert!(!won);
}

#[tokio::test]
async fn test_half_opened_handshake_is_swept_not_stuck() {
    logging::init_test();
    let env = create_test_env();
    let schedule = env
        .lifecycle
        .create(once_input(dt(2026, 9, 2, 10, 0)), dt(2026, 9, 1, 9, 0))
        .unwrap();
    let occurrence_id = env.occurrences.list_by_schedule(&schedule.schedule_id).unwrap()[0]
        .occurrence_id
        .clone();

    // A dispatch interrupted right after a bare status flip would leave
    // a COORDINATING row without a deadline. Force that state directly.
    assert!(env
        .occurrences
        .claim(
            &occurrence_id,
            OccurrenceStatus::Pending,
            OccurrenceStatus::Coordinating,
            dt(2026, 9, 1, 12, 0),
        )
        .unwrap());
    let occurrence = env.occurrences.require(&occurrence_id).unwrap();
    assert!(occurrence.coordination_deadline.is_none());

    // Dispatch only takes PENDING rows, so it cannot repair it.
    let opened = env.coordination.dispatch_due(dt(2026, 9, 1, 13, 0)).await.unwrap();
    assert_eq!(opened, 0);

    // The sweep treats the missing deadline as already elapsed.
    let swept = env.coordination.expire_timed_out(dt(2026, 9, 1, 13, 0)).await.unwrap();
    assert_eq!(swept, 1);

    let occurrence = env.occurrences.require(&occurrence_id).unwrap();
    assert_eq!(occurrence.status, OccurrenceStatus::Failed);
    assert_eq!(occurrence.last_error.as_deref(), Some("coordination_timeout"));
}

#[tokio::test]
async fn test_skipped_occurrence_is_not_resurrected_by_later_ticks() {
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

    env.lifecycle.cancel(&schedule.schedule_id, dt(2026, 9, 1, 13, 0)).unwrap();
    let occurrence = env.occurrences.require(&occurrence_id).unwrap();
    assert_eq!(occurrence.status, OccurrenceStatus::Skipped);

    // Neither the dispatch claim (PENDING only) nor the timeout sweep
    // (COORDINATING only) touches the skipped row.
    let opened = env.coordination.dispatch_due(dt(2026, 9, 1, 14, 0)).await.unwrap();
    assert_eq!(opened, 0);
    let swept = env.coordination.expire_timed_out(dt(2026, 9, 3, 0, 0)).await.unwrap();
    assert_eq!(swept, 0);

    let occurrence = env.occurrences.require(&occurrence_id).unwrap();
    assert_eq!(occurrence.status, OccurrenceStatus::Skipped);
}

#[tokio::test]
async fn test_cancelled_parent_skips_confirmation() {
    logging::init_test();
    let env = create_test_env();
    let schedule = env
        .lifecycle
        .create(daily_input(dt(2026, 9, 2, 10, 0), 3), dt(2026, 9, 1, 9, 0))
        .unwrap();
    env.coordination.dispatch_due(dt(2026, 9, 1, 12, 0)).await.unwrap();
    let occurrence_id = env.occurrences.list_by_schedule(&schedule.schedule_id).unwrap()[0]
        .occurrence_id
        .clone();

    env.lifecycle.cancel(&schedule.schedule_id, dt(2026, 9, 1, 13, 0)).unwrap();

    // The cancellation sweep already skipped it; a late confirmation of
    // a skipped occurrence is a state error, not a crash.
    let result = env
        .coordination
        .record_confirmation(&occurrence_id, Party::Client, None, dt(2026, 9, 1, 14, 0))
        .await;
    assert!(result.is_err());
    let occurrence = env.occurrences.require(&occurrence_id).unwrap();
    assert_eq!(occurrence.status, OccurrenceStatus::Skipped);
}
