// ==========================================
// Negotiation protocol integration tests
// ==========================================
// Offer/counter-offer rounds, role alternation, acceptance carrying
// an occurrence-scoped price, rejection, and the round cap.
// ==========================================


use scheduled_deliveries::domain::types::{
    NegotiationAction, NegotiationStatus, OccurrenceStatus, Party,
};
use scheduled_deliveries::engine::coordination::ConfirmationOutcome;
use scheduled_deliveries::engine::SchedulerError;
use scheduled_deliveries::logging;
use test_helpers::{create_test_env, dt, once_input, TestEnv};

/// Drive a one-shot schedule into an open negotiation: the client
/// proposes `proposal` against the 2000 template price.
async fn open_negotiation(env: &TestEnv, proposal: i64) -> (String, String) {
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
        .record_confirmation(&occurrence_id, Party::Client, Some(proposal), dt(2026, 9, 1, 13, 0))
        .await
        .unwrap();
    match outcome {
        ConfirmationOutcome::NegotiationOpened(session) => (session.session_id, occurrence_id),
        other => panic!("expected NegotiationOpened, got {other:?}"),
    }
}

#[tokio::test]
async fn test_accept_resolves_with_occurrence_scoped_price() {
    logging::init_test();
    let env = create_test_env();
    let (session_id, occurrence_id) = open_negotiation(&env, 2500).await;

    let session = env
        .negotiation
        .respond(&session_id, Party::Counterparty, true, None, dt(2026, 9, 1, 14, 0))
        .expect("accept should succeed");
    assert_eq!(session.status, NegotiationStatus::Accepted);

    let occurrence = env.occurrences.require(&occurrence_id).unwrap();
    assert_eq!(occurrence.status, OccurrenceStatus::Ready);
    assert_eq!(occurrence.final_price, Some(2500));

    // The template price never moves.
    let schedule = env.schedules.require(&occurrence.schedule_id).unwrap();
    assert_eq!(schedule.proposed_price, 2000);
}

#[tokio::test]
async fn test_reject_fails_the_occurrence() {
    logging::init_test();
    let env = create_test_env();
    let (session_id, occurrence_id) = open_negotiation(&env, 2500).await;

    let session = env
        .negotiation
        .respond(
            &session_id,
            Party::Counterparty,
            false,
            Some("too expensive".to_string()),
            dt(2026, 9, 1, 14, 0),
        )
        .unwrap();
    assert_eq!(session.status, NegotiationStatus::Rejected);

    let occurrence = env.occurrences.require(&occurrence_id).unwrap();
    assert_eq!(occurrence.status, OccurrenceStatus::Failed);
    assert_eq!(occurrence.last_error.as_deref(), Some("negotiation_rejected"));

    // A closed session takes no further moves.
    let err = env
        .negotiation
        .respond(&session_id, Party::Client, true, None, dt(2026, 9, 1, 15, 0))
        .unwrap_err();
    assert!(matches!(err, SchedulerError::NegotiationClosed { .. }));
}

#[tokio::test]
async fn test_counter_offer_flips_roles() {
    logging::init_test();
    let env = create_test_env();
    let (session_id, _) = open_negotiation(&env, 2500).await;

    // The offerer cannot answer their own offer.
    let err = env
        .negotiation
        .counter_offer(&session_id, Party::Client, 2400, None, dt(2026, 9, 1, 14, 0))
        .await
        .unwrap_err();
    assert!(matches!(err, SchedulerError::NotCurrentResponder { .. }));

    let session = env
        .negotiation
        .counter_offer(&session_id, Party::Counterparty, 2200, None, dt(2026, 9, 1, 14, 0))
        .await
        .unwrap();
    assert_eq!(session.current_offer, 2200);
    assert_eq!(session.current_offerer, Party::Counterparty);
    assert_eq!(session.round_count, 2);

    // Now the client is the responder; accepting resolves at 2200.
    let session = env
        .negotiation
        .respond(&session_id, Party::Client, true, None, dt(2026, 9, 1, 15, 0))
        .unwrap();
    let occurrence = env.occurrences.require(&session.occurrence_id).unwrap();
    assert_eq!(occurrence.final_price, Some(2200));

    let history = env.negotiation.history(&session_id).unwrap();
    let actions: Vec<NegotiationAction> = history.iter().map(|e| e.action).collect();
    assert_eq!(
        actions,
        vec![
            NegotiationAction::Offer,
            NegotiationAction::CounterOffer,
            NegotiationAction::Accept,
        ]
    );
}

#[tokio::test]
async fn test_non_positive_counter_offer_is_rejected() {
    logging::init_test();
    let env = create_test_env();
    let (session_id, _) = open_negotiation(&env, 2500).await;

    let err = env
        .negotiation
        .counter_offer(&session_id, Party::Counterparty, 0, None, dt(2026, 9, 1, 14, 0))
        .await
        .unwrap_err();
    assert!(matches!(err, SchedulerError::InvalidOffer(_)));
}

#[tokio::test]
async fn test_round_cap_expires_the_session() {
    logging::init_test();
    let env = create_test_env();
    let (session_id, occurrence_id) = open_negotiation(&env, 2500).await;

    // Opening offer was round 1; default cap is 5 rounds.
    let mut responder = Party::Counterparty;
    for round in 2..=5 {
        let session = env
            .negotiation
            .counter_offer(
                &session_id,
                responder,
                2500 - round * 10,
                None,
                dt(2026, 9, 1, 14, round as u32),
            )
            .await
            .expect("counter within the cap should succeed");
        assert_eq!(session.round_count as i64, round);
        responder = responder.other();
    }

    let err = env
        .negotiation
        .counter_offer(&session_id, responder, 2000, None, dt(2026, 9, 1, 15, 0))
        .await
        .unwrap_err();
    assert!(matches!(err, SchedulerError::NegotiationExpired { .. }));

    let session = env.negotiations.require(&session_id).unwrap();
    assert_eq!(session.status, NegotiationStatus::Expired);

    let occurrence = env.occurrences.require(&occurrence_id).unwrap();
    assert_eq!(occurrence.status, OccurrenceStatus::Failed);
    assert_eq!(occurrence.last_error.as_deref(), Some("negotiation_expired"));
}

#[tokio::test]
async fn test_session_lookup_by_occurrence() {
    logging::init_test();
    let env = create_test_env();
    let (session_id, occurrence_id) = open_negotiation(&env, 2500).await;

    let found = env
        .negotiation
        .session_for_occurrence(&occurrence_id)
        .unwrap()
        .expect("session should exist");
    assert_eq!(found.session_id, session_id);

    assert!(env
        .negotiation
        .session_for_occurrence("no-such-occurrence")
        .unwrap()
        .is_none());
}
