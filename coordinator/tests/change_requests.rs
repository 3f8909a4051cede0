//! Change-request sub-ballots gating an amendment's final vote.

mod common;

use common::*;
use polity_coordinator::{CoordinatorError, SessionCoordinator};
use polity_store::{ChangeRequestStore, VoteStore};
use polity_types::{AmendmentId, ChangeRequestId, SessionId, TargetId, Timestamp};
use polity_voting::{ChangeRequest, Phase, SessionResult, VotingError};

fn amendment() -> AmendmentId {
    AmendmentId::new("amd_charter")
}

fn cr_target(id: &str) -> TargetId {
    TargetId::ChangeRequest {
        amendment: amendment(),
        change_request: ChangeRequestId::new(id),
    }
}

fn voting_error(err: CoordinatorError) -> VotingError {
    match err {
        CoordinatorError::Voting(e) => e,
        other => panic!("expected a voting error, got {other}"),
    }
}

/// Two change requests; "cr_long" is voted first by character count.
async fn register(coordinator: &SessionCoordinator) {
    for (id, chars) in [("cr_short", 40), ("cr_long", 900)] {
        coordinator
            .register_change_request(ChangeRequest::new(
                id,
                amendment(),
                format!("Change {id}"),
                chars,
            ))
            .await
            .unwrap();
    }
}

async fn decide(h: &Harness, agenda: &str, id: &str, accept_votes: bool) -> SessionId {
    h.coordinator
        .activate_change_request(&event(), &amendment(), &ChangeRequestId::new(id), &chair())
        .await
        .unwrap();
    let session = h
        .coordinator
        .start_introduction(request(agenda, cr_target(id), simple(id)), &chair())
        .await
        .unwrap();
    h.coordinator.start_voting(&session.id, &chair()).await.unwrap();
    let ballot = if accept_votes { accept() } else { reject() };
    h.coordinator
        .cast_vote(&session.id, &user("d1"), ballot)
        .await
        .unwrap();
    h.coordinator.close_voting(&session.id, &chair()).await.unwrap();
    session.id
}

#[tokio::test]
async fn amendment_final_vote_waits_for_every_change_request() {
    let h = harness();
    seat(&h, &delegates(1));
    register(&h.coordinator).await;

    let final_vote = h
        .coordinator
        .start_introduction(
            request("agi_final", TargetId::Amendment(amendment()), simple("Charter")),
            &chair(),
        )
        .await
        .unwrap();
    let err = h
        .coordinator
        .start_voting(&final_vote.id, &chair())
        .await
        .unwrap_err();
    assert!(matches!(voting_error(err), VotingError::QueueOrderingViolation(_)));
    // The rejected transition left the session untouched.
    assert_eq!(
        h.coordinator.session(&final_vote.id).unwrap().phase,
        Phase::Introduction
    );

    decide(&h, "agi_cr1", "cr_long", true).await;
    let err = h
        .coordinator
        .start_voting(&final_vote.id, &chair())
        .await
        .unwrap_err();
    assert!(matches!(voting_error(err), VotingError::QueueOrderingViolation(_)));

    decide(&h, "agi_cr2", "cr_short", false).await;
    let crs = h.coordinator.change_requests(&amendment()).unwrap();
    assert!(crs.iter().all(|cr| cr.completed_at.is_some()));
    assert_eq!(crs[0].result, Some(SessionResult::Passed));
    assert_eq!(crs[1].result, Some(SessionResult::Rejected));
    assert!(h.coordinator.next_change_request(&amendment()).unwrap().is_none());

    h.coordinator.start_voting(&final_vote.id, &chair()).await.unwrap();
    h.coordinator
        .cast_vote(&final_vote.id, &user("d1"), accept())
        .await
        .unwrap();
    h.coordinator.close_voting(&final_vote.id, &chair()).await.unwrap();

    h.coordinator.shutdown().await;
    let forwarded = h.workflow.forwarded();
    assert_eq!(forwarded.len(), 1);
    assert_eq!(forwarded[0].amendment, amendment());
    assert_eq!(forwarded[0].session, final_vote.id);
    // Sub-ballots are reported but never forwarded.
    assert_eq!(h.notifier.sent_of_kind("voting_completed").len(), 3);
}

#[tokio::test]
async fn change_requests_open_strictly_in_turn() {
    let h = harness();
    seat(&h, &delegates(1));
    register(&h.coordinator).await;

    assert_eq!(
        h.coordinator.next_change_request(&amendment()).unwrap().map(|cr| cr.id),
        Some(ChangeRequestId::new("cr_long"))
    );
    let err = h
        .coordinator
        .activate_change_request(&event(), &amendment(), &ChangeRequestId::new("cr_short"), &chair())
        .await
        .unwrap_err();
    assert!(matches!(voting_error(err), VotingError::QueueOrderingViolation(_)));

    h.coordinator
        .activate_change_request(&event(), &amendment(), &ChangeRequestId::new("cr_long"), &chair())
        .await
        .unwrap();
    // One open at a time.
    let err = h
        .coordinator
        .activate_change_request(&event(), &amendment(), &ChangeRequestId::new("cr_short"), &chair())
        .await
        .unwrap_err();
    assert!(matches!(voting_error(err), VotingError::QueueOrderingViolation(_)));

    // Delegates cannot drive the queue.
    let err = h
        .coordinator
        .activate_change_request(&event(), &amendment(), &ChangeRequestId::new("cr_short"), &user("d1"))
        .await
        .unwrap_err();
    assert!(matches!(voting_error(err), VotingError::PermissionDenied(_)));
}

#[tokio::test]
async fn sub_ballot_needs_its_change_request_open() {
    let h = harness();
    seat(&h, &delegates(1));
    register(&h.coordinator).await;

    let session = h
        .coordinator
        .start_introduction(request("agi_cr", cr_target("cr_long"), simple("Long")), &chair())
        .await
        .unwrap();
    let err = h
        .coordinator
        .start_voting(&session.id, &chair())
        .await
        .unwrap_err();
    assert!(matches!(voting_error(err), VotingError::QueueOrderingViolation(_)));

    let err = h
        .coordinator
        .start_introduction(request("agi_other", cr_target("cr_missing"), simple("Missing")), &chair())
        .await
        .unwrap_err();
    assert!(matches!(voting_error(err), VotingError::NotFound(_)));
}

#[tokio::test]
async fn change_request_is_decided_by_one_session_only() {
    let h = harness();
    seat(&h, &delegates(3));
    register(&h.coordinator).await;
    h.coordinator
        .activate_change_request(&event(), &amendment(), &ChangeRequestId::new("cr_long"), &chair())
        .await
        .unwrap();

    let first = h
        .coordinator
        .start_introduction(request("agi_a", cr_target("cr_long"), simple("Long")), &chair())
        .await
        .unwrap();
    let err = h
        .coordinator
        .start_introduction(request("agi_b", cr_target("cr_long"), simple("Long again")), &chair())
        .await
        .unwrap_err();
    match voting_error(err) {
        VotingError::SessionConflict { agenda_item, active } => {
            assert_eq!(agenda_item.as_str(), "agi_a");
            assert_eq!(active, first.id);
        }
        other => panic!("unexpected error {other}"),
    }

    h.coordinator.start_voting(&first.id, &chair()).await.unwrap();
    h.coordinator
        .cast_vote(&first.id, &user("d1"), accept())
        .await
        .unwrap();
    h.coordinator.close_voting(&first.id, &chair()).await.unwrap();

    // Decided: no other agenda item can reopen it.
    let err = h
        .coordinator
        .start_introduction(request("agi_b", cr_target("cr_long"), simple("Long again")), &chair())
        .await
        .unwrap_err();
    assert!(matches!(voting_error(err), VotingError::QueueOrderingViolation(_)));

    let decided = h
        .coordinator
        .change_requests(&amendment())
        .unwrap()
        .into_iter()
        .find(|cr| cr.id.as_str() == "cr_long")
        .unwrap();
    assert_eq!(decided.result, Some(SessionResult::Passed));
    let sessions: Vec<_> = h
        .coordinator
        .sessions_for_event(&event())
        .unwrap()
        .into_iter()
        .filter(|s| s.target == cr_target("cr_long"))
        .collect();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].result, Some(SessionResult::Passed));
}

#[tokio::test]
async fn sub_ballot_refuses_votes_once_its_change_request_closed() {
    let h = harness();
    seat(&h, &delegates(3));
    register(&h.coordinator).await;
    h.coordinator
        .activate_change_request(&event(), &amendment(), &ChangeRequestId::new("cr_long"), &chair())
        .await
        .unwrap();
    let session = h
        .coordinator
        .start_introduction(request("agi_a", cr_target("cr_long"), simple("Long")), &chair())
        .await
        .unwrap();
    h.coordinator.start_voting(&session.id, &chair()).await.unwrap();
    h.coordinator
        .cast_vote(&session.id, &user("d1"), accept())
        .await
        .unwrap();

    // The change request gets decided behind the session's back.
    let mut stored = h.store.change_requests(&amendment()).unwrap();
    for cr in stored.iter_mut().filter(|cr| cr.id.as_str() == "cr_long") {
        cr.completed_at = Some(Timestamp::new(START));
        cr.result = Some(SessionResult::Rejected);
    }
    h.store.put_change_requests(&stored).unwrap();

    let err = h
        .coordinator
        .cast_vote(&session.id, &user("d2"), reject())
        .await
        .unwrap_err();
    assert!(matches!(voting_error(err), VotingError::QueueOrderingViolation(_)));
    let err = h
        .coordinator
        .change_vote(&session.id, &user("d1"), reject())
        .await
        .unwrap_err();
    assert!(matches!(voting_error(err), VotingError::QueueOrderingViolation(_)));
    assert_eq!(h.store.votes_for_session(&session.id).unwrap().len(), 1);
}

#[tokio::test]
async fn reorder_changes_the_next_request() {
    let h = harness();
    seat(&h, &delegates(1));
    register(&h.coordinator).await;

    let order = [ChangeRequestId::new("cr_short"), ChangeRequestId::new("cr_long")];
    let reordered = h
        .coordinator
        .reorder_change_requests(&event(), &amendment(), &order, &chair())
        .await
        .unwrap();
    let ids: Vec<&str> = reordered.iter().map(|cr| cr.id.as_str()).collect();
    assert_eq!(ids, vec!["cr_short", "cr_long"]);
    assert_eq!(
        h.coordinator.next_change_request(&amendment()).unwrap().map(|cr| cr.id),
        Some(ChangeRequestId::new("cr_short"))
    );

    // Incomplete orders are refused.
    let err = h
        .coordinator
        .reorder_change_requests(&event(), &amendment(), &order[..1], &chair())
        .await
        .unwrap_err();
    assert!(matches!(voting_error(err), VotingError::QueueOrderingViolation(_)));

    // Decided requests are fixed in place.
    decide(&h, "agi_cr1", "cr_short", true).await;
    let err = h
        .coordinator
        .reorder_change_requests(&event(), &amendment(), &order, &chair())
        .await
        .unwrap_err();
    assert!(matches!(voting_error(err), VotingError::QueueOrderingViolation(_)));

    h.coordinator.shutdown().await;
    assert!(h
        .timeline
        .event_types()
        .contains(&"change_request_activated".to_string()));
}

#[tokio::test]
async fn re_registering_keeps_voting_state() {
    let h = harness();
    seat(&h, &delegates(1));
    register(&h.coordinator).await;
    decide(&h, "agi_cr1", "cr_long", true).await;

    let updated = h
        .coordinator
        .register_change_request(ChangeRequest::new("cr_long", amendment(), "Renamed", 900))
        .await
        .unwrap();
    assert_eq!(updated.title, "Renamed");
    assert_eq!(updated.result, Some(SessionResult::Passed));
    assert!(updated.completed_at.is_some());

    // A decided request cannot host another sub-ballot.
    let err = h
        .coordinator
        .start_introduction(request("agi_again", cr_target("cr_long"), simple("Again")), &chair())
        .await
        .unwrap_err();
    assert!(matches!(voting_error(err), VotingError::QueueOrderingViolation(_)));
}
