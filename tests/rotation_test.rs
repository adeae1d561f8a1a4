//! Rotation scheduler: push_to_next semantics, idempotence, exhaustion, and
//! chain repair.

mod common;

use chrono::Duration;
use common::{Harness, J, hours, t0};
use solicitor_rotation::engine::{PushOutcome, Trigger};
use solicitor_rotation::model::{AssignmentAttempt, SolicitorId, Status};
use solicitor_rotation::notify::Payload;
use solicitor_rotation::store::Store;

const S1: SolicitorId = SolicitorId(1);
const S2: SolicitorId = SolicitorId(2);
const S3: SolicitorId = SolicitorId(3);

#[tokio::test]
async fn timed_out_push_is_idempotent() {
    let h = Harness::new();
    h.seed(J, 100, &[1, 2, 3]);
    let id = h.create().await;

    h.advance(hours(24) + Duration::minutes(10));
    let first = h.engine.push_to_next(id, 1, Trigger::TimedOut).await.unwrap();
    assert_eq!(
        first,
        PushOutcome::Activated {
            solicitor: S2,
            rotation_order: 2
        }
    );
    let after_first = h.chain(id).await;

    let second = h.engine.push_to_next(id, 1, Trigger::TimedOut).await.unwrap();
    assert_eq!(
        second,
        PushOutcome::AlreadyActive {
            solicitor: S2,
            rotation_order: 2
        }
    );
    assert_eq!(h.chain(id).await, after_first);
    assert_eq!(h.item(id).await.assignee, Some(S2));
}

#[tokio::test]
async fn timed_out_push_waits_for_the_next_turn() {
    let h = Harness::new();
    h.seed(J, 100, &[1, 2]);
    let id = h.create().await;

    h.advance(hours(1));
    let outcome = h.engine.push_to_next(id, 1, Trigger::TimedOut).await.unwrap();
    assert_eq!(
        outcome,
        PushOutcome::Waiting {
            rotation_order: 2,
            scheduled_at: t0() + hours(24)
        }
    );
    let active = h.active(id).await;
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].solicitor_id, S1);
}

#[tokio::test]
async fn activation_respaces_the_pending_tail() {
    let h = Harness::new();
    h.seed(J, 100, &[1, 2, 3]);
    let id = h.create().await;

    h.advance(hours(5));
    h.engine.reject(id, S1).await.unwrap();

    let chain = h.chain(id).await;
    assert_eq!(chain[1].scheduled_at, t0() + hours(5));
    assert_eq!(chain[2].scheduled_at, t0() + hours(5) + hours(24));
}

#[tokio::test]
async fn rotation_never_returns_to_a_rejecting_solicitor() {
    let h = Harness::new();
    h.seed(J, 100, &[1, 2, 3]);
    let id = h.create().await;

    h.engine.reject(id, S1).await.unwrap();
    h.engine.reject(id, S2).await.unwrap();

    let item = h.item(id).await;
    assert_eq!(item.assignee, Some(S3));
    let chain = h.chain(id).await;
    let rejected: Vec<SolicitorId> = chain
        .iter()
        .filter(|a| a.rejected_at.is_some())
        .map(|a| a.solicitor_id)
        .collect();
    assert_eq!(rejected, vec![S1, S2]);
    assert_eq!(h.active(id).await.len(), 1);

    // Pushing past the current order again never reaches back.
    let outcome = h.engine.push_to_next(id, 0, Trigger::Rejected).await.unwrap();
    assert_eq!(
        outcome,
        PushOutcome::AlreadyActive {
            solicitor: S3,
            rotation_order: 3
        }
    );
}

#[tokio::test]
async fn exhaustion_by_timeout_unassigns_once() {
    let h = Harness::new();
    h.seed(J, 100, &[1]);
    let id = h.create().await;

    h.advance(hours(25));
    let outcome = h.engine.push_to_next(id, 1, Trigger::TimedOut).await.unwrap();
    assert_eq!(outcome, PushOutcome::Exhausted);
    let item = h.item(id).await;
    assert_eq!(item.status, Status::Unassigned);
    assert_eq!(item.assignee, None);
    assert!(h.active(id).await.is_empty());

    let again = h.engine.push_to_next(id, 1, Trigger::TimedOut).await.unwrap();
    assert_eq!(again, PushOutcome::Exhausted);
    let exhausted =
        h.sent_matching(|p| matches!(p, Payload::NoSolicitorAvailable { .. }));
    assert_eq!(exhausted.len(), 1);
}

#[tokio::test]
async fn push_leaves_accepted_work_alone() {
    let h = Harness::new();
    h.seed(J, 100, &[1, 2]);
    let id = h.create().await;
    h.engine.accept(id, S1).await.unwrap();

    h.advance(hours(30));
    let outcome = h.engine.push_to_next(id, 1, Trigger::TimedOut).await.unwrap();
    assert_eq!(
        outcome,
        PushOutcome::NotRotating {
            status: Status::Accepted
        }
    );
    assert_eq!(h.item(id).await.assignee, Some(S1));
}

#[tokio::test]
async fn multiple_active_attempts_are_repaired() {
    let h = Harness::new();
    h.seed(J, 100, &[1, 2]);
    let id = h.create().await;

    let stray = h.chain(id).await[1].clone();
    h.store.force_attempt(AssignmentAttempt {
        currently_active: true,
        activated_at: Some(t0() + hours(1)),
        ..stray
    });
    assert_eq!(h.active(id).await.len(), 2);

    h.advance(hours(2));
    let outcome = h.engine.push_to_next(id, 0, Trigger::TimedOut).await.unwrap();
    assert_eq!(
        outcome,
        PushOutcome::AlreadyActive {
            solicitor: S2,
            rotation_order: 2
        }
    );

    let active = h.active(id).await;
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].rotation_order, 2);
    assert_eq!(h.item(id).await.assignee, Some(S2));
}

#[tokio::test]
async fn repeated_push_is_answered_from_the_active_row() {
    let h = Harness::new();
    h.seed(J, 100, &[1, 2, 3]);
    let id = h.create().await;

    h.advance(hours(25));
    h.engine.push_to_next(id, 1, Trigger::TimedOut).await.unwrap();
    let found = h.store.find_active_attempt(id).await.unwrap().unwrap();
    assert_eq!(found.rotation_order, 2);
    assert_eq!(found.solicitor_id, S2);

    let before = (h.chain(id).await, h.item(id).await);
    let again = h.engine.push_to_next(id, 1, Trigger::Rejected).await.unwrap();
    assert_eq!(
        again,
        PushOutcome::AlreadyActive {
            solicitor: S2,
            rotation_order: 2
        }
    );
    assert_eq!((h.chain(id).await, h.item(id).await), before);
}
