//! Periodic scans: stale escalation, reminders, reroute, rejected recovery.

mod common;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Duration;
use common::{Harness, J, hours, t0};
use solicitor_rotation::clock::ManualClock;
use solicitor_rotation::config::EngineConfig;
use solicitor_rotation::engine::{Engine, ScanKind};
use solicitor_rotation::error::Result;
use solicitor_rotation::model::{
    AssignmentAttempt, Candidate, Firm, FirmId, NewWorkItem, Solicitor, SolicitorId, Status,
    WorkItem, WorkItemId,
};
use solicitor_rotation::notify::{NotificationGateway, Payload, Recipient};
use solicitor_rotation::store::{MemoryStore, Store};
use tokio_util::sync::CancellationToken;

const S1: SolicitorId = SolicitorId(1);
const S2: SolicitorId = SolicitorId(2);

#[tokio::test]
async fn stale_accepted_work_is_returned_exactly_once() {
    let h = Harness::new();
    h.seed(J, 100, &[1, 2]);
    let id = h.create().await;
    h.engine.accept(id, S1).await.unwrap();
    h.gateway.take();

    h.advance(hours(73));
    let cancel = CancellationToken::new();
    let report = h.engine.tick(h.now(), &cancel).await;

    let stale = report.scan(ScanKind::StaleAccepted).unwrap();
    assert_eq!(stale.visited, 1);
    assert_eq!(stale.acted, 1);
    assert_eq!(stale.flags_cleared, 1);
    assert_eq!(report.failed(), 0);

    let item = h.item(id).await;
    assert_eq!(item.status, Status::ReturnedToOriginator);
    assert_eq!(item.assignee, Some(S1));
    assert!(h.active(id).await.is_empty());

    // A second pass finds nothing left to escalate.
    h.advance(Duration::minutes(1));
    let report = h.engine.tick(h.now(), &cancel).await;
    assert_eq!(report.scan(ScanKind::StaleAccepted).unwrap().visited, 0);

    let originator = h.sent_to_originator();
    assert_eq!(originator.len(), 1);
    assert_eq!(
        originator[0].payload,
        Payload::SlaBreached {
            work_item: id,
            solicitor: S1
        }
    );
    let oversight: Vec<_> = h
        .gateway
        .sent()
        .into_iter()
        .filter(|n| n.recipient == Recipient::ZonalOversight { zone: "north".into() })
        .collect();
    assert_eq!(oversight.len(), 1);
}

#[tokio::test]
async fn reminder_goes_out_once_inside_the_window() {
    let h = Harness::new();
    h.seed(J, 100, &[1]);
    let id = h.create().await;
    h.engine.accept(id, S1).await.unwrap();
    h.gateway.take();

    h.advance(hours(23));
    let report = h.engine.unattended_reminder_scan(h.now()).await;
    assert_eq!(report.visited, 0);

    h.advance(hours(7));
    let report = h.engine.unattended_reminder_scan(h.now()).await;
    assert_eq!(report.acted, 1);

    h.advance(hours(1));
    let report = h.engine.unattended_reminder_scan(h.now()).await;
    assert_eq!(report.visited, 0);

    let sent = h.gateway.sent();
    assert_eq!(sent.len(), 1);
    assert!(matches!(sent[0].recipient, Recipient::Solicitor { id: who, .. } if who == S1));
    assert_eq!(
        sent[0].payload,
        Payload::Reminder {
            work_item: id,
            due_at: Some(t0() + hours(72))
        }
    );
    assert_eq!(h.item(id).await.status, Status::Accepted);
}

#[tokio::test]
async fn reroute_moves_unanswered_turns_along() {
    let h = Harness::new();
    h.seed(J, 100, &[1, 2]);
    let id = h.create().await;

    h.advance(hours(24) + Duration::minutes(3));
    let report = h.engine.reroute_scan(h.now()).await;
    assert_eq!(report.visited, 0, "still inside the grace period");

    h.advance(Duration::minutes(3));
    let report = h.engine.reroute_scan(h.now()).await;
    assert_eq!(report.acted, 1);
    let item = h.item(id).await;
    assert_eq!(item.assignee, Some(S2));
    assert_eq!(item.status, Status::AssignedToSolicitor);

    h.advance(hours(24) + Duration::minutes(6));
    let report = h.engine.reroute_scan(h.now()).await;
    assert_eq!(report.acted, 1);
    let item = h.item(id).await;
    assert_eq!(item.status, Status::Unassigned);
    assert!(h.active(id).await.is_empty());
}

#[tokio::test]
async fn scans_continue_past_failing_items() {
    let h = Harness::new();
    h.seed(J, 100, &[1]);
    let id = h.create().await;
    h.engine.accept(id, S1).await.unwrap();

    // An active accepted attempt whose work item is gone.
    let orphan = AssignmentAttempt {
        accepted: true,
        currently_active: true,
        activated_at: Some(t0()),
        accepted_at: Some(t0()),
        ..AssignmentAttempt::new(
            WorkItemId::new(),
            &Candidate {
                solicitor_id: S2,
                address: "s2@firm100.example".into(),
            },
            1,
            t0(),
            t0(),
        )
    };
    assert!(h.store.insert_attempts(&[orphan]).await.unwrap());

    h.advance(hours(73));
    let report = h
        .engine
        .stale_accepted_scan(h.now(), &CancellationToken::new())
        .await;

    assert_eq!(report.visited, 2);
    assert_eq!(report.acted, 1);
    assert_eq!(report.failed, 1);
    assert_eq!(h.item(id).await.status, Status::ReturnedToOriginator);
}

#[tokio::test]
async fn stranded_rejections_are_recovered() {
    let h = Harness::new();
    h.seed(J, 100, &[1, 2]);
    let id = h.create().await;

    // The item write landed, the chain never moved.
    let item = h.item(id).await;
    let stranded = WorkItem {
        status: Status::Rejected,
        assignee: None,
        ..item
    };
    assert!(h.store.cas_work_item(&stranded).await.unwrap());

    h.advance(Duration::minutes(2));
    let report = h.engine.rejected_recovery_scan(h.now()).await;
    assert_eq!(report.visited, 0, "too fresh to touch");

    h.advance(Duration::minutes(10));
    let report = h.engine.rejected_recovery_scan(h.now()).await;
    assert_eq!(report.acted, 1);

    let item = h.item(id).await;
    assert_eq!(item.status, Status::AssignedToSolicitor);
    assert_eq!(item.assignee, Some(S2));
    let chain = h.chain(id).await;
    assert!(chain[0].rejected_at.is_some());
    assert!(!chain[0].currently_active);
    assert!(chain[1].currently_active);
}

#[tokio::test]
async fn tick_stops_between_scans_when_cancelled() {
    let h = Harness::new();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let report = h.engine.tick(h.now(), &cancel).await;
    assert!(report.cancelled);
    assert!(report.scans.is_empty());
}

/// Delivery that races the scan: as soon as the originator hears about the
/// breach, the work goes straight back to the solicitor.
struct ResubmitOnBreach {
    store: Arc<MemoryStore>,
}

#[async_trait]
impl NotificationGateway for ResubmitOnBreach {
    async fn notify(&self, recipient: &Recipient, payload: &Payload) -> Result<()> {
        let (Recipient::Originator { .. }, Payload::SlaBreached { work_item, .. }) =
            (recipient, payload)
        else {
            return Ok(());
        };
        let item = self.store.get_work_item(*work_item).await?;
        assert!(
            self.store
                .cas_work_item(&WorkItem {
                    status: Status::AssignedToSolicitor,
                    due_at: None,
                    ..item
                })
                .await?
        );
        let attempt = self
            .store
            .list_attempts(*work_item)
            .await?
            .into_iter()
            .find(|a| a.currently_active)
            .unwrap();
        self.store.force_attempt(AssignmentAttempt {
            accepted: false,
            accepted_at: None,
            scheduled_at: t0() + hours(73),
            ..attempt
        });
        Ok(())
    }
}

#[tokio::test]
async fn stale_clear_leaves_attempts_rewritten_after_the_listing() {
    let store = Arc::new(MemoryStore::new());
    let clock = Arc::new(ManualClock::new(t0()));
    let engine = Engine::new(
        store.clone(),
        clock.clone(),
        Arc::new(ResubmitOnBreach {
            store: store.clone(),
        }),
        EngineConfig::default(),
    );
    store.add_firm(Firm {
        id: FirmId(100),
        name: "firm 100".into(),
        jurisdiction: J,
    });
    store.add_solicitor(Solicitor {
        id: S1,
        firm_id: FirmId(100),
        address: "s1@firm100.example".into(),
        active: true,
        onboarded: true,
    });

    let (item, _) = engine
        .create(NewWorkItem::business(J, "clerk.ada").zone("north"))
        .await
        .unwrap();
    engine.accept(item.id, S1).await.unwrap();

    clock.set(t0() + hours(73));
    let report = engine
        .stale_accepted_scan(t0() + hours(73), &CancellationToken::new())
        .await;
    assert_eq!(report.acted, 1);
    assert_eq!(report.flags_cleared, 0);
    assert_eq!(report.failed, 0);

    // The resubmitted turn survives, so the item is not stranded.
    let chain = store.list_attempts(item.id).await.unwrap();
    assert!(chain[0].currently_active);
    assert!(!chain[0].accepted);
    let item = store.get_work_item(item.id).await.unwrap();
    assert_eq!(item.status, Status::AssignedToSolicitor);
    assert_eq!(item.assignee, Some(S1));
}
