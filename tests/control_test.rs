//! Control plane: queued commands, replies, failures, shutdown and ticking.

mod common;

use std::time::Duration as StdDuration;

use common::{Harness, J, hours, t0};
use solicitor_rotation::config::EngineConfig;
use solicitor_rotation::engine::{ActivationOutcome, ControlPlane, ScanKind};
use solicitor_rotation::error::Error;
use solicitor_rotation::event::{Command, CommandOutcome};
use solicitor_rotation::model::{NewWorkItem, SolicitorId, Status, WorkItemId};
use solicitor_rotation::store::Store;

const S1: SolicitorId = SolicitorId(1);

/// Record an item the way the originating workflow would, without activating it.
async fn record(h: &Harness) -> WorkItemId {
    let item = NewWorkItem::business(J, "clerk.ada")
        .zone("north")
        .build(t0());
    h.store.insert_work_item(&item).await.unwrap();
    item.id
}

#[tokio::test]
async fn commands_are_answered_in_order() {
    let h = Harness::new();
    h.seed(J, 100, &[1, 2]);
    let id = record(&h).await;

    let control = ControlPlane::new(h.engine.clone()).without_ticker();
    let sender = control.sender();
    let shutdown = control.shutdown_handle();
    let running = tokio::spawn(control.run());

    let created = sender
        .request(Command::WorkItemCreated { work_item: id })
        .await
        .unwrap();
    assert_eq!(
        created,
        CommandOutcome::Activated(ActivationOutcome::Assigned {
            solicitor: S1,
            rotation_order: 1
        })
    );

    let accepted = sender
        .request(Command::SolicitorAccepted {
            work_item: id,
            solicitor: S1,
        })
        .await
        .unwrap();
    assert_eq!(
        accepted,
        CommandOutcome::Accepted {
            due_at: Some(t0() + hours(72))
        }
    );

    let ticked = sender
        .request(Command::Tick {
            now: Some(t0() + hours(73)),
        })
        .await
        .unwrap();
    let CommandOutcome::Ticked(report) = ticked else {
        panic!("expected a tick report, got {ticked:?}");
    };
    assert_eq!(report.scan(ScanKind::StaleAccepted).unwrap().acted, 1);
    assert_eq!(h.item(id).await.status, Status::ReturnedToOriginator);

    shutdown.cancel();
    running.await.unwrap().unwrap();
}

#[tokio::test]
async fn a_failing_command_does_not_stop_the_loop() {
    let h = Harness::new();
    h.seed(J, 100, &[1]);
    let id = record(&h).await;

    let control = ControlPlane::new(h.engine.clone()).without_ticker();
    let sender = control.sender();
    let shutdown = control.shutdown_handle();
    let running = tokio::spawn(control.run());

    let err = sender
        .request(Command::SolicitorAccepted {
            work_item: WorkItemId::new(),
            solicitor: S1,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));

    // Fire-and-forget also survives a failure.
    sender
        .send(Command::ManualCancel {
            work_item: WorkItemId::new(),
        })
        .await
        .unwrap();

    let created = sender
        .request(Command::WorkItemCreated { work_item: id })
        .await
        .unwrap();
    assert!(matches!(
        created,
        CommandOutcome::Activated(ActivationOutcome::Assigned { .. })
    ));

    shutdown.cancel();
    running.await.unwrap().unwrap();
}

#[tokio::test]
async fn shutdown_closes_the_queue() {
    let h = Harness::new();
    let control = ControlPlane::new(h.engine.clone()).without_ticker();
    let sender = control.sender();
    control.shutdown();
    control.run().await.unwrap();

    let err = sender.request(Command::Tick { now: None }).await.unwrap_err();
    assert!(matches!(err, Error::Other(_)));
}

#[tokio::test]
async fn loop_ends_when_every_sender_is_gone() {
    let h = Harness::new();
    let control = ControlPlane::new(h.engine.clone()).without_ticker();
    drop(control.sender());
    tokio::time::timeout(StdDuration::from_secs(5), control.run())
        .await
        .expect("control plane should stop on its own")
        .unwrap();
}

#[tokio::test(start_paused = true)]
async fn ticker_drives_the_scans() {
    let h = Harness::with_config(EngineConfig {
        tick_interval_secs: 1,
        ..EngineConfig::default()
    });
    h.seed(J, 100, &[1]);
    let id = h.create().await;
    h.engine.accept(id, S1).await.unwrap();
    h.clock.set(t0() + hours(73));

    let control = ControlPlane::new(h.engine.clone());
    let shutdown = control.shutdown_handle();
    let running = tokio::spawn(control.run());

    for _ in 0..10 {
        if h.item(id).await.status == Status::ReturnedToOriginator {
            break;
        }
        tokio::time::sleep(StdDuration::from_millis(500)).await;
    }
    assert_eq!(h.item(id).await.status, Status::ReturnedToOriginator);

    shutdown.cancel();
    running.await.unwrap().unwrap();
}

#[test]
fn commands_name_their_work_item() {
    let id = WorkItemId::new();
    assert_eq!(
        Command::SolicitorRejected {
            work_item: id,
            solicitor: S1
        }
        .work_item(),
        Some(id)
    );
    assert_eq!(Command::RotationRestart { work_item: id }.work_item(), Some(id));
    assert_eq!(Command::Tick { now: None }.work_item(), None);
}
