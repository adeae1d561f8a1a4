//! Shared fixtures: an engine over the in-memory ledger with a manual clock
//! and a recording gateway.

#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use solicitor_rotation::clock::{Clock, ManualClock};
use solicitor_rotation::config::EngineConfig;
use solicitor_rotation::engine::Engine;
use solicitor_rotation::model::{
    AssignmentAttempt, Firm, FirmId, JurisdictionId, NewWorkItem, Solicitor, SolicitorId,
    WorkItem, WorkItemId,
};
use solicitor_rotation::notify::{Notification, Payload, RecordingGateway, Recipient};
use solicitor_rotation::store::{MemoryStore, Store};

pub const J: JurisdictionId = JurisdictionId(10);

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap()
}

pub fn hours(h: i64) -> Duration {
    Duration::hours(h)
}

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub clock: Arc<ManualClock>,
    pub gateway: Arc<RecordingGateway>,
    pub engine: Arc<Engine>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(t0()));
        let gateway = Arc::new(RecordingGateway::new());
        let engine = Arc::new(Engine::new(
            store.clone(),
            clock.clone(),
            gateway.clone(),
            config,
        ));
        Self {
            store,
            clock,
            gateway,
            engine,
        }
    }

    /// One firm covering `jurisdiction`, staffed by eligible solicitors.
    pub fn seed(&self, jurisdiction: JurisdictionId, firm: i64, solicitors: &[i64]) {
        self.store.add_firm(Firm {
            id: FirmId(firm),
            name: format!("firm {firm}"),
            jurisdiction,
        });
        for &id in solicitors {
            self.store.add_solicitor(Solicitor {
                id: SolicitorId(id),
                firm_id: FirmId(firm),
                address: format!("s{id}@firm{firm}.example"),
                active: true,
                onboarded: true,
            });
        }
    }

    pub fn advance(&self, by: Duration) {
        self.clock.advance(by);
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Create a business request in `J` and return its id.
    pub async fn create(&self) -> WorkItemId {
        let (item, _) = self
            .engine
            .create(NewWorkItem::business(J, "clerk.ada").zone("north"))
            .await
            .unwrap();
        item.id
    }

    pub async fn item(&self, id: WorkItemId) -> WorkItem {
        self.store.get_work_item(id).await.unwrap()
    }

    pub async fn chain(&self, id: WorkItemId) -> Vec<AssignmentAttempt> {
        self.store.list_attempts(id).await.unwrap()
    }

    pub async fn active(&self, id: WorkItemId) -> Vec<AssignmentAttempt> {
        self.chain(id)
            .await
            .into_iter()
            .filter(|a| a.currently_active)
            .collect()
    }

    pub fn sent_to_originator(&self) -> Vec<Notification> {
        self.gateway
            .sent()
            .into_iter()
            .filter(|n| matches!(n.recipient, Recipient::Originator { .. }))
            .collect()
    }

    pub fn sent_matching(&self, pred: impl Fn(&Payload) -> bool) -> Vec<Notification> {
        self.gateway
            .sent()
            .into_iter()
            .filter(|n| pred(&n.payload))
            .collect()
    }
}
