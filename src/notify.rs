//! Outbound notifications.
//!
//! The engine decides that a notification is owed and to whom. Rendering and
//! delivery belong to whatever implements [`NotificationGateway`].

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Error, Result};
use crate::model::{SolicitorId, WorkItemId};

/// Who a notification is for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Recipient {
    /// The staff user that raised the work item.
    Originator { user: String },
    /// The oversight role for a zone (CSO escalation target).
    ZonalOversight { zone: String },
    Solicitor { id: SolicitorId, address: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Payload {
    /// It is now this solicitor's turn on the work item.
    Assigned { work_item: WorkItemId },
    /// Accepted work is still open past the reminder threshold.
    Reminder {
        work_item: WorkItemId,
        due_at: Option<DateTime<Utc>>,
    },
    /// Accepted work blew its SLA and was handed back.
    SlaBreached {
        work_item: WorkItemId,
        solicitor: SolicitorId,
    },
    /// Every candidate declined or timed out.
    NoSolicitorAvailable { work_item: WorkItemId },
    /// Accepted work was handed back for the originator to act on.
    Returned { work_item: WorkItemId },
}

impl Payload {
    pub fn name(&self) -> &'static str {
        match self {
            Payload::Assigned { .. } => "assigned",
            Payload::Reminder { .. } => "reminder",
            Payload::SlaBreached { .. } => "sla_breached",
            Payload::NoSolicitorAvailable { .. } => "no_solicitor_available",
            Payload::Returned { .. } => "returned",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub recipient: Recipient,
    pub payload: Payload,
}

/// Delivery boundary. Fire-and-forget from the engine's point of view: an
/// error is logged by the caller and never rolls back ledger state.
#[async_trait]
pub trait NotificationGateway: Send + Sync {
    async fn notify(&self, recipient: &Recipient, payload: &Payload) -> Result<()>;
}

/// Gateway that only logs. Used when no delivery collaborator is wired in.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingGateway;

#[async_trait]
impl NotificationGateway for TracingGateway {
    async fn notify(&self, recipient: &Recipient, payload: &Payload) -> Result<()> {
        let recipient = serde_json::to_string(recipient)
            .map_err(|e| Error::Notification(format!("unencodable recipient: {e}")))?;
        info!(%recipient, notification = payload.name(), ?payload, "notification");
        Ok(())
    }
}

/// Gateway that keeps everything it was asked to send.
#[derive(Debug, Default)]
pub struct RecordingGateway {
    sent: Mutex<Vec<Notification>>,
}

impl RecordingGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Drain and return what was sent so far.
    pub fn take(&self) -> Vec<Notification> {
        std::mem::take(&mut *self.sent.lock().unwrap_or_else(|e| e.into_inner()))
    }
}

#[async_trait]
impl NotificationGateway for RecordingGateway {
    async fn notify(&self, recipient: &Recipient, payload: &Payload) -> Result<()> {
        self.sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Notification {
                recipient: recipient.clone(),
                payload: payload.clone(),
            });
        Ok(())
    }
}
