//! Inbound commands and what handling them produced.
//!
//! Event sources and the periodic ticker are both just producers of
//! [`Command`]s into the control plane's queue. The engine is the only
//! consumer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::engine::{ActivationOutcome, PushOutcome, TickReport};
use crate::model::{SolicitorId, WorkItemId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    /// A new work item was recorded and needs its first solicitor.
    WorkItemCreated { work_item: WorkItemId },
    SolicitorAccepted {
        work_item: WorkItemId,
        solicitor: SolicitorId,
    },
    SolicitorRejected {
        work_item: WorkItemId,
        solicitor: SolicitorId,
    },
    SolicitorCompleted {
        work_item: WorkItemId,
        solicitor: SolicitorId,
    },
    ReturnToOriginator { work_item: WorkItemId },
    OriginatorResubmitted { work_item: WorkItemId },
    ManualCancel { work_item: WorkItemId },
    /// Put an unassigned item back into rotation with a fresh chain segment.
    RotationRestart { work_item: WorkItemId },
    /// Run the periodic scans. `None` means "as of the engine clock".
    Tick { now: Option<DateTime<Utc>> },
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::WorkItemCreated { .. } => "work_item_created",
            Command::SolicitorAccepted { .. } => "solicitor_accepted",
            Command::SolicitorRejected { .. } => "solicitor_rejected",
            Command::SolicitorCompleted { .. } => "solicitor_completed",
            Command::ReturnToOriginator { .. } => "return_to_originator",
            Command::OriginatorResubmitted { .. } => "originator_resubmitted",
            Command::ManualCancel { .. } => "manual_cancel",
            Command::RotationRestart { .. } => "rotation_restart",
            Command::Tick { .. } => "tick",
        }
    }

    /// The work item this command is about, if any.
    pub fn work_item(&self) -> Option<WorkItemId> {
        match self {
            Command::WorkItemCreated { work_item }
            | Command::SolicitorAccepted { work_item, .. }
            | Command::SolicitorRejected { work_item, .. }
            | Command::SolicitorCompleted { work_item, .. }
            | Command::ReturnToOriginator { work_item }
            | Command::OriginatorResubmitted { work_item }
            | Command::ManualCancel { work_item }
            | Command::RotationRestart { work_item } => Some(*work_item),
            Command::Tick { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CommandOutcome {
    Activated(ActivationOutcome),
    Accepted { due_at: Option<DateTime<Utc>> },
    Rotated(PushOutcome),
    Completed,
    Returned,
    Resubmitted,
    Cancelled,
    Ticked(TickReport),
}
