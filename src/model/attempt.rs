//! Assignment attempts: one row per candidate per rotation.
//!
//! The attempts of a work item form its rotation chain. Rows are created in
//! batches and then only ever updated, so the chain doubles as an audit
//! trail of who was offered the work, when, and what they answered.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Candidate, SolicitorId, WorkItemId};

/// One candidate's turn in a work item's rotation chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssignmentAttempt {
    pub id: AttemptId,
    pub work_item_id: WorkItemId,
    pub solicitor_id: SolicitorId,

    /// Contact address, denormalized so notifications need no directory join.
    pub solicitor_address: String,

    /// Position in the chain. Strictly increasing per work item, never reused.
    pub rotation_order: u32,

    /// When this attempt's turn starts (or started). Restamped to the
    /// acceptance time when accepted, which starts the SLA clock.
    pub scheduled_at: DateTime<Utc>,

    pub accepted: bool,
    pub currently_active: bool,

    pub activated_at: Option<DateTime<Utc>>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub rejected_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,

    /// Optimistic concurrency token.
    pub version: i64,
}

impl AssignmentAttempt {
    /// A fresh, inactive attempt for `candidate`.
    pub fn new(
        work_item_id: WorkItemId,
        candidate: &Candidate,
        rotation_order: u32,
        scheduled_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: AttemptId::new(),
            work_item_id,
            solicitor_id: candidate.solicitor_id,
            solicitor_address: candidate.address.clone(),
            rotation_order,
            scheduled_at,
            accepted: false,
            currently_active: false,
            activated_at: None,
            accepted_at: None,
            rejected_at: None,
            created_at: now,
            version: 0,
        }
    }

    /// Still eligible to be offered the work: not accepted, not declined.
    pub fn is_open(&self) -> bool {
        !self.accepted && self.rejected_at.is_none()
    }
}

/// Newtype for attempt IDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AttemptId(pub Uuid);

impl AttemptId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for AttemptId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for AttemptId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The slice of an attempt the bulk updater reads and writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActiveFlagRow {
    pub id: AttemptId,
    pub currently_active: bool,
    pub version: i64,
}

impl From<&AssignmentAttempt> for ActiveFlagRow {
    fn from(attempt: &AssignmentAttempt) -> Self {
        Self {
            id: attempt.id,
            currently_active: attempt.currently_active,
            version: attempt.version,
        }
    }
}
