//! Legal search work items and their lifecycle status.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{JurisdictionId, SolicitorId};

// ---------------------------------------------------------------------------
// Work Item
// ---------------------------------------------------------------------------

/// A legal search request that needs a solicitor.
///
/// The originating staff workflow owns the item. The engine only ever writes
/// `status`, `assignee` and `due_at` (plus the bookkeeping `updated_at` and
/// `version`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: WorkItemId,

    /// Decides how the governing jurisdiction is derived.
    pub kind: RequestKind,

    /// Location of the business the search is about.
    pub business_location: JurisdictionId,

    /// Location the entity is registered in. Only consulted for
    /// [`RequestKind::Registered`].
    pub registration_location: Option<JurisdictionId>,

    pub status: Status,

    /// The solicitor whose turn it currently is, if any.
    pub assignee: Option<SolicitorId>,

    /// SLA deadline. Set when an attempt is accepted, cleared otherwise.
    pub due_at: Option<DateTime<Utc>>,

    /// Staff user that raised the request and receives it back on return.
    pub originator: String,

    /// Oversight zone notified on SLA escalation.
    pub zone: String,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    /// Optimistic concurrency token. Bumped by every successful write.
    pub version: i64,
}

impl WorkItem {
    /// The single jurisdiction whose coverage providers are eligible.
    ///
    /// Business requests use the business location. Registered requests use
    /// the business location when it matches the registration location and
    /// the registration location otherwise.
    pub fn jurisdiction(&self) -> JurisdictionId {
        match self.kind {
            RequestKind::Business => self.business_location,
            RequestKind::Registered => match self.registration_location {
                Some(registered) if registered != self.business_location => registered,
                _ => self.business_location,
            },
        }
    }
}

/// Newtype for work item IDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorkItemId(pub Uuid);

impl WorkItemId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for WorkItemId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for WorkItemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How the jurisdiction of a request is determined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    /// Jurisdiction is the business location.
    Business,
    /// Jurisdiction compares business and registration locations.
    Registered,
}

impl std::fmt::Display for RequestKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RequestKind::Business => "business",
            RequestKind::Registered => "registered",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for RequestKind {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "business" => Ok(RequestKind::Business),
            "registered" => Ok(RequestKind::Registered),
            other => Err(crate::error::Error::Other(format!(
                "unknown request kind: {other}"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Lifecycle status of a work item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// No solicitor holds the item. Initial state and chain-exhausted state.
    Unassigned,
    /// A solicitor has been offered the item and has not answered yet.
    AssignedToSolicitor,
    /// The solicitor accepted; the SLA clock is running.
    Accepted,
    /// The active solicitor declined. Transient while the chain advances.
    Rejected,
    /// Handed back to the originating staff user.
    ReturnedToOriginator,
    /// Search finished. Terminal.
    Completed,
    /// Withdrawn by staff. Terminal.
    Cancelled,
}

impl Status {
    /// Can transition from self to `to`?
    pub fn can_transition_to(self, to: Status) -> bool {
        use Status::*;
        if to == Cancelled {
            return !self.is_terminal();
        }
        matches!(
            (self, to),
            (Unassigned, AssignedToSolicitor)
                | (AssignedToSolicitor, Accepted)
                | (AssignedToSolicitor, Rejected)
                | (AssignedToSolicitor, AssignedToSolicitor) // timed out, next candidate
                | (AssignedToSolicitor, Unassigned)          // timed out, chain exhausted
                | (Rejected, AssignedToSolicitor)
                | (Rejected, Unassigned)
                | (Accepted, Completed)
                | (Accepted, ReturnedToOriginator)
                | (ReturnedToOriginator, AssignedToSolicitor)
        )
    }

    /// Is this a terminal state?
    pub fn is_terminal(self) -> bool {
        matches!(self, Status::Completed | Status::Cancelled)
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Status::Unassigned => "unassigned",
            Status::AssignedToSolicitor => "assigned_to_solicitor",
            Status::Accepted => "accepted",
            Status::Rejected => "rejected",
            Status::ReturnedToOriginator => "returned_to_originator",
            Status::Completed => "completed",
            Status::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for Status {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "unassigned" => Ok(Status::Unassigned),
            "assigned_to_solicitor" => Ok(Status::AssignedToSolicitor),
            "accepted" => Ok(Status::Accepted),
            "rejected" => Ok(Status::Rejected),
            "returned_to_originator" => Ok(Status::ReturnedToOriginator),
            "completed" => Ok(Status::Completed),
            "cancelled" => Ok(Status::Cancelled),
            other => Err(crate::error::Error::Other(format!("unknown status: {other}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Builder for a new work item, as raised by the originating workflow.
pub struct NewWorkItem {
    pub(crate) kind: RequestKind,
    pub(crate) business_location: JurisdictionId,
    pub(crate) registration_location: Option<JurisdictionId>,
    pub(crate) originator: String,
    pub(crate) zone: String,
}

impl NewWorkItem {
    /// A business-location request.
    pub fn business(location: JurisdictionId, originator: impl Into<String>) -> Self {
        Self {
            kind: RequestKind::Business,
            business_location: location,
            registration_location: None,
            originator: originator.into(),
            zone: String::new(),
        }
    }

    /// A request resolved by comparing business and registration locations.
    pub fn registered(
        business_location: JurisdictionId,
        registration_location: JurisdictionId,
        originator: impl Into<String>,
    ) -> Self {
        Self {
            kind: RequestKind::Registered,
            business_location,
            registration_location: Some(registration_location),
            originator: originator.into(),
            zone: String::new(),
        }
    }

    pub fn zone(mut self, zone: impl Into<String>) -> Self {
        self.zone = zone.into();
        self
    }

    /// Materialize the item in its initial `Unassigned` state.
    pub fn build(self, now: DateTime<Utc>) -> WorkItem {
        WorkItem {
            id: WorkItemId::new(),
            kind: self.kind,
            business_location: self.business_location,
            registration_location: self.registration_location,
            status: Status::Unassigned,
            assignee: None,
            due_at: None,
            originator: self.originator,
            zone: self.zone,
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }
}
