//! The ledger's persistence boundary.
//!
//! The engine depends only on this narrow contract, never on query shape.
//! Writes are compare-and-swap on the row's `version`: the caller passes the
//! row as it wants it stored, carrying the version it read, and the store
//! persists it with `version + 1` only if the stored version still matches.
//! A lost race is `Ok(false)`, not an error.

pub mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::model::{
    ActiveFlagRow, AssignmentAttempt, AttemptId, Candidate, JurisdictionId, Status, WorkItem,
    WorkItemId,
};

/// Row-level access to the `currently_active` flag, used by the bulk updater.
#[async_trait]
pub trait ActiveFlagStore: Send + Sync {
    /// Read the current flag and version of each attempt that still exists.
    async fn read_active_flags(&self, ids: &[AttemptId]) -> Result<Vec<ActiveFlagRow>>;

    /// Set `currently_active = target` on every row whose stored version
    /// still equals the given one. Returns the ids actually written.
    async fn write_active_flags(
        &self,
        rows: &[ActiveFlagRow],
        target: bool,
    ) -> Result<Vec<AttemptId>>;
}

/// Everything the engine reads from or writes to the ledger.
#[async_trait]
pub trait Store: ActiveFlagStore {
    async fn get_work_item(&self, id: WorkItemId) -> Result<WorkItem>;

    async fn insert_work_item(&self, item: &WorkItem) -> Result<()>;

    /// Conditional write of status, assignee and due date.
    async fn cas_work_item(&self, item: &WorkItem) -> Result<bool>;

    /// Most recent first, optionally filtered by status.
    async fn list_work_items(&self, status: Option<Status>, limit: i64) -> Result<Vec<WorkItem>>;

    async fn list_by_status(&self, status: Status) -> Result<Vec<WorkItem>>;

    /// Active, onboarded solicitors of every firm covering `jurisdiction`.
    /// Empty when no firm covers it.
    async fn find_candidates(&self, jurisdiction: JurisdictionId) -> Result<Vec<Candidate>>;

    /// The whole chain of a work item, ordered by rotation order.
    async fn list_attempts(&self, work_item: WorkItemId) -> Result<Vec<AssignmentAttempt>>;

    /// Insert a batch of attempts atomically. Returns `false` (and inserts
    /// nothing) if any `(work_item_id, rotation_order)` already exists.
    async fn insert_attempts(&self, attempts: &[AssignmentAttempt]) -> Result<bool>;

    async fn cas_attempt(&self, attempt: &AssignmentAttempt) -> Result<bool>;

    async fn find_active_attempt(&self, work_item: WorkItemId)
    -> Result<Option<AssignmentAttempt>>;

    /// Accepted, active attempts whose SLA clock started at or before `cutoff`.
    async fn list_stale_accepted(&self, cutoff: DateTime<Utc>) -> Result<Vec<AssignmentAttempt>>;

    /// Accepted, active attempts whose SLA clock started in `(from, to]`.
    async fn list_accepted_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<AssignmentAttempt>>;

    /// Unaccepted, active attempts whose turn started at or before `cutoff`.
    async fn list_reroute_due(&self, cutoff: DateTime<Utc>) -> Result<Vec<AssignmentAttempt>>;
}
