//! In-memory ledger for tests and local simulation.
//!
//! Holds every table behind a single mutex. The lock is never held across an
//! await point, so each trait call is atomic the way a single SQL statement
//! is atomic.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{ActiveFlagStore, Store};
use crate::error::{Error, Result};
use crate::model::{
    ActiveFlagRow, AssignmentAttempt, AttemptId, Candidate, Firm, FirmId, JurisdictionId,
    Solicitor, SolicitorId, Status, WorkItem, WorkItemId,
};

#[derive(Default)]
struct Tables {
    work_items: HashMap<WorkItemId, WorkItem>,
    attempts: HashMap<AttemptId, AssignmentAttempt>,
    firms: HashMap<FirmId, Firm>,
    solicitors: HashMap<SolicitorId, Solicitor>,
    /// Number of upcoming conditional writes to fail as if another writer won.
    injected_conflicts: u32,
}

impl Tables {
    fn take_conflict(&mut self) -> bool {
        if self.injected_conflicts > 0 {
            self.injected_conflicts -= 1;
            true
        } else {
            false
        }
    }
}

/// Mutex-guarded in-memory [`Store`].
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn add_firm(&self, firm: Firm) {
        self.tables().firms.insert(firm.id, firm);
    }

    pub fn add_solicitor(&self, solicitor: Solicitor) {
        self.tables().solicitors.insert(solicitor.id, solicitor);
    }

    /// Make the next `n` conditional writes lose their race.
    pub fn inject_conflicts(&self, n: u32) {
        self.tables().injected_conflicts = n;
    }

    /// Overwrite an attempt unconditionally, bumping its version, the way a
    /// concurrent writer outside the engine would.
    pub fn force_attempt(&self, attempt: AssignmentAttempt) {
        let mut tables = self.tables();
        let version = tables
            .attempts
            .get(&attempt.id)
            .map_or(attempt.version, |a| a.version);
        tables.attempts.insert(
            attempt.id,
            AssignmentAttempt {
                version: version + 1,
                ..attempt
            },
        );
    }

    fn sorted(mut attempts: Vec<AssignmentAttempt>) -> Vec<AssignmentAttempt> {
        attempts.sort_by_key(|a| (a.work_item_id, a.rotation_order));
        attempts
    }
}

#[async_trait]
impl ActiveFlagStore for MemoryStore {
    async fn read_active_flags(&self, ids: &[AttemptId]) -> Result<Vec<ActiveFlagRow>> {
        let tables = self.tables();
        Ok(ids
            .iter()
            .filter_map(|id| tables.attempts.get(id))
            .map(ActiveFlagRow::from)
            .collect())
    }

    async fn write_active_flags(
        &self,
        rows: &[ActiveFlagRow],
        target: bool,
    ) -> Result<Vec<AttemptId>> {
        let mut tables = self.tables();
        let mut written = Vec::with_capacity(rows.len());
        for row in rows {
            if let Some(stored) = tables.attempts.get_mut(&row.id)
                && stored.version == row.version
            {
                stored.currently_active = target;
                stored.version += 1;
                written.push(row.id);
            }
        }
        Ok(written)
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get_work_item(&self, id: WorkItemId) -> Result<WorkItem> {
        self.tables()
            .work_items
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("work item {id}")))
    }

    async fn insert_work_item(&self, item: &WorkItem) -> Result<()> {
        let mut tables = self.tables();
        if tables.work_items.contains_key(&item.id) {
            return Err(Error::Other(format!("work item {} already exists", item.id)));
        }
        tables.work_items.insert(item.id, item.clone());
        Ok(())
    }

    async fn cas_work_item(&self, item: &WorkItem) -> Result<bool> {
        let mut tables = self.tables();
        if tables.take_conflict() {
            return Ok(false);
        }
        match tables.work_items.get_mut(&item.id) {
            Some(stored) if stored.version == item.version => {
                stored.status = item.status;
                stored.assignee = item.assignee;
                stored.due_at = item.due_at;
                stored.updated_at = item.updated_at;
                stored.version += 1;
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(Error::NotFound(format!("work item {}", item.id))),
        }
    }

    async fn list_work_items(&self, status: Option<Status>, limit: i64) -> Result<Vec<WorkItem>> {
        let tables = self.tables();
        let mut items: Vec<WorkItem> = tables
            .work_items
            .values()
            .filter(|w| status.is_none_or(|s| w.status == s))
            .cloned()
            .collect();
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        items.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(items)
    }

    async fn list_by_status(&self, status: Status) -> Result<Vec<WorkItem>> {
        let tables = self.tables();
        let mut items: Vec<WorkItem> = tables
            .work_items
            .values()
            .filter(|w| w.status == status)
            .cloned()
            .collect();
        items.sort_by_key(|w| (w.created_at, w.id));
        Ok(items)
    }

    async fn find_candidates(&self, jurisdiction: JurisdictionId) -> Result<Vec<Candidate>> {
        let tables = self.tables();
        Ok(tables
            .solicitors
            .values()
            .filter(|s| s.is_eligible())
            .filter(|s| {
                tables
                    .firms
                    .get(&s.firm_id)
                    .is_some_and(|f| f.jurisdiction == jurisdiction)
            })
            .map(Candidate::from)
            .collect())
    }

    async fn list_attempts(&self, work_item: WorkItemId) -> Result<Vec<AssignmentAttempt>> {
        let tables = self.tables();
        Ok(Self::sorted(
            tables
                .attempts
                .values()
                .filter(|a| a.work_item_id == work_item)
                .cloned()
                .collect(),
        ))
    }

    async fn insert_attempts(&self, attempts: &[AssignmentAttempt]) -> Result<bool> {
        let mut tables = self.tables();
        let mut taken: HashSet<(WorkItemId, u32)> = tables
            .attempts
            .values()
            .map(|a| (a.work_item_id, a.rotation_order))
            .collect();
        if !attempts
            .iter()
            .all(|new| taken.insert((new.work_item_id, new.rotation_order)))
        {
            return Ok(false);
        }
        for attempt in attempts {
            tables.attempts.insert(attempt.id, attempt.clone());
        }
        Ok(true)
    }

    async fn cas_attempt(&self, attempt: &AssignmentAttempt) -> Result<bool> {
        let mut tables = self.tables();
        if tables.take_conflict() {
            return Ok(false);
        }
        match tables.attempts.get_mut(&attempt.id) {
            Some(stored) if stored.version == attempt.version => {
                *stored = AssignmentAttempt {
                    version: attempt.version + 1,
                    ..attempt.clone()
                };
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(Error::NotFound(format!("attempt {}", attempt.id))),
        }
    }

    async fn find_active_attempt(
        &self,
        work_item: WorkItemId,
    ) -> Result<Option<AssignmentAttempt>> {
        let tables = self.tables();
        Ok(tables
            .attempts
            .values()
            .filter(|a| a.work_item_id == work_item && a.currently_active)
            .max_by_key(|a| (a.activated_at, a.rotation_order))
            .cloned())
    }

    async fn list_stale_accepted(&self, cutoff: DateTime<Utc>) -> Result<Vec<AssignmentAttempt>> {
        let tables = self.tables();
        Ok(Self::sorted(
            tables
                .attempts
                .values()
                .filter(|a| a.accepted && a.currently_active && a.scheduled_at <= cutoff)
                .cloned()
                .collect(),
        ))
    }

    async fn list_accepted_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<AssignmentAttempt>> {
        let tables = self.tables();
        Ok(Self::sorted(
            tables
                .attempts
                .values()
                .filter(|a| {
                    a.accepted && a.currently_active && a.scheduled_at > from && a.scheduled_at <= to
                })
                .cloned()
                .collect(),
        ))
    }

    async fn list_reroute_due(&self, cutoff: DateTime<Utc>) -> Result<Vec<AssignmentAttempt>> {
        let tables = self.tables();
        Ok(Self::sorted(
            tables
                .attempts
                .values()
                .filter(|a| !a.accepted && a.currently_active && a.scheduled_at <= cutoff)
                .cloned()
                .collect(),
        ))
    }
}
