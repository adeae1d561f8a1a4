//! A work item's rotation chain as loaded from the ledger.

use crate::error::{Error, Result};
use crate::model::{AssignmentAttempt, SolicitorId, WorkItemId};

/// The attempts of one work item, sorted by rotation order.
#[derive(Debug, Clone, Default)]
pub struct Chain {
    attempts: Vec<AssignmentAttempt>,
}

impl Chain {
    /// Wrap a loaded chain, checking that orders are strictly increasing.
    pub fn new(work_item: WorkItemId, mut attempts: Vec<AssignmentAttempt>) -> Result<Self> {
        attempts.sort_by_key(|a| a.rotation_order);
        if let Some(pair) = attempts
            .windows(2)
            .find(|w| w[0].rotation_order == w[1].rotation_order)
        {
            return Err(Error::InvariantViolation(format!(
                "work item {work_item} has duplicate rotation order {}",
                pair[0].rotation_order
            )));
        }
        if let Some(stray) = attempts.iter().find(|a| a.work_item_id != work_item) {
            return Err(Error::InvariantViolation(format!(
                "attempt {} does not belong to work item {work_item}",
                stray.id
            )));
        }
        Ok(Self { attempts })
    }

    pub fn attempts(&self) -> &[AssignmentAttempt] {
        &self.attempts
    }

    pub fn active_count(&self) -> usize {
        self.attempts.iter().filter(|a| a.currently_active).count()
    }

    /// The attempt whose turn it is. When more than one is flagged active the
    /// most recently activated wins.
    pub fn active(&self) -> Option<&AssignmentAttempt> {
        self.attempts
            .iter()
            .filter(|a| a.currently_active)
            .max_by_key(|a| (a.activated_at, a.rotation_order))
    }

    /// Active attempts other than [`Chain::active`].
    pub fn surplus_active(&self) -> Vec<&AssignmentAttempt> {
        let keep = self.active().map(|a| a.id);
        self.attempts
            .iter()
            .filter(|a| a.currently_active && Some(a.id) != keep)
            .collect()
    }

    pub fn by_order(&self, order: u32) -> Option<&AssignmentAttempt> {
        self.attempts.iter().find(|a| a.rotation_order == order)
    }

    pub fn max_order(&self) -> u32 {
        self.attempts.last().map_or(0, |a| a.rotation_order)
    }

    /// Attempts that were never activated or answered, in order.
    pub fn pending(&self) -> impl Iterator<Item = &AssignmentAttempt> {
        self.attempts
            .iter()
            .filter(|a| a.is_open() && a.activated_at.is_none())
    }

    /// Pending attempts strictly after `order`.
    pub fn pending_after(&self, order: u32) -> Vec<&AssignmentAttempt> {
        self.pending().filter(|a| a.rotation_order > order).collect()
    }

    /// The most recent attempt the solicitor declined.
    pub fn last_rejected_by(&self, solicitor: SolicitorId) -> Option<&AssignmentAttempt> {
        self.attempts
            .iter()
            .rev()
            .find(|a| a.solicitor_id == solicitor && a.rejected_at.is_some())
    }

    /// The most recent attempt the solicitor accepted at some point.
    pub fn last_accepted_by(&self, solicitor: SolicitorId) -> Option<&AssignmentAttempt> {
        self.attempts
            .iter()
            .rev()
            .find(|a| a.solicitor_id == solicitor && a.accepted_at.is_some())
    }
}
