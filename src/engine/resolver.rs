//! Candidate resolution: which solicitors may be offered a work item, and in
//! what order.

use tracing::debug;

use crate::error::Result;
use crate::model::{Candidate, WorkItem};

/// Impose the rotation order on a raw candidate list.
///
/// Storage returns candidates in no guaranteed order, so they are sorted by
/// ascending solicitor id. A solicitor reachable through more than one firm
/// appears once.
pub fn rank_candidates(mut candidates: Vec<Candidate>) -> Vec<Candidate> {
    candidates.sort_by_key(|c| c.solicitor_id);
    candidates.dedup_by_key(|c| c.solicitor_id);
    candidates
}

impl super::Engine {
    /// The ordered eligibility queue for a work item.
    ///
    /// Empty when no firm covers the item's jurisdiction. No side effects.
    pub async fn resolve(&self, item: &WorkItem) -> Result<Vec<Candidate>> {
        let jurisdiction = item.jurisdiction();
        let candidates = rank_candidates(self.store.find_candidates(jurisdiction).await?);
        debug!(
            work_item = %item.id,
            %jurisdiction,
            candidates = candidates.len(),
            "resolved candidates"
        );
        Ok(candidates)
    }
}
