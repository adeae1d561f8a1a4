//! Paginated `currently_active` flips.
//!
//! Each page writes only the rows still on the other side of `target`,
//! keyed on their versions, which are either re-read per page or handed in
//! by the caller. A row another writer touched in between keeps that
//! writer's value and is counted as skipped.

use opentelemetry::KeyValue;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::model::{ActiveFlagRow, AttemptId};
use crate::store::ActiveFlagStore;
use crate::telemetry::metrics;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkOutcome {
    /// Rows this call wrote.
    pub updated: u64,
    /// Rows that were gone, already at the target, or lost to a concurrent
    /// writer.
    pub skipped: u64,
    /// Pages committed.
    pub pages: u32,
    /// Stopped before the last page because of cancellation.
    pub cancelled: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct BulkStateUpdater {
    page_size: usize,
}

impl BulkStateUpdater {
    pub fn new(page_size: usize) -> Self {
        Self {
            page_size: page_size.max(1),
        }
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Set `currently_active = target` on `ids`, one page at a time.
    ///
    /// Cancellation is checked between pages. Pages already written stay
    /// written; the next run only finds what is left.
    pub async fn flip_currently_active<S>(
        &self,
        store: &S,
        ids: &[AttemptId],
        target: bool,
        cancel: &CancellationToken,
    ) -> Result<BulkOutcome>
    where
        S: ActiveFlagStore + ?Sized,
    {
        let mut outcome = BulkOutcome::default();
        for page in ids.chunks(self.page_size) {
            if stop_requested(cancel, &mut outcome) {
                break;
            }
            let rows = store.read_active_flags(page).await?;
            commit_page(store, rows, page.len(), target, &mut outcome).await?;
        }
        finished(target, &outcome);
        Ok(outcome)
    }

    /// Like [`flip_currently_active`](Self::flip_currently_active), but keyed
    /// on versions the caller already holds instead of re-reading them.
    ///
    /// A row rewritten since the caller read it keeps the newer value and is
    /// counted as skipped.
    pub async fn flip_rows<S>(
        &self,
        store: &S,
        rows: &[ActiveFlagRow],
        target: bool,
        cancel: &CancellationToken,
    ) -> Result<BulkOutcome>
    where
        S: ActiveFlagStore + ?Sized,
    {
        let mut outcome = BulkOutcome::default();
        for page in rows.chunks(self.page_size) {
            if stop_requested(cancel, &mut outcome) {
                break;
            }
            commit_page(store, page.to_vec(), page.len(), target, &mut outcome).await?;
        }
        finished(target, &outcome);
        Ok(outcome)
    }
}

fn stop_requested(cancel: &CancellationToken, outcome: &mut BulkOutcome) -> bool {
    if !cancel.is_cancelled() {
        return false;
    }
    warn!(
        pages = outcome.pages,
        updated = outcome.updated,
        "bulk flip cancelled"
    );
    outcome.cancelled = true;
    true
}

/// Write the rows of one page that are not yet at `target`.
async fn commit_page<S>(
    store: &S,
    rows: Vec<ActiveFlagRow>,
    page_len: usize,
    target: bool,
    outcome: &mut BulkOutcome,
) -> Result<()>
where
    S: ActiveFlagStore + ?Sized,
{
    let rows: Vec<ActiveFlagRow> = rows
        .into_iter()
        .filter(|row| row.currently_active != target)
        .collect();
    let written = if rows.is_empty() {
        0
    } else {
        store.write_active_flags(&rows, target).await?.len()
    };
    let skipped = page_len - written;

    outcome.pages += 1;
    outcome.updated += written as u64;
    outcome.skipped += skipped as u64;
    metrics::bulk_rows().add(written as u64, &[KeyValue::new("result", "updated")]);
    metrics::bulk_rows().add(skipped as u64, &[KeyValue::new("result", "skipped")]);
    debug!(page = outcome.pages, written, skipped, "bulk page committed");
    Ok(())
}

fn finished(target: bool, outcome: &BulkOutcome) {
    info!(
        target,
        updated = outcome.updated,
        skipped = outcome.skipped,
        pages = outcome.pages,
        "bulk flip finished"
    );
}

impl super::Engine {
    /// Bulk flip against the engine's own ledger, paged per config.
    pub async fn flip_currently_active(
        &self,
        ids: &[AttemptId],
        target: bool,
        cancel: &CancellationToken,
    ) -> Result<BulkOutcome> {
        BulkStateUpdater::new(self.config.bulk_page_size)
            .flip_currently_active(self.store.as_ref(), ids, target, cancel)
            .await
    }

    /// Versioned bulk flip against the engine's own ledger.
    pub async fn flip_rows(
        &self,
        rows: &[ActiveFlagRow],
        target: bool,
        cancel: &CancellationToken,
    ) -> Result<BulkOutcome> {
        BulkStateUpdater::new(self.config.bulk_page_size)
            .flip_rows(self.store.as_ref(), rows, target, cancel)
            .await
    }
}
