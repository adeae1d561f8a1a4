//! Span helpers for ledger operations and scans.

use tracing::Span;

use crate::model::{Status, WorkItemId};

/// Start a span for an operation on one work item.
///
/// The `work.status` field is declared empty and can be updated via
/// [`record_state_transition`].
pub fn start_item_span(operation: &str, work_item: WorkItemId) -> Span {
    tracing::info_span!(
        "rotation.item",
        "rotation.operation" = operation,
        "work.id" = %work_item,
        "work.status" = tracing::field::Empty,
    )
}

/// Start a span for one run of a periodic scan.
pub fn start_scan_span(scan: &str) -> Span {
    tracing::info_span!(
        "rotation.scan",
        "rotation.scan" = scan,
        "scan.items" = tracing::field::Empty,
        "scan.failed" = tracing::field::Empty,
    )
}

/// Record a status transition on the given span.
pub fn record_state_transition(span: &Span, from: Status, to: Status) {
    span.record("work.status", tracing::field::display(to));
    span.in_scope(|| {
        tracing::info!(%from, %to, "state_transition");
    });
}

/// Record how many items a scan visited and how many failed.
pub fn record_scan_totals(span: &Span, items: usize, failed: usize) {
    span.record("scan.items", items);
    span.record("scan.failed", failed);
}
