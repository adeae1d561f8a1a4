//! Metric instrument factories for the rotation engine.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! All instruments are created lazily from the `"solicitor-rotation"` meter.

use opentelemetry::metrics::{Counter, Histogram, Meter};

/// Returns the shared meter for rotation instruments.
fn meter() -> Meter {
    opentelemetry::global::meter("solicitor-rotation")
}

/// Counter: initial activations of work items.
/// Labels: `result` ("assigned" | "no_candidates").
pub fn work_activated() -> Counter<u64> {
    meter()
        .u64_counter("rotation.work.activated")
        .with_description("Work items entering rotation")
        .build()
}

/// Counter: work item status transitions.
/// Labels: `from`, `to`.
pub fn state_transitions() -> Counter<u64> {
    meter()
        .u64_counter("rotation.work.state_transitions")
        .with_description("Number of work item status transitions")
        .build()
}

/// Counter: chain advances.
/// Labels: `trigger` ("rejected" | "timed_out"), `result`.
pub fn rotations() -> Counter<u64> {
    meter()
        .u64_counter("rotation.chain.advances")
        .with_description("Rotation chain advances")
        .build()
}

/// Counter: items visited by periodic scans.
/// Labels: `scan`, `result` ("ok" | "skipped" | "error").
pub fn scan_items() -> Counter<u64> {
    meter()
        .u64_counter("rotation.scan.items")
        .with_description("Items processed by periodic scans")
        .build()
}

/// Counter: notifications handed to the gateway.
/// Labels: `kind`, `result` ("ok" | "error").
pub fn notifications() -> Counter<u64> {
    meter()
        .u64_counter("rotation.notifications")
        .with_description("Notifications dispatched")
        .build()
}

/// Counter: lost compare-and-swap writes.
/// Labels: `entity`.
pub fn cas_conflicts() -> Counter<u64> {
    meter()
        .u64_counter("rotation.cas.conflicts")
        .with_description("Conditional writes that lost a race")
        .build()
}

/// Counter: chains found with more than one active attempt.
pub fn invariant_violations() -> Counter<u64> {
    meter()
        .u64_counter("rotation.invariant.violations")
        .with_description("Data integrity defects detected in rotation chains")
        .build()
}

/// Counter: rows touched by bulk flag updates.
/// Labels: `result` ("updated" | "skipped").
pub fn bulk_rows() -> Counter<u64> {
    meter()
        .u64_counter("rotation.bulk.rows")
        .with_description("Rows processed by bulk flag updates")
        .build()
}

/// Histogram: operation duration in milliseconds.
/// Labels: `operation`.
pub fn operation_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("rotation.operation.duration_ms")
        .with_description("Operation duration in milliseconds")
        .with_unit("ms")
        .build()
}
