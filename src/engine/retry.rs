//! Bounded compare-and-swap retry.
//!
//! A step reads the current ledger state, decides, and writes conditionally.
//! A lost write surfaces as [`Error::ConcurrencyConflict`]; the loop then
//! runs the step again from a fresh read, so a step must treat "already in
//! the state I wanted" as success. After `max_attempts` lost races the
//! conflict is returned to the caller.

use std::future::Future;

use opentelemetry::KeyValue;
use tracing::debug;

use crate::error::{Error, Result};
use crate::telemetry::metrics;

/// The error a step raises when a conditional write loses.
pub(crate) fn lost_race(entity: impl Into<String>) -> Error {
    Error::ConcurrencyConflict {
        entity: entity.into(),
        attempts: 1,
    }
}

pub(crate) async fn retry_on_conflict<T, F, Fut>(max_attempts: u32, mut step: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match step().await {
            Err(Error::ConcurrencyConflict { entity, .. }) => {
                let kind = entity.split_whitespace().next().unwrap_or("unknown").to_string();
                metrics::cas_conflicts().add(1, &[KeyValue::new("entity", kind)]);
                if attempt >= max_attempts {
                    return Err(Error::ConcurrencyConflict {
                        entity,
                        attempts: attempt,
                    });
                }
                debug!(%entity, attempt, "lost compare-and-swap, re-evaluating");
                attempt += 1;
            }
            other => return other,
        }
    }
}
