//! SLA monitor: the periodic scans driven by `Tick`.
//!
//! Each scan lists its candidates once, then handles them one at a time.
//! A failure on one item is logged and counted; the scan moves on. Nothing
//! here holds a lock across items, so several instances can scan the same
//! ledger and the compare-and-swap writes sort out who wins.

use chrono::{DateTime, Utc};
use opentelemetry::KeyValue;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span, debug, error, info, warn};

use super::retry::retry_on_conflict;
use super::rotation::{PushOutcome, Trigger};
use crate::error::Result;
use crate::model::{ActiveFlagRow, AssignmentAttempt, Status};
use crate::notify::{Payload, Recipient};
use crate::telemetry::metrics;
use crate::telemetry::rotation::{record_scan_totals, start_scan_span};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanKind {
    /// Accepted work past its SLA goes back to the originator.
    StaleAccepted,
    /// Accepted work past the reminder threshold nudges the solicitor.
    UnattendedReminder,
    /// Unanswered turns past the response window move the chain on.
    Reroute,
    /// Items stranded in `Rejected` get their push finished.
    RejectedRecovery,
}

impl ScanKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ScanKind::StaleAccepted => "stale_accepted",
            ScanKind::UnattendedReminder => "unattended_reminder",
            ScanKind::Reroute => "reroute",
            ScanKind::RejectedRecovery => "rejected_recovery",
        }
    }
}

/// Totals for one run of one scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanReport {
    pub kind: ScanKind,
    /// Rows the listing query returned.
    pub visited: usize,
    /// Rows that led to a state change or a notification.
    pub acted: usize,
    /// Rows that turned out to need nothing.
    pub skipped: usize,
    /// Rows (or the listing itself) that errored.
    pub failed: usize,
    /// `currently_active` flags cleared by the bulk updater.
    pub flags_cleared: u64,
}

impl ScanReport {
    fn new(kind: ScanKind) -> Self {
        Self {
            kind,
            visited: 0,
            acted: 0,
            skipped: 0,
            failed: 0,
            flags_cleared: 0,
        }
    }

    fn count(&mut self, result: Result<bool>, what: &str) {
        let label = match result {
            Ok(true) => {
                self.acted += 1;
                "ok"
            }
            Ok(false) => {
                self.skipped += 1;
                "skipped"
            }
            Err(e) => {
                self.failed += 1;
                warn!(scan = self.kind.as_str(), item = what, error = %e, "scan item failed");
                "error"
            }
        };
        metrics::scan_items().add(
            1,
            &[
                KeyValue::new("scan", self.kind.as_str()),
                KeyValue::new("result", label),
            ],
        );
    }

    fn listing_failed(&mut self, e: &crate::error::Error) {
        self.failed += 1;
        error!(scan = self.kind.as_str(), error = %e, "scan listing failed");
    }
}

/// Everything one tick did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickReport {
    pub now: DateTime<Utc>,
    pub scans: Vec<ScanReport>,
    /// Set when the tick stopped early on shutdown.
    pub cancelled: bool,
}

impl TickReport {
    pub fn scan(&self, kind: ScanKind) -> Option<&ScanReport> {
        self.scans.iter().find(|s| s.kind == kind)
    }

    pub fn failed(&self) -> usize {
        self.scans.iter().map(|s| s.failed).sum()
    }
}

impl super::Engine {
    /// Run every scan once, as of `now`.
    ///
    /// Stale escalation runs first so that work it hands back is not also
    /// reminded about in the same tick.
    pub async fn tick(&self, now: DateTime<Utc>, cancel: &CancellationToken) -> TickReport {
        let mut report = TickReport {
            now,
            scans: Vec::with_capacity(4),
            cancelled: false,
        };
        for kind in [
            ScanKind::StaleAccepted,
            ScanKind::UnattendedReminder,
            ScanKind::Reroute,
            ScanKind::RejectedRecovery,
        ] {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }
            let scan = match kind {
                ScanKind::StaleAccepted => self.stale_accepted_scan(now, cancel).await,
                ScanKind::UnattendedReminder => self.unattended_reminder_scan(now).await,
                ScanKind::Reroute => self.reroute_scan(now).await,
                ScanKind::RejectedRecovery => self.rejected_recovery_scan(now).await,
            };
            report.scans.push(scan);
        }
        info!(
            %now,
            failed = report.failed(),
            cancelled = report.cancelled,
            "tick finished"
        );
        report
    }

    /// Hand back accepted work whose SLA window has run out.
    ///
    /// The item moves to `ReturnedToOriginator` and the originator and the
    /// zone's oversight role are told. The stale attempts are then cleared
    /// in bulk at the versions this scan listed, which also keeps a later
    /// run from seeing them again.
    pub async fn stale_accepted_scan(
        &self,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> ScanReport {
        let span = start_scan_span(ScanKind::StaleAccepted.as_str());
        let mut report = ScanReport::new(ScanKind::StaleAccepted);
        async {
            let cutoff = now - self.config.sla_window();
            let attempts = match self.store.list_stale_accepted(cutoff).await {
                Ok(attempts) => attempts,
                Err(e) => {
                    report.listing_failed(&e);
                    return;
                }
            };
            // Versions as listed: a row rewritten since then is not ours to clear.
            let mut clear: Vec<ActiveFlagRow> = Vec::with_capacity(attempts.len());
            for attempt in &attempts {
                report.visited += 1;
                let result = self.escalate_stale(attempt).await;
                if result.is_ok() {
                    clear.push(ActiveFlagRow::from(attempt));
                }
                report.count(result, &attempt.work_item_id.to_string());
            }
            if clear.is_empty() {
                return;
            }
            match self.flip_rows(&clear, false, cancel).await {
                Ok(outcome) => report.flags_cleared = outcome.updated,
                Err(e) => {
                    report.failed += 1;
                    error!(error = %e, rows = clear.len(), "clearing stale attempts failed");
                }
            }
        }
        .instrument(span.clone())
        .await;
        record_scan_totals(&span, report.visited, report.failed);
        report
    }

    /// Returns `true` if this call escalated the item.
    async fn escalate_stale(&self, attempt: &AssignmentAttempt) -> Result<bool> {
        let span = Span::current();
        retry_on_conflict(self.config.cas_max_attempts, || {
            self.escalate_step(attempt, &span)
        })
        .await
    }

    async fn escalate_step(&self, attempt: &AssignmentAttempt, span: &Span) -> Result<bool> {
        let item = self.store.get_work_item(attempt.work_item_id).await?;
        if item.status != Status::Accepted || item.assignee != Some(attempt.solicitor_id) {
            debug!(work_item = %item.id, status = %item.status, "stale attempt already handled");
            return Ok(false);
        }
        let item = self
            .save_item(&item, Status::ReturnedToOriginator, item.assignee, None, span)
            .await?;
        info!(
            work_item = %item.id,
            solicitor = %attempt.solicitor_id,
            zone = %item.zone,
            "SLA breached, returned to originator"
        );
        let breach = Payload::SlaBreached {
            work_item: item.id,
            solicitor: attempt.solicitor_id,
        };
        self.send(
            Recipient::Originator {
                user: item.originator.clone(),
            },
            breach.clone(),
        )
        .await;
        self.send(
            Recipient::ZonalOversight {
                zone: item.zone.clone(),
            },
            breach,
        )
        .await;
        Ok(true)
    }

    /// Remind solicitors about accepted work that is still open.
    ///
    /// The window is acceptances between `sla_window` and `reminder_after`
    /// ago. Within one process each attempt is reminded once: later runs
    /// only look at acceptances that crossed the threshold since the last
    /// run.
    pub async fn unattended_reminder_scan(&self, now: DateTime<Utc>) -> ScanReport {
        let span = start_scan_span(ScanKind::UnattendedReminder.as_str());
        let mut report = ScanReport::new(ScanKind::UnattendedReminder);
        async {
            let to = now - self.config.reminder_after();
            let mut from = now - self.config.sla_window();
            let previous = self.advance_reminder_mark(to);
            if let Some(previous) = previous
                && previous > from
            {
                from = previous;
            }
            if from >= to {
                return;
            }
            let attempts = match self.store.list_accepted_between(from, to).await {
                Ok(attempts) => attempts,
                Err(e) => {
                    report.listing_failed(&e);
                    self.rewind_reminder_mark(previous);
                    return;
                }
            };
            for attempt in &attempts {
                report.visited += 1;
                let result = self.remind(attempt).await;
                report.count(result, &attempt.work_item_id.to_string());
            }
        }
        .instrument(span.clone())
        .await;
        record_scan_totals(&span, report.visited, report.failed);
        report
    }

    async fn remind(&self, attempt: &AssignmentAttempt) -> Result<bool> {
        let item = self.store.get_work_item(attempt.work_item_id).await?;
        if item.status != Status::Accepted || item.assignee != Some(attempt.solicitor_id) {
            return Ok(false);
        }
        self.send(
            Recipient::Solicitor {
                id: attempt.solicitor_id,
                address: attempt.solicitor_address.clone(),
            },
            Payload::Reminder {
                work_item: item.id,
                due_at: item.due_at,
            },
        )
        .await;
        Ok(true)
    }

    /// Move the chain on for every turn left unanswered past the response
    /// window plus grace.
    pub async fn reroute_scan(&self, now: DateTime<Utc>) -> ScanReport {
        let span = start_scan_span(ScanKind::Reroute.as_str());
        let mut report = ScanReport::new(ScanKind::Reroute);
        async {
            let cutoff = now - self.config.response_window() - self.config.reroute_grace();
            let attempts = match self.store.list_reroute_due(cutoff).await {
                Ok(attempts) => attempts,
                Err(e) => {
                    report.listing_failed(&e);
                    return;
                }
            };
            for attempt in &attempts {
                report.visited += 1;
                let result = self
                    .push_to_next(attempt.work_item_id, attempt.rotation_order, Trigger::TimedOut)
                    .await
                    .map(|outcome| {
                        matches!(
                            outcome,
                            PushOutcome::Activated { .. } | PushOutcome::Exhausted
                        )
                    });
                report.count(result, &attempt.work_item_id.to_string());
            }
        }
        .instrument(span.clone())
        .await;
        record_scan_totals(&span, report.visited, report.failed);
        report
    }

    /// Finish rejections that stopped between the status write and the push.
    pub async fn rejected_recovery_scan(&self, now: DateTime<Utc>) -> ScanReport {
        let span = start_scan_span(ScanKind::RejectedRecovery.as_str());
        let mut report = ScanReport::new(ScanKind::RejectedRecovery);
        async {
            let settled = now - self.config.reroute_grace();
            let items = match self.store.list_by_status(Status::Rejected).await {
                Ok(items) => items,
                Err(e) => {
                    report.listing_failed(&e);
                    return;
                }
            };
            for item in items.iter().filter(|i| i.updated_at <= settled) {
                report.visited += 1;
                let result = self
                    .resume_rejected(item.id)
                    .await
                    .map(|outcome| !matches!(outcome, PushOutcome::NotRotating { .. }));
                report.count(result, &item.id.to_string());
            }
        }
        .instrument(span.clone())
        .await;
        record_scan_totals(&span, report.visited, report.failed);
        report
    }
}
