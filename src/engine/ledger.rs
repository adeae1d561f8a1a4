//! Assignment state machine.
//!
//! Each public operation runs as a retried step: read the item and its
//! chain, decide, then write conditionally. Steps are written so that a
//! re-run after a lost race, or after a crash between two writes, picks up
//! from whatever was already persisted.

use opentelemetry::KeyValue;
use serde::{Deserialize, Serialize};
use tracing::{Instrument, Span, info};

use super::retry::{lost_race, retry_on_conflict};
use super::rotation::PushOutcome;
use crate::error::{Error, Result};
use crate::model::{AssignmentAttempt, NewWorkItem, SolicitorId, Status, WorkItem, WorkItemId};
use crate::notify::{Payload, Recipient};
use crate::telemetry::metrics;
use crate::telemetry::rotation::start_item_span;

/// Result of putting a work item into rotation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ActivationOutcome {
    Assigned {
        solicitor: SolicitorId,
        rotation_order: u32,
    },
    /// Nobody covers the jurisdiction. The item stays unassigned.
    NoCandidates,
}

impl super::Engine {
    /// Record a new work item and put it into rotation.
    pub async fn create(&self, new: NewWorkItem) -> Result<(WorkItem, ActivationOutcome)> {
        let item = new.build(self.clock.now());
        self.store.insert_work_item(&item).await?;
        info!(work_item = %item.id, kind = %item.kind, "work item created");
        let outcome = self.activate(item.id).await?;
        let item = self.store.get_work_item(item.id).await?;
        Ok((item, outcome))
    }

    /// Build the rotation chain for an unassigned item and activate its
    /// first candidate.
    ///
    /// A fresh chain segment is appended after the highest existing order,
    /// so restarting an exhausted rotation never reuses an order. Solicitors
    /// who already rejected the item are left out of it. Pending
    /// attempts left by an interrupted activation are reused instead of
    /// resolving again.
    pub async fn activate(&self, work_item: WorkItemId) -> Result<ActivationOutcome> {
        let span = start_item_span("activate", work_item);
        retry_on_conflict(self.config.cas_max_attempts, || {
            self.activate_step(work_item, &span)
        })
        .instrument(span.clone())
        .await
    }

    async fn activate_step(&self, work_item: WorkItemId, span: &Span) -> Result<ActivationOutcome> {
        let now = self.clock.now();
        let item = self.store.get_work_item(work_item).await?;
        if !matches!(
            item.status,
            Status::Unassigned | Status::AssignedToSolicitor
        ) {
            return Err(Error::InvalidTransition {
                from: item.status,
                to: Status::AssignedToSolicitor,
            });
        }

        let mut chain = self.load_chain(work_item).await?;
        if let Some(active) = chain.active() {
            self.reflect_active(&item, active, span).await?;
            return Ok(ActivationOutcome::Assigned {
                solicitor: active.solicitor_id,
                rotation_order: active.rotation_order,
            });
        }

        if chain.pending().next().is_none() {
            // Anyone who already declined this item is not asked again.
            let candidates: Vec<_> = self
                .resolve(&item)
                .await?
                .into_iter()
                .filter(|c| chain.last_rejected_by(c.solicitor_id).is_none())
                .collect();
            if candidates.is_empty() {
                if item.status != Status::Unassigned {
                    self.save_item(&item, Status::Unassigned, None, None, span)
                        .await?;
                }
                info!(work_item = %work_item, jurisdiction = %item.jurisdiction(), "no candidates");
                metrics::work_activated().add(1, &[KeyValue::new("result", "no_candidates")]);
                self.send(
                    Recipient::Originator {
                        user: item.originator.clone(),
                    },
                    Payload::NoSolicitorAvailable { work_item },
                )
                .await;
                return Ok(ActivationOutcome::NoCandidates);
            }

            let base = chain.max_order();
            let window = self.config.response_window();
            let segment: Vec<AssignmentAttempt> = candidates
                .iter()
                .enumerate()
                .map(|(k, candidate)| {
                    AssignmentAttempt::new(
                        work_item,
                        candidate,
                        base + k as u32 + 1,
                        now + window * k as i32,
                        now,
                    )
                })
                .collect();
            if !self.store.insert_attempts(&segment).await? {
                return Err(lost_race(format!("chain {work_item}")));
            }
            chain = self.load_chain(work_item).await?;
        }

        let first = chain
            .pending()
            .next()
            .cloned()
            .ok_or_else(|| Error::InvariantViolation(format!("chain {work_item} lost its segment")))?;
        let activated = self.activate_attempt(&chain, &first, now).await?;
        self.save_item(
            &item,
            Status::AssignedToSolicitor,
            Some(activated.solicitor_id),
            None,
            span,
        )
        .await?;
        info!(
            work_item = %work_item,
            solicitor = %activated.solicitor_id,
            rotation_order = activated.rotation_order,
            "work item activated"
        );
        metrics::work_activated().add(1, &[KeyValue::new("result", "assigned")]);
        self.notify_assigned(&activated).await;

        Ok(ActivationOutcome::Assigned {
            solicitor: activated.solicitor_id,
            rotation_order: activated.rotation_order,
        })
    }

    /// The active solicitor takes the work. Starts the SLA clock.
    pub async fn accept(&self, work_item: WorkItemId, solicitor: SolicitorId) -> Result<WorkItem> {
        let span = start_item_span("accept", work_item);
        retry_on_conflict(self.config.cas_max_attempts, || {
            self.accept_step(work_item, solicitor, &span)
        })
        .instrument(span.clone())
        .await
    }

    async fn accept_step(
        &self,
        work_item: WorkItemId,
        solicitor: SolicitorId,
        span: &Span,
    ) -> Result<WorkItem> {
        let now = self.clock.now();
        let item = self.store.get_work_item(work_item).await?;
        let chain = self.load_chain(work_item).await?;
        let active = chain
            .active()
            .filter(|a| a.solicitor_id == solicitor)
            .cloned()
            .ok_or(Error::NotCurrentAssignee {
                work_item,
                solicitor,
            })?;

        let active = if active.accepted {
            active
        } else {
            if item.status != Status::AssignedToSolicitor {
                return Err(Error::InvalidTransition {
                    from: item.status,
                    to: Status::Accepted,
                });
            }
            self.save_attempt(AssignmentAttempt {
                accepted: true,
                accepted_at: Some(now),
                scheduled_at: now,
                ..active
            })
            .await?
        };

        let due_at = active.scheduled_at + self.config.sla_window();
        let item = self
            .save_item(&item, Status::Accepted, Some(solicitor), Some(due_at), span)
            .await?;
        info!(work_item = %work_item, solicitor = %solicitor, %due_at, "work item accepted");
        Ok(item)
    }

    /// The active solicitor declines. The chain moves to the next candidate,
    /// or the item becomes unassigned when none is left.
    pub async fn reject(&self, work_item: WorkItemId, solicitor: SolicitorId) -> Result<PushOutcome> {
        let span = start_item_span("reject", work_item);
        retry_on_conflict(self.config.cas_max_attempts, || {
            self.reject_step(work_item, solicitor, &span)
        })
        .instrument(span.clone())
        .await
    }

    async fn reject_step(
        &self,
        work_item: WorkItemId,
        solicitor: SolicitorId,
        span: &Span,
    ) -> Result<PushOutcome> {
        let item = self.store.get_work_item(work_item).await?;
        let chain = self.load_chain(work_item).await?;
        let not_assignee = Error::NotCurrentAssignee {
            work_item,
            solicitor,
        };
        let active = chain.active().filter(|a| a.solicitor_id == solicitor);

        let order = match item.status {
            Status::AssignedToSolicitor => {
                let active = active.ok_or(not_assignee)?;
                if active.accepted {
                    return Err(Error::InvalidTransition {
                        from: Status::Accepted,
                        to: Status::Rejected,
                    });
                }
                self.save_item(&item, Status::Rejected, None, None, span)
                    .await?;
                info!(work_item = %work_item, solicitor = %solicitor, "work item rejected");
                active.rotation_order
            }
            // A previous run got as far as the item write.
            // Only the solicitor who started the rejection may finish it.
            Status::Rejected => match active {
                Some(active) => active.rotation_order,
                None if chain.active().is_some() => return Err(not_assignee),
                None => chain
                    .last_rejected_by(solicitor)
                    .map(|a| a.rotation_order)
                    .ok_or(not_assignee)?,
            },
            other if active.is_some() => {
                return Err(Error::InvalidTransition {
                    from: other,
                    to: Status::Rejected,
                });
            }
            _ => return Err(not_assignee),
        };

        self.finish_rejection(work_item, &chain, order, span).await
    }

    /// The accepted solicitor finished the search.
    pub async fn complete(&self, work_item: WorkItemId, solicitor: SolicitorId) -> Result<WorkItem> {
        let span = start_item_span("complete", work_item);
        retry_on_conflict(self.config.cas_max_attempts, || {
            self.complete_step(work_item, solicitor, &span)
        })
        .instrument(span.clone())
        .await
    }

    async fn complete_step(
        &self,
        work_item: WorkItemId,
        solicitor: SolicitorId,
        span: &Span,
    ) -> Result<WorkItem> {
        let item = self.store.get_work_item(work_item).await?;
        let chain = self.load_chain(work_item).await?;
        let active = chain
            .active()
            .filter(|a| a.solicitor_id == solicitor && a.accepted)
            .cloned();

        let item = match (item.status, active.is_some()) {
            (Status::Accepted, true) => {
                self.save_item(&item, Status::Completed, item.assignee, item.due_at, span)
                    .await?
            }
            (Status::Completed, true) => item,
            (Status::Accepted, false) => {
                return Err(Error::NotCurrentAssignee {
                    work_item,
                    solicitor,
                });
            }
            (other, _) => {
                return Err(Error::InvalidTransition {
                    from: other,
                    to: Status::Completed,
                });
            }
        };
        if let Some(active) = active {
            self.save_attempt(AssignmentAttempt {
                currently_active: false,
                ..active
            })
            .await?;
        }
        info!(work_item = %work_item, solicitor = %solicitor, "work item completed");
        Ok(item)
    }

    /// Hand accepted work back to the originator. The solicitor stays on
    /// the item; no attempt is created or reordered.
    pub async fn return_to_originator(&self, work_item: WorkItemId) -> Result<WorkItem> {
        let span = start_item_span("return_to_originator", work_item);
        retry_on_conflict(self.config.cas_max_attempts, || {
            self.return_step(work_item, &span)
        })
        .instrument(span.clone())
        .await
    }

    async fn return_step(&self, work_item: WorkItemId, span: &Span) -> Result<WorkItem> {
        let item = self.store.get_work_item(work_item).await?;
        let chain = self.load_chain(work_item).await?;
        let active = chain.active().cloned();

        let item = match item.status {
            Status::Accepted => {
                let item = self
                    .save_item(&item, Status::ReturnedToOriginator, item.assignee, None, span)
                    .await?;
                self.send(
                    Recipient::Originator {
                        user: item.originator.clone(),
                    },
                    Payload::Returned { work_item },
                )
                .await;
                item
            }
            Status::ReturnedToOriginator if active.is_some() => item,
            other => {
                return Err(Error::InvalidTransition {
                    from: other,
                    to: Status::ReturnedToOriginator,
                });
            }
        };
        if let Some(active) = active {
            self.save_attempt(AssignmentAttempt {
                currently_active: false,
                ..active
            })
            .await?;
        }
        info!(work_item = %work_item, "work item returned to originator");
        Ok(item)
    }

    /// The originator sends returned work back to the same solicitor, who
    /// must accept it again.
    pub async fn resubmit(&self, work_item: WorkItemId) -> Result<WorkItem> {
        let span = start_item_span("resubmit", work_item);
        retry_on_conflict(self.config.cas_max_attempts, || {
            self.resubmit_step(work_item, &span)
        })
        .instrument(span.clone())
        .await
    }

    async fn resubmit_step(&self, work_item: WorkItemId, span: &Span) -> Result<WorkItem> {
        let now = self.clock.now();
        let item = self.store.get_work_item(work_item).await?;
        if item.status != Status::ReturnedToOriginator {
            return Err(Error::InvalidTransition {
                from: item.status,
                to: Status::AssignedToSolicitor,
            });
        }
        let solicitor = item.assignee.ok_or_else(|| {
            Error::InvariantViolation(format!("returned work item {work_item} has no assignee"))
        })?;
        let chain = self.load_chain(work_item).await?;
        let attempt = chain.last_accepted_by(solicitor).cloned().ok_or_else(|| {
            Error::InvariantViolation(format!(
                "returned work item {work_item} has no accepted attempt for {solicitor}"
            ))
        })?;

        let attempt = if attempt.currently_active && !attempt.accepted {
            attempt
        } else {
            if let Some(other) = chain.active().filter(|a| a.id != attempt.id) {
                self.save_attempt(AssignmentAttempt {
                    currently_active: false,
                    ..other.clone()
                })
                .await?;
            }
            self.save_attempt(AssignmentAttempt {
                accepted: false,
                currently_active: true,
                activated_at: Some(now),
                scheduled_at: now,
                ..attempt
            })
            .await?
        };

        let item = self
            .save_item(&item, Status::AssignedToSolicitor, Some(solicitor), None, span)
            .await?;
        info!(work_item = %work_item, solicitor = %solicitor, "work item resubmitted");
        self.notify_assigned(&attempt).await;
        Ok(item)
    }

    /// Withdraw a work item. Cancelling twice is a no-op.
    pub async fn cancel(&self, work_item: WorkItemId) -> Result<WorkItem> {
        let span = start_item_span("cancel", work_item);
        retry_on_conflict(self.config.cas_max_attempts, || {
            self.cancel_step(work_item, &span)
        })
        .instrument(span.clone())
        .await
    }

    async fn cancel_step(&self, work_item: WorkItemId, span: &Span) -> Result<WorkItem> {
        let item = self.store.get_work_item(work_item).await?;
        let chain = self.load_chain(work_item).await?;
        let item = if item.status == Status::Cancelled {
            item
        } else {
            self.save_item(&item, Status::Cancelled, None, None, span)
                .await?
        };
        if let Some(active) = chain.active() {
            self.save_attempt(AssignmentAttempt {
                currently_active: false,
                ..active.clone()
            })
            .await?;
        }
        info!(work_item = %work_item, "work item cancelled");
        Ok(item)
    }
}
