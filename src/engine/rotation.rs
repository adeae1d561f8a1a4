//! Rotation scheduler: advances a chain to its next candidate.

use chrono::{DateTime, Utc};
use opentelemetry::KeyValue;
use serde::{Deserialize, Serialize};
use tracing::{Instrument, Span, info};

use super::Chain;
use super::retry::retry_on_conflict;
use crate::error::Result;
use crate::model::{AssignmentAttempt, SolicitorId, Status, WorkItem, WorkItemId};
use crate::notify::{Payload, Recipient};
use crate::telemetry::metrics;
use crate::telemetry::rotation::start_item_span;

/// Why the chain is being advanced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    /// The active solicitor declined. Releases the turn immediately.
    Rejected,
    /// The active solicitor let the response window lapse.
    TimedOut,
}

impl Trigger {
    pub fn as_str(self) -> &'static str {
        match self {
            Trigger::Rejected => "rejected",
            Trigger::TimedOut => "timed_out",
        }
    }
}

/// What a push did.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum PushOutcome {
    /// The next candidate is now active.
    Activated {
        solicitor: SolicitorId,
        rotation_order: u32,
    },
    /// A later attempt was already active; nothing changed.
    AlreadyActive {
        solicitor: SolicitorId,
        rotation_order: u32,
    },
    /// A later candidate exists but its turn has not started yet.
    Waiting {
        rotation_order: u32,
        scheduled_at: DateTime<Utc>,
    },
    /// No candidates left; the item is unassigned.
    Exhausted,
    /// The item is not in rotation (accepted, returned, or terminal).
    NotRotating { status: Status },
}

impl PushOutcome {
    fn label(&self) -> &'static str {
        match self {
            PushOutcome::Activated { .. } => "activated",
            PushOutcome::AlreadyActive { .. } => "already_active",
            PushOutcome::Waiting { .. } => "waiting",
            PushOutcome::Exhausted => "exhausted",
            PushOutcome::NotRotating { .. } => "not_rotating",
        }
    }
}

impl super::Engine {
    /// Advance a work item's chain past `current_order`.
    ///
    /// Picks the smallest pending order greater than `current_order`. A
    /// timed-out push only takes a candidate whose scheduled turn has
    /// arrived; a rejection takes it regardless. Idempotent: repeating the
    /// call with no acceptance in between leaves the same attempt active.
    pub async fn push_to_next(
        &self,
        work_item: WorkItemId,
        current_order: u32,
        trigger: Trigger,
    ) -> Result<PushOutcome> {
        let span = start_item_span("push_to_next", work_item);
        retry_on_conflict(self.config.cas_max_attempts, || {
            self.push_step(work_item, current_order, trigger, &span)
        })
        .instrument(span.clone())
        .await
    }

    pub(crate) async fn push_step(
        &self,
        work_item: WorkItemId,
        current_order: u32,
        trigger: Trigger,
        span: &Span,
    ) -> Result<PushOutcome> {
        let now = self.clock.now();
        let item = self.store.get_work_item(work_item).await?;
        if !matches!(
            item.status,
            Status::AssignedToSolicitor | Status::Rejected | Status::Unassigned
        ) {
            return Ok(PushOutcome::NotRotating {
                status: item.status,
            });
        }

        // Repeated pushes usually find a later turn already running and the
        // item already on it. That needs one row, not the whole chain.
        if let Some(active) = self.store.find_active_attempt(work_item).await?
            && active.rotation_order > current_order
            && item.status == Status::AssignedToSolicitor
            && item.assignee == Some(active.solicitor_id)
        {
            return Ok(PushOutcome::AlreadyActive {
                solicitor: active.solicitor_id,
                rotation_order: active.rotation_order,
            });
        }

        let chain = self.load_chain(work_item).await?;
        if let Some(active) = chain.active()
            && active.rotation_order > current_order
        {
            self.reflect_active(&item, active, span).await?;
            return Ok(PushOutcome::AlreadyActive {
                solicitor: active.solicitor_id,
                rotation_order: active.rotation_order,
            });
        }
        if item.status == Status::Unassigned && chain.active().is_none() {
            return Ok(PushOutcome::Exhausted);
        }

        let Some(next) = chain.pending_after(current_order).first().map(|a| (*a).clone()) else {
            if let Some(active) = chain.active() {
                self.save_attempt(AssignmentAttempt {
                    currently_active: false,
                    ..active.clone()
                })
                .await?;
            }
            if item.status != Status::Unassigned {
                self.save_item(&item, Status::Unassigned, None, None, span)
                    .await?;
            }
            info!(work_item = %work_item, trigger = trigger.as_str(), "rotation exhausted");
            self.send(
                Recipient::Originator {
                    user: item.originator.clone(),
                },
                Payload::NoSolicitorAvailable { work_item },
            )
            .await;
            return Ok(self.count_push(trigger, PushOutcome::Exhausted));
        };

        if trigger == Trigger::TimedOut && next.scheduled_at > now {
            return Ok(self.count_push(
                trigger,
                PushOutcome::Waiting {
                    rotation_order: next.rotation_order,
                    scheduled_at: next.scheduled_at,
                },
            ));
        }

        if let Some(active) = chain.active() {
            self.save_attempt(AssignmentAttempt {
                currently_active: false,
                ..active.clone()
            })
            .await?;
        }
        let activated = self.activate_attempt(&chain, &next, now).await?;
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
            trigger = trigger.as_str(),
            "rotated to next candidate"
        );
        self.notify_assigned(&activated).await;

        Ok(self.count_push(
            trigger,
            PushOutcome::Activated {
                solicitor: activated.solicitor_id,
                rotation_order: activated.rotation_order,
            },
        ))
    }

    /// Finish a rejection left half-done: the item says `Rejected` but the
    /// chain has not moved on.
    pub async fn resume_rejected(&self, work_item: WorkItemId) -> Result<PushOutcome> {
        let span = start_item_span("resume_rejected", work_item);
        let step_span = &span;
        retry_on_conflict(self.config.cas_max_attempts, move || async move {
            let chain = self.load_chain(work_item).await?;
            let order = match chain.active() {
                Some(active) => active.rotation_order,
                None => chain
                    .attempts()
                    .iter()
                    .rev()
                    .find(|a| a.activated_at.is_some())
                    .map_or(0, |a| a.rotation_order),
            };
            self.finish_rejection(work_item, &chain, order, step_span)
                .await
        })
        .instrument(span.clone())
        .await
    }

    /// Deactivate the declined attempt (if it is still active) and push.
    pub(crate) async fn finish_rejection(
        &self,
        work_item: WorkItemId,
        chain: &Chain,
        order: u32,
        span: &Span,
    ) -> Result<PushOutcome> {
        if let Some(attempt) = chain.by_order(order)
            && attempt.currently_active
        {
            self.save_attempt(AssignmentAttempt {
                currently_active: false,
                rejected_at: Some(self.clock.now()),
                ..attempt.clone()
            })
            .await?;
        }
        self.push_step(work_item, order, Trigger::Rejected, span)
            .await
    }

    /// Make `next` the active attempt and re-space the pending tail behind
    /// it so each later candidate is scheduled one response window apart.
    pub(crate) async fn activate_attempt(
        &self,
        chain: &Chain,
        next: &AssignmentAttempt,
        now: DateTime<Utc>,
    ) -> Result<AssignmentAttempt> {
        let activated = self
            .save_attempt(AssignmentAttempt {
                currently_active: true,
                activated_at: Some(now),
                scheduled_at: now,
                ..next.clone()
            })
            .await?;

        let window = self.config.response_window();
        let tail = chain
            .pending()
            .filter(|a| a.rotation_order > next.rotation_order);
        for (k, attempt) in tail.enumerate() {
            let scheduled_at = now + window * (k as i32 + 1);
            if attempt.scheduled_at != scheduled_at {
                self.save_attempt(AssignmentAttempt {
                    scheduled_at,
                    ..attempt.clone()
                })
                .await?;
            }
        }
        Ok(activated)
    }

    /// Bring the item in line with an attempt that is already active.
    pub(crate) async fn reflect_active(
        &self,
        item: &WorkItem,
        active: &AssignmentAttempt,
        span: &Span,
    ) -> Result<()> {
        let in_line = item.status == Status::AssignedToSolicitor
            && item.assignee == Some(active.solicitor_id);
        if in_line || active.accepted {
            return Ok(());
        }
        self.save_item(
            item,
            Status::AssignedToSolicitor,
            Some(active.solicitor_id),
            None,
            span,
        )
        .await?;
        self.notify_assigned(active).await;
        Ok(())
    }

    fn count_push(&self, trigger: Trigger, outcome: PushOutcome) -> PushOutcome {
        metrics::rotations().add(
            1,
            &[
                KeyValue::new("trigger", trigger.as_str()),
                KeyValue::new("result", outcome.label()),
            ],
        );
        outcome
    }
}
