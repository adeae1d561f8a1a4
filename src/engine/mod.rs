//! The rotation engine.
//!
//! [`Engine`] owns the ledger handle, the clock and the notification
//! gateway. Every status change and chain mutation goes through it. The
//! operations are split across submodules the same way the concerns are:
//! candidate resolution, the assignment state machine, the rotation
//! scheduler, the periodic scans and the bulk flag updater.

pub mod bulk;
pub mod chain;
pub mod control;
pub mod ledger;
pub mod resolver;
pub mod rotation;
pub mod scans;

mod retry;

pub use bulk::{BulkOutcome, BulkStateUpdater};
pub use chain::Chain;
pub use control::{CommandSender, ControlPlane};
pub use ledger::ActivationOutcome;
pub use resolver::rank_candidates;
pub use rotation::{PushOutcome, Trigger};
pub use scans::{ScanKind, ScanReport, TickReport};

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use opentelemetry::KeyValue;
use tokio_util::sync::CancellationToken;
use tracing::{Span, error, warn};

use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::event::{Command, CommandOutcome};
use crate::model::{AssignmentAttempt, SolicitorId, Status, WorkItem, WorkItemId};
use crate::notify::{NotificationGateway, Payload, Recipient};
use crate::store::Store;
use crate::telemetry::metrics;
use crate::telemetry::rotation::record_state_transition;

use retry::lost_race;

/// The solicitor assignment and SLA rotation engine.
pub struct Engine {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    notifier: Arc<dyn NotificationGateway>,
    config: EngineConfig,
    /// Upper bound of the acceptance window the last reminder scan covered.
    reminder_mark: Mutex<Option<DateTime<Utc>>>,
}

impl Engine {
    pub fn new(
        store: Arc<dyn Store>,
        clock: Arc<dyn Clock>,
        notifier: Arc<dyn NotificationGateway>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            clock,
            notifier,
            config,
            reminder_mark: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Dispatch one inbound command.
    pub async fn handle(
        &self,
        command: Command,
        cancel: &CancellationToken,
    ) -> Result<CommandOutcome> {
        match command {
            Command::WorkItemCreated { work_item } | Command::RotationRestart { work_item } => {
                self.activate(work_item).await.map(CommandOutcome::Activated)
            }
            Command::SolicitorAccepted {
                work_item,
                solicitor,
            } => {
                let item = self.accept(work_item, solicitor).await?;
                Ok(CommandOutcome::Accepted { due_at: item.due_at })
            }
            Command::SolicitorRejected {
                work_item,
                solicitor,
            } => self
                .reject(work_item, solicitor)
                .await
                .map(CommandOutcome::Rotated),
            Command::SolicitorCompleted {
                work_item,
                solicitor,
            } => {
                self.complete(work_item, solicitor).await?;
                Ok(CommandOutcome::Completed)
            }
            Command::ReturnToOriginator { work_item } => {
                self.return_to_originator(work_item).await?;
                Ok(CommandOutcome::Returned)
            }
            Command::OriginatorResubmitted { work_item } => {
                self.resubmit(work_item).await?;
                Ok(CommandOutcome::Resubmitted)
            }
            Command::ManualCancel { work_item } => {
                self.cancel(work_item).await?;
                Ok(CommandOutcome::Cancelled)
            }
            Command::Tick { now } => {
                let now = now.unwrap_or_else(|| self.clock.now());
                Ok(CommandOutcome::Ticked(self.tick(now, cancel).await))
            }
        }
    }

    fn reminder_mark(&self) -> std::sync::MutexGuard<'_, Option<DateTime<Utc>>> {
        self.reminder_mark.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Move the reminder mark to `to`, returning where it was.
    pub(crate) fn advance_reminder_mark(&self, to: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.reminder_mark().replace(to)
    }

    pub(crate) fn rewind_reminder_mark(&self, previous: Option<DateTime<Utc>>) {
        *self.reminder_mark() = previous;
    }

    /// Load a chain, repairing it if more than one attempt is flagged active.
    ///
    /// Repair keeps the most recently activated attempt and deactivates the
    /// rest. A lost write during repair is a conflict like any other.
    pub(crate) async fn load_chain(&self, work_item: WorkItemId) -> Result<Chain> {
        let chain = Chain::new(work_item, self.store.list_attempts(work_item).await?)?;
        if chain.active_count() <= 1 {
            return Ok(chain);
        }

        metrics::invariant_violations().add(1, &[]);
        let keep = chain.active().map(|a| a.rotation_order);
        error!(
            work_item = %work_item,
            active = chain.active_count(),
            keep = ?keep,
            "invariant violation: multiple active attempts, repairing"
        );
        for surplus in chain.surplus_active() {
            self.save_attempt(AssignmentAttempt {
                currently_active: false,
                ..surplus.clone()
            })
            .await?;
        }
        Chain::new(work_item, self.store.list_attempts(work_item).await?)
    }

    /// Conditionally write a new status, assignee and due date.
    pub(crate) async fn save_item(
        &self,
        item: &WorkItem,
        to: Status,
        assignee: Option<SolicitorId>,
        due_at: Option<DateTime<Utc>>,
        span: &Span,
    ) -> Result<WorkItem> {
        if !item.status.can_transition_to(to) {
            return Err(Error::InvalidTransition {
                from: item.status,
                to,
            });
        }
        let next = WorkItem {
            status: to,
            assignee,
            due_at,
            updated_at: self.clock.now(),
            ..item.clone()
        };
        if !self.store.cas_work_item(&next).await? {
            return Err(lost_race(format!("work_item {}", item.id)));
        }
        metrics::state_transitions().add(
            1,
            &[
                KeyValue::new("from", item.status.to_string()),
                KeyValue::new("to", to.to_string()),
            ],
        );
        record_state_transition(span, item.status, to);
        Ok(WorkItem {
            version: item.version + 1,
            ..next
        })
    }

    /// Conditionally write an attempt as given.
    pub(crate) async fn save_attempt(
        &self,
        attempt: AssignmentAttempt,
    ) -> Result<AssignmentAttempt> {
        if !self.store.cas_attempt(&attempt).await? {
            return Err(lost_race(format!("attempt {}", attempt.id)));
        }
        Ok(AssignmentAttempt {
            version: attempt.version + 1,
            ..attempt
        })
    }

    /// Hand a notification to the gateway. Failures are logged, never raised.
    pub(crate) async fn send(&self, recipient: Recipient, payload: Payload) {
        let kind = payload.name();
        let result = match self.notifier.notify(&recipient, &payload).await {
            Ok(()) => "ok",
            Err(e) => {
                warn!(notification = kind, ?recipient, error = %e, "notification failed");
                "error"
            }
        };
        metrics::notifications().add(
            1,
            &[KeyValue::new("kind", kind), KeyValue::new("result", result)],
        );
    }

    pub(crate) async fn notify_assigned(&self, attempt: &AssignmentAttempt) {
        self.send(
            Recipient::Solicitor {
                id: attempt.solicitor_id,
                address: attempt.solicitor_address.clone(),
            },
            Payload::Assigned {
                work_item: attempt.work_item_id,
            },
        )
        .await;
    }
}
