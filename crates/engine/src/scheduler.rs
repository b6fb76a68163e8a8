//! Periodic escalation sweep over overdue approval requests.
//!
//! Each overdue request is handled independently and atomically: the sweep
//! plans its expiry/escalation, then commits under the same compare-and-swap
//! guard reviewer decisions use. A reviewer who resolves a request while the
//! sweep is running simply wins the race; the sweep counts the conflict and
//! moves on. Shutdown is honored between requests, never mid-commit.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use costwise_core::workflow::WorkflowError;
use costwise_db::repositories::{CommitOutcome, WorkflowRepository};

use crate::service::{ServiceError, SharedPolicy};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub scanned: usize,
    pub escalated: usize,
    pub expired: usize,
    pub conflicts: usize,
    pub reminders: usize,
}

pub struct EscalationScheduler<R> {
    repo: Arc<R>,
    policy: SharedPolicy,
    interval: Duration,
}

impl<R> EscalationScheduler<R>
where
    R: WorkflowRepository,
{
    pub fn new(repo: Arc<R>, policy: SharedPolicy, interval: Duration) -> Self {
        Self { repo, policy, interval }
    }

    /// Run sweeps on the configured interval until `shutdown` flips to true.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.sweep_at(Utc::now(), Some(&shutdown)).await {
                        Ok(report) => info!(
                            event_name = "escalation.sweep_completed",
                            scanned = report.scanned,
                            escalated = report.escalated,
                            expired = report.expired,
                            conflicts = report.conflicts,
                            reminders = report.reminders,
                            "escalation sweep completed"
                        ),
                        Err(error) => warn!(
                            event_name = "escalation.sweep_failed",
                            error = %error,
                            "escalation sweep aborted"
                        ),
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!(
                            event_name = "escalation.scheduler_stopped",
                            "escalation scheduler stopping"
                        );
                        break;
                    }
                }
            }
        }
    }

    /// One full sweep as of `Utc::now()`.
    pub async fn sweep_once(&self) -> Result<SweepReport, ServiceError> {
        self.sweep_at(Utc::now(), None).await
    }

    /// One full sweep as of the given instant. Reminder candidates are
    /// flagged first (skipping requests the expiry pass is about to
    /// resolve), then every overdue request is expired or escalated.
    pub async fn sweep_at(
        &self,
        now: DateTime<Utc>,
        shutdown: Option<&watch::Receiver<bool>>,
    ) -> Result<SweepReport, ServiceError> {
        let engine = self.policy.snapshot();
        let mut report = SweepReport::default();

        let all_roles: Vec<String> = engine
            .policy()
            .hierarchy
            .tiers()
            .iter()
            .map(|tier| tier.role.clone())
            .collect();
        for request in self.repo.list_pending(&all_roles).await? {
            if request.needs_reminder(now) && !request.is_overdue(now) {
                self.repo.mark_reminded(&request.id, now).await?;
                report.reminders += 1;
            }
        }

        for request in self.repo.list_overdue(now).await? {
            if stop_requested(shutdown) {
                info!(
                    event_name = "escalation.sweep_interrupted",
                    scanned = report.scanned,
                    "sweep stopped between requests; remainder picked up next run"
                );
                break;
            }

            report.scanned += 1;

            let Some(record) = self.repo.find_record(&request.cost_table_id).await? else {
                warn!(
                    event_name = "escalation.orphan_request",
                    request_id = %request.id.0,
                    cost_table_id = %request.cost_table_id.0,
                    "pending request references a missing record"
                );
                continue;
            };

            let plan = match engine.plan_escalation(&record, &request, now) {
                Ok(plan) => plan,
                Err(WorkflowError::AlreadyResolved { .. }) => {
                    report.conflicts += 1;
                    continue;
                }
                Err(error) => return Err(error.into()),
            };

            let forwards = plan.next_request.is_some();
            let outcome = self
                .repo
                .commit_escalation(
                    plan.expected_version,
                    &plan.request,
                    plan.next_request.as_ref(),
                    plan.record.as_ref(),
                    &plan.audit,
                )
                .await?;

            match outcome {
                CommitOutcome::Committed if forwards => {
                    report.escalated += 1;
                    info!(
                        event_name = "escalation.request_escalated",
                        request_id = %request.id.0,
                        cost_table_id = %request.cost_table_id.0,
                        from_role = %request.required_role,
                        "overdue request escalated to the next tier"
                    );
                }
                CommitOutcome::Committed => {
                    report.expired += 1;
                    info!(
                        event_name = "escalation.record_expired",
                        request_id = %request.id.0,
                        cost_table_id = %request.cost_table_id.0,
                        "overdue request expired terminally"
                    );
                }
                // A reviewer resolved the request mid-sweep; their commit wins.
                CommitOutcome::Conflict => {
                    report.conflicts += 1;
                }
            }
        }

        Ok(report)
    }
}

fn stop_requested(shutdown: Option<&watch::Receiver<bool>>) -> bool {
    shutdown.map(|receiver| *receiver.borrow()).unwrap_or(false)
}
