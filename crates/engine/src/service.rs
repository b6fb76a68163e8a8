//! Orchestration layer between the pure planner and the store.
//!
//! Every operation snapshots the policy once, plans the transition against
//! entities read from the store, and commits the whole plan atomically. A
//! commit that loses the compare-and-swap race surfaces as
//! `ConcurrentModification`; the caller decides whether to re-read and act
//! again — nothing is retried here.

use std::sync::{Arc, RwLock};

use chrono::Utc;
use thiserror::Error;
use tracing::info;

use costwise_core::audit::AuditEntry;
use costwise_core::config::{ConfigError, WorkflowConfig};
use costwise_core::domain::approval::{ApprovalId, ApprovalRequest};
use costwise_core::domain::cost_table::{CostTableId, CostTableRecord, CostTableSubmission};
use costwise_core::workflow::{Actor, Decision, WorkflowEngine, WorkflowError};
use costwise_db::repositories::{CommitOutcome, RepositoryError, WorkflowRepository};

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Workflow(#[from] WorkflowError),
    #[error("storage failure: {0}")]
    Storage(#[from] RepositoryError),
}

/// Hot-swappable workflow settings. Readers take a cheap `Arc` snapshot;
/// `reload` revalidates the incoming table and swaps the snapshot, so
/// in-flight operations keep the policy they started with.
#[derive(Clone)]
pub struct SharedPolicy {
    inner: Arc<RwLock<Arc<WorkflowEngine>>>,
}

impl SharedPolicy {
    pub fn from_config(config: &WorkflowConfig) -> Result<Self, ConfigError> {
        let engine = Arc::new(WorkflowEngine::new(config.policy()?));
        Ok(Self { inner: Arc::new(RwLock::new(engine)) })
    }

    pub fn snapshot(&self) -> Arc<WorkflowEngine> {
        match self.inner.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    pub fn reload(&self, config: &WorkflowConfig) -> Result<(), ConfigError> {
        let engine = Arc::new(WorkflowEngine::new(config.policy()?));
        match self.inner.write() {
            Ok(mut guard) => *guard = engine,
            Err(poisoned) => *poisoned.into_inner() = engine,
        }
        info!(event_name = "workflow.policy_reloaded", "workflow policy snapshot replaced");
        Ok(())
    }
}

impl Default for SharedPolicy {
    fn default() -> Self {
        Self::from_config(&WorkflowConfig::default()).expect("stock workflow config is valid")
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct DecisionOutcome {
    pub record: CostTableRecord,
    pub request: ApprovalRequest,
    pub next_request: Option<ApprovalRequest>,
}

pub struct WorkflowService<R> {
    repo: Arc<R>,
    policy: SharedPolicy,
}

impl<R> WorkflowService<R>
where
    R: WorkflowRepository,
{
    pub fn new(repo: Arc<R>, policy: SharedPolicy) -> Self {
        Self { repo, policy }
    }

    pub fn policy(&self) -> &SharedPolicy {
        &self.policy
    }

    /// Accept an ingested cost table into the workflow. Returns the new
    /// record id; the first pending request is already routed and persisted
    /// when this returns.
    pub async fn submit(
        &self,
        submission: &CostTableSubmission,
    ) -> Result<CostTableId, ServiceError> {
        let engine = self.policy.snapshot();
        let plan = engine.plan_submission(submission, Utc::now())?;
        self.repo.insert_submission(&plan.record, &plan.request, &plan.audit).await?;

        info!(
            event_name = "workflow.submitted",
            cost_table_id = %plan.record.id.0,
            supplier_id = %plan.record.supplier_id,
            required_role = %plan.request.required_role,
            "cost table accepted into review"
        );
        Ok(plan.record.id)
    }

    /// Apply a reviewer decision to a pending request, exactly once.
    pub async fn decide(
        &self,
        request_id: &ApprovalId,
        actor: &Actor,
        decision: Decision,
        comment: Option<String>,
    ) -> Result<DecisionOutcome, ServiceError> {
        let engine = self.policy.snapshot();

        let request = self
            .repo
            .find_request(request_id)
            .await?
            .ok_or_else(|| WorkflowError::NotFound { id: request_id.0.clone() })?;
        let record = self
            .repo
            .find_record(&request.cost_table_id)
            .await?
            .ok_or_else(|| WorkflowError::NotFound { id: request.cost_table_id.0.clone() })?;

        let plan = engine.plan_decision(&record, &request, actor, decision, comment, Utc::now())?;

        let outcome = self
            .repo
            .commit_decision(
                plan.expected_version,
                &plan.request,
                &plan.record,
                plan.next_request.as_ref(),
                &plan.audit,
            )
            .await?;

        match outcome {
            CommitOutcome::Committed => {
                info!(
                    event_name = "workflow.decided",
                    cost_table_id = %plan.record.id.0,
                    request_id = %plan.request.id.0,
                    actor_role = %actor.role,
                    new_status = plan.record.status.as_str(),
                    "approval decision committed"
                );
                Ok(DecisionOutcome {
                    record: plan.record,
                    request: plan.request,
                    next_request: plan.next_request,
                })
            }
            CommitOutcome::Conflict => {
                Err(WorkflowError::ConcurrentModification { id: request.id }.into())
            }
        }
    }

    /// Re-enter a rejected record with a corrected payload.
    pub async fn resubmit(
        &self,
        record_id: &CostTableId,
        submission: &CostTableSubmission,
    ) -> Result<CostTableId, ServiceError> {
        let engine = self.policy.snapshot();

        let record = self
            .repo
            .find_record(record_id)
            .await?
            .ok_or_else(|| WorkflowError::NotFound { id: record_id.0.clone() })?;

        let plan = engine.plan_resubmission(&record, submission, Utc::now())?;
        self.repo.commit_resubmission(&plan.record, &plan.request, &plan.audit).await?;

        info!(
            event_name = "workflow.resubmitted",
            cost_table_id = %plan.record.id.0,
            version = plan.record.version,
            required_role = %plan.request.required_role,
            "rejected cost table resubmitted"
        );
        Ok(plan.record.id)
    }

    /// Pending requests the given role may act on, most urgent first.
    pub async fn list_pending(
        &self,
        actor_role: &str,
    ) -> Result<Vec<ApprovalRequest>, ServiceError> {
        let engine = self.policy.snapshot();
        let roles = engine
            .policy()
            .hierarchy
            .actionable_roles(actor_role)
            .map_err(WorkflowError::from)?;
        Ok(self.repo.list_pending(&roles).await?)
    }

    /// Pending requests past their deadline, for oversight views.
    pub async fn list_overdue(&self) -> Result<Vec<ApprovalRequest>, ServiceError> {
        Ok(self.repo.list_overdue(Utc::now()).await?)
    }

    /// Full audit trail of a record, oldest entry first.
    pub async fn history(&self, record_id: &CostTableId) -> Result<Vec<AuditEntry>, ServiceError> {
        self.repo
            .find_record(record_id)
            .await?
            .ok_or_else(|| WorkflowError::NotFound { id: record_id.0.clone() })?;
        Ok(self.repo.history(record_id).await?)
    }

    pub async fn record(
        &self,
        record_id: &CostTableId,
    ) -> Result<CostTableRecord, ServiceError> {
        self.repo
            .find_record(record_id)
            .await?
            .ok_or_else(|| WorkflowError::NotFound { id: record_id.0.clone() }.into())
    }
}
