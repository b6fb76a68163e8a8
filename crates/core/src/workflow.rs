//! Pure workflow state machine for cost-table review.
//!
//! Functions here take the current entities plus a policy snapshot and return
//! fully-built transition *plans*: the updated request, the updated record,
//! the follow-up request when the chain advances, and the audit entry. Plans
//! carry the `state_version` the planner observed; committing a plan is the
//! store's job and happens atomically under that compare-and-swap guard, so
//! no partial transition is ever observable.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

use crate::audit::{actions, AuditActor, AuditEntry};
use crate::domain::approval::{ApprovalId, ApprovalRequest, ApprovalStatus};
use crate::domain::cost_table::{
    CostTableId, CostTableRecord, CostTableStatus, CostTableSubmission, DomainError,
};
use crate::hierarchy::{normalize_role, HierarchyError, RoleHierarchy, RoleTier};

/// Snapshot of the workflow's tunable behavior. The engine holds one
/// immutable snapshot; hot reload swaps the whole snapshot, never mutates it.
#[derive(Clone, Debug)]
pub struct WorkflowPolicy {
    pub hierarchy: RoleHierarchy,
    pub auto_escalate: bool,
    pub default_deadline_days: i64,
    pub review_window_days: i64,
}

impl Default for WorkflowPolicy {
    fn default() -> Self {
        Self {
            hierarchy: RoleHierarchy::default(),
            auto_escalate: true,
            default_deadline_days: 3,
            review_window_days: 30,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Decision {
    Approve,
    Reject,
}

/// The authenticated principal acting on a request, as supplied by the
/// (external) identity provider.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Actor {
    pub identity: String,
    pub role: String,
}

impl Actor {
    pub fn new(identity: impl Into<String>, role: impl Into<String>) -> Self {
        Self { identity: identity.into(), role: role.into() }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum WorkflowError {
    #[error("monetary impact must not be negative, got {amount}")]
    InvalidAmount { amount: Decimal },
    #[error("unknown role `{role}`")]
    UnknownRole { role: String },
    #[error("role `{actor_role}` is not authorized to decide a `{required_role}` request")]
    Unauthorized { actor_role: String, required_role: String },
    #[error("not found: {id}")]
    NotFound { id: String },
    #[error("approval request {id} is already {status:?}")]
    AlreadyResolved { id: ApprovalId, status: ApprovalStatus },
    #[error("approval request {id} was modified concurrently")]
    ConcurrentModification { id: ApprovalId },
    #[error("cost table cannot be resubmitted from status {status:?}")]
    InvalidState { status: CostTableStatus },
    #[error("workflow configuration error: {0}")]
    Configuration(String),
    #[error(transparent)]
    Transition(#[from] DomainError),
}

impl From<HierarchyError> for WorkflowError {
    fn from(error: HierarchyError) -> Self {
        match error {
            HierarchyError::UnknownRole { role } => Self::UnknownRole { role },
            other => Self::Configuration(other.to_string()),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct SubmissionPlan {
    pub record: CostTableRecord,
    pub request: ApprovalRequest,
    pub audit: AuditEntry,
}

#[derive(Clone, Debug, PartialEq)]
pub struct DecisionPlan {
    /// `state_version` observed on the pending request; the commit is guarded
    /// on it.
    pub expected_version: u32,
    pub request: ApprovalRequest,
    pub record: CostTableRecord,
    pub next_request: Option<ApprovalRequest>,
    pub audit: AuditEntry,
}

#[derive(Clone, Debug, PartialEq)]
pub struct EscalationPlan {
    pub expected_version: u32,
    pub request: ApprovalRequest,
    /// Follow-up request when escalating forward; `None` when the record
    /// terminates instead.
    pub next_request: Option<ApprovalRequest>,
    /// Updated record when the expiry is terminal; `None` when the record is
    /// untouched (forward escalation).
    pub record: Option<CostTableRecord>,
    pub audit: AuditEntry,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ResubmissionPlan {
    pub record: CostTableRecord,
    pub request: ApprovalRequest,
    pub audit: AuditEntry,
}

/// Deterministic planner for every workflow transition.
#[derive(Clone, Debug, Default)]
pub struct WorkflowEngine {
    policy: WorkflowPolicy,
}

impl WorkflowEngine {
    pub fn new(policy: WorkflowPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &WorkflowPolicy {
        &self.policy
    }

    /// Record stage shown while a request at the given tier is pending.
    /// Stock mapping of the supplier portal; custom tiers review under the
    /// generic stage.
    pub fn review_status_for(role: &str) -> CostTableStatus {
        match normalize_role(role).as_str() {
            "pricing_analyst" => CostTableStatus::PricingAnalysis,
            "commercial_manager" => CostTableStatus::CommercialReview,
            "commercial_director" | "pricing_director" => CostTableStatus::DirectorReview,
            "vp_commercial" => CostTableStatus::VpReview,
            _ => CostTableStatus::UnderReview,
        }
    }

    /// Validate the ingested payload and lay out the freshly submitted
    /// record with its first pending request, routed to the lowest tier whose
    /// limit covers the impact (top tier when none does).
    pub fn plan_submission(
        &self,
        submission: &CostTableSubmission,
        now: DateTime<Utc>,
    ) -> Result<SubmissionPlan, WorkflowError> {
        if submission.monetary_impact < Decimal::ZERO {
            return Err(WorkflowError::InvalidAmount { amount: submission.monetary_impact });
        }

        let record = CostTableRecord {
            id: CostTableId(Uuid::new_v4().to_string()),
            supplier_id: submission.supplier_id.clone(),
            category: submission.category.clone(),
            currency: submission.currency.clone(),
            effective_date: submission.effective_date,
            monetary_impact: submission.monetary_impact,
            line_item_count: submission.line_item_count,
            version: 1,
            status: CostTableStatus::Submitted,
            submitted_at: now,
            review_deadline: now + Duration::days(self.policy.review_window_days),
            created_at: now,
            updated_at: now,
        };

        let tier = self.policy.hierarchy.initial_tier_for(record.monetary_impact);
        let request = self.pending_request(&record.id, tier, now);

        let audit = AuditEntry::new(
            record.id.clone(),
            AuditActor::system(),
            actions::SUBMITTED,
            None,
            record.status,
            now,
        );

        Ok(SubmissionPlan { record, request, audit })
    }

    /// Resolve a pending request with a reviewer decision.
    ///
    /// Checks run in the order the caller observes them: resolution state,
    /// then authorization (rank AND limit; an indeterminate check denies,
    /// never approves). A rejection terminates the record. An approval
    /// terminates it when the deciding tier was the top of the chain or the
    /// actor's own limit covers the impact; otherwise the record advances one
    /// tier and the follow-up pending request is part of the same plan.
    pub fn plan_decision(
        &self,
        record: &CostTableRecord,
        request: &ApprovalRequest,
        actor: &Actor,
        decision: Decision,
        comment: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<DecisionPlan, WorkflowError> {
        if !request.is_pending() {
            return Err(WorkflowError::AlreadyResolved {
                id: request.id.clone(),
                status: request.status,
            });
        }

        let authorized = self
            .policy
            .hierarchy
            .can_authorize(&actor.role, &request.required_role, record.monetary_impact)
            .map_err(WorkflowError::from)?;
        if !authorized {
            return Err(WorkflowError::Unauthorized {
                actor_role: actor.role.clone(),
                required_role: request.required_role.clone(),
            });
        }

        let expected_version = request.state_version;
        let mut request = request.clone();
        request.state_version += 1;
        request.resolved_at = Some(now);
        request.decided_by = Some(actor.identity.clone());
        request.comment = comment.clone();

        let mut record = record.clone();
        let prior_status = record.status;
        let mut next_request = None;

        let action = match decision {
            Decision::Reject => {
                request.status = ApprovalStatus::Rejected;
                record.transition_to(CostTableStatus::Rejected, now)?;
                actions::REJECTED
            }
            Decision::Approve => {
                request.status = ApprovalStatus::Approved;

                let covered = self
                    .policy
                    .hierarchy
                    .limit(&actor.role)
                    .map_err(WorkflowError::from)?
                    .map_or(true, |limit| record.monetary_impact <= limit);

                let next_tier = self
                    .policy
                    .hierarchy
                    .next_tier(&request.required_role)
                    .map_err(WorkflowError::from)?;

                match next_tier {
                    Some(tier) if !covered => {
                        record.transition_to(Self::review_status_for(&tier.role), now)?;
                        next_request = Some(self.pending_request(&record.id, tier, now));
                    }
                    _ => {
                        record.transition_to(CostTableStatus::Approved, now)?;
                    }
                }
                actions::APPROVED
            }
        };

        let audit = AuditEntry::new(
            record.id.clone(),
            AuditActor::reviewer(normalize_role(&actor.role), actor.identity.clone()),
            action,
            Some(prior_status),
            record.status,
            now,
        )
        .with_comment(comment);

        Ok(DecisionPlan { expected_version, request, record, next_request, audit })
    }

    /// Expire an overdue pending request.
    ///
    /// With auto-escalation on and a tier above, the chain moves forward: the
    /// request expires, a fresh pending request opens one tier up, and the
    /// record stays where it was. At the top of the chain, or with
    /// auto-escalation off, the record terminates as expired.
    pub fn plan_escalation(
        &self,
        record: &CostTableRecord,
        request: &ApprovalRequest,
        now: DateTime<Utc>,
    ) -> Result<EscalationPlan, WorkflowError> {
        if !request.is_pending() {
            return Err(WorkflowError::AlreadyResolved {
                id: request.id.clone(),
                status: request.status,
            });
        }

        let expected_version = request.state_version;
        let mut request = request.clone();
        request.state_version += 1;
        request.status = ApprovalStatus::Expired;
        request.resolved_at = Some(now);

        let next_tier = if self.policy.auto_escalate {
            // A tier that vanished on reload escalates like the top tier:
            // terminal expiry rather than a dangling chain.
            self.policy.hierarchy.next_tier(&request.required_role).unwrap_or(None)
        } else {
            None
        };

        let prior_status = record.status;
        let plan = match next_tier {
            Some(tier) => {
                let next_request = self.pending_request(&record.id, tier, now);
                let audit = AuditEntry::new(
                    record.id.clone(),
                    AuditActor::system(),
                    actions::ESCALATED,
                    Some(prior_status),
                    record.status,
                    now,
                )
                .with_comment(Some(format!(
                    "deadline elapsed at `{}`, escalated to `{}`",
                    request.required_role, tier.role
                )));
                EscalationPlan {
                    expected_version,
                    request,
                    next_request: Some(next_request),
                    record: None,
                    audit,
                }
            }
            None => {
                let mut record = record.clone();
                record.transition_to(CostTableStatus::Expired, now)?;
                let audit = AuditEntry::new(
                    record.id.clone(),
                    AuditActor::system(),
                    actions::EXPIRED,
                    Some(prior_status),
                    record.status,
                    now,
                )
                .with_comment(Some(format!(
                    "deadline elapsed at `{}` with no further tier",
                    request.required_role
                )));
                EscalationPlan {
                    expected_version,
                    request,
                    next_request: None,
                    record: Some(record),
                    audit,
                }
            }
        };

        Ok(plan)
    }

    /// Re-enter the workflow after a rejection. The version bumps, the
    /// financial payload is replaced, and routing is recomputed from the new
    /// impact. Prior requests stay behind as history; they are all resolved
    /// by the time a record is rejected.
    pub fn plan_resubmission(
        &self,
        record: &CostTableRecord,
        submission: &CostTableSubmission,
        now: DateTime<Utc>,
    ) -> Result<ResubmissionPlan, WorkflowError> {
        if record.status != CostTableStatus::Rejected {
            return Err(WorkflowError::InvalidState { status: record.status });
        }
        if submission.monetary_impact < Decimal::ZERO {
            return Err(WorkflowError::InvalidAmount { amount: submission.monetary_impact });
        }

        let mut record = record.clone();
        let prior_status = record.status;
        record.version += 1;
        record.category = submission.category.clone();
        record.currency = submission.currency.clone();
        record.effective_date = submission.effective_date;
        record.monetary_impact = submission.monetary_impact;
        record.line_item_count = submission.line_item_count;
        record.submitted_at = now;
        record.review_deadline = now + Duration::days(self.policy.review_window_days);
        record.transition_to(CostTableStatus::Submitted, now)?;

        let tier = self.policy.hierarchy.initial_tier_for(record.monetary_impact);
        let request = self.pending_request(&record.id, tier, now);

        let audit = AuditEntry::new(
            record.id.clone(),
            AuditActor::system(),
            actions::RESUBMITTED,
            Some(prior_status),
            record.status,
            now,
        )
        .with_comment(Some(format!("version {}", record.version)));

        Ok(ResubmissionPlan { record, request, audit })
    }

    fn pending_request(
        &self,
        cost_table_id: &CostTableId,
        tier: &RoleTier,
        now: DateTime<Utc>,
    ) -> ApprovalRequest {
        ApprovalRequest {
            id: ApprovalId(Uuid::new_v4().to_string()),
            cost_table_id: cost_table_id.clone(),
            required_role: tier.role.clone(),
            status: ApprovalStatus::Pending,
            comment: None,
            decided_by: None,
            created_at: now,
            due_at: now + Duration::days(tier.deadline_days),
            resolved_at: None,
            reminded_at: None,
            state_version: 1,
        }
    }
}
