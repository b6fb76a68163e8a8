use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use costwise_core::audit::AuditEntry;
use costwise_core::domain::approval::{ApprovalId, ApprovalRequest};
use costwise_core::domain::cost_table::{CostTableId, CostTableRecord};

pub mod memory;
pub mod sql;

pub use memory::InMemoryWorkflowRepository;
pub use sql::SqlWorkflowRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

/// Result of a compare-and-swap commit. `Conflict` means the guarded request
/// was resolved or re-versioned by a concurrent writer between the caller's
/// read and this commit; nothing was written.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed,
    Conflict,
}

/// Persistence surface of the workflow engine.
///
/// Commit methods write every entity of a transition plan in one atomic unit,
/// guarded on the pending request's `state_version` as observed by the
/// planner. Callers never see a request resolved without its record and audit
/// entry, and a lost race is reported as `Conflict`, never retried here.
#[async_trait]
pub trait WorkflowRepository: Send + Sync {
    async fn insert_submission(
        &self,
        record: &CostTableRecord,
        request: &ApprovalRequest,
        audit: &AuditEntry,
    ) -> Result<(), RepositoryError>;

    async fn find_record(
        &self,
        id: &CostTableId,
    ) -> Result<Option<CostTableRecord>, RepositoryError>;

    async fn find_request(
        &self,
        id: &ApprovalId,
    ) -> Result<Option<ApprovalRequest>, RepositoryError>;

    async fn commit_decision(
        &self,
        expected_version: u32,
        request: &ApprovalRequest,
        record: &CostTableRecord,
        next_request: Option<&ApprovalRequest>,
        audit: &AuditEntry,
    ) -> Result<CommitOutcome, RepositoryError>;

    async fn commit_escalation(
        &self,
        expected_version: u32,
        request: &ApprovalRequest,
        next_request: Option<&ApprovalRequest>,
        record: Option<&CostTableRecord>,
        audit: &AuditEntry,
    ) -> Result<CommitOutcome, RepositoryError>;

    async fn commit_resubmission(
        &self,
        record: &CostTableRecord,
        request: &ApprovalRequest,
        audit: &AuditEntry,
    ) -> Result<(), RepositoryError>;

    /// Flag a pending request as reminded. Not a transition: the request's
    /// `state_version` is left alone so a racing decision does not spuriously
    /// conflict with the reminder sweep.
    async fn mark_reminded(
        &self,
        id: &ApprovalId,
        reminded_at: DateTime<Utc>,
    ) -> Result<(), RepositoryError>;

    /// Pending requests addressed to any of the given roles, most urgent
    /// deadline first.
    async fn list_pending(&self, roles: &[String])
        -> Result<Vec<ApprovalRequest>, RepositoryError>;

    /// Pending requests whose deadline has elapsed, most overdue first.
    async fn list_overdue(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<ApprovalRequest>, RepositoryError>;

    /// Every request ever created for a record, oldest first.
    async fn list_requests_for(
        &self,
        id: &CostTableId,
    ) -> Result<Vec<ApprovalRequest>, RepositoryError>;

    async fn append_audit(&self, entry: &AuditEntry) -> Result<(), RepositoryError>;

    /// Audit entries for a record, oldest first; ties on the timestamp break
    /// by insertion order.
    async fn history(&self, id: &CostTableId) -> Result<Vec<AuditEntry>, RepositoryError>;
}
