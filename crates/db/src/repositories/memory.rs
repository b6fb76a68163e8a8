use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use costwise_core::audit::AuditEntry;
use costwise_core::domain::approval::{ApprovalId, ApprovalRequest, ApprovalStatus};
use costwise_core::domain::cost_table::{CostTableId, CostTableRecord};

use super::{CommitOutcome, RepositoryError, WorkflowRepository};

#[derive(Default)]
struct Inner {
    records: HashMap<String, CostTableRecord>,
    requests: HashMap<String, ApprovalRequest>,
    audit: Vec<AuditEntry>,
    next_seq: i64,
}

impl Inner {
    /// The same guard the SQL store expresses in its UPDATE predicate.
    fn request_matches(&self, id: &ApprovalId, expected_version: u32) -> bool {
        self.requests
            .get(&id.0)
            .map(|request| {
                request.status == ApprovalStatus::Pending
                    && request.state_version == expected_version
            })
            .unwrap_or(false)
    }

    fn append_audit(&mut self, entry: &AuditEntry) {
        self.next_seq += 1;
        let mut entry = entry.clone();
        entry.seq = self.next_seq;
        self.audit.push(entry);
    }
}

/// Test double for the SQLite store with identical commit semantics: every
/// commit happens inside one write-lock critical section, guarded by the
/// observed `state_version`.
#[derive(Default)]
pub struct InMemoryWorkflowRepository {
    inner: RwLock<Inner>,
}

#[async_trait::async_trait]
impl WorkflowRepository for InMemoryWorkflowRepository {
    async fn insert_submission(
        &self,
        record: &CostTableRecord,
        request: &ApprovalRequest,
        audit: &AuditEntry,
    ) -> Result<(), RepositoryError> {
        let mut inner = self.inner.write().await;
        inner.records.insert(record.id.0.clone(), record.clone());
        inner.requests.insert(request.id.0.clone(), request.clone());
        inner.append_audit(audit);
        Ok(())
    }

    async fn find_record(
        &self,
        id: &CostTableId,
    ) -> Result<Option<CostTableRecord>, RepositoryError> {
        let inner = self.inner.read().await;
        Ok(inner.records.get(&id.0).cloned())
    }

    async fn find_request(
        &self,
        id: &ApprovalId,
    ) -> Result<Option<ApprovalRequest>, RepositoryError> {
        let inner = self.inner.read().await;
        Ok(inner.requests.get(&id.0).cloned())
    }

    async fn commit_decision(
        &self,
        expected_version: u32,
        request: &ApprovalRequest,
        record: &CostTableRecord,
        next_request: Option<&ApprovalRequest>,
        audit: &AuditEntry,
    ) -> Result<CommitOutcome, RepositoryError> {
        let mut inner = self.inner.write().await;
        if !inner.request_matches(&request.id, expected_version) {
            return Ok(CommitOutcome::Conflict);
        }

        inner.requests.insert(request.id.0.clone(), request.clone());
        inner.records.insert(record.id.0.clone(), record.clone());
        if let Some(next) = next_request {
            inner.requests.insert(next.id.0.clone(), next.clone());
        }
        inner.append_audit(audit);
        Ok(CommitOutcome::Committed)
    }

    async fn commit_escalation(
        &self,
        expected_version: u32,
        request: &ApprovalRequest,
        next_request: Option<&ApprovalRequest>,
        record: Option<&CostTableRecord>,
        audit: &AuditEntry,
    ) -> Result<CommitOutcome, RepositoryError> {
        let mut inner = self.inner.write().await;
        if !inner.request_matches(&request.id, expected_version) {
            return Ok(CommitOutcome::Conflict);
        }

        inner.requests.insert(request.id.0.clone(), request.clone());
        if let Some(record) = record {
            inner.records.insert(record.id.0.clone(), record.clone());
        }
        if let Some(next) = next_request {
            inner.requests.insert(next.id.0.clone(), next.clone());
        }
        inner.append_audit(audit);
        Ok(CommitOutcome::Committed)
    }

    async fn commit_resubmission(
        &self,
        record: &CostTableRecord,
        request: &ApprovalRequest,
        audit: &AuditEntry,
    ) -> Result<(), RepositoryError> {
        let mut inner = self.inner.write().await;
        inner.records.insert(record.id.0.clone(), record.clone());
        inner.requests.insert(request.id.0.clone(), request.clone());
        inner.append_audit(audit);
        Ok(())
    }

    async fn mark_reminded(
        &self,
        id: &ApprovalId,
        reminded_at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let mut inner = self.inner.write().await;
        if let Some(request) = inner.requests.get_mut(&id.0) {
            if request.status == ApprovalStatus::Pending {
                request.reminded_at = Some(reminded_at);
            }
        }
        Ok(())
    }

    async fn list_pending(
        &self,
        roles: &[String],
    ) -> Result<Vec<ApprovalRequest>, RepositoryError> {
        let inner = self.inner.read().await;
        let mut pending: Vec<ApprovalRequest> = inner
            .requests
            .values()
            .filter(|request| request.is_pending())
            .filter(|request| roles.contains(&request.required_role))
            .cloned()
            .collect();
        pending.sort_by(|left, right| {
            left.due_at.cmp(&right.due_at).then_with(|| left.id.0.cmp(&right.id.0))
        });
        Ok(pending)
    }

    async fn list_overdue(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<ApprovalRequest>, RepositoryError> {
        let inner = self.inner.read().await;
        let mut overdue: Vec<ApprovalRequest> = inner
            .requests
            .values()
            .filter(|request| request.is_overdue(now))
            .cloned()
            .collect();
        overdue.sort_by(|left, right| {
            left.due_at.cmp(&right.due_at).then_with(|| left.id.0.cmp(&right.id.0))
        });
        Ok(overdue)
    }

    async fn list_requests_for(
        &self,
        id: &CostTableId,
    ) -> Result<Vec<ApprovalRequest>, RepositoryError> {
        let inner = self.inner.read().await;
        let mut requests: Vec<ApprovalRequest> = inner
            .requests
            .values()
            .filter(|request| request.cost_table_id == *id)
            .cloned()
            .collect();
        requests.sort_by(|left, right| {
            left.created_at.cmp(&right.created_at).then_with(|| left.id.0.cmp(&right.id.0))
        });
        Ok(requests)
    }

    async fn append_audit(&self, entry: &AuditEntry) -> Result<(), RepositoryError> {
        let mut inner = self.inner.write().await;
        inner.append_audit(entry);
        Ok(())
    }

    async fn history(&self, id: &CostTableId) -> Result<Vec<AuditEntry>, RepositoryError> {
        let inner = self.inner.read().await;
        let mut entries: Vec<AuditEntry> = inner
            .audit
            .iter()
            .filter(|entry| entry.cost_table_id == *id)
            .cloned()
            .collect();
        entries.sort_by(|left, right| {
            left.occurred_at.cmp(&right.occurred_at).then_with(|| left.seq.cmp(&right.seq))
        });
        Ok(entries)
    }
}
