use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, Transaction};

use costwise_core::audit::{AuditActor, AuditEntry};
use costwise_core::domain::approval::{ApprovalId, ApprovalRequest, ApprovalStatus};
use costwise_core::domain::cost_table::{CostTableId, CostTableRecord, CostTableStatus};

use super::{CommitOutcome, RepositoryError, WorkflowRepository};
use crate::DbPool;

pub struct SqlWorkflowRepository {
    pool: DbPool,
}

impl SqlWorkflowRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn decode<E: std::fmt::Display>(error: E) -> RepositoryError {
    RepositoryError::Decode(error.to_string())
}

fn parse_approval_status(raw: &str) -> Result<ApprovalStatus, RepositoryError> {
    match raw {
        "pending" => Ok(ApprovalStatus::Pending),
        "approved" => Ok(ApprovalStatus::Approved),
        "rejected" => Ok(ApprovalStatus::Rejected),
        "expired" => Ok(ApprovalStatus::Expired),
        other => Err(RepositoryError::Decode(format!("unknown approval status `{other}`"))),
    }
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(raw).map(|dt| dt.with_timezone(&Utc)).map_err(decode)
}

fn parse_optional_timestamp(
    raw: Option<String>,
) -> Result<Option<DateTime<Utc>>, RepositoryError> {
    raw.as_deref().map(parse_timestamp).transpose()
}

fn row_to_record(row: &SqliteRow) -> Result<CostTableRecord, RepositoryError> {
    let effective_date: String = row.try_get("effective_date").map_err(decode)?;
    let monetary_impact: String = row.try_get("monetary_impact").map_err(decode)?;
    let status: String = row.try_get("status").map_err(decode)?;
    let submitted_at: String = row.try_get("submitted_at").map_err(decode)?;
    let review_deadline: String = row.try_get("review_deadline").map_err(decode)?;
    let created_at: String = row.try_get("created_at").map_err(decode)?;
    let updated_at: String = row.try_get("updated_at").map_err(decode)?;

    Ok(CostTableRecord {
        id: CostTableId(row.try_get("id").map_err(decode)?),
        supplier_id: row.try_get("supplier_id").map_err(decode)?,
        category: row.try_get("category").map_err(decode)?,
        currency: row.try_get("currency").map_err(decode)?,
        effective_date: NaiveDate::parse_from_str(&effective_date, "%Y-%m-%d").map_err(decode)?,
        monetary_impact: monetary_impact.parse::<Decimal>().map_err(decode)?,
        line_item_count: row.try_get::<i64, _>("line_item_count").map_err(decode)? as u32,
        version: row.try_get::<i64, _>("version").map_err(decode)? as u32,
        status: status.parse::<CostTableStatus>().map_err(decode)?,
        submitted_at: parse_timestamp(&submitted_at)?,
        review_deadline: parse_timestamp(&review_deadline)?,
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
    })
}

fn row_to_request(row: &SqliteRow) -> Result<ApprovalRequest, RepositoryError> {
    let status: String = row.try_get("status").map_err(decode)?;
    let created_at: String = row.try_get("created_at").map_err(decode)?;
    let due_at: String = row.try_get("due_at").map_err(decode)?;
    let resolved_at: Option<String> = row.try_get("resolved_at").map_err(decode)?;
    let reminded_at: Option<String> = row.try_get("reminded_at").map_err(decode)?;

    Ok(ApprovalRequest {
        id: ApprovalId(row.try_get("id").map_err(decode)?),
        cost_table_id: CostTableId(row.try_get("cost_table_id").map_err(decode)?),
        required_role: row.try_get("required_role").map_err(decode)?,
        status: parse_approval_status(&status)?,
        comment: row.try_get("comment").map_err(decode)?,
        decided_by: row.try_get("decided_by").map_err(decode)?,
        created_at: parse_timestamp(&created_at)?,
        due_at: parse_timestamp(&due_at)?,
        resolved_at: parse_optional_timestamp(resolved_at)?,
        reminded_at: parse_optional_timestamp(reminded_at)?,
        state_version: row.try_get::<i64, _>("state_version").map_err(decode)? as u32,
    })
}

fn row_to_audit(row: &SqliteRow) -> Result<AuditEntry, RepositoryError> {
    let prior_status: Option<String> = row.try_get("prior_status").map_err(decode)?;
    let new_status: String = row.try_get("new_status").map_err(decode)?;
    let occurred_at: String = row.try_get("occurred_at").map_err(decode)?;

    Ok(AuditEntry {
        id: row.try_get("id").map_err(decode)?,
        cost_table_id: CostTableId(row.try_get("cost_table_id").map_err(decode)?),
        actor: AuditActor {
            role: row.try_get("actor_role").map_err(decode)?,
            identity: row.try_get("actor_id").map_err(decode)?,
        },
        action: row.try_get("action").map_err(decode)?,
        prior_status: prior_status
            .as_deref()
            .map(|raw| raw.parse::<CostTableStatus>())
            .transpose()
            .map_err(decode)?,
        new_status: new_status.parse::<CostTableStatus>().map_err(decode)?,
        comment: row.try_get("comment").map_err(decode)?,
        occurred_at: parse_timestamp(&occurred_at)?,
        seq: row.try_get("seq").map_err(decode)?,
    })
}

const REQUEST_COLUMNS: &str = "id, cost_table_id, required_role, status, comment, decided_by, \
                               created_at, due_at, resolved_at, reminded_at, state_version";

async fn insert_record(
    tx: &mut Transaction<'_, Sqlite>,
    record: &CostTableRecord,
) -> Result<(), RepositoryError> {
    sqlx::query(
        "INSERT INTO cost_table (id, supplier_id, category, currency, effective_date, \
                                 monetary_impact, line_item_count, version, status, \
                                 submitted_at, review_deadline, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&record.id.0)
    .bind(&record.supplier_id)
    .bind(&record.category)
    .bind(&record.currency)
    .bind(record.effective_date.format("%Y-%m-%d").to_string())
    .bind(record.monetary_impact.to_string())
    .bind(record.line_item_count as i64)
    .bind(record.version as i64)
    .bind(record.status.as_str())
    .bind(record.submitted_at.to_rfc3339())
    .bind(record.review_deadline.to_rfc3339())
    .bind(record.created_at.to_rfc3339())
    .bind(record.updated_at.to_rfc3339())
    .execute(&mut **tx)
    .await?;

    Ok(())
}

async fn update_record(
    tx: &mut Transaction<'_, Sqlite>,
    record: &CostTableRecord,
) -> Result<(), RepositoryError> {
    sqlx::query(
        "UPDATE cost_table SET supplier_id = ?, category = ?, currency = ?, effective_date = ?, \
                               monetary_impact = ?, line_item_count = ?, version = ?, status = ?, \
                               submitted_at = ?, review_deadline = ?, updated_at = ? \
         WHERE id = ?",
    )
    .bind(&record.supplier_id)
    .bind(&record.category)
    .bind(&record.currency)
    .bind(record.effective_date.format("%Y-%m-%d").to_string())
    .bind(record.monetary_impact.to_string())
    .bind(record.line_item_count as i64)
    .bind(record.version as i64)
    .bind(record.status.as_str())
    .bind(record.submitted_at.to_rfc3339())
    .bind(record.review_deadline.to_rfc3339())
    .bind(record.updated_at.to_rfc3339())
    .bind(&record.id.0)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

async fn insert_request(
    tx: &mut Transaction<'_, Sqlite>,
    request: &ApprovalRequest,
) -> Result<(), RepositoryError> {
    sqlx::query(
        "INSERT INTO approval_request (id, cost_table_id, required_role, status, comment, \
                                       decided_by, created_at, due_at, resolved_at, reminded_at, \
                                       state_version) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&request.id.0)
    .bind(&request.cost_table_id.0)
    .bind(&request.required_role)
    .bind(request.status.as_str())
    .bind(&request.comment)
    .bind(&request.decided_by)
    .bind(request.created_at.to_rfc3339())
    .bind(request.due_at.to_rfc3339())
    .bind(request.resolved_at.map(|at| at.to_rfc3339()))
    .bind(request.reminded_at.map(|at| at.to_rfc3339()))
    .bind(request.state_version as i64)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

/// Resolve the pending request under the compare-and-swap guard. Zero rows
/// touched means a concurrent writer won.
async fn resolve_request_guarded(
    tx: &mut Transaction<'_, Sqlite>,
    expected_version: u32,
    request: &ApprovalRequest,
) -> Result<bool, RepositoryError> {
    let result = sqlx::query(
        "UPDATE approval_request SET status = ?, comment = ?, decided_by = ?, resolved_at = ?, \
                                     state_version = ? \
         WHERE id = ? AND status = 'pending' AND state_version = ?",
    )
    .bind(request.status.as_str())
    .bind(&request.comment)
    .bind(&request.decided_by)
    .bind(request.resolved_at.map(|at| at.to_rfc3339()))
    .bind(request.state_version as i64)
    .bind(&request.id.0)
    .bind(expected_version as i64)
    .execute(&mut **tx)
    .await?;

    Ok(result.rows_affected() == 1)
}

async fn insert_audit(
    tx: &mut Transaction<'_, Sqlite>,
    entry: &AuditEntry,
) -> Result<(), RepositoryError> {
    sqlx::query(
        "INSERT INTO audit_log (id, cost_table_id, actor_role, actor_id, action, prior_status, \
                                new_status, comment, occurred_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&entry.id)
    .bind(&entry.cost_table_id.0)
    .bind(&entry.actor.role)
    .bind(&entry.actor.identity)
    .bind(&entry.action)
    .bind(entry.prior_status.map(|status| status.as_str()))
    .bind(entry.new_status.as_str())
    .bind(&entry.comment)
    .bind(entry.occurred_at.to_rfc3339())
    .execute(&mut **tx)
    .await?;

    Ok(())
}

#[async_trait::async_trait]
impl WorkflowRepository for SqlWorkflowRepository {
    async fn insert_submission(
        &self,
        record: &CostTableRecord,
        request: &ApprovalRequest,
        audit: &AuditEntry,
    ) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;
        insert_record(&mut tx, record).await?;
        insert_request(&mut tx, request).await?;
        insert_audit(&mut tx, audit).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn find_record(
        &self,
        id: &CostTableId,
    ) -> Result<Option<CostTableRecord>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM cost_table WHERE id = ?")
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(ref row) => Ok(Some(row_to_record(row)?)),
            None => Ok(None),
        }
    }

    async fn find_request(
        &self,
        id: &ApprovalId,
    ) -> Result<Option<ApprovalRequest>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {REQUEST_COLUMNS} FROM approval_request WHERE id = ?"
        ))
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(ref row) => Ok(Some(row_to_request(row)?)),
            None => Ok(None),
        }
    }

    async fn commit_decision(
        &self,
        expected_version: u32,
        request: &ApprovalRequest,
        record: &CostTableRecord,
        next_request: Option<&ApprovalRequest>,
        audit: &AuditEntry,
    ) -> Result<CommitOutcome, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        if !resolve_request_guarded(&mut tx, expected_version, request).await? {
            tx.rollback().await?;
            return Ok(CommitOutcome::Conflict);
        }

        update_record(&mut tx, record).await?;
        if let Some(next) = next_request {
            insert_request(&mut tx, next).await?;
        }
        insert_audit(&mut tx, audit).await?;
        tx.commit().await?;

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
        let mut tx = self.pool.begin().await?;

        if !resolve_request_guarded(&mut tx, expected_version, request).await? {
            tx.rollback().await?;
            return Ok(CommitOutcome::Conflict);
        }

        if let Some(record) = record {
            update_record(&mut tx, record).await?;
        }
        if let Some(next) = next_request {
            insert_request(&mut tx, next).await?;
        }
        insert_audit(&mut tx, audit).await?;
        tx.commit().await?;

        Ok(CommitOutcome::Committed)
    }

    async fn commit_resubmission(
        &self,
        record: &CostTableRecord,
        request: &ApprovalRequest,
        audit: &AuditEntry,
    ) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;
        update_record(&mut tx, record).await?;
        insert_request(&mut tx, request).await?;
        insert_audit(&mut tx, audit).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn mark_reminded(
        &self,
        id: &ApprovalId,
        reminded_at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            "UPDATE approval_request SET reminded_at = ? WHERE id = ? AND status = 'pending'",
        )
        .bind(reminded_at.to_rfc3339())
        .bind(&id.0)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_pending(
        &self,
        roles: &[String],
    ) -> Result<Vec<ApprovalRequest>, RepositoryError> {
        if roles.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = vec!["?"; roles.len()].join(", ");
        let sql = format!(
            "SELECT {REQUEST_COLUMNS} FROM approval_request \
             WHERE status = 'pending' AND required_role IN ({placeholders}) \
             ORDER BY due_at ASC, id ASC"
        );
        let mut query = sqlx::query(&sql);
        for role in roles {
            query = query.bind(role);
        }

        let rows = query.fetch_all(&self.pool).await?;
        rows.iter().map(row_to_request).collect()
    }

    async fn list_overdue(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<ApprovalRequest>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {REQUEST_COLUMNS} FROM approval_request \
             WHERE status = 'pending' AND due_at < ? \
             ORDER BY due_at ASC, id ASC"
        ))
        .bind(now.to_rfc3339())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_request).collect()
    }

    async fn list_requests_for(
        &self,
        id: &CostTableId,
    ) -> Result<Vec<ApprovalRequest>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {REQUEST_COLUMNS} FROM approval_request \
             WHERE cost_table_id = ? ORDER BY created_at ASC, id ASC"
        ))
        .bind(&id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_request).collect()
    }

    async fn append_audit(&self, entry: &AuditEntry) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;
        insert_audit(&mut tx, entry).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn history(&self, id: &CostTableId) -> Result<Vec<AuditEntry>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT seq, id, cost_table_id, actor_role, actor_id, action, prior_status, \
                    new_status, comment, occurred_at \
             FROM audit_log WHERE cost_table_id = ? ORDER BY occurred_at ASC, seq ASC",
        )
        .bind(&id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_audit).collect()
    }
}
