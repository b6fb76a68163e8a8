use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::cost_table::{CostTableId, CostTableStatus};

/// Actor attributed to a workflow transition: a reviewer (role + identity)
/// or the escalation sweep acting as `system`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditActor {
    pub role: String,
    pub identity: String,
}

impl AuditActor {
    pub fn reviewer(role: impl Into<String>, identity: impl Into<String>) -> Self {
        Self { role: role.into(), identity: identity.into() }
    }

    pub fn system() -> Self {
        Self { role: "system".to_owned(), identity: "system".to_owned() }
    }
}

/// Append-only record of one workflow transition. Entries are never mutated
/// after creation; `seq` is assigned by the store on insertion and breaks
/// ordering ties between entries with the same timestamp.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: String,
    pub cost_table_id: CostTableId,
    pub actor: AuditActor,
    pub action: String,
    pub prior_status: Option<CostTableStatus>,
    pub new_status: CostTableStatus,
    pub comment: Option<String>,
    pub occurred_at: DateTime<Utc>,
    pub seq: i64,
}

impl AuditEntry {
    pub fn new(
        cost_table_id: CostTableId,
        actor: AuditActor,
        action: impl Into<String>,
        prior_status: Option<CostTableStatus>,
        new_status: CostTableStatus,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            cost_table_id,
            actor,
            action: action.into(),
            prior_status,
            new_status,
            comment: None,
            occurred_at,
            seq: 0,
        }
    }

    pub fn with_comment(mut self, comment: Option<String>) -> Self {
        self.comment = comment;
        self
    }
}

pub mod actions {
    pub const SUBMITTED: &str = "cost_table.submitted";
    pub const RESUBMITTED: &str = "cost_table.resubmitted";
    pub const APPROVED: &str = "approval.approved";
    pub const REJECTED: &str = "approval.rejected";
    pub const ESCALATED: &str = "approval.escalated";
    pub const EXPIRED: &str = "approval.expired";
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use crate::domain::cost_table::{CostTableId, CostTableStatus};

    use super::{actions, AuditActor, AuditEntry};

    #[test]
    fn entries_carry_actor_and_status_transition() {
        let entry = AuditEntry::new(
            CostTableId("ct-9".to_owned()),
            AuditActor::reviewer("category_buyer", "ana.souza"),
            actions::APPROVED,
            Some(CostTableStatus::Submitted),
            CostTableStatus::Approved,
            Utc::now(),
        )
        .with_comment(Some("within category budget".to_owned()));

        assert_eq!(entry.action, "approval.approved");
        assert_eq!(entry.actor.identity, "ana.souza");
        assert_eq!(entry.prior_status, Some(CostTableStatus::Submitted));
        assert_eq!(entry.comment.as_deref(), Some("within category budget"));
    }

    #[test]
    fn system_actor_marks_forced_transitions() {
        let actor = AuditActor::system();
        assert_eq!(actor.role, "system");
        assert_eq!(actor.identity, "system");
    }
}
