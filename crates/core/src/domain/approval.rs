use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::cost_table::CostTableId;

/// How long before `due_at` a pending request becomes a reminder candidate.
pub const REMINDER_WINDOW_HOURS: i64 = 24;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ApprovalId(pub String);

impl fmt::Display for ApprovalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
    Expired,
}

impl ApprovalStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Expired => "expired",
        }
    }
}

/// One decision point for a cost table at a specific role tier.
///
/// At most one request per cost table is `Pending` at any instant. Resolved
/// requests are never deleted; they remain as history. `state_version` is the
/// optimistic-locking token: every committed mutation increments it, and
/// commits are guarded on the value the writer observed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub id: ApprovalId,
    pub cost_table_id: CostTableId,
    pub required_role: String,
    pub status: ApprovalStatus,
    pub comment: Option<String>,
    pub decided_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub due_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub reminded_at: Option<DateTime<Utc>>,
    pub state_version: u32,
}

impl ApprovalRequest {
    pub fn is_pending(&self) -> bool {
        self.status == ApprovalStatus::Pending
    }

    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.is_pending() && now > self.due_at
    }

    /// Pending, inside the reminder window, and not yet reminded since the
    /// window opened.
    pub fn needs_reminder(&self, now: DateTime<Utc>) -> bool {
        if !self.is_pending() {
            return false;
        }

        let window_opens = self.due_at - Duration::hours(REMINDER_WINDOW_HOURS);
        if now < window_opens {
            return false;
        }

        match self.reminded_at {
            Some(reminded_at) => reminded_at < window_opens,
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use crate::domain::cost_table::CostTableId;

    use super::{ApprovalId, ApprovalRequest, ApprovalStatus};

    fn request(status: ApprovalStatus, due_in_hours: i64) -> ApprovalRequest {
        let now = Utc::now();
        ApprovalRequest {
            id: ApprovalId("apr-1".to_owned()),
            cost_table_id: CostTableId("ct-1".to_owned()),
            required_role: "category_buyer".to_owned(),
            status,
            comment: None,
            decided_by: None,
            created_at: now,
            due_at: now + Duration::hours(due_in_hours),
            resolved_at: None,
            reminded_at: None,
            state_version: 1,
        }
    }

    #[test]
    fn overdue_requires_pending_and_elapsed_deadline() {
        let now = Utc::now();

        assert!(request(ApprovalStatus::Pending, -1).is_overdue(now));
        assert!(!request(ApprovalStatus::Pending, 1).is_overdue(now));
        assert!(!request(ApprovalStatus::Expired, -1).is_overdue(now));
    }

    #[test]
    fn reminder_window_opens_a_day_before_the_deadline() {
        let now = Utc::now();

        assert!(request(ApprovalStatus::Pending, 12).needs_reminder(now));
        assert!(!request(ApprovalStatus::Pending, 48).needs_reminder(now));
        // Past-due requests still qualify until the sweep resolves them.
        assert!(request(ApprovalStatus::Pending, -2).needs_reminder(now));
        assert!(!request(ApprovalStatus::Approved, 12).needs_reminder(now));
    }

    #[test]
    fn reminder_is_flagged_once_per_window() {
        let now = Utc::now();
        let mut request = request(ApprovalStatus::Pending, 12);

        request.reminded_at = Some(now - Duration::hours(1));
        assert!(!request.needs_reminder(now));

        // A reminder sent before the window opened does not count.
        request.reminded_at = Some(request.due_at - Duration::hours(30));
        assert!(request.needs_reminder(now));
    }
}
