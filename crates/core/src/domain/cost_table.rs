use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CostTableId(pub String);

/// Lifecycle of a submitted cost table. Review stages are ordered; the three
/// terminal states admit no further transitions except `Rejected ->
/// Submitted` on resubmission.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CostTableStatus {
    Submitted,
    UnderReview,
    PricingAnalysis,
    CommercialReview,
    DirectorReview,
    VpReview,
    Approved,
    Rejected,
    Expired,
}

impl CostTableStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Approved | Self::Rejected | Self::Expired)
    }

    fn stage_order(self) -> Option<u8> {
        match self {
            Self::Submitted => Some(0),
            Self::UnderReview => Some(1),
            Self::PricingAnalysis => Some(2),
            Self::CommercialReview => Some(3),
            Self::DirectorReview => Some(4),
            Self::VpReview => Some(5),
            Self::Approved | Self::Rejected | Self::Expired => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Submitted => "submitted",
            Self::UnderReview => "under_review",
            Self::PricingAnalysis => "pricing_analysis",
            Self::CommercialReview => "commercial_review",
            Self::DirectorReview => "director_review",
            Self::VpReview => "vp_review",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Expired => "expired",
        }
    }
}

impl std::str::FromStr for CostTableStatus {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "submitted" => Ok(Self::Submitted),
            "under_review" => Ok(Self::UnderReview),
            "pricing_analysis" => Ok(Self::PricingAnalysis),
            "commercial_review" => Ok(Self::CommercialReview),
            "director_review" => Ok(Self::DirectorReview),
            "vp_review" => Ok(Self::VpReview),
            "approved" => Ok(Self::Approved),
            "rejected" => Ok(Self::Rejected),
            "expired" => Ok(Self::Expired),
            other => Err(DomainError::UnknownStatus { status: other.to_owned() }),
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("invalid cost table transition from {from:?} to {to:?}")]
    InvalidTransition { from: CostTableStatus, to: CostTableStatus },
    #[error("unknown cost table status `{status}`")]
    UnknownStatus { status: String },
}

/// The structured payload the (external) spreadsheet ingestion step hands to
/// the engine. The engine never sees the uploaded file itself.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CostTableSubmission {
    pub supplier_id: String,
    pub category: String,
    pub currency: String,
    pub effective_date: NaiveDate,
    pub monetary_impact: Decimal,
    pub line_item_count: u32,
}

/// A cost table under review. Owned by the workflow engine once submitted;
/// only `status` and `version` ever change, and only through the engine.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CostTableRecord {
    pub id: CostTableId,
    pub supplier_id: String,
    pub category: String,
    pub currency: String,
    pub effective_date: NaiveDate,
    pub monetary_impact: Decimal,
    pub line_item_count: u32,
    pub version: u32,
    pub status: CostTableStatus,
    pub submitted_at: DateTime<Utc>,
    pub review_deadline: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CostTableRecord {
    pub fn can_transition_to(&self, next: CostTableStatus) -> bool {
        if self.status == CostTableStatus::Rejected && next == CostTableStatus::Submitted {
            return true;
        }

        match (self.status.stage_order(), next.stage_order()) {
            // Forward-only through the review stages. Equal is allowed: two
            // adjacent tiers can share a stage (both director tiers review
            // under `director_review`).
            (Some(current), Some(target)) => target >= current,
            // Any live stage may terminate.
            (Some(_), None) => true,
            (None, _) => false,
        }
    }

    pub fn transition_to(
        &mut self,
        next: CostTableStatus,
        now: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        if !self.can_transition_to(next) {
            return Err(DomainError::InvalidTransition { from: self.status, to: next });
        }
        self.status = next;
        self.updated_at = now;
        Ok(())
    }

    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        !self.status.is_terminal() && now > self.review_deadline
    }
}
