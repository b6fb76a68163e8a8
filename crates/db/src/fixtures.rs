//! Deterministic demo dataset for local development and smoke checks.

use chrono::Utc;
use rust_decimal::Decimal;

use costwise_core::domain::cost_table::{CostTableId, CostTableSubmission};
use costwise_core::workflow::{Actor, Decision, WorkflowEngine, WorkflowPolicy};

use crate::repositories::{RepositoryError, WorkflowRepository};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SeedResult {
    pub cost_tables: Vec<CostTableId>,
    pub requests: usize,
    pub audit_entries: usize,
}

/// Three representative flows: a small table waiting on its category buyer,
/// a large table routed straight to the pricing director, and a rejected
/// table ready for resubmission.
pub struct DemoDataset;

impl DemoDataset {
    pub async fn load(repo: &dyn WorkflowRepository) -> Result<SeedResult, RepositoryError> {
        let engine = WorkflowEngine::new(WorkflowPolicy::default());
        let now = Utc::now();
        let mut result = SeedResult::default();

        let small = engine
            .plan_submission(&submission("sup-frescor", "perishables", 40_000), now)
            .expect("demo submission is valid");
        repo.insert_submission(&small.record, &small.request, &small.audit).await?;
        result.cost_tables.push(small.record.id.clone());
        result.requests += 1;
        result.audit_entries += 1;

        let large = engine
            .plan_submission(&submission("sup-horizonte", "electronics", 600_000), now)
            .expect("demo submission is valid");
        repo.insert_submission(&large.record, &large.request, &large.audit).await?;
        result.cost_tables.push(large.record.id.clone());
        result.requests += 1;
        result.audit_entries += 1;

        let rejected = engine
            .plan_submission(&submission("sup-aurora", "packaging", 80_000), now)
            .expect("demo submission is valid");
        repo.insert_submission(&rejected.record, &rejected.request, &rejected.audit).await?;
        let decision = engine
            .plan_decision(
                &rejected.record,
                &rejected.request,
                &Actor::new("demo.analyst", "pricing_analyst"),
                Decision::Reject,
                Some("unit costs above the negotiated ceiling".to_owned()),
                now,
            )
            .expect("demo rejection is valid");
        repo.commit_decision(
            decision.expected_version,
            &decision.request,
            &decision.record,
            decision.next_request.as_ref(),
            &decision.audit,
        )
        .await?;
        result.cost_tables.push(rejected.record.id.clone());
        result.requests += 1;
        result.audit_entries += 2;

        Ok(result)
    }
}

fn submission(supplier_id: &str, category: &str, amount: i64) -> CostTableSubmission {
    CostTableSubmission {
        supplier_id: supplier_id.to_owned(),
        category: category.to_owned(),
        currency: "BRL".to_owned(),
        effective_date: Utc::now().date_naive(),
        monetary_impact: Decimal::from(amount),
        line_item_count: 64,
    }
}

#[cfg(test)]
mod tests {
    use costwise_core::domain::cost_table::CostTableStatus;

    use super::DemoDataset;
    use crate::repositories::{InMemoryWorkflowRepository, WorkflowRepository};

    #[tokio::test]
    async fn demo_dataset_loads_three_flows() {
        let repo = InMemoryWorkflowRepository::default();
        let result = DemoDataset::load(&repo).await.expect("seed");

        assert_eq!(result.cost_tables.len(), 3);
        assert_eq!(result.requests, 3);
        assert_eq!(result.audit_entries, 4);

        let rejected = repo
            .find_record(&result.cost_tables[2])
            .await
            .expect("find")
            .expect("rejected record exists");
        assert_eq!(rejected.status, CostTableStatus::Rejected);
    }
}
