use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{Duration, NaiveDate, Utc};
use rust_decimal::Decimal;

use costwise_core::config::WorkflowConfig;
use costwise_core::domain::approval::ApprovalStatus;
use costwise_core::domain::cost_table::{CostTableStatus, CostTableSubmission};
use costwise_core::workflow::{Actor, Decision, WorkflowError};
use costwise_db::repositories::InMemoryWorkflowRepository;
use costwise_engine::{EscalationScheduler, ServiceError, SharedPolicy, WorkflowService};

fn submission(amount: i64) -> CostTableSubmission {
    CostTableSubmission {
        supplier_id: "sup-acme".to_owned(),
        category: "perishables".to_owned(),
        currency: "BRL".to_owned(),
        effective_date: NaiveDate::from_ymd_opt(2026, 9, 1).expect("valid date"),
        monetary_impact: Decimal::from(amount),
        line_item_count: 120,
    }
}

fn service() -> (Arc<InMemoryWorkflowRepository>, WorkflowService<InMemoryWorkflowRepository>) {
    let repo = Arc::new(InMemoryWorkflowRepository::default());
    let service = WorkflowService::new(Arc::clone(&repo), SharedPolicy::default());
    (repo, service)
}

#[tokio::test]
async fn small_table_is_approved_in_a_single_stage() {
    let (_, service) = service();

    let record_id = service.submit(&submission(40_000)).await.expect("submit");

    let queue = service.list_pending("category_buyer").await.expect("queue");
    assert_eq!(queue.len(), 1);
    assert_eq!(queue[0].required_role, "category_buyer");

    let outcome = service
        .decide(
            &queue[0].id,
            &Actor::new("ana.souza", "category_buyer"),
            Decision::Approve,
            Some("within category budget".to_owned()),
        )
        .await
        .expect("decide");

    assert_eq!(outcome.record.status, CostTableStatus::Approved);
    assert_eq!(outcome.request.status, ApprovalStatus::Approved);
    assert!(outcome.next_request.is_none());

    let history = service.history(&record_id).await.expect("history");
    let actions: Vec<_> = history.iter().map(|entry| entry.action.as_str()).collect();
    assert_eq!(actions, vec!["cost_table.submitted", "approval.approved"]);
}

#[tokio::test]
async fn large_table_routes_high_and_rejects_underranked_reviewers() {
    let (_, service) = service();

    service.submit(&submission(600_000)).await.expect("submit");

    let queue = service.list_pending("admin").await.expect("queue");
    assert_eq!(queue.len(), 1);
    assert_eq!(queue[0].required_role, "pricing_director");

    // A commercial manager sees nothing to act on and cannot decide it.
    let manager_queue = service.list_pending("commercial_manager").await.expect("queue");
    assert!(manager_queue.is_empty());

    let error = service
        .decide(
            &queue[0].id,
            &Actor::new("bruno.lima", "commercial_manager"),
            Decision::Approve,
            None,
        )
        .await
        .expect_err("underranked reviewer must fail");
    assert!(matches!(error, ServiceError::Workflow(WorkflowError::Unauthorized { .. })));
}

#[tokio::test]
async fn decide_is_exactly_once_under_concurrent_callers() {
    let (_, service) = service();
    let service = Arc::new(service);

    service.submit(&submission(40_000)).await.expect("submit");
    let queue = service.list_pending("category_buyer").await.expect("queue");
    let request_id = queue[0].id.clone();

    let approve = {
        let service = Arc::clone(&service);
        let request_id = request_id.clone();
        tokio::spawn(async move {
            service
                .decide(
                    &request_id,
                    &Actor::new("ana.souza", "category_buyer"),
                    Decision::Approve,
                    None,
                )
                .await
        })
    };
    let reject = {
        let service = Arc::clone(&service);
        let request_id = request_id.clone();
        tokio::spawn(async move {
            service
                .decide(
                    &request_id,
                    &Actor::new("bruno.lima", "pricing_analyst"),
                    Decision::Reject,
                    None,
                )
                .await
        })
    };

    let (approve, reject) = tokio::join!(approve, reject);
    let results = [approve.expect("join"), reject.expect("join")];

    let successes = results.iter().filter(|result| result.is_ok()).count();
    assert_eq!(successes, 1, "exactly one caller must win");

    let loser = results
        .iter()
        .find_map(|result| result.as_ref().err())
        .expect("exactly one caller must lose");
    assert!(matches!(
        loser,
        ServiceError::Workflow(
            WorkflowError::AlreadyResolved { .. } | WorkflowError::ConcurrentModification { .. }
        )
    ));
}

#[tokio::test]
async fn double_decide_after_resolution_reports_already_resolved() {
    let (_, service) = service();

    service.submit(&submission(40_000)).await.expect("submit");
    let queue = service.list_pending("category_buyer").await.expect("queue");
    let actor = Actor::new("ana.souza", "category_buyer");

    service.decide(&queue[0].id, &actor, Decision::Approve, None).await.expect("first");
    let error = service
        .decide(&queue[0].id, &actor, Decision::Approve, None)
        .await
        .expect_err("second decision must fail");
    assert!(matches!(
        error,
        ServiceError::Workflow(WorkflowError::AlreadyResolved { .. })
    ));
}

#[tokio::test]
async fn sweep_escalates_forward_and_is_idempotent() {
    let (repo, service) = service();
    let scheduler = EscalationScheduler::new(
        Arc::clone(&repo),
        service.policy().clone(),
        StdDuration::from_secs(86_400),
    );

    let record_id = service.submit(&submission(40_000)).await.expect("submit");
    let later = Utc::now() + Duration::days(3);

    let first = scheduler.sweep_at(later, None).await.expect("first sweep");
    assert_eq!(first.scanned, 1);
    assert_eq!(first.escalated, 1);
    assert_eq!(first.expired, 0);

    // The record is mid-chain, not terminal, and exactly one request is
    // pending at the next tier.
    let record = service.record(&record_id).await.expect("record");
    assert_eq!(record.status, CostTableStatus::Submitted);
    let queue = service.list_pending("pricing_analyst").await.expect("queue");
    assert_eq!(queue.len(), 1);
    assert_eq!(queue[0].required_role, "pricing_analyst");

    // Replaying the sweep at the same instant finds nothing new to do.
    let second = scheduler.sweep_at(later, None).await.expect("second sweep");
    assert_eq!(second.escalated, 0);
    assert_eq!(second.expired, 0);

    let history = service.history(&record_id).await.expect("history");
    let escalations =
        history.iter().filter(|entry| entry.action == "approval.escalated").count();
    assert_eq!(escalations, 1);
}

#[tokio::test]
async fn sweep_expires_terminally_at_the_top_tier() {
    let (repo, service) = service();
    let scheduler = EscalationScheduler::new(
        Arc::clone(&repo),
        service.policy().clone(),
        StdDuration::from_secs(86_400),
    );

    let record_id = service.submit(&submission(10_000_000)).await.expect("submit");

    let report =
        scheduler.sweep_at(Utc::now() + Duration::days(8), None).await.expect("sweep");
    assert_eq!(report.expired, 1);
    assert_eq!(report.escalated, 0);

    let record = service.record(&record_id).await.expect("record");
    assert_eq!(record.status, CostTableStatus::Expired);
}

#[tokio::test]
async fn reloading_the_policy_switches_escalation_off() {
    let (repo, service) = service();
    let scheduler = EscalationScheduler::new(
        Arc::clone(&repo),
        service.policy().clone(),
        StdDuration::from_secs(86_400),
    );

    let record_id = service.submit(&submission(40_000)).await.expect("submit");

    let reloaded = WorkflowConfig { auto_escalate: false, ..WorkflowConfig::default() };
    service.policy().reload(&reloaded).expect("reload");

    let report =
        scheduler.sweep_at(Utc::now() + Duration::days(3), None).await.expect("sweep");
    assert_eq!(report.expired, 1);
    assert_eq!(report.escalated, 0);

    let record = service.record(&record_id).await.expect("record");
    assert_eq!(record.status, CostTableStatus::Expired);
}

#[tokio::test]
async fn sweep_flags_each_reminder_exactly_once() {
    let (repo, service) = service();
    let scheduler = EscalationScheduler::new(
        Arc::clone(&repo),
        service.policy().clone(),
        StdDuration::from_secs(86_400),
    );

    service.submit(&submission(40_000)).await.expect("submit");

    // Inside the 24h reminder window of the 2-day buyer deadline, but not
    // yet overdue.
    let inside_window = Utc::now() + Duration::hours(36);
    let first = scheduler.sweep_at(inside_window, None).await.expect("first sweep");
    assert_eq!(first.reminders, 1);
    assert_eq!(first.scanned, 0);

    let second = scheduler.sweep_at(inside_window, None).await.expect("second sweep");
    assert_eq!(second.reminders, 0);
}

#[tokio::test]
async fn rejected_tables_resubmit_with_fresh_routing() {
    let (_, service) = service();

    let record_id = service.submit(&submission(80_000)).await.expect("submit");
    let queue = service.list_pending("pricing_analyst").await.expect("queue");
    service
        .decide(
            &queue[0].id,
            &Actor::new("bruno.lima", "pricing_analyst"),
            Decision::Reject,
            Some("costs above the negotiated ceiling".to_owned()),
        )
        .await
        .expect("reject");

    let resubmitted_id =
        service.resubmit(&record_id, &submission(600_000)).await.expect("resubmit");
    assert_eq!(resubmitted_id, record_id);

    let record = service.record(&record_id).await.expect("record");
    assert_eq!(record.version, 2);
    assert_eq!(record.status, CostTableStatus::Submitted);

    let queue = service.list_pending("admin").await.expect("queue");
    assert_eq!(queue.len(), 1);
    assert_eq!(queue[0].required_role, "pricing_director");

    let history = service.history(&record_id).await.expect("history");
    let actions: Vec<_> = history.iter().map(|entry| entry.action.as_str()).collect();
    assert_eq!(
        actions,
        vec!["cost_table.submitted", "approval.rejected", "cost_table.resubmitted"]
    );
}

#[tokio::test]
async fn unknown_caller_role_cannot_list_the_queue() {
    let (_, service) = service();

    let error = service.list_pending("intern").await.expect_err("unknown role");
    assert!(matches!(
        error,
        ServiceError::Workflow(WorkflowError::UnknownRole { .. })
    ));
}

#[tokio::test]
async fn resubmitting_a_live_record_is_an_invalid_state() {
    let (_, service) = service();

    let record_id = service.submit(&submission(40_000)).await.expect("submit");
    let error = service
        .resubmit(&record_id, &submission(30_000))
        .await
        .expect_err("live record must not resubmit");
    assert!(matches!(
        error,
        ServiceError::Workflow(WorkflowError::InvalidState { .. })
    ));
}
