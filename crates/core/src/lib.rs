pub mod audit;
pub mod config;
pub mod domain;
pub mod hierarchy;
pub mod workflow;

pub use audit::{AuditActor, AuditEntry};
pub use domain::approval::{ApprovalId, ApprovalRequest, ApprovalStatus};
pub use domain::cost_table::{
    CostTableId, CostTableRecord, CostTableStatus, CostTableSubmission,
};
pub use hierarchy::{HierarchyError, RoleHierarchy, RoleTier};
pub use workflow::{
    Actor, Decision, DecisionPlan, EscalationPlan, ResubmissionPlan, SubmissionPlan,
    WorkflowEngine, WorkflowError, WorkflowPolicy,
};
