pub mod scheduler;
pub mod service;

pub use scheduler::{EscalationScheduler, SweepReport};
pub use service::{DecisionOutcome, ServiceError, SharedPolicy, WorkflowService};
