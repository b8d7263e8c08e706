pub mod events;
pub mod group_executor;
pub mod health_gate;
pub mod orchestrator;

pub use crate::domain::model::{DeploymentPlan, Group, HealthPolicy, ServiceSpec};
pub use crate::domain::outcome::{GroupResult, PlanOutcome, PlanResult};
pub use crate::domain::ports::LifecycleAdapter;
pub use crate::utils::error::Result;
