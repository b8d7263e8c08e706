pub mod adapters;
pub mod config;
pub mod core;
pub mod domain;
pub mod utils;

#[cfg(feature = "cli")]
pub use config::CliConfig;
pub use config::PlanConfig;

pub use adapters::{DockerAdapter, RetryingAdapter, ScriptedRuntime};
pub use crate::core::events::{DeploymentEvent, EventBus, EventRecord};
pub use crate::core::orchestrator::{OrchestratorState, PlanDeadline, PlanOrchestrator};
pub use domain::model::{
    DeploymentPlan, Group, HealthPolicy, ServiceInstanceState, ServiceSpec, StartupDescriptor,
};
pub use domain::outcome::{GroupResult, PlanOutcome, PlanResult, ServiceFailure};
pub use domain::ports::{AdapterError, LifecycleAdapter};
pub use utils::error::{DeployError, Result};
