use crate::domain::model::{ServiceInstanceState, ServiceSpec};
use async_trait::async_trait;

pub use crate::utils::error::AdapterError;

pub type AdapterResult<T> = std::result::Result<T, AdapterError>;

/// Boundary to the runtime that owns the actual service instances.
///
/// The engine never touches instances directly; every create, remove and
/// health read goes through this trait.
#[async_trait]
pub trait LifecycleAdapter: Send + Sync {
    /// Removes any instance named `name`. Succeeds when nothing exists.
    async fn ensure_removed(&self, name: &str) -> AdapterResult<()>;

    /// Requests a new instance. Returns once the runtime accepted it, without waiting for health.
    async fn create(&self, spec: &ServiceSpec) -> AdapterResult<()>;

    /// Non-blocking point-in-time read. `UnknownService` after a create signals a crash on start.
    async fn query_health(&self, name: &str) -> AdapterResult<ServiceInstanceState>;

    fn name(&self) -> &str;
}
