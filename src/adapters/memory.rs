//! In-memory runtime with scripted health reads.
//!
//! Instances live in a map keyed by name. Each create restarts that service's
//! health script; once a script is exhausted its last read repeats. A service
//! without a script reads healthy.

use crate::domain::model::{ServiceInstanceState, ServiceSpec};
use crate::domain::ports::{AdapterError, AdapterResult, LifecycleAdapter};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeOp {
    Removed { name: String, existed: bool },
    Created { name: String },
}

#[derive(Debug, Default)]
struct Instance {
    reads: usize,
}

#[derive(Debug, Default)]
struct State {
    instances: HashMap<String, Instance>,
    scripts: HashMap<String, Vec<ServiceInstanceState>>,
    create_failures: HashMap<String, String>,
    remove_failures: HashMap<String, String>,
    create_delays: HashMap<String, Duration>,
    hung_health: HashSet<String>,
    health_reads: HashMap<String, usize>,
    journal: Vec<RuntimeOp>,
}

#[derive(Debug, Default)]
pub struct ScriptedRuntime {
    state: Mutex<State>,
}

impl ScriptedRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn script_health(&self, name: &str, reads: Vec<ServiceInstanceState>) {
        self.lock().scripts.insert(name.to_string(), reads);
    }

    pub fn fail_create(&self, name: &str, message: &str) {
        self.lock()
            .create_failures
            .insert(name.to_string(), message.to_string());
    }

    pub fn fail_remove(&self, name: &str, message: &str) {
        self.lock()
            .remove_failures
            .insert(name.to_string(), message.to_string());
    }

    pub fn delay_create(&self, name: &str, delay: Duration) {
        self.lock().create_delays.insert(name.to_string(), delay);
    }

    /// Health reads for `name` never return.
    pub fn hang_health(&self, name: &str) {
        self.lock().hung_health.insert(name.to_string());
    }

    /// Puts a stale instance in place, as if left over from an earlier run.
    pub fn seed_instance(&self, name: &str) {
        self.lock()
            .instances
            .insert(name.to_string(), Instance::default());
    }

    /// Simulates the runtime losing an instance.
    pub fn kill(&self, name: &str) {
        self.lock().instances.remove(name);
    }

    pub fn is_running(&self, name: &str) -> bool {
        self.lock().instances.contains_key(name)
    }

    pub fn running(&self) -> Vec<String> {
        let mut names: Vec<String> = self.lock().instances.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn health_reads(&self, name: &str) -> usize {
        self.lock().health_reads.get(name).copied().unwrap_or(0)
    }

    pub fn journal(&self) -> Vec<RuntimeOp> {
        self.lock().journal.clone()
    }

    pub fn created(&self) -> Vec<String> {
        self.journal()
            .into_iter()
            .filter_map(|op| match op {
                RuntimeOp::Created { name } => Some(name),
                RuntimeOp::Removed { .. } => None,
            })
            .collect()
    }
}

#[async_trait]
impl LifecycleAdapter for ScriptedRuntime {
    async fn ensure_removed(&self, name: &str) -> AdapterResult<()> {
        let mut state = self.lock();
        if let Some(message) = state.remove_failures.get(name) {
            return Err(AdapterError::failed(name, "remove", message.clone()));
        }
        let existed = state.instances.remove(name).is_some();
        state.journal.push(RuntimeOp::Removed {
            name: name.to_string(),
            existed,
        });
        Ok(())
    }

    async fn create(&self, spec: &ServiceSpec) -> AdapterResult<()> {
        let delay = self.lock().create_delays.get(&spec.name).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.lock();
        if let Some(message) = state.create_failures.get(&spec.name) {
            return Err(AdapterError::failed(&spec.name, "create", message.clone()));
        }
        if state.instances.contains_key(&spec.name) {
            return Err(AdapterError::failed(
                &spec.name,
                "create",
                "an instance with this name is already running",
            ));
        }
        state
            .instances
            .insert(spec.name.clone(), Instance::default());
        state.journal.push(RuntimeOp::Created {
            name: spec.name.clone(),
        });
        Ok(())
    }

    async fn query_health(&self, name: &str) -> AdapterResult<ServiceInstanceState> {
        let hung = self.lock().hung_health.contains(name);
        if hung {
            std::future::pending::<()>().await;
        }

        let mut state = self.lock();
        *state.health_reads.entry(name.to_string()).or_default() += 1;

        let reads = match state.instances.get_mut(name) {
            Some(instance) => {
                instance.reads += 1;
                instance.reads
            }
            None => {
                return Err(AdapterError::UnknownService {
                    service: name.to_string(),
                })
            }
        };

        let read = match state.scripts.get(name) {
            Some(script) if !script.is_empty() => script[(reads - 1).min(script.len() - 1)],
            _ => ServiceInstanceState::Healthy,
        };
        Ok(read)
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::{HealthPolicy, StartupDescriptor};
    use crate::domain::model::ServiceInstanceState::*;

    fn spec(name: &str) -> ServiceSpec {
        ServiceSpec::new(name, StartupDescriptor::image("nginx"), HealthPolicy::default())
    }

    #[tokio::test]
    async fn test_script_repeats_last_read() {
        let runtime = ScriptedRuntime::new();
        runtime.script_health("app", vec![Starting, Healthy]);
        runtime.create(&spec("app")).await.unwrap();

        assert_eq!(runtime.query_health("app").await.unwrap(), Starting);
        assert_eq!(runtime.query_health("app").await.unwrap(), Healthy);
        assert_eq!(runtime.query_health("app").await.unwrap(), Healthy);
        assert_eq!(runtime.health_reads("app"), 3);
    }

    #[tokio::test]
    async fn test_create_over_existing_instance_is_rejected() {
        let runtime = ScriptedRuntime::new();
        runtime.seed_instance("db");
        assert!(runtime.create(&spec("db")).await.is_err());

        runtime.ensure_removed("db").await.unwrap();
        runtime.create(&spec("db")).await.unwrap();
        assert_eq!(runtime.running(), vec!["db".to_string()]);
    }

    #[tokio::test]
    async fn test_remove_of_missing_instance_is_a_no_op() {
        let runtime = ScriptedRuntime::new();
        runtime.ensure_removed("nothing").await.unwrap();
        assert_eq!(
            runtime.journal(),
            vec![RuntimeOp::Removed {
                name: "nothing".to_string(),
                existed: false
            }]
        );
    }

    #[tokio::test]
    async fn test_unknown_service_health_is_an_error() {
        let runtime = ScriptedRuntime::new();
        let err = runtime.query_health("ghost").await.unwrap_err();
        assert!(matches!(err, AdapterError::UnknownService { .. }));
    }
}
