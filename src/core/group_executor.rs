use crate::core::events::{DeploymentEvent, EventBus};
use crate::core::health_gate::{GateOutcome, HealthGate, HealthTarget};
use crate::domain::model::{Group, ServiceSpec};
use crate::domain::outcome::{GroupResult, ServiceFailure};
use crate::domain::ports::LifecycleAdapter;
use crate::utils::error::Result;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;

/// Replaces every service of one group, then waits for all of them to be healthy.
///
/// Creation order within the group is unspecified. A failed create stops the
/// group before the health gate runs; siblings already created keep running.
pub struct GroupExecutor {
    adapter: Arc<dyn LifecycleAdapter>,
    gate: HealthGate,
    events: EventBus,
    max_parallel: Option<usize>,
}

impl GroupExecutor {
    pub fn new(adapter: Arc<dyn LifecycleAdapter>, events: EventBus) -> Self {
        Self {
            gate: HealthGate::new(Arc::clone(&adapter), events.clone()),
            adapter,
            events,
            max_parallel: None,
        }
    }

    /// Caps how many remove+create calls run at once. Unbounded by default.
    pub fn with_max_parallel(mut self, max_parallel: Option<usize>) -> Self {
        self.max_parallel = max_parallel.map(|n| n.max(1));
        self
    }

    pub async fn run_group(&self, group: &Group) -> Result<GroupResult> {
        let started = Instant::now();

        if let Some((service, reason)) = self.create_all(group).await {
            return Ok(GroupResult::Failure {
                group: group.name.clone(),
                service,
                reason,
            });
        }

        let targets = group.services.iter().map(HealthTarget::from).collect();
        match self.gate.wait_all(targets).await? {
            GateOutcome::AllHealthy(healthy) => Ok(GroupResult::Success {
                group: group.name.clone(),
                healthy,
                duration: started.elapsed(),
            }),
            GateOutcome::Failed { service, reason } => Ok(GroupResult::Failure {
                group: group.name.clone(),
                service,
                reason,
            }),
        }
    }

    /// Fans out remove+create for every service. Returns the first failure, if any.
    async fn create_all(&self, group: &Group) -> Option<(String, ServiceFailure)> {
        let limiter = self.max_parallel.map(|n| Arc::new(Semaphore::new(n)));
        let mut tasks = JoinSet::new();
        let mut names = HashMap::new();

        for spec in &group.services {
            let adapter = Arc::clone(&self.adapter);
            let limiter = limiter.clone();
            let spec = spec.clone();
            let name = spec.name.clone();

            let handle = tasks.spawn(async move {
                let _permit = match limiter {
                    Some(limiter) => limiter.acquire_owned().await.ok(),
                    None => None,
                };
                let result = replace(adapter.as_ref(), &spec).await;
                (spec.name, result)
            });
            names.insert(handle.id(), name);
        }

        while let Some(joined) = tasks.join_next_with_id().await {
            let (service, result) = match joined {
                Ok((_, outcome)) => outcome,
                Err(e) => {
                    let service = names.get(&e.id()).cloned().unwrap_or_default();
                    let message = format!("create task ended abnormally: {}", e);
                    (service, Err(ServiceFailure::Create { message }))
                }
            };

            match result {
                Ok(()) => {
                    tracing::info!("🚀 {} created", service);
                    self.events.publish(DeploymentEvent::ServiceCreated { name: service });
                }
                Err(reason) => {
                    tracing::error!("❌ {} could not be created: {}", service, reason);
                    self.events.publish(DeploymentEvent::ServiceFailed {
                        name: service.clone(),
                        reason: reason.to_string(),
                    });
                    tasks.abort_all();
                    return Some((service, reason));
                }
            }
        }

        None
    }
}

/// Remove-then-create: a redeploy always replaces, never merges.
async fn replace(
    adapter: &dyn LifecycleAdapter,
    spec: &ServiceSpec,
) -> std::result::Result<(), ServiceFailure> {
    adapter
        .ensure_removed(&spec.name)
        .await
        .map_err(|e| ServiceFailure::Remove {
            message: e.to_string(),
        })?;
    adapter
        .create(spec)
        .await
        .map_err(|e| ServiceFailure::Create {
            message: e.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::{RuntimeOp, ScriptedRuntime};
    use crate::domain::model::{HealthPolicy, ServiceInstanceState, StartupDescriptor};
    use std::time::Duration;

    fn service(name: &str) -> ServiceSpec {
        ServiceSpec::new(
            name,
            StartupDescriptor::image("nginx:alpine"),
            HealthPolicy::new(Duration::from_secs(1), Duration::from_secs(5), 1),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_group_succeeds_when_all_services_healthy() {
        let runtime = Arc::new(ScriptedRuntime::new());
        runtime.script_health(
            "b",
            vec![ServiceInstanceState::Starting, ServiceInstanceState::Healthy],
        );
        let executor = GroupExecutor::new(runtime.clone(), EventBus::new());

        let group = Group::new("Business", vec![service("a"), service("b")]);
        let result = executor.run_group(&group).await.unwrap();

        match result {
            GroupResult::Success { healthy, .. } => {
                assert_eq!(healthy.len(), 2);
                assert!(healthy.contains(&"a".to_string()));
                assert!(healthy.contains(&"b".to_string()));
            }
            other => panic!("expected success, got {:?}", other),
        }
        assert_eq!(runtime.running(), vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_failure_skips_health_gate() {
        let runtime = Arc::new(ScriptedRuntime::new());
        runtime.fail_create("b", "image not found");
        let executor = GroupExecutor::new(runtime.clone(), EventBus::new());

        let group = Group::new("Business", vec![service("b")]);
        let result = executor.run_group(&group).await.unwrap();

        assert!(matches!(
            result,
            GroupResult::Failure {
                reason: ServiceFailure::Create { .. },
                ..
            }
        ));
        assert_eq!(runtime.health_reads("b"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_remove_failure_is_reported_against_service() {
        let runtime = Arc::new(ScriptedRuntime::new());
        runtime.fail_remove("db", "permission denied");
        let executor = GroupExecutor::new(runtime.clone(), EventBus::new());

        let group = Group::new("Foundation", vec![service("db")]);
        let result = executor.run_group(&group).await.unwrap();

        assert_eq!(
            result,
            GroupResult::Failure {
                group: "Foundation".to_string(),
                service: "db".to_string(),
                reason: ServiceFailure::Remove {
                    message: "remove failed for 'db': permission denied".to_string(),
                },
            }
        );
        assert!(runtime.created().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_every_create_is_preceded_by_remove() {
        let runtime = Arc::new(ScriptedRuntime::new());
        runtime.seed_instance("a");
        let executor =
            GroupExecutor::new(runtime.clone(), EventBus::new()).with_max_parallel(Some(1));

        let group = Group::new("Business", vec![service("a"), service("b")]);
        executor.run_group(&group).await.unwrap();

        let journal = runtime.journal();
        for name in ["a", "b"] {
            let removed = journal
                .iter()
                .position(|op| matches!(op, RuntimeOp::Removed { name: n, .. } if n == name))
                .unwrap();
            let created = journal
                .iter()
                .position(|op| matches!(op, RuntimeOp::Created { name: n } if n == name))
                .unwrap();
            assert!(removed < created);
        }
        assert!(journal.contains(&RuntimeOp::Removed {
            name: "a".to_string(),
            existed: true
        }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_creates_run_concurrently() {
        let runtime = Arc::new(ScriptedRuntime::new());
        runtime.delay_create("a", Duration::from_secs(10));
        runtime.delay_create("b", Duration::from_secs(10));
        let executor = GroupExecutor::new(runtime.clone(), EventBus::new());

        let started = Instant::now();
        let group = Group::new("Business", vec![service("a"), service("b")]);
        executor.run_group(&group).await.unwrap();

        assert!(started.elapsed() < Duration::from_secs(20));
    }
}
