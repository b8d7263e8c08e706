//! Blocking wait-for-healthy barrier over a set of services.
//!
//! Each service is driven by its own [`ServiceProbe`] on its own poll interval.
//! The gate succeeds once every probe settles healthy and fails on the first
//! probe that settles failed, aborting the rest.

use crate::core::events::{DeploymentEvent, EventBus};
use crate::domain::model::{HealthPolicy, ServiceInstanceState, ServiceSpec};
use crate::domain::outcome::ServiceFailure;
use crate::domain::ports::{AdapterResult, LifecycleAdapter};
use crate::utils::error::Result;
use crate::utils::validation::validate_unique_names;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio::time::{sleep, sleep_until, timeout_at, Instant};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeState {
    Pending { streak: u32 },
    Healthy,
    Failed(ServiceFailure),
}

/// Health state machine for one service.
///
/// Fed one read at a time; settles after `consecutive_successes` healthy reads
/// in a row, on a crash or permanent failure, or when the poll budget runs out.
#[derive(Debug, Clone)]
pub struct ServiceProbe {
    name: String,
    policy: HealthPolicy,
    state: ProbeState,
    polls: u32,
    last_read: Option<ServiceInstanceState>,
}

impl ServiceProbe {
    pub fn new(name: impl Into<String>, policy: HealthPolicy) -> Self {
        Self {
            name: name.into(),
            policy,
            state: ProbeState::Pending { streak: 0 },
            polls: 0,
            last_read: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> &ProbeState {
        &self.state
    }

    pub fn polls(&self) -> u32 {
        self.polls
    }

    pub fn last_read(&self) -> Option<ServiceInstanceState> {
        self.last_read
    }

    pub fn is_settled(&self) -> bool {
        !matches!(self.state, ProbeState::Pending { .. })
    }

    pub fn observe(&mut self, read: AdapterResult<ServiceInstanceState>) -> &ProbeState {
        let ProbeState::Pending { streak } = self.state else {
            return &self.state;
        };
        self.polls += 1;

        self.state = match read {
            Err(e) => ProbeState::Failed(ServiceFailure::Crashed {
                message: e.to_string(),
            }),
            Ok(read) => {
                self.last_read = Some(read);
                match read {
                    ServiceInstanceState::Healthy => {
                        let streak = streak + 1;
                        if streak >= self.policy.consecutive_successes.max(1) {
                            ProbeState::Healthy
                        } else {
                            ProbeState::Pending { streak }
                        }
                    }
                    ServiceInstanceState::Starting | ServiceInstanceState::Unhealthy => {
                        ProbeState::Pending { streak: 0 }
                    }
                    ServiceInstanceState::Failed => ProbeState::Failed(ServiceFailure::Unhealthy),
                    ServiceInstanceState::Absent => ProbeState::Failed(ServiceFailure::Crashed {
                        message: "instance disappeared after create".to_string(),
                    }),
                }
            }
        };

        if !self.is_settled() && self.polls >= self.policy.poll_budget() {
            return self.expire();
        }
        &self.state
    }

    /// Marks the probe timed out unless it already settled.
    pub fn expire(&mut self) -> &ProbeState {
        if !self.is_settled() {
            self.state = ProbeState::Failed(ServiceFailure::HealthTimeout {
                timeout: self.policy.timeout,
                polls: self.polls,
            });
        }
        &self.state
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthTarget {
    pub name: String,
    pub policy: HealthPolicy,
}

impl From<&ServiceSpec> for HealthTarget {
    fn from(spec: &ServiceSpec) -> Self {
        Self {
            name: spec.name.clone(),
            policy: spec.health,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateOutcome {
    /// Services in the order they became healthy.
    AllHealthy(Vec<String>),
    Failed {
        service: String,
        reason: ServiceFailure,
    },
}

pub struct HealthGate {
    adapter: Arc<dyn LifecycleAdapter>,
    events: EventBus,
}

impl HealthGate {
    pub fn new(adapter: Arc<dyn LifecycleAdapter>, events: EventBus) -> Self {
        Self { adapter, events }
    }

    /// Waits until every target is healthy or the first one fails.
    ///
    /// Duplicate names are a configuration error. Dropping the returned future
    /// aborts all outstanding polls.
    pub async fn wait_all(&self, targets: Vec<HealthTarget>) -> Result<GateOutcome> {
        validate_unique_names("health_gate.services", targets.iter().map(|t| t.name.as_str()))?;
        if targets.is_empty() {
            return Ok(GateOutcome::AllHealthy(Vec::new()));
        }

        let mut tasks = JoinSet::new();
        let mut names = HashMap::new();
        for target in targets {
            tracing::debug!(
                "Waiting for {} (interval {:?}, timeout {:?}, successes {})",
                target.name,
                target.policy.interval,
                target.policy.timeout,
                target.policy.consecutive_successes
            );
            let probe = ServiceProbe::new(target.name.clone(), target.policy);
            let handle = tasks.spawn(drive_probe(Arc::clone(&self.adapter), probe));
            names.insert(handle.id(), target.name);
        }

        let mut healthy = Vec::with_capacity(names.len());
        while let Some(joined) = tasks.join_next_with_id().await {
            let (service, state) = match joined {
                Ok((_, probe)) => (probe.name().to_string(), probe.state().clone()),
                Err(e) => {
                    let service = names.get(&e.id()).cloned().unwrap_or_default();
                    let message = format!("health probe task ended abnormally: {}", e);
                    (service, ProbeState::Failed(ServiceFailure::Crashed { message }))
                }
            };

            let failure = match state {
                ProbeState::Healthy => None,
                ProbeState::Failed(reason) => Some(reason),
                ProbeState::Pending { .. } => Some(ServiceFailure::Crashed {
                    message: "health probe stopped before settling".to_string(),
                }),
            };

            match failure {
                None => {
                    tracing::info!("✅ {} is healthy", service);
                    self.events.publish(DeploymentEvent::ServiceHealthy {
                        name: service.clone(),
                    });
                    healthy.push(service);
                }
                Some(reason) => {
                    tracing::error!("❌ {} failed health gate: {}", service, reason);
                    self.events.publish(DeploymentEvent::ServiceFailed {
                        name: service.clone(),
                        reason: reason.to_string(),
                    });
                    tasks.abort_all();
                    return Ok(GateOutcome::Failed { service, reason });
                }
            }
        }

        Ok(GateOutcome::AllHealthy(healthy))
    }
}

async fn drive_probe(adapter: Arc<dyn LifecycleAdapter>, mut probe: ServiceProbe) -> ServiceProbe {
    let interval = probe.policy.interval;
    // A timeout beyond the clock's range leaves only the poll budget in charge.
    let deadline = Instant::now().checked_add(probe.policy.timeout);

    loop {
        let read = match deadline {
            Some(deadline) => timeout_at(deadline, adapter.query_health(probe.name()))
                .await
                .ok(),
            None => Some(adapter.query_health(probe.name()).await),
        };
        match read {
            Some(read) => {
                tracing::trace!(service = probe.name(), read = ?read, "health read");
                probe.observe(read);
            }
            None => {
                probe.expire();
            }
        }
        if probe.is_settled() {
            return probe;
        }

        let now = Instant::now();
        match deadline {
            Some(deadline) if now >= deadline => {
                probe.expire();
                return probe;
            }
            Some(deadline) => {
                let next = now.checked_add(interval).map_or(deadline, |next| next.min(deadline));
                sleep_until(next).await;
            }
            None => sleep(interval).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::ScriptedRuntime;
    use crate::domain::model::ServiceInstanceState::*;
    use crate::domain::model::StartupDescriptor;
    use std::time::Duration;

    fn policy(successes: u32) -> HealthPolicy {
        HealthPolicy::new(Duration::from_secs(1), Duration::from_secs(10), successes)
    }

    #[test]
    fn test_debounce_requires_consecutive_healthy_reads() {
        let mut probe = ServiceProbe::new("app", policy(2));

        assert_eq!(probe.observe(Ok(Healthy)), &ProbeState::Pending { streak: 1 });
        assert_eq!(probe.observe(Ok(Unhealthy)), &ProbeState::Pending { streak: 0 });
        assert_eq!(probe.observe(Ok(Healthy)), &ProbeState::Pending { streak: 1 });
        assert_eq!(probe.observe(Ok(Healthy)), &ProbeState::Healthy);
        assert_eq!(probe.polls(), 4);
    }

    #[test]
    fn test_adapter_error_is_a_crash() {
        let mut probe = ServiceProbe::new("db", policy(1));
        let state = probe.observe(Err(crate::domain::ports::AdapterError::UnknownService {
            service: "db".to_string(),
        }));
        assert!(matches!(state, ProbeState::Failed(ServiceFailure::Crashed { .. })));
    }

    #[test]
    fn test_failed_read_settles_immediately() {
        let mut probe = ServiceProbe::new("db", policy(3));
        probe.observe(Ok(Healthy));
        assert_eq!(
            probe.observe(Ok(Failed)),
            &ProbeState::Failed(ServiceFailure::Unhealthy)
        );
        // Further reads don't move a settled probe.
        probe.observe(Ok(Healthy));
        assert_eq!(probe.polls(), 2);
    }

    #[test]
    fn test_poll_budget_exhaustion_times_out() {
        let mut probe = ServiceProbe::new(
            "slow",
            HealthPolicy::new(Duration::from_secs(1), Duration::from_secs(2), 1),
        );
        probe.observe(Ok(Starting));
        probe.observe(Ok(Starting));
        let state = probe.observe(Ok(Starting)).clone();
        assert_eq!(
            state,
            ProbeState::Failed(ServiceFailure::HealthTimeout {
                timeout: Duration::from_secs(2),
                polls: 3,
            })
        );
    }

    async fn started(runtime: &ScriptedRuntime, name: &str) {
        let spec = ServiceSpec::new(name, StartupDescriptor::image("nginx"), policy(1));
        runtime.create(&spec).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_set_succeeds_immediately() {
        let runtime = Arc::new(ScriptedRuntime::new());
        let gate = HealthGate::new(runtime, EventBus::new());
        assert_eq!(
            gate.wait_all(Vec::new()).await.unwrap(),
            GateOutcome::AllHealthy(Vec::new())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_targets_are_rejected() {
        let runtime = Arc::new(ScriptedRuntime::new());
        let gate = HealthGate::new(runtime, EventBus::new());
        let target = HealthTarget {
            name: "db".to_string(),
            policy: policy(1),
        };
        assert!(gate.wait_all(vec![target.clone(), target]).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_debounced_service_becomes_healthy_on_fourth_read() {
        let runtime = Arc::new(ScriptedRuntime::new());
        runtime.script_health("app", vec![Healthy, Unhealthy, Healthy, Healthy]);
        started(&runtime, "app").await;

        let gate = HealthGate::new(runtime.clone(), EventBus::new());
        let outcome = gate
            .wait_all(vec![HealthTarget {
                name: "app".to_string(),
                policy: policy(2),
            }])
            .await
            .unwrap();

        assert_eq!(outcome, GateOutcome::AllHealthy(vec!["app".to_string()]));
        assert_eq!(runtime.health_reads("app"), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_failure_cancels_remaining_probes() {
        let runtime = Arc::new(ScriptedRuntime::new());
        runtime.script_health("slow", vec![Starting]);
        runtime.script_health("broken", vec![Starting, Failed]);
        started(&runtime, "slow").await;
        started(&runtime, "broken").await;

        let events = EventBus::new();
        let gate = HealthGate::new(runtime.clone(), events.clone());
        let outcome = gate
            .wait_all(vec![
                HealthTarget {
                    name: "slow".to_string(),
                    policy: policy(1),
                },
                HealthTarget {
                    name: "broken".to_string(),
                    policy: policy(1),
                },
            ])
            .await
            .unwrap();

        assert_eq!(
            outcome,
            GateOutcome::Failed {
                service: "broken".to_string(),
                reason: ServiceFailure::Unhealthy,
            }
        );

        let reads_at_failure = runtime.health_reads("slow");
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(runtime.health_reads("slow"), reads_at_failure);
        assert_eq!(
            events.events(),
            vec![DeploymentEvent::ServiceFailed {
                name: "broken".to_string(),
                reason: "reported permanently unhealthy".to_string(),
            }]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_beyond_clock_range_still_polls() {
        let runtime = Arc::new(ScriptedRuntime::new());
        runtime.script_health("db", vec![Starting, Healthy]);
        started(&runtime, "db").await;

        let gate = HealthGate::new(runtime.clone(), EventBus::new());
        let outcome = gate
            .wait_all(vec![HealthTarget {
                name: "db".to_string(),
                policy: HealthPolicy::new(
                    Duration::from_secs(1),
                    Duration::from_secs(i64::MAX as u64),
                    1,
                ),
            }])
            .await
            .unwrap();

        assert_eq!(outcome, GateOutcome::AllHealthy(vec!["db".to_string()]));
        assert_eq!(runtime.health_reads("db"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_service_fails_as_crash() {
        let runtime = Arc::new(ScriptedRuntime::new());
        let gate = HealthGate::new(runtime, EventBus::new());
        let outcome = gate
            .wait_all(vec![HealthTarget {
                name: "ghost".to_string(),
                policy: policy(1),
            }])
            .await
            .unwrap();

        assert!(matches!(
            outcome,
            GateOutcome::Failed {
                reason: ServiceFailure::Crashed { .. },
                ..
            }
        ));
    }
}
