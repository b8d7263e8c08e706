//! Group-ordered plan execution.
//!
//! Groups run strictly one after another. Group `i + 1` is not started until
//! group `i` has passed its health gate, and the first failed group ends the
//! run. The `GroupStarted`/`GroupCompleted` events (and the matching
//! `Processing Group:`/`Group complete:` log lines) are emitted in that order.

use crate::core::events::{DeploymentEvent, EventBus};
use crate::core::group_executor::GroupExecutor;
use crate::domain::model::DeploymentPlan;
use crate::domain::outcome::{GroupResult, Outcome, PlanOutcome, PlanResult};
use crate::domain::ports::LifecycleAdapter;
use crate::utils::error::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{timeout_at, Instant};

/// Time budget for creating one group's services, added to its health timeout
/// when the plan deadline is derived.
pub const DEFAULT_CREATE_ALLOWANCE: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrchestratorState {
    NotStarted,
    /// Remains set if the `run_plan` future is dropped mid-group.
    Running { group_index: usize },
    Succeeded,
    Failed { group_index: usize, reason: String },
}

/// Overall deadline for one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlanDeadline {
    Unbounded,
    Fixed(Duration),
    /// Sum over groups of the slowest health timeout plus the create allowance.
    #[default]
    Derived,
}

pub struct PlanOrchestrator {
    executor: GroupExecutor,
    events: EventBus,
    deadline: PlanDeadline,
    create_allowance: Duration,
    state: OrchestratorState,
}

impl PlanOrchestrator {
    pub fn new(adapter: Arc<dyn LifecycleAdapter>, events: EventBus) -> Self {
        tracing::debug!("Using lifecycle adapter: {}", adapter.name());
        Self {
            executor: GroupExecutor::new(adapter, events.clone()),
            events,
            deadline: PlanDeadline::default(),
            create_allowance: DEFAULT_CREATE_ALLOWANCE,
            state: OrchestratorState::NotStarted,
        }
    }

    pub fn with_deadline(mut self, deadline: PlanDeadline) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn with_create_allowance(mut self, allowance: Duration) -> Self {
        self.create_allowance = allowance;
        self
    }

    pub fn with_max_parallel(mut self, max_parallel: Option<usize>) -> Self {
        self.executor = self.executor.with_max_parallel(max_parallel);
        self
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// State after the last `run_plan`. Progress during a run is reported
    /// through the event bus (`GroupStarted`/`GroupCompleted`).
    pub fn state(&self) -> &OrchestratorState {
        &self.state
    }

    pub fn deadline_for(&self, plan: &DeploymentPlan) -> Option<Duration> {
        match self.deadline {
            PlanDeadline::Unbounded => None,
            PlanDeadline::Fixed(limit) => Some(limit),
            // Saturates to unbounded rather than overflowing.
            PlanDeadline::Derived => plan.groups().iter().try_fold(Duration::ZERO, |total, g| {
                g.max_health_timeout()
                    .checked_add(self.create_allowance)
                    .and_then(|budget| total.checked_add(budget))
            }),
        }
    }

    pub async fn run_plan(&mut self, plan: &DeploymentPlan) -> Result<PlanResult> {
        let started = Instant::now();
        let deadline = self
            .deadline_for(plan)
            .and_then(|limit| started.checked_add(limit).map(|at| (limit, at)));
        let mut groups = Vec::with_capacity(plan.groups().len());

        tracing::info!(
            "🎬 Deploying plan '{}' ({} groups, {} services)",
            plan.name(),
            plan.groups().len(),
            plan.service_count()
        );
        if let Some((limit, _)) = deadline {
            tracing::debug!("Plan deadline: {:?}", limit);
        }
        self.events.publish(DeploymentEvent::PlanStarted {
            plan: plan.name().to_string(),
            groups: plan.groups().len(),
        });

        for (index, group) in plan.groups().iter().enumerate() {
            self.state = OrchestratorState::Running { group_index: index };
            tracing::info!("📦 Processing Group: {}", group.name);
            self.events.publish(DeploymentEvent::GroupStarted {
                name: group.name.clone(),
                index,
            });

            let result = match deadline {
                Some((limit, at)) => match timeout_at(at, self.executor.run_group(group)).await {
                    Ok(result) => result?,
                    Err(_) => {
                        tracing::error!(
                            "⏰ Plan deadline of {:?} exceeded in group {}",
                            limit,
                            group.name
                        );
                        let outcome = PlanOutcome::Timeout {
                            group: group.name.clone(),
                            deadline: limit,
                        };
                        self.events.publish(DeploymentEvent::GroupCompleted {
                            name: group.name.clone(),
                            outcome: Outcome::TimedOut { deadline: limit },
                        });
                        return Ok(self.finish(plan, index, outcome, groups, started));
                    }
                },
                None => self.executor.run_group(group).await?,
            };

            self.events.publish(DeploymentEvent::GroupCompleted {
                name: group.name.clone(),
                outcome: result.outcome(),
            });
            groups.push(result.clone());

            if let GroupResult::Failure {
                group: name,
                service,
                reason,
            } = result
            {
                tracing::error!("❌ Group {} failed at {}: {}", name, service, reason);
                let outcome = PlanOutcome::FailedAt {
                    group: name,
                    service,
                    reason,
                };
                return Ok(self.finish(plan, index, outcome, groups, started));
            }
            tracing::info!("✅ Group complete: {}", group.name);
        }

        let last = plan.groups().len().saturating_sub(1);
        Ok(self.finish(plan, last, PlanOutcome::Succeeded, groups, started))
    }

    fn finish(
        &mut self,
        plan: &DeploymentPlan,
        group_index: usize,
        outcome: PlanOutcome,
        groups: Vec<GroupResult>,
        started: Instant,
    ) -> PlanResult {
        let result = PlanResult {
            plan: plan.name().to_string(),
            outcome,
            groups,
            duration: started.elapsed(),
        };

        let summary = result.summary();
        self.state = match &summary {
            Outcome::Succeeded => OrchestratorState::Succeeded,
            Outcome::Failed { reason, .. } => OrchestratorState::Failed {
                group_index,
                reason: reason.clone(),
            },
            Outcome::TimedOut { deadline } => OrchestratorState::Failed {
                group_index,
                reason: format!("plan deadline of {:?} exceeded", deadline),
            },
        };
        self.events
            .publish(DeploymentEvent::PlanCompleted { outcome: summary });

        if result.is_success() {
            tracing::info!("🎉 Plan '{}' deployed in {:?}", result.plan, result.duration);
        }
        result
    }
}
