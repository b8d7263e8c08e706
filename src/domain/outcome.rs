//! Write-once outcome records produced by the group executor and plan orchestrator.

use crate::utils::error::{DeployError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Why a single service did not make it to healthy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ServiceFailure {
    Remove { message: String },
    Create { message: String },
    Crashed { message: String },
    Unhealthy,
    HealthTimeout { timeout: Duration, polls: u32 },
}

impl fmt::Display for ServiceFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Remove { message } => {
                write!(f, "removal of previous instance failed: {}", message)
            }
            Self::Create { message } => write!(f, "create failed: {}", message),
            Self::Crashed { message } => write!(f, "crashed after start: {}", message),
            Self::Unhealthy => f.write_str("reported permanently unhealthy"),
            Self::HealthTimeout { timeout, polls } => {
                write!(f, "health timeout after {:?} ({} polls)", timeout, polls)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupResult {
    Success {
        group: String,
        healthy: Vec<String>,
        duration: Duration,
    },
    Failure {
        group: String,
        service: String,
        reason: ServiceFailure,
    },
}

impl GroupResult {
    pub fn group(&self) -> &str {
        match self {
            Self::Success { group, .. } | Self::Failure { group, .. } => group,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn outcome(&self) -> Outcome {
        match self {
            Self::Success { .. } => Outcome::Succeeded,
            Self::Failure { service, reason, .. } => Outcome::Failed {
                service: Some(service.clone()),
                reason: reason.to_string(),
            },
        }
    }

    pub fn into_error(self) -> Option<DeployError> {
        match self {
            Self::Success { .. } => None,
            Self::Failure {
                group,
                service,
                reason,
            } => Some(DeployError::GroupFailure {
                group,
                service,
                reason,
            }),
        }
    }
}

/// Serializable summary used in the event stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Succeeded,
    Failed {
        service: Option<String>,
        reason: String,
    },
    TimedOut {
        deadline: Duration,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanOutcome {
    Succeeded,
    FailedAt {
        group: String,
        service: String,
        reason: ServiceFailure,
    },
    Timeout {
        group: String,
        deadline: Duration,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanResult {
    pub plan: String,
    pub outcome: PlanOutcome,
    /// Results of every group that was started, in plan order.
    pub groups: Vec<GroupResult>,
    pub duration: Duration,
}

impl PlanResult {
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, PlanOutcome::Succeeded)
    }

    pub fn failed_group(&self) -> Option<&str> {
        match &self.outcome {
            PlanOutcome::Succeeded => None,
            PlanOutcome::FailedAt { group, .. } | PlanOutcome::Timeout { group, .. } => Some(group),
        }
    }

    pub fn summary(&self) -> Outcome {
        match &self.outcome {
            PlanOutcome::Succeeded => Outcome::Succeeded,
            PlanOutcome::FailedAt {
                service, reason, ..
            } => Outcome::Failed {
                service: Some(service.clone()),
                reason: reason.to_string(),
            },
            PlanOutcome::Timeout { deadline, .. } => Outcome::TimedOut {
                deadline: *deadline,
            },
        }
    }

    pub fn into_result(self) -> Result<()> {
        match self.outcome {
            PlanOutcome::Succeeded => Ok(()),
            PlanOutcome::FailedAt {
                group,
                service,
                reason,
            } => Err(DeployError::PlanFailure {
                group: group.clone(),
                source: Box::new(DeployError::GroupFailure {
                    group,
                    service,
                    reason,
                }),
            }),
            PlanOutcome::Timeout { group, deadline } => {
                Err(DeployError::PlanTimeout { group, deadline })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failed_plan_maps_to_plan_failure() {
        let result = PlanResult {
            plan: "demo".to_string(),
            outcome: PlanOutcome::FailedAt {
                group: "Business".to_string(),
                service: "svc_c".to_string(),
                reason: ServiceFailure::HealthTimeout {
                    timeout: Duration::from_secs(3),
                    polls: 4,
                },
            },
            groups: Vec::new(),
            duration: Duration::from_secs(5),
        };

        assert_eq!(result.failed_group(), Some("Business"));
        match result.into_result() {
            Err(DeployError::PlanFailure { group, source }) => {
                assert_eq!(group, "Business");
                assert!(matches!(*source, DeployError::GroupFailure { .. }));
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_group_failure_outcome_names_service() {
        let result = GroupResult::Failure {
            group: "Foundation".to_string(),
            service: "db".to_string(),
            reason: ServiceFailure::Unhealthy,
        };

        assert_eq!(
            result.outcome(),
            Outcome::Failed {
                service: Some("db".to_string()),
                reason: "reported permanently unhealthy".to_string(),
            }
        );
    }
}
