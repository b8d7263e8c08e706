use crate::utils::error::{DeployError, Result};
use crate::utils::validation::{
    validate_non_empty_string, validate_non_zero_duration, validate_positive_number,
    validate_unique_names,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// How a service instance is started. Opaque to the engine, interpreted by adapters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StartupDescriptor {
    Image {
        image: String,
        #[serde(default)]
        ports: Vec<String>,
        #[serde(default)]
        env: BTreeMap<String, String>,
        #[serde(default)]
        command: Vec<String>,
        #[serde(default)]
        health_cmd: Option<String>,
    },
    RawCommand {
        command: String,
    },
}

impl StartupDescriptor {
    pub fn image(image: impl Into<String>) -> Self {
        Self::Image {
            image: image.into(),
            ports: Vec::new(),
            env: BTreeMap::new(),
            command: Vec::new(),
            health_cmd: None,
        }
    }

    pub fn raw_command(command: impl Into<String>) -> Self {
        Self::RawCommand {
            command: command.into(),
        }
    }

    fn validate(&self, service: &str) -> Result<()> {
        match self {
            Self::Image { image, .. } => {
                validate_non_empty_string(&format!("services.{}.startup.image", service), image)
            }
            Self::RawCommand { command } => validate_non_empty_string(
                &format!("services.{}.startup.command", service),
                command,
            ),
        }
    }
}

/// Health polling policy for a single service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthPolicy {
    pub interval: Duration,
    pub timeout: Duration,
    pub consecutive_successes: u32,
}

impl Default for HealthPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            timeout: Duration::from_secs(60),
            consecutive_successes: 1,
        }
    }
}

impl HealthPolicy {
    pub fn new(interval: Duration, timeout: Duration, consecutive_successes: u32) -> Self {
        Self {
            interval,
            timeout,
            consecutive_successes,
        }
    }

    /// Upper bound on reads: one at start plus one per interval until the timeout.
    pub fn poll_budget(&self) -> u32 {
        if self.interval.is_zero() {
            return 1;
        }
        let ticks = self.timeout.as_nanos().div_ceil(self.interval.as_nanos());
        u32::try_from(ticks).unwrap_or(u32::MAX).saturating_add(1)
    }

    pub fn validate(&self, service: &str) -> Result<()> {
        validate_non_zero_duration(
            &format!("services.{}.health.interval", service),
            self.interval,
        )?;
        validate_positive_number(
            &format!("services.{}.health.consecutive_successes", service),
            u64::from(self.consecutive_successes),
            1,
        )?;
        if self.timeout < self.interval {
            return Err(DeployError::invalid_value(
                &format!("services.{}.health.timeout", service),
                format!("{:?}", self.timeout),
                format!("Timeout must be at least the poll interval ({:?})", self.interval),
            ));
        }
        if self.consecutive_successes > self.poll_budget() {
            return Err(DeployError::invalid_value(
                &format!("services.{}.health.consecutive_successes", service),
                self.consecutive_successes,
                format!(
                    "Only {} health reads fit in {:?} at {:?} intervals",
                    self.poll_budget(),
                    self.timeout,
                    self.interval
                ),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceSpec {
    pub name: String,
    pub startup: StartupDescriptor,
    pub health: HealthPolicy,
}

impl ServiceSpec {
    pub fn new(name: impl Into<String>, startup: StartupDescriptor, health: HealthPolicy) -> Self {
        Self {
            name: name.into(),
            startup,
            health,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Group {
    pub name: String,
    pub services: Vec<ServiceSpec>,
}

impl Group {
    pub fn new(name: impl Into<String>, services: Vec<ServiceSpec>) -> Self {
        Self {
            name: name.into(),
            services,
        }
    }

    pub fn service_names(&self) -> impl Iterator<Item = &str> {
        self.services.iter().map(|s| s.name.as_str())
    }

    /// Longest health timeout in the group; the gate waits for the slowest service.
    pub fn max_health_timeout(&self) -> Duration {
        self.services
            .iter()
            .map(|s| s.health.timeout)
            .max()
            .unwrap_or_default()
    }
}

/// Ordered, validated sequence of groups. Read-only once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentPlan {
    name: String,
    groups: Vec<Group>,
}

impl DeploymentPlan {
    pub fn new(name: impl Into<String>, groups: Vec<Group>) -> Result<Self> {
        let plan = Self {
            name: name.into(),
            groups,
        };
        plan.validate()?;
        Ok(plan)
    }

    fn validate(&self) -> Result<()> {
        validate_non_empty_string("plan.name", &self.name)?;
        if self.groups.is_empty() {
            return Err(DeployError::config(format!(
                "Plan '{}' contains no groups",
                self.name
            )));
        }

        for group in &self.groups {
            validate_non_empty_string("groups.name", &group.name)?;
            if group.services.is_empty() {
                return Err(DeployError::config(format!(
                    "Group '{}' contains no services",
                    group.name
                )));
            }
            for service in &group.services {
                validate_non_empty_string("services.name", &service.name)?;
                service.startup.validate(&service.name)?;
                service.health.validate(&service.name)?;
            }
        }

        validate_unique_names("groups.name", self.groups.iter().map(|g| g.name.as_str()))?;
        validate_unique_names("services.name", self.groups.iter().flat_map(Group::service_names))?;
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn groups(&self) -> &[Group] {
        &self.groups
    }

    pub fn group(&self, name: &str) -> Option<&Group> {
        self.groups.iter().find(|g| g.name == name)
    }

    pub fn service_count(&self) -> usize {
        self.groups.iter().map(|g| g.services.len()).sum()
    }

    /// Keeps only the groups accepted by `keep`, preserving plan order.
    pub fn retain_groups<F>(&self, mut keep: F) -> Result<Self>
    where
        F: FnMut(&Group) -> bool,
    {
        let groups = self.groups.iter().filter(|g| keep(g)).cloned().collect();
        Self::new(self.name.clone(), groups)
    }
}

/// Point-in-time state of one running instance as reported by the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceInstanceState {
    Absent,
    Starting,
    Healthy,
    Unhealthy,
    Failed,
}

impl fmt::Display for ServiceInstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Absent => "absent",
            Self::Starting => "starting",
            Self::Healthy => "healthy",
            Self::Unhealthy => "unhealthy",
            Self::Failed => "failed",
        };
        f.write_str(label)
    }
}
