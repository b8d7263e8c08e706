use crate::core::orchestrator::PlanDeadline;
use crate::domain::model::{DeploymentPlan, Group, HealthPolicy, ServiceSpec, StartupDescriptor};
use crate::utils::error::{DeployError, Result};
use crate::utils::validation::{
    validate_non_empty_string, validate_positive_number, validate_unique_names, Validate,
};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanConfig {
    pub plan: PlanInfo,
    #[serde(default)]
    pub defaults: DefaultsConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    pub groups: Vec<GroupDefinition>,
    pub services: Vec<ServiceDefinition>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanInfo {
    pub name: String,
    pub description: Option<String>,
    pub execution_order: Option<Vec<String>>, // defaults to the order groups are listed
    pub deadline_seconds: Option<u64>,
    pub create_allowance_seconds: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DefaultsConfig {
    pub health: Option<HealthConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HealthConfig {
    pub interval_ms: Option<u64>,
    pub timeout_seconds: Option<u64>,
    pub consecutive_successes: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuntimeConfig {
    pub docker_bin: Option<String>,
    pub retry_attempts: Option<u32>,
    pub retry_delay_ms: Option<u64>,
    pub max_parallel: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupDefinition {
    pub name: String,
    pub description: Option<String>,
    pub enabled: Option<bool>,
    pub services: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceDefinition {
    pub name: String,
    pub description: Option<String>,
    pub startup: StartupDescriptor,
    pub health: Option<HealthConfig>,
}

impl HealthConfig {
    /// Fields set here win over `base`.
    fn overlay(&self, base: HealthPolicy) -> HealthPolicy {
        HealthPolicy {
            interval: self
                .interval_ms
                .map(Duration::from_millis)
                .unwrap_or(base.interval),
            timeout: self
                .timeout_seconds
                .map(Duration::from_secs)
                .unwrap_or(base.timeout),
            consecutive_successes: self
                .consecutive_successes
                .unwrap_or(base.consecutive_successes),
        }
    }
}

impl PlanConfig {
    /// Loads a plan from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)?;
        Self::from_toml_str(&content)
    }

    /// Parses a plan from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let processed_content = Self::substitute_env_vars(content)?;

        toml::from_str(&processed_content)
            .map_err(|e| DeployError::config(format!("Plan TOML parsing error: {}", e)))
    }

    /// Replaces `${VAR}` with the environment value; unknown variables stay as written.
    fn substitute_env_vars(content: &str) -> Result<String> {
        let re = Regex::new(r"\$\{([^}]+)\}")
            .map_err(|e| DeployError::config(format!("Invalid substitution pattern: {}", e)))?;

        let result = re.replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
        });

        Ok(result.to_string())
    }

    pub fn get_group(&self, name: &str) -> Option<&GroupDefinition> {
        self.groups.iter().find(|g| g.name == name)
    }

    pub fn get_service(&self, name: &str) -> Option<&ServiceDefinition> {
        self.services.iter().find(|s| s.name == name)
    }

    pub fn execution_order(&self) -> Vec<&str> {
        match &self.plan.execution_order {
            Some(order) => order.iter().map(String::as_str).collect(),
            None => self.groups.iter().map(|g| g.name.as_str()).collect(),
        }
    }

    /// Enabled groups in execution order.
    pub fn get_enabled_groups(&self) -> Vec<&GroupDefinition> {
        self.execution_order()
            .into_iter()
            .filter_map(|name| self.get_group(name))
            .filter(|group| group.enabled.unwrap_or(true))
            .collect()
    }

    /// Groups defined but left out of an explicit execution order.
    pub fn unscheduled_groups(&self) -> Vec<&str> {
        let order = self.execution_order();
        self.groups
            .iter()
            .map(|g| g.name.as_str())
            .filter(|name| !order.contains(name))
            .collect()
    }

    /// Services that no enabled, scheduled group deploys.
    pub fn undeployed_services(&self) -> Vec<&str> {
        let deployed: HashSet<&str> = self
            .get_enabled_groups()
            .into_iter()
            .flat_map(|group| group.services.iter().map(String::as_str))
            .collect();
        self.services
            .iter()
            .map(|s| s.name.as_str())
            .filter(|name| !deployed.contains(name))
            .collect()
    }

    pub fn default_health(&self) -> HealthPolicy {
        match &self.defaults.health {
            Some(health) => health.overlay(HealthPolicy::default()),
            None => HealthPolicy::default(),
        }
    }

    pub fn health_policy_for(&self, service: &ServiceDefinition) -> HealthPolicy {
        let base = self.default_health();
        match &service.health {
            Some(health) => health.overlay(base),
            None => base,
        }
    }

    pub fn deadline(&self) -> PlanDeadline {
        match self.plan.deadline_seconds {
            Some(seconds) => PlanDeadline::Fixed(Duration::from_secs(seconds)),
            None => PlanDeadline::Derived,
        }
    }

    pub fn create_allowance(&self) -> Option<Duration> {
        self.plan.create_allowance_seconds.map(Duration::from_secs)
    }

    pub fn validate(&self) -> Result<()> {
        validate_non_empty_string("plan.name", &self.plan.name)?;
        validate_unique_names("groups.name", self.groups.iter().map(|g| g.name.as_str()))?;
        validate_unique_names("services.name", self.services.iter().map(|s| s.name.as_str()))?;

        let order = self.execution_order();
        validate_unique_names("plan.execution_order", order.iter().copied())?;
        for group_name in &order {
            if self.get_group(group_name).is_none() {
                return Err(DeployError::config(format!(
                    "Group '{}' in execution order not found in groups definition",
                    group_name
                )));
            }
        }

        let mut referenced = HashSet::new();
        for group in &self.groups {
            if group.services.is_empty() {
                return Err(DeployError::config(format!(
                    "Group '{}' contains no services",
                    group.name
                )));
            }
            for service_name in &group.services {
                if self.get_service(service_name).is_none() {
                    return Err(DeployError::config(format!(
                        "Service '{}' in group '{}' is not defined",
                        service_name, group.name
                    )));
                }
                if !referenced.insert(service_name.as_str()) {
                    return Err(DeployError::invalid_value(
                        &format!("groups.{}.services", group.name),
                        service_name,
                        "Service is listed in more than one group",
                    ));
                }
            }
        }

        for group in self.unscheduled_groups() {
            tracing::warn!(
                "⚠️ Group '{}' is not in the execution order and will not run",
                group
            );
        }
        for service in &self.services {
            self.health_policy_for(service).validate(&service.name)?;
        }
        for service in self.undeployed_services() {
            tracing::warn!(
                "⚠️ Service '{}' is not referenced by any enabled group",
                service
            );
        }

        if let Some(attempts) = self.runtime.retry_attempts {
            validate_positive_number("runtime.retry_attempts", u64::from(attempts), 1)?;
        }
        if let Some(max_parallel) = self.runtime.max_parallel {
            validate_positive_number("runtime.max_parallel", max_parallel as u64, 1)?;
        }
        if let Some(seconds) = self.plan.deadline_seconds {
            validate_positive_number("plan.deadline_seconds", seconds, 1)?;
        }

        Ok(())
    }

    /// Validates and resolves the enabled groups into an executable plan.
    pub fn to_plan(&self) -> Result<DeploymentPlan> {
        self.validate()?;

        let groups = self
            .get_enabled_groups()
            .into_iter()
            .map(|group| {
                let services = group
                    .services
                    .iter()
                    .filter_map(|name| self.get_service(name))
                    .map(|service| {
                        ServiceSpec::new(
                            service.name.clone(),
                            service.startup.clone(),
                            self.health_policy_for(service),
                        )
                    })
                    .collect();
                Group::new(group.name.clone(), services)
            })
            .collect();

        DeploymentPlan::new(self.plan.name.clone(), groups)
    }
}

impl Validate for PlanConfig {
    fn validate(&self) -> Result<()> {
        self.validate()
    }
}
