use crate::domain::outcome::ServiceFailure;
use std::time::Duration;
use thiserror::Error;

/// Failure reported by a lifecycle adapter for one runtime call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AdapterError {
    #[error("service '{service}' is unknown to the runtime")]
    UnknownService { service: String },

    #[error("{operation} failed for '{service}': {message}")]
    OperationFailed {
        service: String,
        operation: &'static str,
        message: String,
    },

    #[error("runtime unavailable: {message}")]
    Unavailable { message: String },
}

impl AdapterError {
    pub fn failed(service: &str, operation: &'static str, message: impl Into<String>) -> Self {
        Self::OperationFailed {
            service: service.to_string(),
            operation,
            message: message.into(),
        }
    }

    /// An unknown service after create means it crashed, so retrying won't help.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::UnknownService { .. })
    }
}

#[derive(Error, Debug)]
pub enum DeployError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Invalid value '{value}' for '{field}': {reason}")]
    InvalidConfigValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Group '{group}' failed at service '{service}': {reason}")]
    GroupFailure {
        group: String,
        service: String,
        reason: ServiceFailure,
    },

    #[error("Plan failed in group '{group}': {source}")]
    PlanFailure {
        group: String,
        #[source]
        source: Box<DeployError>,
    },

    #[error("Plan deadline of {deadline:?} exceeded while running group '{group}'")]
    PlanTimeout { group: String, deadline: Duration },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Configuration,
    Runtime,
    Health,
    Deadline,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Medium,
    High,
    Critical,
}

impl DeployError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn invalid_value(field: &str, value: impl ToString, reason: impl Into<String>) -> Self {
        Self::InvalidConfigValue {
            field: field.to_string(),
            value: value.to_string(),
            reason: reason.into(),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Config { .. } | Self::InvalidConfigValue { .. } => ErrorCategory::Configuration,
            Self::GroupFailure { reason, .. } => match reason {
                ServiceFailure::HealthTimeout { .. } | ServiceFailure::Unhealthy => {
                    ErrorCategory::Health
                }
                _ => ErrorCategory::Runtime,
            },
            Self::PlanFailure { source, .. } => source.category(),
            Self::PlanTimeout { .. } => ErrorCategory::Deadline,
            Self::Io(_) | Self::Serialization(_) => ErrorCategory::System,
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self.category() {
            ErrorCategory::Configuration => ErrorSeverity::Medium,
            ErrorCategory::Runtime | ErrorCategory::Health => ErrorSeverity::High,
            ErrorCategory::Deadline | ErrorCategory::System => ErrorSeverity::Critical,
        }
    }

    /// Process exit code for the CLI. Success is always 0 and never reaches here.
    pub fn exit_code(&self) -> i32 {
        match self.category() {
            ErrorCategory::Configuration => 2,
            ErrorCategory::Runtime | ErrorCategory::Health => 1,
            ErrorCategory::Deadline => 3,
            ErrorCategory::System => 4,
        }
    }

    pub fn recovery_suggestion(&self) -> &'static str {
        match self.category() {
            ErrorCategory::Configuration => {
                "Check the plan file: group names, service names and health policies"
            }
            ErrorCategory::Runtime => {
                "Check that the container runtime is reachable and the service can start"
            }
            ErrorCategory::Health => {
                "Inspect the failing service's logs or raise its health timeout"
            }
            ErrorCategory::Deadline => "Raise --deadline-secs or run with --no-deadline",
            ErrorCategory::System => "Check file permissions and available disk space",
        }
    }
}

pub type Result<T> = std::result::Result<T, DeployError>;
