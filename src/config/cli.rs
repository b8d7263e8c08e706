use crate::core::orchestrator::PlanDeadline;
use crate::domain::model::DeploymentPlan;
use crate::utils::error::{DeployError, Result};
use crate::utils::validation::{validate_positive_number, Validate};
use clap::Parser;
use std::collections::HashSet;
use std::time::Duration;

#[derive(Debug, Clone, Parser)]
#[command(name = "staged-deploy")]
#[command(about = "Deploy services group by group, gating each group on health")]
pub struct CliConfig {
    /// Path to the plan file
    #[arg(short, long, default_value = "deploy.toml")]
    pub plan: String,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    pub json_logs: bool,

    /// Show the resolved execution plan without touching the runtime
    #[arg(long)]
    pub dry_run: bool,

    /// Run only these groups (comma-separated)
    #[arg(long, value_delimiter = ',')]
    pub only: Vec<String>,

    /// Skip these groups (comma-separated)
    #[arg(long, value_delimiter = ',')]
    pub skip: Vec<String>,

    /// Overall deadline in seconds, overriding the plan file
    #[arg(long, conflicts_with = "no_deadline")]
    pub deadline_secs: Option<u64>,

    /// Run without an overall deadline
    #[arg(long)]
    pub no_deadline: bool,

    /// Write the event log as JSON to this file
    #[arg(long)]
    pub events_file: Option<String>,

    /// Docker binary, overriding the plan file
    #[arg(long)]
    pub docker_bin: Option<String>,
}

impl CliConfig {
    /// CLI deadline override, if any.
    pub fn deadline_override(&self) -> Option<PlanDeadline> {
        if self.no_deadline {
            return Some(PlanDeadline::Unbounded);
        }
        self.deadline_secs
            .map(|seconds| PlanDeadline::Fixed(Duration::from_secs(seconds)))
    }

    /// Applies `--only`/`--skip`. Group order is preserved.
    pub fn filter_plan(&self, plan: &DeploymentPlan) -> Result<DeploymentPlan> {
        for name in self.only.iter().chain(self.skip.iter()) {
            if plan.group(name.trim()).is_none() {
                return Err(DeployError::invalid_value(
                    "--only/--skip",
                    name,
                    "No enabled group with this name",
                ));
            }
        }

        let only: HashSet<&str> = self.only.iter().map(|s| s.trim()).collect();
        let skip: HashSet<&str> = self.skip.iter().map(|s| s.trim()).collect();
        plan.retain_groups(|group| {
            (only.is_empty() || only.contains(group.name.as_str()))
                && !skip.contains(group.name.as_str())
        })
    }
}

impl Validate for CliConfig {
    fn validate(&self) -> Result<()> {
        if let Some(seconds) = self.deadline_secs {
            validate_positive_number("--deadline-secs", seconds, 1)?;
        }
        Ok(())
    }
}
