#[cfg(feature = "cli")]
pub mod cli;
pub mod plan_config;

#[cfg(feature = "cli")]
pub use cli::CliConfig;
pub use plan_config::PlanConfig;
