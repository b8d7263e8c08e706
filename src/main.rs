use clap::Parser;
use staged_deploy::utils::{logger, validation::Validate};
use staged_deploy::{
    CliConfig, DeployError, DeploymentPlan, DockerAdapter, EventBus, GroupResult, LifecycleAdapter,
    PlanConfig, PlanOrchestrator, PlanOutcome, PlanResult, RetryingAdapter,
};
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_RETRY_DELAY_MS: u64 = 1000;

#[tokio::main]
async fn main() {
    let config = CliConfig::parse();

    if config.json_logs {
        logger::init_json_logger(config.verbose);
    } else {
        logger::init_cli_logger(config.verbose);
    }

    tracing::info!("🚀 Starting staged-deploy");
    if config.verbose {
        tracing::debug!("CLI config: {:?}", config);
    }

    let exit_code = match config.validate() {
        Ok(()) => match run(&config).await {
            Ok(()) => 0,
            Err(e) => report_failure(&e),
        },
        Err(e) => report_failure(&e),
    };

    std::process::exit(exit_code);
}

fn report_failure(e: &DeployError) -> i32 {
    tracing::error!(
        "❌ Deployment failed: {} (Category: {:?}, Severity: {:?})",
        e,
        e.category(),
        e.severity()
    );
    eprintln!("❌ {}", e);
    eprintln!("💡 {}", e.recovery_suggestion());
    e.exit_code()
}

async fn run(config: &CliConfig) -> staged_deploy::Result<()> {
    tracing::info!("📁 Loading plan from: {}", config.plan);
    let plan_config = PlanConfig::from_file(&config.plan)?;
    let plan = config.filter_plan(&plan_config.to_plan()?)?;
    tracing::info!("✅ Plan loaded and validated");

    let deadline = config
        .deadline_override()
        .unwrap_or_else(|| plan_config.deadline());

    let events = EventBus::new();
    let adapter = build_adapter(config, &plan_config);
    let mut orchestrator = PlanOrchestrator::new(adapter, events.clone())
        .with_deadline(deadline)
        .with_max_parallel(plan_config.runtime.max_parallel);
    if let Some(allowance) = plan_config.create_allowance() {
        orchestrator = orchestrator.with_create_allowance(allowance);
    }

    display_plan_summary(&plan, orchestrator.deadline_for(&plan));

    if config.dry_run {
        tracing::info!("🔍 DRY RUN MODE - the runtime will not be touched");
        perform_dry_run(&plan);
        return Ok(());
    }

    let result = orchestrator.run_plan(&plan).await?;

    if let Some(path) = &config.events_file {
        tokio::fs::write(path, events.to_json()?).await?;
        tracing::info!("📊 Event log exported to: {}", path);
    }

    display_results(&result);
    result.into_result()
}

fn build_adapter(config: &CliConfig, plan_config: &PlanConfig) -> Arc<dyn LifecycleAdapter> {
    let docker_bin = config
        .docker_bin
        .clone()
        .or_else(|| plan_config.runtime.docker_bin.clone())
        .unwrap_or_else(|| "docker".to_string());
    let adapter: Arc<dyn LifecycleAdapter> = Arc::new(DockerAdapter::new(docker_bin));

    match plan_config.runtime.retry_attempts {
        Some(attempts) if attempts > 1 => {
            let delay = plan_config
                .runtime
                .retry_delay_ms
                .unwrap_or(DEFAULT_RETRY_DELAY_MS);
            Arc::new(RetryingAdapter::new(
                adapter,
                attempts,
                Duration::from_millis(delay),
            ))
        }
        _ => adapter,
    }
}

fn display_plan_summary(plan: &DeploymentPlan, deadline: Option<Duration>) {
    println!("📋 Deployment Plan Summary:");
    println!("  Name: {}", plan.name());
    println!("  Groups: {}", plan.groups().len());
    println!("  Services: {}", plan.service_count());
    match deadline {
        Some(deadline) => println!("  Deadline: {:?}", deadline),
        None => println!("  Deadline: none"),
    }
    println!();
    println!("📝 Execution Order:");
    for (index, group) in plan.groups().iter().enumerate() {
        let services: Vec<&str> = group.service_names().collect();
        println!("  {}. {} - {}", index + 1, group.name, services.join(", "));
    }
    println!();
}

fn perform_dry_run(plan: &DeploymentPlan) {
    println!("🔍 Dry Run Analysis:");
    println!();

    for (index, group) in plan.groups().iter().enumerate() {
        println!("📦 Group {}: {}", index + 1, group.name);
        for service in &group.services {
            println!("  • {}", service.name);
            println!("    Startup: {:?}", service.startup);
            println!(
                "    Health: every {:?}, timeout {:?}, {} consecutive success(es)",
                service.health.interval,
                service.health.timeout,
                service.health.consecutive_successes
            );
        }
        println!("  ⏳ Waits for all services above to be healthy before continuing");
        println!();
    }

    println!("✅ Dry run analysis complete.");
}

fn display_results(result: &PlanResult) {
    println!();
    println!("📊 Deployment Results:");
    println!("  Plan: {}", result.plan);
    println!("  Total Time: {:?}", result.duration);

    for group in &result.groups {
        match group {
            GroupResult::Success {
                group,
                healthy,
                duration,
            } => println!("  ✅ {} - {} healthy in {:?}", group, healthy.len(), duration),
            GroupResult::Failure {
                group,
                service,
                reason,
            } => println!("  ❌ {} - {} {}", group, service, reason),
        }
    }

    match &result.outcome {
        PlanOutcome::Succeeded => println!("✅ All groups deployed and healthy"),
        PlanOutcome::FailedAt { group, service, .. } => {
            println!("❌ Stopped at group '{}' (service '{}')", group, service)
        }
        PlanOutcome::Timeout { group, deadline } => {
            println!("⏰ Deadline {:?} exceeded in group '{}'", deadline, group)
        }
    }
    println!();
}

