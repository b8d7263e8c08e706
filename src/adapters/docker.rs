//! Lifecycle adapter backed by the `docker` CLI.

use crate::domain::model::{ServiceInstanceState, ServiceSpec, StartupDescriptor};
use crate::domain::ports::{AdapterError, AdapterResult, LifecycleAdapter};
use async_trait::async_trait;
use std::process::Stdio;
use tokio::process::Command;

const INSPECT_FORMAT: &str =
    "{{.State.Status}}|{{if .State.Health}}{{.State.Health.Status}}{{end}}";

#[derive(Debug, Clone)]
pub struct DockerAdapter {
    docker_bin: String,
}

impl Default for DockerAdapter {
    fn default() -> Self {
        Self::new("docker")
    }
}

struct CommandOutput {
    success: bool,
    stdout: String,
    stderr: String,
}

impl DockerAdapter {
    pub fn new(docker_bin: impl Into<String>) -> Self {
        Self {
            docker_bin: docker_bin.into(),
        }
    }

    async fn run(
        &self,
        mut command: Command,
        service: &str,
        operation: &'static str,
    ) -> AdapterResult<CommandOutput> {
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let output = command.output().await.map_err(|e| AdapterError::Unavailable {
            message: format!(
                "failed to run {} for {} of '{}': {}",
                self.docker_bin, operation, service, e
            ),
        })?;

        Ok(CommandOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).trim().to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }

    fn docker(&self) -> Command {
        Command::new(&self.docker_bin)
    }

    fn create_command(&self, spec: &ServiceSpec) -> Command {
        match &spec.startup {
            StartupDescriptor::Image { .. } => {
                let mut command = self.docker();
                command.args(run_args(spec));
                command
            }
            StartupDescriptor::RawCommand { command: raw } => {
                let mut command = Command::new("sh");
                command.arg("-c").arg(raw);
                command
            }
        }
    }
}

/// `docker run` arguments for an image descriptor. Empty for raw commands.
pub fn run_args(spec: &ServiceSpec) -> Vec<String> {
    let StartupDescriptor::Image {
        image,
        ports,
        env,
        command,
        health_cmd,
    } = &spec.startup
    else {
        return Vec::new();
    };

    let mut args = vec![
        "run".to_string(),
        "-d".to_string(),
        "--name".to_string(),
        spec.name.clone(),
    ];
    for port in ports {
        args.push("-p".to_string());
        args.push(port.clone());
    }
    for (key, value) in env {
        args.push("-e".to_string());
        args.push(format!("{}={}", key, value));
    }
    if let Some(health_cmd) = health_cmd {
        args.push("--health-cmd".to_string());
        args.push(health_cmd.clone());
        args.push("--health-interval".to_string());
        args.push(format!("{}ms", spec.health.interval.as_millis().max(1)));
    }
    args.push(image.clone());
    args.extend(command.iter().cloned());
    args
}

/// Maps `docker inspect` output (`<status>|<health>`) onto an instance state.
///
/// A running container without a healthcheck counts as healthy.
pub fn parse_inspect_state(output: &str) -> ServiceInstanceState {
    let line = output.lines().next().unwrap_or_default().trim().trim_matches('\'');
    let (status, health) = line.split_once('|').unwrap_or((line, ""));

    match (status.trim(), health.trim()) {
        ("running", "" | "healthy") => ServiceInstanceState::Healthy,
        ("running", "unhealthy") => ServiceInstanceState::Unhealthy,
        ("running", _) => ServiceInstanceState::Starting,
        ("created" | "restarting", _) => ServiceInstanceState::Starting,
        ("paused", _) => ServiceInstanceState::Unhealthy,
        ("exited" | "dead" | "removing", _) => ServiceInstanceState::Failed,
        _ => ServiceInstanceState::Starting,
    }
}

fn is_missing(stderr: &str) -> bool {
    let lowered = stderr.to_lowercase();
    lowered.contains("no such container") || lowered.contains("no such object")
}

#[async_trait]
impl LifecycleAdapter for DockerAdapter {
    async fn ensure_removed(&self, name: &str) -> AdapterResult<()> {
        let mut command = self.docker();
        command.args(["rm", "-f", name]);
        let output = self.run(command, name, "remove").await?;

        if output.success || is_missing(&output.stderr) {
            tracing::debug!("🧹 Removed previous instance of {} (if any)", name);
            return Ok(());
        }
        Err(AdapterError::failed(name, "remove", output.stderr))
    }

    async fn create(&self, spec: &ServiceSpec) -> AdapterResult<()> {
        tracing::debug!("🐳 Creating {}", spec.name);
        let output = self.run(self.create_command(spec), &spec.name, "create").await?;

        if output.success {
            tracing::debug!("Created {} ({})", spec.name, output.stdout);
            Ok(())
        } else {
            Err(AdapterError::failed(&spec.name, "create", output.stderr))
        }
    }

    async fn query_health(&self, name: &str) -> AdapterResult<ServiceInstanceState> {
        let mut command = self.docker();
        command.args(["inspect", "--format", INSPECT_FORMAT, name]);
        let output = self.run(command, name, "inspect").await?;

        if output.success {
            return Ok(parse_inspect_state(&output.stdout));
        }
        if is_missing(&output.stderr) {
            return Err(AdapterError::UnknownService {
                service: name.to_string(),
            });
        }
        Err(AdapterError::failed(name, "inspect", output.stderr))
    }

    fn name(&self) -> &str {
        "docker"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::HealthPolicy;
    use std::collections::BTreeMap;
    use std::time::Duration;

    #[test]
    fn test_parse_inspect_state() {
        assert_eq!(parse_inspect_state("running|healthy"), ServiceInstanceState::Healthy);
        assert_eq!(parse_inspect_state("running|"), ServiceInstanceState::Healthy);
        assert_eq!(parse_inspect_state("running|starting"), ServiceInstanceState::Starting);
        assert_eq!(parse_inspect_state("running|unhealthy"), ServiceInstanceState::Unhealthy);
        assert_eq!(parse_inspect_state("exited|"), ServiceInstanceState::Failed);
        assert_eq!(parse_inspect_state("'restarting|'\n"), ServiceInstanceState::Starting);
    }

    #[test]
    fn test_run_args_for_image() {
        let mut env = BTreeMap::new();
        env.insert("MYSQL_ROOT_PASSWORD".to_string(), "secret".to_string());
        let spec = ServiceSpec::new(
            "db_mysql_demo",
            StartupDescriptor::Image {
                image: "mysql:8".to_string(),
                ports: vec!["3306:3306".to_string()],
                env,
                command: vec!["--default-authentication-plugin=mysql_native_password".to_string()],
                health_cmd: Some("mysqladmin ping".to_string()),
            },
            HealthPolicy::new(Duration::from_secs(2), Duration::from_secs(60), 1),
        );

        assert_eq!(
            run_args(&spec),
            vec![
                "run",
                "-d",
                "--name",
                "db_mysql_demo",
                "-p",
                "3306:3306",
                "-e",
                "MYSQL_ROOT_PASSWORD=secret",
                "--health-cmd",
                "mysqladmin ping",
                "--health-interval",
                "2000ms",
                "mysql:8",
                "--default-authentication-plugin=mysql_native_password",
            ]
        );
    }

    #[test]
    fn test_missing_container_detection() {
        assert!(is_missing("Error: No such container: app_backend_1"));
        assert!(is_missing("Error: No such object: app_backend_1"));
        assert!(!is_missing("permission denied while trying to connect"));
    }

    #[tokio::test]
    async fn test_missing_binary_is_unavailable() {
        let adapter = DockerAdapter::new("/nonexistent/docker-binary");
        let err = adapter.ensure_removed("app").await.unwrap_err();
        assert!(matches!(err, AdapterError::Unavailable { .. }));
    }
}
