//! Remote execution via ECS exec
//!
//! Runs a command inside a container of a running task using
//! `aws ecs execute-command`. The AWS CLI drives the session manager plugin,
//! which the SDK cannot do on its own.
//!
//! ## Prerequisites
//!
//! - AWS CLI v2 and the session manager plugin on `PATH`
//! - `enableExecuteCommand` on the service, so tasks run the
//!   `ExecuteCommandAgent`

use async_trait::async_trait;
use dockside_core::{CommandExecutor, DocksideError, ExecRequest, ServiceDescription};
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info};

/// Default timeout for one exec session
const DEFAULT_EXEC_TIMEOUT_SECS: u64 = 60;

/// Runs commands in remote containers through `aws ecs execute-command`
#[derive(Debug, Clone)]
pub struct EcsExecExecutor {
    aws_bin: String,
    region: Option<String>,
    timeout: Duration,
}

impl Default for EcsExecExecutor {
    fn default() -> Self {
        Self {
            aws_bin: "aws".to_string(),
            region: None,
            timeout: Duration::from_secs(DEFAULT_EXEC_TIMEOUT_SECS),
        }
    }
}

impl EcsExecExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set region passed to the CLI
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    /// Set exec session timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Arguments for `aws`
    fn args(&self, request: &ExecRequest) -> Vec<String> {
        let mut args = vec![
            "ecs".to_string(),
            "execute-command".to_string(),
            "--cluster".to_string(),
            request.cluster.clone(),
            "--task".to_string(),
            request.task.clone(),
            "--container".to_string(),
            request.container.clone(),
            "--interactive".to_string(),
            "--command".to_string(),
            format!("/bin/sh -c '{}'", request.command),
        ];
        if let Some(region) = &self.region {
            args.push("--region".to_string());
            args.push(region.clone());
        }
        args
    }
}

#[async_trait]
impl CommandExecutor for EcsExecExecutor {
    async fn execute(&self, request: &ExecRequest) -> dockside_core::Result<String> {
        info!(
            cluster = %request.cluster,
            task = %request.task,
            container = %request.container,
            "Running command via ECS exec"
        );

        let output = tokio::time::timeout(
            self.timeout,
            Command::new(&self.aws_bin)
                .args(self.args(request))
                .kill_on_drop(true)
                .output(),
        )
        .await
        .map_err(|_| DocksideError::Command {
            program: "aws ecs execute-command".to_string(),
            message: format!("timed out after {:?}", self.timeout),
        })??;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(DocksideError::Command {
                program: "aws ecs execute-command".to_string(),
                message: format!("{}: {}", output.status, stderr.trim()),
            });
        }

        debug!(bytes = stdout.len(), "ECS exec completed");
        Ok(stdout)
    }
}

/// SSM target of a container, as used by port-forwarding sessions
pub fn ssm_target(cluster: &str, task_id: &str, runtime_id: &str) -> String {
    format!("ecs:{cluster}_{task_id}_{runtime_id}")
}

/// SSM target of the first exec-enabled container of a running task
pub fn find_ssm_target(svc: &ServiceDescription) -> Option<String> {
    svc.tasks.iter().find_map(|task| {
        task.containers
            .iter()
            .filter(|c| c.exec_enabled())
            .find_map(|c| c.runtime_id.as_deref())
            .map(|runtime_id| ssm_target(&svc.cluster, task.task_id(), runtime_id))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> ExecRequest {
        ExecRequest {
            cluster: "shop-test-Cluster".into(),
            task: "arn:aws:ecs:us-west-2:123456789012:task/shop-test-Cluster/abc".into(),
            container: "api".into(),
            command: "echo hi".into(),
        }
    }

    #[test]
    fn test_args_include_region_when_set() {
        let args = EcsExecExecutor::new().args(&request());
        assert!(!args.contains(&"--region".to_string()));
        assert_eq!(args[0..2], ["ecs", "execute-command"]);
        assert!(args.contains(&"/bin/sh -c 'echo hi'".to_string()));

        let args = EcsExecExecutor::new().with_region("us-west-2").args(&request());
        assert_eq!(args[args.len() - 2..], ["--region", "us-west-2"]);
    }

    #[test]
    fn test_ssm_target() {
        assert_eq!(
            ssm_target("shop-test-Cluster", "abc", "abc-1234"),
            "ecs:shop-test-Cluster_abc_abc-1234"
        );
    }

    #[test]
    fn test_find_ssm_target_skips_containers_without_agent() {
        use dockside_core::{ManagedAgent, RunningContainer, RunningTask, EXECUTE_COMMAND_AGENT, STATUS_RUNNING};

        let container = |name: &str, agent: bool| RunningContainer {
            name: name.into(),
            runtime_id: Some(format!("abc-{name}")),
            last_status: Some(STATUS_RUNNING.into()),
            managed_agents: agent
                .then(|| ManagedAgent {
                    name: EXECUTE_COMMAND_AGENT.into(),
                    last_status: Some(STATUS_RUNNING.into()),
                })
                .into_iter()
                .collect(),
        };
        let mut svc = ServiceDescription {
            cluster: "c".into(),
            service: "api".into(),
            tasks: vec![RunningTask {
                task_arn: "arn:aws:ecs:us-west-2:123456789012:task/c/abc".into(),
                containers: vec![container("sidecar", false), container("api", true)],
            }],
        };
        assert_eq!(find_ssm_target(&svc).as_deref(), Some("ecs:c_abc_abc-api"));

        svc.tasks[0].containers.pop();
        assert_eq!(find_ssm_target(&svc), None);
    }

    #[tokio::test]
    async fn test_missing_binary_is_error() {
        let exec = EcsExecExecutor {
            aws_bin: "/nonexistent/aws".into(),
            ..Default::default()
        };
        assert!(matches!(exec.execute(&request()).await, Err(DocksideError::Io(_))));
    }
}
