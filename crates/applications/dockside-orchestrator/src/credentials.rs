//! Task-role and environment-manager credentials
//!
//! Containers run locally with the caller's credentials by default. With
//! `--use-task-role` they get the task role's credentials instead, obtained by
//! assuming the role directly or, when that is denied, by asking a running
//! task for its credentials through ECS exec.

use crate::error::{OrchestratorError, Result, TaskRoleCredentialsError};
use async_trait::async_trait;
use dockside_core::{
    CommandExecutor, CredentialSource, Credentials, DocksideError, ExecRequest, RoleAssumer,
    ServiceDescriber, WorkloadName,
};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Command run inside a task container to read its role credentials
pub const CREDENTIALS_ENDPOINT_COMMAND: &str =
    "curl -s 169.254.170.2$AWS_CONTAINER_CREDENTIALS_RELATIVE_URI";

/// Credentials fixed at construction time
pub struct StaticCredentials(Credentials);

impl StaticCredentials {
    pub fn new(creds: Credentials) -> Self {
        Self(creds)
    }
}

#[async_trait]
impl CredentialSource for StaticCredentials {
    async fn credentials(&self) -> dockside_core::Result<Credentials> {
        Ok(self.0.clone())
    }
}

/// Obtains task-role credentials for a workload
pub struct TaskRoleCredentials {
    workload: WorkloadName,
    sts: Arc<dyn RoleAssumer>,
    services: Arc<dyn ServiceDescriber>,
    exec: Arc<dyn CommandExecutor>,
}

impl TaskRoleCredentials {
    pub fn new(
        workload: WorkloadName,
        sts: Arc<dyn RoleAssumer>,
        services: Arc<dyn ServiceDescriber>,
        exec: Arc<dyn CommandExecutor>,
    ) -> Self {
        Self {
            workload,
            sts,
            services,
            exec,
        }
    }

    /// Try `assume role`, then `ecs exec`. If both fail, both causes are returned.
    pub async fn credentials(&self, task_role_arn: Option<&str>) -> Result<Credentials> {
        let assume_role = match task_role_arn {
            Some(arn) => match self.sts.assume_role(arn, &session_name(&self.workload)).await {
                Ok(creds) => {
                    info!(role = %arn, "assumed task role");
                    return Ok(creds);
                }
                Err(e) => e,
            },
            None => DocksideError::not_found("task role in task definition"),
        };
        debug!(error = %assume_role, "assume role failed, trying ecs exec");

        match self.via_exec().await {
            Ok(creds) => {
                info!(workload = %self.workload, "got task role credentials via ecs exec");
                Ok(creds)
            }
            Err(ecs_exec) => Err(OrchestratorError::from(TaskRoleCredentialsError {
                assume_role,
                ecs_exec,
            })),
        }
    }

    async fn via_exec(&self) -> dockside_core::Result<Credentials> {
        let svc = self.services.describe_service(&self.workload).await?;

        let mut last_err = None;
        for task in &svc.tasks {
            for ctr in task.containers.iter().filter(|c| c.exec_enabled()) {
                let request = ExecRequest {
                    cluster: svc.cluster.clone(),
                    task: task.task_arn.clone(),
                    container: ctr.name.clone(),
                    command: CREDENTIALS_ENDPOINT_COMMAND.to_string(),
                };
                match self.exec.execute(&request).await.and_then(|out| parse_credentials(&out)) {
                    Ok(creds) => return Ok(creds),
                    Err(e) => {
                        warn!(task = %task.task_id(), container = %ctr.name, error = %e, "ecs exec credentials failed");
                        last_err = Some(e);
                    }
                }
            }
        }
        Err(last_err.unwrap_or_else(|| {
            DocksideError::not_found("running container with execute command enabled")
        }))
    }
}

/// Parse the credential endpoint's JSON from exec output, which is wrapped
/// in session manager banner text.
pub fn parse_credentials(output: &str) -> dockside_core::Result<Credentials> {
    let (start, end) = match (output.find('{'), output.rfind('}')) {
        (Some(start), Some(end)) if start < end => (start, end),
        _ => {
            return Err(DocksideError::Other(
                "no credentials in ecs exec output".to_string(),
            ));
        }
    };
    serde_json::from_str(&output[start..=end])
        .map_err(|e| DocksideError::Other(format!("parse credentials: {e}")))
}

/// Role name the environment manager uses for `<app>-<env>`
pub fn env_manager_role_arn(account_id: &str, workload: &WorkloadName) -> String {
    format!(
        "arn:aws:iam::{account_id}:role/{}-{}-EnvManagerRole",
        workload.app, workload.env
    )
}

/// Credentials of the environment manager role, used by the pause container
/// to open port-forwarding sessions.
pub async fn env_manager_credentials(
    sts: &dyn RoleAssumer,
    workload: &WorkloadName,
    role_arn: Option<&str>,
) -> Result<Credentials> {
    let role_arn = match role_arn {
        Some(arn) => arn.to_string(),
        None => {
            let account = sts
                .account_id()
                .await
                .map_err(|e| OrchestratorError::stage("get caller identity", e))?;
            env_manager_role_arn(&account, workload)
        }
    };
    sts.assume_role(&role_arn, &session_name(workload))
        .await
        .map_err(|e| OrchestratorError::stage("assume environment manager role", e))
}

// STS caps session names at 64 characters
fn session_name(workload: &WorkloadName) -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    let mut name = format!("dockside-{}-{}", workload.name, &id[..8]);
    name.truncate(64);
    name
}
