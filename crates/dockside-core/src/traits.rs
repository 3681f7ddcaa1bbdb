//! Collaborator traits for Dockside
//!
//! Every remote call the local runner makes (ECS, STS, Secrets Manager, SSM,
//! RDS, resource tagging, docker build) goes through one of these traits.
//! The resolver, discoverer and supervisor only ever see the traits.

use async_trait::async_trait;
use std::collections::BTreeMap;

use crate::error::DocksideError;
use crate::types::*;

/// Result type for collaborator operations
pub type Result<T> = std::result::Result<T, DocksideError>;

/// Fetches the task definition of the deployed workload
#[async_trait]
pub trait TaskDefinitionSource: Send + Sync {
    async fn task_definition(&self, workload: &WorkloadName) -> Result<TaskDefinition>;
}

/// A secret backend (Secrets Manager or SSM Parameter Store)
#[async_trait]
pub trait SecretSource: Send + Sync {
    /// Fetch the decrypted value of a secret or parameter
    async fn get_secret_value(&self, value_from: &str) -> Result<String>;
}

/// Credentials of the current caller
#[async_trait]
pub trait CredentialSource: Send + Sync {
    async fn credentials(&self) -> Result<Credentials>;
}

/// STS role assumption and caller identity
#[async_trait]
pub trait RoleAssumer: Send + Sync {
    async fn assume_role(&self, role_arn: &str, session_name: &str) -> Result<Credentials>;

    /// Account id of the caller
    async fn account_id(&self) -> Result<String>;
}

/// Running state of the deployed service
#[async_trait]
pub trait ServiceDescriber: Send + Sync {
    async fn describe_service(&self, workload: &WorkloadName) -> Result<ServiceDescription>;
}

/// Runs a shell command inside a remote container and returns its stdout
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn execute(&self, request: &ExecRequest) -> Result<String>;
}

/// Lists the environment's services that use service connect
#[async_trait]
pub trait ServiceConnectLister: Send + Sync {
    /// Sibling services of `workload` in its environment, excluding itself
    async fn service_connect_services(
        &self,
        workload: &WorkloadName,
    ) -> Result<Vec<ServiceConnectService>>;
}

/// Generic tagged-resource search
#[async_trait]
pub trait TaggedResourceSearch: Send + Sync {
    /// Resources of any of `resource_types` carrying all `tags`
    async fn resources_by_tags(
        &self,
        resource_types: &[&str],
        tags: &BTreeMap<String, String>,
    ) -> Result<Vec<TaggedResource>>;
}

/// Paged RDS describe calls. `on_page` is invoked once per page.
#[async_trait]
pub trait RdsDescriber: Send + Sync {
    async fn describe_db_instances(
        &self,
        identifiers: &[String],
        on_page: &mut (dyn FnMut(Vec<DbInstance>) + Send),
    ) -> Result<()>;

    async fn describe_db_clusters(
        &self,
        identifiers: &[String],
        on_page: &mut (dyn FnMut(Vec<DbCluster>) + Send),
    ) -> Result<()>;
}

/// Builds local images, returning container name -> image URI
#[async_trait]
pub trait ImageBuilder: Send + Sync {
    async fn build_images(&self, workload: &WorkloadName) -> Result<BTreeMap<String, String>>;
}
