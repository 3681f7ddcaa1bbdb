//! Core types shared across Dockside components

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;
use std::str::FromStr;

use crate::error::DocksideError;

/// Name of the ECS managed agent that backs `execute-command`
pub const EXECUTE_COMMAND_AGENT: &str = "ExecuteCommandAgent";

/// Status string ECS reports for running tasks, containers and agents
pub const STATUS_RUNNING: &str = "RUNNING";

/// Application / environment / workload triple naming a deployed service
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkloadName {
    pub app: String,
    pub env: String,
    pub name: String,
}

impl WorkloadName {
    pub fn new(app: impl Into<String>, env: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            app: app.into(),
            env: env.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for WorkloadName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.app, self.env, self.name)
    }
}

// ============================================================================
// Remote task definition
// ============================================================================

/// Port mapping as declared in a container definition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortMapping {
    pub container_port: Option<u16>,
    pub host_port: Option<u16>,
}

/// Secret reference: the variable name and where its value comes from
/// (a Secrets Manager ARN, an SSM parameter ARN, or a bare parameter name)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretRef {
    pub name: String,
    pub value_from: String,
}

/// Start-order dependency on another container of the same task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerDependency {
    pub container_name: String,
    /// START, COMPLETE, SUCCESS or HEALTHY (any case)
    pub condition: String,
}

/// One container of a remote task definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerDefinition {
    pub name: String,
    pub image: String,
    pub environment: Vec<(String, String)>,
    pub secrets: Vec<SecretRef>,
    pub port_mappings: Vec<PortMapping>,
    pub essential: bool,
    pub depends_on: Vec<ContainerDependency>,
}

impl ContainerDefinition {
    /// Create an essential container with no env, secrets, ports or dependencies
    pub fn new(name: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            environment: Vec::new(),
            secrets: Vec::new(),
            port_mappings: Vec::new(),
            essential: true,
            depends_on: Vec::new(),
        }
    }

    pub fn with_env(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.push((name.into(), value.into()));
        self
    }

    pub fn with_secret(mut self, name: impl Into<String>, value_from: impl Into<String>) -> Self {
        self.secrets.push(SecretRef {
            name: name.into(),
            value_from: value_from.into(),
        });
        self
    }

    pub fn with_port(mut self, host_port: u16, container_port: u16) -> Self {
        self.port_mappings.push(PortMapping {
            container_port: Some(container_port),
            host_port: Some(host_port),
        });
        self
    }

    pub fn with_essential(mut self, essential: bool) -> Self {
        self.essential = essential;
        self
    }

    pub fn with_dependency(mut self, container: impl Into<String>, condition: impl Into<String>) -> Self {
        self.depends_on.push(ContainerDependency {
            container_name: container.into(),
            condition: condition.into(),
        });
        self
    }
}

/// Remote task definition, as fetched. Immutable; re-fetched on every rebuild.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDefinition {
    pub containers: Vec<ContainerDefinition>,
    pub task_role_arn: Option<String>,
}

impl TaskDefinition {
    pub fn container(&self, name: &str) -> Option<&ContainerDefinition> {
        self.containers.iter().find(|c| c.name == name)
    }
}

// ============================================================================
// Resolved environment
// ============================================================================

/// A resolved environment variable value
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EnvVarValue {
    pub value: String,
    /// Set by the user with an override
    pub overridden: bool,
    /// Came from a secret backend or injected credentials
    pub secret: bool,
}

impl EnvVarValue {
    pub fn plain(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            ..Default::default()
        }
    }

    pub fn overridden(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            overridden: true,
            secret: false,
        }
    }

    pub fn secret(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            overridden: false,
            secret: true,
        }
    }
}

/// Resolved environment of one container
pub type ContainerEnv = BTreeMap<String, EnvVarValue>;

/// User-declared port remapping, written `<host>:<container>` on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortOverride {
    pub host: u16,
    pub container: u16,
}

impl FromStr for PortOverride {
    type Err = DocksideError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, container) = s.split_once(':').ok_or_else(|| {
            DocksideError::config(format!("port override {s:?} must be <host port>:<container port>"))
        })?;
        let parse = |p: &str| {
            p.trim()
                .parse::<u16>()
                .map_err(|e| DocksideError::config(format!("port override {s:?}: invalid port {p:?}: {e}")))
        };
        Ok(Self {
            host: parse(host)?,
            container: parse(container)?,
        })
    }
}

/// A reachable peer (service connect alias or database endpoint)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Host {
    pub name: String,
    pub port: u16,
}

impl Host {
    pub fn new(name: impl Into<String>, port: u16) -> Self {
        Self {
            name: name.into(),
            port,
        }
    }
}

/// Short-lived AWS credentials
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    #[serde(default, alias = "Token")]
    pub session_token: Option<String>,
    #[serde(default)]
    pub expiration: Option<DateTime<Utc>>,
}

impl Credentials {
    pub fn new(access_key_id: impl Into<String>, secret_access_key: impl Into<String>) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
            session_token: None,
            expiration: None,
        }
    }

    pub fn with_session_token(mut self, token: impl Into<String>) -> Self {
        self.session_token = Some(token.into());
        self
    }

    /// The three standard credential environment variables
    pub fn env_vars(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            ("AWS_ACCESS_KEY_ID".to_string(), self.access_key_id.clone()),
            ("AWS_SECRET_ACCESS_KEY".to_string(), self.secret_access_key.clone()),
            (
                "AWS_SESSION_TOKEN".to_string(),
                self.session_token.clone().unwrap_or_default(),
            ),
        ])
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("session_token", &self.session_token.as_ref().map(|_| "<redacted>"))
            .field("expiration", &self.expiration)
            .finish()
    }
}

// ============================================================================
// Local task (what the runtime executes)
// ============================================================================

/// One container of the local task
#[derive(Clone, PartialEq, Eq, Default)]
pub struct ContainerSpec {
    pub image_uri: String,
    pub env_vars: BTreeMap<String, String>,
    pub secrets: BTreeMap<String, String>,
    /// host port -> container port
    pub ports: BTreeMap<u16, u16>,
    pub essential: bool,
    /// container name -> lower-case condition; empty when there are none
    pub depends_on: BTreeMap<String, String>,
}

impl ContainerSpec {
    /// `KEY=value` pairs for the container runtime, env vars then secrets
    pub fn environment(&self) -> Vec<String> {
        self.env_vars
            .iter()
            .chain(self.secrets.iter())
            .map(|(k, v)| format!("{k}={v}"))
            .collect()
    }

    fn same_topology(&self, other: &ContainerSpec) -> bool {
        self.ports == other.ports
            && self.essential == other.essential
            && self.depends_on == other.depends_on
    }
}

impl fmt::Debug for ContainerSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContainerSpec")
            .field("image_uri", &self.image_uri)
            .field("env_vars", &self.env_vars)
            .field("secrets", &self.secrets.keys().collect::<Vec<_>>())
            .field("ports", &self.ports)
            .field("essential", &self.essential)
            .field("depends_on", &self.depends_on)
            .finish()
    }
}

/// The task submitted to the local orchestrator
#[derive(Clone, PartialEq, Eq, Default)]
pub struct Task {
    pub containers: BTreeMap<String, ContainerSpec>,
    /// Credentials for the shared network container (proxy mode only)
    pub pause_secrets: BTreeMap<String, String>,
}

impl Task {
    /// All published host ports -> container ports across containers
    pub fn published_ports(&self) -> BTreeMap<u16, u16> {
        self.containers
            .values()
            .flat_map(|c| c.ports.iter().map(|(h, c)| (*h, *c)))
            .collect()
    }

    /// Whether moving from `self` to `next` needs a new network namespace.
    ///
    /// Adding or removing a container, or changing ports, essential flags or
    /// dependencies does. Environment and image changes do not.
    pub fn requires_network_rebuild(&self, next: &Task) -> bool {
        if self.containers.len() != next.containers.len() {
            return true;
        }
        self.containers.iter().any(|(name, cur)| match next.containers.get(name) {
            Some(new) => !cur.same_topology(new),
            None => true,
        })
    }

    /// Container names ordered so that every container comes after the
    /// containers it depends on. Ties keep name order.
    pub fn start_order(&self) -> Result<Vec<String>, DocksideError> {
        let mut pending: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
        for (name, spec) in &self.containers {
            for dep in spec.depends_on.keys() {
                if !self.containers.contains_key(dep) {
                    return Err(DocksideError::config(format!(
                        "container {name:?} depends on unknown container {dep:?}"
                    )));
                }
            }
            pending.insert(name, spec.depends_on.keys().map(String::as_str).collect());
        }

        let mut ready: VecDeque<&str> = pending
            .iter()
            .filter(|(_, deps)| deps.is_empty())
            .map(|(name, _)| *name)
            .collect();
        let mut order = Vec::with_capacity(self.containers.len());

        while let Some(name) = ready.pop_front() {
            pending.remove(name);
            order.push(name.to_string());
            for (other, deps) in pending.iter_mut() {
                if deps.remove(name) && deps.is_empty() {
                    ready.push_back(other);
                }
            }
        }

        if !pending.is_empty() {
            let cycle: Vec<&str> = pending.keys().copied().collect();
            return Err(DocksideError::config(format!(
                "dependency cycle between containers {cycle:?}"
            )));
        }
        Ok(order)
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("containers", &self.containers)
            .field("pause_secrets", &self.pause_secrets.keys().collect::<Vec<_>>())
            .finish()
    }
}

// ============================================================================
// Remote service state
// ============================================================================

/// A managed agent reported for a running container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagedAgent {
    pub name: String,
    pub last_status: Option<String>,
}

/// A container of a running remote task
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunningContainer {
    pub name: String,
    pub runtime_id: Option<String>,
    pub last_status: Option<String>,
    pub managed_agents: Vec<ManagedAgent>,
}

impl RunningContainer {
    /// Running, has a runtime id, and its execute-command agent is up
    pub fn exec_enabled(&self) -> bool {
        let has_runtime_id = self.runtime_id.as_deref().is_some_and(|id| !id.is_empty());
        let running = self.last_status.as_deref() == Some(STATUS_RUNNING);
        let agent_up = self.managed_agents.iter().any(|a| {
            a.name == EXECUTE_COMMAND_AGENT && a.last_status.as_deref() == Some(STATUS_RUNNING)
        });
        has_runtime_id && running && agent_up
    }
}

/// A running remote task
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunningTask {
    pub task_arn: String,
    pub containers: Vec<RunningContainer>,
}

impl RunningTask {
    /// Task id: the last path segment of the task ARN
    pub fn task_id(&self) -> &str {
        self.task_arn.rsplit('/').next().unwrap_or(&self.task_arn)
    }
}

/// Description of the deployed service and its running tasks
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDescription {
    pub cluster: String,
    pub service: String,
    pub tasks: Vec<RunningTask>,
}

/// Deployment rollout status
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeploymentStatus {
    Primary,
    Active,
    Inactive,
    Other(String),
}

impl DeploymentStatus {
    pub fn parse(s: &str) -> Self {
        match s {
            "PRIMARY" => Self::Primary,
            "ACTIVE" => Self::Active,
            "INACTIVE" => Self::Inactive,
            other => Self::Other(other.to_string()),
        }
    }
}

/// Service connect client alias
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientAlias {
    pub dns_name: String,
    pub port: u16,
}

/// One deployment generation of a service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deployment {
    pub id: Option<String>,
    pub status: DeploymentStatus,
    pub service_connect_enabled: bool,
    pub client_aliases: Vec<ClientAlias>,
}

/// A sibling service with service connect configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConnectService {
    pub name: String,
    pub deployments: Vec<Deployment>,
}

/// Result of a tagged-resource search
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaggedResource {
    pub arn: String,
    pub tags: BTreeMap<String, String>,
}

/// A single database instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbInstance {
    pub identifier: String,
    pub address: Option<String>,
    pub port: Option<u16>,
}

/// A database cluster and its endpoints
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbCluster {
    pub identifier: String,
    pub endpoint: Option<String>,
    pub reader_endpoint: Option<String>,
    pub custom_endpoints: Vec<String>,
    pub port: Option<u16>,
}

/// Command to run inside a remote container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecRequest {
    pub cluster: String,
    pub task: String,
    pub container: String,
    pub command: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(ports: &[(u16, u16)], deps: &[(&str, &str)]) -> ContainerSpec {
        ContainerSpec {
            image_uri: "nginx:latest".to_string(),
            ports: ports.iter().copied().collect(),
            essential: true,
            depends_on: deps
                .iter()
                .map(|(n, c)| (n.to_string(), c.to_string()))
                .collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_port_override_parse() {
        let p: PortOverride = "8080:80".parse().unwrap();
        assert_eq!(p, PortOverride { host: 8080, container: 80 });

        assert!("8080".parse::<PortOverride>().is_err());
        assert!("abc:80".parse::<PortOverride>().is_err());
        assert!("70000:80".parse::<PortOverride>().is_err());
    }

    #[test]
    fn test_env_only_change_keeps_network() {
        let mut a = Task::default();
        a.containers.insert("web".into(), spec(&[(80, 8080)], &[]));
        let mut b = a.clone();
        if let Some(web) = b.containers.get_mut("web") {
            web.env_vars.insert("LOG_LEVEL".into(), "debug".into());
        }

        assert_ne!(a, b);
        assert!(!a.requires_network_rebuild(&b));
    }

    #[test]
    fn test_port_or_container_change_rebuilds_network() {
        let mut a = Task::default();
        a.containers.insert("web".into(), spec(&[(80, 8080)], &[]));

        let mut ports = a.clone();
        ports.containers.insert("web".into(), spec(&[(80, 8081)], &[]));
        assert!(a.requires_network_rebuild(&ports));

        let mut added = a.clone();
        added.containers.insert("sidecar".into(), spec(&[], &[]));
        assert!(a.requires_network_rebuild(&added));
        assert!(added.requires_network_rebuild(&a));

        let mut renamed = Task::default();
        renamed.containers.insert("api".into(), spec(&[(80, 8080)], &[]));
        assert!(a.requires_network_rebuild(&renamed));
    }

    #[test]
    fn test_start_order_respects_dependencies() {
        let mut task = Task::default();
        task.containers.insert("web".into(), spec(&[], &[("init", "success"), ("proxy", "start")]));
        task.containers.insert("init".into(), spec(&[], &[]));
        task.containers.insert("proxy".into(), spec(&[], &[("init", "complete")]));

        assert_eq!(task.start_order().unwrap(), vec!["init", "proxy", "web"]);
    }

    #[test]
    fn test_start_order_rejects_cycles_and_unknown() {
        let mut cycle = Task::default();
        cycle.containers.insert("a".into(), spec(&[], &[("b", "start")]));
        cycle.containers.insert("b".into(), spec(&[], &[("a", "start")]));
        assert!(cycle.start_order().is_err());

        let mut unknown = Task::default();
        unknown.containers.insert("a".into(), spec(&[], &[("ghost", "start")]));
        let err = unknown.start_order().unwrap_err();
        assert!(err.to_string().contains("ghost"));
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let mut web = spec(&[], &[]);
        web.secrets.insert("DB_PASSWORD".into(), "hunter2".into());
        let mut task = Task::default();
        task.containers.insert("web".into(), web);
        task.pause_secrets.insert("AWS_SECRET_ACCESS_KEY".into(), "topsecret".into());

        let out = format!("{task:?}");
        assert!(out.contains("DB_PASSWORD"));
        assert!(!out.contains("hunter2"));
        assert!(!out.contains("topsecret"));

        let creds = Credentials::new("AKIA", "shh").with_session_token("tok");
        let out = format!("{creds:?}");
        assert!(!out.contains("shh"));
        assert!(!out.contains("tok\""));
    }

    #[test]
    fn test_credentials_from_container_endpoint_json() {
        let json = r#"{"RoleArn":"arn:aws:iam::123456789012:role/task","AccessKeyId":"ASIA1","SecretAccessKey":"s","Token":"t","Expiration":"2026-10-16T12:00:00Z"}"#;
        let creds: Credentials = serde_json::from_str(json).unwrap();
        assert_eq!(creds.access_key_id, "ASIA1");
        assert_eq!(creds.session_token.as_deref(), Some("t"));
        assert!(creds.expiration.is_some());
        assert_eq!(creds.env_vars()["AWS_SESSION_TOKEN"], "t");
    }

    #[test]
    fn test_exec_enabled_requires_running_agent() {
        let mut ctr = RunningContainer {
            name: "web".into(),
            runtime_id: Some("abc-123".into()),
            last_status: Some("RUNNING".into()),
            managed_agents: vec![ManagedAgent {
                name: EXECUTE_COMMAND_AGENT.into(),
                last_status: Some("RUNNING".into()),
            }],
        };
        assert!(ctr.exec_enabled());

        ctr.managed_agents[0].last_status = Some("STOPPED".into());
        assert!(!ctr.exec_enabled());
    }

    #[test]
    fn test_task_id_from_arn() {
        let task = RunningTask {
            task_arn: "arn:aws:ecs:us-west-2:123456789012:task/shop-test-Cluster/0f9a".into(),
            containers: vec![],
        };
        assert_eq!(task.task_id(), "0f9a");
    }
}
