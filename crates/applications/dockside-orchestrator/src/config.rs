//! Run configuration
//!
//! [`RunConfig`] is what the CLI flags turn into once validated. The parsers
//! here accept the command-line forms of overrides and build contexts.

use crate::error::{OrchestratorError, Result};
use crate::hosts::TagKeys;
use crate::runtime::docker::{DEFAULT_DEPENDENCY_TIMEOUT, DEFAULT_PAUSE_IMAGE};
use dockside_core::{PortOverride, WorkloadName};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// Quiet period after the last file change before a rebuild starts
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(500);

/// Everything one `run-local` invocation needs
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub workload: WorkloadName,
    /// `KEY` or `container:KEY` -> value
    pub env_overrides: BTreeMap<String, String>,
    pub port_overrides: Vec<PortOverride>,
    /// container name -> docker build context
    pub build_contexts: BTreeMap<String, PathBuf>,
    /// Rebuild on changes below this directory
    pub watch_dir: Option<PathBuf>,
    /// Forward traffic to the environment's private hosts
    pub proxy: bool,
    /// Run with the task role's credentials instead of the caller's
    pub use_task_role: bool,
    pub env_manager_role: Option<String>,
    pub debounce: Duration,
    pub pause_image: String,
    pub dependency_timeout: Duration,
    pub tag_keys: TagKeys,
    pub region: Option<String>,
    pub docker_host: Option<String>,
}

impl RunConfig {
    pub fn new(workload: WorkloadName) -> Self {
        Self {
            workload,
            env_overrides: BTreeMap::new(),
            port_overrides: Vec::new(),
            build_contexts: BTreeMap::new(),
            watch_dir: None,
            proxy: false,
            use_task_role: false,
            env_manager_role: None,
            debounce: DEFAULT_DEBOUNCE,
            pause_image: DEFAULT_PAUSE_IMAGE.to_string(),
            dependency_timeout: DEFAULT_DEPENDENCY_TIMEOUT,
            tag_keys: TagKeys::default(),
            region: None,
            docker_host: None,
        }
    }

    /// Add an override; a later value for the same key wins
    pub fn with_env_override(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env_overrides.insert(key.into(), value.into());
        self
    }

    pub fn with_port_override(mut self, port: PortOverride) -> Self {
        self.port_overrides.push(port);
        self
    }

    pub fn with_build_context(mut self, container: impl Into<String>, context: impl Into<PathBuf>) -> Self {
        self.build_contexts.insert(container.into(), context.into());
        self
    }

    pub fn with_watch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.watch_dir = Some(dir.into());
        self
    }

    pub fn with_proxy(mut self, proxy: bool) -> Self {
        self.proxy = proxy;
        self
    }

    pub fn with_task_role(mut self, use_task_role: bool) -> Self {
        self.use_task_role = use_task_role;
        self
    }

    pub fn with_env_manager_role(mut self, role_arn: impl Into<String>) -> Self {
        self.env_manager_role = Some(role_arn.into());
        self
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    pub fn with_pause_image(mut self, image: impl Into<String>) -> Self {
        self.pause_image = image.into();
        self
    }

    pub fn with_dependency_timeout(mut self, timeout: Duration) -> Self {
        self.dependency_timeout = timeout;
        self
    }

    pub fn with_tag_keys(mut self, tag_keys: TagKeys) -> Self {
        self.tag_keys = tag_keys;
        self
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    pub fn with_docker_host(mut self, host: impl Into<String>) -> Self {
        self.docker_host = Some(host.into());
        self
    }

    /// Prefix for local container names, e.g. `dockside-shop-test-api`
    pub fn container_prefix(&self) -> String {
        format!(
            "dockside-{}-{}-{}",
            self.workload.app, self.workload.env, self.workload.name
        )
        .to_lowercase()
    }

    /// Reject combinations that cannot run
    pub fn validate(&self) -> Result<()> {
        let WorkloadName { app, env, name } = &self.workload;
        for (field, value) in [("application", app), ("environment", env), ("workload", name)] {
            if value.trim().is_empty() {
                return Err(OrchestratorError::config(format!("{field} name is required")));
            }
        }
        if self.env_manager_role.is_some() && !self.proxy {
            return Err(OrchestratorError::config(
                "an environment manager role only applies with proxy mode",
            ));
        }
        let mut hosts = BTreeMap::new();
        for port in &self.port_overrides {
            if let Some(prev) = hosts.insert(port.host, port.container) {
                return Err(OrchestratorError::config(format!(
                    "host port {} is overridden twice ({} and {})",
                    port.host, prev, port.container
                )));
            }
        }
        Ok(())
    }
}

/// Parse `KEY=VALUE` or `container:KEY=VALUE`. The value may contain `=`.
pub fn parse_env_override(s: &str) -> Result<(String, String)> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| OrchestratorError::config(format!("override {s:?} must be [container:]KEY=VALUE")))?;
    let name = key.rsplit(':').next().unwrap_or(key);
    if name.is_empty() || key.starts_with(':') {
        return Err(OrchestratorError::config(format!("override {s:?} has an empty name")));
    }
    Ok((key.to_string(), value.to_string()))
}

/// Parse `host:container`
pub fn parse_port_override(s: &str) -> Result<PortOverride> {
    Ok(s.parse()?)
}

/// Parse `container=path`
pub fn parse_build_context(s: &str) -> Result<(String, PathBuf)> {
    match s.split_once('=') {
        Some((container, path)) if !container.is_empty() && !path.is_empty() => {
            Ok((container.to_string(), PathBuf::from(path)))
        }
        _ => Err(OrchestratorError::config(format!("build context {s:?} must be CONTAINER=PATH"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> RunConfig {
        RunConfig::new(WorkloadName::new("shop", "test", "api"))
    }

    #[test]
    fn test_defaults() {
        let cfg = config();
        assert_eq!(cfg.debounce, DEFAULT_DEBOUNCE);
        assert_eq!(cfg.pause_image, DEFAULT_PAUSE_IMAGE);
        assert_eq!(cfg.tag_keys.application, "dockside-application");
        assert!(!cfg.proxy);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_container_prefix_lowercase() {
        let cfg = RunConfig::new(WorkloadName::new("Shop", "Test", "API"));
        assert_eq!(cfg.container_prefix(), "dockside-shop-test-api");
    }

    #[test]
    fn test_env_override_forms() {
        assert_eq!(
            parse_env_override("LOG_LEVEL=debug").unwrap(),
            ("LOG_LEVEL".to_string(), "debug".to_string())
        );
        assert_eq!(
            parse_env_override("api:DSN=user=me host=db").unwrap(),
            ("api:DSN".to_string(), "user=me host=db".to_string())
        );
        assert_eq!(
            parse_env_override("EMPTY=").unwrap(),
            ("EMPTY".to_string(), String::new())
        );
        assert!(parse_env_override("NOVALUE").is_err());
        assert!(parse_env_override("=x").is_err());
        assert!(parse_env_override("api:=x").is_err());
    }

    #[test]
    fn test_build_context() {
        assert_eq!(
            parse_build_context("web=./frontend").unwrap(),
            ("web".to_string(), PathBuf::from("./frontend"))
        );
        assert!(parse_build_context("web").is_err());
        assert!(parse_build_context("=./x").is_err());
    }

    #[test]
    fn test_port_override() {
        let port = parse_port_override("8080:80").unwrap();
        assert_eq!((port.host, port.container), (8080, 80));
        assert!(parse_port_override("8080").is_err());
    }

    #[test]
    fn test_validate_rejects_duplicate_host_port() {
        let cfg = config()
            .with_port_override(parse_port_override("8080:80").unwrap())
            .with_port_override(parse_port_override("8080:81").unwrap());
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_validate_env_manager_role_needs_proxy() {
        let cfg = config().with_env_manager_role("arn:aws:iam::123456789012:role/x");
        assert!(cfg.validate().is_err());
        assert!(cfg.with_proxy(true).validate().is_ok());
    }

    #[test]
    fn test_validate_requires_names() {
        let cfg = RunConfig::new(WorkloadName::new("shop", " ", "api"));
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("environment name is required"));
    }
}
