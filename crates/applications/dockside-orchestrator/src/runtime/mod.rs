//! Local container runtime
//!
//! The supervisor drives an [`Orchestrator`]: it submits tasks and listens on
//! the error channel returned by [`Orchestrator::start`]. The channel closes
//! once the orchestrator has finished tearing down after [`Orchestrator::stop`].

pub mod docker;
pub mod image;

pub use docker::{DockerConfig, DockerOrchestrator};
pub use image::DockerImageBuilder;

use dockside_core::{Host, Task};
use thiserror::Error;
use tokio::sync::mpsc;

/// Options for one `run_task` call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunTaskOptions {
    /// Tear down and recreate the shared network container
    pub recreate_network: bool,
    /// Hosts to forward to (proxy mode)
    pub hosts: Vec<Host>,
    /// SSM target used for port forwarding, `ecs:<cluster>_<task>_<runtime>`
    pub ssm_target: Option<String>,
}

impl RunTaskOptions {
    pub fn with_recreate_network(mut self, recreate: bool) -> Self {
        self.recreate_network = recreate;
        self
    }

    pub fn with_proxy(mut self, hosts: Vec<Host>, ssm_target: impl Into<String>) -> Self {
        self.hosts = hosts;
        self.ssm_target = Some(ssm_target.into());
        self
    }

    pub fn is_proxy(&self) -> bool {
        self.ssm_target.is_some()
    }

    /// Whether the pause container's proxy setup differs from `previous`
    pub fn proxy_changed(&self, previous: &RunTaskOptions) -> bool {
        self.hosts != previous.hosts || self.ssm_target != previous.ssm_target
    }
}

/// Errors reported on the orchestrator's error channel
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// The shared network container was replaced. Not a failure.
    #[error("network container recreated")]
    NetworkRecreated,

    /// An essential container stopped
    #[error("essential container {name:?} exited with code {code}")]
    ContainerExited { name: String, code: i64 },

    /// Starting, stopping or waiting on a container failed
    #[error("container {name:?}: {message}")]
    Container { name: String, message: String },

    /// Port forwarding to a host failed
    #[error("proxy to {host}: {message}")]
    Proxy { host: String, message: String },

    /// Docker engine error
    #[error("docker: {0}")]
    Docker(String),

    /// Task cannot be run as given
    #[error("invalid task: {0}")]
    InvalidTask(String),
}

impl RuntimeError {
    /// Whether this is a restart notice rather than a failure
    pub fn is_restart(&self) -> bool {
        matches!(self, Self::NetworkRecreated)
    }

    pub fn container(name: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::Container {
            name: name.into(),
            message: message.to_string(),
        }
    }
}

impl From<bollard::errors::Error> for RuntimeError {
    fn from(err: bollard::errors::Error) -> Self {
        Self::Docker(err.to_string())
    }
}

/// Runs a [`Task`] locally
pub trait Orchestrator: Send {
    /// Start the orchestrator. Returns the error channel, which closes after
    /// `stop` has finished tearing everything down.
    fn start(&mut self) -> mpsc::UnboundedReceiver<RuntimeError>;

    /// Submit a task, replacing the running one
    fn run_task(&self, task: Task, options: RunTaskOptions);

    /// Begin teardown
    fn stop(&self);
}
