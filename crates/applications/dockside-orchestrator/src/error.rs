//! Error types for the local runner

use dockside_core::DocksideError;
use thiserror::Error;

use crate::runtime::RuntimeError;

/// Orchestrator result type
pub type Result<T> = std::result::Result<T, OrchestratorError>;

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors that can occur while preparing or supervising a local run
#[derive(Error, Debug)]
pub enum OrchestratorError {
    /// Override key names a container that is not in the task definition
    #[error("{key:?} targets invalid container")]
    InvalidOverride { key: String },

    /// ARN could not be parsed, or names an unsupported service
    #[error("invalid arn {arn:?}: {reason}")]
    InvalidArn { arn: String, reason: String },

    /// Secret name shadows a plain variable of the same container
    #[error("secret names must be unique, but an environment variable {name:?} already exists")]
    DuplicateSecret { name: String },

    /// A secret backend call failed
    #[error("get secret {value_from:?}: {source}")]
    GetSecret {
        value_from: String,
        #[source]
        source: DocksideError,
    },

    /// Failure wrapped with the stage it happened in, displayed `<stage>: <cause>`
    #[error("{stage}: {source}")]
    Stage {
        stage: &'static str,
        #[source]
        source: BoxError,
    },

    /// Both task-role credential methods failed
    #[error(transparent)]
    TaskRoleCredentials(#[from] TaskRoleCredentialsError),

    /// Collaborator (AWS, Docker, local tool) failure
    #[error(transparent)]
    Collaborator(#[from] DocksideError),

    /// Local container runtime failure
    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    /// File watcher failure
    #[error("watch: {0}")]
    Watch(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),
}

impl OrchestratorError {
    /// Wrap an error with the stage it happened in
    pub fn stage<E>(stage: &'static str, err: E) -> Self
    where
        E: Into<BoxError>,
    {
        Self::Stage {
            stage,
            source: err.into(),
        }
    }

    /// Create an invalid ARN error
    pub fn invalid_arn(arn: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidArn {
            arn: arn.into(),
            reason: reason.into(),
        }
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a watcher error
    pub fn watch(msg: impl Into<String>) -> Self {
        Self::Watch(msg.into())
    }
}

/// Both ways of obtaining task-role credentials failed.
///
/// Either cause alone can be misleading (a developer may lack
/// `sts:AssumeRole` but have exec access, or the service may not have exec
/// enabled), so both are kept.
#[derive(Error, Debug)]
#[error("assume role: {assume_role}; ecs exec: {ecs_exec}")]
pub struct TaskRoleCredentialsError {
    pub assume_role: DocksideError,
    pub ecs_exec: DocksideError,
}
