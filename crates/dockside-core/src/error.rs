//! Error types for Dockside collaborators

use thiserror::Error;

/// Error returned by collaborator implementations (AWS, local tools)
#[derive(Error, Debug)]
pub enum DocksideError {
    /// AWS service call failed
    #[error("{operation}: {message}")]
    Aws { operation: String, message: String },

    /// External command (aws cli, docker build) failed
    #[error("command `{program}` failed: {message}")]
    Command { program: String, message: String },

    #[error("{0} not found")]
    NotFound(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl DocksideError {
    /// Convert from a generic AWS SDK error, keeping the operation name
    pub fn from_aws<E>(operation: impl Into<String>, err: E) -> Self
    where
        E: std::fmt::Display,
    {
        Self::Aws {
            operation: operation.into(),
            message: err.to_string(),
        }
    }

    /// Create a not-found error
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}
