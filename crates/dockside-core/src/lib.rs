//! Dockside Core - Shared types and traits
//!
//! This crate defines the core abstractions used across:
//! - dockside-orchestrator (resolver, discovery, local runtime, CLI)
//! - the AWS and Docker adapters behind it
//!
//! Key types:
//! - TaskDefinition (the remote workload, as fetched)
//! - ContainerEnv / EnvVarValue (resolved environment)
//! - Task (what the local runtime executes)
//! - Collaborator traits (every remote call goes through one of these)

pub mod types;
pub mod traits;
pub mod error;

pub use types::*;
pub use traits::*;
pub use error::*;
