//! # Dockside
//!
//! Runs a deployed ECS workload on the developer's machine.
//!
//! ## Architecture
//!
//! ```text
//! Supervisor ──prepare──> TaskDefinition (ECS)
//!     │                    ├── EnvResolver      secrets, overrides, credentials
//!     │                    ├── ImageBuilder     docker build per container
//!     │                    ├── HostDiscoverer   service connect aliases, RDS endpoints
//!     │                    └── build_task       ports, images, dependencies
//!     │
//!     ├──run_task──> Orchestrator (Docker)
//!     │                ├── pause container  (network namespace, published ports, proxies)
//!     │                └── app containers   (start order, dependency conditions)
//!     │
//!     └──events───< Watch (notify)  ──debounce──> rebuild
//! ```
//!
//! The supervisor owns the run loop: orchestrator errors, file changes, and
//! Ctrl-C are handled in one place, and teardown always completes before
//! `run` returns.
//!
//! ## Proxy mode
//!
//! With `--proxy`, the pause container forwards each discovered host to the
//! environment through SSM port-forwarding sessions opened against a running
//! task of the deployed service. See [`runtime::docker`].

#![warn(clippy::all)]

pub mod arn;
pub mod aws;
pub mod config;
pub mod credentials;
pub mod env;
pub mod error;
pub mod exec;
pub mod hosts;
pub mod runtime;
pub mod supervisor;
pub mod task;
pub mod watch;

// Error handling
pub use error::{OrchestratorError, Result, TaskRoleCredentialsError};

// Configuration
pub use config::{RunConfig, DEFAULT_DEBOUNCE};

// Building a task
pub use env::{EnvResolver, ResolvedEnv};
pub use hosts::{HostDiscoverer, TagKeys};
pub use task::build_task;

// Credentials and remote exec
pub use credentials::{StaticCredentials, TaskRoleCredentials};
pub use exec::EcsExecExecutor;

// Running
pub use runtime::{DockerConfig, DockerImageBuilder, DockerOrchestrator, Orchestrator, RunTaskOptions, RuntimeError};
pub use supervisor::{Collaborators, PreparedTask, RunSummary, Supervisor, TaskPreparer, WorkloadPreparer};
pub use watch::Watch;
