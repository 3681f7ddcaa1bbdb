//! Run supervisor
//!
//! Drives one local run from first build to teardown:
//!
//! ```text
//! Idle -> Building -> Running -> RebuildPending -> Building -> Running ...
//!                        |
//!                        +-> Draining -> Terminated
//! ```
//!
//! While running, a single `select!` loop listens to the orchestrator's error
//! channel, the file watcher, the interrupt signal, and the debounce timer.
//! Rebuilds run on the loop itself, so at most one is in flight.

use crate::config::RunConfig;
use crate::credentials::{env_manager_credentials, StaticCredentials, TaskRoleCredentials};
use crate::env::EnvResolver;
use crate::error::{OrchestratorError, Result};
use crate::exec::find_ssm_target;
use crate::hosts::HostDiscoverer;
use crate::runtime::{Orchestrator, RunTaskOptions, RuntimeError};
use crate::task::build_task;
use crate::watch::Watch;
use async_trait::async_trait;
use dockside_core::{
    CommandExecutor, CredentialSource, DocksideError, ImageBuilder, RdsDescriber, RoleAssumer,
    SecretSource, ServiceConnectLister, ServiceDescriber, TaggedResourceSearch, Task,
    TaskDefinitionSource,
};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Output of one Building phase
#[derive(Debug, Clone)]
pub struct PreparedTask {
    pub task: Task,
    pub options: RunTaskOptions,
}

/// Produces the task to run. Called once up front and again for every rebuild.
#[async_trait]
pub trait TaskPreparer: Send + Sync {
    async fn prepare(&self) -> Result<PreparedTask>;
}

/// Remote collaborators used while building a task
#[derive(Clone)]
pub struct Collaborators {
    pub task_definitions: Arc<dyn TaskDefinitionSource>,
    pub secrets_manager: Arc<dyn SecretSource>,
    pub parameter_store: Arc<dyn SecretSource>,
    /// The caller's own credentials
    pub caller: Arc<dyn CredentialSource>,
    pub sts: Arc<dyn RoleAssumer>,
    pub services: Arc<dyn ServiceDescriber>,
    pub service_connect: Arc<dyn ServiceConnectLister>,
    pub tagging: Arc<dyn TaggedResourceSearch>,
    pub rds: Arc<dyn RdsDescriber>,
    pub exec: Arc<dyn CommandExecutor>,
    pub images: Arc<dyn ImageBuilder>,
}

/// Builds the task of a deployed workload:
/// task definition, credentials, environment, images, and in proxy mode the
/// hosts and port-forwarding target.
pub struct WorkloadPreparer {
    config: RunConfig,
    remote: Collaborators,
}

impl WorkloadPreparer {
    pub fn new(config: RunConfig, remote: Collaborators) -> Self {
        Self { config, remote }
    }

    async fn credential_source(&self, task_role_arn: Option<&str>) -> Result<Arc<dyn CredentialSource>> {
        if !self.config.use_task_role {
            return Ok(self.remote.caller.clone());
        }
        let creds = TaskRoleCredentials::new(
            self.config.workload.clone(),
            self.remote.sts.clone(),
            self.remote.services.clone(),
            self.remote.exec.clone(),
        )
        .credentials(task_role_arn)
        .await?;
        Ok(Arc::new(StaticCredentials::new(creds)))
    }

    async fn proxy_options(&self) -> Result<(RunTaskOptions, BTreeMap<String, String>)> {
        let workload = &self.config.workload;
        let hosts = HostDiscoverer::new(
            workload.clone(),
            self.remote.service_connect.clone(),
            self.remote.tagging.clone(),
            self.remote.rds.clone(),
        )
        .with_tag_keys(self.config.tag_keys.clone())
        .hosts()
        .await?;

        let svc = self
            .remote
            .services
            .describe_service(workload)
            .await
            .map_err(|e| OrchestratorError::stage("describe service", e))?;
        let target = find_ssm_target(&svc).ok_or_else(|| {
            OrchestratorError::stage(
                "find port forwarding target",
                DocksideError::not_found("running task with execute command enabled"),
            )
        })?;

        let creds = env_manager_credentials(
            self.remote.sts.as_ref(),
            workload,
            self.config.env_manager_role.as_deref(),
        )
        .await?;

        info!(hosts = hosts.len(), target = %target, "Proxy configured");
        Ok((RunTaskOptions::default().with_proxy(hosts, target), creds.env_vars()))
    }
}

#[async_trait]
impl TaskPreparer for WorkloadPreparer {
    async fn prepare(&self) -> Result<PreparedTask> {
        let workload = &self.config.workload;
        info!(workload = %workload, "Building task");

        let task_def = self
            .remote
            .task_definitions
            .task_definition(workload)
            .await
            .map_err(|e| OrchestratorError::stage("get task definition", e))?;

        let credentials = self.credential_source(task_def.task_role_arn.as_deref()).await?;
        let mut resolver = EnvResolver::new(
            self.remote.secrets_manager.clone(),
            self.remote.parameter_store.clone(),
            credentials,
        );
        if let Some(region) = &self.config.region {
            resolver = resolver.with_region(region.clone());
        }
        let envs = resolver.resolve(&task_def, &self.config.env_overrides).await?;

        let images = self
            .remote
            .images
            .build_images(workload)
            .await
            .map_err(|e| OrchestratorError::stage("build images", e))?;

        let (options, pause_secrets) = if self.config.proxy {
            let (options, secrets) = self.proxy_options().await?;
            (options, Some(secrets))
        } else {
            (RunTaskOptions::default(), None)
        };

        let task = build_task(&task_def, envs, &self.config.port_overrides, &images, pause_secrets);
        debug!(containers = task.containers.len(), "Task built");
        Ok(PreparedTask { task, options })
    }
}

/// How a run ended
#[derive(Debug, Default)]
pub struct RunSummary {
    /// Successful rebuilds after the first start
    pub rebuilds: usize,
    /// Errors reported while tearing down
    pub teardown_errors: Vec<RuntimeError>,
}

enum WatchSignal {
    Changed(Vec<PathBuf>),
    Failed(notify::Error),
    Closed,
}

async fn next_watch_signal(watch: &mut Option<Watch>) -> WatchSignal {
    match watch {
        Some(w) => tokio::select! {
            Some(paths) = w.events.recv() => WatchSignal::Changed(paths),
            Some(err) = w.errors.recv() => WatchSignal::Failed(err),
            else => WatchSignal::Closed,
        },
        None => std::future::pending().await,
    }
}

/// Supervises a local run
pub struct Supervisor<O, P> {
    orchestrator: O,
    preparer: P,
    watch: Option<Watch>,
    debounce: Duration,
}

impl<O: Orchestrator, P: TaskPreparer> Supervisor<O, P> {
    pub fn new(orchestrator: O, preparer: P) -> Self {
        Self {
            orchestrator,
            preparer,
            watch: None,
            debounce: crate::config::DEFAULT_DEBOUNCE,
        }
    }

    /// Rebuild when the watcher reports changes
    pub fn with_watch(mut self, watch: Watch) -> Self {
        self.watch = Some(watch);
        self
    }

    /// Quiet period before a rebuild. Zero rebuilds on the first change.
    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    /// Run until interrupted or until a fatal error.
    ///
    /// Every message on `interrupt` starts draining; later ones are ignored.
    /// Returns once the orchestrator has torn everything down.
    pub async fn run(mut self, mut interrupt: mpsc::Receiver<()>) -> Result<RunSummary> {
        let first = match self.preparer.prepare().await {
            Ok(prepared) => prepared,
            Err(e) => {
                if let Some(w) = self.watch.as_mut() {
                    w.close();
                }
                return Err(e);
            }
        };

        let mut errors = self.orchestrator.start();
        let mut current = first.clone();
        self.orchestrator.run_task(first.task, first.options);
        info!("🚀 Workload running, press Ctrl-C to stop");

        let mut summary = RunSummary::default();
        let mut fatal: Option<OrchestratorError> = None;
        let mut draining = false;
        let mut pending_rebuild = false;
        let timer = tokio::time::sleep(self.debounce);
        tokio::pin!(timer);

        loop {
            tokio::select! {
                err = errors.recv() => match err {
                    None => break,
                    Some(e) if e.is_restart() => info!("Network container recreated"),
                    Some(e) if draining => {
                        warn!(error = %e, "Teardown error");
                        summary.teardown_errors.push(e);
                    }
                    Some(e) => {
                        error!(error = %e, "Run failed, stopping");
                        fatal = Some(e.into());
                        draining = true;
                        self.begin_drain();
                    }
                },

                Some(()) = interrupt.recv(), if !draining => {
                    info!("Interrupt received, stopping");
                    draining = true;
                    self.begin_drain();
                }

                signal = next_watch_signal(&mut self.watch), if !draining => match signal {
                    WatchSignal::Changed(paths) => {
                        debug!(paths = ?paths, "Files changed");
                        pending_rebuild = true;
                        timer.as_mut().reset(Instant::now() + self.debounce);
                    }
                    WatchSignal::Failed(e) => {
                        error!(error = %e, "File watcher failed, stopping");
                        fatal = Some(OrchestratorError::watch(e.to_string()));
                        draining = true;
                        self.begin_drain();
                    }
                    WatchSignal::Closed => {
                        debug!("File watcher ended");
                        self.watch = None;
                    }
                },

                () = &mut timer, if pending_rebuild && !draining => {
                    pending_rebuild = false;
                    info!("🔄 Rebuilding");
                    match self.preparer.prepare().await {
                        Ok(next) => {
                            // the pause container owns ports, hosts and the forwarding session
                            let recreate = current.task.requires_network_rebuild(&next.task)
                                || next.options.proxy_changed(&current.options);
                            current = next.clone();
                            self.orchestrator
                                .run_task(next.task, next.options.with_recreate_network(recreate));
                            summary.rebuilds += 1;
                            info!(recreate_network = recreate, "✅ Rebuild submitted");
                        }
                        Err(e) => warn!(error = %e, "Rebuild failed, waiting for the next change"),
                    }
                }
            }
        }

        info!(
            teardown_errors = summary.teardown_errors.len(),
            "Run finished"
        );
        match fatal {
            Some(e) => Err(e),
            None => Ok(summary),
        }
    }

    fn begin_drain(&mut self) {
        if let Some(mut w) = self.watch.take() {
            w.close();
        }
        self.orchestrator.stop();
    }
}
