//! Docker-backed orchestrator
//!
//! ## Layout
//!
//! ```text
//! pause container  (owns the network namespace, publishes all ports,
//!   │               runs port-forwarding sessions in proxy mode)
//!   ├── app container 1   network_mode: container:<pause>
//!   └── app container 2   network_mode: container:<pause>
//! ```
//!
//! All Docker state lives in one actor task. `run_task` and `stop` only queue
//! actions, so the supervisor never blocks on the engine. A start in progress
//! is dropped as soon as the next action arrives. Container exits are
//! tagged with the task generation that started them; exits from a replaced
//! task are ignored.

use super::{Orchestrator, RunTaskOptions, RuntimeError};
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::models::{ContainerCreateBody, HealthStatusEnum, HostConfig, PortBinding};
use bollard::query_parameters::{
    CreateContainerOptions, CreateImageOptions, LogsOptions, RemoveContainerOptions,
    StartContainerOptions, StopContainerOptions, WaitContainerOptions,
};
use bollard::Docker;
use dockside_core::{ContainerSpec, Host, Task};
use futures::StreamExt;
use std::collections::HashMap;
use std::future::Future;
use std::net::Ipv4Addr;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Default image for the network container
pub const DEFAULT_PAUSE_IMAGE: &str = "public.ecr.aws/amazonlinux/amazonlinux:2023";

/// Default time to wait for a dependency to become healthy or to exit
pub const DEFAULT_DEPENDENCY_TIMEOUT: Duration = Duration::from_secs(300);

/// Grace period before a stopping container is killed
const STOP_TIMEOUT_SECS: i32 = 10;

const HEALTH_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// First local port used for port-forwarding sessions
const FIRST_FORWARD_PORT: u16 = 61000;

/// Upper bound on forwarded hosts (one loopback alias and local port each)
const MAX_FORWARDED_HOSTS: usize = 4000;

/// Label carrying the workload a container belongs to
const WORKLOAD_LABEL: &str = "dockside.workload";

/// Docker orchestrator configuration
#[derive(Debug, Clone)]
pub struct DockerConfig {
    /// Prefix for container names, e.g. `dockside-shop-test-api`
    pub name_prefix: String,
    pub pause_image: String,
    /// Region passed to port-forwarding sessions
    pub region: Option<String>,
    /// `unix://` or `tcp://` engine address; local defaults when unset
    pub docker_host: Option<String>,
    pub dependency_timeout: Duration,
}

impl DockerConfig {
    pub fn new(name_prefix: impl Into<String>) -> Self {
        Self {
            name_prefix: name_prefix.into(),
            pause_image: DEFAULT_PAUSE_IMAGE.to_string(),
            region: None,
            docker_host: None,
            dependency_timeout: DEFAULT_DEPENDENCY_TIMEOUT,
        }
    }

    pub fn with_pause_image(mut self, image: impl Into<String>) -> Self {
        self.pause_image = image.into();
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

    pub fn with_dependency_timeout(mut self, timeout: Duration) -> Self {
        self.dependency_timeout = timeout;
        self
    }

    pub fn pause_name(&self) -> String {
        format!("{}-pause", self.name_prefix)
    }

    pub fn container_name(&self, container: &str) -> String {
        format!("{}-{}", self.name_prefix, container)
    }
}

enum Action {
    Run(Box<Task>, RunTaskOptions),
    Stop,
}

/// Runs tasks on the local Docker engine
pub struct DockerOrchestrator {
    docker: Docker,
    config: DockerConfig,
    actions: Option<mpsc::UnboundedSender<Action>>,
}

impl DockerOrchestrator {
    /// Connect to the Docker engine
    pub fn new(config: DockerConfig) -> Result<Self, RuntimeError> {
        let docker = match config.docker_host.as_deref() {
            Some(host) if host.starts_with("tcp://") => {
                Docker::connect_with_http(host, 120, bollard::API_DEFAULT_VERSION)?
            }
            Some(host) => Docker::connect_with_unix(host, 120, bollard::API_DEFAULT_VERSION)?,
            None => Docker::connect_with_socket_defaults()?,
        };
        Ok(Self {
            docker,
            config,
            actions: None,
        })
    }

    fn send(&self, action: Action) {
        match &self.actions {
            Some(tx) => {
                if tx.send(action).is_err() {
                    warn!("Orchestrator already stopped");
                }
            }
            None => warn!("Orchestrator not started"),
        }
    }
}

impl Orchestrator for DockerOrchestrator {
    fn start(&mut self) -> mpsc::UnboundedReceiver<RuntimeError> {
        let (actions_tx, actions_rx) = mpsc::unbounded_channel();
        let (errors_tx, errors_rx) = mpsc::unbounded_channel();
        let (actor, exits_rx) = Actor::new(self.docker.clone(), self.config.clone(), errors_tx);
        tokio::spawn(actor.run(actions_rx, exits_rx));
        self.actions = Some(actions_tx);
        errors_rx
    }

    fn run_task(&self, task: Task, options: RunTaskOptions) {
        self.send(Action::Run(Box::new(task), options));
    }

    fn stop(&self) {
        self.send(Action::Stop);
    }
}

/// A container of some task generation stopped
struct Exit {
    generation: u64,
    name: String,
    code: i64,
}

struct Actor {
    docker: Docker,
    config: DockerConfig,
    errors: mpsc::UnboundedSender<RuntimeError>,
    exits: mpsc::UnboundedSender<Exit>,
    generation: u64,
    current: Option<Task>,
    network_up: bool,
    /// log streamers and exit watchers of the current app containers
    app_tasks: Vec<JoinHandle<()>>,
    proxy_tasks: Vec<JoinHandle<()>>,
}

impl Actor {
    fn new(
        docker: Docker,
        config: DockerConfig,
        errors: mpsc::UnboundedSender<RuntimeError>,
    ) -> (Self, mpsc::UnboundedReceiver<Exit>) {
        let (exits, exits_rx) = mpsc::unbounded_channel();
        let actor = Self {
            docker,
            config,
            errors,
            exits,
            generation: 0,
            current: None,
            network_up: false,
            app_tasks: Vec::new(),
            proxy_tasks: Vec::new(),
        };
        (actor, exits_rx)
    }

    async fn run(
        mut self,
        mut actions: mpsc::UnboundedReceiver<Action>,
        mut exits: mpsc::UnboundedReceiver<Exit>,
    ) {
        let mut pending: Option<Action> = None;
        loop {
            let action = match pending.take() {
                Some(action) => Some(action),
                None => tokio::select! {
                    action = actions.recv() => action,
                    Some(exit) = exits.recv() => {
                        self.on_exit(exit);
                        continue;
                    }
                },
            };
            let Some(Action::Run(task, options)) = action else {
                break;
            };
            match until_next_action(self.run_task(*task, options), &mut actions).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => self.report(e),
                Err(Some(action)) => {
                    info!(generation = self.generation, "Start interrupted");
                    pending = Some(action);
                }
                Err(None) => break,
            }
        }
        self.teardown().await;
        info!("Orchestrator stopped");
        // dropping self closes the error channel
    }

    fn report(&self, err: RuntimeError) {
        if self.errors.send(err).is_err() {
            debug!("Error channel closed");
        }
    }

    async fn run_task(&mut self, task: Task, options: RunTaskOptions) -> Result<(), RuntimeError> {
        let order = task
            .start_order()
            .map_err(|e| RuntimeError::InvalidTask(e.to_string()))?;

        self.generation += 1;
        info!(generation = self.generation, containers = order.len(), "Running task");

        self.stop_app_containers(&task).await;

        let recreate = options.recreate_network || !self.network_up;
        if recreate {
            let existed = self.network_up;
            self.abort_proxies();
            // cleared first so an interrupted start recreates the network next time
            self.network_up = false;
            self.remove_container(&self.config.pause_name()).await?;

            self.start_pause(&task, &options).await?;
            if options.is_proxy() {
                self.start_proxies(&options).await?;
            }
            self.network_up = true;
            if existed {
                self.report(RuntimeError::NetworkRecreated);
            }
        }

        self.current = Some(task.clone());
        for name in &order {
            if let Some(spec) = task.containers.get(name) {
                self.wait_for_dependencies(spec).await?;
                self.start_app(name, spec).await?;
            }
        }
        Ok(())
    }

    fn on_exit(&self, exit: Exit) {
        if exit.generation != self.generation {
            debug!(container = %exit.name, "Ignoring exit from replaced task");
            return;
        }
        let essential = self
            .current
            .as_ref()
            .and_then(|t| t.containers.get(&exit.name))
            .is_some_and(|c| c.essential);
        if essential {
            warn!(container = %exit.name, code = exit.code, "Essential container exited");
            self.report(RuntimeError::ContainerExited {
                name: exit.name,
                code: exit.code,
            });
        } else {
            info!(container = %exit.name, code = exit.code, "Container exited");
        }
    }

    /// Stop the previous task's containers and any leftovers named like the new ones
    async fn stop_app_containers(&mut self, next: &Task) {
        for handle in self.app_tasks.drain(..) {
            handle.abort();
        }
        let mut names: Vec<String> = next.containers.keys().cloned().collect();
        if let Some(current) = &self.current {
            names.extend(current.containers.keys().cloned());
        }
        names.sort();
        names.dedup();
        for name in names {
            if let Err(e) = self.remove_container(&self.config.container_name(&name)).await {
                self.report(e);
            }
        }
        // kept until now so an interrupted stop still tears these down
        self.current = None;
    }

    async fn teardown(&mut self) {
        self.generation += 1;
        self.abort_proxies();
        for handle in self.app_tasks.drain(..) {
            handle.abort();
        }
        if let Some(task) = self.current.take() {
            for name in task.containers.keys() {
                if let Err(e) = self.remove_container(&self.config.container_name(name)).await {
                    self.report(e);
                }
            }
        }
        if let Err(e) = self.remove_container(&self.config.pause_name()).await {
            self.report(e);
        }
        self.network_up = false;
    }

    fn abort_proxies(&mut self) {
        for handle in self.proxy_tasks.drain(..) {
            handle.abort();
        }
    }

    fn labels(&self) -> HashMap<String, String> {
        HashMap::from([(WORKLOAD_LABEL.to_string(), self.config.name_prefix.clone())])
    }

    async fn start_pause(&self, task: &Task, options: &RunTaskOptions) -> Result<(), RuntimeError> {
        let name = self.config.pause_name();
        pull_if_missing(&self.docker, &self.config.pause_image).await?;

        let mut env: Vec<String> = task
            .pause_secrets
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect();
        if let Some(region) = &self.config.region {
            env.push(format!("AWS_REGION={region}"));
        }

        let (exposed_ports, port_bindings) = port_bindings(&task.published_ports());
        let host_config = HostConfig {
            port_bindings: Some(port_bindings),
            cap_add: options.is_proxy().then(|| vec!["NET_ADMIN".to_string()]),
            ..Default::default()
        };
        let body = ContainerCreateBody {
            image: Some(self.config.pause_image.clone()),
            entrypoint: Some(vec!["sleep".to_string()]),
            cmd: Some(vec!["infinity".to_string()]),
            env: Some(env),
            labels: Some(self.labels()),
            exposed_ports: Some(exposed_ports),
            host_config: Some(host_config),
            ..Default::default()
        };

        self.docker
            .create_container(
                Some(CreateContainerOptions {
                    name: Some(name.clone()),
                    platform: String::new(),
                }),
                body,
            )
            .await
            .map_err(|e| RuntimeError::container(&name, e))?;
        self.docker
            .start_container(&name, None::<StartContainerOptions>)
            .await
            .map_err(|e| RuntimeError::container(&name, e))?;

        info!(container = %name, ports = ?task.published_ports(), "Started network container");
        Ok(())
    }

    async fn start_proxies(&mut self, options: &RunTaskOptions) -> Result<(), RuntimeError> {
        let Some(target) = options.ssm_target.as_deref() else {
            return Ok(());
        };
        let pause = self.config.pause_name();

        for (index, host) in options.hosts.iter().enumerate() {
            let plan = ProxyPlan::new(host, index, target, self.config.region.as_deref())?;
            let proxy_err = |e: RuntimeError| RuntimeError::Proxy {
                host: host.name.clone(),
                message: e.to_string(),
            };
            exec_checked(&self.docker, &pause, plan.hosts_entry()).await.map_err(proxy_err)?;
            exec_checked(&self.docker, &pause, plan.dnat_rule()).await.map_err(proxy_err)?;

            info!(host = %host.name, port = host.port, ip = %plan.ip, "Forwarding host");

            let docker = self.docker.clone();
            let errors = self.errors.clone();
            let pause = pause.clone();
            let label = format!("{}:{}", host.name, host.port);
            self.proxy_tasks.push(tokio::spawn(async move {
                let message = match exec_checked(&docker, &pause, plan.session()).await {
                    Ok(_) => "port forwarding session ended".to_string(),
                    Err(e) => e.to_string(),
                };
                let _ = errors.send(RuntimeError::Proxy { host: label, message });
            }));
        }
        Ok(())
    }

    async fn wait_for_dependencies(&self, spec: &ContainerSpec) -> Result<(), RuntimeError> {
        for (dep, condition) in &spec.depends_on {
            let container = self.config.container_name(dep);
            let timeout = self.config.dependency_timeout;
            debug!(dependency = %dep, condition = %condition, "Waiting for dependency");
            match condition.as_str() {
                "start" => {}
                "complete" => {
                    tokio::time::timeout(timeout, wait_exit(&self.docker, &container))
                        .await
                        .map_err(|_| RuntimeError::container(dep, "timed out waiting to complete"))??;
                }
                "success" => {
                    let code = tokio::time::timeout(timeout, wait_exit(&self.docker, &container))
                        .await
                        .map_err(|_| RuntimeError::container(dep, "timed out waiting to succeed"))??;
                    if code != 0 {
                        return Err(RuntimeError::container(
                            dep,
                            format!("exited with code {code}, dependents need success"),
                        ));
                    }
                }
                "healthy" => {
                    tokio::time::timeout(timeout, wait_healthy(&self.docker, &container))
                        .await
                        .map_err(|_| RuntimeError::container(dep, "timed out waiting to be healthy"))??;
                }
                other => {
                    return Err(RuntimeError::InvalidTask(format!(
                        "unknown dependency condition {other:?} on {dep:?}"
                    )));
                }
            }
        }
        Ok(())
    }

    async fn start_app(&mut self, name: &str, spec: &ContainerSpec) -> Result<(), RuntimeError> {
        let cname = self.config.container_name(name);
        pull_if_missing(&self.docker, &spec.image_uri)
            .await
            .map_err(|e| RuntimeError::container(name, e))?;

        let body = ContainerCreateBody {
            image: Some(spec.image_uri.clone()),
            env: Some(spec.environment()),
            labels: Some(self.labels()),
            host_config: Some(HostConfig {
                network_mode: Some(format!("container:{}", self.config.pause_name())),
                ..Default::default()
            }),
            ..Default::default()
        };
        self.docker
            .create_container(
                Some(CreateContainerOptions {
                    name: Some(cname.clone()),
                    platform: String::new(),
                }),
                body,
            )
            .await
            .map_err(|e| RuntimeError::container(name, e))?;
        self.docker
            .start_container(&cname, None::<StartContainerOptions>)
            .await
            .map_err(|e| RuntimeError::container(name, e))?;
        info!(container = %name, image = %spec.image_uri, "Started container");

        self.app_tasks
            .push(stream_logs(self.docker.clone(), cname.clone(), name.to_string()));

        let docker = self.docker.clone();
        let exits = self.exits.clone();
        let generation = self.generation;
        let name = name.to_string();
        self.app_tasks.push(tokio::spawn(async move {
            match wait_exit(&docker, &cname).await {
                Ok(code) => {
                    let _ = exits.send(Exit { generation, name, code });
                }
                Err(e) => debug!(container = %name, error = %e, "Stopped watching container"),
            }
        }));
        Ok(())
    }

    /// Stop then remove a container. A missing container is not an error.
    async fn remove_container(&self, name: &str) -> Result<(), RuntimeError> {
        let stop = self
            .docker
            .stop_container(
                name,
                Some(StopContainerOptions {
                    t: Some(STOP_TIMEOUT_SECS),
                    signal: None,
                }),
            )
            .await;
        match stop {
            Ok(()) => debug!(container = %name, "Stopped container"),
            Err(e) if is_status(&e, 404) => return Ok(()),
            Err(e) if is_status(&e, 304) => {}
            Err(e) => warn!(container = %name, error = %e, "Failed to stop container, removing anyway"),
        }

        let options = RemoveContainerOptions {
            force: true,
            v: true,
            ..Default::default()
        };
        match self.docker.remove_container(name, Some(options)).await {
            Ok(()) => Ok(()),
            Err(e) if is_status(&e, 404) => Ok(()),
            Err(e) => Err(RuntimeError::container(name, e)),
        }
    }
}

/// Drive `work` until it finishes or the next action arrives.
///
/// Dropping `work` cancels it at its current await point, so a start stuck in
/// a pull or a dependency wait never holds back a `Stop`.
async fn until_next_action<T>(
    work: impl Future<Output = T>,
    actions: &mut mpsc::UnboundedReceiver<Action>,
) -> Result<T, Option<Action>> {
    tokio::pin!(work);
    tokio::select! {
        out = &mut work => Ok(out),
        action = actions.recv() => Err(action),
    }
}

fn is_status(err: &bollard::errors::Error, status: u16) -> bool {
    matches!(err, bollard::errors::Error::DockerResponseServerError { status_code, .. } if *status_code == status)
}

/// Exposed ports and bindings for host -> container port pairs
fn port_bindings(
    ports: &std::collections::BTreeMap<u16, u16>,
) -> (Vec<String>, HashMap<String, Option<Vec<PortBinding>>>) {
    let mut bindings: HashMap<String, Option<Vec<PortBinding>>> = HashMap::new();
    for (host, container) in ports {
        bindings
            .entry(format!("{container}/tcp"))
            .or_insert_with(|| Some(Vec::new()))
            .get_or_insert_with(Vec::new)
            .push(PortBinding {
                host_ip: Some("0.0.0.0".to_string()),
                host_port: Some(host.to_string()),
            });
    }
    let mut exposed: Vec<String> = bindings.keys().cloned().collect();
    exposed.sort();
    (exposed, bindings)
}

async fn pull_if_missing(docker: &Docker, image: &str) -> Result<(), RuntimeError> {
    if docker.inspect_image(image).await.is_ok() {
        return Ok(());
    }
    info!(image = %image, "Pulling image");
    let options = CreateImageOptions {
        from_image: Some(image.to_string()),
        ..Default::default()
    };
    let mut stream = docker.create_image(Some(options), None, None);
    while let Some(result) = stream.next().await {
        result.map_err(|e| RuntimeError::Docker(format!("pull {image}: {e}")))?;
    }
    Ok(())
}

/// Wait until the container is not running and return its exit code
async fn wait_exit(docker: &Docker, name: &str) -> Result<i64, RuntimeError> {
    let mut stream = std::pin::pin!(docker.wait_container(name, None::<WaitContainerOptions>));
    match stream.next().await {
        Some(Ok(response)) => Ok(response.status_code),
        Some(Err(bollard::errors::Error::DockerContainerWaitError { code, .. })) => Ok(code),
        Some(Err(e)) => Err(RuntimeError::container(name, e)),
        None => Err(RuntimeError::container(name, "wait ended without a status")),
    }
}

async fn wait_healthy(docker: &Docker, name: &str) -> Result<(), RuntimeError> {
    loop {
        let info = docker
            .inspect_container(name, None)
            .await
            .map_err(|e| RuntimeError::container(name, e))?;
        let state = info.state.unwrap_or_default();
        match state.health.and_then(|h| h.status) {
            Some(HealthStatusEnum::HEALTHY) => return Ok(()),
            Some(HealthStatusEnum::UNHEALTHY) => {
                return Err(RuntimeError::container(name, "reported unhealthy"));
            }
            _ if state.running == Some(false) => {
                return Err(RuntimeError::container(name, "stopped before becoming healthy"));
            }
            _ => tokio::time::sleep(HEALTH_POLL_INTERVAL).await,
        }
    }
}

/// Run a command in a container and fail on a non-zero exit code
async fn exec_checked(docker: &Docker, container: &str, cmd: Vec<String>) -> Result<String, RuntimeError> {
    let display = cmd.join(" ");
    let exec = docker
        .create_exec(
            container,
            CreateExecOptions {
                attach_stdout: Some(true),
                attach_stderr: Some(true),
                cmd: Some(cmd),
                ..Default::default()
            },
        )
        .await?;

    let mut output = String::new();
    if let StartExecResults::Attached { output: mut stream, .. } = docker.start_exec(&exec.id, None).await? {
        while let Some(msg) = stream.next().await {
            output.push_str(&msg?.to_string());
        }
    }

    let inspect = docker.inspect_exec(&exec.id).await?;
    match inspect.exit_code {
        Some(0) | None => Ok(output),
        Some(code) => Err(RuntimeError::container(
            container,
            format!("`{display}` exited with code {code}: {}", output.trim()),
        )),
    }
}

/// Print container output prefixed with the container name
fn stream_logs(docker: Docker, container: String, label: String) -> JoinHandle<()> {
    tokio::spawn(async move {
        let options = LogsOptions {
            follow: true,
            stdout: true,
            stderr: true,
            ..Default::default()
        };
        let mut stream = docker.logs(&container, Some(options));
        while let Some(item) = stream.next().await {
            match item {
                Ok(output) => {
                    for line in output.to_string().lines() {
                        println!("[{label}] {line}");
                    }
                }
                Err(e) => {
                    debug!(container = %label, error = %e, "Log stream ended");
                    break;
                }
            }
        }
    })
}

/// Commands that route one host through the pause container
#[derive(Debug, Clone, PartialEq, Eq)]
struct ProxyPlan {
    host: Host,
    ip: Ipv4Addr,
    local_port: u16,
    target: String,
    region: Option<String>,
}

impl ProxyPlan {
    fn new(host: &Host, index: usize, target: &str, region: Option<&str>) -> Result<Self, RuntimeError> {
        if index >= MAX_FORWARDED_HOSTS {
            return Err(RuntimeError::Proxy {
                host: host.name.clone(),
                message: format!("at most {MAX_FORWARDED_HOSTS} hosts can be forwarded"),
            });
        }
        // 127.1.x.y, skipping .0 in the last octet
        let ip = Ipv4Addr::new(127, 1, (index / 254) as u8, (index % 254 + 1) as u8);
        Ok(Self {
            host: host.clone(),
            ip,
            local_port: FIRST_FORWARD_PORT + index as u16,
            target: target.to_string(),
            region: region.map(str::to_string),
        })
    }

    fn hosts_entry(&self) -> Vec<String> {
        vec![
            "/bin/sh".to_string(),
            "-c".to_string(),
            format!("echo '{} {}' >> /etc/hosts", self.ip, self.host.name),
        ]
    }

    fn dnat_rule(&self) -> Vec<String> {
        [
            "iptables", "-t", "nat", "-A", "OUTPUT", "-p", "tcp", "-d",
        ]
        .iter()
        .map(|s| s.to_string())
        .chain([
            self.ip.to_string(),
            "--dport".to_string(),
            self.host.port.to_string(),
            "-j".to_string(),
            "DNAT".to_string(),
            "--to-destination".to_string(),
            format!("127.0.0.1:{}", self.local_port),
        ])
        .collect()
    }

    fn session(&self) -> Vec<String> {
        let parameters = serde_json::json!({
            "host": [self.host.name],
            "portNumber": [self.host.port.to_string()],
            "localPortNumber": [self.local_port.to_string()],
        });
        let mut cmd: Vec<String> = [
            "aws",
            "ssm",
            "start-session",
            "--target",
            self.target.as_str(),
            "--document-name",
            "AWS-StartPortForwardingSessionToRemoteHost",
            "--parameters",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        cmd.push(parameters.to_string());
        if let Some(region) = &self.region {
            cmd.push("--region".to_string());
            cmd.push(region.clone());
        }
        cmd
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_names() {
        let config = DockerConfig::new("dockside-shop-test-api");
        assert_eq!(config.pause_name(), "dockside-shop-test-api-pause");
        assert_eq!(config.container_name("web"), "dockside-shop-test-api-web");
        assert_eq!(config.pause_image, DEFAULT_PAUSE_IMAGE);
    }

    #[test]
    fn test_port_bindings_group_by_container_port() {
        let ports = BTreeMap::from([(80, 8080), (8080, 8080), (9090, 9091)]);
        let (exposed, bindings) = port_bindings(&ports);

        assert_eq!(exposed, vec!["8080/tcp".to_string(), "9091/tcp".to_string()]);
        let web = bindings["8080/tcp"].as_ref().unwrap();
        let host_ports: Vec<_> = web.iter().filter_map(|b| b.host_port.clone()).collect();
        assert_eq!(host_ports, vec!["80".to_string(), "8080".to_string()]);
    }

    #[test]
    fn test_proxy_plan_commands() {
        let host = Host::new("orders.cluster-x.rds.amazonaws.com", 5432);
        let plan = ProxyPlan::new(&host, 0, "ecs:c_t_r", Some("us-west-2")).unwrap();

        assert_eq!(plan.ip, Ipv4Addr::new(127, 1, 0, 1));
        assert_eq!(plan.local_port, FIRST_FORWARD_PORT);
        assert_eq!(
            plan.hosts_entry()[2],
            "echo '127.1.0.1 orders.cluster-x.rds.amazonaws.com' >> /etc/hosts"
        );

        let rule = plan.dnat_rule().join(" ");
        assert_eq!(
            rule,
            "iptables -t nat -A OUTPUT -p tcp -d 127.1.0.1 --dport 5432 -j DNAT --to-destination 127.0.0.1:61000"
        );

        let session = plan.session();
        assert_eq!(session[4], "ecs:c_t_r");
        assert_eq!(session[6], "AWS-StartPortForwardingSessionToRemoteHost");
        let params: serde_json::Value = serde_json::from_str(&session[8]).unwrap();
        assert_eq!(params["host"][0], "orders.cluster-x.rds.amazonaws.com");
        assert_eq!(params["portNumber"][0], "5432");
        assert_eq!(params["localPortNumber"][0], "61000");
        assert_eq!(session[session.len() - 1], "us-west-2");
    }

    #[test]
    fn test_proxy_plan_addresses_are_distinct() {
        let host = Host::new("h", 80);
        let a = ProxyPlan::new(&host, 253, "t", None).unwrap();
        let b = ProxyPlan::new(&host, 254, "t", None).unwrap();
        assert_eq!(a.ip, Ipv4Addr::new(127, 1, 0, 254));
        assert_eq!(b.ip, Ipv4Addr::new(127, 1, 1, 1));
        assert_ne!(a.local_port, b.local_port);
        assert!(ProxyPlan::new(&host, MAX_FORWARDED_HOSTS, "t", None).is_err());
    }

    #[tokio::test]
    async fn test_stop_interrupts_pending_dependency_wait() {
        let (tx, mut actions) = mpsc::unbounded_channel();
        let waited = tokio::spawn(async move {
            // a dependency that never becomes healthy
            let wait = tokio::time::sleep(DEFAULT_DEPENDENCY_TIMEOUT);
            until_next_action(wait, &mut actions).await
        });
        tx.send(Action::Stop).unwrap();

        let res = tokio::time::timeout(Duration::from_secs(1), waited)
            .await
            .expect("stop should not wait for the dependency")
            .unwrap();
        assert!(matches!(res, Err(Some(Action::Stop))));
    }

    #[tokio::test]
    async fn test_newer_run_replaces_start_in_progress() {
        let (tx, mut actions) = mpsc::unbounded_channel();
        tx.send(Action::Run(Box::default(), RunTaskOptions::default().with_recreate_network(true)))
            .unwrap();

        let res = until_next_action(std::future::pending::<()>(), &mut actions).await;
        assert!(matches!(res, Err(Some(Action::Run(_, options))) if options.recreate_network));
    }

    #[tokio::test]
    async fn test_start_completes_without_actions() {
        let (_tx, mut actions) = mpsc::unbounded_channel();
        let res = until_next_action(async { 7 }, &mut actions).await;
        assert!(matches!(res, Ok(7)));

        let (tx, mut actions) = mpsc::unbounded_channel::<Action>();
        drop(tx);
        let res = until_next_action(std::future::pending::<()>(), &mut actions).await;
        assert!(matches!(res, Err(None)));
    }
}
