//! Task building
//!
//! Pure conversion from the remote task definition and resolved environment
//! into the [`Task`] the local runtime executes. No I/O.

use crate::env::ResolvedEnv;
use dockside_core::{ContainerDefinition, ContainerSpec, PortOverride, Task, TaskDefinition};
use std::collections::BTreeMap;
use tracing::debug;

/// Build the local task.
///
/// - `images`: container name -> locally built image; containers not in the
///   map keep their task definition image
/// - `pause_secrets`: environment manager credentials for the shared network
///   container, only set in proxy mode
pub fn build_task(
    task_def: &TaskDefinition,
    mut envs: ResolvedEnv,
    port_overrides: &[PortOverride],
    images: &BTreeMap<String, String>,
    pause_secrets: Option<BTreeMap<String, String>>,
) -> Task {
    let containers = task_def
        .containers
        .iter()
        .map(|ctr| {
            let env = envs.remove(&ctr.name).unwrap_or_default();
            let mut spec = ContainerSpec {
                image_uri: images.get(&ctr.name).cloned().unwrap_or_else(|| ctr.image.clone()),
                ports: port_map(ctr, port_overrides),
                essential: ctr.essential,
                depends_on: ctr
                    .depends_on
                    .iter()
                    .map(|d| (d.container_name.clone(), d.condition.to_lowercase()))
                    .collect(),
                ..Default::default()
            };
            for (name, value) in env {
                if value.secret {
                    spec.secrets.insert(name, value.value);
                } else {
                    spec.env_vars.insert(name, value.value);
                }
            }
            (ctr.name.clone(), spec)
        })
        .collect();

    Task {
        containers,
        pause_secrets: pause_secrets.unwrap_or_default(),
    }
}

/// host port -> container port for one container
fn port_map(ctr: &ContainerDefinition, port_overrides: &[PortOverride]) -> BTreeMap<u16, u16> {
    let mut ports = BTreeMap::new();
    for mapping in &ctr.port_mappings {
        let Some(container_port) = mapping.container_port else {
            continue;
        };
        let host_port = match mapping.host_port {
            Some(p) if p != 0 => p,
            _ => container_port,
        };
        let container_port = match port_overrides.iter().find(|o| o.host == host_port) {
            Some(o) => {
                debug!(container = %ctr.name, host_port, from = container_port, to = o.container, "port override");
                o.container
            }
            None => container_port,
        };
        ports.insert(host_port, container_port);
    }
    ports
}

#[cfg(test)]
mod tests {
    use super::*;
    use dockside_core::{ContainerEnv, EnvVarValue};

    fn task_def() -> TaskDefinition {
        TaskDefinition {
            containers: vec![
                ContainerDefinition::new("web", "123456789012.dkr.ecr.us-west-2.amazonaws.com/web:abc")
                    .with_port(80, 8080)
                    .with_port(9090, 9090)
                    .with_dependency("init", "SUCCESS"),
                ContainerDefinition::new("init", "busybox").with_essential(false),
            ],
            task_role_arn: None,
        }
    }

    fn envs() -> ResolvedEnv {
        let web: ContainerEnv = BTreeMap::from([
            ("LOG_LEVEL".to_string(), EnvVarValue::overridden("debug")),
            ("DB_PASSWORD".to_string(), EnvVarValue::secret("hunter2")),
            ("PORT".to_string(), EnvVarValue::plain("8080")),
        ]);
        BTreeMap::from([("web".to_string(), web)])
    }

    fn images() -> BTreeMap<String, String> {
        BTreeMap::from([("web".to_string(), "dockside/shop-test-api-web:local".to_string())])
    }

    #[test]
    fn test_port_override_replaces_container_port() {
        let task = build_task(
            &task_def(),
            envs(),
            &[PortOverride { host: 80, container: 8081 }],
            &images(),
            None,
        );
        let web = &task.containers["web"];
        assert_eq!(web.ports, BTreeMap::from([(80, 8081), (9090, 9090)]));
    }

    #[test]
    fn test_unset_host_port_uses_container_port() {
        let mut td = task_def();
        td.containers[1].port_mappings.push(dockside_core::PortMapping {
            container_port: Some(5000),
            host_port: None,
        });
        let task = build_task(&td, envs(), &[], &images(), None);
        assert_eq!(task.containers["init"].ports, BTreeMap::from([(5000, 5000)]));
    }

    #[test]
    fn test_env_split_and_image_fallback() {
        let task = build_task(&task_def(), envs(), &[], &images(), None);

        let web = &task.containers["web"];
        assert_eq!(web.image_uri, "dockside/shop-test-api-web:local");
        assert_eq!(web.env_vars.get("LOG_LEVEL").map(String::as_str), Some("debug"));
        assert_eq!(web.secrets.get("DB_PASSWORD").map(String::as_str), Some("hunter2"));
        assert!(!web.env_vars.contains_key("DB_PASSWORD"));

        let init = &task.containers["init"];
        assert_eq!(init.image_uri, "busybox");
        assert!(!init.essential);
        assert!(task.pause_secrets.is_empty());
    }

    #[test]
    fn test_depends_on_lower_cased_and_never_missing() {
        let task = build_task(&task_def(), envs(), &[], &images(), None);
        assert_eq!(
            task.containers["web"].depends_on,
            BTreeMap::from([("init".to_string(), "success".to_string())])
        );
        assert!(task.containers["init"].depends_on.is_empty());
    }

    #[test]
    fn test_rebuild_decision() {
        let first = build_task(&task_def(), envs(), &[], &images(), None);
        let again = build_task(&task_def(), envs(), &[], &images(), None);
        assert_eq!(first, again);

        let mut changed_env = envs();
        if let Some(web) = changed_env.get_mut("web") {
            web.insert("LOG_LEVEL".into(), EnvVarValue::overridden("trace"));
        }
        let env_only = build_task(&task_def(), changed_env, &[], &images(), None);
        assert_ne!(first, env_only);
        assert!(!first.requires_network_rebuild(&env_only));

        let ports = build_task(
            &task_def(),
            envs(),
            &[PortOverride { host: 80, container: 8081 }],
            &images(),
            None,
        );
        assert_ne!(first, ports);
        assert!(first.requires_network_rebuild(&ports));
    }

    #[test]
    fn test_pause_secrets_kept_apart() {
        let pause = BTreeMap::from([("AWS_ACCESS_KEY_ID".to_string(), "ENVMGR".to_string())]);
        let task = build_task(&task_def(), envs(), &[], &images(), Some(pause.clone()));
        assert_eq!(task.pause_secrets, pause);
        assert!(!task.containers["web"].secrets.contains_key("AWS_ACCESS_KEY_ID"));
    }
}
