//! ECS adapter: task definitions, running tasks and service connect

use super::sdk_error;
use super::tagging::TaggingAdapter;
use crate::hosts::TagKeys;
use async_trait::async_trait;
use aws_sdk_ecs::types::{DesiredStatus, Service};
use aws_sdk_ecs::Client;
use dockside_core::{
    ClientAlias, ContainerDefinition, ContainerDependency, Deployment, DeploymentStatus,
    DocksideError, ManagedAgent, PortMapping, RunningContainer, RunningTask, SecretRef,
    ServiceConnectLister, ServiceConnectService, ServiceDescriber, ServiceDescription,
    TaggedResourceSearch, TaskDefinition, TaskDefinitionSource, WorkloadName,
};
use std::collections::BTreeMap;
use tracing::{debug, warn};

const ECS_SERVICE_RESOURCE: &str = "ecs:service";

// DescribeServices accepts at most 10 services per call
const DESCRIBE_SERVICES_BATCH: usize = 10;

/// Cluster and service name of a deployed service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceRef {
    pub cluster: String,
    pub service: String,
}

impl ServiceRef {
    /// Parse `arn:aws:ecs:<region>:<account>:service/<cluster>/<service>`
    pub fn from_arn(arn: &str) -> Option<Self> {
        let resource = arn.splitn(6, ':').nth(5)?;
        let mut parts = resource.split('/');
        match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some("service"), Some(cluster), Some(service), None) => Some(Self {
                cluster: cluster.to_string(),
                service: service.to_string(),
            }),
            _ => None,
        }
    }
}

pub struct EcsAdapter {
    client: Client,
    tagging: TaggingAdapter,
    tag_keys: TagKeys,
}

impl EcsAdapter {
    pub fn new(client: Client, tagging: TaggingAdapter, tag_keys: TagKeys) -> Self {
        Self {
            client,
            tagging,
            tag_keys,
        }
    }

    fn env_tags(&self, workload: &WorkloadName) -> BTreeMap<String, String> {
        BTreeMap::from([
            (self.tag_keys.application.clone(), workload.app.clone()),
            (self.tag_keys.environment.clone(), workload.env.clone()),
        ])
    }

    /// Find the ECS service backing a workload through its tags
    pub async fn find_service(&self, workload: &WorkloadName) -> dockside_core::Result<ServiceRef> {
        let mut tags = self.env_tags(workload);
        tags.insert(self.tag_keys.service.clone(), workload.name.clone());

        let resources = self
            .tagging
            .resources_by_tags(&[ECS_SERVICE_RESOURCE], &tags)
            .await?;
        let mut refs = resources.iter().filter_map(|r| ServiceRef::from_arn(&r.arn));
        let found = refs
            .next()
            .ok_or_else(|| DocksideError::not_found(format!("ECS service for {workload}")))?;
        if refs.next().is_some() {
            warn!(workload = %workload, "multiple ECS services tagged for workload, using the first");
        }
        debug!(cluster = %found.cluster, service = %found.service, "found service");
        Ok(found)
    }

    async fn describe_services(&self, cluster: &str, services: &[String]) -> dockside_core::Result<Vec<Service>> {
        let mut described = Vec::new();
        for batch in services.chunks(DESCRIBE_SERVICES_BATCH) {
            let out = self
                .client
                .describe_services()
                .cluster(cluster)
                .set_services(Some(batch.to_vec()))
                .send()
                .await
                .map_err(|e| sdk_error("DescribeServices", e))?;
            described.extend(out.services().iter().cloned());
        }
        Ok(described)
    }

    async fn service(&self, svc: &ServiceRef) -> dockside_core::Result<Service> {
        self.describe_services(&svc.cluster, std::slice::from_ref(&svc.service))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| DocksideError::not_found(format!("service {}", svc.service)))
    }
}

#[async_trait]
impl TaskDefinitionSource for EcsAdapter {
    async fn task_definition(&self, workload: &WorkloadName) -> dockside_core::Result<TaskDefinition> {
        let svc = self.find_service(workload).await?;
        let service = self.service(&svc).await?;
        let arn = service
            .task_definition()
            .ok_or_else(|| DocksideError::not_found(format!("task definition of {}", svc.service)))?;

        let out = self
            .client
            .describe_task_definition()
            .task_definition(arn)
            .send()
            .await
            .map_err(|e| sdk_error("DescribeTaskDefinition", e))?;
        let td = out
            .task_definition()
            .ok_or_else(|| DocksideError::not_found(format!("task definition {arn}")))?;

        let containers = td
            .container_definitions()
            .iter()
            .map(|c| ContainerDefinition {
                name: c.name().unwrap_or_default().to_string(),
                image: c.image().unwrap_or_default().to_string(),
                environment: c
                    .environment()
                    .iter()
                    .filter_map(|kv| Some((kv.name()?.to_string(), kv.value().unwrap_or_default().to_string())))
                    .collect(),
                secrets: c
                    .secrets()
                    .iter()
                    .map(|s| SecretRef {
                        name: s.name().to_string(),
                        value_from: s.value_from().to_string(),
                    })
                    .collect(),
                port_mappings: c
                    .port_mappings()
                    .iter()
                    .map(|p| PortMapping {
                        container_port: p.container_port().and_then(|v| u16::try_from(v).ok()),
                        host_port: p.host_port().and_then(|v| u16::try_from(v).ok()),
                    })
                    .collect(),
                essential: c.essential().unwrap_or(true),
                depends_on: c
                    .depends_on()
                    .iter()
                    .map(|d| ContainerDependency {
                        container_name: d.container_name().to_string(),
                        condition: d.condition().as_str().to_string(),
                    })
                    .collect(),
            })
            .collect();

        Ok(TaskDefinition {
            containers,
            task_role_arn: td.task_role_arn().map(str::to_string),
        })
    }
}

#[async_trait]
impl ServiceDescriber for EcsAdapter {
    async fn describe_service(&self, workload: &WorkloadName) -> dockside_core::Result<ServiceDescription> {
        let svc = self.find_service(workload).await?;

        let listed = self
            .client
            .list_tasks()
            .cluster(&svc.cluster)
            .service_name(&svc.service)
            .desired_status(DesiredStatus::Running)
            .send()
            .await
            .map_err(|e| sdk_error("ListTasks", e))?;

        let mut tasks = Vec::new();
        if !listed.task_arns().is_empty() {
            let described = self
                .client
                .describe_tasks()
                .cluster(&svc.cluster)
                .set_tasks(Some(listed.task_arns().to_vec()))
                .send()
                .await
                .map_err(|e| sdk_error("DescribeTasks", e))?;

            for task in described.tasks() {
                let Some(task_arn) = task.task_arn() else {
                    continue;
                };
                tasks.push(RunningTask {
                    task_arn: task_arn.to_string(),
                    containers: task
                        .containers()
                        .iter()
                        .map(|c| RunningContainer {
                            name: c.name().unwrap_or_default().to_string(),
                            runtime_id: c.runtime_id().map(str::to_string),
                            last_status: c.last_status().map(str::to_string),
                            managed_agents: c
                                .managed_agents()
                                .iter()
                                .map(|a| ManagedAgent {
                                    name: a.name().map(|n| n.as_str().to_string()).unwrap_or_default(),
                                    last_status: a.last_status().map(str::to_string),
                                })
                                .collect(),
                        })
                        .collect(),
                });
            }
        }

        Ok(ServiceDescription {
            cluster: svc.cluster,
            service: svc.service,
            tasks,
        })
    }
}

#[async_trait]
impl ServiceConnectLister for EcsAdapter {
    async fn service_connect_services(
        &self,
        workload: &WorkloadName,
    ) -> dockside_core::Result<Vec<ServiceConnectService>> {
        let resources = self
            .tagging
            .resources_by_tags(&[ECS_SERVICE_RESOURCE], &self.env_tags(workload))
            .await?;

        let mut by_cluster: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for resource in &resources {
            if resource.tags.get(&self.tag_keys.service) == Some(&workload.name) {
                continue;
            }
            if let Some(svc) = ServiceRef::from_arn(&resource.arn) {
                by_cluster.entry(svc.cluster).or_default().push(svc.service);
            }
        }

        let mut services = Vec::new();
        for (cluster, names) in by_cluster {
            for service in self.describe_services(&cluster, &names).await? {
                services.push(ServiceConnectService {
                    name: service.service_name().unwrap_or_default().to_string(),
                    deployments: service.deployments().iter().map(deployment).collect(),
                });
            }
        }
        Ok(services)
    }
}

fn deployment(d: &aws_sdk_ecs::types::Deployment) -> Deployment {
    let sc = d.service_connect_configuration();
    Deployment {
        id: d.id().map(str::to_string),
        status: DeploymentStatus::parse(d.status().unwrap_or_default()),
        service_connect_enabled: sc.is_some_and(|c| c.enabled()),
        client_aliases: sc
            .map(|c| c.services())
            .unwrap_or_default()
            .iter()
            .flat_map(|s| {
                let fallback = s.discovery_name().unwrap_or(s.port_name());
                s.client_aliases().iter().map(move |a| ClientAlias {
                    dns_name: a.dns_name().unwrap_or(fallback).to_string(),
                    port: u16::try_from(a.port()).unwrap_or_default(),
                })
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_ref_from_arn() {
        assert_eq!(
            ServiceRef::from_arn("arn:aws:ecs:us-west-2:123456789012:service/shop-test-Cluster/shop-test-api"),
            Some(ServiceRef {
                cluster: "shop-test-Cluster".into(),
                service: "shop-test-api".into(),
            })
        );
        // old-style ARNs carry no cluster
        assert_eq!(ServiceRef::from_arn("arn:aws:ecs:us-west-2:123456789012:service/shop-test-api"), None);
        assert_eq!(ServiceRef::from_arn("arn:aws:ecs:us-west-2"), None);
    }
}
