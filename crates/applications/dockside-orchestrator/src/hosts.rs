//! Host discovery for proxy mode
//!
//! Local containers reach the environment's private endpoints through port
//! forwarding. This module works out which endpoints exist:
//!
//! 1. Service connect client aliases of the sibling services, taken from each
//!    service's PRIMARY deployment only
//! 2. RDS instances and clusters tagged with the application and environment
//!
//! A cluster fans out to its writer, reader and custom endpoints.

use crate::arn::RdsResource;
use crate::error::{OrchestratorError, Result};
use dockside_core::{
    DeploymentStatus, Host, RdsDescriber, ServiceConnectLister, ServiceConnectService,
    TaggedResourceSearch, WorkloadName,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Default tag key naming the application
pub const DEFAULT_APP_TAG_KEY: &str = "dockside-application";

/// Default tag key naming the environment
pub const DEFAULT_ENV_TAG_KEY: &str = "dockside-environment";

/// Default tag key naming the workload that owns a resource
pub const DEFAULT_SERVICE_TAG_KEY: &str = "dockside-service";

/// Resource types searched for databases
pub const RDS_RESOURCE_TYPES: [&str; 2] = ["rds:db", "rds:cluster"];

/// Tag keys used to scope resources to a workload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagKeys {
    pub application: String,
    pub environment: String,
    pub service: String,
}

impl Default for TagKeys {
    fn default() -> Self {
        Self {
            application: DEFAULT_APP_TAG_KEY.to_string(),
            environment: DEFAULT_ENV_TAG_KEY.to_string(),
            service: DEFAULT_SERVICE_TAG_KEY.to_string(),
        }
    }
}

/// Discovers the hosts a workload talks to
pub struct HostDiscoverer {
    workload: WorkloadName,
    tag_keys: TagKeys,
    services: Arc<dyn ServiceConnectLister>,
    tagging: Arc<dyn TaggedResourceSearch>,
    rds: Arc<dyn RdsDescriber>,
}

impl HostDiscoverer {
    pub fn new(
        workload: WorkloadName,
        services: Arc<dyn ServiceConnectLister>,
        tagging: Arc<dyn TaggedResourceSearch>,
        rds: Arc<dyn RdsDescriber>,
    ) -> Self {
        Self {
            workload,
            tag_keys: TagKeys::default(),
            services,
            tagging,
            rds,
        }
    }

    /// Set the tag keys used for the resource search
    pub fn with_tag_keys(mut self, tag_keys: TagKeys) -> Self {
        self.tag_keys = tag_keys;
        self
    }

    /// Discover all hosts. Any failure aborts; there is no partial result.
    pub async fn hosts(&self) -> Result<Vec<Host>> {
        let services = self
            .services
            .service_connect_services(&self.workload)
            .await
            .map_err(|e| OrchestratorError::stage("get service connect services", e))?;

        let mut hosts: Vec<Host> = services.iter().flat_map(primary_aliases).collect();
        debug!(count = hosts.len(), "service connect hosts");

        hosts.extend(self.database_hosts().await?);

        info!(workload = %self.workload, count = hosts.len(), "discovered hosts");
        Ok(hosts)
    }

    async fn database_hosts(&self) -> Result<Vec<Host>> {
        let tags = BTreeMap::from([
            (self.tag_keys.application.clone(), self.workload.app.clone()),
            (self.tag_keys.environment.clone(), self.workload.env.clone()),
        ]);
        let resources = self
            .tagging
            .resources_by_tags(&RDS_RESOURCE_TYPES, &tags)
            .await
            .map_err(|e| OrchestratorError::stage("get tagged resources", e))?;
        if resources.is_empty() {
            return Ok(Vec::new());
        }

        // parse everything before filtering so one bad ARN fails the call
        let parsed = resources
            .iter()
            .map(|r| RdsResource::from_arn(&r.arn).map(|res| (res, r)))
            .collect::<Result<Vec<_>>>()?;

        let mut instances = Vec::new();
        let mut clusters = Vec::new();
        for (resource, tagged) in parsed {
            match resource {
                RdsResource::Instance { identifier } => instances.push(identifier),
                // clusters owned by another workload are never described
                RdsResource::Cluster { identifier } => match tagged.tags.get(&self.tag_keys.service) {
                    Some(owner) if *owner != self.workload.name => {
                        debug!(arn = %tagged.arn, owner = %owner, "skipping cluster of another workload");
                    }
                    _ => clusters.push(identifier),
                },
            }
        }

        let mut hosts = Vec::new();
        if !instances.is_empty() {
            self.rds
                .describe_db_instances(&instances, &mut |page| {
                    for db in page {
                        if let (Some(address), Some(port)) = (db.address, db.port) {
                            hosts.push(Host::new(address, port));
                        }
                    }
                })
                .await
                .map_err(|e| OrchestratorError::stage("describe instances", e))?;
        }
        if !clusters.is_empty() {
            self.rds
                .describe_db_clusters(&clusters, &mut |page| {
                    for cluster in page {
                        let Some(port) = cluster.port else {
                            warn!(cluster = %cluster.identifier, "cluster has no port, skipping");
                            continue;
                        };
                        let endpoints = cluster
                            .endpoint
                            .into_iter()
                            .chain(cluster.reader_endpoint)
                            .chain(cluster.custom_endpoints);
                        hosts.extend(endpoints.map(|name| Host::new(name, port)));
                    }
                })
                .await
                .map_err(|e| OrchestratorError::stage("describe clusters", e))?;
        }
        Ok(hosts)
    }
}

/// Client aliases of the service's PRIMARY deployment.
///
/// During a rollout several deployments are reported; only the one serving
/// traffic counts. With none marked PRIMARY the service is skipped; with
/// several the first is used.
fn primary_aliases(service: &ServiceConnectService) -> Vec<Host> {
    let mut primaries = service
        .deployments
        .iter()
        .filter(|d| d.status == DeploymentStatus::Primary && d.service_connect_enabled);

    let Some(primary) = primaries.next() else {
        warn!(service = %service.name, "no primary service connect deployment, skipping");
        return Vec::new();
    };
    if primaries.next().is_some() {
        warn!(service = %service.name, "multiple primary deployments, using the first");
    }
    primary
        .client_aliases
        .iter()
        .map(|alias| Host::new(alias.dns_name.clone(), alias.port))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use dockside_core::{ClientAlias, DbCluster, DbInstance, Deployment, DocksideError, TaggedResource};
    use std::sync::Mutex;

    struct FakeServices(Vec<ServiceConnectService>);

    #[async_trait]
    impl ServiceConnectLister for FakeServices {
        async fn service_connect_services(&self, _: &WorkloadName) -> dockside_core::Result<Vec<ServiceConnectService>> {
            Ok(self.0.clone())
        }
    }

    struct FakeTagging(dockside_core::Result<Vec<TaggedResource>>);

    #[async_trait]
    impl TaggedResourceSearch for FakeTagging {
        async fn resources_by_tags(
            &self,
            resource_types: &[&str],
            tags: &BTreeMap<String, String>,
        ) -> dockside_core::Result<Vec<TaggedResource>> {
            assert_eq!(resource_types, RDS_RESOURCE_TYPES);
            assert_eq!(tags[DEFAULT_APP_TAG_KEY], "shop");
            assert_eq!(tags[DEFAULT_ENV_TAG_KEY], "test");
            match &self.0 {
                Ok(r) => Ok(r.clone()),
                Err(e) => Err(DocksideError::Other(e.to_string())),
            }
        }
    }

    #[derive(Default)]
    struct FakeRds {
        instances: Vec<Vec<DbInstance>>,
        clusters: Vec<Vec<DbCluster>>,
        fail_clusters: bool,
        calls: Mutex<Vec<Vec<String>>>,
    }

    #[async_trait]
    impl RdsDescriber for FakeRds {
        async fn describe_db_instances(
            &self,
            identifiers: &[String],
            on_page: &mut (dyn FnMut(Vec<DbInstance>) + Send),
        ) -> dockside_core::Result<()> {
            self.calls.lock().unwrap().push(identifiers.to_vec());
            for page in &self.instances {
                on_page(page.clone());
            }
            Ok(())
        }

        async fn describe_db_clusters(
            &self,
            identifiers: &[String],
            on_page: &mut (dyn FnMut(Vec<DbCluster>) + Send),
        ) -> dockside_core::Result<()> {
            self.calls.lock().unwrap().push(identifiers.to_vec());
            if self.fail_clusters {
                return Err(DocksideError::from_aws("DescribeDBClusters", "Throttling"));
            }
            for page in &self.clusters {
                on_page(page.clone());
            }
            Ok(())
        }
    }

    fn workload() -> WorkloadName {
        WorkloadName::new("shop", "test", "api")
    }

    fn deployment(status: DeploymentStatus, aliases: &[(&str, u16)]) -> Deployment {
        Deployment {
            id: None,
            status,
            service_connect_enabled: true,
            client_aliases: aliases
                .iter()
                .map(|(n, p)| ClientAlias { dns_name: n.to_string(), port: *p })
                .collect(),
        }
    }

    fn tagged(arn: &str, tags: &[(&str, &str)]) -> TaggedResource {
        TaggedResource {
            arn: arn.to_string(),
            tags: tags.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
        }
    }

    fn discoverer(services: Vec<ServiceConnectService>, tagging: FakeTagging, rds: Arc<FakeRds>) -> HostDiscoverer {
        HostDiscoverer::new(workload(), Arc::new(FakeServices(services)), Arc::new(tagging), rds)
    }

    #[tokio::test]
    async fn test_only_primary_deployment_aliases() {
        let services = vec![ServiceConnectService {
            name: "orders".into(),
            deployments: vec![
                deployment(DeploymentStatus::Active, &[("orders-old", 8080)]),
                deployment(DeploymentStatus::Primary, &[("orders", 80)]),
                deployment(DeploymentStatus::Inactive, &[("orders-older", 8081)]),
            ],
        }];

        let hosts = discoverer(services, FakeTagging(Ok(vec![])), Arc::default())
            .hosts()
            .await
            .unwrap();

        assert_eq!(hosts, vec![Host::new("orders", 80)]);
    }

    #[tokio::test]
    async fn test_service_without_primary_is_skipped() {
        let services = vec![
            ServiceConnectService {
                name: "rolling".into(),
                deployments: vec![deployment(DeploymentStatus::Active, &[("rolling", 80)])],
            },
            ServiceConnectService {
                name: "cart".into(),
                deployments: vec![
                    deployment(DeploymentStatus::Primary, &[("cart", 80), ("cart.internal", 8080)]),
                    deployment(DeploymentStatus::Primary, &[("cart-dup", 80)]),
                ],
            },
        ];

        let hosts = discoverer(services, FakeTagging(Ok(vec![])), Arc::default())
            .hosts()
            .await
            .unwrap();

        assert_eq!(hosts, vec![Host::new("cart", 80), Host::new("cart.internal", 8080)]);
    }

    #[tokio::test]
    async fn test_cluster_fans_out_to_all_endpoints() {
        let rds = Arc::new(FakeRds {
            clusters: vec![vec![DbCluster {
                identifier: "orders".into(),
                endpoint: Some("orders.cluster-x.rds.amazonaws.com".into()),
                reader_endpoint: Some("orders.cluster-ro-x.rds.amazonaws.com".into()),
                custom_endpoints: vec!["orders-analytics.cluster-custom-x.rds.amazonaws.com".into()],
                port: Some(5432),
            }]],
            ..Default::default()
        });
        let tagging = FakeTagging(Ok(vec![tagged(
            "arn:aws:rds:us-west-2:123456789012:cluster:orders",
            &[],
        )]));

        let hosts = discoverer(vec![], tagging, rds.clone()).hosts().await.unwrap();

        assert_eq!(hosts.len(), 3);
        assert!(hosts.iter().all(|h| h.port == 5432));
        assert_eq!(hosts[0].name, "orders.cluster-x.rds.amazonaws.com");
        assert_eq!(*rds.calls.lock().unwrap(), vec![vec!["orders".to_string()]]);
    }

    #[tokio::test]
    async fn test_instances_paged() {
        let rds = Arc::new(FakeRds {
            instances: vec![
                vec![DbInstance { identifier: "a".into(), address: Some("a.rds".into()), port: Some(3306) }],
                vec![
                    DbInstance { identifier: "b".into(), address: Some("b.rds".into()), port: Some(3306) },
                    DbInstance { identifier: "c".into(), address: None, port: None },
                ],
            ],
            ..Default::default()
        });
        let tagging = FakeTagging(Ok(vec![
            tagged("arn:aws:rds:us-west-2:123456789012:db:a", &[]),
            tagged("arn:aws:rds:us-west-2:123456789012:db:b", &[(DEFAULT_SERVICE_TAG_KEY, "api")]),
        ]));

        let hosts = discoverer(vec![], tagging, rds).hosts().await.unwrap();

        assert_eq!(hosts, vec![Host::new("a.rds", 3306), Host::new("b.rds", 3306)]);
    }

    #[tokio::test]
    async fn test_instance_of_other_workload_still_described() {
        let rds = Arc::new(FakeRds {
            instances: vec![vec![DbInstance {
                identifier: "orders".into(),
                address: Some("orders.rds".into()),
                port: Some(5432),
            }]],
            ..Default::default()
        });
        let tagging = FakeTagging(Ok(vec![tagged(
            "arn:aws:rds:us-west-2:123456789012:db:orders",
            &[(DEFAULT_SERVICE_TAG_KEY, "billing")],
        )]));

        let hosts = discoverer(vec![], tagging, rds.clone()).hosts().await.unwrap();

        assert_eq!(hosts, vec![Host::new("orders.rds", 5432)]);
        assert_eq!(*rds.calls.lock().unwrap(), vec![vec!["orders".to_string()]]);
    }

    #[tokio::test]
    async fn test_other_workload_clusters_never_described() {
        let rds = Arc::new(FakeRds::default());
        let tagging = FakeTagging(Ok(vec![tagged(
            "arn:aws:rds:us-west-2:123456789012:cluster:billing",
            &[(DEFAULT_SERVICE_TAG_KEY, "billing")],
        )]));

        let hosts = discoverer(vec![], tagging, rds.clone()).hosts().await.unwrap();

        assert!(hosts.is_empty());
        assert!(rds.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_arn_fails_whole_call() {
        let rds = Arc::new(FakeRds {
            instances: vec![vec![DbInstance { identifier: "a".into(), address: Some("a.rds".into()), port: Some(3306) }]],
            ..Default::default()
        });
        let services = vec![ServiceConnectService {
            name: "orders".into(),
            deployments: vec![deployment(DeploymentStatus::Primary, &[("orders", 80)])],
        }];
        let tagging = FakeTagging(Ok(vec![
            tagged("arn:aws:rds:us-west-2:123456789012:db:a", &[]),
            tagged("arn:aws:rds:us-west-2", &[]),
        ]));

        let err = discoverer(services, tagging, rds.clone()).hosts().await.unwrap_err();

        assert!(matches!(err, OrchestratorError::InvalidArn { .. }));
        assert!(rds.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_errors_carry_stage() {
        let tagging = FakeTagging(Err(DocksideError::Other("AccessDenied".into())));
        let err = discoverer(vec![], tagging, Arc::default()).hosts().await.unwrap_err();
        assert_eq!(err.to_string(), "get tagged resources: AccessDenied");

        let rds = Arc::new(FakeRds { fail_clusters: true, ..Default::default() });
        let tagging = FakeTagging(Ok(vec![tagged(
            "arn:aws:rds:us-west-2:123456789012:cluster:orders",
            &[],
        )]));
        let err = discoverer(vec![], tagging, rds).hosts().await.unwrap_err();
        assert_eq!(err.to_string(), "describe clusters: DescribeDBClusters: Throttling");
    }
}
