//! RDS adapter: paged instance and cluster descriptions

use super::sdk_error;
use async_trait::async_trait;
use aws_sdk_rds::types::Filter;
use aws_sdk_rds::Client;
use dockside_core::{DbCluster, DbInstance, RdsDescriber};

pub struct RdsAdapter {
    client: Client,
}

impl RdsAdapter {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

fn id_filter(name: &str, identifiers: &[String]) -> dockside_core::Result<Filter> {
    Ok(Filter::builder()
        .name(name)
        .set_values(Some(identifiers.to_vec()))
        .build())
}

fn port(p: Option<i32>) -> Option<u16> {
    p.and_then(|v| u16::try_from(v).ok())
}

#[async_trait]
impl RdsDescriber for RdsAdapter {
    async fn describe_db_instances(
        &self,
        identifiers: &[String],
        on_page: &mut (dyn FnMut(Vec<DbInstance>) + Send),
    ) -> dockside_core::Result<()> {
        let mut pages = self
            .client
            .describe_db_instances()
            .filters(id_filter("db-instance-id", identifiers)?)
            .into_paginator()
            .send();
        while let Some(page) = pages.next().await {
            let page = page.map_err(|e| sdk_error("DescribeDBInstances", e))?;
            on_page(
                page.db_instances()
                    .iter()
                    .map(|db| DbInstance {
                        identifier: db.db_instance_identifier().unwrap_or_default().to_string(),
                        address: db.endpoint().and_then(|e| e.address()).map(str::to_string),
                        port: port(db.endpoint().and_then(|e| e.port())),
                    })
                    .collect(),
            );
        }
        Ok(())
    }

    async fn describe_db_clusters(
        &self,
        identifiers: &[String],
        on_page: &mut (dyn FnMut(Vec<DbCluster>) + Send),
    ) -> dockside_core::Result<()> {
        let mut pages = self
            .client
            .describe_db_clusters()
            .filters(id_filter("db-cluster-id", identifiers)?)
            .into_paginator()
            .send();
        while let Some(page) = pages.next().await {
            let page = page.map_err(|e| sdk_error("DescribeDBClusters", e))?;
            on_page(
                page.db_clusters()
                    .iter()
                    .map(|c| DbCluster {
                        identifier: c.db_cluster_identifier().unwrap_or_default().to_string(),
                        endpoint: c.endpoint().map(str::to_string),
                        reader_endpoint: c.reader_endpoint().map(str::to_string),
                        custom_endpoints: c.custom_endpoints().to_vec(),
                        port: port(c.port()),
                    })
                    .collect(),
            );
        }
        Ok(())
    }
}
