//! Resource Groups Tagging API adapter

use super::sdk_error;
use async_trait::async_trait;
use aws_sdk_resourcegroupstagging::types::TagFilter;
use aws_sdk_resourcegroupstagging::Client;
use dockside_core::{TaggedResource, TaggedResourceSearch};
use std::collections::BTreeMap;
use tracing::debug;

#[derive(Clone)]
pub struct TaggingAdapter {
    client: Client,
}

impl TaggingAdapter {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl TaggedResourceSearch for TaggingAdapter {
    async fn resources_by_tags(
        &self,
        resource_types: &[&str],
        tags: &BTreeMap<String, String>,
    ) -> dockside_core::Result<Vec<TaggedResource>> {
        let mut request = self.client.get_resources();
        for resource_type in resource_types {
            request = request.resource_type_filters(*resource_type);
        }
        for (key, value) in tags {
            request = request.tag_filters(TagFilter::builder().key(key).values(value).build());
        }

        let mut pages = request.into_paginator().send();
        let mut resources = Vec::new();
        while let Some(page) = pages.next().await {
            let page = page.map_err(|e| sdk_error("GetResources", e))?;
            for mapping in page.resource_tag_mapping_list() {
                let Some(arn) = mapping.resource_arn() else {
                    continue;
                };
                resources.push(TaggedResource {
                    arn: arn.to_string(),
                    tags: mapping
                        .tags()
                        .iter()
                        .map(|t| (t.key().to_string(), t.value().to_string()))
                        .collect(),
                });
            }
        }

        debug!(types = ?resource_types, count = resources.len(), "tagged resources");
        Ok(resources)
    }
}
