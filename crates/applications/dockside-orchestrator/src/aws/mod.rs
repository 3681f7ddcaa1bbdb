//! AWS SDK adapters
//!
//! Each adapter wraps one SDK client and implements the collaborator traits
//! from `dockside-core`. Nothing outside this module touches the SDK types.

pub mod ecs;
pub mod rds;
pub mod secrets;
pub mod sts;
pub mod tagging;

pub use ecs::EcsAdapter;
pub use rds::RdsAdapter;
pub use secrets::{ParameterStoreSource, SecretsManagerSource};
pub use sts::{CallerCredentials, StsAdapter};
pub use tagging::TaggingAdapter;

use aws_config::BehaviorVersion;
use aws_types::region::Region;
use dockside_core::DocksideError;
use std::error::Error;
use tracing::debug;

/// Load shared AWS configuration from the environment, with an optional
/// region override.
pub async fn load_config(region: Option<String>) -> aws_config::SdkConfig {
    let mut loader = aws_config::defaults(BehaviorVersion::latest());
    if let Some(region) = region {
        debug!(region = %region, "Using region override");
        loader = loader.region(Region::new(region));
    }
    loader.load().await
}

/// Convert an SDK error, keeping the full source chain in the message
pub(crate) fn sdk_error<E>(operation: &str, err: E) -> DocksideError
where
    E: Error,
{
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    DocksideError::from_aws(operation, message)
}

/// All SDK clients the local runner needs, built from one shared config
pub struct AwsClients {
    pub ecs: EcsAdapter,
    pub tagging: TaggingAdapter,
    pub rds: RdsAdapter,
    pub sts: StsAdapter,
    pub secrets_manager: SecretsManagerSource,
    pub parameter_store: ParameterStoreSource,
    pub caller: CallerCredentials,
    pub region: Option<String>,
}

impl AwsClients {
    pub fn new(config: &aws_config::SdkConfig, tag_keys: crate::hosts::TagKeys) -> Self {
        let tagging = TaggingAdapter::new(aws_sdk_resourcegroupstagging::Client::new(config));
        Self {
            ecs: EcsAdapter::new(aws_sdk_ecs::Client::new(config), tagging.clone(), tag_keys),
            tagging,
            rds: RdsAdapter::new(aws_sdk_rds::Client::new(config)),
            sts: StsAdapter::new(aws_sdk_sts::Client::new(config)),
            secrets_manager: SecretsManagerSource::new(aws_sdk_secretsmanager::Client::new(config)),
            parameter_store: ParameterStoreSource::new(aws_sdk_ssm::Client::new(config)),
            caller: CallerCredentials::new(config),
            region: config.region().map(|r| r.to_string()),
        }
    }
}
