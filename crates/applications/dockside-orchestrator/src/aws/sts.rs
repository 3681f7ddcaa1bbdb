//! STS adapter and caller credentials

use super::sdk_error;
use async_trait::async_trait;
use aws_credential_types::provider::{ProvideCredentials, SharedCredentialsProvider};
use chrono::{DateTime, Utc};
use dockside_core::{CredentialSource, Credentials, DocksideError, RoleAssumer};
use tracing::debug;

pub struct StsAdapter {
    client: aws_sdk_sts::Client,
}

impl StsAdapter {
    pub fn new(client: aws_sdk_sts::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl RoleAssumer for StsAdapter {
    async fn assume_role(&self, role_arn: &str, session_name: &str) -> dockside_core::Result<Credentials> {
        debug!(role = %role_arn, session = %session_name, "AssumeRole");
        let out = self
            .client
            .assume_role()
            .role_arn(role_arn)
            .role_session_name(session_name)
            .send()
            .await
            .map_err(|e| sdk_error("AssumeRole", e))?;
        let creds = out
            .credentials()
            .ok_or_else(|| DocksideError::not_found(format!("credentials for {role_arn}")))?;

        let expiration = creds.expiration();
        Ok(Credentials {
            access_key_id: creds.access_key_id().to_string(),
            secret_access_key: creds.secret_access_key().to_string(),
            session_token: Some(creds.session_token().to_string()),
            expiration: DateTime::<Utc>::from_timestamp(expiration.secs(), expiration.subsec_nanos()),
        })
    }

    async fn account_id(&self) -> dockside_core::Result<String> {
        let out = self
            .client
            .get_caller_identity()
            .send()
            .await
            .map_err(|e| sdk_error("GetCallerIdentity", e))?;
        out.account()
            .map(str::to_string)
            .ok_or_else(|| DocksideError::not_found("account in caller identity"))
    }
}

/// Credentials from the ambient provider chain (env, profile, SSO, IMDS)
pub struct CallerCredentials {
    provider: Option<SharedCredentialsProvider>,
}

impl CallerCredentials {
    pub fn new(config: &aws_config::SdkConfig) -> Self {
        Self {
            provider: config.credentials_provider(),
        }
    }
}

#[async_trait]
impl CredentialSource for CallerCredentials {
    async fn credentials(&self) -> dockside_core::Result<Credentials> {
        let provider = self
            .provider
            .as_ref()
            .ok_or_else(|| DocksideError::config("no AWS credentials provider configured"))?;
        let creds = provider
            .provide_credentials()
            .await
            .map_err(|e| sdk_error("LoadCredentials", e))?;

        Ok(Credentials {
            access_key_id: creds.access_key_id().to_string(),
            secret_access_key: creds.secret_access_key().to_string(),
            session_token: creds.session_token().map(str::to_string),
            expiration: creds.expiry().map(DateTime::<Utc>::from),
        })
    }
}
