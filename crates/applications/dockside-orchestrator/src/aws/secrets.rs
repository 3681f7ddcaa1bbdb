//! Secret backends: Secrets Manager and SSM Parameter Store

use super::sdk_error;
use crate::arn::SecretSourceRef;
use async_trait::async_trait;
use dockside_core::{DocksideError, SecretSource};
use tracing::debug;

pub struct SecretsManagerSource {
    client: aws_sdk_secretsmanager::Client,
}

impl SecretsManagerSource {
    pub fn new(client: aws_sdk_secretsmanager::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SecretSource for SecretsManagerSource {
    async fn get_secret_value(&self, value_from: &str) -> dockside_core::Result<String> {
        let Ok(SecretSourceRef::SecretsManager {
            secret_id,
            json_key,
            version_stage,
            version_id,
        }) = SecretSourceRef::parse(value_from)
        else {
            return Err(DocksideError::config(format!(
                "{value_from:?} is not a Secrets Manager ARN"
            )));
        };

        debug!(secret_id = %secret_id, "GetSecretValue");
        let out = self
            .client
            .get_secret_value()
            .secret_id(&secret_id)
            .set_version_stage(version_stage)
            .set_version_id(version_id)
            .send()
            .await
            .map_err(|e| sdk_error("GetSecretValue", e))?;
        let secret = out
            .secret_string()
            .ok_or_else(|| DocksideError::not_found(format!("secret string of {secret_id}")))?;

        match json_key {
            Some(key) => json_field(secret, &key),
            None => Ok(secret.to_string()),
        }
    }
}

/// Select one key of a JSON secret. String values are returned unquoted.
fn json_field(secret: &str, key: &str) -> dockside_core::Result<String> {
    let value: serde_json::Value = serde_json::from_str(secret)
        .map_err(|e| DocksideError::Other(format!("secret is not JSON: {e}")))?;
    match value.get(key) {
        Some(serde_json::Value::String(s)) => Ok(s.clone()),
        Some(other) => Ok(other.to_string()),
        None => Err(DocksideError::not_found(format!("key {key:?} in secret"))),
    }
}

pub struct ParameterStoreSource {
    client: aws_sdk_ssm::Client,
}

impl ParameterStoreSource {
    pub fn new(client: aws_sdk_ssm::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SecretSource for ParameterStoreSource {
    async fn get_secret_value(&self, value_from: &str) -> dockside_core::Result<String> {
        debug!(name = %value_from, "GetParameter");
        let out = self
            .client
            .get_parameter()
            .name(value_from)
            .with_decryption(true)
            .send()
            .await
            .map_err(|e| sdk_error("GetParameter", e))?;
        out.parameter()
            .and_then(|p| p.value())
            .map(str::to_string)
            .ok_or_else(|| DocksideError::not_found(format!("value of parameter {value_from}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_field() {
        let secret = r#"{"username":"admin","password":"hunter2","port":5432}"#;
        assert_eq!(json_field(secret, "password").unwrap(), "hunter2");
        assert_eq!(json_field(secret, "port").unwrap(), "5432");
        assert!(matches!(json_field(secret, "host"), Err(DocksideError::NotFound(_))));
        assert!(json_field("plain", "password").is_err());
    }
}
