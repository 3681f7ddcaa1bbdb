//! ARN parsing
//!
//! Secret references and tagged-resource results are plain strings. They are
//! parsed here once into tagged variants, and the resolver and discoverer
//! dispatch on the variant.

use crate::error::{OrchestratorError, Result};
use std::fmt;

const ARN_PREFIX: &str = "arn:";

/// A parsed `arn:partition:service:region:account:resource` string
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Arn {
    pub partition: String,
    pub service: String,
    pub region: String,
    pub account_id: String,
    /// Everything after the account id; may contain further colons
    pub resource: String,
}

impl Arn {
    pub fn parse(s: &str) -> Result<Self> {
        let sections: Vec<&str> = s.splitn(6, ':').collect();
        if sections.len() != 6 {
            return Err(OrchestratorError::invalid_arn(
                s,
                "arn: not enough sections",
            ));
        }
        if sections[0] != "arn" {
            return Err(OrchestratorError::invalid_arn(s, "arn: invalid prefix"));
        }
        Ok(Self {
            partition: sections[1].to_string(),
            service: sections[2].to_string(),
            region: sections[3].to_string(),
            account_id: sections[4].to_string(),
            resource: sections[5].to_string(),
        })
    }
}

impl fmt::Display for Arn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "arn:{}:{}:{}:{}:{}",
            self.partition, self.service, self.region, self.account_id, self.resource
        )
    }
}

/// Where a secret's value comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecretSourceRef {
    /// Secrets Manager secret, optionally narrowed to one JSON key and version
    SecretsManager {
        secret_id: String,
        json_key: Option<String>,
        version_stage: Option<String>,
        version_id: Option<String>,
    },
    /// SSM parameter, by name or ARN
    ParameterStore { name: String },
}

impl SecretSourceRef {
    /// Route a `valueFrom` string to its backend.
    ///
    /// Bare names go to the parameter store. ARNs of any service other than
    /// Secrets Manager or SSM are rejected.
    pub fn parse(value_from: &str) -> Result<Self> {
        if !value_from.starts_with(ARN_PREFIX) {
            return Ok(Self::ParameterStore {
                name: value_from.to_string(),
            });
        }

        let arn = Arn::parse(value_from)?;
        match arn.service.as_str() {
            "secretsmanager" => Ok(Self::secrets_manager(&arn)),
            "ssm" => Ok(Self::ParameterStore {
                name: value_from.to_string(),
            }),
            _ => Err(OrchestratorError::invalid_arn(
                value_from,
                "not a SSM or Secrets Manager ARN",
            )),
        }
    }

    // resource is `secret:<name>[:json-key[:version-stage[:version-id]]]`
    fn secrets_manager(arn: &Arn) -> Self {
        let mut parts = arn.resource.splitn(5, ':');
        let kind = parts.next().unwrap_or_default();
        let name = parts.next().unwrap_or_default();
        let non_empty = |p: Option<&str>| p.filter(|s| !s.is_empty()).map(str::to_string);
        let json_key = non_empty(parts.next());
        let version_stage = non_empty(parts.next());
        let version_id = non_empty(parts.next());

        let secret_id = Arn {
            resource: format!("{kind}:{name}"),
            ..arn.clone()
        }
        .to_string();

        Self::SecretsManager {
            secret_id,
            json_key,
            version_stage,
            version_id,
        }
    }
}

/// Database resource found by tag search
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RdsResource {
    Instance { identifier: String },
    Cluster { identifier: String },
}

impl RdsResource {
    pub fn from_arn(s: &str) -> Result<Self> {
        let arn = Arn::parse(s)?;
        if arn.service != "rds" {
            return Err(OrchestratorError::invalid_arn(
                s,
                format!("unexpected service {:?}", arn.service),
            ));
        }
        if let Some(id) = arn.resource.strip_prefix("db:") {
            return Ok(Self::Instance {
                identifier: id.to_string(),
            });
        }
        if let Some(id) = arn.resource.strip_prefix("cluster:") {
            return Ok(Self::Cluster {
                identifier: id.to_string(),
            });
        }
        Err(OrchestratorError::invalid_arn(
            s,
            format!("unknown resource type {:?}", arn.resource),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_keeps_colons_in_resource() {
        let arn = Arn::parse("arn:aws:ssm:us-west-2:123456789012:parameter/a:b").unwrap();
        assert_eq!(arn.service, "ssm");
        assert_eq!(arn.account_id, "123456789012");
        assert_eq!(arn.resource, "parameter/a:b");
        assert_eq!(arn.to_string(), "arn:aws:ssm:us-west-2:123456789012:parameter/a:b");
    }

    #[test]
    fn test_parse_too_few_sections() {
        let err = Arn::parse("arn:aws:rds:us-west-2").unwrap_err();
        assert!(matches!(err, OrchestratorError::InvalidArn { .. }));
        assert!(err.to_string().contains("not enough sections"));
    }

    #[test]
    fn test_secret_routing() {
        assert_eq!(
            SecretSourceRef::parse("/shop/test/db_password").unwrap(),
            SecretSourceRef::ParameterStore { name: "/shop/test/db_password".into() }
        );

        let ssm = "arn:aws:ssm:us-west-2:123456789012:parameter/shop/test/key";
        assert_eq!(
            SecretSourceRef::parse(ssm).unwrap(),
            SecretSourceRef::ParameterStore { name: ssm.into() }
        );

        let sm = "arn:aws:secretsmanager:us-west-2:123456789012:secret:db-AbCdEf";
        assert_eq!(
            SecretSourceRef::parse(sm).unwrap(),
            SecretSourceRef::SecretsManager {
                secret_id: sm.into(),
                json_key: None,
                version_stage: None,
                version_id: None,
            }
        );

        let err = SecretSourceRef::parse("arn:aws:s3:::bucket/key").unwrap_err();
        assert!(err.to_string().contains("not a SSM or Secrets Manager ARN"));
    }

    #[test]
    fn test_secrets_manager_json_key_suffix() {
        let sm = "arn:aws:secretsmanager:us-west-2:123456789012:secret:db-AbCdEf:password:AWSPREVIOUS:";
        let parsed = SecretSourceRef::parse(sm).unwrap();
        assert_eq!(
            parsed,
            SecretSourceRef::SecretsManager {
                secret_id: "arn:aws:secretsmanager:us-west-2:123456789012:secret:db-AbCdEf".into(),
                json_key: Some("password".into()),
                version_stage: Some("AWSPREVIOUS".into()),
                version_id: None,
            }
        );
    }

    #[test]
    fn test_rds_resource() {
        assert_eq!(
            RdsResource::from_arn("arn:aws:rds:us-west-2:123456789012:db:orders").unwrap(),
            RdsResource::Instance { identifier: "orders".into() }
        );
        assert_eq!(
            RdsResource::from_arn("arn:aws:rds:us-west-2:123456789012:cluster:orders-cluster").unwrap(),
            RdsResource::Cluster { identifier: "orders-cluster".into() }
        );
        assert!(RdsResource::from_arn("arn:aws:rds:us-west-2:123456789012:snapshot:s1").is_err());
        assert!(RdsResource::from_arn("arn:aws:rds:us-west-2").is_err());
    }
}
