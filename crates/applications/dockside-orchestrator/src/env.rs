//! Secret & environment resolution
//!
//! Turns a task definition plus user overrides into the final per-container
//! environment. Layers, lowest precedence first:
//!
//! 1. task definition environment
//! 2. secrets (skipped when the user overrode the same name)
//! 3. user overrides, global then container-targeted
//! 4. injected caller credentials and region (always wins)
//!
//! A secret whose name collides with a plain variable is an error rather than
//! a silent override.

use crate::arn::SecretSourceRef;
use crate::error::{OrchestratorError, Result};
use dockside_core::{ContainerEnv, CredentialSource, Credentials, EnvVarValue, SecretSource, TaskDefinition};
use futures::future::try_join_all;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Per-container resolved environments, keyed by container name
pub type ResolvedEnv = BTreeMap<String, ContainerEnv>;

/// Override target parsed from a `[container:]KEY` key
#[derive(Debug, Clone, PartialEq, Eq)]
enum Target<'a> {
    All,
    Container(&'a str),
}

/// Resolves environment variables and secrets for every container
pub struct EnvResolver {
    secrets_manager: Arc<dyn SecretSource>,
    parameter_store: Arc<dyn SecretSource>,
    credentials: Arc<dyn CredentialSource>,
    region: Option<String>,
}

impl EnvResolver {
    pub fn new(
        secrets_manager: Arc<dyn SecretSource>,
        parameter_store: Arc<dyn SecretSource>,
        credentials: Arc<dyn CredentialSource>,
    ) -> Self {
        Self {
            secrets_manager,
            parameter_store,
            credentials,
            region: None,
        }
    }

    /// Also inject `AWS_REGION` and `AWS_DEFAULT_REGION`
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    /// Resolve the environment of every container in `task_def`.
    ///
    /// `overrides` maps `KEY` (all containers) or `container:KEY` to a value.
    pub async fn resolve(
        &self,
        task_def: &TaskDefinition,
        overrides: &BTreeMap<String, String>,
    ) -> Result<ResolvedEnv> {
        let parsed = parse_overrides(task_def, overrides)?;

        let mut envs: ResolvedEnv = BTreeMap::new();
        for ctr in &task_def.containers {
            let env = envs.entry(ctr.name.clone()).or_default();
            for (name, value) in &ctr.environment {
                env.insert(name.clone(), EnvVarValue::plain(value.clone()));
            }
        }

        // globals first so container-targeted overrides win for their container
        for (target, name, value) in parsed.iter().filter(|(t, _, _)| *t == Target::All) {
            debug!(?target, var = %name, "applying override");
            for env in envs.values_mut() {
                env.insert(name.to_string(), EnvVarValue::overridden(*value));
            }
        }
        for (target, name, value) in &parsed {
            if let Target::Container(ctr) = target {
                debug!(container = %ctr, var = %name, "applying override");
                if let Some(env) = envs.get_mut(*ctr) {
                    env.insert(name.to_string(), EnvVarValue::overridden(*value));
                }
            }
        }

        self.resolve_secrets(task_def, &mut envs).await?;

        let creds = self
            .credentials
            .credentials()
            .await
            .map_err(|e| OrchestratorError::stage("get IAM credentials", e))?;
        inject_credentials(&mut envs, &creds, self.region.as_deref());

        Ok(envs)
    }

    async fn resolve_secrets(&self, task_def: &TaskDefinition, envs: &mut ResolvedEnv) -> Result<()> {
        // (container, variable name, value_from)
        let mut wanted: Vec<(&str, &str, &str)> = Vec::new();
        let mut sources: BTreeMap<&str, SecretSourceRef> = BTreeMap::new();

        for ctr in &task_def.containers {
            let env = envs.get(&ctr.name);
            for secret in &ctr.secrets {
                match env.and_then(|e| e.get(&secret.name)) {
                    Some(existing) if existing.overridden => {
                        debug!(container = %ctr.name, secret = %secret.name, "secret overridden, skipping fetch");
                        continue;
                    }
                    Some(_) => {
                        return Err(OrchestratorError::DuplicateSecret {
                            name: secret.name.clone(),
                        });
                    }
                    None => {}
                }
                let value_from = secret.value_from.as_str();
                if !sources.contains_key(value_from) {
                    sources.insert(value_from, SecretSourceRef::parse(value_from)?);
                }
                wanted.push((ctr.name.as_str(), secret.name.as_str(), value_from));
            }
        }

        if sources.is_empty() {
            return Ok(());
        }
        info!(secrets = sources.len(), "fetching secrets");

        let fetches = sources.iter().map(|(value_from, source)| {
            let backend = match source {
                SecretSourceRef::SecretsManager { .. } => &self.secrets_manager,
                SecretSourceRef::ParameterStore { .. } => &self.parameter_store,
            };
            async move {
                backend
                    .get_secret_value(value_from)
                    .await
                    .map(|value| (*value_from, value))
                    .map_err(|source| OrchestratorError::GetSecret {
                        value_from: value_from.to_string(),
                        source,
                    })
            }
        });
        let values: BTreeMap<&str, String> = try_join_all(fetches).await?.into_iter().collect();

        for (ctr, name, value_from) in wanted {
            if let (Some(env), Some(value)) = (envs.get_mut(ctr), values.get(value_from)) {
                env.insert(name.to_string(), EnvVarValue::secret(value.clone()));
            }
        }
        Ok(())
    }
}

fn parse_overrides<'a>(
    task_def: &TaskDefinition,
    overrides: &'a BTreeMap<String, String>,
) -> Result<Vec<(Target<'a>, &'a str, &'a str)>> {
    overrides
        .iter()
        .map(|(key, value)| match key.split_once(':') {
            Some((ctr, name)) => {
                if task_def.container(ctr).is_none() {
                    return Err(OrchestratorError::InvalidOverride { key: key.clone() });
                }
                Ok((Target::Container(ctr), name, value.as_str()))
            }
            None => Ok((Target::All, key.as_str(), value.as_str())),
        })
        .collect()
}

/// Write the caller's credentials (and region, when set) into every
/// container, marked secret. Runs after all other layers so nothing the user
/// supplies can replace them.
pub fn inject_credentials(envs: &mut ResolvedEnv, creds: &Credentials, region: Option<&str>) {
    let mut injected: Vec<(String, String)> = creds.env_vars().into_iter().collect();
    if let Some(region) = region {
        injected.push(("AWS_REGION".to_string(), region.to_string()));
        injected.push(("AWS_DEFAULT_REGION".to_string(), region.to_string()));
    }
    for env in envs.values_mut() {
        for (name, value) in &injected {
            env.insert(name.clone(), EnvVarValue::secret(value.clone()));
        }
    }
}
