//! Local image builds with the docker CLI

use async_trait::async_trait;
use dockside_core::{DocksideError, ImageBuilder, WorkloadName};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tokio::process::Command;
use tracing::{debug, info};

/// Builds one image per configured container with `docker build`
#[derive(Debug, Clone, Default)]
pub struct DockerImageBuilder {
    /// container name -> build context directory
    contexts: BTreeMap<String, PathBuf>,
    docker_bin: Option<String>,
}

impl DockerImageBuilder {
    pub fn new(contexts: BTreeMap<String, PathBuf>) -> Self {
        Self {
            contexts,
            docker_bin: None,
        }
    }

    /// Local tag for a container's image
    pub fn image_tag(workload: &WorkloadName, container: &str) -> String {
        format!(
            "dockside/{}-{}-{}-{}:local",
            workload.app, workload.env, workload.name, container
        )
        .to_lowercase()
    }

    fn docker_bin(&self) -> &str {
        self.docker_bin.as_deref().unwrap_or("docker")
    }
}

#[async_trait]
impl ImageBuilder for DockerImageBuilder {
    async fn build_images(&self, workload: &WorkloadName) -> dockside_core::Result<BTreeMap<String, String>> {
        let mut images = BTreeMap::new();
        for (container, context) in &self.contexts {
            let tag = Self::image_tag(workload, container);
            info!(container = %container, context = %context.display(), tag = %tag, "Building image");

            let output = Command::new(self.docker_bin())
                .arg("build")
                .arg("-t")
                .arg(&tag)
                .arg(context)
                .output()
                .await?;
            if !output.status.success() {
                let stderr = String::from_utf8_lossy(&output.stderr);
                return Err(DocksideError::Command {
                    program: format!("docker build {}", context.display()),
                    message: stderr.trim().to_string(),
                });
            }
            debug!(container = %container, "Image built");
            images.insert(container.clone(), tag);
        }
        Ok(images)
    }
}
