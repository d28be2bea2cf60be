// ABOUTME: Docker runtime implementation for local container-based sandboxes
// ABOUTME: Uses bollard to create, inspect, and force-remove sandbox units

use async_trait::async_trait;
use bollard::{
    container::{
        Config, CreateContainerOptions, ListContainersOptions, RemoveContainerOptions,
        StartContainerOptions,
    },
    errors::Error as BollardError,
    models::{ContainerInspectResponse, HostConfig, PortBinding},
    Docker,
};
use std::collections::HashMap;
use tracing::{debug, error, info, warn};

use super::{Runtime, StartedUnit, UnitEndpoint, UnitInfo, UnitSpec, MANAGED_LABEL};
use crate::error::{Result, SandboxError};
use crate::types::SandboxStatus;

pub struct DockerRuntime {
    client: Docker,
}

impl DockerRuntime {
    /// Connect to the Docker daemon and verify it responds
    pub async fn connect() -> Result<Self> {
        let client = Docker::connect_with_defaults().map_err(SandboxError::Docker)?;

        client.ping().await.map_err(|e| {
            error!("Failed to connect to Docker daemon: {}", e);
            SandboxError::Docker(e)
        })?;

        info!("Connected to Docker daemon");
        Ok(Self { client })
    }

    /// Wrap an existing Docker connection
    pub fn with_client(client: Docker) -> Self {
        Self { client }
    }

    /// Ensure the image exists locally. Images are expected to be
    /// pre-pulled; a missing image is a provisioning failure.
    async fn ensure_image(&self, image: &str) -> Result<()> {
        match self.client.inspect_image(image).await {
            Ok(_) => {
                debug!("Image {} already exists locally", image);
                Ok(())
            }
            Err(_) => Err(SandboxError::Provisioning(format!(
                "Image {} not found locally. Please pull it first with: docker pull {}",
                image, image
            ))),
        }
    }

    /// Extract the published host endpoint for a container port
    fn published_endpoint(
        inspect: &ContainerInspectResponse,
        container_port: &str,
    ) -> Option<UnitEndpoint> {
        let bindings = inspect
            .network_settings
            .as_ref()?
            .ports
            .as_ref()?
            .get(container_port)?
            .as_ref()?;

        let binding = bindings.first()?;
        let port = binding.host_port.as_ref()?.parse().ok()?;

        // Docker reports the wildcard bind address; the service is reached
        // through the loopback interface on this host
        let host = match binding.host_ip.as_deref() {
            None | Some("") | Some("0.0.0.0") | Some("::") => "127.0.0.1".to_string(),
            Some(ip) => ip.to_string(),
        };

        Some(UnitEndpoint { host, port })
    }

    /// Map an inspect response to a last-observed sandbox status
    fn observed_status(inspect: &ContainerInspectResponse) -> SandboxStatus {
        match inspect.state.as_ref() {
            Some(state) if state.running.unwrap_or(false) => SandboxStatus::Running,
            Some(_) => SandboxStatus::Stopped,
            None => SandboxStatus::Unknown,
        }
    }
}

#[async_trait]
impl Runtime for DockerRuntime {
    async fn ping(&self) -> Result<()> {
        self.client.ping().await.map_err(SandboxError::Docker)?;
        Ok(())
    }

    async fn start_unit(&self, spec: &UnitSpec) -> Result<StartedUnit> {
        debug!("Creating unit {} with image {}", spec.name, spec.image);

        self.ensure_image(&spec.image).await?;

        let container_port = format!("{}/tcp", spec.service_port);

        let mut exposed_ports = HashMap::new();
        exposed_ports.insert(container_port.clone(), HashMap::new());

        // Publish on an ephemeral host port; the assigned port is read
        // back from the inspect response below
        let mut port_bindings = HashMap::new();
        port_bindings.insert(
            container_port.clone(),
            Some(vec![PortBinding {
                host_ip: Some("0.0.0.0".to_string()),
                host_port: Some("0".to_string()),
            }]),
        );

        let env: Vec<String> = spec
            .env_vars
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();

        let config = Config {
            image: Some(spec.image.clone()),
            env: Some(env),
            labels: Some(spec.labels.clone()),
            exposed_ports: Some(exposed_ports),
            host_config: Some(HostConfig {
                port_bindings: Some(port_bindings),
                ..Default::default()
            }),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: spec.name.clone(),
            platform: None,
        };

        let created = self
            .client
            .create_container(Some(options), config)
            .await
            .map_err(|e| {
                error!("Failed to create unit {}: {}", spec.name, e);
                SandboxError::Docker(e)
            })?;

        self.client
            .start_container(&created.id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| {
                error!("Failed to start unit {}: {}", spec.name, e);
                SandboxError::Docker(e)
            })?;

        let inspect = self
            .client
            .inspect_container(&created.id, None)
            .await
            .map_err(SandboxError::Docker)?;

        let endpoint = Self::published_endpoint(&inspect, &container_port).ok_or_else(|| {
            SandboxError::Provisioning(format!(
                "Unit {} has no published binding for {}",
                spec.name, container_port
            ))
        })?;

        info!(
            "Started unit {} ({}) on {}:{}",
            spec.name, created.id, endpoint.host, endpoint.port
        );

        Ok(StartedUnit {
            unit_id: created.id,
            name: spec.name.clone(),
            endpoint,
        })
    }

    async fn inspect_unit(&self, name: &str) -> Result<UnitInfo> {
        let inspect = self
            .client
            .inspect_container(name, None)
            .await
            .map_err(|e| match e {
                BollardError::DockerResponseServerError {
                    status_code: 404, ..
                } => SandboxError::NotFound(format!("Unit not found: {}", name)),
                _ => SandboxError::Docker(e),
            })?;

        let status = Self::observed_status(&inspect);
        let sandbox_id = inspect
            .config
            .as_ref()
            .and_then(|c| c.labels.as_ref())
            .and_then(|labels| labels.get(super::SANDBOX_ID_LABEL))
            .cloned();

        Ok(UnitInfo {
            id: inspect.id.unwrap_or_else(|| name.to_string()),
            name: inspect
                .name
                .unwrap_or_else(|| name.to_string())
                .trim_start_matches('/')
                .to_string(),
            sandbox_id,
            status,
        })
    }

    async fn remove_unit(&self, name: &str) -> Result<()> {
        debug!("Removing unit {}", name);

        let options = RemoveContainerOptions {
            force: true,
            v: true, // Remove volumes
            ..Default::default()
        };

        match self.client.remove_container(name, Some(options)).await {
            Ok(_) => {
                info!("Removed unit {}", name);
                Ok(())
            }
            Err(e) => match e {
                // Unit already removed is not an error
                BollardError::DockerResponseServerError {
                    status_code: 404, ..
                } => {
                    warn!("Unit already removed: {}", name);
                    Ok(())
                }
                _ => {
                    error!("Failed to remove unit {}: {}", name, e);
                    Err(SandboxError::Docker(e))
                }
            },
        }
    }

    async fn list_owned_units(&self) -> Result<Vec<UnitInfo>> {
        let mut filters = HashMap::new();
        filters.insert(
            "label".to_string(),
            vec![format!("{}=true", MANAGED_LABEL)],
        );

        let options = ListContainersOptions {
            all: true,
            filters,
            ..Default::default()
        };

        let containers = self
            .client
            .list_containers(Some(options))
            .await
            .map_err(SandboxError::Docker)?;

        Ok(containers
            .into_iter()
            .map(|c| {
                let status = match c.state.as_deref() {
                    Some("running") => SandboxStatus::Running,
                    Some(_) => SandboxStatus::Stopped,
                    None => SandboxStatus::Unknown,
                };

                UnitInfo {
                    id: c.id.unwrap_or_default(),
                    name: c
                        .names
                        .unwrap_or_default()
                        .first()
                        .map(|n| n.trim_start_matches('/').to_string())
                        .unwrap_or_default(),
                    sandbox_id: c
                        .labels
                        .as_ref()
                        .and_then(|labels| labels.get(super::SANDBOX_ID_LABEL))
                        .cloned(),
                    status,
                }
            })
            .collect())
    }
}
