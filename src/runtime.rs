//! Container runtime adapter
//!
//! Thin capability-set wrapper over one Docker endpoint. Every call result
//! is reported to the caller; errors are mapped onto the control-plane
//! taxonomy so the lifecycle controller can decide what is retryable.

use crate::error::{ControlError, Result};
use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, RemoveContainerOptions, StartContainerOptions,
    StopContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::models::{HostConfig, PortBinding};
use bollard::volume::RemoveVolumeOptions;
use bollard::Docker;
use futures::StreamExt;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Observed container status from `inspect`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeStatus {
    Running,
    Exited,
    Missing,
}

/// Everything needed to create one game-server container
#[derive(Debug, Clone)]
pub struct CreateSpec {
    /// Container name, derived from the server name
    pub name: String,
    pub image: String,
    pub env: HashMap<String, String>,
    /// Host-side port the proxy routes to
    pub host_port: u16,
    /// Port the game listens on inside the container
    pub game_port: u16,
    /// Named volume mounted at the server data directory
    pub volume: String,
}

/// The four lifecycle operations plus inspect, against one engine endpoint
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    async fn create(&self, spec: &CreateSpec) -> Result<String>;
    async fn start(&self, container_id: &str) -> Result<()>;
    async fn stop(&self, container_id: &str, grace: Duration) -> Result<()>;
    async fn remove(&self, container_id: &str) -> Result<()>;
    async fn remove_volume(&self, volume: &str) -> Result<()>;
    async fn inspect(&self, container_id: &str) -> Result<RuntimeStatus>;
}

/// Docker implementation of the runtime boundary
pub struct DockerRuntime {
    client: Docker,
}

impl DockerRuntime {
    /// Connect to the Docker daemon.
    ///
    /// Connection priority:
    /// 1. Explicit endpoint from configuration
    /// 2. DOCKER_HOST environment variable
    /// 3. Platform default socket
    pub async fn connect(endpoint: Option<&str>) -> anyhow::Result<Self> {
        let client = if let Some(host) = endpoint {
            Self::connect_to_host(host)?
        } else if let Ok(host) = std::env::var("DOCKER_HOST") {
            Self::connect_to_host(&host)?
        } else {
            Docker::connect_with_socket_defaults()
                .map_err(|e| anyhow::anyhow!("Cannot connect to Docker daemon: {}", e))?
        };

        // Verify connection
        client.ping().await.map_err(|e| {
            anyhow::anyhow!(
                "Docker daemon is not responding: {}. Ensure dockerd is running \
                 and the endpoint is correct.",
                e
            )
        })?;

        debug!("Connected to Docker daemon");
        Ok(Self { client })
    }

    fn connect_to_host(host: &str) -> anyhow::Result<Docker> {
        if host.starts_with("unix://") {
            let socket_path = host.trim_start_matches("unix://");
            Docker::connect_with_socket(socket_path, 120, bollard::API_DEFAULT_VERSION)
                .map_err(|e| anyhow::anyhow!("Cannot connect to Unix socket '{}': {}", socket_path, e))
        } else if host.starts_with("tcp://") || host.starts_with("http://") {
            Docker::connect_with_http(host, 120, bollard::API_DEFAULT_VERSION)
                .map_err(|e| anyhow::anyhow!("Cannot connect to TCP endpoint '{}': {}", host, e))
        } else {
            anyhow::bail!(
                "Invalid docker endpoint '{}'. Expected 'unix:///path/to/socket' or 'tcp://host:port'",
                host
            )
        }
    }

    /// Pull the image when it is not present locally
    async fn pull_if_absent(&self, image: &str) -> Result<()> {
        if self.client.inspect_image(image).await.is_ok() {
            debug!(image, "Image exists locally, skipping pull");
            return Ok(());
        }

        info!(image, "Pulling image");
        let options = CreateImageOptions {
            from_image: image,
            ..Default::default()
        };

        let mut stream = self.client.create_image(Some(options), None, None);
        while let Some(result) = stream.next().await {
            match result {
                Ok(progress) => {
                    if let Some(error) = progress.error {
                        return Err(ControlError::RuntimeConflict(format!(
                            "pull of '{}' failed: {}",
                            image, error
                        )));
                    }
                }
                Err(e) => return Err(map_bollard_error(e)),
            }
        }

        info!(image, "Image pulled");
        Ok(())
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn create(&self, spec: &CreateSpec) -> Result<String> {
        self.pull_if_absent(&spec.image).await?;

        let mut env: Vec<String> = spec.env.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        env.sort();
        env.push(format!("SERVER_PORT={}", spec.game_port));

        let port_key = format!("{}/tcp", spec.game_port);
        let mut port_bindings: HashMap<String, Option<Vec<PortBinding>>> = HashMap::new();
        port_bindings.insert(
            port_key.clone(),
            Some(vec![PortBinding {
                host_ip: Some("0.0.0.0".to_string()),
                host_port: Some(spec.host_port.to_string()),
            }]),
        );

        let mut exposed_ports: HashMap<String, HashMap<(), ()>> = HashMap::new();
        exposed_ports.insert(port_key, HashMap::new());

        let host_config = HostConfig {
            port_bindings: Some(port_bindings),
            binds: Some(vec![format!("{}:/data", spec.volume)]),
            ..Default::default()
        };

        let container_config = Config {
            image: Some(spec.image.clone()),
            env: Some(env),
            exposed_ports: Some(exposed_ports),
            host_config: Some(host_config),
            labels: Some(HashMap::from([
                ("fleetgate.managed".to_string(), "true".to_string()),
                ("fleetgate.server".to_string(), spec.name.clone()),
            ])),
            ..Default::default()
        };

        let create_options = CreateContainerOptions {
            name: format!("fleetgate-{}", spec.name),
            platform: None,
        };

        let response = self
            .client
            .create_container(Some(create_options), container_config)
            .await
            .map_err(map_bollard_error)?;

        info!(
            server = %spec.name,
            container_id = %response.id,
            image = %spec.image,
            host_port = spec.host_port,
            "Created container"
        );
        Ok(response.id)
    }

    async fn start(&self, container_id: &str) -> Result<()> {
        self.client
            .start_container(container_id, None::<StartContainerOptions<String>>)
            .await
            .map_err(map_bollard_error)?;
        info!(container_id, "Started container");
        Ok(())
    }

    async fn stop(&self, container_id: &str, grace: Duration) -> Result<()> {
        let options = StopContainerOptions {
            t: grace.as_secs() as i64,
        };

        // The engine escalates to SIGKILL after the grace period; if the stop
        // call itself hangs past that, force-kill from our side.
        let call = self.client.stop_container(container_id, Some(options));
        let outcome = tokio::time::timeout(grace + Duration::from_secs(10), call).await;

        match outcome {
            Ok(Ok(())) => {
                info!(container_id, "Stopped container");
                Ok(())
            }
            Ok(Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 304, ..
            })) => {
                debug!(container_id, "Container was already stopped");
                Ok(())
            }
            Ok(Err(e)) => Err(map_bollard_error(e)),
            Err(_elapsed) => {
                warn!(container_id, "Stop timed out, escalating to kill");
                self.client
                    .kill_container::<String>(container_id, None)
                    .await
                    .map_err(map_bollard_error)?;
                Ok(())
            }
        }
    }

    async fn remove(&self, container_id: &str) -> Result<()> {
        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };

        match self.client.remove_container(container_id, Some(options)).await {
            Ok(()) => {
                debug!(container_id, "Removed container");
                Ok(())
            }
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => {
                debug!(container_id, "Container already gone");
                Ok(())
            }
            Err(e) => Err(map_bollard_error(e)),
        }
    }

    async fn remove_volume(&self, volume: &str) -> Result<()> {
        let options = RemoveVolumeOptions { force: true };
        match self.client.remove_volume(volume, Some(options)).await {
            Ok(()) => {
                debug!(volume, "Removed volume");
                Ok(())
            }
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => {
                debug!(volume, "Volume already gone");
                Ok(())
            }
            Err(e) => Err(map_bollard_error(e)),
        }
    }

    async fn inspect(&self, container_id: &str) -> Result<RuntimeStatus> {
        match self.client.inspect_container(container_id, None).await {
            Ok(info) => {
                let running = info.state.and_then(|s| s.running).unwrap_or(false);
                Ok(if running {
                    RuntimeStatus::Running
                } else {
                    RuntimeStatus::Exited
                })
            }
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(RuntimeStatus::Missing),
            Err(e) => Err(map_bollard_error(e)),
        }
    }
}

/// Map a bollard error onto the control-plane taxonomy
fn map_bollard_error(e: bollard::errors::Error) -> ControlError {
    match e {
        bollard::errors::Error::DockerResponseServerError {
            status_code,
            message,
        } => {
            let lower = message.to_lowercase();
            if status_code == 404 {
                ControlError::RuntimeNotFound(message)
            } else if status_code == 409
                || lower.contains("port is already allocated")
                || lower.contains("address already in use")
                || lower.contains("is already in use by container")
            {
                ControlError::RuntimeConflict(message)
            } else if status_code >= 500 {
                ControlError::RuntimeUnavailable(message)
            } else {
                ControlError::RuntimeConflict(message)
            }
        }
        other => ControlError::RuntimeUnavailable(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server_error(status_code: u16, message: &str) -> bollard::errors::Error {
        bollard::errors::Error::DockerResponseServerError {
            status_code,
            message: message.to_string(),
        }
    }

    #[test]
    fn test_404_maps_to_not_found() {
        let err = map_bollard_error(server_error(404, "no such container"));
        assert!(matches!(err, ControlError::RuntimeNotFound(_)));
    }

    #[test]
    fn test_409_maps_to_conflict() {
        let err = map_bollard_error(server_error(409, "name conflict"));
        assert!(matches!(err, ControlError::RuntimeConflict(_)));
    }

    #[test]
    fn test_port_collision_message_maps_to_conflict() {
        let err = map_bollard_error(server_error(400, "Port is already allocated"));
        assert!(matches!(err, ControlError::RuntimeConflict(_)));
    }

    #[test]
    fn test_server_error_maps_to_unavailable() {
        let err = map_bollard_error(server_error(500, "daemon exploded"));
        assert!(matches!(err, ControlError::RuntimeUnavailable(_)));
        assert!(err.is_retryable());
    }
}
