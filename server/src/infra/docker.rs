//! Docker management layer

use std::collections::HashMap;
use std::pin::Pin;

use bollard::{
    container::{
        Config, CreateContainerOptions, LogOutput, RemoveContainerOptions, StartContainerOptions,
    },
    exec::{CreateExecOptions, StartExecOptions, StartExecResults},
    image::CreateImageOptions,
    models::HostConfig,
    Docker,
};
use futures::{Stream, StreamExt};
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Output of an attached exec
pub type ExecOutput = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Container creation options
#[derive(Debug, Clone, Default)]
pub struct CreateContainerOpts {
    /// Container name
    pub name: String,
    /// Image to use
    pub image: String,
    /// Volumes to mount (host_path -> container_path)
    pub volumes: HashMap<String, String>,
    /// Working directory
    pub working_dir: Option<String>,
    /// Command to run
    pub cmd: Option<Vec<String>>,
    /// Labels
    pub labels: HashMap<String, String>,
    /// Network mode
    pub network_mode: Option<String>,
}

/// Command to run inside a container
#[derive(Debug, Clone, Default)]
pub struct ExecOpts {
    pub cmd: Vec<String>,
    pub env: HashMap<String, String>,
    pub working_dir: Option<String>,
}

/// Docker manager for container operations
pub struct DockerManager {
    client: Docker,
    default_image: String,
}

impl DockerManager {
    /// Create a new Docker manager
    pub fn new(socket_path: Option<&str>, default_image: &str) -> Result<Self> {
        let client = match socket_path {
            Some(path) => {
                Docker::connect_with_socket(path, 120, bollard::API_DEFAULT_VERSION)
                    .map_err(|e| Error::DockerError(e.to_string()))?
            }
            None => {
                Docker::connect_with_local_defaults()
                    .map_err(|e| Error::DockerError(e.to_string()))?
            }
        };

        Ok(Self {
            client,
            default_image: default_image.to_string(),
        })
    }

    /// Check if Docker daemon is accessible
    pub async fn ping(&self) -> Result<()> {
        self.client
            .ping()
            .await
            .map_err(|e| Error::DockerError(format!("Docker ping failed: {}", e)))?;
        Ok(())
    }

    /// Pull an image if not present
    pub async fn ensure_image(&self, image: &str) -> Result<()> {
        let image_name = if image.contains(':') {
            image.to_string()
        } else {
            format!("{}:latest", image)
        };

        if self.client.inspect_image(&image_name).await.is_ok() {
            debug!("Image {} already exists", image_name);
            return Ok(());
        }
        info!("Pulling image {}...", image_name);

        let options = CreateImageOptions {
            from_image: image_name.clone(),
            ..Default::default()
        };
        let mut stream = self.client.create_image(Some(options), None, None);
        while let Some(result) = stream.next().await {
            match result {
                Ok(info) => {
                    if let Some(status) = info.status {
                        debug!("Pull status: {}", status);
                    }
                }
                Err(e) => {
                    return Err(Error::DockerError(format!("Failed to pull image: {}", e)));
                }
            }
        }

        info!("Image {} pulled successfully", image_name);
        Ok(())
    }

    /// Create a container
    pub async fn create_container(&self, opts: CreateContainerOpts) -> Result<String> {
        let image = if opts.image.is_empty() {
            self.default_image.clone()
        } else {
            opts.image
        };
        self.ensure_image(&image).await?;

        let binds: Vec<String> = opts
            .volumes
            .iter()
            .map(|(host, container)| format!("{}:{}", host, container))
            .collect();

        let host_config = HostConfig {
            binds: if binds.is_empty() { None } else { Some(binds) },
            network_mode: opts.network_mode,
            ..Default::default()
        };

        let config = Config {
            image: Some(image),
            working_dir: opts.working_dir,
            cmd: opts.cmd,
            labels: if opts.labels.is_empty() {
                None
            } else {
                Some(opts.labels)
            },
            host_config: Some(host_config),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: opts.name.clone(),
            platform: None,
        };

        let response = self
            .client
            .create_container(Some(options), config)
            .await
            .map_err(|e| Error::DockerError(format!("Failed to create container: {}", e)))?;

        info!("Container {} created with ID: {}", opts.name, response.id);
        Ok(response.id)
    }

    /// Start a container
    pub async fn start_container(&self, id: &str) -> Result<()> {
        self.client
            .start_container(id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| Error::DockerError(format!("Failed to start container: {}", e)))?;

        info!("Container {} started", id);
        Ok(())
    }

    /// Remove a container
    pub async fn remove_container(&self, id: &str, force: bool) -> Result<()> {
        let options = RemoveContainerOptions {
            force,
            v: true,
            ..Default::default()
        };

        self.client
            .remove_container(id, Some(options))
            .await
            .map_err(|e| Error::DockerError(format!("Failed to remove container: {}", e)))?;

        info!("Container {} removed", id);
        Ok(())
    }

    /// Check if a container is running
    pub async fn is_container_running(&self, id: &str) -> Result<bool> {
        let info = self
            .client
            .inspect_container(id, None)
            .await
            .map_err(|e| Error::DockerError(e.to_string()))?;

        Ok(info.state.and_then(|s| s.running).unwrap_or(false))
    }

    /// First IP address the container has on any network
    pub async fn container_ip(&self, id: &str) -> Result<Option<String>> {
        let info = self
            .client
            .inspect_container(id, None)
            .await
            .map_err(|e| Error::DockerError(e.to_string()))?;

        let settings = match info.network_settings {
            Some(settings) => settings,
            None => return Ok(None),
        };
        let from_networks = settings.networks.and_then(|networks| {
            networks
                .into_values()
                .filter_map(|endpoint| endpoint.ip_address)
                .find(|ip| !ip.is_empty())
        });
        #[allow(deprecated)]
        let legacy = settings.ip_address.filter(|ip| !ip.is_empty());
        Ok(from_networks.or(legacy))
    }

    /// Start a command in a running container with attached output.
    ///
    /// Returns the exec id and its merged stdout/stderr.
    pub async fn exec(&self, container_id: &str, opts: ExecOpts) -> Result<(String, ExecOutput)> {
        let env: Vec<String> = opts
            .env
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();

        let exec = self
            .client
            .create_exec(
                container_id,
                CreateExecOptions::<String> {
                    cmd: Some(opts.cmd),
                    env: if env.is_empty() { None } else { Some(env) },
                    working_dir: opts.working_dir,
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| Error::DockerError(format!("Failed to create exec: {}", e)))?;

        let started = self
            .client
            .start_exec(&exec.id, Some(StartExecOptions::default()))
            .await
            .map_err(|e| Error::DockerError(format!("Failed to start exec: {}", e)))?;

        match started {
            StartExecResults::Attached { output, .. } => {
                let output = output.map(|result| {
                    result
                        .map(|chunk| match chunk {
                            LogOutput::StdOut { message } | LogOutput::StdErr { message } => {
                                String::from_utf8_lossy(&message).into_owned()
                            }
                            _ => String::new(),
                        })
                        .map_err(|e| Error::DockerError(e.to_string()))
                });
                Ok((exec.id, Box::pin(output)))
            }
            StartExecResults::Detached => Err(Error::DockerError(
                "exec started detached; expected attached output".to_string(),
            )),
        }
    }

    /// Exit code of a finished exec
    pub async fn exec_exit_code(&self, exec_id: &str) -> Result<Option<i64>> {
        let info = self
            .client
            .inspect_exec(exec_id)
            .await
            .map_err(|e| Error::DockerError(e.to_string()))?;
        if info.running.unwrap_or(false) {
            return Ok(None);
        }
        Ok(info.exit_code)
    }

    /// Run a command to completion, discarding output
    pub async fn exec_quiet(&self, container_id: &str, cmd: Vec<String>) -> Result<()> {
        let (_, mut output) = self
            .exec(
                container_id,
                ExecOpts {
                    cmd,
                    ..Default::default()
                },
            )
            .await?;
        while let Some(chunk) = output.next().await {
            chunk?;
        }
        Ok(())
    }
}
