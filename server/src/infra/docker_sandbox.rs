//! Docker sandbox backend
//!
//! Each instance is an idle container with the instance directory bind
//! mounted at `/workspace`. Files are written on the host side; processes run
//! through `docker exec`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::{FutureExt, StreamExt};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::AbortHandle;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::domain::file_tree::FileTree;
use crate::error::{Error, Result};
use crate::infra::docker::{CreateContainerOpts, DockerManager, ExecOpts};
use crate::infra::host::{
    spawn_ready_probe, write_tree, HostEvent, ProcessKiller, SandboxHost, SandboxInstance,
    SpawnOptions, SpawnedProcess, EVENT_CHANNEL_CAPACITY, OUTPUT_CHANNEL_CAPACITY,
};

const CONTAINER_WORKDIR: &str = "/workspace";
const INSTANCE_LABEL: &str = "devshell.instance";
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(100);
const EXIT_POLL_ATTEMPTS: usize = 50;

/// Shell prologue that records the pid before exec'ing the real command
const PID_WRAPPER: &str = r#"echo $$ > "$DEVSHELL_PIDFILE"; exec "$0" "$@""#;

/// Host that runs sandboxes as docker containers
pub struct DockerSandboxHost {
    docker: Arc<DockerManager>,
    config: Arc<Config>,
}

impl DockerSandboxHost {
    pub fn new(docker: Arc<DockerManager>, config: Arc<Config>) -> Self {
        Self { docker, config }
    }

    async fn start(&self, id: &str, root: &Path) -> Result<(String, Option<String>)> {
        self.docker.ping().await?;
        tokio::fs::create_dir_all(root).await?;

        let mut volumes = HashMap::new();
        volumes.insert(
            self.config.get_instance_host_path(id),
            CONTAINER_WORKDIR.to_string(),
        );
        let mut labels = HashMap::new();
        labels.insert(INSTANCE_LABEL.to_string(), id.to_string());

        let container_id = self
            .docker
            .create_container(CreateContainerOpts {
                name: format!("devshell-{}", id),
                image: self.config.base_image.clone(),
                volumes,
                working_dir: Some(CONTAINER_WORKDIR.to_string()),
                cmd: Some(vec!["sleep".to_string(), "infinity".to_string()]),
                labels,
                network_mode: self.config.docker_network.clone(),
            })
            .await?;

        if let Err(e) = self.docker.start_container(&container_id).await {
            let _ = self.docker.remove_container(&container_id, true).await;
            return Err(e);
        }
        let ip = self.docker.container_ip(&container_id).await.unwrap_or_default();
        Ok((container_id, ip))
    }
}

#[async_trait]
impl SandboxHost for DockerSandboxHost {
    fn name(&self) -> &'static str {
        "docker"
    }

    async fn boot(&self) -> Result<Arc<dyn SandboxInstance>> {
        let id = Uuid::new_v4().to_string();
        let root = PathBuf::from(&self.config.workspace_dir).join(&id);

        let (container_id, ip) = self
            .start(&id, &root)
            .await
            .map_err(|e| Error::SandboxUnavailable(e.to_string()))?;
        info!("Docker sandbox {} booted as container {} ({:?})", id, container_id, ip);

        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Ok(Arc::new(DockerInstance {
            id,
            root,
            container_id,
            ip,
            docker: self.docker.clone(),
            ready_poll: Duration::from_millis(self.config.ready_poll_ms),
            events,
            next_pidfile: AtomicU64::new(1),
            probes: Mutex::new(Vec::new()),
        }))
    }
}

/// A container-backed sandbox instance
pub struct DockerInstance {
    id: String,
    root: PathBuf,
    container_id: String,
    ip: Option<String>,
    docker: Arc<DockerManager>,
    ready_poll: Duration,
    events: broadcast::Sender<HostEvent>,
    next_pidfile: AtomicU64,
    probes: Mutex<Vec<AbortHandle>>,
}

#[async_trait]
impl SandboxInstance for DockerInstance {
    fn id(&self) -> &str {
        &self.id
    }

    async fn mount(&self, tree: &FileTree) -> Result<()> {
        write_tree(&self.root, tree).await
    }

    async fn spawn(&self, command: &str, args: &[String], opts: SpawnOptions) -> Result<SpawnedProcess> {
        let pidfile = format!(
            "/tmp/devshell-{}.pid",
            self.next_pidfile.fetch_add(1, Ordering::Relaxed)
        );
        let port = opts.port();

        let mut env = opts.env;
        env.insert("DEVSHELL_PIDFILE".to_string(), pidfile.clone());
        if port.is_some() {
            // Dev servers must listen beyond the container loopback
            env.insert("HOST".to_string(), "0.0.0.0".to_string());
            env.insert("HOSTNAME".to_string(), "0.0.0.0".to_string());
        }

        let mut cmd = vec![
            "sh".to_string(),
            "-c".to_string(),
            PID_WRAPPER.to_string(),
            command.to_string(),
        ];
        cmd.extend(args.iter().cloned());

        let (exec_id, mut output) = self
            .docker
            .exec(
                &self.container_id,
                ExecOpts {
                    cmd,
                    env,
                    working_dir: Some(CONTAINER_WORKDIR.to_string()),
                },
            )
            .await
            .map_err(|e| Error::SpawnFailed(format!("{}: {}", command, e)))?;
        info!("Spawned {} {:?} in container {} (exec {})", command, args, self.container_id, exec_id);

        let probe = match (port, &self.ip) {
            (Some(port), Some(ip)) => {
                let handle = spawn_ready_probe(
                    ip.clone(),
                    port,
                    format!("http://{}:{}", ip, port),
                    self.ready_poll,
                    self.events.clone(),
                );
                if let Ok(mut probes) = self.probes.lock() {
                    probes.push(handle.abort_handle());
                }
                Some(handle.abort_handle())
            }
            (Some(port), None) => {
                warn!("Container {} has no IP; cannot probe port {}", self.container_id, port);
                None
            }
            _ => None,
        };

        let (out_tx, out_rx) = mpsc::channel(OUTPUT_CHANNEL_CAPACITY);
        let (exit_tx, exit_rx) = oneshot::channel();
        let docker = self.docker.clone();
        let container_id = self.container_id.clone();
        let events = self.events.clone();
        tokio::spawn(async move {
            while let Some(chunk) = output.next().await {
                match chunk {
                    Ok(text) if text.is_empty() => {}
                    Ok(text) => {
                        let _ = out_tx.send(text).await;
                    }
                    Err(e) => {
                        warn!("Exec {} output failed: {}", exec_id, e);
                        if !docker.is_container_running(&container_id).await.unwrap_or(false) {
                            let _ = events.send(HostEvent::Error {
                                message: format!("sandbox container {} stopped", container_id),
                            });
                        }
                        break;
                    }
                }
            }
            drop(out_tx);

            let code = wait_exit_code(&docker, &exec_id).await;
            if let Some(probe) = probe {
                probe.abort();
            }
            debug!("Exec {} exited with code {}", exec_id, code);
            let _ = exit_tx.send(code);
        });

        Ok(SpawnedProcess {
            output: ReceiverStream::new(out_rx).boxed(),
            exit: exit_rx.map(|r| r.unwrap_or(-1)).boxed(),
            killer: Arc::new(DockerKiller {
                docker: self.docker.clone(),
                container_id: self.container_id.clone(),
                pidfile,
            }),
        })
    }

    fn subscribe(&self) -> broadcast::Receiver<HostEvent> {
        self.events.subscribe()
    }

    async fn teardown(&self) -> Result<()> {
        if let Ok(mut probes) = self.probes.lock() {
            for probe in probes.drain(..) {
                probe.abort();
            }
        }
        if let Err(e) = self.docker.remove_container(&self.container_id, true).await {
            warn!("Failed to remove container {}: {}", self.container_id, e);
        }
        if self.root.exists() {
            if let Err(e) = tokio::fs::remove_dir_all(&self.root).await {
                warn!("Failed to remove sandbox directory {}: {}", self.root.display(), e);
            }
        }
        info!("Docker sandbox {} torn down", self.id);
        Ok(())
    }
}

/// Exit code once the exec has stopped running
async fn wait_exit_code(docker: &DockerManager, exec_id: &str) -> i32 {
    for _ in 0..EXIT_POLL_ATTEMPTS {
        match docker.exec_exit_code(exec_id).await {
            Ok(Some(code)) => return code as i32,
            Ok(None) => tokio::time::sleep(EXIT_POLL_INTERVAL).await,
            Err(e) => {
                warn!("Cannot inspect exec {}: {}", exec_id, e);
                return -1;
            }
        }
    }
    -1
}

/// Signals a process and its children through the recorded pid
struct DockerKiller {
    docker: Arc<DockerManager>,
    container_id: String,
    pidfile: String,
}

#[async_trait]
impl ProcessKiller for DockerKiller {
    async fn kill(&self) -> Result<()> {
        let script = format!(
            r#"pid=$(cat "{0}" 2>/dev/null) || exit 0; pkill -TERM -P "$pid"; kill -TERM "$pid" 2>/dev/null; rm -f "{0}""#,
            self.pidfile
        );
        self.docker
            .exec_quiet(
                &self.container_id,
                vec!["sh".to_string(), "-c".to_string(), script],
            )
            .await
            .map_err(|e| Error::HostError(format!("failed to signal process: {}", e)))
    }
}
