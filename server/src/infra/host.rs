//! Sandbox host abstraction
//!
//! The orchestrator only talks to sandboxes through these traits. Backends
//! live in `local` (plain child processes) and `docker_sandbox` (containers).

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::stream::BoxStream;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::domain::file_tree::FileTree;
use crate::error::{Error, Result};

/// Capacity of the per-instance event channel
pub const EVENT_CHANNEL_CAPACITY: usize = 32;

/// Capacity of a process output channel
pub const OUTPUT_CHANNEL_CAPACITY: usize = 256;

const READ_BUFFER_SIZE: usize = 8192;

/// Events emitted by a sandbox instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostEvent {
    /// A server started listening inside the sandbox
    ServerReady { port: u16, url: String },
    /// The host itself failed
    Error { message: String },
}

/// Options for spawning a process
#[derive(Debug, Clone, Default)]
pub struct SpawnOptions {
    /// Environment variables added to the process
    pub env: HashMap<String, String>,
}

impl SpawnOptions {
    /// Port the process was asked to listen on, from `PORT`
    pub fn port(&self) -> Option<u16> {
        self.env.get("PORT").and_then(|p| p.parse().ok())
    }
}

/// Requests termination of a spawned process
#[async_trait]
pub trait ProcessKiller: Send + Sync {
    async fn kill(&self) -> Result<()>;
}

/// A process spawned inside a sandbox
pub struct SpawnedProcess {
    /// Raw output chunks, stdout and stderr interleaved
    pub output: BoxStream<'static, String>,
    /// Resolves with the exit code
    pub exit: BoxFuture<'static, i32>,
    pub killer: Arc<dyn ProcessKiller>,
}

/// A booted sandbox
#[async_trait]
pub trait SandboxInstance: Send + Sync {
    fn id(&self) -> &str;

    /// Write a file tree into the sandbox root
    async fn mount(&self, tree: &FileTree) -> Result<()>;

    /// Spawn a process in the sandbox root
    async fn spawn(&self, command: &str, args: &[String], opts: SpawnOptions) -> Result<SpawnedProcess>;

    /// Subscribe to host events
    fn subscribe(&self) -> broadcast::Receiver<HostEvent>;

    /// Kill everything and release the sandbox
    async fn teardown(&self) -> Result<()>;
}

/// Boots sandbox instances
#[async_trait]
pub trait SandboxHost: Send + Sync {
    fn name(&self) -> &'static str;

    async fn boot(&self) -> Result<Arc<dyn SandboxInstance>>;
}

/// Resolve a tree path under `root`, rejecting anything that escapes it
pub fn resolve_under(root: &Path, path: &str) -> Result<PathBuf> {
    let relative = Path::new(path);
    if relative
        .components()
        .any(|c| !matches!(c, Component::Normal(_)))
    {
        return Err(Error::InvalidPath(path.to_string()));
    }

    let full_path = root.join(relative);
    if !full_path.starts_with(root) {
        return Err(Error::InvalidPath(path.to_string()));
    }
    Ok(full_path)
}

/// Write every file of `tree` below `root`
pub async fn write_tree(root: &Path, tree: &FileTree) -> Result<()> {
    tokio::fs::create_dir_all(root).await?;
    let files = tree.files();
    for (path, contents) in &files {
        let full_path = resolve_under(root, path)?;
        if let Some(parent) = full_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&full_path, contents).await?;
    }
    info!("Wrote {} files to {}", files.len(), root.display());
    Ok(())
}

/// Forward raw chunks from a reader into a channel until EOF.
///
/// Keeps draining after the receiver is gone so the child never blocks on
/// a full pipe.
pub async fn pump_output<R>(mut reader: R, tx: mpsc::Sender<String>)
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                let chunk = String::from_utf8_lossy(&buf[..n]).into_owned();
                let _ = tx.send(chunk).await;
            }
            Err(e) => {
                debug!("Output stream closed: {}", e);
                break;
            }
        }
    }
}

/// Poll `host:port` until it accepts a connection, then emit `ServerReady` once
pub fn spawn_ready_probe(
    host: String,
    port: u16,
    url: String,
    interval: Duration,
    events: broadcast::Sender<HostEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            if TcpStream::connect((host.as_str(), port)).await.is_ok() {
                info!("Server ready on {}", url);
                let _ = events.send(HostEvent::ServerReady { port, url });
                return;
            }
            tokio::time::sleep(interval).await;
        }
    })
}
