//! Local process sandbox backend
//!
//! Each instance is a fresh directory under the workspace dir. Processes run
//! as ordinary children in their own process group so that killing a
//! package manager also takes down the tools it started.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::{FutureExt, StreamExt};
use tokio::process::Command;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::AbortHandle;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::file_tree::FileTree;
use crate::error::{Error, Result};
use crate::infra::host::{
    pump_output, spawn_ready_probe, write_tree, HostEvent, ProcessKiller, SandboxHost,
    SandboxInstance, SpawnOptions, SpawnedProcess, EVENT_CHANNEL_CAPACITY,
    OUTPUT_CHANNEL_CAPACITY,
};

/// Host that runs sandboxes as local directories
pub struct LocalSandboxHost {
    workspace_dir: PathBuf,
    ready_poll: Duration,
}

impl LocalSandboxHost {
    pub fn new(workspace_dir: impl Into<PathBuf>, ready_poll: Duration) -> Self {
        Self {
            workspace_dir: workspace_dir.into(),
            ready_poll,
        }
    }
}

#[async_trait]
impl SandboxHost for LocalSandboxHost {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn boot(&self) -> Result<Arc<dyn SandboxInstance>> {
        let id = Uuid::new_v4().to_string();
        let root = self.workspace_dir.join(&id);
        tokio::fs::create_dir_all(&root).await.map_err(|e| {
            Error::SandboxUnavailable(format!(
                "cannot create sandbox directory {}: {}",
                root.display(),
                e
            ))
        })?;

        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        info!("Local sandbox {} booted at {}", id, root.display());

        Ok(Arc::new(LocalInstance {
            id,
            root,
            ready_poll: self.ready_poll,
            events,
            live: Arc::new(Mutex::new(Vec::new())),
            probes: Mutex::new(Vec::new()),
        }))
    }
}

/// A local sandbox instance
pub struct LocalInstance {
    id: String,
    root: PathBuf,
    ready_poll: Duration,
    events: broadcast::Sender<HostEvent>,
    /// Process group ids still running
    live: Arc<Mutex<Vec<u32>>>,
    probes: Mutex<Vec<AbortHandle>>,
}

#[async_trait]
impl SandboxInstance for LocalInstance {
    fn id(&self) -> &str {
        &self.id
    }

    async fn mount(&self, tree: &FileTree) -> Result<()> {
        write_tree(&self.root, tree).await
    }

    async fn spawn(&self, command: &str, args: &[String], opts: SpawnOptions) -> Result<SpawnedProcess> {
        let mut cmd = Command::new(command);
        cmd.args(args)
            .envs(opts.env.iter())
            .current_dir(&self.root)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd
            .spawn()
            .map_err(|e| Error::SpawnFailed(format!("{}: {}", command, e)))?;
        let pid = child.id();
        info!("Spawned {} {:?} (pid {:?}) in sandbox {}", command, args, pid, self.id);

        let (out_tx, out_rx) = mpsc::channel(OUTPUT_CHANNEL_CAPACITY);
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(pump_output(stdout, out_tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(pump_output(stderr, out_tx.clone()));
        }
        drop(out_tx);

        let probe = opts.port().map(|port| {
            spawn_ready_probe(
                "127.0.0.1".to_string(),
                port,
                format!("http://localhost:{}", port),
                self.ready_poll,
                self.events.clone(),
            )
        });
        if let Some(probe) = &probe {
            if let Ok(mut probes) = self.probes.lock() {
                probes.push(probe.abort_handle());
            }
        }

        if let (Some(pid), Ok(mut live)) = (pid, self.live.lock()) {
            live.push(pid);
        }

        let exited = Arc::new(AtomicBool::new(false));
        let (exit_tx, exit_rx) = oneshot::channel();
        let live = self.live.clone();
        let exited_flag = exited.clone();
        let label = command.to_string();
        tokio::spawn(async move {
            let code = match child.wait().await {
                Ok(status) => exit_code(status),
                Err(e) => {
                    warn!("Failed to wait for {}: {}", label, e);
                    -1
                }
            };
            exited_flag.store(true, Ordering::SeqCst);
            if let Some(probe) = probe {
                probe.abort();
            }
            if let (Some(pid), Ok(mut live)) = (pid, live.lock()) {
                live.retain(|p| *p != pid);
            }
            debug!("{} exited with code {}", label, code);
            let _ = exit_tx.send(code);
        });

        Ok(SpawnedProcess {
            output: ReceiverStream::new(out_rx).boxed(),
            exit: exit_rx.map(|r| r.unwrap_or(-1)).boxed(),
            killer: Arc::new(LocalKiller { pid, exited }),
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
        let pids: Vec<u32> = match self.live.lock() {
            Ok(mut live) => live.drain(..).collect(),
            Err(_) => Vec::new(),
        };
        for pid in pids {
            if let Err(e) = signal_group(pid, true) {
                debug!("Process group {} already gone: {}", pid, e);
            }
        }

        if self.root.exists() {
            if let Err(e) = tokio::fs::remove_dir_all(&self.root).await {
                warn!("Failed to remove sandbox directory {}: {}", self.root.display(), e);
            }
        }
        info!("Local sandbox {} torn down", self.id);
        Ok(())
    }
}

/// Kills a local process group
struct LocalKiller {
    pid: Option<u32>,
    exited: Arc<AtomicBool>,
}

#[async_trait]
impl ProcessKiller for LocalKiller {
    async fn kill(&self) -> Result<()> {
        if self.exited.load(Ordering::SeqCst) {
            return Ok(());
        }
        let pid = self
            .pid
            .ok_or_else(|| Error::HostError("process has no pid".to_string()))?;
        signal_group(pid, false)
    }
}

/// Signal a process group: SIGTERM, or SIGKILL when `force`
#[cfg(unix)]
fn signal_group(pid: u32, force: bool) -> Result<()> {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let signal = if force { Signal::SIGKILL } else { Signal::SIGTERM };
    killpg(Pid::from_raw(pid as i32), signal)
        .map_err(|e| Error::HostError(format!("failed to signal process group {}: {}", pid, e)))
}

#[cfg(not(unix))]
fn signal_group(_pid: u32, _force: bool) -> Result<()> {
    Err(Error::HostError(
        "process termination not supported on this platform".to_string(),
    ))
}

/// Exit code, mapping signal deaths to 128 + signal
fn exit_code(status: std::process::ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    -1
}
