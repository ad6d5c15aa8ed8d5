//! Sandbox lifecycle orchestration
//!
//! A launch walks boot, sync (or template fallback), mount, install, infer
//! and dev-server start. Only the newest launch may touch shared state: every
//! launch takes a generation number and stops as soon as a newer one exists.
//!
//! Each managed process lives in a slot together with the sender half of its
//! termination-cause channel. Whoever kills a process first takes the slot
//! and sends the cause while holding the runtime lock; the exit watcher
//! takes the slot itself if it is still there, which means the process ended
//! on its own. Either way the cause is read exactly once.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::stream::BoxStream;
use futures::StreamExt;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::domain::lifecycle::{ConsoleLevel, LifecycleSnapshot, LifecycleStatus, TerminationCause};
use crate::domain::package::{detect_package_manager, parse_manifest, MANIFEST_FILE};
use crate::domain::repository::RepositoryRef;
use crate::domain::types::FrameworkKind;
use crate::error::Error;
use crate::infra::host::{HostEvent, ProcessKiller, SandboxHost, SandboxInstance, SpawnOptions};
use crate::service::inference::{infer_dev_command, CommandPrompt};
use crate::service::observer::LifecycleBridge;
use crate::service::sync::{RepositorySynchronizer, SyncProgress, SyncRequest};
use crate::service::template_detector::{detect_template, TemplateSignals};
use crate::service::templates::TemplateRegistry;

/// How long to keep reading install output after the process exits
const OUTPUT_DRAIN_GRACE: Duration = Duration::from_millis(250);

/// How a launch ended, from the caller's point of view
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchOutcome {
    /// Dev server spawned; readiness is reported later
    Started,
    /// Install cancelled by the user
    Cancelled,
    /// A newer launch took over
    Superseded,
    /// Launch failed; the lifecycle record carries the message
    Failed(String),
}

/// Why a launch stopped early
#[derive(Debug)]
enum Halt {
    Superseded,
    Cancelled,
    Failed(Error),
}

impl From<Error> for Halt {
    fn from(err: Error) -> Self {
        Halt::Failed(err)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Install,
    DevServer,
}

impl Role {
    fn label(&self) -> &'static str {
        match self {
            Role::Install => "install",
            Role::DevServer => "dev server",
        }
    }
}

struct ProcessSlot {
    id: u64,
    killer: Arc<dyn ProcessKiller>,
    cause: oneshot::Sender<TerminationCause>,
}

#[derive(Default)]
struct Runtime {
    instance: Option<Arc<dyn SandboxInstance>>,
    host_events: Option<JoinHandle<()>>,
    install: Option<ProcessSlot>,
    dev_server: Option<ProcessSlot>,
}

impl Runtime {
    fn slot(&mut self, role: Role) -> &mut Option<ProcessSlot> {
        match role {
            Role::Install => &mut self.install,
            Role::DevServer => &mut self.dev_server,
        }
    }
}

struct Inner {
    host: Arc<dyn SandboxHost>,
    synchronizer: Arc<dyn RepositorySynchronizer>,
    templates: Arc<TemplateRegistry>,
    prompt: Option<Arc<dyn CommandPrompt>>,
    startup_timeout: Option<Duration>,
    bridge: Arc<LifecycleBridge>,
    generation: AtomicU64,
    next_process_id: AtomicU64,
    /// Serializes teardown and boot between launches
    boot_lock: Mutex<()>,
    runtime: Mutex<Runtime>,
}

/// Owns the sandbox instance and its processes
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Orchestrator {
    pub fn new(
        host: Arc<dyn SandboxHost>,
        synchronizer: Arc<dyn RepositorySynchronizer>,
        templates: Arc<TemplateRegistry>,
        bridge: Arc<LifecycleBridge>,
        prompt: Option<Arc<dyn CommandPrompt>>,
        startup_timeout: Option<Duration>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                host,
                synchronizer,
                templates,
                prompt,
                startup_timeout,
                bridge,
                generation: AtomicU64::new(0),
                next_process_id: AtomicU64::new(1),
                boot_lock: Mutex::new(()),
                runtime: Mutex::new(Runtime::default()),
            }),
        }
    }

    pub fn bridge(&self) -> &Arc<LifecycleBridge> {
        &self.inner.bridge
    }

    pub fn templates(&self) -> &Arc<TemplateRegistry> {
        &self.inner.templates
    }

    pub fn snapshot(&self) -> LifecycleSnapshot {
        self.inner.bridge.snapshot()
    }

    /// Launch `repo`, replacing whatever is currently running.
    ///
    /// Never fails: problems end up in the lifecycle record.
    pub async fn launch(&self, repo: RepositoryRef) -> LaunchOutcome {
        let inner = &self.inner;
        let epoch = inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        info!("Launch #{} for {} ({})", epoch, repo.full_name(), repo.branch());

        match inner.run_launch(epoch, &repo).await {
            Ok(()) => LaunchOutcome::Started,
            Err(Halt::Cancelled) => {
                info!("Launch #{} stopped: install cancelled", epoch);
                LaunchOutcome::Cancelled
            }
            Err(Halt::Failed(err)) if inner.is_current(epoch) => {
                let message = err.to_string();
                inner.bridge.fail(message.clone());
                LaunchOutcome::Failed(message)
            }
            Err(_) => {
                info!("Launch #{} superseded", epoch);
                LaunchOutcome::Superseded
            }
        }
    }

    /// Kill the running install, if any
    pub async fn cancel_install(&self) {
        if self.inner.terminate(Role::Install, TerminationCause::User).await {
            self.inner
                .bridge
                .set_status(LifecycleStatus::Idle, "Installation cancelled by user");
        }
    }

    /// Kill the running dev server, if any
    pub async fn stop_dev_server(&self) {
        if self.inner.terminate(Role::DevServer, TerminationCause::User).await {
            self.inner.bridge.update(|s| {
                s.preview_port = None;
                s.preview_url = None;
            });
            self.inner
                .bridge
                .set_status(LifecycleStatus::Idle, "Dev server stopped by user");
        }
    }

    /// Tear down the sandbox for process exit
    pub async fn shutdown(&self) {
        let inner = &self.inner;
        inner.generation.fetch_add(1, Ordering::SeqCst);
        let _boot = inner.boot_lock.lock().await;
        inner.teardown(TerminationCause::User).await;
        inner.bridge.update(|s| {
            s.preview_port = None;
            s.preview_url = None;
        });
        inner.bridge.set_status(LifecycleStatus::Idle, "Sandbox shut down");
    }
}

impl Inner {
    fn is_current(&self, epoch: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == epoch
    }

    fn ensure_current(&self, epoch: u64) -> Result<(), Halt> {
        if self.is_current(epoch) {
            Ok(())
        } else {
            Err(Halt::Superseded)
        }
    }

    fn fail(&self, epoch: u64, err: &Error) {
        if self.is_current(epoch) {
            self.bridge.fail(err.to_string());
        } else {
            debug!("Ignoring failure from superseded launch #{}: {}", epoch, err);
        }
    }

    async fn run_launch(self: &Arc<Self>, epoch: u64, repo: &RepositoryRef) -> Result<(), Halt> {
        let instance = self.boot(epoch, repo).await?;

        // Sync, or fall back to a bundled template
        self.bridge.update(|s| s.install_phase = Some("Synchronizing repository".to_string()));
        self.bridge.set_status(
            LifecycleStatus::Initializing,
            format!("Synchronizing {}@{}", repo.full_name(), repo.branch()),
        );
        let (progress_tx, mut progress_rx) = mpsc::unbounded_channel::<SyncProgress>();
        let forward = {
            let inner = self.clone();
            tokio::spawn(async move {
                while let Some(p) = progress_rx.recv().await {
                    if inner.is_current(epoch) {
                        inner.bridge.update(|s| {
                            s.install_phase = Some(format!("Downloading files {}/{}", p.fetched, p.total))
                        });
                    }
                }
            })
        };
        let synced = self
            .synchronizer
            .sync(SyncRequest {
                owner: repo.owner.clone(),
                repo: repo.name.clone(),
                branch: repo.branch().to_string(),
                progress: Some(progress_tx),
            })
            .await;
        let _ = forward.await;
        self.ensure_current(epoch)?;

        let mut template_port = None;
        let (files, package_manager, has_manifest) = match synced {
            Ok(synced) => {
                let detection = detect_template(&TemplateSignals::from_tree(&synced.files, Some(&repo.name), None));
                if let Some(id) = &detection.template_id {
                    self.bridge
                        .push_line(ConsoleLevel::Info, format!("Detected {} project: {}", id, detection.reason));
                    template_port = self.templates.get(id).map(|t| t.default_port);
                }
                (synced.files, synced.package_manager, synced.has_manifest)
            }
            Err(err) => {
                let template_id = repo.fallback_template();
                let reason = match &err {
                    Error::SyncFailed(reason) => reason.clone(),
                    other => other.to_string(),
                };
                self.bridge.push_line(
                    ConsoleLevel::Warn,
                    format!(
                        "Repository sync failed: {}; falling back to the {} template",
                        reason, template_id
                    ),
                );
                let template = self
                    .templates
                    .get(&template_id)
                    .ok_or_else(|| Error::TemplateNotFound(template_id.to_string()))?;
                template_port = Some(template.default_port);
                let files = template.files.clone();
                let package_manager = detect_package_manager(&files);
                let has_manifest = files.contains_file(MANIFEST_FILE);
                (files, package_manager, has_manifest)
            }
        };

        // Mount
        self.bridge.update(|s| s.package_manager = Some(package_manager));
        self.bridge.publish_tree(files.projection());
        self.bridge.set_status(
            LifecycleStatus::Initializing,
            format!("Mounting {} files", files.file_count()),
        );
        instance.mount(&files).await?;
        self.ensure_current(epoch)?;

        if !has_manifest {
            return Err(Error::MissingManifest.into());
        }
        let manifest = parse_manifest(&files);

        // Install
        self.bridge.update(|s| {
            s.install_progress = 0;
            s.install_phase = Some(format!("Running {} install", package_manager));
        });
        self.bridge.set_status(
            LifecycleStatus::InstallingDependencies,
            format!("Installing dependencies with {}", package_manager),
        );
        let process = instance
            .spawn(package_manager.program(), &package_manager.install_args(), SpawnOptions::default())
            .await?;
        let (id, cause_rx) = self.register(epoch, Role::Install, process.killer.clone()).await?;
        let pump = self.spawn_output_pump(epoch, process.output, true);
        let code = process.exit.await;
        let _ = tokio::time::timeout(OUTPUT_DRAIN_GRACE, pump).await;

        match self.settle(Role::Install, id, cause_rx).await {
            TerminationCause::User => return Err(Halt::Cancelled),
            TerminationCause::Restart => return Err(Halt::Superseded),
            TerminationCause::None if code != 0 => {
                return Err(Error::InstallFailed(code).into());
            }
            TerminationCause::None => {}
        }
        self.ensure_current(epoch)?;
        self.bridge
            .update(|s| s.install_phase = Some("Dependencies installed".to_string()));
        info!("Install finished for launch #{}", epoch);

        // Infer and start the dev server
        let command = infer_dev_command(manifest.as_ref(), package_manager, self.prompt.as_deref())
            .ok_or(Error::CommandNotInferred)?;
        let provisional_port = match command.framework {
            FrameworkKind::Custom => template_port.unwrap_or(command.port),
            _ => command.port,
        };
        self.bridge.update(|s| {
            s.framework = Some(command.framework);
            s.dev_command = Some(command.display_label.clone());
        });
        self.bridge.set_status(
            LifecycleStatus::StartingDevServer,
            format!("Starting {}", command.display_label),
        );

        let env = HashMap::from([
            ("PORT".to_string(), command.port.to_string()),
            ("BROWSER".to_string(), "none".to_string()),
        ]);
        let process = instance
            .spawn(&command.shell_command, &command.shell_args, SpawnOptions { env })
            .await?;
        let (id, cause_rx) = self.register(epoch, Role::DevServer, process.killer.clone()).await?;
        self.bridge.update(|s| {
            if s.preview_port.is_none() {
                s.preview_port = Some(provisional_port);
            }
        });
        self.spawn_output_pump(epoch, process.output, false);
        self.spawn_dev_watcher(epoch, id, process.exit, cause_rx);
        if let Some(limit) = self.startup_timeout {
            self.spawn_startup_timeout(epoch, id, limit);
        }
        Ok(())
    }

    /// Tear down the previous instance and boot a fresh one
    async fn boot(self: &Arc<Self>, epoch: u64, repo: &RepositoryRef) -> Result<Arc<dyn SandboxInstance>, Halt> {
        let _boot = self.boot_lock.lock().await;
        self.ensure_current(epoch)?;
        self.teardown(TerminationCause::Restart).await;

        self.bridge.begin_launch(format!("Preparing {}", repo.full_name()));
        info!("Booting {} sandbox", self.host.name());
        let instance = self.host.boot().await.map_err(|err| match err {
            Error::SandboxUnavailable(_) => err,
            other => Error::SandboxUnavailable(other.to_string()),
        })?;

        if !self.is_current(epoch) {
            if let Err(e) = instance.teardown().await {
                warn!("Failed to tear down superseded sandbox {}: {}", instance.id(), e);
            }
            return Err(Halt::Superseded);
        }

        let events = instance.subscribe();
        let mut runtime = self.runtime.lock().await;
        runtime.instance = Some(instance.clone());
        runtime.host_events = Some(self.spawn_host_events(epoch, events));
        info!("Sandbox {} ready for launch #{}", instance.id(), epoch);
        Ok(instance)
    }

    /// Record a freshly spawned process, or kill it if the launch is stale
    async fn register(
        &self,
        epoch: u64,
        role: Role,
        killer: Arc<dyn ProcessKiller>,
    ) -> Result<(u64, oneshot::Receiver<TerminationCause>), Halt> {
        let (cause_tx, cause_rx) = oneshot::channel();
        let id = self.next_process_id.fetch_add(1, Ordering::Relaxed);

        let previous = {
            let mut runtime = self.runtime.lock().await;
            if !self.is_current(epoch) {
                drop(runtime);
                debug!("Killing {} spawned by superseded launch #{}", role.label(), epoch);
                if let Err(e) = killer.kill().await {
                    warn!("Failed to kill stale {}: {}", role.label(), e);
                }
                return Err(Halt::Superseded);
            }
            let previous = runtime.slot(role).replace(ProcessSlot {
                id,
                killer,
                cause: cause_tx,
            });
            previous.map(|slot| {
                let _ = slot.cause.send(TerminationCause::Restart);
                slot.killer
            })
        };
        if let Some(killer) = previous {
            if let Err(e) = killer.kill().await {
                warn!("Failed to kill replaced {}: {}", role.label(), e);
            }
        }
        Ok((id, cause_rx))
    }

    /// Resolve why process `id` ended, consuming its cause exactly once
    async fn settle(
        &self,
        role: Role,
        id: u64,
        mut cause_rx: oneshot::Receiver<TerminationCause>,
    ) -> TerminationCause {
        {
            let mut runtime = self.runtime.lock().await;
            let slot = runtime.slot(role);
            if slot.as_ref().is_some_and(|s| s.id == id) {
                *slot = None;
                return TerminationCause::None;
            }
        }
        cause_rx.try_recv().unwrap_or_default()
    }

    /// Tag and kill the process in `role`; false when nothing was running
    async fn terminate(&self, role: Role, cause: TerminationCause) -> bool {
        let killer = {
            let mut runtime = self.runtime.lock().await;
            match runtime.slot(role).take() {
                Some(slot) => {
                    let _ = slot.cause.send(cause);
                    slot.killer
                }
                None => {
                    debug!("No live {} to terminate", role.label());
                    return false;
                }
            }
        };
        info!("Terminating {} ({:?})", role.label(), cause);
        if let Err(e) = killer.kill().await {
            warn!("Failed to kill {}: {}", role.label(), e);
        }
        true
    }

    /// Kill everything and release the current instance
    async fn teardown(&self, cause: TerminationCause) {
        let (instance, host_events, killers) = {
            let mut runtime = self.runtime.lock().await;
            let mut killers = Vec::new();
            for slot in [runtime.install.take(), runtime.dev_server.take()].into_iter().flatten() {
                let _ = slot.cause.send(cause);
                killers.push(slot.killer);
            }
            (runtime.instance.take(), runtime.host_events.take(), killers)
        };

        if let Some(handle) = host_events {
            handle.abort();
        }
        for killer in killers {
            if let Err(e) = killer.kill().await {
                warn!("Failed to kill process during teardown: {}", e);
            }
        }
        if let Some(instance) = instance {
            info!("Tearing down sandbox {}", instance.id());
            if let Err(e) = instance.teardown().await {
                warn!("Failed to tear down sandbox {}: {}", instance.id(), e);
            }
        }
    }

    fn spawn_output_pump(
        self: &Arc<Self>,
        epoch: u64,
        mut output: BoxStream<'static, String>,
        install: bool,
    ) -> JoinHandle<()> {
        let inner = self.clone();
        tokio::spawn(async move {
            while let Some(chunk) = output.next().await {
                if !inner.is_current(epoch) {
                    continue;
                }
                if inner.bridge.push_output(&chunk) > 0 && install {
                    inner.bridge.bump_install_progress();
                }
            }
        })
    }

    fn spawn_dev_watcher(
        self: &Arc<Self>,
        epoch: u64,
        id: u64,
        exit: BoxFuture<'static, i32>,
        cause_rx: oneshot::Receiver<TerminationCause>,
    ) {
        let inner = self.clone();
        tokio::spawn(async move {
            let code = exit.await;
            match inner.settle(Role::DevServer, id, cause_rx).await {
                TerminationCause::None if code != 0 => inner.fail(epoch, &Error::DevServerExited(code)),
                TerminationCause::None => {
                    if inner.is_current(epoch) {
                        inner.bridge.update(|s| {
                            s.preview_port = None;
                            s.preview_url = None;
                        });
                        inner.bridge.set_status(LifecycleStatus::Idle, "Dev server exited");
                    }
                }
                TerminationCause::Restart => info!("Dev server from launch #{} replaced (exit {})", epoch, code),
                TerminationCause::User => debug!("Dev server stopped by user (exit {})", code),
            }
        });
    }

    fn spawn_startup_timeout(self: &Arc<Self>, epoch: u64, id: u64, limit: Duration) {
        let inner = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(limit).await;
            let still_starting = {
                let runtime = inner.runtime.lock().await;
                runtime.dev_server.as_ref().is_some_and(|s| s.id == id)
            };
            if still_starting
                && inner.is_current(epoch)
                && inner.bridge.status() == LifecycleStatus::StartingDevServer
            {
                inner.fail(epoch, &Error::StartupTimeout(limit.as_secs()));
            }
        });
    }

    fn spawn_host_events(
        self: &Arc<Self>,
        epoch: u64,
        mut events: broadcast::Receiver<HostEvent>,
    ) -> JoinHandle<()> {
        let inner = self.clone();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(HostEvent::ServerReady { port, url }) => inner.on_server_ready(epoch, port, url),
                    Ok(HostEvent::Error { message }) => inner.fail(epoch, &Error::HostError(message)),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Missed {} sandbox events", skipped);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }

    fn on_server_ready(&self, epoch: u64, port: u16, url: String) {
        if !self.is_current(epoch) {
            return;
        }
        // Idle means the user stopped or cancelled
        let status = self.bridge.status();
        if status == LifecycleStatus::Idle {
            debug!("Ignoring server-ready on port {} while {}", port, status.as_str());
            return;
        }
        self.bridge.update(|s| {
            s.preview_port = Some(port);
            s.preview_url = Some(url.clone());
            s.install_progress = 100;
            s.error = None;
        });
        self.bridge
            .set_status(LifecycleStatus::Ready, format!("Dev server ready at {}", url));
    }
}
