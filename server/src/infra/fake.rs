//! In-memory sandbox host for orchestrator tests

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::{FutureExt, StreamExt};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::domain::file_tree::FileTree;
use crate::error::{Error, Result};
use crate::infra::host::{
    HostEvent, ProcessKiller, SandboxHost, SandboxInstance, SpawnOptions, SpawnedProcess,
    EVENT_CHANNEL_CAPACITY,
};

/// Exit code reported for a killed fake process
pub const KILLED_EXIT_CODE: i32 = 143;

/// How spawned processes behave
#[derive(Debug, Clone)]
pub struct FakeBehavior {
    pub fail_boot: bool,
    /// Chunks written by an install before it exits
    pub install_output: Vec<String>,
    /// Exit code of an install, or `None` to run until killed
    pub install_exit: Option<i32>,
    /// Emit `ServerReady` shortly after a process with `PORT` spawns
    pub ready_on_dev: bool,
}

impl Default for FakeBehavior {
    fn default() -> Self {
        Self {
            fail_boot: false,
            install_output: vec!["added 42 packages in 2s\n".to_string()],
            install_exit: Some(0),
            ready_on_dev: true,
        }
    }
}

#[derive(Default)]
pub struct FakeHost {
    behavior: Mutex<FakeBehavior>,
    instances: Mutex<Vec<Arc<FakeInstance>>>,
}

impl FakeHost {
    pub fn new(behavior: FakeBehavior) -> Self {
        Self {
            behavior: Mutex::new(behavior),
            instances: Mutex::new(Vec::new()),
        }
    }

    pub fn instances(&self) -> Vec<Arc<FakeInstance>> {
        self.instances.lock().unwrap().clone()
    }

    pub fn latest(&self) -> Option<Arc<FakeInstance>> {
        self.instances.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl SandboxHost for FakeHost {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn boot(&self) -> Result<Arc<dyn SandboxInstance>> {
        let behavior = self.behavior.lock().unwrap().clone();
        if behavior.fail_boot {
            return Err(Error::SandboxUnavailable("fake host refused to boot".to_string()));
        }
        let mut instances = self.instances.lock().unwrap();
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let instance = Arc::new(FakeInstance {
            id: format!("fake-{}", instances.len() + 1),
            behavior,
            events,
            mounted: Mutex::new(Vec::new()),
            processes: Mutex::new(Vec::new()),
            torn_down: AtomicBool::new(false),
        });
        instances.push(instance.clone());
        Ok(instance)
    }
}

pub struct FakeInstance {
    id: String,
    behavior: FakeBehavior,
    events: broadcast::Sender<HostEvent>,
    mounted: Mutex<Vec<FileTree>>,
    processes: Mutex<Vec<Arc<FakeProcess>>>,
    torn_down: AtomicBool,
}

impl FakeInstance {
    pub fn mounted(&self) -> Vec<FileTree> {
        self.mounted.lock().unwrap().clone()
    }

    pub fn processes(&self) -> Vec<Arc<FakeProcess>> {
        self.processes.lock().unwrap().clone()
    }

    pub fn install(&self) -> Option<Arc<FakeProcess>> {
        self.processes().into_iter().find(|p| !p.is_dev())
    }

    pub fn dev_server(&self) -> Option<Arc<FakeProcess>> {
        self.processes().into_iter().find(|p| p.is_dev())
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down.load(Ordering::SeqCst)
    }

    pub fn emit(&self, event: HostEvent) {
        let _ = self.events.send(event);
    }
}

#[async_trait]
impl SandboxInstance for FakeInstance {
    fn id(&self) -> &str {
        &self.id
    }

    async fn mount(&self, tree: &FileTree) -> Result<()> {
        self.mounted.lock().unwrap().push(tree.clone());
        Ok(())
    }

    async fn spawn(&self, command: &str, args: &[String], opts: SpawnOptions) -> Result<SpawnedProcess> {
        let (output_tx, output_rx) = mpsc::unbounded_channel();
        let (exit_tx, exit_rx) = oneshot::channel();
        let process = Arc::new(FakeProcess {
            command: command.to_string(),
            args: args.to_vec(),
            env: opts.env.clone(),
            killed: AtomicBool::new(false),
            output: Mutex::new(Some(output_tx)),
            exit: Mutex::new(Some(exit_tx)),
        });
        self.processes.lock().unwrap().push(process.clone());

        if let Some(port) = opts.port() {
            if self.behavior.ready_on_dev {
                let events = self.events.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    let _ = events.send(HostEvent::ServerReady {
                        port,
                        url: format!("http://localhost:{}", port),
                    });
                });
            }
        } else {
            for chunk in &self.behavior.install_output {
                process.write(chunk);
            }
            if let Some(code) = self.behavior.install_exit {
                process.exit(code);
            }
        }

        Ok(SpawnedProcess {
            output: UnboundedReceiverStream::new(output_rx).boxed(),
            exit: exit_rx.map(|r| r.unwrap_or(-1)).boxed(),
            killer: Arc::new(FakeKiller(process)),
        })
    }

    fn subscribe(&self) -> broadcast::Receiver<HostEvent> {
        self.events.subscribe()
    }

    async fn teardown(&self) -> Result<()> {
        self.torn_down.store(true, Ordering::SeqCst);
        for process in self.processes() {
            process.exit(KILLED_EXIT_CODE);
        }
        Ok(())
    }
}

/// Test-side control of a spawned fake process
pub struct FakeProcess {
    pub command: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    killed: AtomicBool,
    output: Mutex<Option<mpsc::UnboundedSender<String>>>,
    exit: Mutex<Option<oneshot::Sender<i32>>>,
}

impl FakeProcess {
    pub fn is_dev(&self) -> bool {
        self.env.contains_key("PORT")
    }

    pub fn was_killed(&self) -> bool {
        self.killed.load(Ordering::SeqCst)
    }

    pub fn has_exited(&self) -> bool {
        self.exit.lock().unwrap().is_none()
    }

    pub fn write(&self, chunk: &str) {
        if let Some(tx) = self.output.lock().unwrap().as_ref() {
            let _ = tx.send(chunk.to_string());
        }
    }

    /// Close output and resolve the exit future, once
    pub fn exit(&self, code: i32) {
        self.output.lock().unwrap().take();
        if let Some(tx) = self.exit.lock().unwrap().take() {
            let _ = tx.send(code);
        }
    }
}

struct FakeKiller(Arc<FakeProcess>);

#[async_trait]
impl ProcessKiller for FakeKiller {
    async fn kill(&self) -> Result<()> {
        self.0.killed.store(true, Ordering::SeqCst);
        self.0.exit(KILLED_EXIT_CODE);
        Ok(())
    }
}
