//! In-memory runtime for running the dashboard without a container daemon.

use crate::errors::{GridError, GridResult};
use crate::models::{Container, Port};
use crate::service::{ContainerRuntime, ExecSpec, ProcessControl, RemoteProcess};
use async_trait::async_trait;
use chrono::Local;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::sync::mpsc;
use tracing::debug;

pub const DEMO_BANNER: &str = "demo session connected, input is echoed\n";

/// Execs created but never attached are dropped after this long.
pub const PENDING_EXEC_TTL: Duration = Duration::from_secs(60);

const UBUNTU_SHELLS: &[&str] = &["/bin/bash", "/usr/bin/bash", "/bin/sh", "/usr/bin/sh"];
const ALPINE_SHELLS: &[&str] = &["/bin/sh"];

fn shells_for(image: &str) -> &'static [&'static str] {
    if image.starts_with("alpine") {
        ALPINE_SHELLS
    } else {
        UBUNTU_SHELLS
    }
}

fn demo_containers() -> Vec<Container> {
    let container = |id: &str, name: &str, image: &str, status: &str| Container {
        id: id.to_string(),
        name: name.to_string(),
        image: image.to_string(),
        status: status.to_string(),
        labels: BTreeMap::new(),
        ports: Vec::new(),
    };
    let mut u1 = container("demo-u1", "u1", "ubuntu:24.04", "running");
    u1.ports.push(Port {
        public_port: 10022,
        private_port: 22,
        protocol: "tcp".to_string(),
    });
    vec![
        u1,
        container("demo-u2", "u2", "ubuntu:24.04", "exited"),
        container("demo-alpine", "alpine", "alpine:3.20", "running"),
    ]
}

struct PendingExec {
    container_id: String,
    cmd: Vec<String>,
    created: Instant,
}

pub struct DemoRuntime {
    containers: Mutex<Vec<Container>>,
    execs: Mutex<HashMap<String, PendingExec>>,
    exec_sequence: AtomicU64,
    pending_ttl: Duration,
}

impl DemoRuntime {
    pub fn new() -> Self {
        Self::with_pending_ttl(PENDING_EXEC_TTL)
    }

    pub fn with_pending_ttl(pending_ttl: Duration) -> Self {
        Self {
            containers: Mutex::new(demo_containers()),
            execs: Mutex::new(HashMap::new()),
            exec_sequence: AtomicU64::new(1),
            pending_ttl,
        }
    }

    fn set_status(&self, id: &str, status: &str) -> GridResult<()> {
        let mut containers = self.containers.lock();
        let container = containers
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| GridError::NotFound(format!("container {id}")))?;
        container.status = status.to_string();
        debug!(container = %id, status = %status, "demo status changed");
        Ok(())
    }
}

impl Default for DemoRuntime {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContainerRuntime for DemoRuntime {
    async fn ping(&self) -> GridResult<()> {
        Ok(())
    }

    async fn list(&self) -> GridResult<Vec<Container>> {
        let mut containers = self.containers.lock().clone();
        containers.sort_by(|a, b| {
            b.is_running()
                .cmp(&a.is_running())
                .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
        });
        Ok(containers)
    }

    async fn start(&self, id: &str) -> GridResult<()> {
        self.set_status(id, "running")
    }

    async fn stop(&self, id: &str) -> GridResult<()> {
        self.set_status(id, "exited")
    }

    async fn exists(&self, id: &str) -> GridResult<bool> {
        Ok(self.containers.lock().iter().any(|c| c.id == id))
    }

    async fn create_exec(&self, container_id: &str, spec: &ExecSpec) -> GridResult<String> {
        let program = spec
            .cmd
            .first()
            .ok_or_else(|| GridError::InvalidRequest("empty command".into()))?;
        let image = {
            let containers = self.containers.lock();
            let container = containers
                .iter()
                .find(|c| c.id == container_id)
                .ok_or_else(|| GridError::NotFound(format!("container {container_id}")))?;
            if !container.is_running() {
                return Err(GridError::Runtime(format!(
                    "container {container_id} is not running"
                )));
            }
            container.image.clone()
        };
        if !shells_for(&image).contains(&program.as_str()) {
            return Err(GridError::Runtime(format!(
                "{program}: no such file or directory"
            )));
        }

        let exec_id = format!(
            "demo-exec-{}",
            self.exec_sequence.fetch_add(1, Ordering::Relaxed)
        );
        let mut execs = self.execs.lock();
        let before = execs.len();
        execs.retain(|_, pending| pending.created.elapsed() < self.pending_ttl);
        if execs.len() < before {
            debug!(dropped = before - execs.len(), "expired unattached demo execs");
        }
        execs.insert(
            exec_id.clone(),
            PendingExec {
                container_id: container_id.to_string(),
                cmd: spec.cmd.clone(),
                created: Instant::now(),
            },
        );
        Ok(exec_id)
    }

    async fn attach(&self, exec_id: &str) -> GridResult<RemoteProcess> {
        let pending = self
            .execs
            .lock()
            .remove(exec_id)
            .ok_or_else(|| GridError::NotFound(format!("exec {exec_id}")))?;
        debug!(exec_id = %exec_id, container = %pending.container_id, cmd = ?pending.cmd, "demo exec attached");

        let (local, remote) = tokio::io::duplex(16 * 1024);
        let (output, input) = tokio::io::split(local);
        let (resize_tx, resize_rx) = mpsc::unbounded_channel();
        tokio::spawn(echo_shell(remote, resize_rx));

        Ok(RemoteProcess {
            exec_id: exec_id.to_string(),
            output: Box::new(output),
            input: Box::new(input),
            control: Arc::new(EchoControl { resizes: resize_tx }),
        })
    }
}

struct EchoControl {
    resizes: mpsc::UnboundedSender<(u16, u16)>,
}

#[async_trait]
impl ProcessControl for EchoControl {
    async fn resize(&self, cols: u16, rows: u16) -> GridResult<()> {
        self.resizes
            .send((cols, rows))
            .map_err(|_| GridError::Runtime("demo shell has exited".into()))
    }
}

pub fn resize_note(cols: u16, rows: u16) -> String {
    format!("{} resize {cols}x{rows}\n", Local::now().format("%H:%M:%S"))
}

/// Greets, then echoes input back and reports resizes until the peer goes away.
async fn echo_shell(stream: DuplexStream, mut resizes: mpsc::UnboundedReceiver<(u16, u16)>) {
    let (mut reader, mut writer) = tokio::io::split(stream);
    if writer.write_all(DEMO_BANNER.as_bytes()).await.is_err() {
        return;
    }
    let mut buf = [0u8; 1024];
    loop {
        tokio::select! {
            read = reader.read(&mut buf) => {
                let n = match read {
                    Ok(0) | Err(_) => break,
                    Ok(n) => n,
                };
                if writer.write_all(&buf[..n]).await.is_err() {
                    break;
                }
            }
            Some((cols, rows)) = resizes.recv() => {
                if writer.write_all(resize_note(cols, rows).as_bytes()).await.is_err() {
                    break;
                }
            }
        }
    }
}
