//! Runtime seam and shared application state.

use crate::errors::{GridError, GridResult};
use crate::models::Container;
use crate::terminal::{SessionRegistry, TerminalConfig};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;

pub type ProcessReader = Box<dyn AsyncRead + Send + Unpin>;
pub type ProcessWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Parameters for creating an execution context inside a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecSpec {
    pub cmd: Vec<String>,
    /// `KEY=value` pairs
    pub env: Vec<String>,
    pub tty: bool,
}

/// Out-of-band operations on an attached process.
#[async_trait]
pub trait ProcessControl: Send + Sync {
    async fn resize(&self, cols: u16, rows: u16) -> GridResult<()>;
}

/// An attached process. Dropping it closes the connection to the process.
pub struct RemoteProcess {
    pub exec_id: String,
    pub output: ProcessReader,
    pub input: ProcessWriter,
    pub control: Arc<dyn ProcessControl>,
}

impl std::fmt::Debug for RemoteProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteProcess")
            .field("exec_id", &self.exec_id)
            .finish_non_exhaustive()
    }
}

/// The container runtime the dashboard drives.
#[async_trait]
pub trait ContainerRuntime: Send + Sync + 'static {
    /// Cheap reachability probe.
    async fn ping(&self) -> GridResult<()>;
    async fn list(&self) -> GridResult<Vec<Container>>;
    async fn start(&self, id: &str) -> GridResult<()>;
    async fn stop(&self, id: &str) -> GridResult<()>;
    async fn exists(&self, id: &str) -> GridResult<bool>;
    /// Create (but do not start) an execution context and return its ID.
    async fn create_exec(&self, container_id: &str, spec: &ExecSpec) -> GridResult<String>;
    /// Start a created execution context and attach to its TTY.
    async fn attach(&self, exec_id: &str) -> GridResult<RemoteProcess>;
}

#[derive(Clone)]
pub struct AppState {
    /// `None` when no runtime could be reached at startup.
    pub runtime: Option<Arc<dyn ContainerRuntime>>,
    pub sessions: Arc<SessionRegistry>,
    pub terminal: Arc<TerminalConfig>,
    /// Cancelled on server shutdown; every session watches a child of it.
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(runtime: Option<Arc<dyn ContainerRuntime>>, terminal: TerminalConfig) -> Self {
        Self {
            runtime,
            sessions: Arc::new(SessionRegistry::new()),
            terminal: Arc::new(terminal),
            shutdown: CancellationToken::new(),
        }
    }

    /// The runtime, or `Unavailable` when none was reachable at startup.
    pub fn runtime(&self) -> GridResult<Arc<dyn ContainerRuntime>> {
        self.runtime
            .clone()
            .ok_or_else(|| GridError::Unavailable("no container runtime".to_string()))
    }
}
