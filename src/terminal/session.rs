//! One terminal session from upgrade to close.

use super::bootstrap::BootstrapInjector;
use super::bridge;
use super::client::{ClientStream, ClientWriter};
use super::registry::{SessionGuard, SessionPhase};
use super::shell::ShellNegotiator;
use super::TerminalConfig;
use crate::errors::{GridError, GridResult};
use crate::models::TerminalOptions;
use crate::service::{ContainerRuntime, RemoteProcess};
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Runs against a freshly attached process before any I/O is pumped.
#[async_trait]
pub trait SetupHook: Send + Sync {
    async fn run(&self, process: &mut RemoteProcess) -> GridResult<()>;
}

pub const EXEC_ERROR_PREFIX: &str = "[exec error]";
pub const SHELL_NOTICE_PREFIX: &str = "[shell]";

/// Negotiate a shell in `target`, attach, run the setup hook, then bridge until either
/// side closes or `cancel` fires.
///
/// The attached process is dropped on every return path.
#[allow(clippy::too_many_arguments)]
pub async fn attach_and_bridge(
    runtime: &dyn ContainerRuntime,
    session: &SessionGuard,
    config: &TerminalConfig,
    options: &TerminalOptions,
    target: &str,
    hook: Option<&dyn SetupHook>,
    client_tx: &ClientWriter,
    client_rx: ClientStream,
    cancel: CancellationToken,
) -> GridResult<()> {
    let setup = async {
        let negotiator = ShellNegotiator::new(&config.shell_candidates, options);
        let shell = negotiator.negotiate(runtime, target).await?;

        let mut process = runtime.attach(&shell.exec_id).await?;
        session.advance(SessionPhase::Attached);

        // Informational only; a client that cannot take it will fail in the bridge.
        let notice = format!("{} {}\n", SHELL_NOTICE_PREFIX, shell.display_command());
        if let Err(err) = client_tx.send_binary(notice.into_bytes()).await {
            debug!(session = %session.key(), error = %err, "failed to send shell notice");
        }

        if let Some(hook) = hook {
            hook.run(&mut process).await?;
        }
        Ok::<_, GridError>(process)
    };

    let process = tokio::select! {
        process = setup => process?,
        _ = cancel.cancelled() => return Err(GridError::Cancelled),
    };

    session.advance(SessionPhase::Bridging);
    bridge::run(process, client_tx.clone(), client_rx, cancel).await
}

/// Drive a whole client connection: registry entry, bootstrap, bridge, diagnostics.
#[allow(clippy::too_many_arguments)]
pub async fn serve_client(
    runtime: Arc<dyn ContainerRuntime>,
    sessions: Arc<super::SessionRegistry>,
    config: Arc<TerminalConfig>,
    options: TerminalOptions,
    target: String,
    client_tx: ClientWriter,
    client_rx: ClientStream,
    cancel: CancellationToken,
) {
    let session = sessions.create(&target);
    info!(session = %session.key(), target = %target, "terminal session opened");

    let injector = BootstrapInjector::new(
        Arc::clone(&sessions),
        session.key(),
        config.settle_delay,
        &options,
    );

    let result = attach_and_bridge(
        runtime.as_ref(),
        &session,
        &config,
        &options,
        &target,
        Some(&injector),
        &client_tx,
        client_rx,
        cancel,
    )
    .await;

    if let Err(err) = &result {
        if err.is_cancelled() {
            info!(session = %session.key(), "terminal session cancelled");
        } else {
            warn!(session = %session.key(), error = %err, "terminal session failed");
        }
        let line = format!("{EXEC_ERROR_PREFIX} {err}\n");
        if let Err(send_err) = client_tx.send_binary(line.into_bytes()).await {
            debug!(session = %session.key(), error = %send_err, "failed to send diagnostic");
        }
    }

    if let Err(err) = client_tx.close().await {
        debug!(session = %session.key(), error = %err, "client close failed");
    }
    info!(session = %session.key(), "terminal session closed");
}
