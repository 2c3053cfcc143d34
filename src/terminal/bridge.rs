//! Bidirectional pump between a browser terminal and an attached process.
//!
//! Two tasks run for the life of the bridge: remote output to client, and
//! client input to remote. The bridge returns when either finishes or the
//! cancellation token fires. The pump tasks are aborted on every exit path,
//! which drops both halves of the process connection.

use super::client::{ClientFrame, ClientStream, ClientWriter};
use super::control::ControlMessage;
use crate::errors::{GridError, GridResult};
use crate::service::{ProcessControl, ProcessReader, ProcessWriter, RemoteProcess};
use bytes::Bytes;
use futures::StreamExt;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub const REMOTE_READ_BUFFER_SIZE: usize = 4096;

/// Which side ended the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeExit {
    Remote,
    Client,
    Cancelled,
}

/// Aborts the wrapped task when dropped.
struct PumpTask(JoinHandle<GridResult<()>>);

impl Drop for PumpTask {
    fn drop(&mut self) {
        self.0.abort();
    }
}

pub async fn run(
    process: RemoteProcess,
    client_tx: ClientWriter,
    client_rx: ClientStream,
    cancel: CancellationToken,
) -> GridResult<()> {
    run_with_exit(process, client_tx, client_rx, cancel)
        .await
        .1
}

/// Like [`run`], also reporting which side finished first.
pub async fn run_with_exit(
    process: RemoteProcess,
    client_tx: ClientWriter,
    client_rx: ClientStream,
    cancel: CancellationToken,
) -> (BridgeExit, GridResult<()>) {
    let RemoteProcess {
        exec_id,
        output,
        input,
        control,
    } = process;

    let mut remote_to_client = PumpTask(tokio::spawn(pump_remote_to_client(output, client_tx)));
    let mut client_to_remote = PumpTask(tokio::spawn(pump_client_to_remote(
        client_rx, input, control,
    )));

    let (exit, result) = tokio::select! {
        joined = &mut remote_to_client.0 => (BridgeExit::Remote, flatten(joined)),
        joined = &mut client_to_remote.0 => {
            // Close the process side so the output pump stops reading.
            remote_to_client.0.abort();
            let _ = (&mut remote_to_client.0).await;
            (BridgeExit::Client, flatten(joined))
        }
        _ = cancel.cancelled() => (BridgeExit::Cancelled, Err(GridError::Cancelled)),
    };

    match &result {
        Ok(()) => debug!(exec_id = %exec_id, exit = ?exit, "bridge closed"),
        Err(err) if err.is_cancelled() => debug!(exec_id = %exec_id, "bridge cancelled"),
        Err(err) => warn!(exec_id = %exec_id, exit = ?exit, error = %err, "bridge failed"),
    }
    (exit, result)
}

fn flatten(joined: Result<GridResult<()>, JoinError>) -> GridResult<()> {
    match joined {
        Ok(result) => result,
        Err(err) => Err(GridError::Runtime(format!("pump task failed: {err}"))),
    }
}

async fn pump_remote_to_client(mut output: ProcessReader, client_tx: ClientWriter) -> GridResult<()> {
    let mut buf = vec![0u8; REMOTE_READ_BUFFER_SIZE];
    loop {
        let n = output.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        client_tx.send_binary(Bytes::copy_from_slice(&buf[..n])).await?;
    }
}

async fn pump_client_to_remote(
    mut client_rx: ClientStream,
    mut input: ProcessWriter,
    control: Arc<dyn ProcessControl>,
) -> GridResult<()> {
    while let Some(frame) = client_rx.next().await {
        let payload = match frame? {
            ClientFrame::Text(text) => match ControlMessage::parse(&text) {
                Some(ControlMessage::Resize { cols, rows }) => {
                    apply_resize(control.as_ref(), cols, rows).await;
                    continue;
                }
                None => Bytes::from(text),
            },
            ClientFrame::Binary(data) => data,
        };
        input.write_all(&payload).await?;
        input.flush().await?;
    }
    Ok(())
}

/// Best-effort: a failed resize never ends the session.
async fn apply_resize(control: &dyn ProcessControl, cols: u16, rows: u16) {
    if cols == 0 || rows == 0 {
        debug!(cols, rows, "ignoring empty resize");
        return;
    }
    if let Err(err) = control.resize(cols, rows).await {
        debug!(cols, rows, error = %err, "resize failed");
    }
}
