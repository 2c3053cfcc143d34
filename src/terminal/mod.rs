//! Interactive terminal sessions bridged over a WebSocket.

pub mod bootstrap;
pub mod bridge;
pub mod client;
pub mod control;
pub mod registry;
pub mod session;
pub mod shell;

use std::time::Duration;

pub use bootstrap::{bootstrap_script, BootstrapInjector, DEFAULT_SETTLE_DELAY};
pub use client::{split_websocket, ClientFrame, ClientStream, ClientWriter};
pub use control::ControlMessage;
pub use registry::{SessionGuard, SessionPhase, SessionRegistry};
pub use session::{attach_and_bridge, serve_client, SetupHook};
pub use shell::{default_shell_candidates, NegotiatedShell, ShellNegotiator};

/// Per-server terminal settings shared by every session.
#[derive(Debug, Clone)]
pub struct TerminalConfig {
    pub shell_candidates: Vec<Vec<String>>,
    pub settle_delay: Duration,
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self {
            shell_candidates: default_shell_candidates(),
            settle_delay: DEFAULT_SETTLE_DELAY,
        }
    }
}
