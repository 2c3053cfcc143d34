//! One-time shell setup written into a freshly attached terminal.

use super::registry::SessionRegistry;
use super::session::SetupHook;
use crate::errors::GridResult;
use crate::models::TerminalOptions;
use crate::service::RemoteProcess;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::debug;

pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(100);

const PROMPT: &str = r"PS1='\[\e[38;2;52;226;226m\]\u\[\e[0m\]\[\e[38;2;85;87;83m\]@\[\e[0m\]\[\e[38;2;114;159;207m\]\h\[\e[0m\] \[\e[38;2;138;226;52m\]\w\[\e[0m\] \$ '";

/// Build the setup script for a session.
///
/// Alias setup is allowed to fail inside the shell (`|| true`); nothing here
/// depends on it.
pub fn bootstrap_script(options: &TerminalOptions) -> String {
    let mut lines = Vec::new();
    if options.force_color {
        lines.push(format!(
            "export TERM={} COLORTERM=truecolor CLICOLOR_FORCE=1 FORCE_COLOR=1;",
            options.term
        ));
        lines.push(
            "alias ls='ls --color=auto'; alias grep='grep --color=auto' 2>/dev/null || true;"
                .to_string(),
        );
    } else {
        lines.push(format!("export TERM={};", options.term));
    }
    lines.push("export LESS='-R';".to_string());
    if options.force_color {
        lines.push(
            r#"if [ -d /etc/apt/apt.conf.d ]; then printf 'APT::Color "1";\n' > /etc/apt/apt.conf.d/99tg-color; fi;"#
                .to_string(),
        );
    }
    if options.custom_prompt {
        lines.push(PROMPT.to_string());
    }

    let mut script = lines.join(" \\\n");
    script.push('\n');
    script
}

/// Sends the bootstrap script at most once per session.
pub struct BootstrapInjector {
    registry: Arc<SessionRegistry>,
    session_key: String,
    settle_delay: Duration,
    script: String,
}

impl BootstrapInjector {
    pub fn new(
        registry: Arc<SessionRegistry>,
        session_key: impl Into<String>,
        settle_delay: Duration,
        options: &TerminalOptions,
    ) -> Self {
        Self {
            registry,
            session_key: session_key.into(),
            settle_delay,
            script: bootstrap_script(options),
        }
    }
}

#[async_trait]
impl SetupHook for BootstrapInjector {
    async fn run(&self, process: &mut RemoteProcess) -> GridResult<()> {
        if !self.registry.try_consume_bootstrap(&self.session_key) {
            debug!(session = %self.session_key, "bootstrap already sent");
            return Ok(());
        }

        // Give the shell time to print its first prompt.
        tokio::time::sleep(self.settle_delay).await;

        let mut payload = Vec::with_capacity(self.script.len() + 1);
        payload.extend_from_slice(self.script.as_bytes());
        payload.push(b'\n');
        process.input.write_all(&payload).await?;
        process.input.flush().await?;

        debug!(session = %self.session_key, bytes = payload.len(), "bootstrap sent");
        Ok(())
    }
}
