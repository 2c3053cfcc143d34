//! Shell negotiation against a target container.

use crate::errors::{GridError, GridResult};
use crate::models::TerminalOptions;
use crate::service::{ContainerRuntime, ExecSpec};
use tracing::{debug, info};

const DEFAULT_SHELLS: &[&[&str]] = &[
    &["/bin/bash", "-li"],
    &["/usr/bin/bash", "-li"],
    &["/bin/sh", "-i"],
    &["/usr/bin/sh", "-i"],
];

/// Shells tried in order; the first one the runtime accepts wins.
pub fn default_shell_candidates() -> Vec<Vec<String>> {
    DEFAULT_SHELLS
        .iter()
        .map(|argv| argv.iter().map(|arg| arg.to_string()).collect())
        .collect()
}

/// Environment injected into every negotiated shell.
pub fn shell_env(options: &TerminalOptions) -> Vec<String> {
    let mut env = vec![
        format!("TERM={}", options.term),
        "COLORTERM=truecolor".to_string(),
    ];
    if options.force_color {
        env.push("CLICOLOR_FORCE=1".to_string());
        env.push("FORCE_COLOR=1".to_string());
    }
    env
}

/// A created, not yet attached, execution context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NegotiatedShell {
    pub exec_id: String,
    pub command: Vec<String>,
}

impl NegotiatedShell {
    pub fn display_command(&self) -> String {
        self.command.join(" ")
    }
}

pub struct ShellNegotiator<'a> {
    candidates: &'a [Vec<String>],
    env: Vec<String>,
}

impl<'a> ShellNegotiator<'a> {
    pub fn new(candidates: &'a [Vec<String>], options: &TerminalOptions) -> Self {
        Self {
            candidates,
            env: shell_env(options),
        }
    }

    pub async fn negotiate(
        &self,
        runtime: &dyn ContainerRuntime,
        target: &str,
    ) -> GridResult<NegotiatedShell> {
        if !runtime.exists(target).await? {
            return Err(GridError::NotFound(format!("container {target}")));
        }

        let mut last_error = None;
        for command in self.candidates {
            let spec = ExecSpec {
                cmd: command.clone(),
                env: self.env.clone(),
                tty: true,
            };
            match runtime.create_exec(target, &spec).await {
                Ok(exec_id) if !exec_id.is_empty() => {
                    info!(target = %target, exec_id = %exec_id, shell = ?command, "shell negotiated");
                    return Ok(NegotiatedShell {
                        exec_id,
                        command: command.clone(),
                    });
                }
                Ok(_) => {
                    debug!(target = %target, shell = ?command, "runtime returned empty exec id");
                    last_error = Some(GridError::Runtime("empty exec id".to_string()));
                }
                Err(err) => {
                    debug!(target = %target, shell = ?command, error = %err, "shell candidate rejected");
                    last_error = Some(err);
                }
            }
        }

        let source = last_error
            .unwrap_or_else(|| GridError::InvalidRequest("no shell candidates configured".into()));
        Err(GridError::NegotiationFailed {
            source: Box::new(source),
        })
    }
}
