//! Shapes exchanged with the dashboard UI.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use utoipa::ToSchema;

pub const DEFAULT_TERM: &str = "xterm-256color";

/// A container as shown in the dashboard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Container {
    /// Runtime identifier
    pub id: String,
    /// Container name without the leading slash
    pub name: String,
    /// Image reference
    pub image: String,
    /// Runtime state (running, exited, ...)
    pub status: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<Port>,
}

impl Container {
    pub fn is_running(&self) -> bool {
        self.status == "running"
    }
}

/// Published port, serialized the way the Docker list endpoint names it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Port {
    #[serde(rename = "PublicPort", default, skip_serializing_if = "is_zero")]
    pub public_port: u16,
    #[serde(rename = "PrivatePort", default, skip_serializing_if = "is_zero")]
    pub private_port: u16,
    #[serde(rename = "Type", default, skip_serializing_if = "String::is_empty")]
    pub protocol: String,
}

fn is_zero(value: &u16) -> bool {
    *value == 0
}

/// Response of `GET /api/containers`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ContainerList {
    pub containers: Vec<Container>,
}

/// Response of `GET /api/health`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    /// `ok` or `unavailable`
    pub status: String,
    pub version: String,
}

/// Per-session terminal tuning, taken from the exec endpoint's query string.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TerminalOptions {
    #[serde(default = "default_term")]
    pub term: String,
    #[serde(default = "default_true")]
    pub force_color: bool,
    #[serde(default = "default_true")]
    pub custom_prompt: bool,
}

fn default_term() -> String {
    DEFAULT_TERM.to_string()
}

fn default_true() -> bool {
    true
}

impl Default for TerminalOptions {
    fn default() -> Self {
        Self {
            term: default_term(),
            force_color: true,
            custom_prompt: true,
        }
    }
}
