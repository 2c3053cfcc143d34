//! Container runtime implementations.

pub mod demo;
pub mod docker;
pub mod filter;

pub use demo::DemoRuntime;
pub use docker::{DockerEndpoint, DockerRuntime};

use crate::service::ContainerRuntime;
use std::sync::Arc;
use tracing::{info, warn};

/// Pick the runtime the server will use.
///
/// Returns `None` when the daemon cannot be reached; the API then answers 503.
pub async fn select(demo: bool, docker_host: Option<&str>) -> Option<Arc<dyn ContainerRuntime>> {
    if demo {
        info!("using in-memory demo runtime");
        return Some(Arc::new(DemoRuntime::new()));
    }
    match DockerRuntime::connect(docker_host).await {
        Ok(runtime) => Some(Arc::new(runtime)),
        Err(err) => {
            warn!(error = %err, "docker unavailable, container endpoints will return 503");
            None
        }
    }
}
