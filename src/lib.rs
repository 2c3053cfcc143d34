pub mod api;
pub mod errors;
pub mod models;
pub mod runtime;
pub mod service;
pub mod terminal;

pub use api::build_router;
pub use errors::{GridError, GridResult};
pub use service::{AppState, ContainerRuntime};
