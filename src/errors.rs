use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;
use utoipa::ToSchema;

#[derive(Debug, Error)]
pub enum GridError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("container runtime unavailable: {0}")]
    Unavailable(String),
    #[error("no shell candidate accepted: {source}")]
    NegotiationFailed {
        #[source]
        source: Box<GridError>,
    },
    #[error("stream error: {0}")]
    Stream(#[from] std::io::Error),
    #[error("session cancelled")]
    Cancelled,
    #[error("runtime error: {0}")]
    Runtime(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

pub type GridResult<T> = Result<T, GridError>;

impl GridError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            GridError::NotFound(_) => StatusCode::NOT_FOUND,
            GridError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            GridError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            GridError::NegotiationFailed { .. }
            | GridError::Stream(_)
            | GridError::Cancelled
            | GridError::Runtime(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// True when the session ended because the server asked it to, not because something broke.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, GridError::Cancelled)
    }
}

/// Error response body.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    /// Human-readable error message
    pub error: String,
}

impl IntoResponse for GridError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorBody {
            error: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}
