use crate::errors::{ErrorBody, GridError, GridResult};
use crate::models::{Container, ContainerList, HealthResponse, Port, TerminalOptions};
use crate::service::AppState;
use crate::terminal::{serve_client, split_websocket};
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, Query, State};
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE, LOCATION};
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};
use utoipa::OpenApi as UtoipaOpenApi;

#[derive(UtoipaOpenApi)]
#[openapi(
    paths(
        list_containers,
        start_container,
        stop_container,
        exec_container,
        health
    ),
    components(schemas(Container, ContainerList, Port, HealthResponse, ErrorBody)),
    tags((name = "containers", description = "List, start, stop and open terminals into containers"))
)]
pub struct ApiDoc;

/// Build the HTTP surface. Static files are served under `/ui/` when `ui_dir` is set.
pub fn build_router(state: AppState, ui_dir: Option<PathBuf>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE, AUTHORIZATION]);

    let mut router = Router::new()
        .route("/", get(root_redirect))
        .route("/api/health", get(health))
        .route("/api/openapi.json", get(openapi_json))
        .route("/api/containers", get(list_containers))
        .route("/api/containers/{id}/start", post(start_container))
        .route("/api/containers/{id}/stop", post(stop_container))
        .route("/api/containers/{id}/exec", get(exec_container));

    if let Some(dir) = ui_dir {
        debug!(dir = %dir.display(), "serving ui");
        router = router.nest_service("/ui", ServeDir::new(dir));
    }

    router
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn root_redirect() -> Response {
    (StatusCode::FOUND, [(LOCATION, "/ui/")]).into_response()
}

async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

#[utoipa::path(
    get,
    path = "/api/health",
    responses(
        (status = 200, description = "Runtime reachable", body = HealthResponse),
        (status = 503, description = "No container runtime", body = HealthResponse)
    )
)]
async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let reachable = match &state.runtime {
        Some(runtime) => runtime.ping().await.is_ok(),
        None => false,
    };
    let (status, label) = if reachable {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "unavailable")
    };
    (
        status,
        Json(HealthResponse {
            status: label.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }),
    )
}

#[utoipa::path(
    get,
    path = "/api/containers",
    tag = "containers",
    responses(
        (status = 200, description = "Containers on this host", body = ContainerList),
        (status = 503, description = "No container runtime", body = ErrorBody)
    )
)]
async fn list_containers(State(state): State<AppState>) -> GridResult<Json<ContainerList>> {
    let containers = state.runtime()?.list().await?;
    Ok(Json(ContainerList { containers }))
}

#[utoipa::path(
    post,
    path = "/api/containers/{id}/start",
    tag = "containers",
    params(("id" = String, Path, description = "Container identifier")),
    responses(
        (status = 204, description = "Container started"),
        (status = 404, description = "Container not found", body = ErrorBody),
        (status = 503, description = "No container runtime", body = ErrorBody)
    )
)]
async fn start_container(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> GridResult<StatusCode> {
    state.runtime()?.start(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    post,
    path = "/api/containers/{id}/stop",
    tag = "containers",
    params(("id" = String, Path, description = "Container identifier")),
    responses(
        (status = 204, description = "Container stopped"),
        (status = 404, description = "Container not found", body = ErrorBody),
        (status = 503, description = "No container runtime", body = ErrorBody)
    )
)]
async fn stop_container(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> GridResult<StatusCode> {
    state.runtime()?.stop(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Open a terminal into a container over a WebSocket.
///
/// Runtime and target checks happen before the upgrade so they surface as
/// plain HTTP errors; everything after the upgrade is reported in-band.
#[utoipa::path(
    get,
    path = "/api/containers/{id}/exec",
    tag = "containers",
    params(
        ("id" = String, Path, description = "Container identifier"),
        ("term" = Option<String>, Query, description = "TERM for the shell, default xterm-256color"),
        ("force_color" = Option<bool>, Query, description = "Force colored output, default true"),
        ("custom_prompt" = Option<bool>, Query, description = "Install the dashboard prompt, default true")
    ),
    responses(
        (status = 101, description = "Switching to the terminal WebSocket"),
        (status = 404, description = "Container not found", body = ErrorBody),
        (status = 503, description = "No container runtime", body = ErrorBody)
    )
)]
async fn exec_container(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(options): Query<TerminalOptions>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> GridResult<Response> {
    let runtime = state.runtime()?;
    if !runtime.exists(&id).await? {
        return Err(GridError::NotFound(format!("container {id}")));
    }
    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return Ok(rejection.into_response()),
    };

    info!(container = %id, term = %options.term, "upgrading terminal connection");
    let sessions = Arc::clone(&state.sessions);
    let terminal = Arc::clone(&state.terminal);
    let cancel = state.shutdown.child_token();
    Ok(ws.on_upgrade(move |socket| async move {
        let (client_tx, client_rx) = split_websocket(socket);
        serve_client(
            runtime, sessions, terminal, options, id, client_tx, client_rx, cancel,
        )
        .await;
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::GridResult;
    use crate::service::{ContainerRuntime, ExecSpec, RemoteProcess};
    use crate::terminal::TerminalConfig;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use parking_lot::Mutex;
    use std::collections::BTreeMap;
    use tower::ServiceExt;

    #[derive(Default)]
    struct MockRuntime {
        started: Mutex<Vec<String>>,
    }

    fn container(id: &str) -> Container {
        Container {
            id: id.to_string(),
            name: id.to_string(),
            image: "ubuntu:24.04".to_string(),
            status: "running".to_string(),
            labels: BTreeMap::new(),
            ports: Vec::new(),
        }
    }

    #[async_trait]
    impl ContainerRuntime for MockRuntime {
        async fn ping(&self) -> GridResult<()> {
            Ok(())
        }
        async fn list(&self) -> GridResult<Vec<Container>> {
            Ok(vec![container("c1")])
        }
        async fn start(&self, id: &str) -> GridResult<()> {
            if id == "c1" {
                self.started.lock().push(id.to_string());
                Ok(())
            } else {
                Err(GridError::NotFound(format!("container {id}")))
            }
        }
        async fn stop(&self, id: &str) -> GridResult<()> {
            self.start(id).await
        }
        async fn exists(&self, id: &str) -> GridResult<bool> {
            Ok(id == "c1")
        }
        async fn create_exec(&self, _container_id: &str, _spec: &ExecSpec) -> GridResult<String> {
            Err(GridError::Runtime("not used".into()))
        }
        async fn attach(&self, _exec_id: &str) -> GridResult<RemoteProcess> {
            Err(GridError::Runtime("not used".into()))
        }
    }

    fn router_with(runtime: Option<Arc<dyn ContainerRuntime>>, ui_dir: Option<PathBuf>) -> Router {
        build_router(AppState::new(runtime, TerminalConfig::default()), ui_dir)
    }

    fn make_test_router() -> Router {
        router_with(Some(Arc::new(MockRuntime::default())), None)
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn post_request(uri: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    async fn json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn lists_containers() {
        let response = make_test_router()
            .oneshot(get_request("/api/containers"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json(response).await;
        assert_eq!(body["containers"][0]["id"], "c1");
        assert!(body["containers"][0].get("labels").is_none());
    }

    #[tokio::test]
    async fn start_and_stop_map_status_codes() {
        let app = make_test_router();
        let response = app
            .clone()
            .oneshot(post_request("/api/containers/c1/start"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = app.oneshot(post_request("/api/containers/nope/stop")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = json(response).await;
        assert!(body["error"].as_str().unwrap().contains("nope"));
    }

    #[tokio::test]
    async fn every_container_route_is_unavailable_without_runtime() {
        let app = router_with(None, None);
        for request in [
            get_request("/api/containers"),
            post_request("/api/containers/c1/start"),
            post_request("/api/containers/c1/stop"),
            get_request("/api/containers/c1/exec"),
        ] {
            let response = app.clone().oneshot(request).await.unwrap();
            assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        }
    }

    #[tokio::test]
    async fn health_reflects_runtime() {
        let response = make_test_router().oneshot(get_request("/api/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json(response).await["status"], "ok");

        let response = router_with(None, None)
            .oneshot(get_request("/api/health"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(json(response).await["status"], "unavailable");
    }

    #[tokio::test]
    async fn exec_checks_target_before_upgrade() {
        let app = make_test_router();
        let response = app
            .clone()
            .oneshot(get_request("/api/containers/missing/exec"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        // Existing target but not a WebSocket request.
        let response = app.oneshot(get_request("/api/containers/c1/exec")).await.unwrap();
        assert!(response.status().is_client_error());
        assert_ne!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn root_redirects_to_ui() {
        let response = make_test_router().oneshot(get_request("/")).await.unwrap();
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(response.headers()[LOCATION], "/ui/");
    }

    #[tokio::test]
    async fn serves_static_ui() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("index.html"), "<h1>grid</h1>").unwrap();
        std::fs::write(dir.path().join("app.js"), "console.log('grid')").unwrap();
        let app = router_with(None, Some(dir.path().to_path_buf()));

        let response = app.clone().oneshot(get_request("/ui/")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"<h1>grid</h1>");

        let response = app.oneshot(get_request("/ui/app.js")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn serves_openapi_document() {
        let response = make_test_router()
            .oneshot(get_request("/api/openapi.json"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let doc = json(response).await;
        assert!(doc["paths"].get("/api/containers").is_some());
        assert!(doc["paths"].get("/api/containers/{id}/exec").is_some());
    }

    #[tokio::test]
    async fn cors_preflight_allows_any_origin() {
        let request = Request::builder()
            .method("OPTIONS")
            .uri("/api/containers")
            .header("origin", "http://dashboard.local")
            .header("access-control-request-method", "POST")
            .body(Body::empty())
            .unwrap();
        let response = make_test_router().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["access-control-allow-origin"], "*");
    }
}
