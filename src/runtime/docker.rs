//! Docker Engine API client over the daemon socket.
//!
//! Every request opens its own HTTP/1.1 connection. Exec sessions hijack that
//! connection with `Upgrade: tcp`; in TTY mode the stream carries raw terminal
//! bytes with no multiplexing header.

use super::filter::{is_system_container, ContainerFacts};
use crate::errors::{GridError, GridResult};
use crate::models::{Container, Port};
use crate::service::{ContainerRuntime, ExecSpec, ProcessControl, RemoteProcess};
use async_trait::async_trait;
use bytes::Bytes;
use http::header::{CONNECTION, CONTENT_TYPE, HOST, UPGRADE};
use http::{Method, Request, Response, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::client::conn::http1;
use hyper_util::rt::TokioIo;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpStream, UnixStream};
use tracing::{debug, info};

pub const DEFAULT_SOCKET: &str = "/var/run/docker.sock";
pub const PING_TIMEOUT: Duration = Duration::from_secs(2);

/// Where the daemon listens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DockerEndpoint {
    Unix(PathBuf),
    Tcp(String),
}

impl DockerEndpoint {
    /// Parse a `DOCKER_HOST` style value; empty means the default socket.
    pub fn parse(host: Option<&str>) -> GridResult<Self> {
        let host = host.map(str::trim).unwrap_or_default();
        if host.is_empty() {
            return Ok(Self::Unix(PathBuf::from(DEFAULT_SOCKET)));
        }
        if let Some(path) = host.strip_prefix("unix://") {
            if path.is_empty() {
                return Err(GridError::InvalidRequest(format!("empty socket path in {host}")));
            }
            return Ok(Self::Unix(PathBuf::from(path)));
        }
        if let Some(addr) = host
            .strip_prefix("tcp://")
            .or_else(|| host.strip_prefix("http://"))
        {
            let addr = addr.trim_end_matches('/');
            if addr.is_empty() {
                return Err(GridError::InvalidRequest(format!("empty address in {host}")));
            }
            return Ok(Self::Tcp(addr.to_string()));
        }
        Err(GridError::InvalidRequest(format!(
            "unsupported docker host {host}"
        )))
    }
}

impl fmt::Display for DockerEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DockerEndpoint::Unix(path) => write!(f, "unix://{}", path.display()),
            DockerEndpoint::Tcp(addr) => write!(f, "tcp://{addr}"),
        }
    }
}

trait Connection: AsyncRead + AsyncWrite + Send + Unpin + 'static {}
impl<T: AsyncRead + AsyncWrite + Send + Unpin + 'static> Connection for T {}

#[derive(Debug, Deserialize)]
struct DaemonError {
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ApiContainer {
    id: String,
    #[serde(default)]
    names: Option<Vec<String>>,
    #[serde(default)]
    image: String,
    #[serde(default)]
    state: String,
    #[serde(default)]
    labels: Option<BTreeMap<String, String>>,
    #[serde(default)]
    ports: Option<Vec<Port>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct ExecCreateBody<'a> {
    attach_stdin: bool,
    attach_stdout: bool,
    attach_stderr: bool,
    tty: bool,
    cmd: &'a [String],
    env: &'a [String],
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct IdResponse {
    id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct ExecStartBody {
    detach: bool,
    tty: bool,
}

/// Map the daemon's list output to dashboard containers, dropping our own.
fn into_containers(raw: Vec<ApiContainer>) -> Vec<Container> {
    raw.into_iter()
        .filter_map(|c| {
            let names = c.names.unwrap_or_default();
            let labels = c.labels.unwrap_or_default();
            let facts = ContainerFacts {
                names: &names,
                image: &c.image,
                labels: &labels,
            };
            if is_system_container(&facts) {
                return None;
            }
            let name = names
                .first()
                .map(|name| name.trim_start_matches('/').to_string())
                .unwrap_or_default();
            let ports = c
                .ports
                .unwrap_or_default()
                .into_iter()
                .map(|mut port| {
                    if port.protocol.is_empty() {
                        port.protocol = "tcp".to_string();
                    }
                    port
                })
                .collect();
            Some(Container {
                id: c.id,
                name,
                image: c.image,
                status: c.state,
                labels,
                ports,
            })
        })
        .collect()
}

fn daemon_message(body: &[u8]) -> String {
    match serde_json::from_slice::<DaemonError>(body) {
        Ok(err) => err.message,
        Err(_) => String::from_utf8_lossy(body).trim().to_string(),
    }
}

/// Reject identifiers that would escape their path segment.
fn path_segment(id: &str) -> GridResult<&str> {
    let valid = !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'));
    if valid {
        Ok(id)
    } else {
        Err(GridError::InvalidRequest(format!("invalid identifier {id:?}")))
    }
}

#[derive(Debug, Clone)]
pub struct DockerRuntime {
    endpoint: Arc<DockerEndpoint>,
}

impl DockerRuntime {
    pub fn new(endpoint: DockerEndpoint) -> Self {
        Self {
            endpoint: Arc::new(endpoint),
        }
    }

    /// Build a client and make sure the daemon answers within [`PING_TIMEOUT`].
    pub async fn connect(host: Option<&str>) -> GridResult<Self> {
        let runtime = Self::new(DockerEndpoint::parse(host)?);
        match tokio::time::timeout(PING_TIMEOUT, runtime.ping()).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(GridError::Unavailable(format!(
                    "{} did not answer within {:?}",
                    runtime.endpoint, PING_TIMEOUT
                )))
            }
        }
        info!(endpoint = %runtime.endpoint, "connected to docker");
        Ok(runtime)
    }

    async fn open(&self) -> GridResult<Box<dyn Connection>> {
        let stream: std::io::Result<Box<dyn Connection>> = match self.endpoint.as_ref() {
            DockerEndpoint::Unix(path) => UnixStream::connect(path)
                .await
                .map(|s| Box::new(s) as Box<dyn Connection>),
            DockerEndpoint::Tcp(addr) => TcpStream::connect(addr.as_str())
                .await
                .map(|s| Box::new(s) as Box<dyn Connection>),
        };
        stream.map_err(|err| GridError::Unavailable(format!("{}: {err}", self.endpoint)))
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<Vec<u8>>,
        upgrade: bool,
    ) -> GridResult<Response<Incoming>> {
        let io = TokioIo::new(self.open().await?);
        let (mut sender, connection) = http1::handshake::<_, Full<Bytes>>(io)
            .await
            .map_err(|err| GridError::Unavailable(format!("{}: {err}", self.endpoint)))?;
        tokio::spawn(async move {
            if let Err(err) = connection.with_upgrades().await {
                debug!(error = %err, "docker connection ended with error");
            }
        });

        let mut builder = Request::builder()
            .method(method)
            .uri(path)
            .header(HOST, "docker");
        if body.is_some() {
            builder = builder.header(CONTENT_TYPE, "application/json");
        }
        if upgrade {
            builder = builder.header(CONNECTION, "Upgrade").header(UPGRADE, "tcp");
        }
        let request = builder
            .body(Full::new(Bytes::from(body.unwrap_or_default())))
            .map_err(|err| GridError::Runtime(format!("building {path}: {err}")))?;

        debug!(path = %path, "docker request");
        sender
            .send_request(request)
            .await
            .map_err(|err| GridError::Runtime(format!("{path}: {err}")))
    }

    async fn send_json<T: Serialize>(
        &self,
        path: &str,
        body: &T,
        upgrade: bool,
    ) -> GridResult<Response<Incoming>> {
        let body = serde_json::to_vec(body)
            .map_err(|err| GridError::Runtime(format!("encoding {path}: {err}")))?;
        self.send(Method::POST, path, Some(body), upgrade).await
    }

    /// Read the whole body and turn non-success statuses into errors.
    async fn expect(
        response: Response<Incoming>,
        what: &str,
        also_ok: &[StatusCode],
    ) -> GridResult<Bytes> {
        let status = response.status();
        let body = response
            .into_body()
            .collect()
            .await
            .map_err(|err| GridError::Runtime(format!("{what}: {err}")))?
            .to_bytes();
        if status.is_success() || also_ok.contains(&status) {
            return Ok(body);
        }
        let message = daemon_message(&body);
        if status == StatusCode::NOT_FOUND {
            Err(GridError::NotFound(format!("{what}: {message}")))
        } else {
            Err(GridError::Runtime(format!("{what}: {status}: {message}")))
        }
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn ping(&self) -> GridResult<()> {
        let response = self.send(Method::GET, "/_ping", None, false).await?;
        Self::expect(response, "ping", &[]).await.map(|_| ())
    }

    async fn list(&self) -> GridResult<Vec<Container>> {
        let response = self
            .send(Method::GET, "/containers/json?all=true", None, false)
            .await?;
        let body = Self::expect(response, "list containers", &[]).await?;
        let raw: Vec<ApiContainer> = serde_json::from_slice(&body)
            .map_err(|err| GridError::Runtime(format!("decoding container list: {err}")))?;
        Ok(into_containers(raw))
    }

    async fn start(&self, id: &str) -> GridResult<()> {
        let path = format!("/containers/{}/start", path_segment(id)?);
        let response = self.send(Method::POST, &path, None, false).await?;
        Self::expect(response, &format!("container {id}"), &[StatusCode::NOT_MODIFIED]).await?;
        info!(container = %id, "container started");
        Ok(())
    }

    async fn stop(&self, id: &str) -> GridResult<()> {
        let path = format!("/containers/{}/stop", path_segment(id)?);
        let response = self.send(Method::POST, &path, None, false).await?;
        Self::expect(response, &format!("container {id}"), &[StatusCode::NOT_MODIFIED]).await?;
        info!(container = %id, "container stopped");
        Ok(())
    }

    async fn exists(&self, id: &str) -> GridResult<bool> {
        let path = format!("/containers/{}/json", path_segment(id)?);
        let response = self.send(Method::GET, &path, None, false).await?;
        match Self::expect(response, &format!("container {id}"), &[]).await {
            Ok(_) => Ok(true),
            Err(GridError::NotFound(_)) => Ok(false),
            Err(err) => Err(err),
        }
    }

    async fn create_exec(&self, container_id: &str, spec: &ExecSpec) -> GridResult<String> {
        let path = format!("/containers/{}/exec", path_segment(container_id)?);
        let body = ExecCreateBody {
            attach_stdin: true,
            attach_stdout: true,
            attach_stderr: true,
            tty: spec.tty,
            cmd: &spec.cmd,
            env: &spec.env,
        };
        let response = self.send_json(&path, &body, false).await?;
        let body = Self::expect(response, &format!("container {container_id}"), &[]).await?;
        let created: IdResponse = serde_json::from_slice(&body)
            .map_err(|err| GridError::Runtime(format!("decoding exec id: {err}")))?;
        Ok(created.id)
    }

    async fn attach(&self, exec_id: &str) -> GridResult<RemoteProcess> {
        let path = format!("/exec/{}/start", path_segment(exec_id)?);
        let body = ExecStartBody {
            detach: false,
            tty: true,
        };
        let response = self.send_json(&path, &body, true).await?;
        if response.status() != StatusCode::SWITCHING_PROTOCOLS {
            Self::expect(response, &format!("exec {exec_id}"), &[]).await?;
            return Err(GridError::Runtime(format!(
                "exec {exec_id}: daemon did not upgrade the connection"
            )));
        }

        let upgraded = hyper::upgrade::on(response)
            .await
            .map_err(|err| GridError::Runtime(format!("exec {exec_id}: {err}")))?;
        let (output, input) = tokio::io::split(TokioIo::new(upgraded));
        debug!(exec_id = %exec_id, "exec attached");

        Ok(RemoteProcess {
            exec_id: exec_id.to_string(),
            output: Box::new(output),
            input: Box::new(input),
            control: Arc::new(ExecControl {
                runtime: self.clone(),
                exec_id: exec_id.to_string(),
            }),
        })
    }
}

/// Resizes a running exec through the daemon.
struct ExecControl {
    runtime: DockerRuntime,
    exec_id: String,
}

#[async_trait]
impl ProcessControl for ExecControl {
    async fn resize(&self, cols: u16, rows: u16) -> GridResult<()> {
        let path = format!(
            "/exec/{}/resize?h={rows}&w={cols}",
            path_segment(&self.exec_id)?
        );
        let response = self.runtime.send(Method::POST, &path, None, false).await?;
        DockerRuntime::expect(response, &format!("exec {}", self.exec_id), &[])
            .await
            .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::UnixListener;

    #[test]
    fn parses_docker_hosts() {
        assert_eq!(
            DockerEndpoint::parse(None).unwrap(),
            DockerEndpoint::Unix(PathBuf::from(DEFAULT_SOCKET))
        );
        assert_eq!(
            DockerEndpoint::parse(Some("unix:///run/user/1000/docker.sock")).unwrap(),
            DockerEndpoint::Unix(PathBuf::from("/run/user/1000/docker.sock"))
        );
        assert_eq!(
            DockerEndpoint::parse(Some("tcp://10.0.0.5:2375")).unwrap(),
            DockerEndpoint::Tcp("10.0.0.5:2375".into())
        );
        assert!(DockerEndpoint::parse(Some("ssh://host")).is_err());
        assert!(DockerEndpoint::parse(Some("unix://")).is_err());
    }

    #[test]
    fn maps_list_output_and_drops_system_containers() {
        let raw: Vec<ApiContainer> = serde_json::from_str(
            r#"[
                {"Id":"a1","Names":["/web"],"Image":"nginx","State":"running",
                 "Labels":{"tier":"front"},
                 "Ports":[{"PrivatePort":80,"PublicPort":8081,"Type":""},{"PrivatePort":443}]},
                {"Id":"b2","Names":["/terminogrid-backend"],"Image":"x","State":"running","Labels":null,"Ports":null},
                {"Id":"c3","Names":null,"Image":"alpine","State":"exited"}
            ]"#,
        )
        .unwrap();

        let containers = into_containers(raw);
        assert_eq!(containers.len(), 2);
        assert_eq!(containers[0].name, "web");
        assert_eq!(containers[0].labels.get("tier").map(String::as_str), Some("front"));
        assert_eq!(containers[0].ports[0].public_port, 8081);
        assert_eq!(containers[0].ports[0].protocol, "tcp");
        assert_eq!(containers[0].ports[1].public_port, 0);
        assert_eq!(containers[1].id, "c3");
        assert_eq!(containers[1].name, "");
        assert!(containers[1].ports.is_empty());
    }

    #[test]
    fn daemon_message_prefers_json_message() {
        assert_eq!(
            daemon_message(br#"{"message":"No such container: x"}"#),
            "No such container: x"
        );
        assert_eq!(daemon_message(b"plain failure\n"), "plain failure");
    }

    #[test]
    fn identifiers_cannot_escape_path() {
        assert!(path_segment("abc_1.2-x").is_ok());
        assert!(path_segment("../etc").is_err());
        assert!(path_segment("a?b").is_err());
        assert!(path_segment("").is_err());
    }

    async fn read_request(stream: &mut UnixStream) -> String {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            let n = stream.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
            let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") else {
                continue;
            };
            let head = String::from_utf8_lossy(&buf[..end]).to_lowercase();
            let length = head
                .lines()
                .find_map(|line| {
                    line.strip_prefix("content-length:")
                        .map(|v| v.trim().parse::<usize>().unwrap())
                })
                .unwrap_or(0);
            while buf.len() < end + 4 + length {
                let n = stream.read(&mut chunk).await.unwrap();
                if n == 0 {
                    break;
                }
                buf.extend_from_slice(&chunk[..n]);
            }
            break;
        }
        String::from_utf8_lossy(&buf).to_string()
    }

    fn reply(status: &str, body: &str) -> Vec<u8> {
        format!(
            "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{body}",
            body.len()
        )
        .into_bytes()
    }

    /// A tiny daemon on a unix socket. Exec starts are upgraded and echoed.
    async fn fake_daemon() -> (tempfile::TempDir, DockerRuntime, Arc<Mutex<Vec<String>>>) {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("docker.sock");
        let listener = UnixListener::bind(&socket).unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&seen);

        tokio::spawn(async move {
            loop {
                let (mut stream, _) = listener.accept().await.unwrap();
                let log = Arc::clone(&log);
                tokio::spawn(async move {
                    let request = read_request(&mut stream).await;
                    let line = request.lines().next().unwrap_or_default().to_string();
                    log.lock().push(request.clone());

                    let response = if line.starts_with("GET /_ping") {
                        reply("200 OK", "OK")
                    } else if line.starts_with("GET /containers/json") {
                        reply(
                            "200 OK",
                            r#"[{"Id":"c1","Names":["/c1"],"Image":"ubuntu","State":"running"}]"#,
                        )
                    } else if line.starts_with("POST /containers/c1/start") {
                        reply("304 Not Modified", "")
                    } else if line.starts_with("POST /containers/gone/stop") {
                        reply("404 Not Found", r#"{"message":"No such container: gone"}"#)
                    } else if line.starts_with("GET /containers/c1/json") {
                        reply("200 OK", r#"{"Id":"c1"}"#)
                    } else if line.starts_with("GET /containers/") {
                        reply("404 Not Found", r#"{"message":"No such container"}"#)
                    } else if line.starts_with("POST /containers/c1/exec") {
                        reply("201 Created", r#"{"Id":"e1"}"#)
                    } else if line.starts_with("POST /exec/e1/resize") {
                        reply("201 Created", "")
                    } else if line.starts_with("POST /exec/e1/start") {
                        stream
                            .write_all(
                                b"HTTP/1.1 101 UPGRADED\r\nConnection: Upgrade\r\nUpgrade: tcp\r\n\r\n",
                            )
                            .await
                            .unwrap();
                        let mut chunk = [0u8; 256];
                        loop {
                            let n = match stream.read(&mut chunk).await {
                                Ok(0) | Err(_) => break,
                                Ok(n) => n,
                            };
                            if stream.write_all(&chunk[..n]).await.is_err() {
                                break;
                            }
                        }
                        return;
                    } else {
                        reply("500 Internal Server Error", r#"{"message":"unexpected"}"#)
                    };
                    let _ = stream.write_all(&response).await;
                    let _ = stream.shutdown().await;
                });
            }
        });

        let runtime = DockerRuntime::new(DockerEndpoint::Unix(socket));
        (dir, runtime, seen)
    }

    #[tokio::test]
    async fn talks_to_daemon_over_unix_socket() {
        let (_dir, runtime, seen) = fake_daemon().await;

        runtime.ping().await.unwrap();
        let containers = runtime.list().await.unwrap();
        assert_eq!(containers[0].name, "c1");

        runtime.start("c1").await.unwrap();
        let err = runtime.stop("gone").await.unwrap_err();
        match err {
            GridError::NotFound(message) => assert!(message.contains("No such container: gone")),
            other => panic!("unexpected error: {other:?}"),
        }

        assert!(runtime.exists("c1").await.unwrap());
        assert!(!runtime.exists("missing").await.unwrap());

        let requests = seen.lock();
        assert!(requests.iter().any(|r| r.starts_with("GET /containers/json?all=true")));
    }

    #[tokio::test]
    async fn exec_is_created_attached_and_resized() {
        let (_dir, runtime, seen) = fake_daemon().await;

        let spec = ExecSpec {
            cmd: vec!["/bin/sh".into(), "-i".into()],
            env: vec!["TERM=xterm-256color".into()],
            tty: true,
        };
        let exec_id = runtime.create_exec("c1", &spec).await.unwrap();
        assert_eq!(exec_id, "e1");
        {
            let requests = seen.lock();
            let create = requests
                .iter()
                .find(|r| r.starts_with("POST /containers/c1/exec"))
                .unwrap();
            assert!(create.contains(r#""Cmd":["/bin/sh","-i"]"#));
            assert!(create.contains(r#""Tty":true"#));
        }

        let mut process = runtime.attach(&exec_id).await.unwrap();
        process.input.write_all(b"echo hi\n").await.unwrap();
        process.input.flush().await.unwrap();
        let mut echoed = [0u8; 8];
        process.output.read_exact(&mut echoed).await.unwrap();
        assert_eq!(&echoed, b"echo hi\n");

        process.control.resize(120, 40).await.unwrap();
        assert!(seen
            .lock()
            .iter()
            .any(|r| r.starts_with("POST /exec/e1/resize?h=40&w=120")));
    }

    #[tokio::test]
    async fn unreachable_socket_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let host = format!("unix://{}", dir.path().join("absent.sock").display());
        let err = DockerRuntime::connect(Some(&host)).await.unwrap_err();
        assert!(matches!(err, GridError::Unavailable(_)));
    }
}
