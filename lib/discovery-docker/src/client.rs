//! Minimal Docker Engine API client over HTTP/1.1
//!
//! Each request opens its own connection to the daemon, either through the
//! local Unix socket or a plain TCP endpoint.

use discovery_core::RuntimeError;
use http_body_util::{BodyExt, Empty};
use hyper::body::{Bytes, Incoming};
use hyper::client::conn::http1::{self, SendRequest};
use hyper::{header, Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::path::PathBuf;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpStream, UnixStream};
use tracing::debug;

pub const DEFAULT_DOCKER_HOST: &str = "unix:///var/run/docker.sock";

/// Where the Docker daemon listens
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DockerHost {
    Unix(PathBuf),
    Tcp(String),
}

impl DockerHost {
    /// Parse a `DOCKER_HOST` value (`unix:///path` or `tcp://host:port`)
    pub fn parse(value: &str) -> Result<Self, RuntimeError> {
        if let Some(path) = value.strip_prefix("unix://") {
            if path.is_empty() {
                return Err(RuntimeError::UnsupportedHost(value.to_string()));
            }
            return Ok(DockerHost::Unix(PathBuf::from(path)));
        }

        let authority = value
            .strip_prefix("tcp://")
            .or_else(|| value.strip_prefix("http://"))
            .map(|rest| rest.trim_end_matches('/'))
            .filter(|rest| !rest.is_empty())
            .ok_or_else(|| RuntimeError::UnsupportedHost(value.to_string()))?;
        Ok(DockerHost::Tcp(authority.to_string()))
    }
}

/// Error body returned by the Engine API
#[derive(Debug, Deserialize)]
struct ApiMessage {
    message: String,
}

#[derive(Clone, Debug)]
pub struct DockerClient {
    host: DockerHost,
    api_version: Option<String>,
}

impl DockerClient {
    pub fn new(host: DockerHost, api_version: Option<String>) -> Self {
        let api_version = api_version
            .map(|v| v.trim().trim_start_matches('v').to_string())
            .filter(|v| !v.is_empty());
        Self { host, api_version }
    }

    /// Build a client from `DOCKER_HOST` and `DOCKER_API_VERSION`
    pub fn from_env() -> Result<Self, RuntimeError> {
        let host = std::env::var("DOCKER_HOST")
            .ok()
            .filter(|h| !h.is_empty())
            .unwrap_or_else(|| DEFAULT_DOCKER_HOST.to_string());
        let client = Self::new(
            DockerHost::parse(&host)?,
            std::env::var("DOCKER_API_VERSION").ok(),
        );
        debug!(host = %host, api_version = ?client.api_version, "Docker client configured");
        Ok(client)
    }

    /// Request path for an API endpoint, with the version prefix if pinned
    pub fn path(&self, endpoint: &str) -> String {
        match &self.api_version {
            Some(version) => format!("/v{}{}", version, endpoint),
            None => endpoint.to_string(),
        }
    }

    /// GET `path` and decode a JSON response body
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, RuntimeError> {
        let response = self.get(path).await?;
        let status = response.status();
        let body = response
            .into_body()
            .collect()
            .await
            .map_err(|e| RuntimeError::Transport(e.to_string()))?
            .to_bytes();

        if !status.is_success() {
            return Err(api_error(status, &body));
        }

        serde_json::from_slice(&body).map_err(|e| RuntimeError::Decode(e.to_string()))
    }

    /// GET `path` and hand back the streaming body of a successful response
    pub async fn get_stream(&self, path: &str) -> Result<Incoming, RuntimeError> {
        let response = self.get(path).await?;
        let status = response.status();
        if !status.is_success() {
            let body = response
                .into_body()
                .collect()
                .await
                .map_err(|e| RuntimeError::Transport(e.to_string()))?
                .to_bytes();
            return Err(api_error(status, &body));
        }
        Ok(response.into_body())
    }

    async fn get(&self, path: &str) -> Result<Response<Incoming>, RuntimeError> {
        let mut sender = self.handshake().await?;

        let request = Request::builder()
            .method(Method::GET)
            .uri(path)
            .header(header::HOST, "docker")
            .body(Empty::<Bytes>::new())
            .map_err(|e| RuntimeError::Transport(e.to_string()))?;

        debug!("Docker request: GET {}", path);
        sender
            .send_request(request)
            .await
            .map_err(|e| RuntimeError::Transport(e.to_string()))
    }

    async fn handshake(&self) -> Result<SendRequest<Empty<Bytes>>, RuntimeError> {
        match &self.host {
            DockerHost::Unix(path) => {
                let stream = UnixStream::connect(path).await.map_err(|e| {
                    RuntimeError::Transport(format!("{}: {}", path.display(), e))
                })?;
                spawn_connection(stream).await
            }
            DockerHost::Tcp(addr) => {
                let stream = TcpStream::connect(addr)
                    .await
                    .map_err(|e| RuntimeError::Transport(format!("{}: {}", addr, e)))?;
                spawn_connection(stream).await
            }
        }
    }
}

/// Run the HTTP/1.1 handshake and drive the connection on its own task
async fn spawn_connection<S>(stream: S) -> Result<SendRequest<Empty<Bytes>>, RuntimeError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (sender, connection) = http1::handshake(TokioIo::new(stream))
        .await
        .map_err(|e| RuntimeError::Transport(e.to_string()))?;

    tokio::spawn(async move {
        if let Err(e) = connection.await {
            debug!("Docker connection closed: {}", e);
        }
    });

    Ok(sender)
}

fn api_error(status: StatusCode, body: &[u8]) -> RuntimeError {
    let message = serde_json::from_slice::<ApiMessage>(body)
        .map(|m| m.message)
        .unwrap_or_else(|_| String::from_utf8_lossy(body).trim().to_string());
    RuntimeError::Api {
        status: status.as_u16(),
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_unix_host() {
        assert_eq!(
            DockerHost::parse(DEFAULT_DOCKER_HOST).unwrap(),
            DockerHost::Unix(PathBuf::from("/var/run/docker.sock"))
        );
    }

    #[test]
    fn test_parse_tcp_host() {
        assert_eq!(
            DockerHost::parse("tcp://127.0.0.1:2375").unwrap(),
            DockerHost::Tcp("127.0.0.1:2375".to_string())
        );
        assert_eq!(
            DockerHost::parse("http://docker:2375/").unwrap(),
            DockerHost::Tcp("docker:2375".to_string())
        );
    }

    #[test]
    fn test_parse_unsupported_host() {
        assert!(matches!(
            DockerHost::parse("npipe:////./pipe/docker_engine"),
            Err(RuntimeError::UnsupportedHost(_))
        ));
        assert!(matches!(
            DockerHost::parse("unix://"),
            Err(RuntimeError::UnsupportedHost(_))
        ));
    }

    #[test]
    fn test_versioned_path() {
        let host = DockerHost::Unix(PathBuf::from("/var/run/docker.sock"));
        let pinned = DockerClient::new(host.clone(), Some("v1.43".to_string()));
        assert_eq!(pinned.path("/events"), "/v1.43/events");

        let unpinned = DockerClient::new(host, None);
        assert_eq!(unpinned.path("/events"), "/events");
    }

    #[test]
    fn test_api_error_message() {
        let err = api_error(
            StatusCode::NOT_FOUND,
            br#"{"message":"No such container: abc"}"#,
        );
        assert_eq!(
            err,
            RuntimeError::Api {
                status: 404,
                message: "No such container: abc".to_string(),
            }
        );

        let err = api_error(StatusCode::INTERNAL_SERVER_ERROR, b"boom\n");
        assert_eq!(
            err,
            RuntimeError::Api {
                status: 500,
                message: "boom".to_string(),
            }
        );
    }
}
