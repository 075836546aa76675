//! API wrapper around the gateway CLI
//!
//! Serves a route listing, a health endpoint and `/api/run-cli`, which runs the
//! CLI once and reports its outcome as JSON. Unknown paths get a JSON 404; the
//! static frontend is served elsewhere.

use crate::cli::{run_cli, CliCommand, CliFailureKind, CliOutcome, ALREADY_RUNNING_MESSAGE};
use crate::config::ApiConfig;
use crate::error::{json_error_response, ErrorResponse, FrontDoorError};
use crate::proxy::{full_body, ProxyBody};
use http_body_util::{BodyExt, LengthLimitError, Limited};
use hyper::body::{Body, Incoming};
use hyper::header::{CONTENT_LENGTH, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::Serialize;
use serde_json::json;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tracing::{debug, error, info};

/// Status string reported by `/api/health`
pub const HEALTH_STATUS: &str = "EDON Claw Gateway is alive!";

/// Largest request body `/api/run-cli` accepts
pub const MAX_BODY_BYTES: usize = 100 * 1024;

/// Why a request body was refused
#[derive(Debug, thiserror::Error)]
pub enum BodyError {
    #[error("request body exceeds {} bytes", MAX_BODY_BYTES)]
    TooLarge,
    #[error("invalid JSON body: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("failed to read request body: {0}")]
    Read(String),
}

impl BodyError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            BodyError::TooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            BodyError::InvalidJson(_) | BodyError::Read(_) => StatusCode::BAD_REQUEST,
        }
    }

    fn response(&self) -> Response<ProxyBody> {
        let error = match self {
            BodyError::TooLarge => "Request body too large",
            BodyError::InvalidJson(_) => "Invalid JSON body",
            BodyError::Read(_) => "Failed to read request body",
        };
        json_error_response(
            self.status_code(),
            ErrorResponse::new(error).with_details(self.to_string()),
        )
    }
}

/// One entry of `/api/routes`
#[derive(Debug, Clone, Serialize)]
pub struct RouteInfo {
    pub path: &'static str,
    pub method: &'static str,
    pub description: &'static str,
}

/// Everything the API answers
pub const ROUTES: &[RouteInfo] = &[
    RouteInfo {
        path: "/api/health",
        method: "GET",
        description: "Health check; returns status and token_set",
    },
    RouteInfo {
        path: "/api/run-cli",
        method: "GET",
        description: "Run OpenClaw gateway CLI (gateway --allow-unconfigured); returns output or error",
    },
    RouteInfo {
        path: "/api/run-cli",
        method: "POST",
        description: "Same as GET; accepts optional JSON body",
    },
    RouteInfo {
        path: "/api/routes",
        method: "GET",
        description: "List API routes",
    },
];

struct ApiState {
    cli: CliCommand,
    token_set: bool,
}

/// HTTP server for the API wrapper
pub struct ApiServer {
    bind_addr: SocketAddr,
    state: Arc<ApiState>,
}

impl ApiServer {
    pub fn new(bind_addr: SocketAddr, cli: CliCommand, token_set: bool) -> Self {
        Self {
            bind_addr,
            state: Arc::new(ApiState { cli, token_set }),
        }
    }

    pub fn from_config(config: &ApiConfig) -> Result<Self, FrontDoorError> {
        let bind_addr = config
            .listen_addr()
            .map_err(|e| FrontDoorError::Config(e.to_string()))?;
        let cli = CliCommand::new(config.cli_command.clone(), config.cli_args.clone())
            .with_working_dir(config.working_dir.clone());
        Ok(Self::new(bind_addr, cli, config.token_set))
    }

    pub async fn bind(&self) -> Result<TcpListener, FrontDoorError> {
        TcpListener::bind(self.bind_addr)
            .await
            .map_err(|source| FrontDoorError::ListenError {
                addr: self.bind_addr,
                source,
            })
    }

    pub async fn run(self) -> Result<(), FrontDoorError> {
        let listener = self.bind().await?;
        self.serve(listener).await
    }

    pub async fn serve(self, listener: TcpListener) -> Result<(), FrontDoorError> {
        let local_addr = listener.local_addr().unwrap_or(self.bind_addr);
        info!(addr = %local_addr, "HTTP server listening");

        loop {
            match listener.accept().await {
                Ok((stream, addr)) => {
                    let state = Arc::clone(&self.state);
                    tokio::spawn(async move {
                        if let Err(e) = serve_api_connection(stream, state).await {
                            debug!(addr = %addr, error = %e, "API connection error");
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "Failed to accept API connection");
                }
            }
        }
    }
}

async fn serve_api_connection<S>(stream: S, state: Arc<ApiState>) -> anyhow::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let io = TokioIo::new(stream);
    let service = service_fn(move |req| {
        let state = Arc::clone(&state);
        async move { handle_api_request(req, state).await }
    });

    http1::Builder::new()
        .serve_connection(io, service)
        .await
        .map_err(|e| anyhow::anyhow!("API connection error: {}", e))?;

    Ok(())
}

/// Helper to create a JSON response
fn json_response(status: StatusCode, body: &serde_json::Value) -> Response<ProxyBody> {
    Response::builder()
        .status(status)
        .header(CONTENT_TYPE, "application/json")
        .body(full_body(body.to_string()))
        .expect("valid response with StatusCode enum and static header")
}

async fn handle_api_request(
    req: Request<Incoming>,
    state: Arc<ApiState>,
) -> Result<Response<ProxyBody>, Infallible> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let response = match (&method, path.as_str()) {
        (&Method::GET, "/api/routes") => json_response(StatusCode::OK, &json!({ "routes": ROUTES })),
        (&Method::GET, "/api/health") => {
            info!("GET /api/health");
            json_response(
                StatusCode::OK,
                &json!({ "status": HEALTH_STATUS, "token_set": state.token_set }),
            )
        }
        (&Method::GET, "/api/run-cli") | (&Method::POST, "/api/run-cli") => {
            // The optional body carries nothing the CLI uses, but it must be well formed
            if let Err(e) = read_json_body(req).await {
                info!(%method, error = %e, "/api/run-cli rejected request body");
                return Ok(e.response());
            }
            let outcome = run_cli(&state.cli).await;
            info!(%method, success = outcome.is_success(), "/api/run-cli finished");
            outcome_response(outcome)
        }
        _ => {
            debug!(%method, path = %path, "No API route");
            json_error_response(StatusCode::NOT_FOUND, ErrorResponse::new("Not found"))
        }
    };

    Ok(response)
}

/// Read an optional JSON body of at most [`MAX_BODY_BYTES`].
///
/// Only `application/json` bodies are parsed; other content types and empty
/// bodies yield `None`.
pub async fn read_json_body<B>(req: Request<B>) -> Result<Option<serde_json::Value>, BodyError>
where
    B: Body,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let declared_len = req
        .headers()
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok());
    if declared_len.is_some_and(|len| len > MAX_BODY_BYTES as u64) {
        return Err(BodyError::TooLarge);
    }

    let is_json = req
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .is_some_and(|mime| mime.trim().eq_ignore_ascii_case("application/json"));

    let bytes = match Limited::new(req.into_body(), MAX_BODY_BYTES).collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) if e.is::<LengthLimitError>() => return Err(BodyError::TooLarge),
        Err(e) => return Err(BodyError::Read(e.to_string())),
    };

    if !is_json || bytes.is_empty() {
        return Ok(None);
    }

    Ok(Some(serde_json::from_slice(&bytes)?))
}

/// Map a CLI outcome to the API's JSON contract
pub fn outcome_response(outcome: CliOutcome) -> Response<ProxyBody> {
    let summary = outcome.summary();

    match outcome {
        CliOutcome::Success { output } => json_response(StatusCode::OK, &json!({ "output": output })),
        CliOutcome::Failure {
            kind: CliFailureKind::AlreadyRunning,
            detail,
        } => json_response(
            StatusCode::OK,
            &json!({
                "output": detail,
                "message": ALREADY_RUNNING_MESSAGE,
                "already_running": true,
            }),
        ),
        CliOutcome::Failure { detail, .. } => {
            let error = summary.unwrap_or_else(|| "CLI failed".to_string());
            json_error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorResponse::new(error).with_details(detail),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::Full;
    use hyper::body::Bytes;

    async fn body_json(response: Response<ProxyBody>) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn json_request(body: impl Into<Bytes>) -> Request<Full<Bytes>> {
        Request::builder()
            .method(Method::POST)
            .uri("/api/run-cli")
            .header(CONTENT_TYPE, "application/json; charset=utf-8")
            .body(Full::new(body.into()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_read_json_body() {
        let value = read_json_body(json_request(r#"{"dry_run":true}"#)).await.unwrap();
        assert_eq!(value, Some(json!({ "dry_run": true })));

        assert_eq!(read_json_body(json_request("")).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_read_json_body_rejects_malformed_json() {
        let err = read_json_body(json_request("{not json")).await.unwrap_err();
        assert!(matches!(err, BodyError::InvalidJson(_)));
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_read_json_body_ignores_other_content_types() {
        let req = Request::builder()
            .method(Method::POST)
            .uri("/api/run-cli")
            .header(CONTENT_TYPE, "text/plain")
            .body(Full::new(Bytes::from("{not json")))
            .unwrap();
        assert_eq!(read_json_body(req).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_read_json_body_limit_without_content_length() {
        // No Content-Length header, so the limit trips while reading
        let err = read_json_body(json_request(vec![b' '; MAX_BODY_BYTES + 1]))
            .await
            .unwrap_err();
        assert!(matches!(err, BodyError::TooLarge));
        assert_eq!(err.status_code(), StatusCode::PAYLOAD_TOO_LARGE);

        let at_limit = read_json_body(json_request(vec![b' '; MAX_BODY_BYTES])).await;
        assert!(matches!(at_limit, Err(BodyError::InvalidJson(_))));
    }

    #[tokio::test]
    async fn test_read_json_body_declared_length_over_limit() {
        let req = Request::builder()
            .method(Method::POST)
            .uri("/api/run-cli")
            .header(CONTENT_LENGTH, (MAX_BODY_BYTES + 1).to_string())
            .body(Full::new(Bytes::new()))
            .unwrap();
        assert!(matches!(read_json_body(req).await, Err(BodyError::TooLarge)));
    }

    #[test]
    fn test_routes_listing() {
        assert_eq!(ROUTES.len(), 4);
        assert!(ROUTES
            .iter()
            .any(|r| r.path == "/api/run-cli" && r.method == "POST"));
    }

    #[tokio::test]
    async fn test_outcome_success() {
        let response = outcome_response(CliOutcome::Success {
            output: "ok\n".to_string(),
        });
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, json!({ "output": "ok\n" }));
    }

    #[tokio::test]
    async fn test_outcome_already_running() {
        let response = outcome_response(CliOutcome::Failure {
            kind: CliFailureKind::AlreadyRunning,
            detail: "gateway already running".to_string(),
        });
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            body_json(response).await,
            json!({
                "output": "gateway already running",
                "message": ALREADY_RUNNING_MESSAGE,
                "already_running": true,
            })
        );
    }

    #[tokio::test]
    async fn test_outcome_exit_code() {
        let response = outcome_response(CliOutcome::Failure {
            kind: CliFailureKind::ExitCode(2),
            detail: "bad".to_string(),
        });
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            body_json(response).await,
            json!({ "error": "CLI exited with code 2", "details": "bad" })
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_outcome_signal() {
        let response = outcome_response(CliOutcome::Failure {
            kind: CliFailureKind::Signaled(libc::SIGKILL),
            detail: String::new(),
        });
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            body_json(response).await,
            json!({ "error": "CLI terminated with signal SIGKILL", "details": "" })
        );
    }

    #[tokio::test]
    async fn test_outcome_spawn_failure() {
        let response = outcome_response(CliOutcome::Failure {
            kind: CliFailureKind::SpawnFailed,
            detail: "No such file or directory".to_string(),
        });
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            body_json(response).await,
            json!({ "error": "Failed to start CLI", "details": "No such file or directory" })
        );
    }
}
