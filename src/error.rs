//! Error taxonomy for the front door and its plain-text / JSON error responses

use crate::process::ChildExit;
use crate::proxy::{full_body, ProxyBody};
use hyper::body::Bytes;
use hyper::{Response, StatusCode};
use serde::Serialize;
use std::net::SocketAddr;

/// Everything that can go wrong between the listener, the proxy and the gateway
#[derive(Debug, thiserror::Error)]
pub enum FrontDoorError {
    /// The gateway could not be reached, or failed before sending a response head
    #[error("{0}")]
    UpstreamUnreachable(String),

    /// The gateway process could not be started at all
    #[error("failed to spawn gateway process: {0}")]
    UpstreamSpawnFailure(#[source] std::io::Error),

    /// The gateway process exited; the front door has no reason to outlive it
    #[error("gateway process exited ({0})")]
    UpstreamCrashed(ChildExit),

    /// The public listener could not be bound
    #[error("failed to listen on {addr}: {source}")]
    ListenError {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// Startup configuration was invalid
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl FrontDoorError {
    /// Status the whole program exits with when this error is fatal
    pub fn exit_code(&self) -> i32 {
        match self {
            FrontDoorError::UpstreamCrashed(exit) => exit.exit_code(),
            FrontDoorError::UpstreamUnreachable(_)
            | FrontDoorError::UpstreamSpawnFailure(_)
            | FrontDoorError::ListenError { .. }
            | FrontDoorError::Config(_) => 1,
        }
    }

    /// HTTP status a client sees for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            FrontDoorError::UpstreamUnreachable(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Render an error and all of its sources as `outer: inner: root`
pub fn error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !message.ends_with(&text) {
            message.push_str(": ");
            message.push_str(&text);
        }
        source = cause.source();
    }
    message
}

/// 502 response with a plain-text diagnostic
pub fn bad_gateway_response(reason: &str) -> Response<ProxyBody> {
    let reason = if reason.is_empty() { "upstream error" } else { reason };

    Response::builder()
        .status(StatusCode::BAD_GATEWAY)
        .header(hyper::header::CONTENT_TYPE, "text/plain")
        .body(full_body(format!("Bad Gateway: {}", reason)))
        .expect("valid response with StatusCode enum and static headers")
}

/// JSON error body used by the API wrapper
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Short error message
    pub error: String,
    /// Captured output or underlying cause
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!(r#"{{"error":"{}"}}"#, self.error.replace('\"', "\\\""))
        })
    }
}

/// Create a JSON error response
pub fn json_error_response(status: StatusCode, error: ErrorResponse) -> Response<ProxyBody> {
    Response::builder()
        .status(status)
        .header(hyper::header::CONTENT_TYPE, "application/json")
        .body(full_body(Bytes::from(error.to_json())))
        .expect("valid response with StatusCode enum and static headers")
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    #[test]
    fn test_exit_codes() {
        let spawn = FrontDoorError::UpstreamSpawnFailure(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "no such file",
        ));
        assert_eq!(spawn.exit_code(), 1);

        let crashed = FrontDoorError::UpstreamCrashed(ChildExit {
            code: Some(3),
            signal: None,
        });
        assert_eq!(crashed.exit_code(), 3);

        let listen = FrontDoorError::ListenError {
            addr: "0.0.0.0:8080".parse().unwrap(),
            source: std::io::Error::new(std::io::ErrorKind::AddrInUse, "address in use"),
        };
        assert_eq!(listen.exit_code(), 1);
        assert!(listen.to_string().contains("0.0.0.0:8080"));
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(
            FrontDoorError::UpstreamUnreachable("refused".into()).status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            FrontDoorError::Config("bad".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_error_chain_includes_sources() {
        let err = FrontDoorError::UpstreamSpawnFailure(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "no such file",
        ));
        let chain = error_chain(&err);
        assert!(chain.starts_with("failed to spawn gateway process"));
        assert!(chain.ends_with("no such file"));
        // io::Error source is already in the outer message, so it is not repeated
        assert_eq!(chain.matches("no such file").count(), 1);
    }

    #[tokio::test]
    async fn test_bad_gateway_response() {
        let response = bad_gateway_response("connection refused");

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(
            response.headers().get("Content-Type").unwrap(),
            "text/plain"
        );

        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"Bad Gateway: connection refused");
    }

    #[tokio::test]
    async fn test_bad_gateway_response_never_empty() {
        let response = bad_gateway_response("");
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"Bad Gateway: upstream error");
    }

    #[test]
    fn test_error_response_json() {
        let json = ErrorResponse::new("CLI exited with code 2")
            .with_details("boom")
            .to_json();
        assert_eq!(json, r#"{"error":"CLI exited with code 2","details":"boom"}"#);

        let json = ErrorResponse::new("Not found").to_json();
        assert_eq!(json, r#"{"error":"Not found"}"#);
    }

    #[test]
    fn test_json_error_response() {
        let response = json_error_response(StatusCode::NOT_FOUND, ErrorResponse::new("Not found"));
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            response.headers().get("Content-Type").unwrap(),
            "application/json"
        );
    }
}
