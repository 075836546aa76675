//! HTTP client for the supervised gateway
//!
//! Every forwarded request gets its own loopback connection: idle pooling is
//! disabled and cancelled requests are never retried, so a failed attempt is
//! surfaced to the caller exactly once.

use crate::proxy::ProxyBody;
use http_body_util::BodyExt;
use hyper::body::Incoming;
use hyper::{Request, Response};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Error type for upstream requests
#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    /// Connecting to or talking to the gateway failed
    #[error("{}", crate::error::error_chain(.0))]
    Client(#[from] hyper_util::client::legacy::Error),
    /// The forwarded request could not be built
    #[error("request build error: {0}")]
    RequestBuild(String),
}

/// Counters for forwarded traffic
#[derive(Debug, Default)]
pub struct UpstreamStats {
    /// Requests sent to the gateway
    pub requests: AtomicU64,
    /// Requests that failed before a response head arrived
    pub failures: AtomicU64,
}

impl UpstreamStats {
    pub fn record_request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_requests(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    pub fn get_failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }
}

/// Client bound to one loopback gateway address
pub struct UpstreamClient {
    client: Client<HttpConnector, Incoming>,
    addr: SocketAddr,
    stats: Arc<UpstreamStats>,
}

impl UpstreamClient {
    pub fn new(addr: SocketAddr) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_nodelay(true);
        connector.enforce_http(true);

        let client = Client::builder(TokioExecutor::new())
            .pool_max_idle_per_host(0)
            .retry_canceled_requests(false)
            .set_host(false)
            .build(connector);

        debug!(%addr, "Upstream client initialized");

        Self {
            client,
            addr,
            stats: Arc::new(UpstreamStats::default()),
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn stats(&self) -> Arc<UpstreamStats> {
        Arc::clone(&self.stats)
    }

    /// Forward a request with its method, path, headers and streaming body untouched
    pub async fn send_request(
        &self,
        req: Request<Incoming>,
    ) -> Result<Response<ProxyBody>, UpstreamError> {
        let path = req
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        let uri = format!("http://{}{}", self.addr, path);

        let (parts, body) = req.into_parts();
        let mut builder = Request::builder().method(parts.method).uri(&uri);

        for (key, value) in parts.headers.iter() {
            builder = builder.header(key, value);
        }

        let upstream_req = builder
            .body(body)
            .map_err(|e| UpstreamError::RequestBuild(e.to_string()))?;

        self.stats.record_request();

        let response = match self.client.request(upstream_req).await {
            Ok(response) => response,
            Err(e) => {
                self.stats.record_failure();
                return Err(e.into());
            }
        };

        let (parts, body) = response.into_parts();
        Ok(Response::from_parts(parts, body.boxed()))
    }
}
