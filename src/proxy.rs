use crate::config::Config;
use crate::error::{bad_gateway_response, FrontDoorError};
use crate::router::{classify, probe_response};
use crate::upstream::UpstreamClient;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Response body type shared by probes, errors and proxied responses
pub type ProxyBody = BoxBody<Bytes, hyper::Error>;

/// Wrap a fully buffered payload as a [`ProxyBody`]
pub fn full_body(data: impl Into<Bytes>) -> ProxyBody {
    Full::new(data.into()).map_err(|never| match never {}).boxed()
}

/// The public listener: answers probes, forwards everything else
pub struct ProxyServer {
    bind_addr: SocketAddr,
    upstream: Arc<UpstreamClient>,
    root_banner: Arc<str>,
}

impl ProxyServer {
    pub fn new(bind_addr: SocketAddr, upstream_addr: SocketAddr, root_banner: &str) -> Self {
        Self {
            bind_addr,
            upstream: Arc::new(UpstreamClient::new(upstream_addr)),
            root_banner: Arc::from(root_banner),
        }
    }

    pub fn from_config(config: &Config) -> Result<Self, FrontDoorError> {
        let bind_addr = config
            .listen_addr()
            .map_err(|e| FrontDoorError::Config(e.to_string()))?;
        Ok(Self::new(
            bind_addr,
            config.upstream.addr(),
            &config.server.root_banner,
        ))
    }

    /// The upstream client (for statistics)
    pub fn upstream(&self) -> &Arc<UpstreamClient> {
        &self.upstream
    }

    /// Bind the public listener. No retry and no port fallback.
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

    /// Accept connections on an already bound listener until the future is dropped
    pub async fn serve(self, listener: TcpListener) -> Result<(), FrontDoorError> {
        let local_addr = listener.local_addr().unwrap_or(self.bind_addr);
        info!(
            addr = %local_addr,
            upstream = %self.upstream.addr(),
            "Front door listening (HTTP/1.1)"
        );

        loop {
            match listener.accept().await {
                Ok((stream, addr)) => {
                    let upstream = Arc::clone(&self.upstream);
                    let root_banner = Arc::clone(&self.root_banner);

                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, addr, upstream, root_banner).await {
                            debug!(addr = %addr, error = %e, "Connection error");
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }
}

async fn handle_connection<S>(
    stream: S,
    addr: SocketAddr,
    upstream: Arc<UpstreamClient>,
    root_banner: Arc<str>,
) -> anyhow::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let io = TokioIo::new(stream);

    let service = service_fn(move |req: Request<Incoming>| {
        let upstream = Arc::clone(&upstream);
        let root_banner = Arc::clone(&root_banner);
        async move { handle_request(req, upstream, root_banner, addr).await }
    });

    http1::Builder::new()
        .serve_connection(io, service)
        .await
        .map_err(|e| anyhow::anyhow!("Connection error: {}", e))?;

    Ok(())
}

async fn handle_request(
    req: Request<Incoming>,
    upstream: Arc<UpstreamClient>,
    root_banner: Arc<str>,
    client_addr: SocketAddr,
) -> Result<Response<ProxyBody>, Infallible> {
    // The request target as sent; absolute-form targets keep their scheme and authority
    let route = classify(&req.uri().to_string());

    if let Some(response) = probe_response(route, &root_banner) {
        debug!(?route, client = %client_addr, "Answered probe");
        return Ok(response);
    }

    let request_id = Uuid::new_v4();
    let method = req.method().clone();
    let uri = req.uri().clone();
    let started = Instant::now();

    debug!(%request_id, %method, %uri, client = %client_addr, "Proxying request");

    match upstream.send_request(req).await {
        Ok(response) => {
            debug!(
                %request_id,
                %method,
                %uri,
                status = response.status().as_u16(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Upstream responded"
            );
            Ok(response)
        }
        Err(e) => {
            let err = FrontDoorError::UpstreamUnreachable(e.to_string());
            warn!(
                %request_id,
                %method,
                %uri,
                upstream = %upstream.addr(),
                error = %err,
                "Failed to forward request"
            );
            Ok(bad_gateway_response(&err.to_string()))
        }
    }
}
