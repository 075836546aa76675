//! Probe routing: which requests the front door answers itself

use crate::proxy::{full_body, ProxyBody};
use hyper::body::Bytes;
use hyper::{Response, StatusCode};

/// Body served on the liveness probe paths
pub const LIVENESS_BODY: &str = r#"{"status":"ok"}"#;

/// What the front door does with a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// `/health` or `/health/`
    LivenessProbe,
    /// `/` or an empty target
    RootProbe,
    /// Everything else goes to the gateway
    Proxy,
}

/// Classify a request target exactly as received.
///
/// Matching is exact, so `/health?verbose=1`, `/healthz` and the absolute-form
/// `http://host/health` are all proxied.
pub fn classify(target: &str) -> Route {
    match target {
        "/health" | "/health/" => Route::LivenessProbe,
        "/" | "" => Route::RootProbe,
        _ => Route::Proxy,
    }
}

/// Build the local response for a probe route; `None` for `Route::Proxy`
pub fn probe_response(route: Route, root_banner: &str) -> Option<Response<ProxyBody>> {
    match route {
        Route::LivenessProbe => Some(liveness_response()),
        Route::RootProbe => Some(root_response(root_banner)),
        Route::Proxy => None,
    }
}

pub fn liveness_response() -> Response<ProxyBody> {
    Response::builder()
        .status(StatusCode::OK)
        .header(hyper::header::CONTENT_TYPE, "application/json")
        .body(full_body(Bytes::from_static(LIVENESS_BODY.as_bytes())))
        .expect("valid response with StatusCode enum and static headers")
}

pub fn root_response(banner: &str) -> Response<ProxyBody> {
    Response::builder()
        .status(StatusCode::OK)
        .header(hyper::header::CONTENT_TYPE, "text/plain")
        .body(full_body(banner.to_string()))
        .expect("valid response with StatusCode enum and static headers")
}
