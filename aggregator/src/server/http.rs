//! HTTP server serving /flows, /healthz, /readyz, and /metrics.

use super::{api, empty_response, text_response};
use crate::access;
use crate::metrics;
use crate::store::FlowStore;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::AddrStream;
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Request, Response, Server, StatusCode};
use std::convert::Infallible;
use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// State shared by every connection.
#[derive(Debug, Clone)]
pub struct AppState {
    pub store: Arc<FlowStore>,
    pub max_body_bytes: usize,
}

impl AppState {
    pub fn new(store: Arc<FlowStore>, max_body_bytes: usize) -> Self {
        Self {
            store,
            max_body_bytes,
        }
    }
}

/// Serve HTTP on `listener` until `shutdown` is cancelled, then drain
/// in-flight connections.
pub async fn serve(
    listener: TcpListener,
    state: AppState,
    shutdown: CancellationToken,
) -> Result<(), hyper::Error> {
    let make_svc = make_service_fn(move |conn: &AddrStream| {
        let state = state.clone();
        let remote = conn.remote_addr();
        async move {
            Ok::<_, Infallible>(service_fn(move |req: Request<Body>| {
                let state = state.clone();
                async move { Ok::<_, Infallible>(handle(req, remote, &state).await) }
            }))
        }
    });

    let server = Server::from_tcp(listener)?.serve(make_svc);
    tracing::info!("flowd http server listening on {}", server.local_addr());

    server
        .with_graceful_shutdown(async move {
            shutdown.cancelled().await;
            tracing::info!("shutdown requested, draining connections");
        })
        .await?;

    tracing::info!("gracefully stopped flowd server");
    Ok(())
}

fn route_name(path: &str) -> &'static str {
    match path {
        "/flows" => "flows",
        "/healthz" => "healthz",
        "/readyz" => "readyz",
        "/metrics" => "metrics",
        _ => "unknown",
    }
}

/// Dispatch one request and record its metrics and access log entry.
pub async fn handle(req: Request<Body>, remote: SocketAddr, state: &AppState) -> Response<Body> {
    let started = Instant::now();
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let route = route_name(&path);

    let response = match route {
        "flows" => api::handle_flows(req, remote, state).await,

        "healthz" => text_response(StatusCode::OK, "ok\n"),

        "readyz" => match state.store.stats() {
            Ok(_) => text_response(StatusCode::OK, "ready\n"),
            Err(e) => {
                tracing::warn!("flow store not ready: {}", e);
                text_response(StatusCode::SERVICE_UNAVAILABLE, "not ready\n")
            }
        },

        "metrics" => match metrics::encode_metrics() {
            Ok(body) => {
                let mut res = Response::new(Body::from(body));
                res.headers_mut().insert(
                    CONTENT_TYPE,
                    HeaderValue::from_static("text/plain; version=0.0.4"),
                );
                res
            }
            Err(e) => {
                tracing::error!("unable to render metrics: {:#}", e);
                empty_response(StatusCode::INTERNAL_SERVER_ERROR)
            }
        },

        _ => text_response(StatusCode::NOT_FOUND, "not found\n"),
    };

    let elapsed = started.elapsed().as_secs_f64();
    let status = response.status().as_u16();
    metrics::observe_request(route, method.as_str(), status, elapsed);
    access::request(remote, method.as_str(), &path, status, elapsed * 1000.0);
    response
}
