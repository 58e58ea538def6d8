//! HTTP serving boundary for a module registry.
//!
//! Answers the two requests a remote loader makes: the manifest, and a
//! batch of module sources.

use anyhow::Result;
use dyn_loader::ModuleRegistry;
use dyn_loader::wire;
use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::header::{CONTENT_TYPE, HeaderValue};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use hyper_util::server::graceful::GracefulShutdown;
use std::convert::Infallible;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

struct ServerState {
    registry: Arc<ModuleRegistry>,
    manifest: Bytes,
}

/// Serve `registry` on `listener` until `shutdown` resolves, then let open
/// connections finish.
pub async fn serve(
    registry: Arc<ModuleRegistry>,
    listener: TcpListener,
    shutdown: impl Future<Output = ()>,
) -> Result<()> {
    let manifest = Bytes::from(serde_json::to_vec(&registry.manifest())?);
    let state = Arc::new(ServerState { registry, manifest });
    let graceful = GracefulShutdown::new();
    let mut shutdown = std::pin::pin!(shutdown);

    tracing::info!("Serving modules on {}", listener.local_addr()?);
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        tracing::warn!("Failed to accept connection: {e}");
                        continue;
                    }
                };
                let state = Arc::clone(&state);
                let service = service_fn(move |request| {
                    let state = Arc::clone(&state);
                    async move { Ok::<_, Infallible>(handle(&state, &request)) }
                });
                let connection = graceful.watch(
                    http1::Builder::new().serve_connection(TokioIo::new(stream), service),
                );
                tokio::spawn(async move {
                    if let Err(e) = connection.await {
                        tracing::debug!("Connection from {peer} ended with error: {e}");
                    }
                });
            }
            _ = &mut shutdown => {
                tracing::info!("Shutting down");
                break;
            }
        }
    }

    if tokio::time::timeout(SHUTDOWN_GRACE, graceful.shutdown())
        .await
        .is_err()
    {
        tracing::warn!("Timed out waiting for connections to close");
    }
    Ok(())
}

fn handle(state: &ServerState, request: &Request<Incoming>) -> Response<Full<Bytes>> {
    if request.method() != Method::GET {
        return empty(StatusCode::METHOD_NOT_ALLOWED);
    }

    match request.uri().path() {
        wire::MANIFEST_PATH => json(state.manifest.clone()),
        wire::LOAD_PATH => {
            let names = match request.uri().query().map(wire::parse_load_query) {
                Some(Ok(names)) => names,
                Some(Err(e)) => {
                    tracing::debug!("Rejecting load request: {e:#}");
                    return empty(StatusCode::BAD_REQUEST);
                }
                None => return empty(StatusCode::BAD_REQUEST),
            };
            match state.registry.sources(&names) {
                Ok(sources) => match serde_json::to_vec(&sources) {
                    Ok(body) => json(Bytes::from(body)),
                    Err(e) => {
                        tracing::warn!("Failed to encode sources: {e}");
                        empty(StatusCode::INTERNAL_SERVER_ERROR)
                    }
                },
                Err(e) => {
                    tracing::debug!("Rejecting load request for {names:?}: {e}");
                    empty(StatusCode::BAD_REQUEST)
                }
            }
        }
        _ => empty(StatusCode::NOT_FOUND),
    }
}

fn json(body: Bytes) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body));
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

fn empty(status: StatusCode) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::new()));
    *response.status_mut() = status;
    response
}
