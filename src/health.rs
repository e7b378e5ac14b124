//! Liveness and readiness probes on a dedicated port

use anyhow::Result;
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::header::{CONTENT_TYPE, HeaderValue};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tracing::{debug, info};

/// Shared readiness flag plus the probe server. Ready once provider
/// discovery finished and the application listener is bound.
#[derive(Clone)]
pub struct HealthServer {
    ready: Arc<AtomicBool>,
}

impl HealthServer {
    pub fn new() -> Self {
        Self {
            ready: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    pub async fn serve(&self, port: u16, ready_tx: oneshot::Sender<()>) -> Result<()> {
        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        let listener = TcpListener::bind(addr).await?;

        info!(port = port, "Health server listening");
        let _ = ready_tx.send(());

        loop {
            let (stream, remote_addr) = listener.accept().await?;
            let io = TokioIo::new(stream);
            let ready = self.ready.clone();

            tokio::spawn(async move {
                let service = service_fn(move |req: Request<hyper::body::Incoming>| {
                    let ready = ready.load(Ordering::SeqCst);
                    async move {
                        Ok::<_, Infallible>(probe_response(req.method(), req.uri().path(), ready))
                    }
                });

                if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                    debug!(
                        error = %err,
                        remote_addr = %remote_addr,
                        "Health server connection error"
                    );
                }
            });
        }
    }
}

impl Default for HealthServer {
    fn default() -> Self {
        Self::new()
    }
}

fn probe_status(method: &Method, path: &str, ready: bool) -> (StatusCode, &'static str) {
    match (method, path) {
        (&Method::GET, "/healthz") => (StatusCode::OK, "ok"),
        (&Method::GET, "/readyz") if ready => (StatusCode::OK, "ok"),
        (&Method::GET, "/readyz") => (StatusCode::SERVICE_UNAVAILABLE, "not ready"),
        _ => (StatusCode::NOT_FOUND, "not found"),
    }
}

fn probe_response(method: &Method, path: &str, ready: bool) -> Response<Full<Bytes>> {
    let (status, body) = probe_status(method, path, ready);
    let mut response = Response::new(Full::new(Bytes::from_static(body.as_bytes())));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
    response
}
