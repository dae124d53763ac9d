//! Shared helpers for tests that need a live HTTP target.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode, Uri},
    routing::get,
    Router,
};
use tokio::sync::mpsc;

/// A local axum server with fixed-status routes and a hit counter.
pub struct TargetServer {
    pub addr: SocketAddr,
    hits: Arc<AtomicUsize>,
}

impl TargetServer {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

async fn respond(State(hits): State<Arc<AtomicUsize>>, status: StatusCode) -> StatusCode {
    hits.fetch_add(1, Ordering::SeqCst);
    status
}

pub async fn spawn_target_server() -> TargetServer {
    let hits = Arc::new(AtomicUsize::new(0));

    let router = Router::new()
        .route("/ok", get(|s: State<Arc<AtomicUsize>>| respond(s, StatusCode::OK)))
        .route(
            "/not-modified",
            get(|s: State<Arc<AtomicUsize>>| respond(s, StatusCode::NOT_MODIFIED)),
        )
        .route("/missing", get(|s: State<Arc<AtomicUsize>>| respond(s, StatusCode::NOT_FOUND)))
        .route(
            "/error",
            get(|s: State<Arc<AtomicUsize>>| respond(s, StatusCode::INTERNAL_SERVER_ERROR)),
        )
        .route(
            "/slow",
            get(|s: State<Arc<AtomicUsize>>| async move {
                tokio::time::sleep(Duration::from_secs(10)).await;
                respond(s, StatusCode::OK).await
            }),
        )
        .with_state(hits.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    TargetServer { addr, hits }
}

/// One request seen by [`spawn_push_gateway`].
#[derive(Debug)]
pub struct GatewayRequest {
    pub path: String,
    pub auth: Option<String>,
    pub body: String,
}

/// A gateway stand-in that accepts anything and reports each request.
pub async fn spawn_push_gateway() -> (SocketAddr, mpsc::UnboundedReceiver<GatewayRequest>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let router = Router::new().fallback(move |uri: Uri, headers: HeaderMap, body: Bytes| {
        let tx = tx.clone();
        async move {
            let _ = tx.send(GatewayRequest {
                path: uri.path().to_string(),
                auth: headers
                    .get("authorization")
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string),
                body: String::from_utf8_lossy(&body).into_owned(),
            });
            "ok"
        }
    });

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    (addr, rx)
}

/// An address nothing is listening on.
pub fn unused_addr() -> SocketAddr {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap()
}
