//! Metrics scrape server.

mod handlers;

use crate::metrics::MetricsSink;

use axum::{routing::get, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub metrics: Arc<dyn MetricsSink>,
}

/// Scrape endpoint for the worker.
pub struct Server {
    state: AppState,
    port: u16,
}

impl Server {
    pub fn new(port: u16, metrics: Arc<dyn MetricsSink>) -> Self {
        Self {
            state: AppState { metrics },
            port,
        }
    }

    /// Build the router with all routes.
    pub fn routes(&self) -> Router {
        Router::new()
            .route("/metrics", get(handlers::handle_metrics))
            .fallback(handlers::handle_not_found)
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Bind the configured port.
    pub async fn bind(&self) -> std::io::Result<tokio::net::TcpListener> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!("Metrics server listening on {}", addr);
        Ok(listener)
    }

    /// Serve on `listener` until `shutdown` flips to true.
    pub async fn serve(
        &self,
        listener: tokio::net::TcpListener,
        mut shutdown: watch::Receiver<bool>,
    ) -> std::io::Result<()> {
        axum::serve(listener, self.routes())
            .with_graceful_shutdown(async move {
                let _ = shutdown.wait_for(|stop| *stop).await;
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::NoopSink;

    async fn spawn(metrics: Arc<dyn MetricsSink>) -> (SocketAddr, watch::Sender<bool>) {
        let server = Server::new(0, metrics);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = watch::channel(false);
        tokio::spawn(async move { server.serve(listener, rx).await.unwrap() });
        (addr, tx)
    }

    #[tokio::test]
    async fn test_placeholder_when_disabled() {
        let (addr, _stop) = spawn(Arc::new(NoopSink::new("prometheus not available"))).await;

        let res = reqwest::get(format!("http://{}/metrics", addr)).await.unwrap();
        assert_eq!(res.status(), 200);
        assert_eq!(
            res.headers()["content-type"].to_str().unwrap(),
            crate::metrics::TEXT_CONTENT_TYPE
        );
        assert_eq!(res.text().await.unwrap(), "# metrics disabled: prometheus not available\n");
    }

    #[tokio::test]
    async fn test_unknown_path_is_404() {
        let (addr, _stop) = spawn(Arc::new(NoopSink::default())).await;

        let res = reqwest::get(format!("http://{}/status", addr)).await.unwrap();
        assert_eq!(res.status(), 404);
        assert_eq!(res.text().await.unwrap(), "not found");
    }

    #[cfg(feature = "prometheus")]
    #[tokio::test]
    async fn test_serves_recorded_metrics() {
        let sink = Arc::new(crate::metrics::PrometheusSink::new().unwrap());
        crate::metrics::record_cycle(sink.as_ref(), 2, chrono::Utc::now());
        let (addr, _stop) = spawn(sink).await;

        let body = reqwest::get(format!("http://{}/metrics", addr))
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert!(body.contains("status_worker_checks_total 1"));
        assert!(body.contains("status_worker_checks_failed_total 2"));
    }

    #[tokio::test]
    async fn test_shutdown_stops_server() {
        let server = Server::new(0, Arc::new(NoopSink::default()));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(async move { server.serve(listener, rx).await });

        tx.send(true).unwrap();
        let joined = tokio::time::timeout(std::time::Duration::from_secs(5), handle).await;
        assert!(joined.unwrap().unwrap().is_ok());
    }
}
