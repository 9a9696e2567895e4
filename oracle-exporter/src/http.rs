//! HTTP server for the Prometheus metrics endpoint.

use std::net::SocketAddr;

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use tracing::{error, info};

use crate::collector::SharedCollector;
use crate::exposition::CONTENT_TYPE;

/// Routes served next to the metrics endpoint.
pub const FIXED_ROUTES: [&str; 2] = ["/", "/health"];

/// Check that `path` can serve metrics next to the fixed routes.
pub fn check_metrics_path(path: &str) -> Result<(), String> {
    if !path.starts_with('/') {
        return Err("Metrics path must start with /".to_string());
    }
    if FIXED_ROUTES.contains(&path) {
        return Err(format!("Metrics path {} is already served by the exporter", path));
    }
    Ok(())
}

/// Application state shared across handlers.
#[derive(Clone)]
struct AppState {
    collector: SharedCollector,
    metrics_path: String,
}

/// Create the HTTP router.
fn create_router(collector: SharedCollector, metrics_path: &str) -> Router {
    let state = AppState {
        collector,
        metrics_path: metrics_path.to_string(),
    };

    Router::new()
        .route("/", get(landing_handler))
        .route(metrics_path, get(metrics_handler))
        .route("/health", get(health_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Handler for the metrics endpoint. Every request runs one scrape.
async fn metrics_handler(State(state): State<AppState>) -> Response {
    let collector = state.collector.clone();

    // Database calls block; keep them off the async workers.
    match tokio::task::spawn_blocking(move || collector.render()).await {
        Ok(body) => (StatusCode::OK, [("content-type", CONTENT_TYPE)], body).into_response(),
        Err(e) => {
            error!(error = %e, "Scrape task failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "scrape failed\n").into_response()
        }
    }
}

/// Handler for the landing page.
async fn landing_handler(State(state): State<AppState>) -> Html<String> {
    Html(format!(
        "<html>\n\
         <head><title>Oracle DB Exporter</title></head>\n\
         <body>\n\
         <h1>Oracle DB Exporter</h1>\n\
         <p><a href=\"{}\">Metrics</a></p>\n\
         </body>\n\
         </html>\n",
        state.metrics_path
    ))
}

/// Handler for the /health endpoint.
async fn health_handler() -> Response {
    (StatusCode::OK, "healthy\n").into_response()
}

/// HTTP server configuration.
pub struct HttpServer {
    collector: SharedCollector,
    listen_addr: SocketAddr,
    metrics_path: String,
}

impl HttpServer {
    /// Create a new HTTP server.
    pub fn new(collector: SharedCollector, listen_addr: SocketAddr, metrics_path: String) -> Self {
        Self {
            collector,
            listen_addr,
            metrics_path,
        }
    }

    /// Bind the listener. Failing here is a startup error.
    pub async fn bind(self) -> anyhow::Result<BoundServer> {
        check_metrics_path(&self.metrics_path).map_err(|e| anyhow::anyhow!(e))?;

        let listener = tokio::net::TcpListener::bind(self.listen_addr)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind to {}: {}", self.listen_addr, e))?;

        let local_addr = listener.local_addr()?;
        info!(
            addr = %local_addr,
            path = %self.metrics_path,
            "HTTP server listening"
        );

        Ok(BoundServer {
            router: create_router(self.collector, &self.metrics_path),
            listener,
            local_addr,
        })
    }
}

/// A server whose listener is bound but not yet serving.
pub struct BoundServer {
    router: Router,
    listener: tokio::net::TcpListener,
    local_addr: SocketAddr,
}

impl BoundServer {
    /// The address actually bound, useful when listening on port 0.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Serve requests until the shutdown signal is received.
    pub async fn serve(self, mut shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        axum::serve(self.listener, self.router)
            .with_graceful_shutdown(async move {
                loop {
                    if shutdown.changed().await.is_err() {
                        break;
                    }
                    if *shutdown.borrow() {
                        break;
                    }
                }
                info!("HTTP server shutting down");
            })
            .await
            .map_err(|e| anyhow::anyhow!("HTTP server error: {}", e))?;

        info!("HTTP server stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::OracleCollector;
    use crate::config::ExporterConfig;
    use crate::db::memory::MemoryDatabase;
    use crate::db::{Row, Value};
    use crate::probes::{ACTIVE_USER_SESSION_QUERY, LIVENESS_QUERY, SESSION_COUNT_QUERY};
    use axum::body::Body;
    use axum::http::Request;
    use std::sync::Arc;
    use tower::ServiceExt;

    fn make_collector(db: &MemoryDatabase) -> SharedCollector {
        let config = ExporterConfig::parse("{ collect: { tablespaces: false } }").unwrap();
        Arc::new(OracleCollector::from_config(&config, Arc::new(db.clone())).unwrap())
    }

    fn live_db() -> MemoryDatabase {
        MemoryDatabase::new()
            .with_rows(LIVENESS_QUERY, vec![Row::new(vec![Value::from("OPEN")])])
            .with_rows(
                SESSION_COUNT_QUERY,
                vec![Row::new(vec![Value::from("user_sessions"), Value::from(7.0)])],
            )
            .with_rows(
                ACTIVE_USER_SESSION_QUERY,
                vec![Row::new(vec![Value::from(2.0)])],
            )
    }

    async fn body_text(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let router = create_router(make_collector(&live_db()), "/metrics");

        let response = router
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);

        let content_type = response.headers().get("content-type").unwrap();
        assert!(content_type.to_str().unwrap().contains("text/plain"));

        let body = body_text(response).await;
        assert!(body.contains("oracle_up 1"));
        assert!(body.contains("oracle_sessions_total{session_type=\"user_sessions\"} 7"));
    }

    #[tokio::test]
    async fn test_metrics_endpoint_database_down() {
        let db = live_db();
        db.set_reachable(false);
        let router = create_router(make_collector(&db), "/metrics");

        let response = router
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();

        // A down database is reported in the metrics, not as an HTTP error.
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_text(response).await;
        assert!(body.contains("oracle_up 0"));
        assert!(body.contains("oracle_exporter_last_scrape_error 1"));
    }

    #[tokio::test]
    async fn test_each_request_scrapes() {
        let db = live_db();
        let router = create_router(make_collector(&db), "/metrics");

        for _ in 0..2 {
            let response = router
                .clone()
                .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }

        assert_eq!(db.connections_opened(), 2);
    }

    #[tokio::test]
    async fn test_landing_page_links_metrics() {
        let router = create_router(make_collector(&live_db()), "/oracle/metrics");

        let response = router
            .oneshot(Request::get("/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_text(response).await;
        assert!(body.contains("<a href=\"/oracle/metrics\">"));
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let router = create_router(make_collector(&live_db()), "/metrics");

        let response = router
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "healthy\n");
    }

    #[tokio::test]
    async fn test_custom_metrics_path() {
        let router = create_router(make_collector(&live_db()), "/prometheus/metrics");

        // Custom path should work
        let response = router
            .clone()
            .oneshot(
                Request::get("/prometheus/metrics")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        // Default path should 404
        let response = router
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_bind_rejects_fixed_route_as_metrics_path() {
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();

        let result = HttpServer::new(make_collector(&live_db()), addr, "/health".to_string())
            .bind()
            .await;

        let err = result.err().unwrap();
        assert!(err.to_string().contains("already served"));
    }

    #[test]
    fn test_check_metrics_path() {
        assert!(check_metrics_path("/metrics").is_ok());
        assert!(check_metrics_path("metrics").is_err());
        for route in FIXED_ROUTES {
            assert!(check_metrics_path(route).is_err());
        }
    }
}
