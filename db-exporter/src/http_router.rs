use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use anyhow::anyhow;
use futures::TryFutureExt;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::service::{make_service_fn, Service};
use hyper::{Body, Method, Request, Response, StatusCode};
use tracing::info;

use crate::exporter::Exporter;

const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

fn response(
    status: StatusCode,
    content_type: &'static str,
    body: impl Into<Body>,
) -> Response<Body> {
    let mut res = Response::new(body.into());
    *res.status_mut() = status;
    res.headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    res
}

/// Routes requests from an HTTP server to the exporter
#[derive(Clone)]
pub struct ExporterHttpRouter {
    /// The address to listen on
    pub listen_addr: SocketAddr,
    /// The path metrics are served on
    pub telemetry_path: String,
    pub exporter: Arc<Exporter>,
}

impl ExporterHttpRouter {
    /// Serves requests until `shutdown` completes, then waits for in-flight requests to finish
    pub async fn route_requests<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let server = hyper::Server::try_bind(&self.listen_addr)
            .map_err(|e| anyhow!("Failed to listen on {}: {}", self.listen_addr, e))?;
        info!(listen_addr = %self.listen_addr, path = %self.telemetry_path, "Serving metrics");
        let router = self;
        server
            .serve(make_service_fn(move |_| {
                let s = router.clone();
                async move { io::Result::Ok(s) }
            }))
            .with_graceful_shutdown(shutdown)
            .map_err(|e| anyhow!("HTTP server failed, {}", e))
            .await
    }
}

/// # Endpoints
///
/// * `GET <telemetry path>`: runs a scrape cycle and returns every metric in the Prometheus text
///   format. Database failures never fail the request; they're reported through the `up` and
///   `last_scrape_error` metrics instead.
/// * `GET /health`: 200 if the HTTP server is running. No other checks are performed.
/// * `GET /`: a landing page linking to the metrics.
impl Service<Request<Body>> for ExporterHttpRouter {
    type Response = Response<Body>;
    type Error = hyper::Error;
    #[allow(clippy::type_complexity)]
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _: &mut Context) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        match (req.method(), req.uri().path()) {
            (&Method::GET, path) if path == self.telemetry_path => {
                let exporter = Arc::clone(&self.exporter);
                Box::pin(async move {
                    let body = exporter.render().await;
                    Ok(response(StatusCode::OK, PROMETHEUS_CONTENT_TYPE, body))
                })
            }
            (&Method::GET, "/health") => Box::pin(async move {
                Ok(response(StatusCode::OK, "text/plain", "Exporter is running"))
            }),
            (&Method::GET, "/") => {
                let body = format!(
                    "<html><head><title>Database Exporter</title></head><body>\
                     <h1>Database Exporter</h1><p><a href=\"{0}\">Metrics</a></p>\
                     </body></html>",
                    self.telemetry_path
                );
                Box::pin(async move { Ok(response(StatusCode::OK, "text/html", body)) })
            }
            _ => Box::pin(async move {
                Ok(response(StatusCode::NOT_FOUND, "text/plain", "Not found"))
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use database_utils::error::DatabaseError;
    use hyper::body::to_bytes;
    use query_catalog::MetricCatalog;

    use super::*;
    use crate::connection::{Connector, Session};
    use crate::exporter::ExporterConfig;

    struct Unreachable;

    #[async_trait]
    impl Connector for Unreachable {
        async fn connect(&self, _target: &str) -> Result<Box<dyn Session>, DatabaseError> {
            Err(DatabaseError::Io(io::ErrorKind::ConnectionRefused.into()))
        }
    }

    async fn get(path: &str) -> Response<Body> {
        let exporter = Exporter::new(
            ExporterConfig::new(["postgresql://db:5432/postgres"]),
            MetricCatalog::default(),
            vec![],
            Arc::new(Unreachable),
        )
        .unwrap();
        let mut router = ExporterHttpRouter {
            listen_addr: ([127, 0, 0, 1], 0).into(),
            telemetry_path: "/metrics".to_owned(),
            exporter: Arc::new(exporter),
        };
        let req = Request::get(path).body(Body::empty()).unwrap();
        router.call(req).await.unwrap()
    }

    #[tokio::test]
    async fn metrics_are_served_even_when_the_database_is_down() {
        let res = get("/metrics").await;
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(
            res.headers()[CONTENT_TYPE],
            HeaderValue::from_static(PROMETHEUS_CONTENT_TYPE)
        );
        let body = to_bytes(res.into_body()).await.unwrap();
        let body = String::from_utf8(body.to_vec()).unwrap();
        assert!(body.contains("pg_up 0\n"), "{body}");
    }

    #[tokio::test]
    async fn other_routes() {
        assert_eq!(get("/health").await.status(), StatusCode::OK);
        assert_eq!(get("/").await.status(), StatusCode::OK);
        assert_eq!(get("/nope").await.status(), StatusCode::NOT_FOUND);
    }
}
