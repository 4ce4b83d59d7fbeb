//! Prometheus exporter and HTTP request metrics.
//!
//! | Metric | Type | Labels |
//! |---|---|---|
//! | `ftl_http_request_duration_seconds` | histogram | `endpoint`, `method`, `status_class` |
//! | `ftl_http_requests_total` | counter | `endpoint`, `method`, `status_class` |
//! | `ftl_ingress_routes` | gauge | |
//!
//! Ingress requests are labelled with the route pattern they matched, never
//! the raw path.

use std::sync::OnceLock;
use std::time::Instant;

use axum::extract::{MatchedPath, Request};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Request duration histogram.
pub const HTTP_REQUEST_DURATION: &str = "ftl_http_request_duration_seconds";
/// Request counter.
pub const HTTP_REQUESTS_TOTAL: &str = "ftl_http_requests_total";
/// Number of ingress routes in the current table.
pub const INGRESS_ROUTES: &str = "ftl_ingress_routes";

const UNMATCHED_ENDPOINT: &str = "unmatched";

static PROMETHEUS_HANDLE: OnceLock<Result<PrometheusHandle, String>> = OnceLock::new();

/// Installs the global Prometheus recorder. Later calls return the same handle.
///
/// # Errors
///
/// Returns the exporter's error if another recorder was already installed.
pub fn init_metrics() -> Result<PrometheusHandle, String> {
    PROMETHEUS_HANDLE
        .get_or_init(|| {
            let handle = PrometheusBuilder::new()
                .install_recorder()
                .map_err(|e| format!("failed to install prometheus recorder: {e}"))?;
            describe_histogram!(HTTP_REQUEST_DURATION, "Duration of HTTP requests in seconds");
            describe_counter!(HTTP_REQUESTS_TOTAL, "Total number of HTTP requests");
            describe_gauge!(INGRESS_ROUTES, "Ingress routes in the current table");
            tracing::info!("prometheus metrics recorder initialized");
            Ok(handle)
        })
        .clone()
}

/// The global handle, if installed.
#[must_use]
pub fn prometheus_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().and_then(|h| h.as_ref().ok()).cloned()
}

/// Response extension naming the ingress route that served a request.
#[derive(Debug, Clone)]
pub struct IngressEndpoint(pub String);

fn endpoint_label(request: &Request) -> Option<String> {
    request
        .extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str().to_string())
}

/// Records duration and count of every request.
pub async fn metrics_middleware(request: Request, next: Next) -> Response {
    let start = Instant::now();
    let matched = endpoint_label(&request);
    let method = request.method().to_string();

    let response = next.run(request).await;

    let endpoint = matched
        .or_else(|| {
            response
                .extensions()
                .get::<IngressEndpoint>()
                .map(|e| e.0.clone())
        })
        .unwrap_or_else(|| UNMATCHED_ENDPOINT.to_string());
    let duration = start.elapsed().as_secs_f64();
    let labels = [
        ("endpoint", endpoint.clone()),
        ("method", method.clone()),
        ("status_class", status_class(response.status()).to_string()),
    ];
    histogram!(HTTP_REQUEST_DURATION, &labels).record(duration);
    counter!(HTTP_REQUESTS_TOTAL, &labels).increment(1);

    if duration > 1.0 {
        tracing::warn!(
            endpoint = %endpoint,
            method = %method,
            status = response.status().as_u16(),
            duration_secs = duration,
            "slow request"
        );
    }
    response
}

/// Publishes the size of the ingress table.
#[allow(clippy::cast_precision_loss)]
pub fn set_ingress_routes(count: usize) {
    gauge!(INGRESS_ROUTES).set(count as f64);
}

fn status_class(status: StatusCode) -> &'static str {
    match status.as_u16() {
        100..=199 => "1xx",
        200..=299 => "2xx",
        300..=399 => "3xx",
        400..=499 => "4xx",
        500..=599 => "5xx",
        _ => "unknown",
    }
}

/// `GET /metrics`.
pub async fn serve_metrics() -> impl IntoResponse {
    prometheus_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain; charset=utf-8")],
                "metrics not initialized".to_string(),
            )
        },
        |handle| {
            (
                StatusCode::OK,
                [("content-type", "text/plain; charset=utf-8")],
                handle.render(),
            )
        },
    )
}

#[cfg(test)]
mod tests {
    use axum::Router;
    use axum::body::Body;
    use axum::routing::get;
    use tower::ServiceExt;

    use super::*;

    #[test]
    fn status_classes() {
        assert_eq!(status_class(StatusCode::OK), "2xx");
        assert_eq!(status_class(StatusCode::NOT_FOUND), "4xx");
        assert_eq!(status_class(StatusCode::SERVICE_UNAVAILABLE), "5xx");
    }

    #[tokio::test]
    async fn requests_are_labelled_by_route() {
        let handle = init_metrics().unwrap();
        let app = Router::new()
            .route("/items/{id}", get(|| async { StatusCode::OK }))
            .fallback(|| async {
                let mut response = StatusCode::OK.into_response();
                response
                    .extensions_mut()
                    .insert(IngressEndpoint("GET /users/{name}".to_string()));
                response
            })
            .layer(axum::middleware::from_fn(metrics_middleware));

        for uri in ["/items/123", "/users/alice"] {
            let request = axum::http::Request::builder()
                .uri(uri)
                .body(Body::empty())
                .unwrap();
            app.clone().oneshot(request).await.unwrap();
        }

        let rendered = handle.render();
        assert!(rendered.contains("endpoint=\"/items/{id}\""));
        assert!(rendered.contains("endpoint=\"GET /users/{name}\""));
        assert!(!rendered.contains("/items/123"));
        assert!(!rendered.contains("alice"));
    }
}
