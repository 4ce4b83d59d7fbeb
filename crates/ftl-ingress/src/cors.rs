//! CORS handling for the ingress.
//!
//! Only active when at least one origin is configured. A preflight is answered
//! by echoing the origin, method and headers it asked for, and only when the
//! origin and every requested header are on the allow lists. Otherwise the
//! preflight is refused with 403.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::header::{
    ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN,
    ACCESS_CONTROL_REQUEST_HEADERS, ACCESS_CONTROL_REQUEST_METHOD, ORIGIN, VARY,
};
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::config::CorsConfig;
use crate::error::ApiError;

/// Allow lists in matchable form.
#[derive(Debug, Clone, Default)]
pub struct CorsPolicy {
    any_origin: bool,
    origins: Vec<String>,
    headers: Vec<String>,
}

impl CorsPolicy {
    /// Builds the policy from configuration.
    #[must_use]
    pub fn new(config: &CorsConfig) -> Self {
        Self {
            any_origin: config.allow_origins.iter().any(|o| o == "*"),
            origins: config.allow_origins.clone(),
            headers: config
                .allow_headers
                .iter()
                .map(|h| h.to_ascii_lowercase())
                .collect(),
        }
    }

    /// Whether any origin is configured.
    #[must_use]
    pub fn enabled(&self) -> bool {
        self.any_origin || !self.origins.is_empty()
    }

    /// Whether `origin` may call the ingress.
    #[must_use]
    pub fn allows_origin(&self, origin: &str) -> bool {
        self.any_origin || self.origins.iter().any(|o| o == origin)
    }

    /// Whether every header in the comma-separated `requested` list is allowed.
    #[must_use]
    pub fn allows_headers(&self, requested: &str) -> bool {
        requested
            .split(',')
            .map(str::trim)
            .filter(|h| !h.is_empty())
            .all(|h| self.headers.iter().any(|allowed| allowed.eq_ignore_ascii_case(h)))
    }
}

fn header<'a>(headers: &'a HeaderMap, name: &axum::http::HeaderName) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Answers preflights and tags responses to allowed origins.
pub async fn cors_middleware(
    State(policy): State<Arc<CorsPolicy>>,
    request: Request,
    next: Next,
) -> Response {
    if !policy.enabled() {
        return next.run(request).await;
    }
    let Some(origin) = header(request.headers(), &ORIGIN).map(str::to_string) else {
        return next.run(request).await;
    };

    let requested_method = header(request.headers(), &ACCESS_CONTROL_REQUEST_METHOD);
    if request.method() == Method::OPTIONS && requested_method.is_some() {
        return preflight(&policy, &origin, request.headers());
    }

    let allowed = policy.allows_origin(&origin);
    let mut response = next.run(request).await;
    if allowed {
        if let Ok(value) = HeaderValue::from_str(&origin) {
            response
                .headers_mut()
                .insert(ACCESS_CONTROL_ALLOW_ORIGIN, value);
            response
                .headers_mut()
                .append(VARY, HeaderValue::from_static("Origin"));
        }
    }
    response
}

fn preflight(policy: &CorsPolicy, origin: &str, headers: &HeaderMap) -> Response {
    let method = header(headers, &ACCESS_CONTROL_REQUEST_METHOD).unwrap_or_default();
    let requested_headers = header(headers, &ACCESS_CONTROL_REQUEST_HEADERS).unwrap_or_default();

    if !policy.allows_origin(origin) || !policy.allows_headers(requested_headers) {
        tracing::debug!(origin, headers = requested_headers, "refused CORS preflight");
        return ApiError::forbidden("CORS preflight not allowed").into_response();
    }

    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::NO_CONTENT;
    let out = response.headers_mut();
    for (name, value) in [
        (ACCESS_CONTROL_ALLOW_ORIGIN, origin),
        (ACCESS_CONTROL_ALLOW_METHODS, method),
        (ACCESS_CONTROL_ALLOW_HEADERS, requested_headers),
    ] {
        if value.is_empty() {
            continue;
        }
        if let Ok(value) = HeaderValue::from_str(value) {
            out.insert(name, value);
        }
    }
    out.insert(VARY, HeaderValue::from_static("Origin"));
    response
}
