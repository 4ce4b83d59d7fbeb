//! The ingress fallback handler.

use std::sync::Arc;
use std::time::Instant;

use axum::body::to_bytes;
use axum::extract::{Request, State};
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use ftl_runtime::routing::{CallRequest, CallResponse};
use ftl_runtime::timeline::{IngressEvent, TimelineEvent};
use ftl_schema::Ref;

use super::request::IncomingRequest;
use super::{RouteMatch, build_request, build_response};
use crate::error::{ApiError, ApiResult};
use crate::metrics::IngressEndpoint;
use crate::server::AppState;

/// Largest request body accepted by the ingress.
pub const MAX_BODY_BYTES: usize = 8 * 1024 * 1024;

/// Serves any request not claimed by an explicit route.
///
/// Every request, matched or not, is recorded on the timeline.
pub async fn dispatch(State(state): State<Arc<AppState>>, request: Request) -> Response {
    let started = Instant::now();
    let start_time = Utc::now();
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    let (matched, outcome) = serve(&state, request).await;

    let (mut response, error) = match outcome {
        Ok(response) => (response, None),
        Err(err) => {
            let message = err.message().to_string();
            (err.into_response(), Some(message))
        }
    };
    if let Some(matched) = &matched {
        response
            .extensions_mut()
            .insert(IngressEndpoint(matched.route.label()));
    }

    state.timeline.publish(TimelineEvent::Ingress(IngressEvent {
        method: method.to_string(),
        path,
        verb: matched.map(|m| m.route.verb),
        start_time,
        duration: started.elapsed(),
        status: response.status().as_u16(),
        error,
    }));
    response
}

async fn serve(state: &AppState, request: Request) -> (Option<RouteMatch>, ApiResult<Response>) {
    let (schema, table) = state.routes.current();
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    let Some(matched) = table.lookup(method.as_str(), &path) else {
        tracing::debug!(method = %method, path = %path, "no ingress route");
        return (
            None,
            Err(ApiError::not_found(format!("no route for {method} {path}"))),
        );
    };
    let outcome = call(state, &schema, &matched, request).await;
    (Some(matched), outcome)
}

async fn call(
    state: &AppState,
    schema: &ftl_schema::Schema,
    matched: &RouteMatch,
    request: Request,
) -> ApiResult<Response> {
    let verb_ref: &Ref = &matched.route.verb;
    let verb = schema
        .resolve_verb(verb_ref)
        .ok_or_else(|| ApiError::not_found(format!("verb {verb_ref} not found")))?;

    let (parts, body) = request.into_parts();
    let body = to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|e| ApiError::bad_request(format!("read body: {e}")))?;
    let incoming = IncomingRequest {
        method: &parts.method,
        path: parts.uri.path(),
        path_parameters: &matched.path_parameters,
        query: parts.uri.query(),
        headers: &parts.headers,
        body: &body,
    };
    let payload = build_request(schema, &verb, &incoming).inspect_err(|e| {
        tracing::debug!(verb = %verb_ref, error = %e.message(), "rejected ingress request");
    })?;

    let response = state
        .client
        .call(CallRequest::new(verb_ref.clone(), payload))
        .await
        .inspect_err(|e| tracing::warn!(verb = %verb_ref, error = %e, "ingress call failed"))?;
    match response {
        CallResponse::Body(body) => build_response(schema, &verb, &body),
        CallResponse::Error { message } => {
            tracing::debug!(verb = %verb_ref, error = %message, "verb returned an error");
            Err(ApiError::verb_error(message))
        }
    }
}
