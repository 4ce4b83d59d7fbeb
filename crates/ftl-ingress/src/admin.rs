//! Admin endpoints for configuration and secrets.
//!
//! | Route | Action |
//! |---|---|
//! | `GET /admin/{role}?module=&include_values=` | list entries |
//! | `GET /admin/{role}/{ref}` | read one value |
//! | `PUT /admin/{role}/{ref}?provider=` | set from the JSON body |
//! | `DELETE /admin/{role}/{ref}?provider=` | unset |
//!
//! `{role}` is `config` or `secrets`; `{ref}` is `[module.]name`. Values in
//! transit are always JSON.

use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::http::header::CONTENT_TYPE;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use ftl_runtime::configuration::{ConfigRef, Configuration, InMemoryProvider, Manager, Role, Secrets};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ApiError, ApiResult};
use crate::server::AppState;

/// Provider used by writes that do not name one.
pub const DEFAULT_PROVIDER: &str = InMemoryProvider::SCHEME;

/// A role the admin API exposes.
pub trait AdminRole: Role {
    /// The manager serving this role.
    fn manager(state: &AppState) -> &Manager<Self>;
}

impl AdminRole for Configuration {
    fn manager(state: &AppState) -> &Manager<Self> {
        &state.configuration
    }
}

impl AdminRole for Secrets {
    fn manager(state: &AppState) -> &Manager<Self> {
        &state.secrets
    }
}

/// Admin routes, nested under `/admin`.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/config", get(list::<Configuration>))
        .route(
            "/config/{reference}",
            get(get_value::<Configuration>)
                .put(set_value::<Configuration>)
                .delete(unset_value::<Configuration>),
        )
        .route("/secrets", get(list::<Secrets>))
        .route(
            "/secrets/{reference}",
            get(get_value::<Secrets>)
                .put(set_value::<Secrets>)
                .delete(unset_value::<Secrets>),
        )
}

/// Query of the list endpoint.
#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    /// Only entries visible to this module (its own and globals).
    pub module: Option<String>,
    /// Inline each value.
    #[serde(default)]
    pub include_values: bool,
}

/// One listed entry.
#[derive(Debug, Serialize, Deserialize)]
pub struct ListEntry {
    /// `[module.]name`.
    #[serde(rename = "ref")]
    pub reference: String,
    /// Provider scheme holding the value.
    pub provider: String,
    /// The value, when requested.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

/// Query of the write endpoints.
#[derive(Debug, Default, Deserialize)]
pub struct WriteParams {
    /// Provider scheme.
    pub provider: Option<String>,
}

fn parse_ref(text: &str) -> ApiResult<ConfigRef> {
    ConfigRef::parse(text).map_err(|e| ApiError::bad_request(e.to_string()))
}

fn json_value(bytes: &[u8]) -> ApiResult<Value> {
    serde_json::from_slice(bytes).map_err(|e| ApiError::internal(format!("stored value is not JSON: {e}")))
}

async fn list<R: AdminRole>(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListParams>,
) -> ApiResult<Json<Vec<ListEntry>>> {
    let manager = R::manager(&state);
    let mut out = Vec::new();
    for entry in manager.list().await? {
        let visible = match (&params.module, &entry.reference.module) {
            (Some(wanted), Some(module)) => wanted == module,
            _ => true,
        };
        if !visible {
            continue;
        }
        let value = if params.include_values {
            Some(json_value(&manager.get_data(&entry.reference).await?)?)
        } else {
            None
        };
        out.push(ListEntry {
            reference: entry.reference.to_string(),
            provider: entry.accessor.scheme().to_string(),
            value,
        });
    }
    out.sort_by(|a, b| a.reference.cmp(&b.reference));
    Ok(Json(out))
}

async fn get_value<R: AdminRole>(
    State(state): State<Arc<AppState>>,
    Path(reference): Path<String>,
) -> ApiResult<Response> {
    let reference = parse_ref(&reference)?;
    let bytes = R::manager(&state).get_data(&reference).await?;
    Ok(([(CONTENT_TYPE, "application/json")], bytes).into_response())
}

async fn set_value<R: AdminRole>(
    State(state): State<Arc<AppState>>,
    Path(reference): Path<String>,
    Query(params): Query<WriteParams>,
    body: Bytes,
) -> ApiResult<StatusCode> {
    let reference = parse_ref(&reference)?;
    let provider = params.provider.as_deref().unwrap_or(DEFAULT_PROVIDER);
    R::manager(&state)
        .set_json(provider, &reference, &body)
        .await?;
    tracing::info!(%reference, provider = %provider, role = R::NAME, "admin set");
    Ok(StatusCode::NO_CONTENT)
}

async fn unset_value<R: AdminRole>(
    State(state): State<Arc<AppState>>,
    Path(reference): Path<String>,
    Query(params): Query<WriteParams>,
) -> ApiResult<StatusCode> {
    let reference = parse_ref(&reference)?;
    let manager = R::manager(&state);
    let provider = match params.provider {
        Some(provider) => provider,
        None => manager
            .list()
            .await?
            .into_iter()
            .find(|e| e.reference == reference)
            .map(|e| e.accessor.scheme().to_string())
            .ok_or_else(|| ApiError::not_found(format!("{} {reference} not found", R::NAME)))?,
    };
    manager.unset(&provider, &reference).await?;
    tracing::info!(%reference, provider = %provider, role = R::NAME, "admin unset");
    Ok(StatusCode::NO_CONTENT)
}
