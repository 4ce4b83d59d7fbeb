//! Verb response to HTTP response transcoding.

use axum::body::Body;
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum::response::Response;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use ftl_schema::builtin::HTTP_RESPONSE;
use ftl_schema::{Schema, Type, Verb};
use serde_json::Value;

use crate::error::{ApiError, ApiResult};

const JSON_CONTENT_TYPE: &str = "application/json; charset=utf-8";
const TEXT_CONTENT_TYPE: &str = "text/plain; charset=utf-8";
const BYTES_CONTENT_TYPE: &str = "application/octet-stream";

/// Writes the verb's JSON response as an HTTP response.
///
/// Verbs returning `builtin.HttpResponse<Body, Error>` control the status,
/// headers and body. Any other response is written as JSON with status 200.
///
/// # Errors
///
/// Returns a 500 [`ApiError`] when the response does not fit the declared
/// envelope.
pub fn build_response(schema: &Schema, verb: &Verb, body: &[u8]) -> ApiResult<Response> {
    let Type::Ref(r) = &verb.response else {
        return raw_json(body);
    };
    if !r.is_builtin(HTTP_RESPONSE) {
        return raw_json(body);
    }
    let envelope = schema
        .resolve_data(r)
        .ok_or_else(|| ApiError::internal("builtin.HttpResponse is not declared"))?;
    let field_type = |name: &str| {
        envelope
            .field(name)
            .map_or(Type::Any, |f| f.ty.unwrap_optional().clone())
    };

    let value: Value = serde_json::from_slice(body)
        .map_err(|e| ApiError::internal(format!("verb response is not valid JSON: {e}")))?;
    let Value::Object(fields) = value else {
        return Err(ApiError::internal("verb response is not an HttpResponse object"));
    };
    let present = |name: &str| fields.get(name).filter(|v| !v.is_null());

    let (default_status, payload) = match (present("body"), present("error")) {
        (Some(_), Some(_)) => {
            return Err(ApiError::internal(
                "HttpResponse must not carry both body and error",
            ));
        }
        (Some(body), None) => (StatusCode::OK, Some((body, field_type("body")))),
        (None, Some(error)) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Some((error, field_type("error"))),
        ),
        (None, None) => (StatusCode::OK, None),
    };

    let status = match present("status") {
        None => default_status,
        Some(status) => status
            .as_u64()
            .and_then(|s| u16::try_from(s).ok())
            .and_then(|s| StatusCode::from_u16(s).ok())
            .ok_or_else(|| ApiError::internal(format!("invalid HttpResponse status {status}")))?,
    };

    let (bytes, content_type) = match payload {
        Some((value, ty)) => encode_body(schema, &ty, value)?,
        None => (Vec::new(), None),
    };

    let mut response = Response::new(Body::from(bytes));
    *response.status_mut() = status;
    if let Some(headers) = present("headers") {
        copy_headers(&mut response, headers)?;
    }
    if let Some(content_type) = content_type {
        if !response.headers().contains_key(CONTENT_TYPE) {
            response
                .headers_mut()
                .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
        }
    }
    Ok(response)
}

fn raw_json(body: &[u8]) -> ApiResult<Response> {
    let mut response = Response::new(Body::from(body.to_vec()));
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(JSON_CONTENT_TYPE));
    Ok(response)
}

fn encode_body(
    schema: &Schema,
    ty: &Type,
    value: &Value,
) -> ApiResult<(Vec<u8>, Option<&'static str>)> {
    match schema.resolve_alias(ty) {
        Type::Unit => Ok((Vec::new(), None)),
        Type::Bytes => {
            let encoded = value
                .as_str()
                .ok_or_else(|| ApiError::internal("Bytes body must be a base64 string"))?;
            let bytes = STANDARD
                .decode(encoded)
                .map_err(|e| ApiError::internal(format!("Bytes body is not base64: {e}")))?;
            Ok((bytes, Some(BYTES_CONTENT_TYPE)))
        }
        Type::String => match value {
            Value::String(s) => Ok((s.clone().into_bytes(), Some(TEXT_CONTENT_TYPE))),
            other => Ok((other.to_string().into_bytes(), Some(TEXT_CONTENT_TYPE))),
        },
        Type::Int | Type::Float | Type::Bool => {
            Ok((value.to_string().into_bytes(), Some(TEXT_CONTENT_TYPE)))
        }
        _ => serde_json::to_vec(value)
            .map(|bytes| (bytes, Some(JSON_CONTENT_TYPE)))
            .map_err(|e| ApiError::internal(format!("encode response body: {e}"))),
    }
}

fn copy_headers(response: &mut Response, headers: &Value) -> ApiResult<()> {
    let Value::Object(headers) = headers else {
        return Err(ApiError::internal("HttpResponse headers must be an object"));
    };
    for (name, values) in headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| ApiError::internal(format!("invalid header name {name:?}: {e}")))?;
        let values: Vec<&Value> = match values {
            Value::Array(values) => values.iter().collect(),
            single => vec![single],
        };
        for value in values {
            let text = value
                .as_str()
                .ok_or_else(|| ApiError::internal(format!("header {name} must be a string")))?;
            let value = HeaderValue::from_str(text)
                .map_err(|e| ApiError::internal(format!("invalid value for header {name}: {e}")))?;
            response.headers_mut().append(name.clone(), value);
        }
    }
    Ok(())
}
