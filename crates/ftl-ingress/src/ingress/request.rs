//! HTTP request to verb request transcoding.

use std::collections::BTreeMap;

use axum::http::{HeaderMap, Method};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::DateTime;
use ftl_schema::builtin::HTTP_REQUEST;
use ftl_schema::{Decl, Schema, Type, Verb};
use reqwest::Url;
use serde_json::{Map, Value, json};

use crate::error::{ApiError, ApiResult};

/// Query parameter holding the whole query as JSON.
pub const JSON_QUERY_PARAM: &str = "@json";

/// The parts of an HTTP request the verb sees.
#[derive(Debug, Clone)]
pub struct IncomingRequest<'a> {
    /// HTTP method.
    pub method: &'a Method,
    /// Request path, not percent-decoded.
    pub path: &'a str,
    /// Values bound by the matched route.
    pub path_parameters: &'a BTreeMap<String, String>,
    /// Raw query string.
    pub query: Option<&'a str>,
    /// Request headers.
    pub headers: &'a HeaderMap,
    /// Raw body.
    pub body: &'a [u8],
}

/// Builds the JSON request for `verb`.
///
/// Verbs taking `builtin.HttpRequest<Body, Path, Query>` receive the full
/// envelope; other verbs receive the decoded body alone.
///
/// # Errors
///
/// Returns a 400 [`ApiError`] when the request does not fit the verb's
/// declared types.
pub fn build_request(schema: &Schema, verb: &Verb, request: &IncomingRequest<'_>) -> ApiResult<Vec<u8>> {
    let lenient = verb.is_lenient();
    let value = match &verb.request {
        Type::Ref(r) if r.is_builtin(HTTP_REQUEST) => {
            let envelope = schema
                .resolve_data(r)
                .ok_or_else(|| ApiError::internal("builtin.HttpRequest is not declared"))?;
            let field_type = |name: &str| {
                envelope
                    .field(name)
                    .map_or(Type::Unit, |f| f.ty.clone())
            };
            let coder = Coder { schema, lenient };
            json!({
                "method": request.method.as_str(),
                "path": request.path,
                "pathParameters": coder.path_parameters(&field_type("pathParameters"), request.path_parameters)?,
                "query": coder.query(&field_type("query"), request.query)?,
                "headers": headers(request.headers),
                "body": coder.body(&field_type("body"), request.method, request.body)?,
            })
        }
        other => Coder { schema, lenient }.body(other, request.method, request.body)?,
    };
    serde_json::to_vec(&value).map_err(|e| ApiError::internal(format!("encode request: {e}")))
}

fn headers(headers: &HeaderMap) -> Value {
    let mut out: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (name, value) in headers {
        if let Ok(value) = value.to_str() {
            out.entry(name.as_str().to_string())
                .or_default()
                .push(value.to_string());
        }
    }
    json!(out)
}

struct Coder<'a> {
    schema: &'a Schema,
    lenient: bool,
}

impl Coder<'_> {
    fn body(&self, ty: &Type, method: &Method, body: &[u8]) -> ApiResult<Value> {
        match self.schema.resolve_alias(ty) {
            Type::Unit => {
                if (method == Method::GET || method == Method::HEAD) && !body.is_empty() {
                    return Err(ApiError::bad_request(format!(
                        "{method} request must not have a body"
                    )));
                }
                Ok(json!({}))
            }
            Type::Bytes => Ok(Value::String(STANDARD.encode(body))),
            Type::String => String::from_utf8(body.to_vec())
                .map(Value::String)
                .map_err(|_| ApiError::bad_request("body is not valid UTF-8")),
            Type::Optional { .. } if body.is_empty() => Ok(Value::Null),
            Type::Optional { inner } => self.body(&inner, method, body),
            Type::Ref(_) if body.is_empty() => {
                let value = json!({});
                self.check(ty, &value, "body")?;
                Ok(value)
            }
            _ => {
                let value: Value = serde_json::from_slice(body)
                    .map_err(|e| ApiError::bad_request(format!("body is not valid JSON: {e}")))?;
                self.check(ty, &value, "body")?;
                Ok(value)
            }
        }
    }

    fn path_parameters(&self, ty: &Type, params: &BTreeMap<String, String>) -> ApiResult<Value> {
        match self.schema.resolve_alias(ty) {
            Type::Unit => Ok(json!({})),
            Type::String => Ok(Value::String(
                params.values().next().cloned().unwrap_or_default(),
            )),
            resolved => {
                let value = self.object_from_pairs(
                    &resolved,
                    params.iter().map(|(k, v)| (k.clone(), v.clone())),
                    "path",
                )?;
                self.check(ty, &value, "path")?;
                Ok(value)
            }
        }
    }

    fn query(&self, ty: &Type, query: Option<&str>) -> ApiResult<Value> {
        let pairs = parse_query(query.unwrap_or_default());
        let resolved = self.schema.resolve_alias(ty);
        if matches!(resolved, Type::Unit) {
            return Ok(json!({}));
        }
        let json_query = pairs
            .iter()
            .rev()
            .find(|(k, _)| k == JSON_QUERY_PARAM)
            .map(|(_, raw)| raw.clone());
        let value = match json_query {
            Some(raw) => serde_json::from_str(&raw).map_err(|e| {
                ApiError::bad_request(format!("{JSON_QUERY_PARAM} query is not valid JSON: {e}"))
            })?,
            None => self.object_from_pairs(&resolved, pairs.into_iter(), "query")?,
        };
        self.check(ty, &value, "query")?;
        Ok(value)
    }

    /// Builds an object from string pairs, typed by `ty`'s value or field types.
    fn object_from_pairs(
        &self,
        ty: &Type,
        pairs: impl Iterator<Item = (String, String)>,
        what: &str,
    ) -> ApiResult<Value> {
        let mut out = Map::new();
        for (key, raw) in pairs {
            let target = match ty {
                Type::Map { value, .. } => Some((**value).clone()),
                Type::Ref(r) => self
                    .schema
                    .resolve_data(r)
                    .and_then(|d| d.fields.into_iter().find(|f| f.json_name() == key))
                    .map(|f| f.ty),
                _ => None,
            };
            let target = target.map(|t| self.schema.resolve_alias(t.unwrap_optional()));
            match target {
                Some(Type::Array { element }) => {
                    let item = scalar(&self.schema.resolve_alias(&element), &raw, what, &key)?;
                    match out.entry(key).or_insert_with(|| Value::Array(Vec::new())) {
                        Value::Array(items) => items.push(item),
                        other => *other = Value::Array(vec![item]),
                    }
                }
                Some(target) => {
                    let item = scalar(&target, &raw, what, &key)?;
                    out.insert(key, item);
                }
                None => {
                    out.insert(key, Value::String(raw));
                }
            }
        }
        Ok(Value::Object(out))
    }

    /// Checks `value` against `ty`, rejecting unknown data fields unless lenient.
    fn check(&self, ty: &Type, value: &Value, at: &str) -> ApiResult<()> {
        let mismatch = || ApiError::bad_request(format!("{at}: expected {ty}, got {value}"));
        match (self.schema.resolve_alias(ty), value) {
            (Type::Any | Type::Unit, _)
            | (Type::Optional { .. }, Value::Null)
            | (Type::Float, Value::Number(_))
            | (Type::Bool, Value::Bool(_))
            | (Type::String | Type::Bytes, Value::String(_)) => Ok(()),
            (Type::Time, Value::String(text)) => DateTime::parse_from_rfc3339(text)
                .map(|_| ())
                .map_err(|e| ApiError::bad_request(format!("{at}: invalid RFC 3339 time {text:?}: {e}"))),
            (Type::Int, Value::Number(n)) if n.is_i64() || n.is_u64() => Ok(()),
            (Type::Optional { inner }, _) => self.check(&inner, value, at),
            (Type::Array { element }, Value::Array(items)) => {
                for (idx, item) in items.iter().enumerate() {
                    self.check(&element, item, &format!("{at}[{idx}]"))?;
                }
                Ok(())
            }
            (Type::Map { value: inner, .. }, Value::Object(entries)) => {
                for (key, item) in entries {
                    self.check(&inner, item, &format!("{at}.{key}"))?;
                }
                Ok(())
            }
            (Type::Ref(r), _) => match self.schema.resolve(&r) {
                Some(Decl::Data(_)) => {
                    let Value::Object(entries) = value else {
                        return Err(mismatch());
                    };
                    let Some(data) = self.schema.resolve_data(&r) else {
                        return Err(mismatch());
                    };
                    for (key, item) in entries {
                        match data.fields.iter().find(|f| f.json_name() == key) {
                            Some(field) => self.check(&field.ty, item, &format!("{at}.{key}"))?,
                            None if self.lenient => {}
                            None => {
                                return Err(ApiError::bad_request(format!(
                                    "{at}: unknown field {key:?} for {}",
                                    data.name
                                )));
                            }
                        }
                    }
                    let missing = data
                        .fields
                        .iter()
                        .find(|f| !may_omit(&f.ty) && !entries.contains_key(f.json_name()));
                    match missing {
                        Some(field) => Err(ApiError::bad_request(format!(
                            "{at}.{} is required",
                            field.json_name()
                        ))),
                        None => Ok(()),
                    }
                }
                Some(_) => Ok(()),
                None => Err(ApiError::bad_request(format!("{at}: unknown type {r}"))),
            },
            _ => Err(mismatch()),
        }
    }
}

/// Field types that may be left out of a JSON object.
fn may_omit(ty: &Type) -> bool {
    matches!(
        ty,
        Type::Optional { .. }
            | Type::Any
            | Type::Array { .. }
            | Type::Map { .. }
            | Type::Bytes
            | Type::Unit
    )
}

fn scalar(ty: &Type, raw: &str, what: &str, key: &str) -> ApiResult<Value> {
    let invalid = || ApiError::bad_request(format!("{what} parameter {key:?}: expected {ty}, got {raw:?}"));
    match ty {
        Type::Int => raw.parse::<i64>().map(Value::from).map_err(|_| invalid()),
        Type::Float => raw
            .parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number)
            .ok_or_else(invalid),
        Type::Bool => raw.parse::<bool>().map(Value::Bool).map_err(|_| invalid()),
        _ => Ok(Value::String(raw.to_string())),
    }
}

/// Splits and percent-decodes a query string.
fn parse_query(query: &str) -> Vec<(String, String)> {
    if query.is_empty() {
        return Vec::new();
    }
    Url::parse(&format!("http://ingress/?{query}"))
        .map(|url| {
            url.query_pairs()
                .map(|(k, v)| (k.into_owned(), v.into_owned()))
                .collect()
        })
        .unwrap_or_default()
}
