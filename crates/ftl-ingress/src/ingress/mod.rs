//! HTTP ingress: route table derived from the schema and verb dispatch.
//!
//! Every verb carrying `+ingress http METHOD /path` contributes one route.
//! Matching splits the request path and the pattern on `/`; both must have
//! the same number of segments, literal segments compare by equality and
//! `{name}` segments bind a path parameter. When several routes match, one is
//! picked uniformly at random.

mod handler;
mod request;
mod response;

use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use ftl_runtime::fabric::SchemaView;
use ftl_schema::metadata::render_ingress_path;
use ftl_schema::{IngressPathComponent, Ref, Schema};
use percent_encoding::percent_decode_str;
use rand::seq::IndexedRandom;

pub use handler::{MAX_BODY_BYTES, dispatch};
pub use request::{IncomingRequest, JSON_QUERY_PARAM, build_request};
pub use response::build_response;

/// One ingress route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngressRoute {
    /// Upper-case HTTP method.
    pub method: String,
    /// Path pattern.
    pub path: Vec<IngressPathComponent>,
    /// The verb serving the route.
    pub verb: Ref,
}

impl IngressRoute {
    /// `METHOD /pattern`, used as a metrics label.
    #[must_use]
    pub fn label(&self) -> String {
        format!("{} {}", self.method, render_ingress_path(&self.path))
    }

    /// Binds `segments` against the pattern, or `None` if they do not match.
    #[must_use]
    pub fn bind(&self, segments: &[&str]) -> Option<BTreeMap<String, String>> {
        if segments.len() != self.path.len() {
            return None;
        }
        let mut params = BTreeMap::new();
        for (component, segment) in self.path.iter().zip(segments) {
            match component {
                IngressPathComponent::Literal { text } if text == segment => {}
                IngressPathComponent::Literal { .. } => return None,
                IngressPathComponent::Parameter { name } => {
                    params.insert(name.clone(), (*segment).to_string());
                }
            }
        }
        Some(params)
    }
}

/// A matched route with its bound parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteMatch {
    /// The route.
    pub route: IngressRoute,
    /// Values bound by `{name}` segments.
    pub path_parameters: BTreeMap<String, String>,
}

fn split_path(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

/// Ingress routes keyed by method.
#[derive(Debug, Default)]
pub struct IngressTable {
    by_method: HashMap<String, Vec<IngressRoute>>,
}

impl IngressTable {
    /// Collects the routes of every verb in `schema`.
    #[must_use]
    pub fn from_schema(schema: &Schema) -> Self {
        let mut by_method: HashMap<String, Vec<IngressRoute>> = HashMap::new();
        for module in &schema.modules {
            for verb in module.verbs() {
                if let Some((method, path)) = verb.ingress() {
                    let method = method.to_ascii_uppercase();
                    by_method.entry(method.clone()).or_default().push(IngressRoute {
                        method,
                        path: path.to_vec(),
                        verb: Ref::new(&module.name, &verb.name),
                    });
                }
            }
        }
        Self { by_method }
    }

    /// Number of routes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_method.values().map(Vec::len).sum()
    }

    /// Whether the table has no routes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every route matching `method` and `path`.
    #[must_use]
    pub fn matches(&self, method: &str, path: &str) -> Vec<RouteMatch> {
        let decoded: Vec<Cow<'_, str>> = split_path(path)
            .into_iter()
            .map(|segment| percent_decode_str(segment).decode_utf8_lossy())
            .collect();
        let segments: Vec<&str> = decoded.iter().map(AsRef::as_ref).collect();
        self.by_method
            .get(&method.to_ascii_uppercase())
            .into_iter()
            .flatten()
            .filter_map(|route| {
                route.bind(&segments).map(|path_parameters| RouteMatch {
                    route: route.clone(),
                    path_parameters,
                })
            })
            .collect()
    }

    /// One matching route, chosen at random among all matches.
    #[must_use]
    pub fn lookup(&self, method: &str, path: &str) -> Option<RouteMatch> {
        self.matches(method, path).choose(&mut rand::rng()).cloned()
    }
}

type Cached = (Arc<Schema>, Arc<IngressTable>);

/// The ingress table of a [`SchemaView`], rebuilt whenever the view's
/// snapshot changes.
#[derive(Debug, Clone)]
pub struct IngressRoutes {
    view: SchemaView,
    cached: Arc<RwLock<Option<Cached>>>,
}

impl IngressRoutes {
    /// Follows `view`.
    #[must_use]
    pub fn new(view: SchemaView) -> Self {
        Self {
            view,
            cached: Arc::new(RwLock::new(None)),
        }
    }

    /// The followed view.
    #[must_use]
    pub fn view(&self) -> &SchemaView {
        &self.view
    }

    /// The current snapshot and its table.
    #[must_use]
    pub fn current(&self) -> (Arc<Schema>, Arc<IngressTable>) {
        let schema = self.view.schema();
        if let Ok(guard) = self.cached.read() {
            if let Some((held, table)) = guard.as_ref() {
                if Arc::ptr_eq(held, &schema) {
                    return (schema, Arc::clone(table));
                }
            }
        }
        let table = Arc::new(IngressTable::from_schema(&schema));
        crate::metrics::set_ingress_routes(table.len());
        tracing::debug!(routes = table.len(), "ingress table rebuilt");
        if let Ok(mut guard) = self.cached.write() {
            *guard = Some((Arc::clone(&schema), Arc::clone(&table)));
        }
        (schema, table)
    }
}

#[cfg(test)]
mod tests {
    use ftl_schema::builtin::{http_request, http_response};
    use ftl_schema::metadata::parse_ingress_path;
    use ftl_schema::{Decl, Metadata, Module, Type, Verb};
    use proptest::prelude::*;

    use super::*;

    fn route(method: &str, path: &str) -> IngressRoute {
        IngressRoute {
            method: method.to_string(),
            path: parse_ingress_path(path),
            verb: Ref::new("http", "verb"),
        }
    }

    fn ingress_verb(name: &str, method: &str, path: &str) -> Decl {
        Decl::Verb(
            Verb::new(
                name,
                http_request(Type::Unit, Type::Unit, Type::Unit),
                http_response(Type::String, Type::String),
            )
            .with_metadata(Metadata::ingress(method, path)),
        )
    }

    #[test]
    fn binding_rules() {
        let users = route("GET", "/users/{id}/posts");
        assert_eq!(
            users.bind(&["users", "7", "posts"]),
            Some([("id".to_string(), "7".to_string())].into())
        );
        assert_eq!(users.bind(&["users", "7"]), None);
        assert_eq!(users.bind(&["users", "7", "posts", "x"]), None);
        assert_eq!(users.bind(&["people", "7", "posts"]), None);
        assert_eq!(route("GET", "/").bind(&[]), Some(BTreeMap::new()));
    }

    #[test]
    fn table_is_keyed_by_method() {
        let schema = Schema::from_modules([Module::new("http")
            .with_decl(ingress_verb("get", "GET", "/users/{id}"))
            .with_decl(ingress_verb("post", "post", "/users"))]);
        let table = IngressTable::from_schema(&schema);
        assert_eq!(table.len(), 2);

        let found = table.lookup("GET", "/users/alice").unwrap();
        assert_eq!(found.route.verb, Ref::new("http", "get"));
        assert_eq!(found.path_parameters["id"], "alice");
        assert_eq!(found.route.label(), "GET /users/{id}");

        assert!(table.lookup("POST", "/users/alice").is_none());
        assert_eq!(
            table.lookup("POST", "/users").unwrap().route.verb,
            Ref::new("http", "post")
        );
        assert!(table.lookup("DELETE", "/users").is_none());
    }

    #[test]
    fn ambiguous_routes_pick_among_matches() {
        let schema = Schema::from_modules([Module::new("http")
            .with_decl(ingress_verb("literal", "GET", "/users/me"))
            .with_decl(ingress_verb("param", "GET", "/users/{id}"))]);
        let table = IngressTable::from_schema(&schema);
        assert_eq!(table.matches("GET", "/users/me").len(), 2);
        for _ in 0..20 {
            let name = table.lookup("GET", "/users/me").unwrap().route.verb.name;
            assert!(name == "literal" || name == "param");
        }
        assert_eq!(table.matches("GET", "/users/you").len(), 1);
    }

    #[test]
    fn path_segments_are_percent_decoded() {
        let schema = Schema::from_modules([Module::new("http")
            .with_decl(ingress_verb("get", "GET", "/users/{id}"))
            .with_decl(ingress_verb("me", "GET", "/me/profile"))]);
        let table = IngressTable::from_schema(&schema);

        let found = table.lookup("GET", "/users/a%20b").unwrap();
        assert_eq!(found.path_parameters["id"], "a b");
        let slash = table.lookup("GET", "/users/a%2Fb").unwrap();
        assert_eq!(slash.path_parameters["id"], "a/b");
        assert_eq!(
            table.lookup("GET", "/%6De/profile").unwrap().route.verb,
            Ref::new("http", "me")
        );
    }

    #[test]
    fn routes_follow_the_view() {
        let view = SchemaView::new();
        let routes = IngressRoutes::new(view.clone());
        let (_, table) = routes.current();
        assert!(table.is_empty());
        let (_, again) = routes.current();
        assert!(Arc::ptr_eq(&table, &again));
    }

    proptest! {
        #[test]
        fn bind_requires_equal_segment_counts(
            pattern in proptest::collection::vec("[a-z]{1,4}|\\{[a-z]{1,4}\\}", 0..5),
            path in proptest::collection::vec("[a-z]{1,4}", 0..5),
        ) {
            let route = route("GET", &format!("/{}", pattern.join("/")));
            let segments: Vec<&str> = path.iter().map(String::as_str).collect();
            let bound = route.bind(&segments);
            if pattern.len() != path.len() {
                prop_assert!(bound.is_none());
            } else {
                let literal_ok = pattern.iter().zip(&path).all(|(p, s)| p.starts_with('{') || p == s);
                prop_assert_eq!(bound.is_some(), literal_ok);
            }
        }
    }
}
