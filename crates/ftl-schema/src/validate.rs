//! Schema validation.
//!
//! [`validate_module`] checks a module in isolation; references into other
//! modules are only checked by [`validate_schema`], which also enforces
//! cross-module rules: unique ingress routes and an acyclic dependency graph.
//!
//! Validation collects every violation instead of stopping at the first.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Duration;

use ftl_core::Pattern;

use crate::builtin::{self, BUILTIN_MODULE};
use crate::decl::{Data, Decl, Verb};
use crate::error::{Error, Result, ValidationError};
use crate::graph::DependencyGraph;
use crate::metadata::{IngressPathComponent, Metadata};
use crate::module::Module;
use crate::schema::Schema;
use crate::types::{PRIMITIVE_NAMES, Ref, Type};
use crate::visit::{self, Node};

/// Default minimum retry backoff.
pub const DEFAULT_MIN_BACKOFF: &str = "1s";
/// Default maximum retry backoff.
pub const DEFAULT_MAX_BACKOFF: &str = "1h";
/// Upper bound for any retry backoff.
pub const MAX_BACKOFF: Duration = Duration::from_secs(24 * 60 * 60);

const HTTP_METHODS: [&str; 7] = ["GET", "HEAD", "POST", "PUT", "DELETE", "PATCH", "OPTIONS"];

/// Returns `true` if `name` matches `^[A-Za-z_][A-Za-z0-9_]*$`.
#[must_use]
pub fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Parses a retry duration such as `1h30m` or `45s`.
///
/// Units are `d`, `h`, `m`, `s`, each at most once and in that order.
///
/// # Errors
///
/// Returns a description of the problem for empty or malformed input.
pub fn parse_retry_duration(text: &str) -> std::result::Result<Duration, String> {
    const UNITS: [(char, u64); 4] = [('d', 86_400), ('h', 3_600), ('m', 60), ('s', 1)];
    if text.is_empty() {
        return Err("duration must not be empty".to_string());
    }
    let mut total: u64 = 0;
    let mut next_unit = 0;
    let mut digits = String::new();
    for c in text.chars() {
        if c.is_ascii_digit() {
            digits.push(c);
            continue;
        }
        let Some(pos) = UNITS.iter().position(|(unit, _)| *unit == c) else {
            return Err(format!("unknown unit {c:?} in duration {text:?}"));
        };
        if pos < next_unit {
            return Err(format!("units out of order in duration {text:?}"));
        }
        if digits.is_empty() {
            return Err(format!("missing number before {c:?} in duration {text:?}"));
        }
        let value: u64 = digits
            .parse()
            .map_err(|e| format!("invalid number in duration {text:?}: {e}"))?;
        total = value
            .checked_mul(UNITS[pos].1)
            .and_then(|secs| total.checked_add(secs))
            .ok_or_else(|| format!("duration {text:?} overflows"))?;
        digits.clear();
        next_unit = pos + 1;
    }
    if !digits.is_empty() {
        return Err(format!("missing unit in duration {text:?}"));
    }
    Ok(Duration::from_secs(total))
}

/// Validates a single module in isolation.
///
/// # Errors
///
/// Returns [`Error::Validation`] listing every violation.
pub fn validate_module(module: &Module) -> Result<()> {
    let mut errors = module_errors(module, None);
    errors.extend(ingress_collisions(std::iter::once(module)));
    Error::check(errors)
}

/// Validates every module of a schema plus the cross-module rules.
///
/// # Errors
///
/// Returns [`Error::Validation`] listing every violation.
pub fn validate_schema(schema: &Schema) -> Result<()> {
    let mut errors = Vec::new();
    let mut seen = HashSet::new();
    for module in &schema.modules {
        if !seen.insert(module.name.as_str()) {
            errors.push(ValidationError::duplicate(format!(
                "duplicate module {:?}",
                module.name
            )));
        }
        errors.extend(module_errors(module, Some(schema)));
    }
    errors.extend(ingress_collisions(schema.modules.iter()));
    for cycle in DependencyGraph::from_schema(schema).cycles() {
        errors.push(ValidationError::precondition(format!(
            "found cycle in dependencies: {}",
            cycle.join(" -> ")
        )));
    }
    if !errors.is_empty() {
        tracing::debug!(violations = errors.len(), "schema failed validation");
    }
    Error::check(errors)
}

/// Resolution context: the module under validation plus, optionally, the
/// schema it belongs to.
struct Scope<'a> {
    module: &'a Module,
    schema: Option<&'a Schema>,
}

enum Lookup {
    Found(Decl),
    Missing,
    /// The reference points outside the module and no schema is available.
    Unknown,
}

impl Scope<'_> {
    fn lookup(&self, r: &Ref) -> Lookup {
        let r = r.qualified(&self.module.name);
        if r.module == self.module.name {
            return self
                .module
                .decl(&r.name)
                .cloned()
                .map_or(Lookup::Missing, Lookup::Found);
        }
        if r.module == BUILTIN_MODULE {
            return builtin::builtins()
                .decl(&r.name)
                .cloned()
                .map_or(Lookup::Missing, Lookup::Found);
        }
        match self.schema {
            Some(schema) => schema.resolve(&r).map_or(Lookup::Missing, Lookup::Found),
            None => Lookup::Unknown,
        }
    }

    fn data(&self, r: &Ref) -> Option<Data> {
        match self.lookup(r) {
            Lookup::Found(Decl::Data(d)) => Some(d.monomorphise(&r.type_parameters)),
            _ => None,
        }
    }

    fn qualify(&self, ty: &Type) -> Type {
        match ty {
            Type::Ref(r) => Type::Ref(Ref {
                module: r.qualified(&self.module.name).module,
                name: r.name.clone(),
                type_parameters: r.type_parameters.iter().map(|t| self.qualify(t)).collect(),
            }),
            Type::Array { element } => Type::array(self.qualify(element)),
            Type::Map { key, value } => Type::map(self.qualify(key), self.qualify(value)),
            Type::Optional { inner } => Type::optional(self.qualify(inner)),
            other => other.clone(),
        }
    }
}

fn module_errors(module: &Module, schema: Option<&Schema>) -> Vec<ValidationError> {
    let scope = Scope { module, schema };
    let mut errors = Vec::new();

    if !is_valid_name(&module.name) {
        errors.push(ValidationError::invalid(format!(
            "invalid module name {:?}",
            module.name
        )));
    }
    if module.name == BUILTIN_MODULE && !module.builtin {
        errors.push(ValidationError::invalid(format!(
            "module name {BUILTIN_MODULE:?} is reserved"
        )));
    }

    let mut seen: HashSet<(&str, &str)> = HashSet::new();
    for decl in &module.decls {
        let name = decl.name();
        let at = format!("{}.{name}", module.name);
        if !is_valid_name(name) {
            errors.push(ValidationError::invalid(format!(
                "{at}: invalid {} name {name:?}",
                decl.kind_name()
            )));
        }
        if PRIMITIVE_NAMES.contains(&name) {
            errors.push(ValidationError::invalid(format!(
                "{at}: {name:?} is a reserved type name"
            )));
        }
        if !seen.insert((decl.kind_name(), name)) {
            errors.push(ValidationError::duplicate(format!(
                "{at}: duplicate {} {name:?}",
                decl.kind_name()
            )));
        }
        match decl {
            Decl::Verb(verb) => errors.extend(verb_errors(&scope, verb)),
            Decl::Data(data) => {
                errors.extend(allowed_metadata(&at, &data.metadata, |m| {
                    matches!(m, Metadata::TypeMap { .. })
                }));
                let mut params = HashSet::new();
                for param in &data.type_parameters {
                    if !is_valid_name(param) || !params.insert(param) {
                        errors.push(ValidationError::invalid(format!(
                            "{at}: invalid or duplicate type parameter {param:?}"
                        )));
                    }
                }
                let mut fields = HashSet::new();
                for field in &data.fields {
                    if !fields.insert(field.json_name()) {
                        errors.push(ValidationError::duplicate(format!(
                            "{at}: duplicate field {:?}",
                            field.json_name()
                        )));
                    }
                    errors.extend(allowed_metadata(
                        &format!("{at}.{}", field.name),
                        &field.metadata,
                        |m| matches!(m, Metadata::Alias { .. }),
                    ));
                }
            }
            Decl::TypeAlias(alias) => {
                errors.extend(allowed_metadata(&at, &alias.metadata, |m| {
                    matches!(m, Metadata::TypeMap { .. })
                }));
            }
            Decl::Database(db) => {
                errors.extend(allowed_metadata(&at, &db.metadata, |m| {
                    matches!(m, Metadata::SqlMigration { .. })
                }));
            }
            Decl::Topic(topic) => {
                if !topic.name.starts_with(|c: char| c.is_ascii_lowercase()) {
                    errors.push(ValidationError::invalid(format!(
                        "{at}: topic names must start with a lower-case letter"
                    )));
                }
            }
            Decl::Enum(e) => {
                let mut variants = HashSet::new();
                for variant in &e.variants {
                    if !variants.insert(variant.name.as_str()) {
                        errors.push(ValidationError::duplicate(format!(
                            "{at}: duplicate variant {:?}",
                            variant.name
                        )));
                    }
                }
            }
            Decl::Config(_) | Decl::Secret(_) => {}
        }
    }

    errors.extend(type_ref_errors(&scope));
    errors
}

fn allowed_metadata(
    at: &str,
    metadata: &[Metadata],
    allowed: impl Fn(&Metadata) -> bool,
) -> Vec<ValidationError> {
    metadata
        .iter()
        .filter(|m| !allowed(m))
        .map(|m| {
            ValidationError::invalid(format!("{at}: metadata {} is not allowed here", m.kind_name()))
        })
        .collect()
}

/// Every type reference must resolve to a type declaration; references
/// into other modules must be exported.
fn type_ref_errors(scope: &Scope<'_>) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    let mut params: &[String] = &[];
    let mut at = String::new();
    visit::walk(scope.module, &mut |node| match node {
        Node::Decl(decl) => {
            at = format!("{}.{}", scope.module.name, decl.name());
            params = match decl {
                Decl::Data(d) => d.type_parameters.as_slice(),
                _ => &[],
            };
        }
        Node::Type(Type::Ref(r)) => {
            if r.module.is_empty() && params.contains(&r.name) {
                return;
            }
            let external = !r.module.is_empty() && r.module != scope.module.name;
            match scope.lookup(r) {
                Lookup::Found(Decl::Data(d)) => {
                    if d.type_parameters.len() != r.type_parameters.len() {
                        errors.push(ValidationError::invalid(format!(
                            "{at}: {r} expects {} type parameters, found {}",
                            d.type_parameters.len(),
                            r.type_parameters.len()
                        )));
                    }
                    if external && r.module != BUILTIN_MODULE && !d.export {
                        errors.push(ValidationError::precondition(format!(
                            "{at}: {r} is not exported"
                        )));
                    }
                }
                Lookup::Found(decl @ (Decl::Enum(_) | Decl::TypeAlias(_))) => {
                    if external && !decl.is_exported() {
                        errors.push(ValidationError::precondition(format!(
                            "{at}: {r} is not exported"
                        )));
                    }
                }
                Lookup::Found(other) => errors.push(ValidationError::invalid(format!(
                    "{at}: {r} refers to a {}, not a type",
                    other.kind_name()
                ))),
                Lookup::Missing => errors.push(ValidationError::invalid(format!(
                    "{at}: unknown reference {r}"
                ))),
                Lookup::Unknown => {}
            }
        }
        _ => {}
    });
    errors
}

fn verb_errors(scope: &Scope<'_>, verb: &Verb) -> Vec<ValidationError> {
    let at = format!("{}.{}", scope.module.name, verb.name);
    let mut errors = Vec::new();

    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for meta in &verb.metadata {
        *counts.entry(meta.kind_name()).or_default() += 1;
    }
    for (kind, count) in counts {
        if count > 1 && kind != "subscribe" {
            errors.push(ValidationError::invalid(format!(
                "{at}: verb can not have multiple instances of {kind}"
            )));
        }
    }

    let is_subscriber = verb
        .metadata
        .iter()
        .any(|m| matches!(m, Metadata::Subscriber { .. }));

    for meta in &verb.metadata {
        match meta {
            Metadata::CronJob { cron } => {
                if let Err(e) = Pattern::parse(cron) {
                    errors.push(ValidationError::invalid(format!("{at}: {e}")));
                }
                if !verb.request.is_unit() || !verb.response.is_unit() {
                    errors.push(ValidationError::precondition(format!(
                        "{at}: cron job verbs must have Unit request and response, found {}",
                        describe_signature(verb)
                    )));
                }
            }
            Metadata::Ingress {
                ingress_type,
                method,
                path,
            } => {
                if ingress_type != "http" {
                    errors.push(ValidationError::invalid(format!(
                        "{at}: unsupported ingress type {ingress_type:?}"
                    )));
                }
                errors.extend(ingress_errors(scope, &at, verb, method, path));
            }
            Metadata::Subscriber { topic, .. } => {
                errors.extend(subscriber_errors(scope, &at, verb, topic));
            }
            Metadata::Retry {
                count,
                min_backoff,
                max_backoff,
                catch,
            } => {
                if !is_subscriber {
                    errors.push(ValidationError::precondition(format!(
                        "{at}: retries can only be added to subscribers"
                    )));
                }
                errors.extend(retry_errors(
                    scope,
                    &at,
                    verb,
                    *count,
                    min_backoff,
                    max_backoff,
                    catch.as_ref(),
                ));
            }
            Metadata::Calls { calls } => {
                for call in calls {
                    match scope.lookup(call) {
                        Lookup::Found(Decl::Verb(_)) | Lookup::Unknown => {}
                        Lookup::Found(other) => errors.push(ValidationError::invalid(format!(
                            "{at}: {call} refers to a {}, not a verb",
                            other.kind_name()
                        ))),
                        Lookup::Missing => errors.push(ValidationError::invalid(format!(
                            "{at}: unknown verb {call}"
                        ))),
                    }
                }
            }
            Metadata::Alias { .. } | Metadata::TypeMap { .. } | Metadata::SqlMigration { .. } => {
                errors.push(ValidationError::invalid(format!(
                    "{at}: metadata {} is not allowed on verbs",
                    meta.kind_name()
                )));
            }
            _ => {}
        }
    }
    errors
}

fn describe_signature(verb: &Verb) -> String {
    format!("({}) {}", verb.request, verb.response)
}

fn ingress_errors(
    scope: &Scope<'_>,
    at: &str,
    verb: &Verb,
    method: &str,
    path: &[IngressPathComponent],
) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    if !HTTP_METHODS.contains(&method) {
        errors.push(ValidationError::invalid(format!(
            "{at}: unsupported HTTP method {method:?}"
        )));
    }

    let mut names = Vec::new();
    for component in path {
        if let IngressPathComponent::Parameter { name } = component {
            if !is_valid_name(name) || names.contains(&name.as_str()) {
                errors.push(ValidationError::invalid(format!(
                    "{at}: invalid or duplicate path parameter {name:?}"
                )));
            }
            names.push(name.as_str());
        }
    }

    let request = match &verb.request {
        Type::Ref(r) if r.is_builtin(builtin::HTTP_REQUEST) && r.type_parameters.len() == 3 => {
            Some(r)
        }
        _ => {
            errors.push(ValidationError::precondition(format!(
                "{at}: ingress verb request must be builtin.HttpRequest<Body, Path, Query>, found {}",
                verb.request
            )));
            None
        }
    };
    match &verb.response {
        Type::Ref(r) if r.is_builtin(builtin::HTTP_RESPONSE) && r.type_parameters.len() == 2 => {}
        other => errors.push(ValidationError::precondition(format!(
            "{at}: ingress verb response must be builtin.HttpResponse<Body, Error>, found {other}"
        ))),
    }

    let Some([body, path_type, query]) = request.map(|r| &r.type_parameters[..]).and_then(|p| {
        <&[Type; 3]>::try_from(p).ok()
    }) else {
        return errors;
    };

    if matches!(method, "GET" | "HEAD") && !body.is_unit() {
        errors.push(ValidationError::precondition(format!(
            "{at}: {method} request body must be Unit, found {body}"
        )));
    }

    match path_type {
        Type::Unit if !names.is_empty() => errors.push(ValidationError::precondition(format!(
            "{at}: path has parameters but the path parameter type is Unit"
        ))),
        Type::Unit => {}
        Type::String | Type::Int | Type::Float | Type::Bool if names.len() != 1 => {
            errors.push(ValidationError::precondition(format!(
                "{at}: path parameter type {path_type} requires exactly one path parameter, found {}",
                names.len()
            )));
        }
        Type::String | Type::Int | Type::Float | Type::Bool => {}
        Type::Map { key, .. } if **key == Type::String => {}
        Type::Ref(r) => {
            if let Some(data) = scope.data(r) {
                for name in &names {
                    if !data.fields.iter().any(|f| f.json_name() == *name) {
                        errors.push(ValidationError::precondition(format!(
                            "{at}: path parameter {name:?} not found in {r}"
                        )));
                    }
                }
            }
        }
        other => errors.push(ValidationError::precondition(format!(
            "{at}: unsupported path parameter type {other}"
        ))),
    }

    match query {
        Type::Unit | Type::Ref(_) => {}
        Type::Map { key, value }
            if **key == Type::String
                && (**value == Type::String || **value == Type::array(Type::String)) => {}
        other => errors.push(ValidationError::precondition(format!(
            "{at}: query type must be Unit, a data type, {{String: String}} or {{String: [String]}}, found {other}"
        ))),
    }
    errors
}

fn subscriber_errors(
    scope: &Scope<'_>,
    at: &str,
    verb: &Verb,
    topic: &Ref,
) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    if !verb.response.is_unit() {
        errors.push(ValidationError::precondition(format!(
            "{at}: subscribers must be sinks, found response {}",
            verb.response
        )));
    }
    match scope.lookup(topic) {
        Lookup::Found(Decl::Topic(t)) => {
            let owner = Scope {
                module: scope
                    .schema
                    .and_then(|s| s.module(&topic.qualified(&scope.module.name).module))
                    .unwrap_or(scope.module),
                schema: scope.schema,
            };
            if owner.qualify(&t.event) != scope.qualify(&verb.request) {
                errors.push(ValidationError::precondition(format!(
                    "{at}: subscriber request type {} does not match topic {topic} event type {}",
                    verb.request, t.event
                )));
            }
        }
        Lookup::Found(other) => errors.push(ValidationError::invalid(format!(
            "{at}: {topic} refers to a {}, not a topic",
            other.kind_name()
        ))),
        Lookup::Missing => errors.push(ValidationError::invalid(format!(
            "{at}: unknown topic {topic}"
        ))),
        Lookup::Unknown => {}
    }
    errors
}

fn retry_errors(
    scope: &Scope<'_>,
    at: &str,
    verb: &Verb,
    count: Option<i64>,
    min_backoff: &str,
    max_backoff: &str,
    catch: Option<&Ref>,
) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    if count.is_some_and(|c| c < 0) {
        errors.push(ValidationError::invalid(format!(
            "{at}: retry count must be at least 0"
        )));
    }
    if count == Some(0) && catch.is_none() && (!min_backoff.is_empty() || !max_backoff.is_empty())
    {
        errors.push(ValidationError::precondition(format!(
            "{at}: retry count is 0 so backoff durations have no effect without a catch verb"
        )));
    }

    let mut parse = |label: &str, text: &str, default: &str| -> Option<Duration> {
        let text = if text.is_empty() { default } else { text };
        match parse_retry_duration(text) {
            Ok(d) => Some(d),
            Err(e) => {
                errors.push(ValidationError::invalid(format!(
                    "{at}: invalid {label} backoff: {e}"
                )));
                None
            }
        }
    };
    let min = parse("min", min_backoff, DEFAULT_MIN_BACKOFF);
    let max = parse("max", max_backoff, DEFAULT_MAX_BACKOFF);
    if let Some(min) = min {
        if min.is_zero() {
            errors.push(ValidationError::invalid(format!(
                "{at}: min backoff must be positive"
            )));
        }
        if min > MAX_BACKOFF {
            errors.push(ValidationError::invalid(format!(
                "{at}: min backoff must be at most 1d"
            )));
        }
    }
    if max.is_some_and(|max| max > MAX_BACKOFF) {
        errors.push(ValidationError::invalid(format!(
            "{at}: max backoff must be at most 1d"
        )));
    }
    if min.zip(max).is_some_and(|(min, max)| min > max) {
        errors.push(ValidationError::invalid(format!(
            "{at}: min backoff {min_backoff} must not exceed max backoff {max_backoff}"
        )));
    }

    if let Some(catch) = catch {
        match scope.lookup(catch) {
            Lookup::Found(Decl::Verb(catcher)) => {
                let expected = scope.qualify(&builtin::catch_request(verb.request.clone()));
                let any = builtin::catch_request(Type::Any);
                let request = scope.qualify(&catcher.request);
                if request != expected && request != any {
                    errors.push(ValidationError::precondition(format!(
                        "{at}: catch verb {catch} must take {} or {any}, found {}",
                        builtin::catch_request(verb.request.clone()),
                        catcher.request
                    )));
                }
                if !catcher.response.is_unit() {
                    errors.push(ValidationError::precondition(format!(
                        "{at}: catch verb {catch} must return Unit, found {}",
                        catcher.response
                    )));
                }
            }
            Lookup::Found(other) => errors.push(ValidationError::invalid(format!(
                "{at}: catch {catch} refers to a {}, not a verb",
                other.kind_name()
            ))),
            Lookup::Missing => errors.push(ValidationError::invalid(format!(
                "{at}: unknown catch verb {catch}"
            ))),
            Lookup::Unknown => {}
        }
    }
    errors
}

/// Every `(method, path shape)` must be served by exactly one verb.
fn ingress_collisions<'a>(modules: impl Iterator<Item = &'a Module>) -> Vec<ValidationError> {
    let mut owners: HashMap<(String, String), String> = HashMap::new();
    let mut errors = Vec::new();
    for module in modules {
        for verb in module.verbs() {
            let Some((method, path)) = verb.ingress() else {
                continue;
            };
            let key = (method.to_string(), path_shape(path));
            let owner = format!("{}.{}", module.name, verb.name);
            if let Some(existing) = owners.get(&key) {
                errors.push(ValidationError::duplicate(format!(
                    "{owner}: duplicate ingress route {} {} already served by {existing}",
                    key.0, key.1
                )));
            } else {
                owners.insert(key, owner);
            }
        }
    }
    errors
}

/// `/users/{id}` and `/users/{name}` share the shape `/users/{}`.
#[must_use]
pub fn path_shape(path: &[IngressPathComponent]) -> String {
    let mut out = String::new();
    for component in path {
        out.push('/');
        match component {
            IngressPathComponent::Literal { text } => out.push_str(text),
            IngressPathComponent::Parameter { .. } => out.push_str("{}"),
        }
    }
    if out.is_empty() {
        out.push('/');
    }
    out
}
