//! The platform-provided `builtin` module.

use crate::decl::{Data, Decl, Field};
use crate::module::Module;
use crate::types::{Ref, Type};

/// Name of the builtin module. Reserved for user modules.
pub const BUILTIN_MODULE: &str = "builtin";

/// `builtin.HttpRequest<Body, Path, Query>`.
pub const HTTP_REQUEST: &str = "HttpRequest";
/// `builtin.HttpResponse<Body, Error>`.
pub const HTTP_RESPONSE: &str = "HttpResponse";
/// `builtin.Empty`.
pub const EMPTY: &str = "Empty";
/// `builtin.CatchRequest<Req>`.
pub const CATCH_REQUEST: &str = "CatchRequest";
/// `builtin.FailedEvent<Event>`.
pub const FAILED_EVENT: &str = "FailedEvent";

fn param(name: &str) -> Type {
    Type::reference("", name)
}

fn generic(name: &str, params: &[&str], fields: Vec<Field>) -> Decl {
    let mut data = Data::new(name, fields);
    data.export = true;
    data.type_parameters = params.iter().map(ToString::to_string).collect();
    Decl::Data(data)
}

fn headers() -> Type {
    Type::map(Type::String, Type::array(Type::String))
}

/// Builds the builtin module.
#[must_use]
pub fn builtins() -> Module {
    let mut module = Module::new(BUILTIN_MODULE);
    module.builtin = true;
    module.comments = vec!["Built-in types for FTL.".to_string()];
    module.decls = vec![
        generic(
            HTTP_REQUEST,
            &["Body", "Path", "Query"],
            vec![
                Field::new("method", Type::String),
                Field::new("path", Type::String),
                Field::new("pathParameters", param("Path")),
                Field::new("query", param("Query")),
                Field::new("headers", headers()),
                Field::new("body", param("Body")),
            ],
        ),
        generic(
            HTTP_RESPONSE,
            &["Body", "Error"],
            vec![
                Field::new("status", Type::Int),
                Field::new("headers", headers()),
                Field::new("body", Type::optional(param("Body"))),
                Field::new("error", Type::optional(param("Error"))),
            ],
        ),
        generic(EMPTY, &[], Vec::new()),
        generic(
            CATCH_REQUEST,
            &["Req"],
            vec![
                Field::new("verb", Type::reference(BUILTIN_MODULE, "Ref")),
                Field::new("request", param("Req")),
                Field::new("requestType", Type::String),
                Field::new("error", Type::String),
            ],
        ),
        generic(
            FAILED_EVENT,
            &["Event"],
            vec![
                Field::new("event", param("Event")),
                Field::new("error", Type::String),
            ],
        ),
        generic(
            "Ref",
            &[],
            vec![
                Field::new("module", Type::String),
                Field::new("name", Type::String),
            ],
        ),
    ];
    module
}

/// `builtin.HttpRequest<body, path, query>`.
#[must_use]
pub fn http_request(body: Type, path: Type, query: Type) -> Type {
    Type::Ref(Ref::new(BUILTIN_MODULE, HTTP_REQUEST).with_type_parameters(vec![body, path, query]))
}

/// `builtin.HttpResponse<body, error>`.
#[must_use]
pub fn http_response(body: Type, error: Type) -> Type {
    Type::Ref(Ref::new(BUILTIN_MODULE, HTTP_RESPONSE).with_type_parameters(vec![body, error]))
}

/// `builtin.Empty`.
#[must_use]
pub fn empty() -> Type {
    Type::reference(BUILTIN_MODULE, EMPTY)
}

/// `builtin.CatchRequest<request>`.
#[must_use]
pub fn catch_request(request: Type) -> Type {
    Type::Ref(Ref::new(BUILTIN_MODULE, CATCH_REQUEST).with_type_parameters(vec![request]))
}
