//! Pre-built schemas and clocks for common test scenarios.

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use ftl_core::{DeploymentKey, ManualClock, SharedClock};
use ftl_schema::builtin::{empty, http_request, http_response};
use ftl_schema::{Data, Decl, Field, Metadata, Module, ModuleRuntime, Ref, Schema, Type, Verb};

/// Fixed start of test time: 2026-01-01T00:00:00Z.
#[must_use]
pub fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()
}

/// `secs` seconds after [`epoch`].
#[must_use]
pub fn at(secs: i64) -> DateTime<Utc> {
    epoch() + chrono::TimeDelta::seconds(secs)
}

/// A manual clock at [`epoch`], plus the same clock as a [`SharedClock`].
#[must_use]
pub fn manual_clock() -> (Arc<ManualClock>, SharedClock) {
    let clock = Arc::new(ManualClock::new(epoch()));
    let shared: SharedClock = clock.clone();
    (clock, shared)
}

/// Marks `module` as deployed at `endpoint`, created at `created`.
#[must_use]
pub fn deployed(module: Module, endpoint: &str, created: DateTime<Utc>) -> Module {
    let key = DeploymentKey::generate(&module.name);
    module.with_runtime(ModuleRuntime::deployed("go", created, endpoint, Some(key)))
}

/// `verb name(Unit) Unit +cron pattern`.
#[must_use]
pub fn cron_verb(name: &str, pattern: &str) -> Decl {
    Decl::Verb(Verb::new(name, Type::Unit, Type::Unit).with_metadata(Metadata::cron(pattern)))
}

/// `verb name(Unit) Unit +calls callee`.
#[must_use]
pub fn calling_verb(name: &str, callee: Ref) -> Decl {
    Decl::Verb(Verb::new(name, Type::Unit, Type::Unit).with_metadata(Metadata::calls(vec![callee])))
}

/// An exported HTTP verb with `+ingress http METHOD path`.
#[must_use]
pub fn ingress_verb(name: &str, method: &str, path: &str, request: Type, response: Type) -> Decl {
    Decl::Verb(
        Verb::new(name, request, response)
            .exported()
            .with_metadata(Metadata::ingress(method, path)),
    )
}

/// Factory for the schemas the end-to-end scenarios use.
pub struct SchemaFactory;

impl SchemaFactory {
    /// `one.one` and `two.two` calling each other.
    #[must_use]
    pub fn call_cycle() -> Schema {
        Schema::from_modules([
            Module::new("one").with_decl(calling_verb("one", Ref::new("two", "two"))),
            Module::new("two").with_decl(calling_verb("two", Ref::new("one", "one"))),
        ])
    }

    /// Module `http` with
    /// `getPath(HttpRequest<Unit, {username: String}, Unit>) HttpResponse<Empty, Empty>
    /// +ingress http GET /getPath/{username}`.
    #[must_use]
    pub fn get_path() -> Module {
        Module::new("http")
            .with_decl(Decl::Data(Data::new(
                "GetPathParams",
                vec![Field::new("username", Type::String)],
            )))
            .with_decl(ingress_verb(
                "getPath",
                "GET",
                "/getPath/{username}",
                http_request(Type::Unit, Type::reference("http", "GetPathParams"), Type::Unit),
                http_response(empty(), empty()),
            ))
    }

    /// Module `echo` with `verb echo(Unit) Unit +cron pattern`.
    #[must_use]
    pub fn cron_echo(pattern: &str) -> Module {
        Module::new("echo").with_decl(cron_verb("echo", pattern))
    }

    /// Module `time` with a plain `now` verb.
    #[must_use]
    pub fn time() -> Module {
        Module::new("time").with_decl(Decl::Verb(Verb::new("now", Type::Unit, Type::Time)))
    }
}
