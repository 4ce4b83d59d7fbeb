//! Validation rules exercised on realistic modules.

use ftl_core::ErrorKind;
use ftl_schema::builtin::{self, http_request, http_response};
use ftl_schema::validate::{validate_module, validate_schema};
use ftl_schema::{
    Config, Data, Decl, Field, Metadata, Module, Ref, Schema, Secret, Topic, Type, Verb,
};

fn unit_verb(name: &str) -> Verb {
    Verb::new(name, Type::Unit, Type::Unit)
}

fn messages(err: &ftl_schema::Error) -> Vec<String> {
    err.violations().iter().map(|v| v.message.clone()).collect()
}

#[test]
fn two_module_call_cycle_is_rejected() {
    let one = Module::new("one").with_decl(Decl::Verb(
        unit_verb("one")
            .exported()
            .with_metadata(Metadata::calls(vec![Ref::new("two", "two")])),
    ));
    let two = Module::new("two").with_decl(Decl::Verb(
        unit_verb("two")
            .exported()
            .with_metadata(Metadata::calls(vec![Ref::new("one", "one")])),
    ));
    let schema = Schema::from_modules([one, two]);

    let err = validate_schema(&schema).unwrap_err();
    let text = err.to_string();
    assert!(
        text.contains("found cycle in dependencies: one -> two -> one"),
        "{text}"
    );
    assert_eq!(err.kind(), ErrorKind::FailedPrecondition);
}

#[test]
fn subscription_edges_participate_in_cycles() {
    let event = Data::new("Event", vec![Field::new("id", Type::Int)]);
    let mut exported_event = event;
    exported_event.export = true;
    let producer = Module::new("producer")
        .with_decl(Decl::Data(exported_event))
        .with_decl(Decl::Topic(Topic {
            name: "events".to_string(),
            export: true,
            event: Type::reference("producer", "Event"),
            runtime: None,
        }))
        .with_decl(Decl::Verb(
            unit_verb("poke").with_metadata(Metadata::calls(vec![Ref::new("consumer", "noop")])),
        ));
    let consumer = Module::new("consumer")
        .with_decl(Decl::Verb(unit_verb("noop").exported()))
        .with_decl(Decl::Verb(
            Verb::new("consume", Type::reference("producer", "Event"), Type::Unit)
                .with_metadata(Metadata::subscriber(Ref::new("producer", "events"))),
        ));
    let err = validate_schema(&Schema::from_modules([producer, consumer])).unwrap_err();
    assert!(
        err.to_string()
            .contains("consumer -> producer -> consumer"),
        "{err}"
    );
}

#[test]
fn acyclic_schema_with_builtins_is_valid() {
    let mut schema = Schema::with_builtins();
    schema.upsert(Module::new("time").with_decl(Decl::Verb(unit_verb("now").exported())));
    schema.upsert(Module::new("echo").with_decl(Decl::Verb(
        unit_verb("echo").with_metadata(Metadata::calls(vec![Ref::new("time", "now")])),
    )));
    validate_schema(&schema).unwrap();
}

#[test]
fn duplicate_decls_per_kind_are_rejected_but_config_and_secret_may_share() {
    let module = Module::new("echo")
        .with_decl(Decl::Config(Config {
            name: "api_key".to_string(),
            ty: Type::String,
        }))
        .with_decl(Decl::Secret(Secret {
            name: "api_key".to_string(),
            ty: Type::String,
        }));
    validate_module(&module).unwrap();

    let dup = module
        .with_decl(Decl::Verb(unit_verb("echo")))
        .with_decl(Decl::Verb(unit_verb("echo")));
    let err = validate_module(&dup).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AlreadyExists);
    assert!(messages(&err).iter().any(|m| m.contains("duplicate verb \"echo\"")));
}

#[test]
fn reserved_and_malformed_names_are_rejected() {
    let err = validate_module(&Module::new("builtin")).unwrap_err();
    assert!(err.to_string().contains("reserved"));

    let err = validate_module(&Module::new("bad-name")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);

    let module = Module::new("m").with_decl(Decl::Data(Data::new("String", Vec::new())));
    assert!(validate_module(&module).is_err());
}

#[test]
fn cron_verbs_must_be_unit_to_unit_with_a_valid_pattern() {
    let bad_sig = Module::new("m").with_decl(Decl::Verb(
        Verb::new("tick", Type::String, Type::Unit).with_metadata(Metadata::cron("*/2 * * * * * *")),
    ));
    let err = validate_module(&bad_sig).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::FailedPrecondition);

    let bad_pattern = Module::new("m").with_decl(Decl::Verb(
        unit_verb("tick").with_metadata(Metadata::cron("0 0 0 30 2 * *")),
    ));
    assert!(validate_module(&bad_pattern).is_err());

    let single_metadata = Module::new("m").with_decl(Decl::Verb(
        unit_verb("tick")
            .with_metadata(Metadata::cron("1s"))
            .with_metadata(Metadata::cron("2s")),
    ));
    let err = validate_module(&single_metadata).unwrap_err();
    assert!(err.to_string().contains("multiple instances of cron"));
}

fn path_params() -> Data {
    Data::new("GetPathParams", vec![Field::new("username", Type::String)])
}

fn get_path_verb(path: &str, path_type: Type) -> Verb {
    Verb::new(
        "getPath",
        http_request(Type::Unit, path_type, Type::Unit),
        http_response(builtin::empty(), builtin::empty()),
    )
    .exported()
    .with_metadata(Metadata::ingress("GET", path))
}

#[test]
fn ingress_verb_with_data_path_parameters_is_valid() {
    let module = Module::new("http")
        .with_decl(Decl::Data(path_params()))
        .with_decl(Decl::Verb(get_path_verb(
            "/getPath/{username}",
            Type::reference("http", "GetPathParams"),
        )));
    validate_module(&module).unwrap();
}

#[test]
fn ingress_path_parameters_must_exist_on_the_data_type() {
    let module = Module::new("http")
        .with_decl(Decl::Data(path_params()))
        .with_decl(Decl::Verb(get_path_verb(
            "/getPath/{user}",
            Type::reference("http", "GetPathParams"),
        )));
    let err = validate_module(&module).unwrap_err();
    assert!(err.to_string().contains("path parameter \"user\" not found"), "{err}");
}

#[test]
fn ingress_get_body_must_be_unit_and_shapes_must_match() {
    let get_with_body = Module::new("http").with_decl(Decl::Verb(
        Verb::new(
            "post",
            http_request(Type::String, Type::Unit, Type::Unit),
            http_response(Type::String, Type::String),
        )
        .with_metadata(Metadata::ingress("GET", "/post")),
    ));
    let err = validate_module(&get_with_body).unwrap_err();
    assert!(err.to_string().contains("GET request body must be Unit"));

    let wrong_request = Module::new("http").with_decl(Decl::Verb(
        Verb::new("raw", Type::String, http_response(Type::String, Type::String))
            .with_metadata(Metadata::ingress("POST", "/raw")),
    ));
    let err = validate_module(&wrong_request).unwrap_err();
    assert!(err.to_string().contains("builtin.HttpRequest<Body, Path, Query>"));

    let scalar_path = Module::new("http").with_decl(Decl::Verb(get_path_verb(
        "/a/{x}/{y}",
        Type::String,
    )));
    assert!(validate_module(&scalar_path).is_err());
}

#[test]
fn ingress_routes_collide_on_method_and_shape_across_modules() {
    let a = Module::new("a").with_decl(Decl::Verb(get_path_verb("/users/{id}", Type::String)));
    let b = Module::new("b").with_decl(Decl::Verb(get_path_verb("/users/{name}", Type::String)));
    let err = validate_schema(&Schema::from_modules([a.clone(), b])).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AlreadyExists);
    assert!(err.to_string().contains("GET /users/{}"), "{err}");

    let mut post = get_path_verb("/users/{id}", Type::String);
    post.name = "create".to_string();
    post.metadata = vec![Metadata::ingress("POST", "/users/{id}")];
    let c = Module::new("c").with_decl(Decl::Verb(post));
    validate_schema(&Schema::from_modules([a, c])).unwrap();
}

fn pubsub_module(subscriber: Verb) -> Module {
    Module::new("orders")
        .with_decl(Decl::Data(Data::new("Order", vec![Field::new("id", Type::Int)])))
        .with_decl(Decl::Topic(Topic {
            name: "placed".to_string(),
            export: false,
            event: Type::reference("", "Order"),
            runtime: None,
        }))
        .with_decl(Decl::Verb(subscriber))
}

#[test]
fn subscribers_must_be_sinks_of_the_topic_event_type() {
    let ok = pubsub_module(
        Verb::new("ship", Type::reference("orders", "Order"), Type::Unit)
            .with_metadata(Metadata::subscriber(Ref::new("orders", "placed"))),
    );
    validate_module(&ok).unwrap();

    let wrong_type = pubsub_module(
        Verb::new("ship", Type::String, Type::Unit)
            .with_metadata(Metadata::subscriber(Ref::new("orders", "placed"))),
    );
    let err = validate_module(&wrong_type).unwrap_err();
    assert!(err.to_string().contains("does not match topic"), "{err}");

    let not_sink = pubsub_module(
        Verb::new("ship", Type::reference("orders", "Order"), Type::Int)
            .with_metadata(Metadata::subscriber(Ref::new("orders", "placed"))),
    );
    let err = validate_module(&not_sink).unwrap_err();
    assert!(err.to_string().contains("subscribers must be sinks"));
}

fn retry(count: Option<i64>, min: &str, max: &str, catch: Option<Ref>) -> Metadata {
    Metadata::Retry {
        count,
        min_backoff: min.to_string(),
        max_backoff: max.to_string(),
        catch,
    }
}

fn subscriber_with(meta: Metadata) -> Module {
    pubsub_module(
        Verb::new("ship", Type::reference("orders", "Order"), Type::Unit)
            .with_metadata(Metadata::subscriber(Ref::new("orders", "placed")))
            .with_metadata(meta),
    )
}

#[test]
fn retry_rules() {
    validate_module(&subscriber_with(retry(Some(3), "5s", "1m", None))).unwrap();
    validate_module(&subscriber_with(retry(None, "", "", None))).unwrap();

    for (meta, needle) in [
        (retry(Some(3), "1m", "5s", None), "must not exceed"),
        (retry(Some(3), "2d", "3d", None), "at most 1d"),
        (retry(Some(3), "0s", "1m", None), "must be positive"),
        (retry(Some(3), "1m1h", "", None), "out of order"),
        (retry(Some(0), "5s", "", None), "have no effect"),
        (retry(Some(-1), "", "", None), "at least 0"),
    ] {
        let err = validate_module(&subscriber_with(meta)).unwrap_err();
        assert!(err.to_string().contains(needle), "{needle}: {err}");
    }

    let not_subscriber = Module::new("m").with_decl(Decl::Verb(
        unit_verb("v").with_metadata(retry(Some(1), "", "", None)),
    ));
    let err = validate_module(&not_subscriber).unwrap_err();
    assert!(err.to_string().contains("only be added to subscribers"));
}

#[test]
fn catch_verbs_take_a_catch_request_and_return_unit() {
    let catcher = Verb::new(
        "recover",
        builtin::catch_request(Type::reference("orders", "Order")),
        Type::Unit,
    );
    let module = subscriber_with(retry(Some(0), "", "", Some(Ref::new("orders", "recover"))))
        .with_decl(Decl::Verb(catcher));
    validate_module(&module).unwrap();

    let bad = Verb::new("recover", Type::String, Type::Unit);
    let module = subscriber_with(retry(Some(2), "", "", Some(Ref::new("orders", "recover"))))
        .with_decl(Decl::Verb(bad));
    let err = validate_module(&module).unwrap_err();
    assert!(err.to_string().contains("builtin.CatchRequest"), "{err}");
}

#[test]
fn unknown_local_references_are_reported() {
    let module = Module::new("m").with_decl(Decl::Verb(Verb::new(
        "v",
        Type::reference("m", "Missing"),
        Type::Unit,
    )));
    let err = validate_module(&module).unwrap_err();
    assert!(err.to_string().contains("unknown reference m.Missing"));
}
