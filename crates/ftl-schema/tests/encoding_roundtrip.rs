//! Wire encoding round-trips and module config loading.

use anyhow::{Context, Result};
use chrono::{TimeZone, Utc};
use ftl_core::DeploymentKey;
use ftl_schema::encoding::{decode, encode};
use ftl_schema::validate::validate_schema;
use ftl_schema::{
    Data, Decl, Field, Metadata, Module, ModuleConfig, ModuleRuntime, Ref, Schema, Type, Verb,
};
use proptest::prelude::*;

fn leaf_type() -> impl Strategy<Value = Type> {
    prop_oneof![
        Just(Type::Int),
        Just(Type::Float),
        Just(Type::String),
        Just(Type::Bool),
        Just(Type::Bytes),
        Just(Type::Time),
        Just(Type::Any),
    ]
}

fn any_type() -> impl Strategy<Value = Type> {
    leaf_type().prop_recursive(3, 16, 2, |inner| {
        prop_oneof![
            inner.clone().prop_map(Type::array),
            inner.clone().prop_map(Type::optional),
            (inner.clone(), inner).prop_map(|(k, v)| Type::map(k, v)),
        ]
    })
}

fn ident() -> impl Strategy<Value = String> {
    "[a-z][a-zA-Z0-9_]{0,8}"
}

fn module_strategy() -> impl Strategy<Value = Module> {
    (
        ident(),
        prop::collection::vec((ident(), any_type()), 0..4),
        prop::collection::vec((ident(), any_type(), any_type()), 0..4),
        0u32..3600,
    )
        .prop_map(|(name, fields, verbs, offset)| {
            let created = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()
                + chrono::TimeDelta::seconds(i64::from(offset));
            let mut module = Module::new(&name).with_runtime(ModuleRuntime::deployed(
                "go",
                created,
                format!("http://{name}:8892"),
                Some(DeploymentKey::generate(&name)),
            ));
            module = module.with_decl(Decl::Data(Data::new(
                "Payload",
                fields
                    .into_iter()
                    .map(|(field, ty)| Field::new(field, ty))
                    .collect(),
            )));
            for (verb, req, resp) in verbs {
                module = module.with_decl(Decl::Verb(
                    Verb::new(verb, req, resp).with_metadata(Metadata::calls(vec![Ref::new(
                        &name, "other",
                    )])),
                ));
            }
            module
        })
}

proptest! {
    #[test]
    fn decode_inverts_encode(modules in prop::collection::vec(module_strategy(), 0..4)) {
        let schema = Schema::from_modules(modules);
        let bytes = encode(&schema).unwrap();
        let decoded = decode(&bytes).unwrap();
        prop_assert_eq!(&decoded, &schema);
        prop_assert_eq!(
            validate_schema(&decoded).is_ok(),
            validate_schema(&schema).is_ok()
        );
    }
}

#[test]
fn module_config_loads_from_directory() -> Result<()> {
    let dir = tempfile::tempdir().context("create temp dir")?;
    std::fs::write(
        dir.path().join("ftl.toml"),
        "module = \"echo\"\nlanguage = \"go\"\ndeploy-dir = \"_ftl\"\nwatch = [\"**/*.go\"]\n",
    )
    .context("write ftl.toml")?;

    let config = ModuleConfig::load(dir.path()).context("load config")?;
    assert_eq!(config.module, "echo");
    assert_eq!(config.language, "go");
    assert_eq!(config.realm, "home");
    assert_eq!(config.abs_deploy_dir(), dir.path().join("_ftl"));
    assert_eq!(config.watch, vec!["**/*.go".to_string()]);
    Ok(())
}

#[test]
fn missing_module_config_is_an_io_error() -> Result<()> {
    let dir = tempfile::tempdir().context("create temp dir")?;
    let err = ModuleConfig::load(dir.path()).unwrap_err();
    assert!(matches!(err, ftl_schema::Error::Io { .. }));
    Ok(())
}
