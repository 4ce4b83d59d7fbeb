//! # ftl-schema
//!
//! The typed schema every FTL control plane component routes on.
//!
//! A [`Schema`] is a flat list of [`Module`]s. Each module holds
//! [`Decl`]arations (verbs, data types, configs, secrets, databases, topics)
//! whose [`Metadata`] opts them into platform behaviour such as HTTP ingress,
//! cron firing or topic subscription. Modules reference one another by name
//! through [`Ref`]; nothing in the model holds a pointer across modules.
//!
//! ## Modules
//!
//! - [`types`], [`metadata`], [`decl`], [`module`], [`schema`]: the model
//! - [`builtin`]: the platform-provided `builtin` module
//! - [`encoding`]: JSON wire form
//! - [`validate`]: structural and cross-module rules
//! - [`visit`]: a single dispatch walk over a module's nodes
//! - [`moduleconfig`]: per-module `ftl.toml`
//!
//! ## Example
//!
//! ```rust
//! use ftl_schema::{Decl, Metadata, Module, Type, Verb, validate};
//!
//! let module = Module::new("echo").with_decl(Decl::Verb(
//!     Verb::new("tick", Type::Unit, Type::Unit).with_metadata(Metadata::cron("*/2 * * * * * *")),
//! ));
//! validate::validate_module(&module).unwrap();
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod builtin;
pub mod decl;
pub mod encoding;
pub mod error;
pub mod graph;
pub mod metadata;
pub mod module;
pub mod moduleconfig;
pub mod schema;
pub mod types;
pub mod validate;
pub mod visit;

pub use decl::{
    Config, Data, Database, DatabaseConnector, DatabaseEngine, DatabaseRuntime, Decl, Enum,
    EnumValue, EnumVariant, Field, Secret, Topic, TopicRuntime, TypeAlias, Verb, VerbKind,
    VerbRuntime,
};
pub use error::{Error, Result, ValidationError};
pub use metadata::{AliasKind, FromOffset, IngressPathComponent, Metadata};
pub use module::{
    Module, ModuleRuntime, ModuleRuntimeBase, ModuleRuntimeDeployment, ModuleRuntimeScaling,
};
pub use moduleconfig::ModuleConfig;
pub use schema::Schema;
pub use types::{Ref, Type};
