//! Declarations: the named items a module exports or keeps private.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::metadata::Metadata;
use crate::types::Type;

/// Runtime annotations recorded for a deployed verb.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerbRuntime {
    /// When the owning deployment was created.
    pub create_time: DateTime<Utc>,
    /// When the verb became callable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
}

/// Shape of a verb, derived from its request and response types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VerbKind {
    /// Request and response.
    Verb,
    /// Request, no response.
    Sink,
    /// No request, response.
    Source,
    /// Neither.
    Empty,
}

/// A remote-callable function.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Verb {
    /// Verb name.
    pub name: String,
    /// Whether other modules may call this verb.
    #[serde(default)]
    pub export: bool,
    /// Comment lines.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub comments: Vec<String>,
    /// Request type.
    pub request: Type,
    /// Response type.
    pub response: Type,
    /// Metadata.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub metadata: Vec<Metadata>,
    /// Runtime annotations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime: Option<VerbRuntime>,
}

impl Verb {
    /// Creates an unexported verb without metadata.
    #[must_use]
    pub fn new(name: impl Into<String>, request: Type, response: Type) -> Self {
        Self {
            name: name.into(),
            export: false,
            comments: Vec::new(),
            request,
            response,
            metadata: Vec::new(),
            runtime: None,
        }
    }

    /// Appends a metadata entry.
    #[must_use]
    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata.push(metadata);
        self
    }

    /// Marks the verb exported.
    #[must_use]
    pub fn exported(mut self) -> Self {
        self.export = true;
        self
    }

    /// Classifies the verb by whether request and response are `Unit`.
    #[must_use]
    pub const fn kind(&self) -> VerbKind {
        match (self.request.is_unit(), self.response.is_unit()) {
            (false, false) => VerbKind::Verb,
            (false, true) => VerbKind::Sink,
            (true, false) => VerbKind::Source,
            (true, true) => VerbKind::Empty,
        }
    }

    /// Returns the cron pattern, if any.
    #[must_use]
    pub fn cron(&self) -> Option<&str> {
        self.metadata.iter().find_map(|m| match m {
            Metadata::CronJob { cron } => Some(cron.as_str()),
            _ => None,
        })
    }

    /// Returns the HTTP ingress `(method, path)` binding, if any.
    #[must_use]
    pub fn ingress(&self) -> Option<(&str, &[crate::metadata::IngressPathComponent])> {
        self.metadata.iter().find_map(|m| match m {
            Metadata::Ingress { method, path, .. } => Some((method.as_str(), path.as_slice())),
            _ => None,
        })
    }

    /// Returns `true` if the verb carries lenient encoding metadata.
    #[must_use]
    pub fn is_lenient(&self) -> bool {
        self.metadata
            .iter()
            .any(|m| matches!(m, Metadata::Encoding { lenient: true }))
    }
}

/// A field of a data declaration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Field {
    /// Field name.
    pub name: String,
    /// Field type.
    #[serde(rename = "type")]
    pub ty: Type,
    /// Comment lines.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub comments: Vec<String>,
    /// Metadata; only aliases are permitted.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub metadata: Vec<Metadata>,
}

impl Field {
    /// Creates a field.
    #[must_use]
    pub fn new(name: impl Into<String>, ty: Type) -> Self {
        Self {
            name: name.into(),
            ty,
            comments: Vec::new(),
            metadata: Vec::new(),
        }
    }

    /// Name the field is encoded under in JSON.
    #[must_use]
    pub fn json_name(&self) -> &str {
        self.metadata
            .iter()
            .find_map(|m| match m {
                Metadata::Alias { alias, .. } => Some(alias.as_str()),
                _ => None,
            })
            .unwrap_or(&self.name)
    }
}

/// A record type, optionally generic.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Data {
    /// Type name.
    pub name: String,
    /// Whether other modules may reference the type.
    #[serde(default)]
    pub export: bool,
    /// Comment lines.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub comments: Vec<String>,
    /// Generic parameter names.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub type_parameters: Vec<String>,
    /// Fields in declaration order.
    #[serde(default)]
    pub fields: Vec<Field>,
    /// Metadata.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub metadata: Vec<Metadata>,
}

impl Data {
    /// Creates a non-generic, unexported data type.
    #[must_use]
    pub fn new(name: impl Into<String>, fields: Vec<Field>) -> Self {
        Self {
            name: name.into(),
            export: false,
            comments: Vec::new(),
            type_parameters: Vec::new(),
            fields,
            metadata: Vec::new(),
        }
    }

    /// Looks up a field by declared name.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Returns this declaration with type parameters replaced by `args`.
    ///
    /// Missing arguments leave the parameter in place.
    #[must_use]
    pub fn monomorphise(&self, args: &[Type]) -> Data {
        let bindings: Vec<(String, Type)> = self
            .type_parameters
            .iter()
            .cloned()
            .zip(args.iter().cloned())
            .collect();
        let mut out = self.clone();
        out.type_parameters.clear();
        for field in &mut out.fields {
            field.ty = field.ty.substitute(&bindings);
        }
        out
    }
}

/// A named alias for another type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypeAlias {
    /// Alias name.
    pub name: String,
    /// Whether other modules may reference the alias.
    #[serde(default)]
    pub export: bool,
    /// Aliased type.
    #[serde(rename = "type")]
    pub ty: Type,
    /// Metadata; only type maps are permitted.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub metadata: Vec<Metadata>,
}

/// Value of an enum variant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "camelCase")]
pub enum EnumValue {
    /// Integer discriminant.
    Int(i64),
    /// String discriminant.
    String(String),
    /// Type variant of a sum type.
    Type(Type),
}

/// A named enum variant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EnumVariant {
    /// Variant name.
    pub name: String,
    /// Variant value.
    pub value: EnumValue,
}

/// A value enum (typed discriminants) or type enum (sum of types).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Enum {
    /// Enum name.
    pub name: String,
    /// Whether other modules may reference the enum.
    #[serde(default)]
    pub export: bool,
    /// Discriminant type for value enums; absent for type enums.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub ty: Option<Type>,
    /// Variants in declaration order.
    pub variants: Vec<EnumVariant>,
}

impl Enum {
    /// Returns `true` for value enums.
    #[must_use]
    pub const fn is_value_enum(&self) -> bool {
        self.ty.is_some()
    }
}

/// A named configuration value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Config {
    /// Config name.
    pub name: String,
    /// Value type.
    #[serde(rename = "type")]
    pub ty: Type,
}

/// A named secret value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Secret {
    /// Secret name.
    pub name: String,
    /// Value type.
    #[serde(rename = "type")]
    pub ty: Type,
}

/// Supported database engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseEngine {
    /// `PostgreSQL`.
    Postgres,
    /// `MySQL`.
    Mysql,
}

impl fmt::Display for DatabaseEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Postgres => "postgres",
            Self::Mysql => "mysql",
        })
    }
}

/// How a deployment connects to a database.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum DatabaseConnector {
    /// A plain DSN.
    Dsn {
        /// Connection string.
        dsn: String,
    },
    /// Token-based cloud IAM authentication.
    AwsIamAuth {
        /// Database user.
        username: String,
        /// `host:port`.
        endpoint: String,
        /// Database name.
        database: String,
    },
}

/// Provisioned connectors of a database.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DatabaseRuntime {
    /// Read connector.
    pub read: DatabaseConnector,
    /// Write connector.
    pub write: DatabaseConnector,
}

/// A database a module owns.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Database {
    /// Database name.
    pub name: String,
    /// Engine.
    pub engine: DatabaseEngine,
    /// Metadata; only SQL migrations are permitted.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub metadata: Vec<Metadata>,
    /// Provisioned connectors.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime: Option<DatabaseRuntime>,
}

/// Provisioned broker details of a topic.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicRuntime {
    /// Broker addresses.
    pub kafka_brokers: Vec<String>,
    /// Broker-side topic identifier.
    pub topic_id: String,
}

/// A pub/sub topic.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Topic {
    /// Topic name.
    pub name: String,
    /// Whether other modules may subscribe.
    #[serde(default)]
    pub export: bool,
    /// Event type.
    pub event: Type,
    /// Provisioned broker details.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime: Option<TopicRuntime>,
}

/// A module declaration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Decl {
    /// Verb.
    Verb(Verb),
    /// Data.
    Data(Data),
    /// Type alias.
    TypeAlias(TypeAlias),
    /// Enum.
    Enum(Enum),
    /// Config.
    Config(Config),
    /// Secret.
    Secret(Secret),
    /// Database.
    Database(Database),
    /// Topic.
    Topic(Topic),
}

impl Decl {
    /// Declaration name.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Verb(d) => &d.name,
            Self::Data(d) => &d.name,
            Self::TypeAlias(d) => &d.name,
            Self::Enum(d) => &d.name,
            Self::Config(d) => &d.name,
            Self::Secret(d) => &d.name,
            Self::Database(d) => &d.name,
            Self::Topic(d) => &d.name,
        }
    }

    /// Kind keyword as used in the text form.
    #[must_use]
    pub const fn kind_name(&self) -> &'static str {
        match self {
            Self::Verb(_) => "verb",
            Self::Data(_) => "data",
            Self::TypeAlias(_) => "typealias",
            Self::Enum(_) => "enum",
            Self::Config(_) => "config",
            Self::Secret(_) => "secret",
            Self::Database(_) => "database",
            Self::Topic(_) => "topic",
        }
    }

    /// Whether the declaration is visible to other modules.
    ///
    /// Configs, secrets and databases are never exported.
    #[must_use]
    pub const fn is_exported(&self) -> bool {
        match self {
            Self::Verb(d) => d.export,
            Self::Data(d) => d.export,
            Self::TypeAlias(d) => d.export,
            Self::Enum(d) => d.export,
            Self::Topic(d) => d.export,
            Self::Config(_) | Self::Secret(_) | Self::Database(_) => false,
        }
    }

    /// Metadata attached directly to the declaration.
    #[must_use]
    pub fn metadata(&self) -> &[Metadata] {
        match self {
            Self::Verb(d) => &d.metadata,
            Self::Data(d) => &d.metadata,
            Self::TypeAlias(d) => &d.metadata,
            Self::Database(d) => &d.metadata,
            Self::Enum(_) | Self::Config(_) | Self::Secret(_) | Self::Topic(_) => &[],
        }
    }
}

fn write_comments(f: &mut fmt::Formatter<'_>, comments: &[String], indent: &str) -> fmt::Result {
    for line in comments {
        writeln!(f, "{indent}// {line}")?;
    }
    Ok(())
}

fn write_metadata(f: &mut fmt::Formatter<'_>, metadata: &[Metadata], indent: &str) -> fmt::Result {
    for meta in metadata {
        write!(f, "\n{indent}{meta}")?;
    }
    Ok(())
}

fn export_prefix(export: bool) -> &'static str {
    if export { "export " } else { "" }
}

impl fmt::Display for Decl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Verb(v) => {
                write_comments(f, &v.comments, "")?;
                write!(
                    f,
                    "{}verb {}({}) {}",
                    export_prefix(v.export),
                    v.name,
                    v.request,
                    v.response
                )?;
                write_metadata(f, &v.metadata, "  ")
            }
            Self::Data(d) => {
                write_comments(f, &d.comments, "")?;
                write!(f, "{}data {}", export_prefix(d.export), d.name)?;
                if !d.type_parameters.is_empty() {
                    write!(f, "<{}>", d.type_parameters.join(", "))?;
                }
                f.write_str(" {")?;
                for field in &d.fields {
                    f.write_str("\n")?;
                    write_comments(f, &field.comments, "  ")?;
                    write!(f, "  {} {}", field.name, field.ty)?;
                    for meta in &field.metadata {
                        write!(f, " {meta}")?;
                    }
                }
                if d.fields.is_empty() {
                    f.write_str("}")?;
                } else {
                    f.write_str("\n}")?;
                }
                write_metadata(f, &d.metadata, "  ")
            }
            Self::TypeAlias(t) => {
                write!(f, "{}typealias {} {}", export_prefix(t.export), t.name, t.ty)?;
                write_metadata(f, &t.metadata, "  ")
            }
            Self::Enum(e) => {
                write!(f, "{}enum {}", export_prefix(e.export), e.name)?;
                if let Some(ty) = &e.ty {
                    write!(f, ": {ty}")?;
                }
                f.write_str(" {")?;
                for variant in &e.variants {
                    match &variant.value {
                        EnumValue::Int(v) => write!(f, "\n  {} = {v}", variant.name)?,
                        EnumValue::String(v) => write!(f, "\n  {} = {v:?}", variant.name)?,
                        EnumValue::Type(ty) => write!(f, "\n  {} {ty}", variant.name)?,
                    }
                }
                f.write_str("\n}")
            }
            Self::Config(c) => write!(f, "config {} {}", c.name, c.ty),
            Self::Secret(s) => write!(f, "secret {} {}", s.name, s.ty),
            Self::Database(d) => {
                write!(f, "database {} {}", d.engine, d.name)?;
                write_metadata(f, &d.metadata, "  ")
            }
            Self::Topic(t) => write!(f, "{}topic {} {}", export_prefix(t.export), t.name, t.event),
        }
    }
}
