//! Value types and references.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A reference to a declaration, qualified by module.
///
/// References are resolved by name lookup against a [`Schema`](crate::Schema);
/// the schema never stores pointers between modules.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ref {
    /// Owning module. Empty means "the module containing this reference".
    #[serde(default)]
    pub module: String,
    /// Declaration name.
    pub name: String,
    /// Type arguments for generic data declarations.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub type_parameters: Vec<Type>,
}

impl Ref {
    /// Creates a reference without type arguments.
    #[must_use]
    pub fn new(module: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            name: name.into(),
            type_parameters: Vec::new(),
        }
    }

    /// Adds type arguments.
    #[must_use]
    pub fn with_type_parameters(mut self, params: Vec<Type>) -> Self {
        self.type_parameters = params;
        self
    }

    /// Parses `module.name` (or a bare `name`).
    #[must_use]
    pub fn parse(text: &str) -> Self {
        match text.split_once('.') {
            Some((module, name)) => Self::new(module, name),
            None => Self::new("", text),
        }
    }

    /// Returns this reference with an empty module replaced by `module`.
    #[must_use]
    pub fn qualified(&self, module: &str) -> Self {
        let mut out = self.clone();
        if out.module.is_empty() {
            out.module = module.to_string();
        }
        out
    }

    /// Returns `true` if this reference points into the builtin module.
    #[must_use]
    pub fn is_builtin(&self, name: &str) -> bool {
        self.module == crate::builtin::BUILTIN_MODULE && self.name == name
    }
}

impl fmt::Display for Ref {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.module.is_empty() {
            write!(f, "{}.", self.module)?;
        }
        f.write_str(&self.name)?;
        if !self.type_parameters.is_empty() {
            f.write_str("<")?;
            for (idx, param) in self.type_parameters.iter().enumerate() {
                if idx > 0 {
                    f.write_str(", ")?;
                }
                write!(f, "{param}")?;
            }
            f.write_str(">")?;
        }
        Ok(())
    }
}

/// A schema type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Type {
    /// 64-bit signed integer.
    Int,
    /// 64-bit float.
    Float,
    /// UTF-8 string.
    String,
    /// Boolean.
    Bool,
    /// Opaque bytes, base64 in JSON.
    Bytes,
    /// RFC 3339 timestamp.
    Time,
    /// The empty type.
    Unit,
    /// Any JSON value.
    Any,
    /// Homogeneous list.
    Array {
        /// Element type.
        element: Box<Type>,
    },
    /// String-keyed (or other scalar-keyed) map.
    Map {
        /// Key type.
        key: Box<Type>,
        /// Value type.
        value: Box<Type>,
    },
    /// Nullable value.
    Optional {
        /// The wrapped type.
        inner: Box<Type>,
    },
    /// Reference to a declared type.
    Ref(Ref),
}

impl Type {
    /// `[element]`.
    #[must_use]
    pub fn array(element: Type) -> Self {
        Self::Array {
            element: Box::new(element),
        }
    }

    /// `{key: value}`.
    #[must_use]
    pub fn map(key: Type, value: Type) -> Self {
        Self::Map {
            key: Box::new(key),
            value: Box::new(value),
        }
    }

    /// `inner?`.
    #[must_use]
    pub fn optional(inner: Type) -> Self {
        Self::Optional {
            inner: Box::new(inner),
        }
    }

    /// Reference to `module.name`.
    #[must_use]
    pub fn reference(module: impl Into<String>, name: impl Into<String>) -> Self {
        Self::Ref(Ref::new(module, name))
    }

    /// Returns `true` for [`Type::Unit`].
    #[must_use]
    pub const fn is_unit(&self) -> bool {
        matches!(self, Self::Unit)
    }

    /// Returns `true` for the primitive scalar types.
    #[must_use]
    pub const fn is_primitive(&self) -> bool {
        matches!(
            self,
            Self::Int
                | Self::Float
                | Self::String
                | Self::Bool
                | Self::Bytes
                | Self::Time
                | Self::Unit
                | Self::Any
        )
    }

    /// Strips one level of `Optional`.
    #[must_use]
    pub fn unwrap_optional(&self) -> &Type {
        match self {
            Self::Optional { inner } => inner,
            other => other,
        }
    }

    /// Returns the reference if this is a [`Type::Ref`].
    #[must_use]
    pub const fn as_ref(&self) -> Option<&Ref> {
        match self {
            Self::Ref(r) => Some(r),
            _ => None,
        }
    }

    /// Replaces type parameter references (bare, module-less refs naming a
    /// parameter) with concrete types.
    #[must_use]
    pub fn substitute(&self, params: &[(String, Type)]) -> Type {
        match self {
            Self::Ref(r) if r.module.is_empty() && r.type_parameters.is_empty() => params
                .iter()
                .find(|(name, _)| *name == r.name)
                .map_or_else(|| self.clone(), |(_, ty)| ty.clone()),
            Self::Ref(r) => Self::Ref(Ref {
                module: r.module.clone(),
                name: r.name.clone(),
                type_parameters: r.type_parameters.iter().map(|t| t.substitute(params)).collect(),
            }),
            Self::Array { element } => Self::array(element.substitute(params)),
            Self::Map { key, value } => Self::map(key.substitute(params), value.substitute(params)),
            Self::Optional { inner } => Self::optional(inner.substitute(params)),
            other => other.clone(),
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int => f.write_str("Int"),
            Self::Float => f.write_str("Float"),
            Self::String => f.write_str("String"),
            Self::Bool => f.write_str("Bool"),
            Self::Bytes => f.write_str("Bytes"),
            Self::Time => f.write_str("Time"),
            Self::Unit => f.write_str("Unit"),
            Self::Any => f.write_str("Any"),
            Self::Array { element } => write!(f, "[{element}]"),
            Self::Map { key, value } => write!(f, "{{{key}: {value}}}"),
            Self::Optional { inner } => write!(f, "{inner}?"),
            Self::Ref(r) => write!(f, "{r}"),
        }
    }
}

/// Names that may not be used for declarations.
pub const PRIMITIVE_NAMES: [&str; 8] = [
    "Int", "Float", "String", "Bool", "Bytes", "Time", "Unit", "Any",
];
