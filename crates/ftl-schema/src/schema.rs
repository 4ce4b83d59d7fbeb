//! The whole-system schema: every active module.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::builtin::{self, BUILTIN_MODULE};
use crate::decl::{Data, Decl, Verb};
use crate::module::Module;
use crate::types::{Ref, Type};

/// A set of modules keyed by unique name.
///
/// Modules reference each other by name only; resolution is a lookup.
/// `Schema` is a plain value: clone it to mutate a private copy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    /// Modules in insertion order.
    #[serde(default)]
    pub modules: Vec<Module>,
}

impl Schema {
    /// Creates an empty schema.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a schema containing only the builtin module.
    #[must_use]
    pub fn with_builtins() -> Self {
        Self {
            modules: vec![builtin::builtins()],
        }
    }

    /// Creates a schema from modules, replacing earlier modules of the same name.
    #[must_use]
    pub fn from_modules(modules: impl IntoIterator<Item = Module>) -> Self {
        let mut schema = Self::new();
        for module in modules {
            schema.upsert(module);
        }
        schema
    }

    /// Looks up a module by name.
    #[must_use]
    pub fn module(&self, name: &str) -> Option<&Module> {
        self.modules.iter().find(|m| m.name == name)
    }

    /// Inserts `module`, replacing any module with the same name in place.
    pub fn upsert(&mut self, module: Module) {
        match self.modules.iter_mut().find(|m| m.name == module.name) {
            Some(existing) => *existing = module,
            None => self.modules.push(module),
        }
    }

    /// Removes a module by name, returning it if present.
    pub fn remove(&mut self, name: &str) -> Option<Module> {
        let idx = self.modules.iter().position(|m| m.name == name)?;
        Some(self.modules.remove(idx))
    }

    /// Names of all modules.
    pub fn module_names(&self) -> impl Iterator<Item = &str> {
        self.modules.iter().map(|m| m.name.as_str())
    }

    /// Resolves a reference to a declaration.
    ///
    /// References into `builtin` resolve against the builtin module even when
    /// the schema does not carry one.
    #[must_use]
    pub fn resolve(&self, r: &Ref) -> Option<Decl> {
        if let Some(decl) = self.module(&r.module).and_then(|m| m.decl(&r.name)) {
            return Some(decl.clone());
        }
        if r.module == BUILTIN_MODULE {
            return builtin::builtins().decl(&r.name).cloned();
        }
        None
    }

    /// Resolves a reference to a verb.
    #[must_use]
    pub fn resolve_verb(&self, r: &Ref) -> Option<Verb> {
        match self.resolve(r)? {
            Decl::Verb(v) => Some(v),
            _ => None,
        }
    }

    /// Resolves a reference to a data declaration with its type arguments applied.
    #[must_use]
    pub fn resolve_data(&self, r: &Ref) -> Option<Data> {
        match self.resolve(r)? {
            Decl::Data(d) => Some(d.monomorphise(&r.type_parameters)),
            _ => None,
        }
    }

    /// Follows type aliases until a non-alias type is reached.
    ///
    /// Gives up after a bounded number of hops so that alias cycles terminate.
    #[must_use]
    pub fn resolve_alias(&self, ty: &Type) -> Type {
        let mut current = ty.clone();
        for _ in 0..16 {
            let Type::Ref(r) = &current else {
                return current;
            };
            match self.resolve(r) {
                Some(Decl::TypeAlias(alias)) => current = alias.ty,
                _ => return current,
            }
        }
        current
    }
}

impl fmt::Display for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, module) in self.modules.iter().enumerate() {
            if idx > 0 {
                f.write_str("\n\n")?;
            }
            write!(f, "{module}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decl::TypeAlias;

    #[test]
    fn upsert_replaces_by_name_and_keeps_position() {
        let mut schema = Schema::from_modules([Module::new("a"), Module::new("b")]);
        let mut replacement = Module::new("a");
        replacement.comments.push("v2".to_string());
        schema.upsert(replacement);
        assert_eq!(schema.module_names().collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(schema.module("a").map(|m| m.comments.len()), Some(1));
        assert!(schema.remove("a").is_some());
        assert!(schema.remove("a").is_none());
    }

    #[test]
    fn resolve_finds_builtins_without_builtin_module() {
        let schema = Schema::new();
        let data = schema
            .resolve_data(
                &Ref::new(BUILTIN_MODULE, builtin::HTTP_REQUEST)
                    .with_type_parameters(vec![Type::Unit, Type::String, Type::Unit]),
            )
            .unwrap();
        assert_eq!(data.field("pathParameters").map(|f| &f.ty), Some(&Type::String));
    }

    #[test]
    fn resolve_alias_stops_on_cycles() {
        let module = Module::new("m")
            .with_decl(Decl::TypeAlias(TypeAlias {
                name: "A".to_string(),
                export: false,
                ty: Type::reference("m", "B"),
                metadata: Vec::new(),
            }))
            .with_decl(Decl::TypeAlias(TypeAlias {
                name: "B".to_string(),
                export: false,
                ty: Type::reference("m", "A"),
                metadata: Vec::new(),
            }));
        let schema = Schema::from_modules([module]);
        assert!(matches!(schema.resolve_alias(&Type::reference("m", "A")), Type::Ref(_)));
    }
}
