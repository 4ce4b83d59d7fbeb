//! Depth-first traversal over a module's nodes.

use crate::decl::{Decl, EnumValue, Field};
use crate::metadata::Metadata;
use crate::module::Module;
use crate::types::{Ref, Type};

/// A borrowed schema node.
#[derive(Debug, Clone, Copy)]
pub enum Node<'a> {
    /// The module itself.
    Module(&'a Module),
    /// A declaration.
    Decl(&'a Decl),
    /// A data field.
    Field(&'a Field),
    /// A type, at any nesting depth.
    Type(&'a Type),
    /// A metadata entry.
    Metadata(&'a Metadata),
    /// A reference held by metadata (calls, topics, catch verbs, ...).
    MetadataRef(&'a Ref),
}

/// Visits every node of `module` in pre-order.
pub fn walk<'a>(module: &'a Module, visit: &mut impl FnMut(Node<'a>)) {
    visit(Node::Module(module));
    for decl in &module.decls {
        walk_decl(decl, visit);
    }
}

fn walk_decl<'a>(decl: &'a Decl, visit: &mut impl FnMut(Node<'a>)) {
    visit(Node::Decl(decl));
    match decl {
        Decl::Verb(v) => {
            walk_type(&v.request, visit);
            walk_type(&v.response, visit);
        }
        Decl::Data(d) => {
            for field in &d.fields {
                visit(Node::Field(field));
                walk_type(&field.ty, visit);
                field.metadata.iter().for_each(|m| walk_metadata(m, visit));
            }
        }
        Decl::TypeAlias(t) => walk_type(&t.ty, visit),
        Decl::Enum(e) => {
            if let Some(ty) = &e.ty {
                walk_type(ty, visit);
            }
            for variant in &e.variants {
                if let EnumValue::Type(ty) = &variant.value {
                    walk_type(ty, visit);
                }
            }
        }
        Decl::Config(c) => walk_type(&c.ty, visit),
        Decl::Secret(s) => walk_type(&s.ty, visit),
        Decl::Topic(t) => walk_type(&t.event, visit),
        Decl::Database(_) => {}
    }
    decl.metadata().iter().for_each(|m| walk_metadata(m, visit));
}

fn walk_type<'a>(ty: &'a Type, visit: &mut impl FnMut(Node<'a>)) {
    visit(Node::Type(ty));
    match ty {
        Type::Array { element } => walk_type(element, visit),
        Type::Map { key, value } => {
            walk_type(key, visit);
            walk_type(value, visit);
        }
        Type::Optional { inner } => walk_type(inner, visit),
        Type::Ref(r) => r.type_parameters.iter().for_each(|t| walk_type(t, visit)),
        _ => {}
    }
}

fn walk_metadata<'a>(meta: &'a Metadata, visit: &mut impl FnMut(Node<'a>)) {
    visit(Node::Metadata(meta));
    let refs: &[Ref] = match meta {
        Metadata::Calls { calls } | Metadata::Databases { calls } => calls,
        Metadata::Publisher { topics } => topics,
        Metadata::Config { config } => config,
        Metadata::Secrets { secrets } => secrets,
        Metadata::Subscriber { topic, .. } => std::slice::from_ref(topic),
        Metadata::Retry {
            catch: Some(catch), ..
        } => std::slice::from_ref(catch),
        _ => &[],
    };
    refs.iter().for_each(|r| visit(Node::MetadataRef(r)));
}

/// Every type reference in `module`, excluding metadata references.
#[must_use]
pub fn type_refs(module: &Module) -> Vec<&Ref> {
    let mut out = Vec::new();
    walk(module, &mut |node| {
        if let Node::Type(Type::Ref(r)) = node {
            out.push(r);
        }
    });
    out
}
