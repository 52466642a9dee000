//! Type descriptors and generic resolution
//!
//! A [`TypeDescriptor`] is a raw type together with its already-resolved type
//! arguments. Descriptors are immutable values compared structurally, so they
//! double as cache keys for generation strategies.
//!
//! User types are not discovered by reflection; they are declared up front in
//! a [`TypeRegistry`] and referenced by name through [`RawType::Named`].

mod registry;

pub use self::registry::{
    Construction, EnumDef, InterfaceDef, Member, ObjectDef, TypeDef, TypeParam, TypeRegistry,
};

use serde::{Deserialize, Serialize};
use std::fmt;

/// The raw (unparameterized) part of a type
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RawType {
    Bool,
    Int,
    Float,
    Char,
    String,
    /// Erased or unbounded type variable; introspectors fall back to a default
    Unknown,
    /// Unresolved reference to an enclosing type parameter
    TypeVar(String),
    /// Fixed-layout sequence, one argument (component type)
    Array,
    /// Ordered linear container, one argument
    List,
    /// Linear container with unique elements, one argument
    Set,
    /// Key/value container, two arguments
    Map,
    /// Object, enum or interface declared in the registry
    Named(String),
}

/// A raw type plus its resolved type arguments
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TypeDescriptor {
    raw: RawType,
    args: Vec<TypeDescriptor>,
}

impl TypeDescriptor {
    pub fn new(raw: RawType, args: Vec<TypeDescriptor>) -> Self {
        Self { raw, args }
    }

    pub fn bool() -> Self {
        Self::new(RawType::Bool, Vec::new())
    }

    pub fn int() -> Self {
        Self::new(RawType::Int, Vec::new())
    }

    pub fn float() -> Self {
        Self::new(RawType::Float, Vec::new())
    }

    pub fn char() -> Self {
        Self::new(RawType::Char, Vec::new())
    }

    pub fn string() -> Self {
        Self::new(RawType::String, Vec::new())
    }

    /// The sentinel produced for erased type variables
    pub fn unknown() -> Self {
        Self::new(RawType::Unknown, Vec::new())
    }

    pub fn var(name: &str) -> Self {
        Self::new(RawType::TypeVar(name.to_string()), Vec::new())
    }

    pub fn array(component: TypeDescriptor) -> Self {
        Self::new(RawType::Array, vec![component])
    }

    pub fn list(element: TypeDescriptor) -> Self {
        Self::new(RawType::List, vec![element])
    }

    pub fn set(element: TypeDescriptor) -> Self {
        Self::new(RawType::Set, vec![element])
    }

    pub fn map(key: TypeDescriptor, value: TypeDescriptor) -> Self {
        Self::new(RawType::Map, vec![key, value])
    }

    pub fn named(name: &str) -> Self {
        Self::new(RawType::Named(name.to_string()), Vec::new())
    }

    /// A named generic type with its arguments, e.g. `Page<String>`
    pub fn generic(name: &str, args: Vec<TypeDescriptor>) -> Self {
        Self::new(RawType::Named(name.to_string()), args)
    }

    pub fn raw(&self) -> &RawType {
        &self.raw
    }

    pub fn args(&self) -> &[TypeDescriptor] {
        &self.args
    }

    /// Name of a registry type, if this descriptor refers to one
    pub fn type_name(&self) -> Option<&str> {
        match &self.raw {
            RawType::Named(name) => Some(name),
            _ => None,
        }
    }

    /// Scalar types that are never null unless the policy says otherwise
    pub fn is_primitive(&self) -> bool {
        matches!(
            self.raw,
            RawType::Bool | RawType::Int | RawType::Float | RawType::Char
        )
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self.raw, RawType::Unknown)
    }

    /// Array, list or set
    pub fn is_linear_container(&self) -> bool {
        matches!(self.raw, RawType::Array | RawType::List | RawType::Set)
    }

    pub fn is_map(&self) -> bool {
        matches!(self.raw, RawType::Map)
    }

    pub fn is_container(&self) -> bool {
        self.is_linear_container() || self.is_map()
    }

    /// Whether any type variable is still unresolved inside this descriptor
    pub fn has_type_vars(&self) -> bool {
        matches!(self.raw, RawType::TypeVar(_)) || self.args.iter().any(|a| a.has_type_vars())
    }

    /// Replace type variables using `lookup`; variables it cannot resolve
    /// collapse to [`RawType::Unknown`].
    pub fn substitute<F>(&self, lookup: &F) -> TypeDescriptor
    where
        F: Fn(&str) -> Option<TypeDescriptor>,
    {
        match &self.raw {
            RawType::TypeVar(name) => lookup(name).unwrap_or_else(TypeDescriptor::unknown),
            _ => TypeDescriptor {
                raw: self.raw.clone(),
                args: self.args.iter().map(|a| a.substitute(lookup)).collect(),
            },
        }
    }
}

impl fmt::Display for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match &self.raw {
            RawType::Bool => "Bool",
            RawType::Int => "Int",
            RawType::Float => "Float",
            RawType::Char => "Char",
            RawType::String => "String",
            RawType::Unknown => "?",
            RawType::TypeVar(name) => name.as_str(),
            RawType::Array => {
                return match self.args.first() {
                    Some(component) => write!(f, "{}[]", component),
                    None => write!(f, "?[]"),
                };
            }
            RawType::List => "List",
            RawType::Set => "Set",
            RawType::Map => "Map",
            RawType::Named(name) => name.as_str(),
        };
        write!(f, "{}", name)?;
        if !self.args.is_empty() {
            write!(f, "<")?;
            for (i, arg) in self.args.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}", arg)?;
            }
            write!(f, ">")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_renders_nested_generics() {
        let ty = TypeDescriptor::map(
            TypeDescriptor::string(),
            TypeDescriptor::list(TypeDescriptor::generic("Page", vec![TypeDescriptor::int()])),
        );
        assert_eq!(ty.to_string(), "Map<String, List<Page<Int>>>");
        assert_eq!(TypeDescriptor::array(TypeDescriptor::float()).to_string(), "Float[]");
    }

    #[test]
    fn test_substitute_collapses_unresolved_vars_to_unknown() {
        let declared = TypeDescriptor::map(TypeDescriptor::var("K"), TypeDescriptor::var("V"));
        let resolved = declared.substitute(&|name| {
            if name == "K" {
                Some(TypeDescriptor::string())
            } else {
                None
            }
        });
        assert_eq!(
            resolved,
            TypeDescriptor::map(TypeDescriptor::string(), TypeDescriptor::unknown())
        );
        assert!(!resolved.has_type_vars());
    }

    #[test]
    fn test_structural_equality() {
        assert_eq!(
            TypeDescriptor::list(TypeDescriptor::named("Item")),
            TypeDescriptor::list(TypeDescriptor::named("Item"))
        );
        assert_ne!(
            TypeDescriptor::list(TypeDescriptor::named("Item")),
            TypeDescriptor::set(TypeDescriptor::named("Item"))
        );
    }
}
