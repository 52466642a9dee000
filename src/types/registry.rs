//! Declared user types: objects, enums and interfaces.

use super::{RawType, TypeDescriptor};
use crate::constraints::Constraints;
use crate::error::{GenerationError, GenerationResult};
use std::collections::HashMap;

/// Supertype chains deeper than this are treated as cyclic
const MAX_SUPERTYPE_DEPTH: usize = 64;

/// How an object value is assembled from its generated members
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Construction {
    /// Every collected member, in collection order
    AssignByName,
    /// Exactly these parameters, in this order; absent members become null
    Constructor(Vec<String>),
}

/// A type parameter with an optional upper bound
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeParam {
    pub name: String,
    pub bound: Option<TypeDescriptor>,
}

/// A declared member (field) of an object type
#[derive(Debug, Clone, PartialEq)]
pub struct Member {
    pub name: String,
    pub ty: TypeDescriptor,
    pub constraints: Constraints,
}

impl Member {
    pub fn new(name: &str, ty: TypeDescriptor) -> Self {
        Self {
            name: name.to_string(),
            ty,
            constraints: Constraints::default(),
        }
    }

    pub fn with_constraints(mut self, constraints: Constraints) -> Self {
        self.constraints = constraints;
        self
    }
}

/// Object type declaration
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectDef {
    pub name: String,
    pub type_params: Vec<TypeParam>,
    pub supertype: Option<TypeDescriptor>,
    pub members: Vec<Member>,
    pub construction: Construction,
}

impl ObjectDef {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            type_params: Vec::new(),
            supertype: None,
            members: Vec::new(),
            construction: Construction::AssignByName,
        }
    }

    pub fn type_param(mut self, name: &str) -> Self {
        self.type_params.push(TypeParam {
            name: name.to_string(),
            bound: None,
        });
        self
    }

    /// A type parameter that collapses to `bound` when left unresolved
    pub fn bounded_type_param(mut self, name: &str, bound: TypeDescriptor) -> Self {
        self.type_params.push(TypeParam {
            name: name.to_string(),
            bound: Some(bound),
        });
        self
    }

    pub fn extends(mut self, supertype: TypeDescriptor) -> Self {
        self.supertype = Some(supertype);
        self
    }

    pub fn member(mut self, name: &str, ty: TypeDescriptor) -> Self {
        self.members.push(Member::new(name, ty));
        self
    }

    pub fn constrained_member(mut self, name: &str, ty: TypeDescriptor, constraints: Constraints) -> Self {
        self.members.push(Member::new(name, ty).with_constraints(constraints));
        self
    }

    pub fn constructor(mut self, params: &[&str]) -> Self {
        self.construction = Construction::Constructor(params.iter().map(|p| p.to_string()).collect());
        self
    }
}

/// Enum type declaration; generated as one of its variant names
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumDef {
    pub name: String,
    pub variants: Vec<String>,
}

impl EnumDef {
    pub fn new(name: &str, variants: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            variants: variants.iter().map(|v| v.to_string()).collect(),
        }
    }
}

/// Interface (abstract) type declaration with its known implementations
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceDef {
    pub name: String,
    pub type_params: Vec<TypeParam>,
    pub implementations: Vec<TypeDescriptor>,
}

impl InterfaceDef {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            type_params: Vec::new(),
            implementations: Vec::new(),
        }
    }

    pub fn type_param(mut self, name: &str) -> Self {
        self.type_params.push(TypeParam {
            name: name.to_string(),
            bound: None,
        });
        self
    }

    pub fn implementation(mut self, ty: TypeDescriptor) -> Self {
        self.implementations.push(ty);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TypeDef {
    Object(ObjectDef),
    Enum(EnumDef),
    Interface(InterfaceDef),
}

impl TypeDef {
    pub fn name(&self) -> &str {
        match self {
            TypeDef::Object(def) => &def.name,
            TypeDef::Enum(def) => &def.name,
            TypeDef::Interface(def) => &def.name,
        }
    }

    fn type_params(&self) -> &[TypeParam] {
        match self {
            TypeDef::Object(def) => &def.type_params,
            TypeDef::Interface(def) => &def.type_params,
            TypeDef::Enum(_) => &[],
        }
    }
}

impl From<ObjectDef> for TypeDef {
    fn from(def: ObjectDef) -> Self {
        TypeDef::Object(def)
    }
}

impl From<EnumDef> for TypeDef {
    fn from(def: EnumDef) -> Self {
        TypeDef::Enum(def)
    }
}

impl From<InterfaceDef> for TypeDef {
    fn from(def: InterfaceDef) -> Self {
        TypeDef::Interface(def)
    }
}

/// Registry of declared user types, keyed by name
#[derive(Debug, Clone, Default)]
pub struct TypeRegistry {
    defs: HashMap<String, TypeDef>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a declaration, replacing any previous one with the same name
    pub fn register(&mut self, def: impl Into<TypeDef>) -> &mut Self {
        let def = def.into();
        self.defs.insert(def.name().to_string(), def);
        self
    }

    pub fn with(mut self, def: impl Into<TypeDef>) -> Self {
        self.register(def);
        self
    }

    pub fn get(&self, name: &str) -> Option<&TypeDef> {
        self.defs.get(name)
    }

    pub fn lookup(&self, ty: &TypeDescriptor) -> Option<&TypeDef> {
        ty.type_name().and_then(|name| self.get(name))
    }

    pub fn is_object(&self, ty: &TypeDescriptor) -> bool {
        matches!(self.lookup(ty), Some(TypeDef::Object(_)))
    }

    pub fn is_enum(&self, ty: &TypeDescriptor) -> bool {
        matches!(self.lookup(ty), Some(TypeDef::Enum(_)))
    }

    /// Whether the type must be replaced by a concrete implementation
    pub fn is_abstract(&self, ty: &TypeDescriptor) -> bool {
        matches!(self.lookup(ty), Some(TypeDef::Interface(_)))
    }

    /// Resolve a member's declared type against its owner's resolved
    /// descriptor by substituting type variables positionally.
    ///
    /// A variable with no matching argument falls back to its bound, or to
    /// [`TypeDescriptor::unknown`] when erased.
    pub fn resolve_child_type(&self, declared: &TypeDescriptor, owner: &TypeDescriptor) -> TypeDescriptor {
        if !declared.has_type_vars() {
            return declared.clone();
        }
        let params = self.lookup(owner).map(|def| def.type_params()).unwrap_or(&[]);
        declared.substitute(&|name: &str| {
            let index = params.iter().position(|p| p.name == name)?;
            owner
                .args()
                .get(index)
                .cloned()
                .or_else(|| params[index].bound.clone())
        })
    }

    /// Members of an object type with inherited members first.
    ///
    /// A member redeclared closer to `ty` replaces the inherited member of the
    /// same name at the inherited position.
    pub fn members(&self, ty: &TypeDescriptor) -> GenerationResult<Vec<Member>> {
        self.collect_members(ty, 0)
    }

    fn collect_members(&self, ty: &TypeDescriptor, depth: usize) -> GenerationResult<Vec<Member>> {
        if depth > MAX_SUPERTYPE_DEPTH {
            return Err(GenerationError::unsupported(ty, "cyclic supertype chain"));
        }
        let def = match self.lookup(ty) {
            Some(TypeDef::Object(def)) => def,
            Some(_) => return Err(GenerationError::unsupported(ty, "not an object type")),
            None => return Err(GenerationError::unsupported(ty, "type is not registered")),
        };

        let mut collected = match &def.supertype {
            Some(supertype) => {
                let resolved = self.resolve_child_type(supertype, ty);
                self.collect_members(&resolved, depth + 1)?
            }
            None => Vec::new(),
        };

        for member in &def.members {
            let resolved = Member {
                name: member.name.clone(),
                ty: self.resolve_child_type(&member.ty, ty),
                constraints: member.constraints.clone(),
            };
            match collected.iter_mut().find(|m| m.name == member.name) {
                Some(slot) => *slot = resolved,
                None => collected.push(resolved),
            }
        }
        Ok(collected)
    }

    pub fn construction(&self, ty: &TypeDescriptor) -> Construction {
        match self.lookup(ty) {
            Some(TypeDef::Object(def)) => def.construction.clone(),
            _ => Construction::AssignByName,
        }
    }

    pub fn enum_variants(&self, ty: &TypeDescriptor) -> Option<&[String]> {
        match self.lookup(ty) {
            Some(TypeDef::Enum(def)) => Some(&def.variants),
            _ => None,
        }
    }

    /// Declared implementations of an interface, resolved against the
    /// interface's own type arguments
    pub fn implementations(&self, ty: &TypeDescriptor) -> Vec<TypeDescriptor> {
        match self.lookup(ty) {
            Some(TypeDef::Interface(def)) => def
                .implementations
                .iter()
                .map(|implementation| self.resolve_child_type(implementation, ty))
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Whether `candidate` is a declared implementation of interface `ty`
    pub fn implements(&self, candidate: &str, ty: &TypeDescriptor) -> bool {
        self.implementations(ty)
            .iter()
            .any(|implementation| matches!(implementation.raw(), RawType::Named(name) if name == candidate))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> TypeRegistry {
        TypeRegistry::new()
            .with(
                ObjectDef::new("Base")
                    .type_param("T")
                    .member("id", TypeDescriptor::int())
                    .member("payload", TypeDescriptor::var("T"))
                    .member("label", TypeDescriptor::string()),
            )
            .with(
                ObjectDef::new("Derived")
                    .type_param("E")
                    .extends(TypeDescriptor::generic("Base", vec![TypeDescriptor::list(TypeDescriptor::var("E"))]))
                    .member("label", TypeDescriptor::char())
                    .member("extra", TypeDescriptor::bool()),
            )
            .with(
                ObjectDef::new("Boxed")
                    .bounded_type_param("N", TypeDescriptor::float())
                    .member("value", TypeDescriptor::var("N")),
            )
    }

    #[test]
    fn test_members_resolve_generic_supertype() {
        let registry = registry();
        let ty = TypeDescriptor::generic("Derived", vec![TypeDescriptor::string()]);
        let members = registry.members(&ty).unwrap();
        let names: Vec<&str> = members.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["id", "payload", "label", "extra"]);
        assert_eq!(members[1].ty, TypeDescriptor::list(TypeDescriptor::string()));
        // nearest declaration wins, in the inherited slot
        assert_eq!(members[2].ty, TypeDescriptor::char());
    }

    #[test]
    fn test_erased_type_variable_becomes_unknown() {
        let registry = registry();
        let members = registry.members(&TypeDescriptor::named("Base")).unwrap();
        assert_eq!(members[1].ty, TypeDescriptor::unknown());
    }

    #[test]
    fn test_unresolved_variable_uses_bound() {
        let registry = registry();
        let members = registry.members(&TypeDescriptor::named("Boxed")).unwrap();
        assert_eq!(members[0].ty, TypeDescriptor::float());
    }

    #[test]
    fn test_cyclic_supertype_is_rejected() {
        let registry = TypeRegistry::new()
            .with(ObjectDef::new("A").extends(TypeDescriptor::named("B")))
            .with(ObjectDef::new("B").extends(TypeDescriptor::named("A")));
        let err = registry.members(&TypeDescriptor::named("A")).unwrap_err();
        assert!(matches!(err, GenerationError::UnsupportedType { .. }));
    }

    #[test]
    fn test_interface_implementations_are_resolved() {
        let registry = TypeRegistry::new().with(
            InterfaceDef::new("Shape")
                .type_param("T")
                .implementation(TypeDescriptor::generic("Circle", vec![TypeDescriptor::var("T")]))
                .implementation(TypeDescriptor::named("Square")),
        );
        let ty = TypeDescriptor::generic("Shape", vec![TypeDescriptor::int()]);
        assert!(registry.is_abstract(&ty));
        assert_eq!(
            registry.implementations(&ty)[0],
            TypeDescriptor::generic("Circle", vec![TypeDescriptor::int()])
        );
        assert!(registry.implements("Square", &ty));
        assert!(!registry.implements("Triangle", &ty));
    }
}
