//! Node candidate discovery.
//!
//! A [`NodeCandidateGenerator`] looks at one resolved type and proposes the
//! next layer of children without recursing any further. Generators are kept
//! in a priority list; the first one that supports a type owns it. A type no
//! generator supports is a leaf and is handed to an introspector whole.

use crate::constraints::Constraints;
use crate::error::{GenerationError, GenerationResult};
use crate::expression::Selector;
use crate::types::{RawType, TypeDescriptor, TypeRegistry};
use std::fmt;
use std::sync::Arc;

/// A proposed child, not yet materialized as a tree node
#[derive(Debug, Clone, PartialEq)]
pub struct NodeCandidate {
    pub ty: TypeDescriptor,
    /// Member name; `None` for container elements and map entries
    pub name: Option<String>,
    /// How the child is addressed from its parent
    pub selector: Selector,
    /// Constraints declared for this child
    pub constraints: Constraints,
    /// Key half of a map entry
    pub key: Option<Box<NodeCandidate>>,
    /// Value half of a map entry
    pub value: Option<Box<NodeCandidate>>,
}

impl NodeCandidate {
    pub fn member(name: &str, ty: TypeDescriptor, constraints: Constraints) -> Self {
        Self {
            ty,
            name: Some(name.to_string()),
            selector: Selector::Field(name.to_string()),
            constraints,
            key: None,
            value: None,
        }
    }

    pub fn element(index: usize, ty: TypeDescriptor, constraints: Constraints) -> Self {
        Self {
            ty,
            name: None,
            selector: Selector::Index(index),
            constraints,
            key: None,
            value: None,
        }
    }

    /// A map entry pairing a key candidate with a value candidate
    pub fn entry(index: usize, map: TypeDescriptor, key: NodeCandidate, value: NodeCandidate) -> Self {
        Self {
            ty: map,
            name: None,
            selector: Selector::Index(index),
            constraints: Constraints::default(),
            key: Some(Box::new(key)),
            value: Some(Box::new(value)),
        }
    }

    pub fn is_entry(&self) -> bool {
        self.key.is_some() && self.value.is_some()
    }
}

/// Strategy enumerating the direct children of a type
pub trait NodeCandidateGenerator: fmt::Debug + Send + Sync {
    fn name(&self) -> &'static str;

    fn is_supported(&self, ty: &TypeDescriptor, registry: &TypeRegistry) -> bool;

    /// Whether the child count comes from the container-size policy
    fn is_container(&self) -> bool {
        false
    }

    /// Propose children for `ty`. `size` is the resolved container size and
    /// is ignored by non-container generators.
    fn generate(
        &self,
        ty: &TypeDescriptor,
        registry: &TypeRegistry,
        owner: &Constraints,
        size: usize,
    ) -> GenerationResult<Vec<NodeCandidate>>;
}

/// One candidate per declared member, in collection order
#[derive(Debug, Default, Clone, Copy)]
pub struct MemberCandidateGenerator;

impl NodeCandidateGenerator for MemberCandidateGenerator {
    fn name(&self) -> &'static str {
        "member"
    }

    fn is_supported(&self, ty: &TypeDescriptor, registry: &TypeRegistry) -> bool {
        registry.is_object(ty)
    }

    fn generate(
        &self,
        ty: &TypeDescriptor,
        registry: &TypeRegistry,
        _owner: &Constraints,
        _size: usize,
    ) -> GenerationResult<Vec<NodeCandidate>> {
        Ok(registry
            .members(ty)?
            .into_iter()
            .map(|member| NodeCandidate::member(&member.name, member.ty, member.constraints))
            .collect())
    }
}

fn element_constraints(owner: &Constraints) -> Constraints {
    owner.element.as_deref().cloned().unwrap_or_default()
}

/// `size` unnamed candidates sharing an array's component type
#[derive(Debug, Default, Clone, Copy)]
pub struct ArrayElementCandidateGenerator;

impl NodeCandidateGenerator for ArrayElementCandidateGenerator {
    fn name(&self) -> &'static str {
        "array-element"
    }

    fn is_supported(&self, ty: &TypeDescriptor, _registry: &TypeRegistry) -> bool {
        matches!(ty.raw(), RawType::Array)
    }

    fn is_container(&self) -> bool {
        true
    }

    fn generate(
        &self,
        ty: &TypeDescriptor,
        _registry: &TypeRegistry,
        owner: &Constraints,
        size: usize,
    ) -> GenerationResult<Vec<NodeCandidate>> {
        let component = ty.args().first().cloned().unwrap_or_else(TypeDescriptor::unknown);
        let constraints = element_constraints(owner);
        Ok((0..size)
            .map(|index| NodeCandidate::element(index, component.clone(), constraints.clone()))
            .collect())
    }
}

/// `size` candidates of a list or set's single type argument
#[derive(Debug, Default, Clone, Copy)]
pub struct LinearContainerCandidateGenerator;

impl NodeCandidateGenerator for LinearContainerCandidateGenerator {
    fn name(&self) -> &'static str {
        "linear-container-element"
    }

    fn is_supported(&self, ty: &TypeDescriptor, _registry: &TypeRegistry) -> bool {
        matches!(ty.raw(), RawType::List | RawType::Set) && ty.args().len() == 1
    }

    fn is_container(&self) -> bool {
        true
    }

    fn generate(
        &self,
        ty: &TypeDescriptor,
        _registry: &TypeRegistry,
        owner: &Constraints,
        size: usize,
    ) -> GenerationResult<Vec<NodeCandidate>> {
        let element = ty.args()[0].clone();
        let constraints = element_constraints(owner);
        Ok((0..size)
            .map(|index| NodeCandidate::element(index, element.clone(), constraints.clone()))
            .collect())
    }
}

/// `size` paired key/value candidates for a two-argument map
#[derive(Debug, Default, Clone, Copy)]
pub struct MapEntryCandidateGenerator;

impl NodeCandidateGenerator for MapEntryCandidateGenerator {
    fn name(&self) -> &'static str {
        "map-entry"
    }

    fn is_supported(&self, ty: &TypeDescriptor, _registry: &TypeRegistry) -> bool {
        ty.is_map() && ty.args().len() == 2
    }

    fn is_container(&self) -> bool {
        true
    }

    fn generate(
        &self,
        ty: &TypeDescriptor,
        _registry: &TypeRegistry,
        owner: &Constraints,
        size: usize,
    ) -> GenerationResult<Vec<NodeCandidate>> {
        let key_ty = ty.args()[0].clone();
        let value_ty = ty.args()[1].clone();
        let key_constraints = owner.key.as_deref().cloned().unwrap_or_default();
        let value_constraints = owner.value.as_deref().cloned().unwrap_or_default();

        Ok((0..size)
            .map(|index| {
                let mut key = NodeCandidate::element(index, key_ty.clone(), key_constraints.clone());
                key.selector = Selector::MapKey;
                let mut value = NodeCandidate::element(index, value_ty.clone(), value_constraints.clone());
                value.selector = Selector::MapValue;
                NodeCandidate::entry(index, ty.clone(), key, value)
            })
            .collect())
    }
}

/// Priority-ordered generator list; the first supporting generator wins
#[derive(Debug, Clone)]
pub struct CandidateGenerators {
    generators: Vec<Arc<dyn NodeCandidateGenerator>>,
}

impl Default for CandidateGenerators {
    fn default() -> Self {
        Self {
            generators: vec![
                Arc::new(ArrayElementCandidateGenerator),
                Arc::new(LinearContainerCandidateGenerator),
                Arc::new(MapEntryCandidateGenerator),
                Arc::new(MemberCandidateGenerator),
            ],
        }
    }
}

impl CandidateGenerators {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a generator ahead of every existing one
    pub fn prepend(&mut self, generator: Arc<dyn NodeCandidateGenerator>) {
        self.generators.insert(0, generator);
    }

    pub fn find(&self, ty: &TypeDescriptor, registry: &TypeRegistry) -> Option<&Arc<dyn NodeCandidateGenerator>> {
        self.generators.iter().find(|g| g.is_supported(ty, registry))
    }

    /// Candidates for `ty` from the owning generator, or an error for leaves
    pub fn generate(
        &self,
        ty: &TypeDescriptor,
        registry: &TypeRegistry,
        owner: &Constraints,
        size: usize,
    ) -> GenerationResult<Vec<NodeCandidate>> {
        match self.find(ty, registry) {
            Some(generator) => generator.generate(ty, registry, owner, size),
            None => Err(GenerationError::unsupported(ty, "no candidate generator supports this type")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ObjectDef;

    fn registry() -> TypeRegistry {
        TypeRegistry::new().with(
            ObjectDef::new("Person")
                .constrained_member("name", TypeDescriptor::string(), Constraints::new().not_null())
                .member("age", TypeDescriptor::int()),
        )
    }

    #[test]
    fn test_priority_order_picks_container_before_member() {
        let generators = CandidateGenerators::default();
        let registry = registry();
        let list = TypeDescriptor::list(TypeDescriptor::string());
        assert_eq!(generators.find(&list, &registry).unwrap().name(), "linear-container-element");
        assert_eq!(
            generators.find(&TypeDescriptor::named("Person"), &registry).unwrap().name(),
            "member"
        );
        assert!(generators.find(&TypeDescriptor::int(), &registry).is_none());
    }

    #[test]
    fn test_member_candidates_carry_constraints() {
        let candidates = CandidateGenerators::default()
            .generate(&TypeDescriptor::named("Person"), &registry(), &Constraints::default(), 0)
            .unwrap();
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].name.as_deref(), Some("name"));
        assert!(candidates[0].constraints.not_null);
        assert_eq!(candidates[1].selector, Selector::Field("age".to_string()));
    }

    #[test]
    fn test_container_candidates_are_sized_and_indexed() {
        let owner = Constraints::new().element(Constraints::new().range(1, 3));
        let candidates = CandidateGenerators::default()
            .generate(&TypeDescriptor::array(TypeDescriptor::int()), &registry(), &owner, 4)
            .unwrap();
        assert_eq!(candidates.len(), 4);
        assert_eq!(candidates[3].selector, Selector::Index(3));
        assert_eq!(candidates[0].constraints.max_value, Some(3));
        assert!(candidates.iter().all(|c| c.name.is_none()));
    }

    #[test]
    fn test_map_candidates_are_pairs() {
        let map = TypeDescriptor::map(TypeDescriptor::string(), TypeDescriptor::int());
        let candidates = CandidateGenerators::default()
            .generate(&map, &registry(), &Constraints::default(), 2)
            .unwrap();
        assert_eq!(candidates.len(), 2);
        assert!(candidates.iter().all(NodeCandidate::is_entry));
        let key = candidates[1].key.as_ref().unwrap();
        assert_eq!(key.ty, TypeDescriptor::string());
        assert_eq!(key.selector, Selector::MapKey);
        assert_eq!(candidates[1].value.as_ref().unwrap().selector, Selector::MapValue);
    }

    #[test]
    fn test_leaf_type_is_unsupported() {
        let err = CandidateGenerators::default()
            .generate(&TypeDescriptor::bool(), &registry(), &Constraints::default(), 0)
            .unwrap_err();
        assert!(matches!(err, GenerationError::UnsupportedType { .. }));
    }
}
