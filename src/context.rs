//! Generation context shared by every sample of a generator.
//!
//! Holds the declared types, the candidate generators and introspectors, the
//! null-injection and container-size policies, interface resolution, and the
//! two bounded caches (type → introspector strategy, root → uniqueness state).

use crate::cache::{CacheStats, LruCache};
use crate::candidate::CandidateGenerators;
use crate::constraints::{ConstraintSource, Constraints};
use crate::error::{GenerationError, GenerationResult};
use crate::introspector::{Introspector, IntrospectorRegistry};
use crate::types::{TypeDescriptor, TypeRegistry};
use crate::value::Value;
use log::trace;
use parking_lot::Mutex;
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

/// Probability-driven null injection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NullInjectPolicy {
    /// Chance that a nullable node collapses to null
    pub default_probability: f64,
    /// Whether bool/int/float/char nodes may be null
    pub nullable_primitives: bool,
    /// Whether array/list/set elements may be null
    pub nullable_container_elements: bool,
    /// Whether map values may be null; map keys never are
    pub nullable_map_values: bool,
}

impl Default for NullInjectPolicy {
    fn default() -> Self {
        Self {
            default_probability: 0.2,
            nullable_primitives: false,
            nullable_container_elements: false,
            nullable_map_values: false,
        }
    }
}

/// Where a node sits relative to its parent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeRole {
    Root,
    Member,
    Element,
    Entry,
    MapKey,
    MapValue,
}

impl NullInjectPolicy {
    /// Null probability for a node.
    ///
    /// Precedence, highest first: explicit manipulator (`forced`), a
    /// not-null/not-empty constraint, then the policy default for the role.
    pub fn probability(
        &self,
        role: NodeRole,
        ty: &TypeDescriptor,
        constraints: &Constraints,
        forced: Option<bool>,
    ) -> f64 {
        if let Some(null) = forced {
            return if null { 1.0 } else { 0.0 };
        }
        if constraints.forbids_null() {
            return 0.0;
        }
        let nullable = match role {
            NodeRole::Root | NodeRole::Entry | NodeRole::MapKey => false,
            NodeRole::Element => self.nullable_container_elements,
            NodeRole::MapValue => self.nullable_map_values,
            NodeRole::Member => true,
        };
        if !nullable || (ty.is_primitive() && !self.nullable_primitives) {
            return 0.0;
        }
        self.default_probability.clamp(0.0, 1.0)
    }
}

/// Default element counts for containers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerSizePolicy {
    pub min: usize,
    pub max: usize,
}

impl Default for ContainerSizePolicy {
    fn default() -> Self {
        Self { min: 0, max: 3 }
    }
}

impl ContainerSizePolicy {
    /// Inclusive size bounds after applying node constraints
    pub fn bounds(&self, constraints: &Constraints) -> (usize, usize) {
        let min = constraints.effective_min_size().unwrap_or(self.min);
        let max = constraints.max_size.unwrap_or_else(|| self.max.max(min));
        (min, max.max(min))
    }

    pub fn roll(&self, constraints: &Constraints, rng: &mut ChaCha8Rng) -> usize {
        let (min, max) = self.bounds(constraints);
        if min == max {
            min
        } else {
            rng.gen_range(min..=max)
        }
    }
}

/// Picks implementation candidates for abstract types
pub trait InterfaceResolver: fmt::Debug + Send + Sync {
    fn matches(&self, ty: &TypeDescriptor) -> bool;

    fn candidates(&self, ty: &TypeDescriptor, registry: &TypeRegistry) -> Vec<TypeDescriptor>;
}

/// Restricts one interface to an explicit implementation list
#[derive(Debug, Clone)]
pub struct FixedImplementations {
    interface: String,
    implementations: Vec<TypeDescriptor>,
}

impl FixedImplementations {
    pub fn new(interface: &str, implementations: Vec<TypeDescriptor>) -> Self {
        Self {
            interface: interface.to_string(),
            implementations,
        }
    }
}

impl InterfaceResolver for FixedImplementations {
    fn matches(&self, ty: &TypeDescriptor) -> bool {
        ty.type_name() == Some(self.interface.as_str())
    }

    fn candidates(&self, ty: &TypeDescriptor, registry: &TypeRegistry) -> Vec<TypeDescriptor> {
        self.implementations
            .iter()
            .map(|implementation| registry.resolve_child_type(implementation, ty))
            .collect()
    }
}

type ValueSet = Arc<Mutex<HashSet<Value>>>;

/// Previously generated values per uniqueness scope.
///
/// Each scope has its own lock so check-then-insert is atomic per set
/// without serializing unrelated scopes.
#[derive(Debug, Default)]
pub struct UniquenessContext {
    sets: Mutex<HashMap<String, ValueSet>>,
}

impl UniquenessContext {
    pub fn new() -> Self {
        Self::default()
    }

    fn set(&self, scope: &str) -> ValueSet {
        let mut sets = self.sets.lock();
        Arc::clone(sets.entry(scope.to_string()).or_default())
    }

    /// Insert `value` if absent; returns whether it was inserted
    pub fn try_insert(&self, scope: &str, value: &Value) -> bool {
        let set = self.set(scope);
        let mut values = set.lock();
        values.insert(value.clone())
    }

    pub fn remove(&self, scope: &str, value: &Value) {
        let set = self.set(scope);
        set.lock().remove(value);
    }

    pub fn contains(&self, scope: &str, value: &Value) -> bool {
        let set = self.set(scope);
        let contains = set.lock().contains(value);
        contains
    }

    pub fn len(&self, scope: &str) -> usize {
        let set = self.set(scope);
        let len = set.lock().len();
        len
    }

    pub fn clear(&self) {
        self.sets.lock().clear();
    }
}

/// Cache key for uniqueness state: one context per builder and root type
pub type RootKey = (u64, TypeDescriptor);

pub struct GenerationContext {
    registry: Arc<TypeRegistry>,
    generators: CandidateGenerators,
    introspectors: Arc<IntrospectorRegistry>,
    constraint_source: Arc<dyn ConstraintSource>,
    null_policy: NullInjectPolicy,
    size_policy: ContainerSizePolicy,
    resolvers: Vec<Arc<dyn InterfaceResolver>>,
    strategies: LruCache<TypeDescriptor, Arc<dyn Introspector>>,
    roots: LruCache<RootKey, Arc<UniquenessContext>>,
}

impl fmt::Debug for GenerationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GenerationContext")
            .field("null_policy", &self.null_policy)
            .field("size_policy", &self.size_policy)
            .field("resolvers", &self.resolvers.len())
            .field("strategies", &self.strategies.len())
            .field("roots", &self.roots.len())
            .finish()
    }
}

impl GenerationContext {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: Arc<TypeRegistry>,
        generators: CandidateGenerators,
        introspectors: Arc<IntrospectorRegistry>,
        constraint_source: Arc<dyn ConstraintSource>,
        null_policy: NullInjectPolicy,
        size_policy: ContainerSizePolicy,
        resolvers: Vec<Arc<dyn InterfaceResolver>>,
        strategy_capacity: usize,
        root_capacity: usize,
    ) -> Self {
        Self {
            registry,
            generators,
            introspectors,
            constraint_source,
            null_policy,
            size_policy,
            resolvers,
            strategies: LruCache::new(strategy_capacity),
            roots: LruCache::new(root_capacity),
        }
    }

    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    pub fn generators(&self) -> &CandidateGenerators {
        &self.generators
    }

    pub fn constraint_source(&self) -> &dyn ConstraintSource {
        self.constraint_source.as_ref()
    }

    pub fn null_policy(&self) -> &NullInjectPolicy {
        &self.null_policy
    }

    pub fn size_policy(&self) -> &ContainerSizePolicy {
        &self.size_policy
    }

    /// Whether the tree expands `ty` into children
    pub fn is_composite(&self, ty: &TypeDescriptor) -> bool {
        self.generators.find(ty, &self.registry).is_some()
    }

    pub fn is_container(&self, ty: &TypeDescriptor) -> bool {
        self.generators
            .find(ty, &self.registry)
            .map(|generator| generator.is_container())
            .unwrap_or(false)
    }

    /// Introspector for a type, memoized in the shared strategy cache
    pub fn strategy(&self, ty: &TypeDescriptor) -> GenerationResult<Arc<dyn Introspector>> {
        self.strategies.try_get_or_insert_with(ty.clone(), || {
            trace!("strategy cache miss for {}", ty);
            self.introspectors
                .lookup(ty, &self.registry)
                .ok_or_else(|| GenerationError::unsupported(ty, "no introspector supports this type"))
        })
    }

    pub fn strategy_stats(&self) -> CacheStats {
        self.strategies.stats()
    }

    /// Uniqueness state scoped to one builder's root type
    pub fn uniqueness(&self, builder_id: u64, root: &TypeDescriptor) -> Arc<UniquenessContext> {
        self.roots
            .get_or_insert_with((builder_id, root.clone()), || Arc::new(UniquenessContext::new()))
    }

    /// Drop the uniqueness state of one builder's root type
    pub fn reset_uniqueness(&self, builder_id: u64, root: &TypeDescriptor) {
        self.roots.remove(&(builder_id, root.clone()));
    }

    /// Implementation candidates for an abstract type: the first matching
    /// resolver wins, otherwise the registry's declared implementations
    pub fn implementations(&self, ty: &TypeDescriptor) -> Vec<TypeDescriptor> {
        match self.resolvers.iter().find(|resolver| resolver.matches(ty)) {
            Some(resolver) => resolver.candidates(ty, &self.registry),
            None => self.registry.implementations(ty),
        }
    }

    /// Pick one concrete implementation for an abstract type
    pub fn resolve_concrete(&self, ty: &TypeDescriptor, rng: &mut ChaCha8Rng) -> GenerationResult<TypeDescriptor> {
        let candidates = self.implementations(ty);
        if candidates.is_empty() {
            return Err(GenerationError::unsupported(ty, "interface has no implementations"));
        }
        let chosen = candidates[rng.gen_range(0..candidates.len())].clone();
        trace!("resolved {} to {}", ty, chosen);
        Ok(chosen)
    }
}
