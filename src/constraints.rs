//! Per-node value constraints and the sources that supply them.
//!
//! The engine never interprets validation annotations itself. A
//! [`ConstraintSource`] hands back an optional [`Constraints`] value for each
//! node candidate; the generation context turns that into null-injection,
//! sizing and uniqueness decisions, and leaf introspectors use the ranges.

use crate::candidate::NodeCandidate;
use crate::expression::PathExpression;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Range, size, nullability and uniqueness metadata attached to a node
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Constraints {
    /// Inclusive lower bound for integers
    pub min_value: Option<i64>,
    /// Inclusive upper bound for integers
    pub max_value: Option<i64>,
    /// Inclusive lower bound for floats
    pub min_float: Option<f64>,
    /// Exclusive upper bound for floats
    pub max_float: Option<f64>,
    /// Minimum length of strings or element count of containers
    pub min_size: Option<usize>,
    /// Maximum length of strings or element count of containers
    pub max_size: Option<usize>,
    /// Characters strings are drawn from
    pub alphabet: Option<String>,
    /// The node never collapses to null
    pub not_null: bool,
    /// Implies `not_null`; containers and strings hold at least one element
    pub not_empty: bool,
    /// The value must not repeat within its uniqueness scope
    pub unique: bool,
    /// Constraints applied to each element of an array, list or set
    pub element: Option<Box<Constraints>>,
    /// Constraints applied to each key of a map
    pub key: Option<Box<Constraints>>,
    /// Constraints applied to each value of a map
    pub value: Option<Box<Constraints>>,
}

impl Constraints {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn range(mut self, min: i64, max: i64) -> Self {
        self.min_value = Some(min);
        self.max_value = Some(max);
        self
    }

    pub fn float_range(mut self, min: f64, max: f64) -> Self {
        self.min_float = Some(min);
        self.max_float = Some(max);
        self
    }

    pub fn size(mut self, min: usize, max: usize) -> Self {
        self.min_size = Some(min);
        self.max_size = Some(max);
        self
    }

    pub fn alphabet(mut self, alphabet: &str) -> Self {
        self.alphabet = Some(alphabet.to_string());
        self
    }

    pub fn not_null(mut self) -> Self {
        self.not_null = true;
        self
    }

    pub fn not_empty(mut self) -> Self {
        self.not_empty = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn element(mut self, element: Constraints) -> Self {
        self.element = Some(Box::new(element));
        self
    }

    pub fn key(mut self, key: Constraints) -> Self {
        self.key = Some(Box::new(key));
        self
    }

    pub fn value(mut self, value: Constraints) -> Self {
        self.value = Some(Box::new(value));
        self
    }

    pub fn is_empty(&self) -> bool {
        *self == Constraints::default()
    }

    /// Whether null is excluded, either directly or through `not_empty`
    pub fn forbids_null(&self) -> bool {
        self.not_null || self.not_empty
    }

    /// Effective minimum size, raised to one by `not_empty`
    pub fn effective_min_size(&self) -> Option<usize> {
        match (self.min_size, self.not_empty) {
            (Some(min), true) => Some(min.max(1)),
            (None, true) => Some(1),
            (min, false) => min,
        }
    }

    /// Overlay `other` on top of `self`; set fields in `other` win and flags
    /// accumulate.
    pub fn merge(&self, other: &Constraints) -> Constraints {
        fn nested(a: &Option<Box<Constraints>>, b: &Option<Box<Constraints>>) -> Option<Box<Constraints>> {
            match (a, b) {
                (Some(a), Some(b)) => Some(Box::new(a.merge(b))),
                (Some(a), None) => Some(a.clone()),
                (None, b) => b.clone(),
            }
        }

        Constraints {
            min_value: other.min_value.or(self.min_value),
            max_value: other.max_value.or(self.max_value),
            min_float: other.min_float.or(self.min_float),
            max_float: other.max_float.or(self.max_float),
            min_size: other.min_size.or(self.min_size),
            max_size: other.max_size.or(self.max_size),
            alphabet: other.alphabet.clone().or_else(|| self.alphabet.clone()),
            not_null: self.not_null || other.not_null,
            not_empty: self.not_empty || other.not_empty,
            unique: self.unique || other.unique,
            element: nested(&self.element, &other.element),
            key: nested(&self.key, &other.key),
            value: nested(&self.value, &other.value),
        }
    }
}

/// Supplies optional constraints for a node candidate at a given path
pub trait ConstraintSource: fmt::Debug + Send + Sync {
    fn constraints_for(&self, path: &PathExpression, candidate: &NodeCandidate) -> Option<Constraints>;
}

/// Constraints declared on members and inherited from container declarations
#[derive(Debug, Default, Clone, Copy)]
pub struct DeclaredConstraints;

impl ConstraintSource for DeclaredConstraints {
    fn constraints_for(&self, _path: &PathExpression, candidate: &NodeCandidate) -> Option<Constraints> {
        if candidate.constraints.is_empty() {
            None
        } else {
            Some(candidate.constraints.clone())
        }
    }
}

/// Constraints attached to path expressions, e.g. `"orders[*].quantity"`
#[derive(Debug, Default, Clone)]
pub struct PathConstraints {
    entries: Vec<(PathExpression, Constraints)>,
}

impl PathConstraints {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach constraints to every node matching `expression`
    pub fn with(mut self, expression: &str, constraints: Constraints) -> crate::error::GenerationResult<Self> {
        let compiled = PathExpression::parse(expression)?;
        self.entries.push((compiled, constraints));
        Ok(self)
    }
}

impl ConstraintSource for PathConstraints {
    fn constraints_for(&self, path: &PathExpression, _candidate: &NodeCandidate) -> Option<Constraints> {
        self.entries
            .iter()
            .filter(|(pattern, _)| pattern.matches(path))
            .fold(None, |acc: Option<Constraints>, (_, constraints)| {
                Some(match acc {
                    Some(acc) => acc.merge(constraints),
                    None => constraints.clone(),
                })
            })
    }
}

/// Several sources consulted in order; later sources override earlier ones
#[derive(Debug, Clone, Default)]
pub struct CompositeConstraintSource {
    sources: Vec<Arc<dyn ConstraintSource>>,
}

impl CompositeConstraintSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, source: Arc<dyn ConstraintSource>) {
        self.sources.push(source);
    }
}

impl ConstraintSource for CompositeConstraintSource {
    fn constraints_for(&self, path: &PathExpression, candidate: &NodeCandidate) -> Option<Constraints> {
        self.sources
            .iter()
            .filter_map(|source| source.constraints_for(path, candidate))
            .fold(None, |acc: Option<Constraints>, next| {
                Some(match acc {
                    Some(acc) => acc.merge(&next),
                    None => next,
                })
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TypeDescriptor;

    #[test]
    fn test_merge_prefers_overlay_and_accumulates_flags() {
        let base = Constraints::new().range(0, 10).not_null().element(Constraints::new().size(1, 2));
        let overlay = Constraints::new().range(5, 7).unique().element(Constraints::new().not_empty());
        let merged = base.merge(&overlay);
        assert_eq!(merged.min_value, Some(5));
        assert_eq!(merged.max_value, Some(7));
        assert!(merged.not_null && merged.unique);
        let element = merged.element.unwrap();
        assert_eq!(element.max_size, Some(2));
        assert!(element.not_empty);
    }

    #[test]
    fn test_not_empty_raises_min_size() {
        assert_eq!(Constraints::new().not_empty().effective_min_size(), Some(1));
        assert_eq!(Constraints::new().size(3, 5).not_empty().effective_min_size(), Some(3));
        assert_eq!(Constraints::new().effective_min_size(), None);
        assert!(Constraints::new().not_empty().forbids_null());
    }

    #[test]
    fn test_path_constraints_match_wildcards() {
        let source = PathConstraints::new()
            .with("orders[*].quantity", Constraints::new().range(1, 9))
            .unwrap();
        let candidate = NodeCandidate::member("quantity", TypeDescriptor::int(), Constraints::default());
        let hit = PathExpression::parse("orders[4].quantity").unwrap();
        let miss = PathExpression::parse("orders[4].price").unwrap();
        assert_eq!(source.constraints_for(&hit, &candidate).unwrap().max_value, Some(9));
        assert!(source.constraints_for(&miss, &candidate).is_none());
    }

    #[test]
    fn test_composite_source_layers_declared_and_path_constraints() {
        let mut composite = CompositeConstraintSource::new();
        composite.push(Arc::new(DeclaredConstraints));
        composite.push(Arc::new(
            PathConstraints::new().with("age", Constraints::new().range(18, 65)).unwrap(),
        ));
        let candidate = NodeCandidate::member("age", TypeDescriptor::int(), Constraints::new().range(0, 120).not_null());
        let path = PathExpression::parse("age").unwrap();
        let merged = composite.constraints_for(&path, &candidate).unwrap();
        assert_eq!((merged.min_value, merged.max_value), (Some(18), Some(65)));
        assert!(merged.not_null);
    }
}
