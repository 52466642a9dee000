//! Recorded manipulations and their application to a property tree.
//!
//! Builders only record [`Manipulator`]s. At sample time the set is resolved
//! against a fresh tree, composite values are decomposed onto descendants,
//! and the resulting per-node operations are optimized: for each node and
//! slot the last operation wins, while filters and appliers accumulate.

use crate::error::{GenerationError, GenerationResult};
use crate::expression::{PathExpression, Selector};
use crate::tree::{Applier, NodeId, NodeKind, Predicate, PropertyTree};
use crate::types::TypeDescriptor;
use crate::value::Value;
use log::{debug, warn};
use rand::Rng;
use std::collections::HashMap;
use std::fmt;

/// What a manipulator does to the nodes its path resolves to
#[derive(Clone)]
pub enum ManipulatorKind {
    Set(Value),
    SetNull,
    SetNotNull,
    /// Container size, rolled uniformly from the inclusive range
    Size { min: usize, max: usize },
    /// Capture the first generated value and replay it afterwards
    Fix,
    Filter(Predicate),
    Apply(Applier),
    /// Values across the matched nodes must be pairwise distinct
    Unique,
}

impl ManipulatorKind {
    pub fn name(&self) -> &'static str {
        match self {
            ManipulatorKind::Set(_) => "set",
            ManipulatorKind::SetNull => "set_null",
            ManipulatorKind::SetNotNull => "set_not_null",
            ManipulatorKind::Size { .. } => "size",
            ManipulatorKind::Fix => "fix",
            ManipulatorKind::Filter(_) => "filter",
            ManipulatorKind::Apply(_) => "apply",
            ManipulatorKind::Unique => "unique",
        }
    }
}

impl fmt::Debug for ManipulatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ManipulatorKind::Set(value) => f.debug_tuple("Set").field(value).finish(),
            ManipulatorKind::Size { min, max } => f.debug_struct("Size").field("min", min).field("max", max).finish(),
            other => f.write_str(other.name()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Manipulator {
    pub path: PathExpression,
    pub kind: ManipulatorKind,
}

impl Manipulator {
    pub fn new(path: PathExpression, kind: ManipulatorKind) -> Self {
        Self { path, kind }
    }
}

/// Operation bound to one node after resolution and decomposition
#[derive(Clone)]
pub enum NodeOp {
    Set(Value),
    /// `true` forces null, `false` forbids it
    Null(bool),
    Fix,
    /// Captured fixed value. Filters, appliers and uniqueness already ran
    /// when it was first generated
    Replay(Value),
    Filter(Predicate),
    Apply(Applier),
    Unique(String),
}

impl fmt::Debug for NodeOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeOp::Set(value) => f.debug_tuple("Set").field(value).finish(),
            NodeOp::Null(null) => f.debug_tuple("Null").field(null).finish(),
            NodeOp::Fix => f.write_str("Fix"),
            NodeOp::Replay(value) => f.debug_tuple("Replay").field(value).finish(),
            NodeOp::Filter(_) => f.write_str("Filter"),
            NodeOp::Apply(_) => f.write_str("Apply"),
            NodeOp::Unique(scope) => f.debug_tuple("Unique").field(scope).finish(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedOp {
    pub node: NodeId,
    /// Position of the originating manipulator in the builder's log
    pub seq: usize,
    pub op: NodeOp,
}

/// Values captured by `Fix` manipulators, keyed by log position.
/// Replayed whole onto the fixed node rather than decomposed
pub type FixedValues = HashMap<usize, Vec<Value>>;

/// Ordered manipulation log of one builder
#[derive(Debug, Clone, Default)]
pub struct ManipulatorSet {
    manipulators: Vec<Manipulator>,
}

impl ManipulatorSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, manipulator: Manipulator) {
        self.manipulators.push(manipulator);
    }

    pub fn len(&self) -> usize {
        self.manipulators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.manipulators.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Manipulator> {
        self.manipulators.iter()
    }

    /// Log positions of every `Fix` manipulator
    pub fn fix_positions(&self) -> Vec<usize> {
        self.manipulators
            .iter()
            .enumerate()
            .filter(|(_, m)| matches!(m.kind, ManipulatorKind::Fix))
            .map(|(seq, _)| seq)
            .collect()
    }

    /// Resolve every manipulator in log order against `tree`.
    ///
    /// Size changes take effect immediately so later paths see the new
    /// children. Everything else is returned as per-node operations.
    pub fn resolve(&self, tree: &mut PropertyTree, fixed: &FixedValues) -> GenerationResult<Vec<ResolvedOp>> {
        let mut ops = Vec::new();
        for (seq, manipulator) in self.manipulators.iter().enumerate() {
            let nodes = manipulator.path.resolve(tree)?;
            debug!(
                "{} at {} resolved to {} node(s)",
                manipulator.kind.name(),
                manipulator.path,
                nodes.len()
            );

            match &manipulator.kind {
                ManipulatorKind::Set(value) => {
                    for node in nodes {
                        decompose(tree, node, value, seq, &mut ops)?;
                    }
                }
                ManipulatorKind::SetNull => {
                    for node in nodes {
                        ops.push(ResolvedOp { node, seq, op: NodeOp::Null(true) });
                    }
                }
                ManipulatorKind::SetNotNull => {
                    for node in nodes {
                        implied_not_null(tree, node, seq, &mut ops);
                        ops.push(ResolvedOp { node, seq, op: NodeOp::Null(false) });
                    }
                }
                ManipulatorKind::Size { min, max } => {
                    for node in nodes {
                        let size = if min == max { *min } else { tree.rng().gen_range(*min..=*max) };
                        tree.set_container_size(node, size)?;
                        tree.node_mut(node).state.manipulated = true;
                        implied_not_null(tree, node, seq, &mut ops);
                        ops.push(ResolvedOp { node, seq, op: NodeOp::Null(false) });
                    }
                }
                ManipulatorKind::Fix => match fixed.get(&seq) {
                    Some(values) if values.len() == nodes.len() => {
                        for (node, value) in nodes.into_iter().zip(values) {
                            implied_not_null(tree, node, seq, &mut ops);
                            ops.push(ResolvedOp { node, seq, op: NodeOp::Replay(value.clone()) });
                            ops.push(ResolvedOp { node, seq, op: NodeOp::Fix });
                        }
                    }
                    _ => {
                        for node in nodes {
                            ops.push(ResolvedOp { node, seq, op: NodeOp::Fix });
                        }
                    }
                },
                ManipulatorKind::Filter(predicate) => {
                    for node in nodes {
                        implied_not_null(tree, node, seq, &mut ops);
                        ops.push(ResolvedOp { node, seq, op: NodeOp::Filter(predicate.clone()) });
                    }
                }
                ManipulatorKind::Apply(applier) => {
                    for node in nodes {
                        implied_not_null(tree, node, seq, &mut ops);
                        ops.push(ResolvedOp { node, seq, op: NodeOp::Apply(applier.clone()) });
                    }
                }
                ManipulatorKind::Unique => {
                    let scope = manipulator.path.wildcarded().to_string();
                    for node in nodes {
                        implied_not_null(tree, node, seq, &mut ops);
                        ops.push(ResolvedOp { node, seq, op: NodeOp::Unique(scope.clone()) });
                    }
                }
            }
        }
        Ok(ops)
    }

    /// Resolve, optimize and install the log's effects onto `tree`
    pub fn apply(&self, tree: &mut PropertyTree, fixed: &FixedValues) -> GenerationResult<()> {
        let ops = optimize(self.resolve(tree, fixed)?);
        install(tree, &ops);
        Ok(())
    }
}

/// Every ancestor of a manipulated node must exist for the effect to show
fn implied_not_null(tree: &PropertyTree, node: NodeId, seq: usize, ops: &mut Vec<ResolvedOp>) {
    for ancestor in tree.ancestors(node).into_iter().rev() {
        ops.push(ResolvedOp {
            node: ancestor,
            seq,
            op: NodeOp::Null(false),
        });
    }
}

/// Spread a value over the subtree rooted at `node`.
///
/// Objects fan out by field name, containers are resized to the value's
/// length and fan out by position, maps by entry. Anything else lands on
/// `node` itself.
fn decompose(
    tree: &mut PropertyTree,
    node: NodeId,
    value: &Value,
    seq: usize,
    ops: &mut Vec<ResolvedOp>,
) -> GenerationResult<()> {
    if value.is_null() {
        ops.push(ResolvedOp { node, seq, op: NodeOp::Null(true) });
        return Ok(());
    }
    implied_not_null(tree, node, seq, ops);

    if tree.node(node).kind() == NodeKind::Abstract {
        if let Value::Object { type_name, .. } = value {
            tree.pin_concrete(node, TypeDescriptor::named(type_name))?;
        } else {
            tree.ensure_concrete(node)?;
        }
    }

    match (tree.node(node).kind(), value) {
        (NodeKind::Object, Value::Object { fields, .. }) => {
            ops.push(ResolvedOp { node, seq, op: NodeOp::Null(false) });
            let children = tree.children(node)?;
            for (name, field) in fields {
                let child = children.iter().copied().find(|child| {
                    matches!(tree.node(*child).selector(), Some(Selector::Field(n)) if n == name)
                });
                match child {
                    Some(child) => decompose(tree, child, field, seq, ops)?,
                    None => warn!("{} has no member `{}`; ignoring it", tree.path(node), name),
                }
            }
        }
        (NodeKind::Container, Value::Array(items) | Value::List(items) | Value::Set(items)) => {
            ops.push(ResolvedOp { node, seq, op: NodeOp::Null(false) });
            tree.set_container_size(node, items.len())?;
            tree.node_mut(node).state.manipulated = true;
            let children = tree.children(node)?;
            for (child, item) in children.into_iter().zip(items) {
                decompose(tree, child, item, seq, ops)?;
            }
        }
        (NodeKind::Map, Value::Map(entries)) => {
            ops.push(ResolvedOp { node, seq, op: NodeOp::Null(false) });
            tree.set_container_size(node, entries.len())?;
            tree.node_mut(node).state.manipulated = true;
            let children = tree.children(node)?;
            for (entry, (key, value)) in children.into_iter().zip(entries) {
                let halves = tree.children(entry)?;
                if let [key_node, value_node] = halves.as_slice() {
                    decompose(tree, *key_node, key, seq, ops)?;
                    decompose(tree, *value_node, value, seq, ops)?;
                }
            }
        }
        (NodeKind::Entry, Value::List(pair) | Value::Array(pair)) if pair.len() == 2 => {
            let halves = tree.children(node)?;
            if let [key_node, value_node] = halves.as_slice() {
                decompose(tree, *key_node, &pair[0], seq, ops)?;
                decompose(tree, *value_node, &pair[1], seq, ops)?;
            }
        }
        (NodeKind::Container | NodeKind::Map | NodeKind::Object | NodeKind::Entry, other) => {
            return Err(GenerationError::InvalidManipulation {
                path: tree.path(node).to_string(),
                reason: format!("cannot assign {:?} to `{}`", other, tree.node(node).ty()),
            });
        }
        _ => ops.push(ResolvedOp {
            node,
            seq,
            op: NodeOp::Set(value.clone()),
        }),
    }
    Ok(())
}

#[derive(Default)]
struct NodeSlots {
    value: Option<ResolvedOp>,
    fix: Option<ResolvedOp>,
    unique: Option<ResolvedOp>,
    filters: Vec<ResolvedOp>,
    applies: Vec<ResolvedOp>,
}

/// Collapse redundant operations.
///
/// Set, null and not-null share one slot per node and the latest wins. Fix
/// and unique are idempotent. Filters and appliers keep every entry in order.
/// Nodes keep the order in which they were first touched.
pub fn optimize(ops: Vec<ResolvedOp>) -> Vec<ResolvedOp> {
    let before = ops.len();
    let mut order: Vec<NodeId> = Vec::new();
    let mut slots: HashMap<NodeId, NodeSlots> = HashMap::new();

    for op in ops {
        let entry = slots.entry(op.node).or_insert_with(|| {
            order.push(op.node);
            NodeSlots::default()
        });
        match op.op {
            NodeOp::Set(_) | NodeOp::Replay(_) | NodeOp::Null(_) => entry.value = Some(op),
            NodeOp::Fix => entry.fix = Some(op),
            NodeOp::Unique(_) => entry.unique = Some(op),
            NodeOp::Filter(_) => entry.filters.push(op),
            NodeOp::Apply(_) => entry.applies.push(op),
        }
    }

    let mut optimized = Vec::new();
    for node in order {
        if let Some(slot) = slots.remove(&node) {
            optimized.extend(slot.value);
            optimized.extend(slot.fix);
            optimized.extend(slot.unique);
            optimized.extend(slot.filters);
            optimized.extend(slot.applies);
        }
    }
    debug!("optimized {} node operations down to {}", before, optimized.len());
    optimized
}

/// Write optimized operations into the nodes' override sets
pub fn install(tree: &mut PropertyTree, ops: &[ResolvedOp]) {
    for resolved in ops {
        let node = tree.node_mut(resolved.node);
        match &resolved.op {
            NodeOp::Set(value) => {
                node.overrides.value = Some(value.clone());
                node.overrides.null = Some(false);
                node.overrides.frozen = false;
                node.state.manipulated = true;
            }
            NodeOp::Replay(value) => {
                node.overrides.value = Some(value.clone());
                node.overrides.null = Some(false);
                node.overrides.frozen = true;
                node.state.manipulated = true;
            }
            NodeOp::Null(null) => {
                node.overrides.value = None;
                node.overrides.frozen = false;
                node.overrides.null = Some(*null);
                if *null {
                    node.state.manipulated = true;
                }
            }
            NodeOp::Fix => node.state.fixed = true,
            NodeOp::Unique(scope) => node.overrides.unique_scope = Some(scope.clone()),
            NodeOp::Filter(predicate) => node.overrides.filters.push(predicate.clone()),
            NodeOp::Apply(applier) => node.overrides.appliers.push(applier.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candidate::CandidateGenerators;
    use crate::constraints::DeclaredConstraints;
    use crate::context::{ContainerSizePolicy, GenerationContext, NullInjectPolicy};
    use crate::introspector::IntrospectorRegistry;
    use crate::types::{ObjectDef, TypeRegistry};
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use std::sync::Arc;

    fn tree() -> PropertyTree {
        let registry = TypeRegistry::new()
            .with(
                ObjectDef::new("Order")
                    .member("id", TypeDescriptor::int())
                    .member("customer", TypeDescriptor::named("Customer"))
                    .member("lines", TypeDescriptor::list(TypeDescriptor::string())),
            )
            .with(ObjectDef::new("Customer").member("name", TypeDescriptor::string()));
        let context = GenerationContext::new(
            Arc::new(registry),
            CandidateGenerators::default(),
            Arc::new(IntrospectorRegistry::default()),
            Arc::new(DeclaredConstraints),
            NullInjectPolicy::default(),
            ContainerSizePolicy { min: 1, max: 1 },
            Vec::new(),
            16,
            16,
        );
        PropertyTree::new(TypeDescriptor::named("Order"), Arc::new(context), ChaCha8Rng::seed_from_u64(1))
    }

    fn path(s: &str) -> PathExpression {
        PathExpression::parse(s).unwrap()
    }

    #[test]
    fn test_last_set_wins() {
        let mut set = ManipulatorSet::new();
        set.push(Manipulator::new(path("id"), ManipulatorKind::Set(Value::Int(1))));
        set.push(Manipulator::new(path("id"), ManipulatorKind::SetNull));
        set.push(Manipulator::new(path("id"), ManipulatorKind::Set(Value::Int(7))));

        let mut tree = tree();
        set.apply(&mut tree, &FixedValues::new()).unwrap();
        let id = path("id").resolve(&mut tree).unwrap()[0];
        assert_eq!(tree.node(id).overrides.value, Some(Value::Int(7)));
        assert_eq!(tree.node(id).overrides.null, Some(false));
    }

    #[test]
    fn test_set_null_after_set_clears_value() {
        let mut set = ManipulatorSet::new();
        set.push(Manipulator::new(path("customer.name"), ManipulatorKind::Set(Value::from("ada"))));
        set.push(Manipulator::new(path("customer"), ManipulatorKind::SetNull));

        let mut tree = tree();
        set.apply(&mut tree, &FixedValues::new()).unwrap();
        let customer = path("customer").resolve(&mut tree).unwrap()[0];
        assert_eq!(tree.node(customer).overrides.null, Some(true));
    }

    #[test]
    fn test_child_set_implies_parent_not_null() {
        let mut set = ManipulatorSet::new();
        set.push(Manipulator::new(path("customer"), ManipulatorKind::SetNull));
        set.push(Manipulator::new(path("customer.name"), ManipulatorKind::Set(Value::from("ada"))));

        let mut tree = tree();
        set.apply(&mut tree, &FixedValues::new()).unwrap();
        let customer = path("customer").resolve(&mut tree).unwrap()[0];
        assert_eq!(tree.node(customer).overrides.null, Some(false));
    }

    #[test]
    fn test_composite_set_is_decomposed() {
        let customer = Value::Object {
            type_name: "Customer".to_string(),
            fields: vec![("name".to_string(), Value::from("grace"))],
        };
        let mut set = ManipulatorSet::new();
        set.push(Manipulator::new(path("customer"), ManipulatorKind::Set(customer)));
        set.push(Manipulator::new(
            path("lines"),
            ManipulatorKind::Set(Value::List(vec![Value::from("a"), Value::from("b"), Value::from("c")])),
        ));

        let mut tree = tree();
        set.apply(&mut tree, &FixedValues::new()).unwrap();
        let name = path("customer.name").resolve(&mut tree).unwrap()[0];
        assert_eq!(tree.node(name).overrides.value, Some(Value::from("grace")));
        let lines = path("lines[*]").resolve(&mut tree).unwrap();
        assert_eq!(lines.len(), 3);
        assert_eq!(tree.node(lines[2]).overrides.value, Some(Value::from("c")));
    }

    #[test]
    fn test_size_applies_before_later_paths() {
        let mut set = ManipulatorSet::new();
        set.push(Manipulator::new(path("lines"), ManipulatorKind::Size { min: 4, max: 4 }));
        set.push(Manipulator::new(path("lines[3]"), ManipulatorKind::Set(Value::from("last"))));

        let mut tree = tree();
        set.apply(&mut tree, &FixedValues::new()).unwrap();
        let last = path("lines[3]").resolve(&mut tree).unwrap()[0];
        assert_eq!(tree.node(last).overrides.value, Some(Value::from("last")));
    }

    #[test]
    fn test_index_past_size_is_an_error() {
        let mut set = ManipulatorSet::new();
        set.push(Manipulator::new(path("lines[5]"), ManipulatorKind::Set(Value::from("x"))));
        let err = set.apply(&mut tree(), &FixedValues::new()).unwrap_err();
        assert!(matches!(err, GenerationError::PathResolution { .. }));
    }

    #[test]
    fn test_filters_accumulate() {
        let mut set = ManipulatorSet::new();
        set.push(Manipulator::new(path("id"), ManipulatorKind::Filter(Arc::new(|_: &Value| true))));
        set.push(Manipulator::new(path("id"), ManipulatorKind::Filter(Arc::new(|_: &Value| true))));
        let mut tree = tree();
        set.apply(&mut tree, &FixedValues::new()).unwrap();
        let id = path("id").resolve(&mut tree).unwrap()[0];
        assert_eq!(tree.node(id).overrides.filters.len(), 2);
    }

    #[test]
    fn test_fixed_values_replay_whole() {
        let mut set = ManipulatorSet::new();
        set.push(Manipulator::new(path("id"), ManipulatorKind::Fix));
        let mut fixed = FixedValues::new();
        fixed.insert(0, vec![Value::Int(99)]);

        let mut tree = tree();
        set.apply(&mut tree, &fixed).unwrap();
        let id = path("id").resolve(&mut tree).unwrap()[0];
        assert_eq!(tree.node(id).overrides.value, Some(Value::Int(99)));
        assert!(tree.node(id).overrides.frozen);
        assert!(tree.node(id).state.fixed);
        assert_eq!(set.fix_positions(), vec![0]);
    }

    #[test]
    fn test_replay_freezes_the_fixed_node_only() {
        let mut set = ManipulatorSet::new();
        set.push(Manipulator::new(path("customer"), ManipulatorKind::Fix));
        set.push(Manipulator::new(path("customer.name"), ManipulatorKind::Set(Value::from("ada"))));
        let customer = Value::Object {
            type_name: "Customer".to_string(),
            fields: vec![("name".to_string(), Value::from("ada"))],
        };
        let mut fixed = FixedValues::new();
        fixed.insert(0, vec![customer.clone()]);

        let mut tree = tree();
        set.apply(&mut tree, &fixed).unwrap();
        let node = path("customer").resolve(&mut tree).unwrap()[0];
        assert_eq!(tree.node(node).overrides.value, Some(customer));
        assert!(tree.node(node).overrides.frozen);
        let name = path("customer.name").resolve(&mut tree).unwrap()[0];
        assert!(!tree.node(name).overrides.frozen);
    }
}
