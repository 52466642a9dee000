//! Lazy property tree.
//!
//! Nodes live in an arena and refer to each other by [`NodeId`]; parent links
//! are plain ids, so the tree has a single owner and no reference cycles.
//! Children are materialized one level at a time on first access, which keeps
//! self-referential types constructible: only the generation step decides how
//! deep a recursive branch actually goes.

use crate::candidate::NodeCandidate;
use crate::constraints::Constraints;
use crate::context::{GenerationContext, NodeRole};
use crate::error::{GenerationError, GenerationResult};
use crate::expression::{PathExpression, Selector};
use crate::types::TypeDescriptor;
use crate::value::Value;
use log::trace;
use rand_chacha::ChaCha8Rng;
use std::fmt;
use std::sync::Arc;

/// Post-condition evaluated against a node's generated value
pub type Predicate = Arc<dyn Fn(&Value) -> bool + Send + Sync>;

/// In-place transformation of a node's generated value
pub type Applier = Arc<dyn Fn(&mut Value) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub usize);

/// Structural role of a node, decided by its effective type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// Generated whole by a leaf introspector
    Leaf,
    /// Registered object type with member children
    Object,
    /// Interface whose implementation is not chosen yet
    Abstract,
    /// Array, list or set with element children
    Container,
    /// Map with entry children
    Map,
    /// One map entry with exactly a key child and a value child
    Entry,
}

/// Lifecycle flags of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeState {
    /// Cleared when null injection collapsed this node's subtree
    pub active: bool,
    /// Excluded from re-rolling across retries
    pub fixed: bool,
    /// Carries at least one manipulator effect
    pub manipulated: bool,
    /// Memo was discarded for a retry and awaits regeneration
    pub reset: bool,
}

impl Default for NodeState {
    fn default() -> Self {
        Self {
            active: true,
            fixed: false,
            manipulated: false,
            reset: false,
        }
    }
}

/// Effects installed on a node by manipulators
#[derive(Clone, Default)]
pub struct OverrideSet {
    /// Explicit value; bypasses null injection and introspection
    pub value: Option<Value>,
    /// `Some(true)` forces null, `Some(false)` forbids it
    pub null: Option<bool>,
    /// Post-conditions, all of which must hold
    pub filters: Vec<Predicate>,
    /// Transformations applied in order after generation
    pub appliers: Vec<Applier>,
    /// Uniqueness scope requested by a manipulator
    pub unique_scope: Option<String>,
    /// `value` is a replayed fixed value, returned as is
    pub frozen: bool,
}

impl fmt::Debug for OverrideSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OverrideSet")
            .field("value", &self.value)
            .field("null", &self.null)
            .field("filters", &self.filters.len())
            .field("appliers", &self.appliers.len())
            .field("unique_scope", &self.unique_scope)
            .field("frozen", &self.frozen)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct PropertyNode {
    id: NodeId,
    declared: TypeDescriptor,
    ty: TypeDescriptor,
    selector: Option<Selector>,
    role: NodeRole,
    parent: Option<NodeId>,
    children: Option<Vec<NodeId>>,
    kind: NodeKind,
    depth: usize,
    constraints: Constraints,
    container_size: Option<usize>,
    pub overrides: OverrideSet,
    pub memo: Option<Value>,
    pub state: NodeState,
}

impl PropertyNode {
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Effective type; the chosen implementation for interface nodes
    pub fn ty(&self) -> &TypeDescriptor {
        &self.ty
    }

    /// Statically declared type
    pub fn declared(&self) -> &TypeDescriptor {
        &self.declared
    }

    /// How the parent addresses this node; `None` for the root
    pub fn selector(&self) -> Option<&Selector> {
        self.selector.as_ref()
    }

    pub fn role(&self) -> NodeRole {
        self.role
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    /// Number of ancestors
    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn constraints(&self) -> &Constraints {
        &self.constraints
    }

    pub fn container_size(&self) -> Option<usize> {
        self.container_size
    }

    pub fn is_composite(&self) -> bool {
        !matches!(self.kind, NodeKind::Leaf)
    }

    pub fn is_expanded(&self) -> bool {
        self.children.is_some()
    }
}

fn kind_of(context: &GenerationContext, ty: &TypeDescriptor) -> NodeKind {
    if context.registry().is_abstract(ty) {
        NodeKind::Abstract
    } else if ty.is_map() && context.is_container(ty) {
        NodeKind::Map
    } else if context.is_container(ty) {
        NodeKind::Container
    } else if context.is_composite(ty) {
        NodeKind::Object
    } else {
        NodeKind::Leaf
    }
}

/// The per-sample node arena plus the random source that drives expansion
pub struct PropertyTree {
    nodes: Vec<PropertyNode>,
    context: Arc<GenerationContext>,
    rng: ChaCha8Rng,
}

impl fmt::Debug for PropertyTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PropertyTree").field("nodes", &self.nodes.len()).finish()
    }
}

impl PropertyTree {
    pub fn new(root: TypeDescriptor, context: Arc<GenerationContext>, rng: ChaCha8Rng) -> Self {
        let kind = kind_of(&context, &root);
        let node = PropertyNode {
            id: NodeId(0),
            declared: root.clone(),
            ty: root,
            selector: None,
            role: NodeRole::Root,
            parent: None,
            children: None,
            kind,
            depth: 0,
            constraints: Constraints::default(),
            container_size: None,
            overrides: OverrideSet::default(),
            memo: None,
            state: NodeState::default(),
        };
        Self {
            nodes: vec![node],
            context,
            rng,
        }
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    pub fn node(&self, id: NodeId) -> &PropertyNode {
        &self.nodes[id.0]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut PropertyNode {
        &mut self.nodes[id.0]
    }

    /// Number of materialized nodes, detached ones included
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn context(&self) -> &Arc<GenerationContext> {
        &self.context
    }

    pub fn rng(&mut self) -> &mut ChaCha8Rng {
        &mut self.rng
    }

    /// Choose an implementation for an interface node, once
    pub fn ensure_concrete(&mut self, id: NodeId) -> GenerationResult<()> {
        if self.node(id).kind != NodeKind::Abstract {
            return Ok(());
        }
        let context = Arc::clone(&self.context);
        let declared = self.node(id).ty.clone();
        let concrete = context.resolve_concrete(&declared, &mut self.rng)?;
        self.assign_type(id, concrete)
    }

    /// Pin an interface node to a specific implementation before expansion
    pub fn pin_concrete(&mut self, id: NodeId, concrete: TypeDescriptor) -> GenerationResult<()> {
        let node = self.node(id);
        if node.kind != NodeKind::Abstract {
            if node.ty == concrete {
                return Ok(());
            }
            return Err(GenerationError::InvalidManipulation {
                path: self.path(id).to_string(),
                reason: format!("`{}` is already resolved to `{}`", node.declared, node.ty),
            });
        }
        self.assign_type(id, concrete)
    }

    fn assign_type(&mut self, id: NodeId, concrete: TypeDescriptor) -> GenerationResult<()> {
        let kind = kind_of(&self.context, &concrete);
        if kind == NodeKind::Abstract {
            return Err(GenerationError::unsupported(&concrete, "implementation is itself abstract"));
        }
        let node = self.node_mut(id);
        node.ty = concrete;
        node.kind = kind;
        Ok(())
    }

    /// Children already materialized, without expanding
    pub fn materialized_children(&self, id: NodeId) -> &[NodeId] {
        self.node(id).children.as_deref().unwrap_or(&[])
    }

    /// Children of a node, expanding exactly one level on first access.
    ///
    /// Container sizes are rolled here once and kept for the node's lifetime;
    /// only [`PropertyTree::set_container_size`] changes them afterwards.
    pub fn children(&mut self, id: NodeId) -> GenerationResult<Vec<NodeId>> {
        if let Some(children) = &self.node(id).children {
            return Ok(children.clone());
        }
        self.ensure_concrete(id)?;

        let context = Arc::clone(&self.context);
        let node = self.node(id);
        let kind = node.kind;
        // entries never get here: their key and value are attached on creation
        if kind == NodeKind::Leaf {
            self.node_mut(id).children = Some(Vec::new());
            return Ok(Vec::new());
        }

        let ty = node.ty.clone();
        let constraints = node.constraints.clone();
        let rolled = node.container_size;
        let size = match kind {
            NodeKind::Container | NodeKind::Map => match rolled {
                Some(size) => size,
                None => context.size_policy().roll(&constraints, &mut self.rng),
            },
            _ => 0,
        };
        if matches!(kind, NodeKind::Container | NodeKind::Map) {
            self.node_mut(id).container_size = Some(size);
        }

        let candidates = context.generators().generate(&ty, context.registry(), &constraints, size)?;
        trace!("expanding {} ({}) into {} children", self.path(id), ty, candidates.len());

        let mut children = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            children.push(self.attach(id, candidate)?);
        }
        self.node_mut(id).children = Some(children.clone());
        Ok(children)
    }

    /// Materialize a candidate as a child of `parent`
    fn attach(&mut self, parent: NodeId, candidate: NodeCandidate) -> GenerationResult<NodeId> {
        let parent_node = self.node(parent);
        let role = match (&candidate.selector, parent_node.kind) {
            (Selector::Field(_), _) => NodeRole::Member,
            (Selector::Index(_), NodeKind::Map) => NodeRole::Entry,
            (Selector::MapKey, _) => NodeRole::MapKey,
            (Selector::MapValue, _) => NodeRole::MapValue,
            _ => NodeRole::Element,
        };
        let depth = parent_node.depth + 1;
        let path = self.path(parent).child(candidate.selector.clone());
        let constraints = self
            .context
            .constraint_source()
            .constraints_for(&path, &candidate)
            .unwrap_or_default();

        let id = NodeId(self.nodes.len());
        let kind = if candidate.is_entry() {
            NodeKind::Entry
        } else {
            kind_of(&self.context, &candidate.ty)
        };
        self.nodes.push(PropertyNode {
            id,
            declared: candidate.ty.clone(),
            ty: candidate.ty.clone(),
            selector: Some(candidate.selector.clone()),
            role,
            parent: Some(parent),
            children: None,
            kind,
            depth,
            constraints,
            container_size: None,
            overrides: OverrideSet::default(),
            memo: None,
            state: NodeState::default(),
        });

        if let (Some(key), Some(value)) = (candidate.key, candidate.value) {
            let key_id = self.attach(id, *key)?;
            let value_id = self.attach(id, *value)?;
            self.node_mut(id).children = Some(vec![key_id, value_id]);
        }
        Ok(id)
    }

    /// Resize a container explicitly.
    ///
    /// Existing children are kept up to the new size; surplus children are
    /// detached and new ones are appended.
    pub fn set_container_size(&mut self, id: NodeId, size: usize) -> GenerationResult<()> {
        self.ensure_concrete(id)?;
        let node = self.node(id);
        if !matches!(node.kind, NodeKind::Container | NodeKind::Map) {
            return Err(GenerationError::InvalidManipulation {
                path: self.path(id).to_string(),
                reason: format!("`{}` is not a container", node.ty),
            });
        }
        let ty = node.ty.clone();
        let constraints = node.constraints.clone();

        let existing = match node.children.clone() {
            None => {
                self.node_mut(id).container_size = Some(size);
                return Ok(());
            }
            Some(existing) => existing,
        };
        if existing.len() == size {
            self.node_mut(id).container_size = Some(size);
            return Ok(());
        }

        let context = Arc::clone(&self.context);
        let candidates = context.generators().generate(&ty, context.registry(), &constraints, size)?;

        let mut children: Vec<NodeId> = existing.iter().copied().take(size).collect();
        for detached in existing.iter().skip(size) {
            self.node_mut(*detached).parent = None;
        }
        for candidate in candidates.into_iter().skip(children.len()) {
            children.push(self.attach(id, candidate)?);
        }

        let node = self.node_mut(id);
        node.container_size = Some(size);
        node.children = Some(children);
        node.memo = None;
        Ok(())
    }

    /// Path reconstructed from the parent chain
    pub fn path(&self, id: NodeId) -> PathExpression {
        let mut selectors = Vec::new();
        let mut current = Some(id);
        while let Some(node_id) = current {
            let node = self.node(node_id);
            if let Some(selector) = &node.selector {
                selectors.push(selector.clone());
            }
            current = node.parent;
        }
        selectors.reverse();
        PathExpression::from_selectors(selectors)
    }

    /// Ancestors from the parent up to the root
    pub fn ancestors(&self, id: NodeId) -> Vec<NodeId> {
        let mut ancestors = Vec::new();
        let mut current = self.node(id).parent;
        while let Some(parent) = current {
            ancestors.push(parent);
            current = self.node(parent).parent;
        }
        ancestors
    }

    /// Whether the node or any ancestor is fixed
    pub fn is_fixed(&self, id: NodeId) -> bool {
        self.node(id).state.fixed || self.ancestors(id).iter().any(|a| self.node(*a).state.fixed)
    }

    /// Materialized descendants in depth-first order, `id` excluded
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = self.materialized_children(id).iter().rev().copied().collect();
        while let Some(next) = stack.pop() {
            out.push(next);
            stack.extend(self.materialized_children(next).iter().rev().copied());
        }
        out
    }

    /// Uniqueness scope shared by every element position of this node
    pub fn unique_scope(&self, id: NodeId) -> String {
        self.path(id).wildcarded().to_string()
    }

    /// Forget generated values below and at `id`, keeping fixed nodes
    pub fn clear_subtree(&mut self, id: NodeId) {
        let mut targets = vec![id];
        targets.extend(self.descendants(id));
        for target in targets {
            if self.is_fixed(target) {
                continue;
            }
            let node = self.node_mut(target);
            if node.memo.take().is_some() {
                node.state.reset = true;
            }
            node.state.active = true;
        }
    }
}
