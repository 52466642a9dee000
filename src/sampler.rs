//! The sampling loop.
//!
//! One call to [`Sampler::run`] walks the phases
//! `BuildTree → ApplyManipulators → Generate → Validate → Done`, looping
//! through `Retry` when a retryable failure occurs, and ending in `Failed`
//! once the try budget is spent. Retries keep the tree: fixed subtrees and
//! manipulated nodes survive, everything else is regenerated.

use crate::context::{GenerationContext, UniquenessContext};
use crate::error::{GenerationError, GenerationResult};
use crate::expression::Selector;
use crate::introspector::{ChildValue, IntrospectRequest};
use crate::manipulator::{FixedValues, ManipulatorSet};
use crate::tree::{NodeId, NodeKind, PropertyTree};
use crate::types::{RawType, TypeDescriptor};
use crate::validator::{check_constraints, Validator, Violation};
use crate::value::Value;
use log::{debug, trace, warn};
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

/// Bounds and seed of the sampling loop
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplerConfig {
    /// Fixed seed for reproducible samples; entropy when absent
    pub seed: Option<u64>,
    /// Generation attempts per sample, the first one included
    pub max_tries: u32,
    /// Re-rolls allowed for one unique node before it gives up
    pub max_unique_misses: u32,
    /// Re-rolls allowed for one filtered node before it gives up
    pub max_filter_attempts: u32,
    /// Nesting past which composites collapse to null or empty
    pub max_depth: usize,
    pub strategy_cache_capacity: usize,
    pub context_cache_capacity: usize,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            seed: None,
            max_tries: 10,
            max_unique_misses: 100,
            max_filter_attempts: 100,
            max_depth: 16,
            strategy_cache_capacity: 2048,
            context_cache_capacity: 1000,
        }
    }
}

impl SamplerConfig {
    pub fn from_json(json: &str) -> GenerationResult<Self> {
        let config: SamplerConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> GenerationResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> GenerationResult<()> {
        if self.max_tries == 0 {
            return Err(GenerationError::Config("max_tries must be at least 1".to_string()));
        }
        if self.max_unique_misses == 0 || self.max_filter_attempts == 0 {
            return Err(GenerationError::Config("miss budgets must be at least 1".to_string()));
        }
        if self.strategy_cache_capacity == 0 || self.context_cache_capacity == 0 {
            return Err(GenerationError::Config("cache capacities must be at least 1".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplePhase {
    Idle,
    BuildTree,
    ApplyManipulators,
    Generate,
    Validate,
    Retry,
    Done,
    Failed,
}

/// Counters accumulated over samples
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleStats {
    pub samples: u64,
    pub attempts: u64,
    pub retries: u64,
    pub failures: u64,
    pub validation_failures: u64,
    pub uniqueness_misses: u64,
    pub filter_rejections: u64,
    pub null_injections: u64,
    /// Shared by every builder of a fixture, not counted per builder
    pub strategy_cache_hits: u64,
    /// Shared like `strategy_cache_hits`
    pub strategy_cache_misses: u64,
}

impl SampleStats {
    pub fn merge(&mut self, other: &SampleStats) {
        self.samples += other.samples;
        self.attempts += other.attempts;
        self.retries += other.retries;
        self.failures += other.failures;
        self.validation_failures += other.validation_failures;
        self.uniqueness_misses += other.uniqueness_misses;
        self.filter_rejections += other.filter_rejections;
        self.null_injections += other.null_injections;
    }
}

/// A finished sample plus what it learned along the way
#[derive(Debug, Clone)]
pub struct SampleOutcome {
    pub value: Value,
    /// Values captured for `Fix` manipulators that had none yet
    pub captured: FixedValues,
}

/// Uniqueness inserts made during one attempt, undone if the attempt fails
type Journal = Vec<(String, Value)>;

pub struct Sampler<'a> {
    context: Arc<GenerationContext>,
    config: &'a SamplerConfig,
    validator: &'a dyn Validator,
    uniqueness: Arc<UniquenessContext>,
    phase: SamplePhase,
    stats: SampleStats,
}

impl<'a> Sampler<'a> {
    pub fn new(
        context: Arc<GenerationContext>,
        config: &'a SamplerConfig,
        validator: &'a dyn Validator,
        uniqueness: Arc<UniquenessContext>,
    ) -> Self {
        Self {
            context,
            config,
            validator,
            uniqueness,
            phase: SamplePhase::Idle,
            stats: SampleStats::default(),
        }
    }

    pub fn phase(&self) -> SamplePhase {
        self.phase
    }

    pub fn stats(&self) -> &SampleStats {
        &self.stats
    }

    fn transition(&mut self, next: SamplePhase) {
        debug!("sample phase {:?} -> {:?}", self.phase, next);
        self.phase = next;
    }

    /// Produce one sample of `root` under `manipulators`
    pub fn run(
        &mut self,
        root: &TypeDescriptor,
        manipulators: &ManipulatorSet,
        fixed: &FixedValues,
        rng: ChaCha8Rng,
    ) -> GenerationResult<SampleOutcome> {
        let result = self.attempt_all(root, manipulators, fixed, rng);
        if result.is_err() {
            self.stats.failures += 1;
            self.transition(SamplePhase::Failed);
        }
        result
    }

    fn attempt_all(
        &mut self,
        root: &TypeDescriptor,
        manipulators: &ManipulatorSet,
        fixed: &FixedValues,
        rng: ChaCha8Rng,
    ) -> GenerationResult<SampleOutcome> {
        self.transition(SamplePhase::BuildTree);
        let mut tree = PropertyTree::new(root.clone(), Arc::clone(&self.context), rng);

        self.transition(SamplePhase::ApplyManipulators);
        manipulators.apply(&mut tree, fixed)?;

        let tries = self.config.max_tries;
        let mut last = None;
        for attempt in 1..=tries {
            self.stats.attempts += 1;
            self.transition(SamplePhase::Generate);

            let mut journal = Journal::new();
            let root_id = tree.root();
            let failure = match self.generate(&mut tree, root_id, &mut journal) {
                Ok(value) => {
                    self.transition(SamplePhase::Validate);
                    let violations = self.validate(&tree, &value);
                    if violations.is_empty() {
                        let captured = capture(&mut tree, manipulators, fixed)?;
                        self.stats.samples += 1;
                        self.transition(SamplePhase::Done);
                        return Ok(SampleOutcome { value, captured });
                    }
                    self.stats.validation_failures += 1;
                    GenerationError::Invalid(violations)
                }
                Err(err) if err.is_retryable() => err,
                Err(err) => {
                    self.rollback(journal);
                    return Err(err);
                }
            };

            debug!("attempt {}/{} failed: {}", attempt, tries, failure);
            self.rollback(journal);
            last = Some(failure);
            if attempt < tries {
                self.stats.retries += 1;
                self.transition(SamplePhase::Retry);
                tree.clear_subtree(root_id);
            }
        }

        warn!("no valid sample of {} after {} tries", root, tries);
        Err(match last {
            Some(err @ GenerationError::UniquenessExhausted { .. }) => err,
            Some(cause) => {
                let violations = match &cause {
                    GenerationError::Invalid(violations) => violations.clone(),
                    _ => Vec::new(),
                };
                GenerationError::RetryExhausted {
                    tries,
                    violations,
                    cause: Box::new(cause),
                }
            }
            None => GenerationError::Config("max_tries must be at least 1".to_string()),
        })
    }

    fn rollback(&self, journal: Journal) {
        for (scope, value) in journal.into_iter().rev() {
            self.uniqueness.remove(&scope, &value);
        }
    }

    /// Value of one node: memoized, otherwise produced and then checked
    /// against its filters and uniqueness scope
    fn generate(&mut self, tree: &mut PropertyTree, id: NodeId, journal: &mut Journal) -> GenerationResult<Value> {
        if let Some(value) = &tree.node(id).memo {
            return Ok(value.clone());
        }

        let node = tree.node(id);
        if node.overrides.frozen {
            if let Some(value) = node.overrides.value.clone() {
                let node = tree.node_mut(id);
                node.memo = Some(value.clone());
                node.state.reset = false;
                return Ok(value);
            }
        }
        let filters = node.overrides.filters.clone();
        let appliers = node.overrides.appliers.clone();
        let explicit = node.overrides.value.is_some();
        let scope = match &node.overrides.unique_scope {
            Some(scope) => Some(scope.clone()),
            None if node.constraints().unique => Some(tree.unique_scope(id)),
            None => None,
        };

        let mut rejected = 0;
        let mut misses = 0;
        let value = loop {
            let mut value = self.produce(tree, id, journal)?;

            if !filters.iter().all(|filter| filter(&value)) {
                rejected += 1;
                self.stats.filter_rejections += 1;
                trace!("filter rejected {:?} at {}", value, tree.path(id));
                if explicit || rejected >= self.config.max_filter_attempts {
                    return Err(GenerationError::FilterExhausted {
                        path: tree.path(id).to_string(),
                        attempts: rejected,
                    });
                }
                tree.clear_subtree(id);
                continue;
            }

            for applier in &appliers {
                applier(&mut value);
            }

            if let Some(scope) = &scope {
                if !value.is_null() {
                    if !self.uniqueness.try_insert(scope, &value) {
                        misses += 1;
                        self.stats.uniqueness_misses += 1;
                        if explicit || misses >= self.config.max_unique_misses {
                            return Err(GenerationError::UniquenessExhausted {
                                path: scope.clone(),
                                misses,
                            });
                        }
                        tree.clear_subtree(id);
                        continue;
                    }
                    journal.push((scope.clone(), value.clone()));
                }
            }
            break value;
        };

        let node = tree.node_mut(id);
        node.memo = Some(value.clone());
        node.state.reset = false;
        Ok(value)
    }

    /// Raw value of one node before filters and uniqueness
    fn produce(&mut self, tree: &mut PropertyTree, id: NodeId, journal: &mut Journal) -> GenerationResult<Value> {
        let node = tree.node(id);
        if let Some(value) = &node.overrides.value {
            return Ok(value.clone());
        }

        let probability =
            self.context
                .null_policy()
                .probability(node.role(), node.declared(), node.constraints(), node.overrides.null);
        let forced = node.overrides.null == Some(true);
        if probability >= 1.0 || (probability > 0.0 && tree.rng().gen_bool(probability)) {
            if !forced {
                self.stats.null_injections += 1;
            }
            trace!("{} collapsed to null", tree.path(id));
            tree.node_mut(id).state.active = false;
            return Ok(Value::Null);
        }

        tree.ensure_concrete(id)?;
        let node = tree.node(id);
        if node.depth() > self.config.max_depth && node.is_composite() && !node.state.manipulated {
            match node.kind() {
                NodeKind::Container | NodeKind::Map => {
                    trace!("{} is past the depth bound; emptying", tree.path(id));
                    tree.set_container_size(id, 0)?;
                }
                NodeKind::Object => {
                    trace!("{} is past the depth bound; collapsing", tree.path(id));
                    tree.node_mut(id).state.active = false;
                    return Ok(Value::Null);
                }
                _ => {}
            }
        }

        let node = tree.node(id);
        let kind = node.kind();
        let ty = node.ty().clone();
        let constraints = node.constraints().clone();

        let children = match kind {
            NodeKind::Leaf => Vec::new(),
            NodeKind::Entry => {
                let halves = tree.children(id)?;
                let mut pair = Vec::with_capacity(2);
                for half in halves {
                    pair.push(self.generate(tree, half, journal)?);
                }
                return Ok(Value::List(pair));
            }
            NodeKind::Abstract => {
                return Err(GenerationError::unsupported(&ty, "interface was not resolved"));
            }
            NodeKind::Object | NodeKind::Container | NodeKind::Map => {
                self.generate_children(tree, id, kind == NodeKind::Map || *ty.raw() == RawType::Set, journal)?
            }
        };

        let strategy = self.context.strategy(&ty)?;
        let context = Arc::clone(&self.context);
        strategy.generate(IntrospectRequest {
            ty: &ty,
            constraints: &constraints,
            registry: context.registry(),
            children,
            rng: tree.rng(),
        })
    }

    /// Generate every child of a composite node. With `distinct` set, equal
    /// elements (or equal keys, for map entries) are re-rolled.
    fn generate_children(
        &mut self,
        tree: &mut PropertyTree,
        id: NodeId,
        distinct: bool,
        journal: &mut Journal,
    ) -> GenerationResult<Vec<ChildValue>> {
        let mut seen = HashSet::new();
        let mut values = Vec::new();

        for (position, child) in tree.children(id)?.into_iter().enumerate() {
            let mut misses = 0;
            let value = loop {
                let value = self.generate(tree, child, journal)?;
                if !distinct {
                    break value;
                }
                let identity = match (&value, tree.node(child).kind()) {
                    (Value::List(pair), NodeKind::Entry) => pair.first().cloned().unwrap_or(Value::Null),
                    _ => value.clone(),
                };
                if seen.insert(identity) {
                    break value;
                }
                misses += 1;
                self.stats.uniqueness_misses += 1;
                if misses >= self.config.max_unique_misses || tree.node(child).state.manipulated {
                    return Err(GenerationError::UniquenessExhausted {
                        path: tree.path(child).to_string(),
                        misses,
                    });
                }
                tree.clear_subtree(child);
            };

            let index = match tree.node(child).selector() {
                Some(Selector::Index(index)) => *index,
                _ => position,
            };
            values.push(match (tree.node(child).selector(), value) {
                (Some(Selector::Field(name)), value) => ChildValue::Member {
                    name: name.clone(),
                    value,
                },
                (_, Value::List(mut pair)) if tree.node(child).kind() == NodeKind::Entry && pair.len() == 2 => {
                    let value = pair.pop().unwrap_or(Value::Null);
                    let key = pair.pop().unwrap_or(Value::Null);
                    ChildValue::Entry { index, key, value }
                }
                (_, value) => ChildValue::Element { index, value },
            });
        }
        Ok(values)
    }

    /// Constraint check over every generated, non-manipulated node, followed
    /// by the external validator on the root value
    fn validate(&self, tree: &PropertyTree, root: &Value) -> Vec<Violation> {
        let mut violations = Vec::new();
        let mut stack = vec![tree.root()];
        while let Some(id) = stack.pop() {
            let node = tree.node(id);
            let value = match &node.memo {
                Some(value) => value,
                None => continue,
            };
            let manipulated = node.state.manipulated || !node.overrides.appliers.is_empty();
            if !manipulated && !node.constraints().is_empty() {
                violations.extend(check_constraints(&tree.path(id).to_string(), value, node.constraints()));
            }
            if !value.is_null() {
                stack.extend(tree.materialized_children(id).iter().rev());
            }
        }
        violations.extend(self.validator.validate(root));
        violations
    }
}

/// Read back the values of `Fix` manipulators that had nothing captured yet
fn capture(
    tree: &mut PropertyTree,
    manipulators: &ManipulatorSet,
    fixed: &FixedValues,
) -> GenerationResult<FixedValues> {
    let mut captured = FixedValues::new();
    for seq in manipulators.fix_positions() {
        if fixed.contains_key(&seq) {
            continue;
        }
        let path = match manipulators.iter().nth(seq) {
            Some(manipulator) => manipulator.path.clone(),
            None => continue,
        };
        let values = path
            .resolve(tree)?
            .into_iter()
            .map(|id| tree.node(id).memo.clone().unwrap_or(Value::Null))
            .collect();
        captured.insert(seq, values);
    }
    Ok(captured)
}
