//! Public entry points.
//!
//! [`FixtureTree`] owns the shared generation context; it is configured once
//! through [`FixtureTreeBuilder`] and then hands out [`ArbitraryBuilder`]s,
//! one per root type. An `ArbitraryBuilder` records manipulations and can be
//! sampled any number of times, from any number of threads.

use crate::cache::CacheStats;
use crate::candidate::{CandidateGenerators, NodeCandidateGenerator};
use crate::constraints::{CompositeConstraintSource, ConstraintSource, DeclaredConstraints};
use crate::context::{ContainerSizePolicy, FixedImplementations, GenerationContext, InterfaceResolver, NullInjectPolicy};
use crate::error::{GenerationError, GenerationResult};
use crate::expression::PathExpression;
use crate::introspector::{default_introspectors, Introspector, IntrospectorRegistry};
use crate::manipulator::{FixedValues, Manipulator, ManipulatorKind, ManipulatorSet};
use crate::sampler::{SampleStats, Sampler, SamplerConfig};
use crate::types::{TypeDef, TypeDescriptor, TypeRegistry};
use crate::validator::{NoopValidator, Validator};
use crate::value::Value;
use log::debug;
use parking_lot::Mutex;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_BUILDER_ID: AtomicU64 = AtomicU64::new(1);

/// Configures a [`FixtureTree`]
#[derive(Debug)]
pub struct FixtureTreeBuilder {
    registry: TypeRegistry,
    generators: CandidateGenerators,
    introspectors: IntrospectorRegistry,
    constraint_sources: Vec<Arc<dyn ConstraintSource>>,
    null_policy: NullInjectPolicy,
    size_policy: ContainerSizePolicy,
    resolvers: Vec<Arc<dyn InterfaceResolver>>,
    validator: Arc<dyn Validator>,
    config: SamplerConfig,
}

impl Default for FixtureTreeBuilder {
    fn default() -> Self {
        Self {
            registry: TypeRegistry::new(),
            generators: CandidateGenerators::default(),
            introspectors: default_introspectors().as_ref().clone(),
            constraint_sources: Vec::new(),
            null_policy: NullInjectPolicy::default(),
            size_policy: ContainerSizePolicy::default(),
            resolvers: Vec::new(),
            validator: Arc::new(NoopValidator),
            config: SamplerConfig::default(),
        }
    }
}

impl FixtureTreeBuilder {
    pub fn registry(mut self, registry: TypeRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn register(mut self, def: impl Into<TypeDef>) -> Self {
        self.registry.register(def);
        self
    }

    /// Consulted before the built-in candidate generators
    pub fn candidate_generator(mut self, generator: Arc<dyn NodeCandidateGenerator>) -> Self {
        self.generators.prepend(generator);
        self
    }

    /// Consulted before the built-in introspectors
    pub fn introspector(mut self, introspector: Arc<dyn Introspector>) -> Self {
        self.introspectors.register(introspector);
        self
    }

    /// Added on top of member-declared constraints; later sources win
    pub fn constraint_source(mut self, source: Arc<dyn ConstraintSource>) -> Self {
        self.constraint_sources.push(source);
        self
    }

    pub fn null_inject(mut self, policy: NullInjectPolicy) -> Self {
        self.null_policy = policy;
        self
    }

    pub fn default_null_probability(mut self, probability: f64) -> Self {
        self.null_policy.default_probability = probability;
        self
    }

    pub fn container_size(mut self, min: usize, max: usize) -> Self {
        self.size_policy = ContainerSizePolicy { min, max };
        self
    }

    pub fn interface_resolver(mut self, resolver: Arc<dyn InterfaceResolver>) -> Self {
        self.resolvers.push(resolver);
        self
    }

    /// Restrict an interface to the given implementations
    pub fn interface_implementations(self, interface: &str, implementations: Vec<TypeDescriptor>) -> Self {
        self.interface_resolver(Arc::new(FixedImplementations::new(interface, implementations)))
    }

    pub fn validator(mut self, validator: Arc<dyn Validator>) -> Self {
        self.validator = validator;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.config.seed = Some(seed);
        self
    }

    pub fn config(mut self, config: SamplerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> GenerationResult<FixtureTree> {
        self.config.validate()?;
        if self.size_policy.min > self.size_policy.max {
            return Err(GenerationError::Config(format!(
                "container size minimum {} exceeds maximum {}",
                self.size_policy.min, self.size_policy.max
            )));
        }
        if !(0.0..=1.0).contains(&self.null_policy.default_probability) {
            return Err(GenerationError::Config(format!(
                "null probability {} is outside [0, 1]",
                self.null_policy.default_probability
            )));
        }

        let mut sources = CompositeConstraintSource::new();
        sources.push(Arc::new(DeclaredConstraints));
        for source in self.constraint_sources {
            sources.push(source);
        }

        let context = GenerationContext::new(
            Arc::new(self.registry),
            self.generators,
            Arc::new(self.introspectors),
            Arc::new(sources),
            self.null_policy,
            self.size_policy,
            self.resolvers,
            self.config.strategy_cache_capacity,
            self.config.context_cache_capacity,
        );
        Ok(FixtureTree {
            context: Arc::new(context),
            config: Arc::new(self.config),
            validator: self.validator,
        })
    }
}

/// Shared generation context plus sampling configuration
#[derive(Debug, Clone)]
pub struct FixtureTree {
    context: Arc<GenerationContext>,
    config: Arc<SamplerConfig>,
    validator: Arc<dyn Validator>,
}

impl FixtureTree {
    pub fn builder() -> FixtureTreeBuilder {
        FixtureTreeBuilder::default()
    }

    pub fn context(&self) -> &Arc<GenerationContext> {
        &self.context
    }

    pub fn config(&self) -> &SamplerConfig {
        &self.config
    }

    /// A reusable builder for `root`
    pub fn arbitrary_builder(&self, root: TypeDescriptor) -> ArbitraryBuilder {
        ArbitraryBuilder::new(
            root,
            Arc::clone(&self.context),
            Arc::clone(&self.config),
            Arc::clone(&self.validator),
        )
    }

    /// Hit/miss counters of the strategy cache shared by all builders
    pub fn strategy_cache_stats(&self) -> CacheStats {
        self.context.strategy_stats()
    }

    /// One unmanipulated sample of `root`
    pub fn sample(&self, root: TypeDescriptor) -> GenerationResult<Value> {
        self.arbitrary_builder(root).sample()
    }
}

/// Root type plus an ordered manipulation log.
///
/// Manipulation methods consume and return the builder so calls chain. A
/// malformed path expression is remembered and reported by the next sample.
#[derive(Debug)]
pub struct ArbitraryBuilder {
    id: u64,
    root: TypeDescriptor,
    context: Arc<GenerationContext>,
    config: Arc<SamplerConfig>,
    validator: Arc<dyn Validator>,
    manipulators: ManipulatorSet,
    pending_error: Option<GenerationError>,
    fixed: Mutex<FixedValues>,
    stats: Mutex<SampleStats>,
}

impl ArbitraryBuilder {
    fn new(
        root: TypeDescriptor,
        context: Arc<GenerationContext>,
        config: Arc<SamplerConfig>,
        validator: Arc<dyn Validator>,
    ) -> Self {
        Self {
            id: NEXT_BUILDER_ID.fetch_add(1, Ordering::Relaxed),
            root,
            context,
            config,
            validator,
            manipulators: ManipulatorSet::new(),
            pending_error: None,
            fixed: Mutex::new(FixedValues::new()),
            stats: Mutex::new(SampleStats::default()),
        }
    }

    pub fn root(&self) -> &TypeDescriptor {
        &self.root
    }

    pub fn manipulators(&self) -> &ManipulatorSet {
        &self.manipulators
    }

    fn record(mut self, expression: &str, kind: ManipulatorKind) -> Self {
        if self.pending_error.is_some() {
            return self;
        }
        match PathExpression::parse(expression) {
            Ok(path) => self.manipulators.push(Manipulator::new(path, kind)),
            Err(err) => self.pending_error = Some(err),
        }
        self
    }

    /// Record a manipulator against an already compiled path
    pub fn manipulate(mut self, path: PathExpression, kind: ManipulatorKind) -> Self {
        self.manipulators.push(Manipulator::new(path, kind));
        self
    }

    pub fn set(self, expression: &str, value: impl Into<Value>) -> Self {
        self.record(expression, ManipulatorKind::Set(value.into()))
    }

    pub fn set_null(self, expression: &str) -> Self {
        self.record(expression, ManipulatorKind::SetNull)
    }

    pub fn set_not_null(self, expression: &str) -> Self {
        self.record(expression, ManipulatorKind::SetNotNull)
    }

    pub fn size(self, expression: &str, size: usize) -> Self {
        self.record(expression, ManipulatorKind::Size { min: size, max: size })
    }

    /// Container size drawn uniformly from `min..=max` on every sample
    pub fn size_between(self, expression: &str, min: usize, max: usize) -> Self {
        if min > max {
            let mut builder = self;
            if builder.pending_error.is_none() {
                builder.pending_error = Some(GenerationError::InvalidManipulation {
                    path: expression.to_string(),
                    reason: format!("size range {}..={} is empty", min, max),
                });
            }
            return builder;
        }
        self.record(expression, ManipulatorKind::Size { min, max })
    }

    /// Freeze the whole value after the first successful sample
    pub fn fixed(self) -> Self {
        self.record("$", ManipulatorKind::Fix)
    }

    /// Freeze the subtree at `expression` after the first successful sample
    pub fn fix(self, expression: &str) -> Self {
        self.record(expression, ManipulatorKind::Fix)
    }

    pub fn filter<F>(self, expression: &str, predicate: F) -> Self
    where
        F: Fn(&Value) -> bool + Send + Sync + 'static,
    {
        self.record(expression, ManipulatorKind::Filter(Arc::new(predicate)))
    }

    pub fn apply<F>(self, expression: &str, applier: F) -> Self
    where
        F: Fn(&mut Value) + Send + Sync + 'static,
    {
        self.record(expression, ManipulatorKind::Apply(Arc::new(applier)))
    }

    /// Values at `expression` must be distinct across every sample of this
    /// builder until [`ArbitraryBuilder::reset`]
    pub fn unique(self, expression: &str) -> Self {
        self.record(expression, ManipulatorKind::Unique)
    }

    /// A builder with the same root and manipulations but its own identity,
    /// fixed values and uniqueness state
    pub fn copy(&self) -> Self {
        let mut copy = ArbitraryBuilder::new(
            self.root.clone(),
            Arc::clone(&self.context),
            Arc::clone(&self.config),
            Arc::clone(&self.validator),
        );
        copy.manipulators = self.manipulators.clone();
        copy.pending_error = self.pending_error.clone();
        copy
    }

    fn rng(&self, index: u64) -> ChaCha8Rng {
        match self.config.seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed.wrapping_add(index)),
            None => ChaCha8Rng::from_entropy(),
        }
    }

    fn sample_with(&self, rng: ChaCha8Rng) -> GenerationResult<Value> {
        if let Some(err) = &self.pending_error {
            return Err(err.clone());
        }

        let fixed = self.fixed.lock().clone();
        let uniqueness = self.context.uniqueness(self.id, &self.root);
        let mut sampler = Sampler::new(Arc::clone(&self.context), &self.config, self.validator.as_ref(), uniqueness);
        let result = sampler.run(&self.root, &self.manipulators, &fixed, rng);
        self.stats.lock().merge(sampler.stats());

        let outcome = result?;
        if !outcome.captured.is_empty() {
            let mut fixed = self.fixed.lock();
            for (seq, values) in outcome.captured {
                // first capture wins when samples race
                fixed.entry(seq).or_insert(values);
            }
            debug!("builder {} captured {} fixed value set(s)", self.id, fixed.len());
        }
        Ok(outcome.value)
    }

    /// One sample. With a configured seed every call returns the same value
    pub fn sample(&self) -> GenerationResult<Value> {
        self.sample_with(self.rng(0))
    }

    /// `count` samples; sample `i` uses seed `seed + i` when seeded
    pub fn sample_list(&self, count: usize) -> GenerationResult<Vec<Value>> {
        (0..count as u64).map(|index| self.sample_with(self.rng(index))).collect()
    }

    /// Endless stream of samples, seeded like [`ArbitraryBuilder::sample_list`]
    pub fn sample_iter(&self) -> impl Iterator<Item = GenerationResult<Value>> + '_ {
        (0u64..).map(move |index| self.sample_with(self.rng(index)))
    }

    /// Forget fixed values and every value recorded for uniqueness
    pub fn reset(&self) {
        self.fixed.lock().clear();
        self.context.reset_uniqueness(self.id, &self.root);
        debug!("builder {} reset", self.id);
    }

    /// Counters accumulated over this builder's samples.
    ///
    /// The strategy cache counters are not per builder: they are copied from
    /// the cache shared by every builder of the same [`FixtureTree`].
    pub fn stats(&self) -> SampleStats {
        let mut stats = *self.stats.lock();
        let cache = self.context.strategy_stats();
        stats.strategy_cache_hits = cache.hits;
        stats.strategy_cache_misses = cache.misses;
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constraints::Constraints;
    use crate::types::ObjectDef;

    fn fixture(seed: Option<u64>) -> FixtureTree {
        let mut builder = FixtureTree::builder()
            .register(
                ObjectDef::new("Person")
                    .member("name", TypeDescriptor::string())
                    .constrained_member("age", TypeDescriptor::int(), Constraints::new().range(0, 120))
                    .member("tags", TypeDescriptor::list(TypeDescriptor::string())),
            )
            .default_null_probability(0.0);
        if let Some(seed) = seed {
            builder = builder.seed(seed);
        }
        builder.build().unwrap()
    }

    fn person() -> TypeDescriptor {
        TypeDescriptor::named("Person")
    }

    #[test]
    fn test_invalid_expression_surfaces_on_sample() {
        let builder = fixture(Some(1)).arbitrary_builder(person()).set("tags[", "x");
        assert!(matches!(builder.sample(), Err(GenerationError::InvalidExpression { .. })));
    }

    #[test]
    fn test_build_rejects_bad_policies() {
        assert!(FixtureTree::builder().container_size(4, 2).build().is_err());
        assert!(FixtureTree::builder().default_null_probability(1.5).build().is_err());
    }

    #[test]
    fn test_builder_ids_are_distinct() {
        let fixture = fixture(None);
        let a = fixture.arbitrary_builder(person());
        let b = a.copy();
        assert_ne!(a.id, b.id);
        assert_eq!(a.manipulators().len(), b.manipulators().len());
    }

    #[test]
    fn test_stats_accumulate() {
        let builder = fixture(Some(9)).arbitrary_builder(person());
        builder.sample_list(3).unwrap();
        let stats = builder.stats();
        assert_eq!(stats.samples, 3);
        assert!(stats.attempts >= 3);
        assert!(stats.strategy_cache_misses > 0);
    }

    #[test]
    fn test_strategy_cache_counters_are_shared() {
        let fixture = fixture(Some(3));
        let first = fixture.arbitrary_builder(person());
        let second = fixture.arbitrary_builder(person());
        first.sample().unwrap();
        second.sample().unwrap();

        let shared = fixture.strategy_cache_stats();
        assert!(shared.hits > 0);
        assert_eq!(second.stats().samples, 1);
        assert_eq!(first.stats().strategy_cache_hits, shared.hits);
        assert_eq!(second.stats().strategy_cache_misses, shared.misses);
    }

    #[test]
    fn test_size_between_rejects_empty_range() {
        let builder = fixture(Some(1)).arbitrary_builder(person()).size_between("tags", 3, 1);
        assert!(matches!(builder.sample(), Err(GenerationError::InvalidManipulation { .. })));
    }
}
