//! # fixture-tree
//!
//! Randomized, constraint-satisfying test fixtures for declared types.
//!
//! A root type is expanded lazily into a tree of property nodes: object
//! members, container elements and map entries. Callers address nodes with
//! path expressions such as `"company.products[0].price"` to set values,
//! force or forbid null, size containers, filter, transform or freeze
//! sub-values. Sampling then materializes the tree bottom-up into a [`Value`],
//! validates it, and retries within a bounded budget.
//!
//! ```ignore
//! let fixture = FixtureTree::builder()
//!     .register(ObjectDef::new("Person").member("name", TypeDescriptor::string()))
//!     .seed(7)
//!     .build()?;
//! let person = fixture.arbitrary_builder(TypeDescriptor::named("Person")).set("name", "Ann").sample()?;
//! ```

pub mod builder;
pub mod cache;
pub mod candidate;
pub mod constraints;
pub mod context;
pub mod error;
pub mod expression;
pub mod introspector;
pub mod manipulator;
pub mod sampler;
pub mod tree;
pub mod types;
pub mod validator;
pub mod value;

// Re-export the public surface
pub use builder::{ArbitraryBuilder, FixtureTree, FixtureTreeBuilder};
pub use candidate::{CandidateGenerators, NodeCandidate, NodeCandidateGenerator};
pub use constraints::{ConstraintSource, Constraints, DeclaredConstraints, PathConstraints};
pub use context::{ContainerSizePolicy, GenerationContext, InterfaceResolver, NullInjectPolicy};
pub use error::{GenerationError, GenerationResult};
pub use expression::{PathExpression, Selector};
pub use introspector::{ChildValue, FnIntrospector, IntrospectRequest, Introspector, IntrospectorRegistry};
pub use manipulator::{Manipulator, ManipulatorKind, ManipulatorSet};
pub use sampler::{SamplePhase, SampleStats, SamplerConfig};
pub use tree::{NodeId, NodeKind, PropertyTree};
pub use types::{EnumDef, InterfaceDef, ObjectDef, RawType, TypeDescriptor, TypeRegistry};
pub use validator::{FnValidator, NoopValidator, Validator, Violation};
pub use value::Value;
