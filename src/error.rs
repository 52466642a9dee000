//! Error taxonomy for tree construction, manipulation and sampling.
//!
//! Errors fall into two groups. Randomness misses (a unique value could not be
//! found, a post-condition filter kept rejecting) are *retryable*: the sampler
//! treats them as a failed attempt and regenerates. Everything else signals a
//! programming or configuration mistake and propagates straight to the caller.

use crate::validator::Violation;

/// Type alias for generation results
pub type GenerationResult<T> = Result<T, GenerationError>;

/// Errors raised while building, manipulating or sampling a property tree
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GenerationError {
    /// A manipulator path did not match the tree
    #[error("Cannot resolve `{path}` at segment `{segment}`: {reason}")]
    PathResolution {
        path: String,
        segment: String,
        reason: String,
    },

    /// A path expression could not be parsed
    #[error("Invalid expression `{expression}`: {reason}")]
    InvalidExpression { expression: String, reason: String },

    /// A manipulator was applied to a node it cannot affect
    #[error("Invalid manipulation at `{path}`: {reason}")]
    InvalidManipulation { path: String, reason: String },

    /// Validation kept failing past the retry bound
    #[error("Gave up after {tries} tries; last failure: {cause}")]
    RetryExhausted {
        tries: u32,
        violations: Vec<Violation>,
        cause: Box<GenerationError>,
    },

    /// Validation rejected a generated value
    #[error("Validation failed with {} violation(s)", .0.len())]
    Invalid(Vec<Violation>),

    /// A unique node could not find a fresh value within its miss budget
    #[error("No unique value for `{path}` after {misses} misses")]
    UniquenessExhausted { path: String, misses: u32 },

    /// A post-condition filter rejected every regenerated value
    #[error("Filter at `{path}` rejected {attempts} consecutive values")]
    FilterExhausted { path: String, attempts: u32 },

    /// No candidate generator or introspector handles a type
    #[error("Unsupported type `{ty}`: {reason}")]
    UnsupportedType { ty: String, reason: String },

    /// An introspector failed to produce a value
    #[error("Introspector failed for `{ty}`: {reason}")]
    Introspection { ty: String, reason: String },

    /// Configuration could not be parsed
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl GenerationError {
    /// Whether a fresh generation attempt could succeed where this one failed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GenerationError::UniquenessExhausted { .. }
                | GenerationError::FilterExhausted { .. }
                | GenerationError::Invalid(_)
        )
    }

    pub(crate) fn unsupported(ty: impl ToString, reason: impl Into<String>) -> Self {
        GenerationError::UnsupportedType {
            ty: ty.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn introspection(ty: impl ToString, reason: impl Into<String>) -> Self {
        GenerationError::Introspection {
            ty: ty.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<serde_json::Error> for GenerationError {
    fn from(err: serde_json::Error) -> Self {
        GenerationError::Config(err.to_string())
    }
}
