//! Post-generation validation.
//!
//! Two layers run after a sample is produced: the constraint checker, which
//! re-verifies each non-manipulated node against its own [`Constraints`], and
//! an optional user [`Validator`] looking at the finished root value. Any
//! violation sends the sampler into another attempt.

use crate::constraints::Constraints;
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// One failed check, located by path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    pub path: String,
    pub message: String,
}

impl Violation {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// Checks a complete sample; an empty result means valid
pub trait Validator: fmt::Debug + Send + Sync {
    fn validate(&self, value: &Value) -> Vec<Violation>;
}

/// Accepts everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopValidator;

impl Validator for NoopValidator {
    fn validate(&self, _value: &Value) -> Vec<Violation> {
        Vec::new()
    }
}

type CheckFn = dyn Fn(&Value) -> Vec<Violation> + Send + Sync;

/// Validator backed by a closure
#[derive(Clone)]
pub struct FnValidator {
    check: Arc<CheckFn>,
}

impl FnValidator {
    pub fn new<F>(check: F) -> Self
    where
        F: Fn(&Value) -> Vec<Violation> + Send + Sync + 'static,
    {
        Self { check: Arc::new(check) }
    }

    /// A validator reporting `message` at the root whenever `predicate` fails
    pub fn predicate<F>(message: &str, predicate: F) -> Self
    where
        F: Fn(&Value) -> bool + Send + Sync + 'static,
    {
        let message = message.to_string();
        Self::new(move |value| {
            if predicate(value) {
                Vec::new()
            } else {
                vec![Violation::new("$", message.clone())]
            }
        })
    }
}

impl fmt::Debug for FnValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnValidator").finish_non_exhaustive()
    }
}

impl Validator for FnValidator {
    fn validate(&self, value: &Value) -> Vec<Violation> {
        (self.check)(value)
    }
}

/// Check one node's value against its own constraints.
///
/// Nested element/key/value constraints are not followed here; each child
/// node is checked on its own.
pub fn check_constraints(path: &str, value: &Value, constraints: &Constraints) -> Vec<Violation> {
    let mut violations = Vec::new();
    let mut fail = |message: String| violations.push(Violation::new(path, message));

    if value.is_null() {
        if constraints.forbids_null() {
            fail("must not be null".to_string());
        }
        return violations;
    }

    match value {
        Value::Int(n) => {
            if let Some(min) = constraints.min_value {
                if *n < min {
                    fail(format!("{} is below the minimum {}", n, min));
                }
            }
            if let Some(max) = constraints.max_value {
                if *n > max {
                    fail(format!("{} is above the maximum {}", n, max));
                }
            }
        }
        Value::Float(x) => {
            if let Some(min) = constraints.min_float {
                if *x < min {
                    fail(format!("{} is below the minimum {}", x, min));
                }
            }
            if let Some(max) = constraints.max_float {
                if *x >= max {
                    fail(format!("{} is not below the bound {}", x, max));
                }
            }
        }
        Value::Str(s) => {
            let len = s.chars().count();
            check_size(len, constraints, &mut fail);
            if let Some(alphabet) = &constraints.alphabet {
                if let Some(bad) = s.chars().find(|c| !alphabet.contains(*c)) {
                    fail(format!("character {:?} is outside the alphabet", bad));
                }
            }
        }
        Value::Array(_) | Value::List(_) | Value::Set(_) | Value::Map(_) => {
            if let Some(len) = value.len() {
                check_size(len, constraints, &mut fail);
            }
        }
        _ => {}
    }
    violations
}

fn check_size(len: usize, constraints: &Constraints, fail: &mut impl FnMut(String)) {
    if let Some(min) = constraints.effective_min_size() {
        if len < min {
            fail(format!("size {} is below the minimum {}", len, min));
        }
    }
    if let Some(max) = constraints.max_size {
        if len > max {
            fail(format!("size {} is above the maximum {}", len, max));
        }
    }
}
