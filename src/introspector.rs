//! Introspectors: the strategies that turn a node into a concrete value.
//!
//! Leaf introspectors draw primitives, strings and enum variants within the
//! node's constraints. Composite introspectors receive the already generated
//! children and assemble them (objects by member name or constructor
//! parameters, containers by index, maps by entry).
//!
//! The registry is an ordered list; the first introspector that supports a
//! type is used. Custom introspectors are registered ahead of the built-ins.

use crate::constraints::Constraints;
use crate::error::{GenerationError, GenerationResult};
use crate::types::{Construction, RawType, TypeDescriptor, TypeRegistry};
use crate::value::Value;
use once_cell::sync::Lazy;
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use std::fmt;
use std::sync::Arc;

const DEFAULT_ALPHABET: &str = "abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const DEFAULT_MAX_STRING_SIZE: usize = 10;
const DEFAULT_FLOAT_MIN: f64 = -1.0e6;
const DEFAULT_FLOAT_MAX: f64 = 1.0e6;

/// A generated child handed to a composite introspector
#[derive(Debug, Clone, PartialEq)]
pub enum ChildValue {
    Member { name: String, value: Value },
    Element { index: usize, value: Value },
    Entry { index: usize, key: Value, value: Value },
}

/// Everything an introspector may look at for one node
pub struct IntrospectRequest<'a> {
    pub ty: &'a TypeDescriptor,
    pub constraints: &'a Constraints,
    pub registry: &'a TypeRegistry,
    /// Generated children; empty for leaves
    pub children: Vec<ChildValue>,
    pub rng: &'a mut ChaCha8Rng,
}

pub trait Introspector: fmt::Debug + Send + Sync {
    fn name(&self) -> &'static str;

    fn supports(&self, ty: &TypeDescriptor, registry: &TypeRegistry) -> bool;

    fn generate(&self, request: IntrospectRequest<'_>) -> GenerationResult<Value>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct BooleanIntrospector;

impl Introspector for BooleanIntrospector {
    fn name(&self) -> &'static str {
        "bool"
    }

    fn supports(&self, ty: &TypeDescriptor, _registry: &TypeRegistry) -> bool {
        matches!(ty.raw(), RawType::Bool)
    }

    fn generate(&self, request: IntrospectRequest<'_>) -> GenerationResult<Value> {
        Ok(Value::Bool(request.rng.gen::<bool>()))
    }
}

/// Uniform integers within `[min_value, max_value]`, defaulting to the i32 range
#[derive(Debug, Default, Clone, Copy)]
pub struct IntegerIntrospector;

impl Introspector for IntegerIntrospector {
    fn name(&self) -> &'static str {
        "int"
    }

    fn supports(&self, ty: &TypeDescriptor, _registry: &TypeRegistry) -> bool {
        matches!(ty.raw(), RawType::Int)
    }

    fn generate(&self, request: IntrospectRequest<'_>) -> GenerationResult<Value> {
        let constraints = request.constraints;
        let max = constraints
            .max_value
            .unwrap_or_else(|| i64::from(i32::MAX).max(constraints.min_value.unwrap_or(0)));
        let min = constraints.min_value.unwrap_or_else(|| i64::from(i32::MIN).min(max));

        if min > max {
            return Err(GenerationError::introspection(
                request.ty,
                format!("invalid range: {} > {}", min, max),
            ));
        }
        if min == max {
            Ok(Value::Int(min))
        } else {
            Ok(Value::Int(request.rng.gen_range(min..=max)))
        }
    }
}

/// Uniform floats within `[min_float, max_float)`
#[derive(Debug, Default, Clone, Copy)]
pub struct FloatIntrospector;

impl Introspector for FloatIntrospector {
    fn name(&self) -> &'static str {
        "float"
    }

    fn supports(&self, ty: &TypeDescriptor, _registry: &TypeRegistry) -> bool {
        matches!(ty.raw(), RawType::Float)
    }

    fn generate(&self, request: IntrospectRequest<'_>) -> GenerationResult<Value> {
        let min = request.constraints.min_float.unwrap_or(DEFAULT_FLOAT_MIN);
        let max = request.constraints.max_float.unwrap_or_else(|| DEFAULT_FLOAT_MAX.max(min));
        if !(min.is_finite() && max.is_finite()) || min > max {
            return Err(GenerationError::introspection(
                request.ty,
                format!("invalid float range: [{}, {})", min, max),
            ));
        }
        if min == max {
            return Ok(Value::Float(min));
        }
        Ok(Value::Float(min + request.rng.gen::<f64>() * (max - min)))
    }
}

fn alphabet(constraints: &Constraints) -> Vec<char> {
    constraints
        .alphabet
        .as_deref()
        .unwrap_or(DEFAULT_ALPHABET)
        .chars()
        .collect()
}

#[derive(Debug, Default, Clone, Copy)]
pub struct CharIntrospector;

impl Introspector for CharIntrospector {
    fn name(&self) -> &'static str {
        "char"
    }

    fn supports(&self, ty: &TypeDescriptor, _registry: &TypeRegistry) -> bool {
        matches!(ty.raw(), RawType::Char)
    }

    fn generate(&self, request: IntrospectRequest<'_>) -> GenerationResult<Value> {
        let chars = alphabet(request.constraints);
        if chars.is_empty() {
            return Err(GenerationError::introspection(request.ty, "empty alphabet"));
        }
        Ok(Value::Char(chars[request.rng.gen_range(0..chars.len())]))
    }
}

/// Strings drawn from the node's alphabet with length in `[min_size, max_size]`
#[derive(Debug, Default, Clone, Copy)]
pub struct StringIntrospector;

impl Introspector for StringIntrospector {
    fn name(&self) -> &'static str {
        "string"
    }

    fn supports(&self, ty: &TypeDescriptor, _registry: &TypeRegistry) -> bool {
        matches!(ty.raw(), RawType::String)
    }

    fn generate(&self, request: IntrospectRequest<'_>) -> GenerationResult<Value> {
        let constraints = request.constraints;
        let min_size = constraints.effective_min_size().unwrap_or(0);
        let max_size = constraints
            .max_size
            .unwrap_or_else(|| DEFAULT_MAX_STRING_SIZE.max(min_size));
        if min_size > max_size {
            return Err(GenerationError::introspection(
                request.ty,
                format!("invalid size range: {} > {}", min_size, max_size),
            ));
        }

        let chars = alphabet(constraints);
        if chars.is_empty() {
            return Err(GenerationError::introspection(request.ty, "empty alphabet"));
        }

        let size = if min_size == max_size {
            min_size
        } else {
            request.rng.gen_range(min_size..=max_size)
        };
        let mut result = String::with_capacity(size);
        for _ in 0..size {
            result.push(chars[request.rng.gen_range(0..chars.len())]);
        }
        Ok(Value::Str(result))
    }
}

/// One of a registered enum's variants
#[derive(Debug, Default, Clone, Copy)]
pub struct EnumIntrospector;

impl Introspector for EnumIntrospector {
    fn name(&self) -> &'static str {
        "enum"
    }

    fn supports(&self, ty: &TypeDescriptor, registry: &TypeRegistry) -> bool {
        registry.is_enum(ty)
    }

    fn generate(&self, request: IntrospectRequest<'_>) -> GenerationResult<Value> {
        let variants = request.registry.enum_variants(request.ty).unwrap_or(&[]);
        if variants.is_empty() {
            return Err(GenerationError::introspection(request.ty, "enum has no variants"));
        }
        let variant = variants[request.rng.gen_range(0..variants.len())].clone();
        Ok(Value::Enum {
            type_name: request.ty.type_name().unwrap_or_default().to_string(),
            variant,
        })
    }
}

/// Erased types generate nothing specific
#[derive(Debug, Default, Clone, Copy)]
pub struct UnknownIntrospector;

impl Introspector for UnknownIntrospector {
    fn name(&self) -> &'static str {
        "unknown"
    }

    fn supports(&self, ty: &TypeDescriptor, _registry: &TypeRegistry) -> bool {
        matches!(ty.raw(), RawType::Unknown | RawType::TypeVar(_))
    }

    fn generate(&self, _request: IntrospectRequest<'_>) -> GenerationResult<Value> {
        Ok(Value::Null)
    }
}

/// Assembles registered object types from their generated members
#[derive(Debug, Default, Clone, Copy)]
pub struct ObjectIntrospector;

impl Introspector for ObjectIntrospector {
    fn name(&self) -> &'static str {
        "object"
    }

    fn supports(&self, ty: &TypeDescriptor, registry: &TypeRegistry) -> bool {
        registry.is_object(ty)
    }

    fn generate(&self, request: IntrospectRequest<'_>) -> GenerationResult<Value> {
        let members: Vec<(String, Value)> = request
            .children
            .into_iter()
            .filter_map(|child| match child {
                ChildValue::Member { name, value } => Some((name, value)),
                _ => None,
            })
            .collect();

        let fields = match request.registry.construction(request.ty) {
            Construction::AssignByName => members,
            Construction::Constructor(params) => params
                .into_iter()
                .map(|param| {
                    let value = members
                        .iter()
                        .find(|(name, _)| *name == param)
                        .map(|(_, value)| value.clone())
                        .unwrap_or(Value::Null);
                    (param, value)
                })
                .collect(),
        };

        Ok(Value::Object {
            type_name: request.ty.type_name().unwrap_or_default().to_string(),
            fields,
        })
    }
}

/// Arrays, lists and sets from their generated elements, in index order
#[derive(Debug, Default, Clone, Copy)]
pub struct ContainerIntrospector;

impl Introspector for ContainerIntrospector {
    fn name(&self) -> &'static str {
        "container"
    }

    fn supports(&self, ty: &TypeDescriptor, _registry: &TypeRegistry) -> bool {
        ty.is_linear_container()
    }

    fn generate(&self, request: IntrospectRequest<'_>) -> GenerationResult<Value> {
        let mut elements: Vec<(usize, Value)> = request
            .children
            .into_iter()
            .filter_map(|child| match child {
                ChildValue::Element { index, value } => Some((index, value)),
                _ => None,
            })
            .collect();
        elements.sort_by_key(|(index, _)| *index);
        let items = elements.into_iter().map(|(_, value)| value).collect();

        Ok(match request.ty.raw() {
            RawType::Array => Value::Array(items),
            RawType::Set => Value::Set(items),
            _ => Value::List(items),
        })
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct MapIntrospector;

impl Introspector for MapIntrospector {
    fn name(&self) -> &'static str {
        "map"
    }

    fn supports(&self, ty: &TypeDescriptor, _registry: &TypeRegistry) -> bool {
        ty.is_map()
    }

    fn generate(&self, request: IntrospectRequest<'_>) -> GenerationResult<Value> {
        let mut entries: Vec<(usize, Value, Value)> = request
            .children
            .into_iter()
            .filter_map(|child| match child {
                ChildValue::Entry { index, key, value } => Some((index, key, value)),
                _ => None,
            })
            .collect();
        entries.sort_by_key(|(index, _, _)| *index);
        Ok(Value::Map(entries.into_iter().map(|(_, k, v)| (k, v)).collect()))
    }
}

type GenerateFn = dyn Fn(IntrospectRequest<'_>) -> GenerationResult<Value> + Send + Sync;

/// Closure-backed introspector for one exact type
pub struct FnIntrospector {
    ty: TypeDescriptor,
    generate: Box<GenerateFn>,
}

impl FnIntrospector {
    pub fn for_type<F>(ty: TypeDescriptor, generate: F) -> Self
    where
        F: Fn(IntrospectRequest<'_>) -> GenerationResult<Value> + Send + Sync + 'static,
    {
        Self {
            ty,
            generate: Box::new(generate),
        }
    }
}

impl fmt::Debug for FnIntrospector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnIntrospector").field("ty", &self.ty).finish()
    }
}

impl Introspector for FnIntrospector {
    fn name(&self) -> &'static str {
        "fn"
    }

    fn supports(&self, ty: &TypeDescriptor, _registry: &TypeRegistry) -> bool {
        *ty == self.ty
    }

    fn generate(&self, request: IntrospectRequest<'_>) -> GenerationResult<Value> {
        (self.generate)(request)
    }
}

/// Ordered introspector list
#[derive(Debug, Clone)]
pub struct IntrospectorRegistry {
    introspectors: Vec<Arc<dyn Introspector>>,
}

impl Default for IntrospectorRegistry {
    fn default() -> Self {
        Self {
            introspectors: vec![
                Arc::new(BooleanIntrospector),
                Arc::new(IntegerIntrospector),
                Arc::new(FloatIntrospector),
                Arc::new(CharIntrospector),
                Arc::new(StringIntrospector),
                Arc::new(EnumIntrospector),
                Arc::new(UnknownIntrospector),
                Arc::new(ContainerIntrospector),
                Arc::new(MapIntrospector),
                Arc::new(ObjectIntrospector),
            ],
        }
    }
}

static DEFAULT_INTROSPECTORS: Lazy<Arc<IntrospectorRegistry>> =
    Lazy::new(|| Arc::new(IntrospectorRegistry::default()));

/// The shared built-in registry
pub fn default_introspectors() -> Arc<IntrospectorRegistry> {
    Arc::clone(&DEFAULT_INTROSPECTORS)
}

impl IntrospectorRegistry {
    /// An empty registry without the built-ins
    pub fn empty() -> Self {
        Self {
            introspectors: Vec::new(),
        }
    }

    /// Register an introspector ahead of every existing one
    pub fn register(&mut self, introspector: Arc<dyn Introspector>) -> &mut Self {
        self.introspectors.insert(0, introspector);
        self
    }

    pub fn lookup(&self, ty: &TypeDescriptor, registry: &TypeRegistry) -> Option<Arc<dyn Introspector>> {
        self.introspectors
            .iter()
            .find(|introspector| introspector.supports(ty, registry))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.introspectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.introspectors.is_empty()
    }
}
