//! Manipulators through the public builder: fixing, uniqueness, filters,
//! appliers, ordering, path errors and concurrent sampling.

use fixture_tree::constraints::Constraints;
use fixture_tree::{
    FixtureTree, FnValidator, GenerationError, ObjectDef, PathConstraints, PathExpression, TypeDescriptor,
    TypeRegistry, Value,
};
use std::collections::HashSet;
use std::sync::Arc;
use std::thread;

fn orders() -> TypeRegistry {
    TypeRegistry::new()
        .with(
            ObjectDef::new("Order")
                .constrained_member("code", TypeDescriptor::int(), Constraints::new().range(0, 9))
                .member("note", TypeDescriptor::string())
                .member("customer", TypeDescriptor::named("Customer"))
                .member("lines", TypeDescriptor::list(TypeDescriptor::named("Line"))),
        )
        .with(ObjectDef::new("Customer").member("name", TypeDescriptor::string()))
        .with(
            ObjectDef::new("Line")
                .member("sku", TypeDescriptor::string())
                .constrained_member("quantity", TypeDescriptor::int(), Constraints::new().range(1, 50)),
        )
}

fn fixture() -> FixtureTree {
    FixtureTree::builder().registry(orders()).build().unwrap()
}

fn order() -> TypeDescriptor {
    TypeDescriptor::named("Order")
}

// === FIXED ===

#[test]
fn test_fixed_builder_repeats_its_first_sample() {
    let builder = fixture().arbitrary_builder(order()).fixed();
    let first = builder.sample().unwrap();
    for _ in 0..10 {
        assert_eq!(builder.sample().unwrap(), first);
    }

    builder.reset();
    let fresh: Vec<Value> = (0..10).map(|_| builder.sample().unwrap()).collect();
    assert!(fresh.iter().all(|value| *value == fresh[0]));
}

#[test]
fn test_fixing_a_subtree_leaves_siblings_random() {
    let builder = fixture().arbitrary_builder(order()).set_not_null("customer").fix("customer");
    let customer = builder.sample().unwrap().field("customer").cloned().unwrap();

    let mut notes = HashSet::new();
    for _ in 0..20 {
        let value = builder.sample().unwrap();
        assert_eq!(value.field("customer"), Some(&customer));
        notes.insert(format!("{:?}", value.field("note")));
    }
    assert!(notes.len() > 1);
}

#[test]
fn test_fixed_builder_does_not_reapply_appliers() {
    let builder = fixture()
        .arbitrary_builder(order())
        .apply("code", |v| {
            if let Value::Int(n) = v {
                *n += 1000;
            }
        })
        .fixed();
    let first = builder.sample().unwrap();
    let code = first.field("code").and_then(Value::as_int).unwrap();
    assert!((1000..=1009).contains(&code));
    for _ in 0..3 {
        assert_eq!(builder.sample().unwrap(), first);
    }
}

#[test]
fn test_fixed_subtree_keeps_composite_applier_effect() {
    let builder = fixture()
        .arbitrary_builder(order())
        .set_not_null("customer")
        .apply("customer", |v| {
            if let Value::Object { fields, .. } = v {
                for (name, value) in fields.iter_mut() {
                    if name == "name" {
                        let renamed = format!("{}!", value.as_str().unwrap_or(""));
                        *value = Value::from(renamed);
                    }
                }
            }
        })
        .fix("customer");

    let customer = builder.sample().unwrap().field("customer").cloned().unwrap();
    let name = customer.field("name").and_then(Value::as_str).unwrap().to_string();
    assert!(name.ends_with('!') && !name.ends_with("!!"));
    for _ in 0..3 {
        assert_eq!(builder.sample().unwrap().field("customer"), Some(&customer));
    }
}

// === UNIQUENESS ===

#[test]
fn test_unique_field_exhausts_its_domain() {
    let builder = fixture().arbitrary_builder(order()).unique("code");

    let mut codes = HashSet::new();
    let mut failure = None;
    for _ in 0..50 {
        match builder.sample() {
            Ok(value) => {
                assert!(codes.insert(value.field("code").and_then(Value::as_int).unwrap()));
            }
            Err(err) => {
                failure = Some(err);
                break;
            }
        }
    }
    assert_eq!(codes.len(), 10);
    assert!(matches!(failure, Some(GenerationError::UniquenessExhausted { .. })));
}

#[test]
fn test_unique_field_within_domain_succeeds() {
    let builder = fixture().arbitrary_builder(order()).unique("code");
    let codes: HashSet<i64> = builder
        .sample_iter()
        .take(5)
        .map(|value| value.unwrap().field("code").and_then(Value::as_int).unwrap())
        .collect();
    assert_eq!(codes.len(), 5);
}

#[test]
fn test_reset_clears_uniqueness() {
    let builder = fixture().arbitrary_builder(order()).unique("code");
    builder.sample_list(10).unwrap();
    assert!(builder.sample().is_err());
    builder.reset();
    assert!(builder.sample().is_ok());
}

#[test]
fn test_copies_do_not_share_uniqueness() {
    let builder = fixture().arbitrary_builder(order()).unique("code");
    builder.sample_list(10).unwrap();
    let copy = builder.copy();
    assert_eq!(copy.sample_list(10).unwrap().len(), 10);
}

#[test]
fn test_unique_constraint_spans_elements() {
    let constraints = PathConstraints::new()
        .with("lines[*].quantity", Constraints::new().unique())
        .unwrap();
    let fixture = FixtureTree::builder()
        .registry(orders())
        .constraint_source(Arc::new(constraints))
        .build()
        .unwrap();

    let value = fixture.arbitrary_builder(order()).size("lines", 20).sample().unwrap();
    let quantities: Vec<i64> = value
        .field("lines")
        .and_then(Value::elements)
        .unwrap()
        .iter()
        .map(|line| line.field("quantity").and_then(Value::as_int).unwrap())
        .collect();
    let distinct: HashSet<i64> = quantities.iter().copied().collect();
    assert_eq!(quantities.len(), 20);
    assert_eq!(distinct.len(), 20);
    assert!(quantities.iter().all(|q| (1..=50).contains(q)));
}

fn small_unique_quantities() -> FixtureTree {
    let constraints = PathConstraints::new()
        .with("lines[*].quantity", Constraints::new().range(0, 9).unique())
        .unwrap();
    FixtureTree::builder()
        .registry(orders())
        .constraint_source(Arc::new(constraints))
        .build()
        .unwrap()
}

#[test]
fn test_unique_elements_beyond_the_domain_exhaust_within_one_sample() {
    let err = small_unique_quantities()
        .arbitrary_builder(order())
        .size("lines", 50)
        .sample()
        .unwrap_err();
    assert!(matches!(err, GenerationError::UniquenessExhausted { .. }), "{:?}", err);
}

#[test]
fn test_unique_elements_within_the_domain_succeed() {
    let value = small_unique_quantities()
        .arbitrary_builder(order())
        .size("lines", 5)
        .sample()
        .unwrap();
    let quantities: HashSet<i64> = value
        .field("lines")
        .and_then(Value::elements)
        .unwrap()
        .iter()
        .map(|line| line.field("quantity").and_then(Value::as_int).unwrap())
        .collect();
    assert_eq!(quantities.len(), 5);
    assert!(quantities.iter().all(|q| (0..=9).contains(q)));
}

// === FILTER / APPLY ===

#[test]
fn test_filter_is_a_post_condition() {
    let builder = fixture()
        .arbitrary_builder(order())
        .filter("code", |v| v.as_int().map_or(false, |n| n >= 7));
    for value in builder.sample_iter().take(20) {
        assert!(value.unwrap().field("code").and_then(Value::as_int).unwrap() >= 7);
    }
}

#[test]
fn test_unsatisfiable_filter_gives_up() {
    let builder = fixture().arbitrary_builder(order()).filter("code", |_| false);
    match builder.sample() {
        Err(GenerationError::RetryExhausted { cause, .. }) => {
            assert!(matches!(*cause, GenerationError::FilterExhausted { .. }));
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_apply_transforms_generated_values() {
    let builder = fixture()
        .arbitrary_builder(order())
        .size("lines", 4)
        .set_not_null("lines[*].sku")
        .apply("lines[*].sku", |v| {
            if let Value::Str(s) = v {
                *s = format!("SKU-{}", s);
            }
        });
    let value = builder.sample().unwrap();
    for line in value.field("lines").and_then(Value::elements).unwrap() {
        assert!(line.field("sku").and_then(Value::as_str).unwrap().starts_with("SKU-"));
    }
}

// === ORDERING ===

#[test]
fn test_later_manipulators_win() {
    let value = fixture()
        .arbitrary_builder(order())
        .set("note", "first")
        .set_null("note")
        .set("note", "last")
        .sample()
        .unwrap();
    assert_eq!(value.field("note").and_then(Value::as_str), Some("last"));

    let value = fixture()
        .arbitrary_builder(order())
        .set("customer.name", "ann")
        .set_null("customer")
        .sample()
        .unwrap();
    assert!(value.field("customer").unwrap().is_null());
}

#[test]
fn test_size_after_wildcard_set_only_covers_the_old_elements() {
    let value = fixture()
        .arbitrary_builder(order())
        .size("lines", 2)
        .set("lines[*].sku", "A")
        .size("lines", 4)
        .sample()
        .unwrap();
    let skus: Vec<Option<&str>> = value
        .field("lines")
        .and_then(Value::elements)
        .unwrap()
        .iter()
        .map(|line| line.field("sku").and_then(Value::as_str))
        .collect();
    assert_eq!(skus.len(), 4);
    assert_eq!(&skus[..2], &[Some("A"), Some("A")]);
}

#[test]
fn test_composite_values_decompose() {
    let customer = Value::Object {
        type_name: "Customer".to_string(),
        fields: vec![("name".to_string(), Value::from("Grace"))],
    };
    let lines = Value::List(vec![
        Value::Object {
            type_name: "Line".to_string(),
            fields: vec![
                ("sku".to_string(), Value::from("X1")),
                ("quantity".to_string(), Value::Int(3)),
            ],
        };
        3
    ]);
    let value = fixture()
        .arbitrary_builder(order())
        .set("customer", customer.clone())
        .set("lines", lines.clone())
        .set("lines[1].quantity", 9)
        .sample()
        .unwrap();

    assert_eq!(value.field("customer"), Some(&customer));
    let generated = value.field("lines").and_then(Value::elements).unwrap();
    assert_eq!(generated.len(), 3);
    assert_eq!(generated[0].field("quantity"), Some(&Value::Int(3)));
    assert_eq!(generated[1].field("quantity"), Some(&Value::Int(9)));
}

// === ERRORS ===

#[test]
fn test_unknown_member_is_a_path_error() {
    let err = fixture().arbitrary_builder(order()).set("customer.email", "x").sample().unwrap_err();
    match err {
        GenerationError::PathResolution { path, segment, .. } => {
            assert_eq!(path, "customer.email");
            assert_eq!(segment, "email");
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_wildcard_on_a_leaf_is_a_path_error() {
    let err = fixture().arbitrary_builder(order()).set("note[*]", "x").sample().unwrap_err();
    match err {
        GenerationError::PathResolution { path, segment, .. } => {
            assert_eq!(path, "note[*]");
            assert_eq!(segment, "[*]");
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_index_past_rolled_size_is_a_path_error() {
    let err = fixture()
        .arbitrary_builder(order())
        .size("lines", 1)
        .set("lines[3].sku", "x")
        .sample()
        .unwrap_err();
    assert!(matches!(err, GenerationError::PathResolution { .. }));
}

#[test]
fn test_wrong_shape_is_an_invalid_manipulation() {
    let err = fixture().arbitrary_builder(order()).set("lines", 5).sample().unwrap_err();
    assert!(matches!(err, GenerationError::InvalidManipulation { .. }));
}

#[test]
fn test_validator_rejections_are_retried_then_reported() {
    let fixture = FixtureTree::builder()
        .registry(orders())
        .validator(Arc::new(FnValidator::predicate("code must be zero", |v| {
            v.field("code").and_then(Value::as_int) == Some(0)
        })))
        .build()
        .unwrap();

    let accepted = fixture.arbitrary_builder(order()).set("code", 0).sample().unwrap();
    assert_eq!(accepted.field("code"), Some(&Value::Int(0)));

    match fixture.arbitrary_builder(order()).set("code", 5).sample() {
        Err(GenerationError::RetryExhausted { tries, violations, .. }) => {
            assert_eq!(tries, 10);
            assert_eq!(violations[0].message, "code must be zero");
        }
        other => panic!("unexpected {:?}", other),
    }
}

// === TYPED PATHS ===

#[test]
fn test_typed_paths_match_string_paths() {
    let typed = PathExpression::root().field("lines").index(0).field("sku");
    let value = fixture()
        .arbitrary_builder(order())
        .size("lines", 1)
        .manipulate(typed, fixture_tree::ManipulatorKind::Set(Value::from("typed")))
        .sample()
        .unwrap();
    let line = &value.field("lines").and_then(Value::elements).unwrap()[0];
    assert_eq!(line.field("sku").and_then(Value::as_str), Some("typed"));
}

// === CONCURRENCY ===

#[test]
fn test_builder_is_shared_across_threads() {
    let builder = Arc::new(fixture().arbitrary_builder(order()).unique("code"));
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let builder = Arc::clone(&builder);
            thread::spawn(move || {
                (0..2)
                    .map(|_| builder.sample().unwrap().field("code").and_then(Value::as_int).unwrap())
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let mut codes = Vec::new();
    for handle in handles {
        codes.extend(handle.join().unwrap());
    }
    let distinct: HashSet<i64> = codes.iter().copied().collect();
    assert_eq!(codes.len(), 8);
    assert_eq!(distinct.len(), 8);
    assert!(builder.stats().samples >= 8);
}
