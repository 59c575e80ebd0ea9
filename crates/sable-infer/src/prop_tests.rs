//! Property tests for the unifier and type normalization using proptest.
//!
//! These tests stress invariants that must hold for ANY input types,
//! not just hand-picked examples. Key properties:
//!
//! 1. Substitution idempotence: apply(apply(t)) == apply(t)
//! 2. Unification reflexivity: unify(t, t) always succeeds
//! 3. Unification produces a consistent substitution: after a successful
//!    unify(a, b), apply(a) == apply(b)
//! 4. Occurs check: unifying Var(x) with a type containing Var(x) fails
//! 5. Union construction is order-insensitive, flat and idempotent
//! 6. A string literal type is accepted where `String` is expected, and
//!    `String` is not accepted where a literal is expected
//! 7. A field written after a spread overrides the spread's field
//! 8. The same holds when the spread operand is a parameter, resolved only
//!    at the call site

use proptest::prelude::*;
use sable_ast::*;
use sable_types::*;

use crate::registry::TypeRegistry;
use crate::{Category, CheckOptions, Provenance, Reason, Unifier, VarSupply, infer_expr};

// ---------------------------------------------------------------------------
// Strategies for generating types
// ---------------------------------------------------------------------------

const LABEL_POOL: &[&str] = &[
    "a", "b", "c", "d", "e", "x", "y", "z", "name", "age", "id", "val",
];

/// Generated types only mention variables below this bound, so fresh
/// variables handed out by a supply started past it never collide.
const VAR_BOUND: u32 = 6;

fn arb_label() -> impl Strategy<Value = Label> {
    prop::sample::select(LABEL_POOL).prop_map(Label::new)
}

fn arb_type_var_id() -> impl Strategy<Value = TypeVarId> {
    (0..VAR_BOUND).prop_map(TypeVarId)
}

fn arb_row_var_id() -> impl Strategy<Value = RowVarId> {
    (0..VAR_BOUND).prop_map(RowVarId)
}

fn arb_primitive() -> impl Strategy<Value = Type> {
    prop_oneof![
        Just(Type::Int),
        Just(Type::Float),
        Just(Type::Bool),
        Just(Type::Char),
        Just(Type::String),
        Just(Type::Unit),
    ]
}

fn arb_leaf() -> impl Strategy<Value = Type> {
    prop_oneof![
        3 => arb_primitive(),
        2 => arb_type_var_id().prop_map(Type::Var),
    ]
}

/// Fields with distinct labels.
fn arb_fields(inner: BoxedStrategy<Type>) -> impl Strategy<Value = Vec<(Label, Type)>> {
    prop::collection::btree_map(arb_label(), inner, 0..4)
        .prop_map(|fields| fields.into_iter().collect())
}

/// Types built only from constructors whose unification is structural:
/// primitives, variables, single-parameter arrows, tuples and records.
fn arb_structural_type(depth: u32) -> BoxedStrategy<Type> {
    if depth == 0 {
        return arb_leaf().boxed();
    }
    let inner = arb_structural_type(depth - 1);
    prop_oneof![
        3 => arb_leaf(),
        1 => (inner.clone(), inner.clone()).prop_map(|(p, r)| Type::arrow(p, r)),
        1 => prop::collection::vec(inner.clone(), 2..4).prop_map(Type::Tuple),
        1 => arb_fields(inner.clone()).prop_map(Type::record),
        1 => (arb_fields(inner), arb_row_var_id())
            .prop_map(|(fields, rest)| Type::open_record(fields, rest)),
    ]
    .boxed()
}

/// Any type, including unions and literal string types.
fn arb_type(depth: u32) -> BoxedStrategy<Type> {
    if depth == 0 {
        return prop_oneof![
            4 => arb_leaf(),
            1 => prop::sample::select(&["ok", "err"][..]).prop_map(|s| Type::LiteralString(s.into())),
        ]
        .boxed();
    }
    let inner = arb_type(depth - 1);
    prop_oneof![
        2 => arb_structural_type(depth),
        1 => prop::collection::vec(inner, 2..4).prop_map(Type::union),
    ]
    .boxed()
}

fn provenance() -> Provenance {
    Provenance::new(Span::synthetic(), Reason::TypeAscription)
}

fn supply_past_generated_vars() -> VarSupply {
    let mut supply = VarSupply::new();
    while supply.allocated() < VAR_BOUND {
        supply.fresh_type_var();
    }
    supply
}

fn ty_contains_var(ty: &Type, var: TypeVarId) -> bool {
    free_type_vars(ty).contains(&var)
}

// ---------------------------------------------------------------------------
// Substitution
// ---------------------------------------------------------------------------

proptest! {
    /// Applying a substitution twice to the same type produces the same
    /// result as applying it once.
    #[test]
    fn substitution_idempotent(ty in arb_type(3)) {
        let mut subst = Substitution::new();
        // Right-hand sides only mention unbound variables.
        subst.bind_type(TypeVarId(0), Type::Int);
        subst.bind_type(TypeVarId(1), Type::arrow(Type::Var(TypeVarId(4)), Type::Bool));
        subst.bind_row(
            RowVarId(0),
            RowType::open(vec![(Label::new("k"), Type::String)], RowVarId(5)),
        );

        let once = subst.apply(&ty);
        let twice = subst.apply(&once);
        prop_assert_eq!(twice, once);
    }

    /// The empty substitution is the identity.
    #[test]
    fn empty_substitution_is_identity(ty in arb_type(3)) {
        prop_assert_eq!(Substitution::new().apply(&ty), ty);
    }
}

// ---------------------------------------------------------------------------
// Unification
// ---------------------------------------------------------------------------

proptest! {
    #[test]
    fn unify_reflexive(ty in arb_type(3)) {
        let registry = TypeRegistry::new();
        let mut supply = supply_past_generated_vars();
        let mut unifier = Unifier::new(&registry, &mut supply, CheckOptions::default());
        unifier.unify(&ty, &ty, &provenance());
        prop_assert!(!unifier.has_errors(), "{:?}", unifier.errors());
    }

    /// When unification reports no error, both sides resolve to the same type.
    #[test]
    fn unify_makes_sides_equal(a in arb_structural_type(2), b in arb_structural_type(2)) {
        let registry = TypeRegistry::new();
        let mut supply = supply_past_generated_vars();
        let mut unifier = Unifier::new(&registry, &mut supply, CheckOptions::default());
        unifier.unify(&a, &b, &provenance());
        if !unifier.has_errors() {
            prop_assert_eq!(
                unifier.substitution.apply(&a),
                unifier.substitution.apply(&b)
            );
        }
    }

    /// A fresh variable unifies with anything not mentioning it, and
    /// resolves to that type afterwards.
    #[test]
    fn unify_binds_fresh_var(ty in arb_type(3)) {
        let registry = TypeRegistry::new();
        let mut supply = supply_past_generated_vars();
        let var = supply.fresh_type_var();
        let mut unifier = Unifier::new(&registry, &mut supply, CheckOptions::default());
        unifier.unify(&Type::Var(var), &ty, &provenance());
        prop_assert!(!unifier.has_errors(), "{:?}", unifier.errors());
        prop_assert_eq!(
            unifier.substitution.apply(&Type::Var(var)),
            unifier.substitution.apply(&ty)
        );
    }

    #[test]
    fn occurs_check_rejects_cycles(ty in arb_structural_type(2)) {
        let var = TypeVarId(0);
        let cyclic = Type::arrow(Type::Var(var), ty);
        prop_assume!(ty_contains_var(&cyclic, var));

        let registry = TypeRegistry::new();
        let mut supply = supply_past_generated_vars();
        let mut unifier = Unifier::new(&registry, &mut supply, CheckOptions::default());
        unifier.unify(&Type::Var(var), &cyclic, &provenance());
        prop_assert!(
            unifier.errors().iter().any(|d| d.category == Category::InfiniteType),
            "{:?}",
            unifier.errors()
        );
    }

    #[test]
    fn literal_string_fits_string(value in "[a-z]{1,6}") {
        let registry = TypeRegistry::new();
        let mut supply = supply_past_generated_vars();
        let mut unifier = Unifier::new(&registry, &mut supply, CheckOptions::default());
        unifier.unify(&Type::String, &Type::LiteralString(value.clone()), &provenance());
        prop_assert!(!unifier.has_errors(), "{:?}", unifier.errors());

        unifier.unify(&Type::LiteralString(value.clone()), &Type::String, &provenance());
        prop_assert_eq!(unifier.errors().len(), 1);

        unifier.unify(&Type::Int, &Type::LiteralString(value), &provenance());
        prop_assert_eq!(unifier.errors().len(), 2);
    }
}

// ---------------------------------------------------------------------------
// Union normalization
// ---------------------------------------------------------------------------

proptest! {
    #[test]
    fn union_is_order_insensitive(members in prop::collection::vec(arb_type(1), 1..5)) {
        let forward = Type::union(members.clone());
        let backward = Type::union(members.into_iter().rev());
        prop_assert_eq!(forward, backward);
    }

    #[test]
    fn union_is_associative(a in arb_type(1), b in arb_type(1), c in arb_type(1)) {
        let left = Type::union([Type::union([a.clone(), b.clone()]), c.clone()]);
        let right = Type::union([a, Type::union([b, c])]);
        prop_assert_eq!(left, right);
    }

    #[test]
    fn union_is_idempotent(ty in arb_structural_type(2)) {
        prop_assert_eq!(Type::union([ty.clone(), ty.clone()]), ty.clone());
        prop_assert_eq!(Type::union([ty.clone()]), ty);
    }

    #[test]
    fn union_members_are_flat(members in prop::collection::vec(arb_type(2), 1..5)) {
        let union = Type::union(members);
        for member in union.alternatives() {
            prop_assert!(!matches!(member, Type::Union(_)), "nested union in {}", union);
        }
    }
}

// ---------------------------------------------------------------------------
// Record spreads
// ---------------------------------------------------------------------------

fn int_record(labels: &[String]) -> Expr {
    let items = labels
        .iter()
        .enumerate()
        .map(|(i, label)| {
            RecordItem::Field(
                Spanned::new(label.clone(), Span::synthetic()),
                Spanned::new(ExprKind::Lit(Lit::Int(i as i64)), Span::synthetic()),
            )
        })
        .collect();
    Spanned::new(ExprKind::Record(items), Span::synthetic())
}

proptest! {
    /// `let r = {..ints..} in {...r, label: "s"}` keeps every field of `r`
    /// and gives `label` the later type.
    #[test]
    fn later_field_overrides_spread(
        labels in prop::collection::btree_set(prop::sample::select(LABEL_POOL), 1..5),
        pick in any::<prop::sample::Index>(),
    ) {
        let labels: Vec<String> = labels.into_iter().map(String::from).collect();
        let overridden = pick.get(&labels).clone();

        let synthetic = |kind| Spanned::new(kind, Span::synthetic());
        let merged = synthetic(ExprKind::Record(vec![
            RecordItem::Spread(synthetic(ExprKind::Var("r".into()))),
            RecordItem::Field(
                Spanned::new(overridden.clone(), Span::synthetic()),
                synthetic(ExprKind::Lit(Lit::String("s".into()))),
            ),
        ]));
        let expr = synthetic(ExprKind::Let {
            binding: Box::new(LetBinding {
                name: Spanned::new("r".into(), Span::synthetic()),
                recursive: false,
                params: None,
                annotation: None,
                value: int_record(&labels),
            }),
            body: Some(Box::new(merged)),
        });

        let ty = infer_expr(&expr).map_err(|e| TestCaseError::fail(e.to_string()))?;
        let Type::Record(row) = ty else {
            return Err(TestCaseError::fail("merge must produce a record"));
        };
        prop_assert!(!row.is_open());
        prop_assert_eq!(row.fields.len(), labels.len());
        for label in &labels {
            let expected = if *label == overridden { Type::String } else { Type::Int };
            prop_assert_eq!(row.get(&Label::new(label.as_str())), Some(&expected));
        }
    }
}

proptest! {
    /// `let f = fn(r) -> {...r, label: "s"} in f({..ints..})` and the same
    /// with the field written first. The spread operand is only known at
    /// the call, yet whichever of the two comes later decides `label`.
    #[test]
    fn override_order_holds_for_parameter_spread(
        labels in prop::collection::btree_set(prop::sample::select(LABEL_POOL), 1..5),
        pick in any::<prop::sample::Index>(),
        field_first in any::<bool>(),
    ) {
        let labels: Vec<String> = labels.into_iter().map(String::from).collect();
        let overridden = pick.get(&labels).clone();

        let synthetic = |kind| Spanned::new(kind, Span::synthetic());
        let spread = RecordItem::Spread(synthetic(ExprKind::Var("r".into())));
        let field = RecordItem::Field(
            Spanned::new(overridden.clone(), Span::synthetic()),
            synthetic(ExprKind::Lit(Lit::String("s".into()))),
        );
        let items = if field_first { vec![field, spread] } else { vec![spread, field] };
        let extend = synthetic(ExprKind::Lambda {
            params: vec![Param {
                name: Spanned::new("r".into(), Span::synthetic()),
                annotation: None,
            }],
            body: Box::new(synthetic(ExprKind::Record(items))),
        });
        let expr = synthetic(ExprKind::Let {
            binding: Box::new(LetBinding {
                name: Spanned::new("f".into(), Span::synthetic()),
                recursive: false,
                params: None,
                annotation: None,
                value: extend,
            }),
            body: Some(Box::new(synthetic(ExprKind::Call {
                func: Box::new(synthetic(ExprKind::Var("f".into()))),
                args: vec![int_record(&labels)],
            }))),
        });

        let ty = infer_expr(&expr).map_err(|e| TestCaseError::fail(e.to_string()))?;
        let Type::Record(row) = ty else {
            return Err(TestCaseError::fail("merge must produce a record"));
        };
        prop_assert!(!row.is_open());
        prop_assert_eq!(row.fields.len(), labels.len());
        for label in &labels {
            let expected = if *label == overridden && !field_first {
                Type::String
            } else {
                Type::Int
            };
            prop_assert_eq!(row.get(&Label::new(label.as_str())), Some(&expected));
        }
    }
}
