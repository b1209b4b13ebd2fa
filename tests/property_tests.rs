#![allow(missing_docs)]

use std::collections::BTreeMap;

use docquery::expr::{CompareOp, Expr, IsKind};
use docquery::planner::{sargable_for, Dnf};
use docquery::value::{AnnotatedValue, Value};
use docquery::HashTable;
use proptest::prelude::*;

fn arb_field() -> impl Strategy<Value = Expr> {
    prop_oneof![Just(Expr::path("c.a")), Just(Expr::path("c.b"))]
}

fn arb_op() -> impl Strategy<Value = CompareOp> {
    prop_oneof![
        Just(CompareOp::Eq),
        Just(CompareOp::Ne),
        Just(CompareOp::Lt),
        Just(CompareOp::Le),
        Just(CompareOp::Gt),
        Just(CompareOp::Ge),
    ]
}

fn arb_atom() -> impl Strategy<Value = Expr> {
    prop_oneof![
        (arb_field(), arb_op(), 0i64..4).prop_map(|(f, op, v)| f.compare(op, Expr::constant(v))),
        (arb_field(), 0i64..4, 0i64..4).prop_map(|(f, lo, hi)| f.between(Expr::constant(lo), Expr::constant(hi))),
        (arb_field(), prop_oneof![Just(IsKind::Null), Just(IsKind::Missing), Just(IsKind::Valued)])
            .prop_map(|(f, kind)| f.is(kind)),
    ]
}

fn arb_pred() -> impl Strategy<Value = Expr> {
    arb_atom().prop_recursive(3, 24, 3, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 2..=3).prop_map(Expr::and),
            prop::collection::vec(inner.clone(), 2..=3).prop_map(Expr::or),
            inner.prop_map(Expr::not),
        ]
    })
}

fn arb_field_value() -> impl Strategy<Value = Option<Value>> {
    prop_oneof![
        Just(None),
        Just(Some(Value::Null)),
        (0i64..4).prop_map(|v| Some(Value::Int(v))),
    ]
}

fn row(a: Option<Value>, b: Option<Value>) -> AnnotatedValue {
    let mut doc = BTreeMap::new();
    if let Some(a) = a {
        doc.insert("a".to_owned(), a);
    }
    if let Some(b) = b {
        doc.insert("b".to_owned(), b);
    }
    AnnotatedValue::for_document("c", "k1", Value::Object(doc))
}

proptest! {
    #[test]
    fn prop_dnf_is_idempotent(pred in arb_pred()) {
        let dnf = Dnf::default();
        let once = dnf.normalize(&pred);
        prop_assert_eq!(dnf.normalize(&once), once);
    }

    #[test]
    fn prop_dnf_preserves_truth(pred in arb_pred(), a in arb_field_value(), b in arb_field_value()) {
        let item = row(a, b);
        let normalized = Dnf::default().normalize(&pred);
        prop_assert_eq!(normalized.evaluate(&item).truth(), pred.evaluate(&item).truth());
    }

    #[test]
    fn prop_sargable_prefix_stops_at_first_gap(constrained in prop::collection::vec(any::<bool>(), 1..5)) {
        let keys: Vec<Expr> = (0..constrained.len()).map(|i| Expr::path(&format!("c.k{i}"))).collect();
        let terms: Vec<Expr> = keys
            .iter()
            .zip(&constrained)
            .filter(|(_, on)| **on)
            .map(|(k, _)| k.clone().equals(Expr::constant(1)))
            .collect();
        prop_assume!(!terms.is_empty());
        let pred = Dnf::default().normalize(&Expr::and(terms));
        let expected = constrained.iter().take_while(|on| **on).count();
        prop_assert_eq!(sargable_for(&pred, &keys, "c"), (expected, expected));
    }

    #[test]
    fn prop_hash_table_keeps_every_put(keys in prop::collection::vec(0i64..24, 0..300)) {
        let mut table = HashTable::with_buckets(2);
        for (n, k) in keys.iter().enumerate() {
            table.put(Value::Int(*k), Value::Int(n as i64)).unwrap();
        }
        for k in 0i64..24 {
            let expected = keys.iter().filter(|x| **x == k).count();
            let mut seen = usize::from(table.get(&Value::Int(k)).unwrap().is_some());
            if seen > 0 {
                while table.get_next().unwrap().is_some() {
                    seen += 1;
                }
            }
            prop_assert_eq!(seen, expected);
        }
        prop_assert_eq!(table.len(), keys.len());
    }
}
