//! Micro benchmarks for DNF normalization and index selection.
#![forbid(unsafe_code)]
#![allow(missing_docs)]

use std::collections::BTreeMap;
use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use docquery::datastore::{IndexDef, InMemoryDatastore};
use docquery::expr::Expr;
use docquery::planner::{Dnf, Filter, KeyspaceTerm, OrderTerm, PlanRequest, Planner, QueryShape};
use docquery::PlannerConfig;

const INDEXES: usize = 24;

fn store() -> InMemoryDatastore {
    let mut store = InMemoryDatastore::new().with_index(IndexDef::primary("#primary", "customer"));
    for i in 0..INDEXES {
        store.add_index(IndexDef::secondary(
            format!("ix_{i:02}"),
            "customer",
            vec![Expr::ident(format!("f{}", i % 6)), Expr::ident(format!("f{}", (i + 1) % 6))],
        ));
    }
    store
}

fn predicate() -> Expr {
    let field = |i: usize| Expr::path(&format!("c.f{i}"));
    Expr::and(vec![
        Expr::or(vec![
            field(0).equals(Expr::constant(1)),
            field(0).between(Expr::constant(10), Expr::constant(20)),
        ]),
        field(1).greater_than(Expr::constant(5)),
        Expr::not(field(2).less_than(Expr::constant(3))),
    ])
}

fn micro_planner(c: &mut Criterion) {
    let mut group = c.benchmark_group("micro/planner");

    let pred = predicate();
    let dnf = Dnf::default();
    group.bench_function("dnf_normalize", |b| {
        b.iter(|| black_box(dnf.normalize(black_box(&pred))));
    });

    let planner = Planner::new(PlannerConfig::default(), Arc::new(store()));
    let mut filters = BTreeMap::new();
    filters.insert("c".to_owned(), vec![Filter::new(pred.clone(), ["c"])]);
    let request = PlanRequest {
        term: KeyspaceTerm::new("customer", "c"),
        filters,
        shape: QueryShape::default()
            .with_order(vec![OrderTerm::asc(Expr::path("c.f1"))])
            .with_limit(20),
        ..PlanRequest::default()
    };
    group.bench_function("plan_scan", |b| {
        b.iter(|| black_box(planner.plan(&request).unwrap().plan_hash));
    });

    group.finish();
}

criterion_group!(benches, micro_planner);
criterion_main!(benches);
