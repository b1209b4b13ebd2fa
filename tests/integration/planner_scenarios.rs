//! End-to-end index selection over an in-memory datastore.
#![allow(missing_docs)]

use std::collections::BTreeMap;
use std::sync::Arc;

use docquery::datastore::{IndexApi, IndexDef, InMemoryDatastore};
use docquery::expr::Expr;
use docquery::plan::{IndexKeyOrder, IndexScan, Operator, PlanSpans};
use docquery::planner::{Aggregate, AggregateFunc, Filter, KeyspaceTerm, OrderTerm, PlanRequest, Planner, QueryShape};
use docquery::{PlanError, PlannerConfig};

fn customer_store() -> InMemoryDatastore {
    InMemoryDatastore::new()
        .with_index(IndexDef::primary("#primary", "customer"))
        .with_index(IndexDef::secondary("ix_age", "customer", vec![Expr::ident("age")]))
        .with_index(IndexDef::secondary("ix_name", "customer", vec![Expr::ident("name")]))
}

fn planner(store: InMemoryDatastore) -> Planner {
    Planner::new(PlannerConfig::default(), Arc::new(store))
}

fn request(filters: Vec<Expr>, shape: QueryShape) -> PlanRequest {
    let mut by_alias = BTreeMap::new();
    by_alias.insert(
        "c".to_owned(),
        filters.into_iter().map(|e| Filter::new(e, ["c"])).collect(),
    );
    PlanRequest {
        request_id: Some("req-1".to_owned()),
        term: KeyspaceTerm::new("customer", "c"),
        filters: by_alias,
        shape,
        ..PlanRequest::default()
    }
}

fn index_scan(op: &Operator) -> &IndexScan {
    match op {
        Operator::IndexScan(scan) => scan,
        Operator::DistinctScan { scan, .. } => index_scan(scan),
        other => panic!("expected an index scan, got {}", other.name()),
    }
}

fn age() -> Expr {
    Expr::path("c.age")
}

#[test]
fn equality_uses_the_matching_index() {
    let out = planner(customer_store())
        .plan(&request(vec![age().equals(Expr::constant(30))], QueryShape::default()))
        .unwrap();
    assert_eq!(out.request_id.as_deref(), Some("req-1"));
    let scan = index_scan(&out.plan);
    assert_eq!(scan.index, "ix_age");
    assert_eq!(scan.alias, "c");
    let PlanSpans::Spans(spans) = &scan.spans else {
        panic!("expected plain spans");
    };
    assert_eq!(spans.len(), 1);
    assert!(!out.plan.is_covering());
    assert_eq!(out.plan_hash, out.explain.plan_hash);
}

#[test]
fn composite_index_dominates_its_prefix() {
    let store = customer_store().with_index(IndexDef::secondary(
        "ix_age_name",
        "customer",
        vec![Expr::ident("age"), Expr::ident("name")],
    ));
    let out = planner(store)
        .plan(&request(
            vec![age().equals(Expr::constant(30)), Expr::path("c.name").equals(Expr::constant("ann"))],
            QueryShape::default(),
        ))
        .unwrap();
    assert_eq!(index_scan(&out.plan).index, "ix_age_name");
}

#[test]
fn unrelated_indexes_are_intersected() {
    let out = planner(customer_store())
        .plan(&request(
            vec![age().equals(Expr::constant(30)), Expr::path("c.name").equals(Expr::constant("ann"))],
            QueryShape::default(),
        ))
        .unwrap();
    let Operator::IntersectScan { scans, .. } = &out.plan else {
        panic!("expected an intersect scan, got {}", out.plan.name());
    };
    let names: Vec<&str> = scans.iter().map(|s| index_scan(s).index.as_str()).collect();
    assert_eq!(names, vec!["ix_age", "ix_name"]);
}

#[test]
fn partial_index_wins_a_tie_when_its_condition_holds() {
    let store = customer_store().with_index(
        IndexDef::secondary("ix_adult", "customer", vec![Expr::ident("age")])
            .with_condition(Expr::ident("age").at_least(Expr::constant(18))),
    );
    let out = planner(store)
        .plan(&request(vec![age().greater_than(Expr::constant(30))], QueryShape::default()))
        .unwrap();
    assert_eq!(index_scan(&out.plan).index, "ix_adult");
}

#[test]
fn contradiction_scans_an_empty_span() {
    let out = planner(customer_store())
        .plan(&request(
            vec![age().greater_than(Expr::constant(5)), age().less_than(Expr::constant(3))],
            QueryShape::default(),
        ))
        .unwrap();
    let scan = index_scan(&out.plan);
    assert_eq!(scan.index, "ix_age");
    let PlanSpans::Spans(spans) = &scan.spans else {
        panic!("expected plain spans");
    };
    assert_eq!(spans.len(), 1);
}

#[test]
fn order_and_limit_are_pushed_into_a_serving_index() {
    let shape = QueryShape::default().with_order(vec![OrderTerm::asc(age())]).with_limit(10);
    let out = planner(customer_store())
        .plan(&request(vec![age().greater_than(Expr::constant(21))], shape))
        .unwrap();
    let scan = index_scan(&out.plan);
    assert_eq!(scan.limit, Some(10));
    assert_eq!(scan.index_order, vec![IndexKeyOrder { key_pos: 0, desc: false }]);
    assert_eq!(out.max_parallelism, 1);
    assert_eq!(out.pushed.limit, Some(10));
    assert_eq!(out.pushed.order.len(), 1);
}

#[test]
fn descending_order_needs_api_v3() {
    let shape = QueryShape::default().with_order(vec![OrderTerm::desc(age())]).with_limit(10);
    let req = request(vec![age().greater_than(Expr::constant(21))], shape);

    let out = planner(customer_store()).plan(&req).unwrap();
    assert_eq!(index_scan(&out.plan).index_order, vec![IndexKeyOrder { key_pos: 0, desc: true }]);

    let v2 = Planner::new(PlannerConfig::default().with_index_api(IndexApi::V2), Arc::new(customer_store()));
    let out = v2.plan(&req).unwrap();
    let scan = index_scan(&out.plan);
    assert!(scan.index_order.is_empty());
    assert_eq!(scan.limit, None);
    assert!(out.pushed.order.is_empty());
    assert_eq!(out.pushed.limit, None);
}

#[test]
fn covering_index_answers_without_fetch() {
    let shape = QueryShape::default().with_cover(vec![age()]);
    let out = planner(customer_store())
        .plan(&request(vec![age().greater_than(Expr::constant(21))], shape))
        .unwrap();
    assert!(out.plan.is_covering());
    assert_eq!(out.covering_scans, vec!["ix_age".to_owned()]);
    assert!(index_scan(&out.plan).covers.contains(&age().to_string()));
}

#[test]
fn grouping_is_pushed_into_a_covering_scan() {
    let shape = QueryShape::default()
        .with_cover(vec![age()])
        .with_group(vec![age()], vec![Aggregate::new(AggregateFunc::Count, None)]);
    let out = planner(customer_store())
        .plan(&request(vec![age().greater_than(Expr::constant(21))], shape))
        .unwrap();
    let aggs = index_scan(&out.plan)
        .index_group_aggs
        .as_ref()
        .expect("group push-down");
    assert_eq!(aggs.aggregates.len(), 1);
    assert_eq!(aggs.depends_on_index_keys, vec![0]);
    assert!(!aggs.partial);
    assert_eq!(out.pushed.group, Some(vec![age()]));
}

#[test]
fn unsargable_filter_falls_back_to_primary() {
    let out = planner(customer_store())
        .plan(&request(vec![Expr::path("c.email").like(Expr::constant("%@x"))], QueryShape::default()))
        .unwrap();
    assert!(matches!(&out.plan, Operator::PrimaryScan { index, limit: None, .. } if index == "#primary"));
}

#[test]
fn always_true_filter_keeps_primary_limit() {
    let filter = Expr::or(vec![age().equals(Expr::constant(30)), Expr::constant(true)]);
    let out = planner(customer_store())
        .plan(&request(vec![filter], QueryShape::default().with_limit(5)))
        .unwrap();
    assert!(matches!(&out.plan, Operator::PrimaryScan { limit: Some(5), .. }));

    let out = planner(customer_store())
        .plan(&request(
            vec![Expr::path("c.email").like(Expr::constant("%@x"))],
            QueryShape::default().with_limit(5),
        ))
        .unwrap();
    assert!(matches!(&out.plan, Operator::PrimaryScan { limit: None, .. }));
}

#[test]
fn missing_primary_is_reported() {
    let store = InMemoryDatastore::new().with_index(IndexDef::secondary("ix_age", "customer", vec![Expr::ident("age")]));
    let err = planner(store)
        .plan(&request(vec![Expr::path("c.city").equals(Expr::constant("x"))], QueryShape::default()))
        .unwrap_err();
    assert!(matches!(err, PlanError::NoPrimaryIndex { ref keyspace } if keyspace == "customer"));
    assert_eq!(err.code(), "NoPrimaryIndex");
}

#[test]
fn plan_hash_is_stable_across_runs() {
    let req = request(vec![age().equals(Expr::constant(30))], QueryShape::default());
    let a = planner(customer_store()).plan(&req).unwrap();
    let b = planner(customer_store()).plan(&req).unwrap();
    assert_eq!(a.plan_hash, b.plan_hash);
    assert_eq!(a.plan, b.plan);
    let json = a.plan.to_json().unwrap();
    assert_eq!(json["#operator"], "IndexScan");
    assert_eq!(json["index"], "ix_age");
}
