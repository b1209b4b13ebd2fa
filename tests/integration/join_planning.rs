//! Index joins, index nests and nested-loop nests.
#![allow(missing_docs)]

use std::collections::BTreeMap;
use std::sync::Arc;

use docquery::datastore::{IndexDef, InMemoryDatastore};
use docquery::expr::Expr;
use docquery::plan::Operator;
use docquery::planner::{Access, Filter, KeyspaceTerm, PlanRequest, Planner, QueryShape};
use docquery::PlannerConfig;

fn orders_store() -> InMemoryDatastore {
    InMemoryDatastore::new()
        .with_index(IndexDef::primary("#primary", "orders"))
        .with_index(IndexDef::secondary("ix_cust", "orders", vec![Expr::ident("cust")]))
        .with_index(IndexDef::secondary("ix_total", "orders", vec![Expr::ident("total")]))
}

fn planner(store: InMemoryDatastore) -> Planner {
    Planner::new(PlannerConfig::default(), Arc::new(store))
}

fn join_request(access: Access, on_key: Expr, filters: Vec<Expr>, shape: QueryShape) -> PlanRequest {
    let mut by_alias = BTreeMap::new();
    by_alias.insert(
        "o".to_owned(),
        filters.into_iter().map(|e| Filter::new(e, ["o"])).collect(),
    );
    PlanRequest {
        term: KeyspaceTerm::new("orders", "o").with_join_keys(on_key),
        access,
        filters: by_alias,
        shape,
        ..PlanRequest::default()
    }
}

#[test]
fn index_join_probes_the_on_key_index() {
    let out = planner(orders_store())
        .plan(&join_request(Access::IndexJoin, Expr::path("o.cust"), Vec::new(), QueryShape::default()))
        .unwrap();
    let Operator::IndexJoin(join) = &out.plan else {
        panic!("expected an index join, got {}", out.plan.name());
    };
    assert_eq!(join.index, "ix_cust");
    assert_eq!(join.alias, "o");
    assert_eq!(join.on_key, Expr::path("o.cust").to_string());
    assert!(join.covers.is_empty());
    assert!(out.covering_scans.is_empty());
}

#[test]
fn covered_index_join_lists_its_keys() {
    let shape = QueryShape::default().with_cover(vec![Expr::path("o.cust")]);
    let out = planner(orders_store())
        .plan(&join_request(Access::IndexJoin, Expr::path("o.cust"), Vec::new(), shape))
        .unwrap();
    assert!(out.plan.is_covering());
    assert_eq!(out.covering_scans, vec!["ix_cust".to_owned()]);
    let Operator::IndexJoin(join) = &out.plan else {
        panic!("expected an index join");
    };
    assert_eq!(
        join.covers,
        vec![Expr::path("o.cust").to_string(), Expr::meta_id("o").to_string()]
    );
}

#[test]
fn index_nest_is_never_covered() {
    let shape = QueryShape::default().with_cover(vec![Expr::path("o.cust")]);
    let out = planner(orders_store())
        .plan(&join_request(Access::IndexNest, Expr::path("o.cust"), Vec::new(), shape))
        .unwrap();
    assert!(matches!(&out.plan, Operator::IndexNest { index, outer: false, .. } if index == "ix_cust"));
    assert!(out.covering_scans.is_empty());
}

#[test]
fn join_without_a_leading_key_index_fails() {
    let err = planner(orders_store())
        .plan(&join_request(Access::IndexJoin, Expr::path("o.region"), Vec::new(), QueryShape::default()))
        .unwrap_err();
    assert_eq!(err.code(), "NoIndexJoin");
    assert!(err.to_string().contains("keyspace o"));
}

#[test]
fn array_indexes_cannot_serve_joins() {
    let store = InMemoryDatastore::new().with_index(IndexDef::secondary(
        "ix_tags",
        "orders",
        vec![Expr::array_key(false, Expr::ident("t"), "t", Expr::ident("tags"))],
    ));
    let err = planner(store)
        .plan(&join_request(Access::IndexJoin, Expr::path("o.tags"), Vec::new(), QueryShape::default()))
        .unwrap_err();
    assert_eq!(err.code(), "NoIndexJoin");
}

#[test]
fn nested_loop_nest_wraps_a_scan_of_the_inner_keyspace() {
    let on_clause = Expr::path("o.cust").equals(Expr::meta_id("c"));
    let mut req = join_request(
        Access::NestedLoopNest { on_clause },
        Expr::path("o.cust"),
        vec![Expr::path("o.total").greater_than(Expr::constant(100))],
        QueryShape::default().with_cover(vec![Expr::path("o.total")]),
    );
    req.term.outer = true;
    let out = planner(orders_store()).plan(&req).unwrap();
    let Operator::NLNest(nest) = &out.plan else {
        panic!("expected a nested-loop nest, got {}", out.plan.name());
    };
    assert!(nest.outer());
    assert_eq!(nest.alias(), "o");
    let Operator::IndexScan(scan) = nest.child() else {
        panic!("expected an index scan child");
    };
    assert_eq!(scan.index, "ix_total");
    assert!(scan.covers.is_empty());

    let json = out.plan.to_json().unwrap();
    assert_eq!(json["#operator"], "NestedLoopNest");
    assert_eq!(json["~child"]["#operator"], "IndexScan");
}

#[test]
fn join_on_unregistered_keyspace_is_internal() {
    let req = PlanRequest {
        term: KeyspaceTerm::new("orders", "o").with_join_keys(Expr::path("o.cust")),
        access: Access::IndexJoin,
        ..PlanRequest::default()
    };
    let err = planner(orders_store()).plan(&req).unwrap_err();
    assert_eq!(err.code(), "Internal");
}

#[test]
fn covering_join_index_survives_a_shorter_peer() {
    let store = orders_store().with_index(IndexDef::secondary(
        "ix_cust_total",
        "orders",
        vec![Expr::ident("cust"), Expr::ident("total")],
    ));
    let shape = QueryShape::default().with_cover(vec![Expr::path("o.cust"), Expr::path("o.total")]);
    let out = planner(store)
        .plan(&join_request(Access::IndexJoin, Expr::path("o.cust"), Vec::new(), shape))
        .unwrap();
    let Operator::IndexJoin(join) = &out.plan else {
        panic!("expected an index join, got {}", out.plan.name());
    };
    assert_eq!(join.index, "ix_cust_total");
    assert_eq!(
        join.covers,
        vec![
            Expr::path("o.cust").to_string(),
            Expr::path("o.total").to_string(),
            Expr::meta_id("o").to_string(),
        ]
    );
    assert_eq!(out.covering_scans, vec!["ix_cust_total".to_owned()]);
}

#[test]
fn uncovered_join_prefers_the_shorter_index() {
    let store = orders_store().with_index(IndexDef::secondary(
        "ix_cust_total",
        "orders",
        vec![Expr::ident("cust"), Expr::ident("total")],
    ));
    let out = planner(store)
        .plan(&join_request(Access::IndexJoin, Expr::path("o.cust"), Vec::new(), QueryShape::default()))
        .unwrap();
    let Operator::IndexJoin(join) = &out.plan else {
        panic!("expected an index join");
    };
    assert_eq!(join.index, "ix_cust");
    assert!(join.covers.is_empty());
}
