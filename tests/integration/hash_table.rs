//! Multiplicity, full-scan and growth behaviour of the execution hash table.
#![allow(missing_docs)]

use docquery::execution::{collect_rows, HashJoin, HashTable, VecRowStream};
use docquery::expr::Expr;
use docquery::{AnnotatedValue, HashTableError, PlannerConfig, Value};
use serde_json::json;

const KEYS: i64 = 4096;

fn copies(i: i64) -> usize {
    if !(0..KEYS).contains(&i) {
        0
    } else if i & 0xfff == 0 {
        25
    } else if i & 0xff == 0 {
        5
    } else {
        1
    }
}

fn string_key(i: i64) -> Value {
    Value::from(format!("this is string {i}"))
}

fn populated() -> HashTable {
    let mut table = HashTable::new();
    for i in 0..KEYS {
        for j in 0..copies(i) {
            table
                .put(
                    Value::Int(i),
                    Value::from(format!("this is payload value for int hash value i = {i} j = {j}")),
                )
                .unwrap();
            table
                .put(
                    string_key(i),
                    Value::from(format!("this is payload value for string hash value i = {i} j = {j}")),
                )
                .unwrap();
        }
    }
    table
}

fn chain(table: &mut HashTable, key: &Value) -> Vec<Value> {
    let mut out = Vec::new();
    let mut next = table.get(key).unwrap().cloned();
    while let Some(payload) = next {
        out.push(payload);
        next = table.get_next().unwrap().cloned();
    }
    out
}

#[test]
fn every_duplicate_is_retrievable() {
    let mut table = populated();
    for i in -2..4100 {
        let ints = chain(&mut table, &Value::Int(i));
        assert_eq!(ints.len(), copies(i), "int key {i}");
        let strings = chain(&mut table, &string_key(i));
        assert_eq!(strings.len(), copies(i), "string key {i}");
    }
}

#[test]
fn duplicates_come_back_in_insertion_order() {
    let mut table = populated();
    let payloads = chain(&mut table, &Value::Int(256));
    let expected: Vec<Value> = (0..5)
        .map(|j| Value::from(format!("this is payload value for int hash value i = 256 j = {j}")))
        .collect();
    assert_eq!(payloads, expected);
}

#[test]
fn iterate_visits_every_put_and_growth_doubles() {
    let mut table = populated();
    let mut count = 0;
    while table.iterate().unwrap().is_some() {
        count += 1;
    }
    assert_eq!(count, 8360);
    assert_eq!(table.len(), 8360);
    assert_eq!(table.iter().count(), 8360);
    assert_eq!(table.num_buckets(), 16384);
}

#[test]
fn float_and_int_keys_are_the_same_key() {
    let mut table = populated();
    assert_eq!(chain(&mut table, &Value::Float(0.0)).len(), 25);
    assert_eq!(chain(&mut table, &Value::Float(0.5)).len(), 0);
}

#[test]
fn dropped_table_rejects_use() {
    let mut table = populated();
    table.drop_table();
    assert_eq!(table.num_buckets(), 0);
    assert!(matches!(table.get(&Value::Int(1)), Err(HashTableError::Dropped)));
    assert!(matches!(table.iterate(), Err(HashTableError::Dropped)));
}

#[test]
fn join_sizes_its_table_from_config() {
    let config = PlannerConfig::from_toml_str("hash_table_initial_buckets = 4\n").unwrap();
    let doc = |alias: &str, id: &str, body: serde_json::Value| {
        AnnotatedValue::for_document(alias, id, Value::from(body))
    };
    let build: Vec<AnnotatedValue> = (0..40)
        .map(|i| doc("o", &format!("o{i}"), json!({"cust": format!("c{}", i % 4)})))
        .collect();
    let probe = vec![doc("c", "c1", json!({"ref": "c1"})), doc("c", "c9", json!({"ref": "c9"}))];
    let mut join = HashJoin::new(
        Box::new(VecRowStream::new(build)),
        &Expr::path("o.cust"),
        Box::new(VecRowStream::new(probe)),
        Expr::path("c.ref"),
        false,
        &config,
    )
    .unwrap();
    assert_eq!(collect_rows(&mut join).unwrap().len(), 10);
}
