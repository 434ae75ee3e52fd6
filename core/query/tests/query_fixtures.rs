use offcache_query::{Clause, Filter, Query};
use proptest::prelude::*;
use serde_json::{json, Value};

fn people() -> Vec<Value> {
    vec![
        json!({"id": "p1", "name": "Ada", "age": 36, "tags": ["math", "code"], "nick": null}),
        json!({"id": "p2", "name": "Grace", "age": 85, "tags": ["navy", "code"], "nick": "amazing"}),
        json!({"id": "p3", "name": "alan", "age": 41, "tags": [null, 102]}),
        json!({"id": "p4", "name": "Edsger", "address": {"city": "Austin"}}),
    ]
}

fn ids(filter: Value) -> Vec<String> {
    Query::from_filter_json(&filter)
        .run(people())
        .into_iter()
        .map(|doc| doc["id"].as_str().unwrap_or_default().to_string())
        .collect()
}

#[test]
fn ne_null_excludes_missing_and_null() {
    assert_eq!(ids(json!({"nick": {"$ne": null}})), vec!["p2"]);
}

#[test]
fn eq_null_includes_missing_and_null() {
    assert_eq!(ids(json!({"nick": null})), vec!["p1", "p3", "p4"]);
}

#[test]
fn in_with_null_member() {
    assert_eq!(ids(json!({"nick": {"$in": [null, "amazing"]}})).len(), 4);
    assert_eq!(ids(json!({"age": {"$in": [36, 41]}})), vec!["p1", "p3"]);
}

#[test]
fn nin_is_negated_in() {
    assert_eq!(ids(json!({"age": {"$nin": [36, 41]}})), vec!["p2", "p4"]);
}

#[test]
fn all_with_null_member() {
    assert_eq!(ids(json!({"tags": {"$all": [null, 102]}})), vec!["p3"]);
    assert_eq!(ids(json!({"tags": {"$all": ["code"]}})), vec!["p1", "p2"]);
}

#[test]
fn range_on_nested_path() {
    assert_eq!(ids(json!({"address.city": {"$gte": "A", "$lt": "B"}})), vec!["p4"]);
    assert_eq!(ids(json!({"age": {"$gt": 40, "$lte": 85}})), vec!["p2", "p3"]);
}

#[test]
fn regex_extended_ignores_whitespace_and_comments() {
    let filter = json!({"name": {"$regex": "^ a l # first letters\n an $", "$options": "x"}});
    assert_eq!(ids(filter), vec!["p3"]);
}

#[test]
fn regex_case_insensitive() {
    assert_eq!(ids(json!({"name": {"$regex": "^a", "$options": "i"}})), vec!["p1", "p3"]);
    assert_eq!(ids(json!({"name": {"$regex": "^a"}})), vec!["p3"]);
}

#[test]
fn exists_means_non_null() {
    assert_eq!(ids(json!({"nick": {"$exists": true}})), vec!["p2"]);
    assert_eq!(ids(json!({"age": {"$exists": false}})), vec!["p4"]);
}

#[test]
fn logical_operators() {
    let filter = json!({"$or": [{"age": {"$lt": 40}}, {"address.city": "Austin"}]});
    assert_eq!(ids(filter), vec!["p1", "p4"]);

    let filter = json!({"$nor": [{"age": {"$lt": 40}}, {"address.city": "Austin"}]});
    assert_eq!(ids(filter), vec!["p2", "p3"]);

    let filter = json!({"$not": {"tags": {"$all": ["code"]}}});
    assert_eq!(ids(filter), vec!["p3", "p4"]);
}

#[test]
fn unknown_operator_matches_nothing() {
    assert!(ids(json!({"age": {"$near": 3}})).is_empty());
    assert!(ids(json!({"$or": [{"age": 36}, {"$where": "true"}]})).is_empty());
    assert!(ids(json!({"$not": {"age": {"$size": 2}}})).is_empty());
}

#[test]
fn empty_filter_matches_all() {
    assert_eq!(ids(json!({})).len(), 4);
}

fn leaf() -> impl Strategy<Value = Clause> {
    let field = prop::sample::select(vec!["a", "b"]);
    prop_oneof![
        (field.clone(), 0i64..4).prop_map(|(f, v)| Clause::eq(f, v)),
        (field.clone(), 0i64..4).prop_map(|(f, v)| Clause::gt(f, v)),
        (field.clone(), 0i64..4).prop_map(|(f, v)| Clause::ne(f, v)),
        field.clone().prop_map(Clause::exists),
        (field, prop::collection::vec(0i64..4, 0..3)).prop_map(|(f, v)| Clause::is_in(f, v)),
    ]
}

fn clause() -> impl Strategy<Value = Clause> {
    leaf().prop_recursive(3, 16, 3, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..3).prop_map(Clause::and),
            prop::collection::vec(inner.clone(), 0..3).prop_map(Clause::or),
            inner.prop_map(Clause::not),
        ]
    })
}

fn document() -> impl Strategy<Value = Value> {
    (prop::option::of(0i64..4), prop::option::of(0i64..4)).prop_map(|(a, b)| {
        let mut doc = serde_json::Map::new();
        if let Some(a) = a {
            doc.insert("a".into(), json!(a));
        }
        if let Some(b) = b {
            doc.insert("b".into(), json!(b));
        }
        Value::Object(doc)
    })
}

proptest! {
    #[test]
    fn double_negation_is_identity(c in clause(), doc in document()) {
        let plain = Filter::compile(&c).matches(&doc);
        let doubled = Filter::compile(&c.clone().not().not()).matches(&doc);
        prop_assert_eq!(plain, doubled);
    }

    #[test]
    fn nor_is_negated_or(cs in prop::collection::vec(clause(), 0..4), doc in document()) {
        let nor = Filter::compile(&Clause::nor(cs.clone())).matches(&doc);
        let not_or = Filter::compile(&Clause::or(cs).not()).matches(&doc);
        prop_assert_eq!(nor, not_or);
    }

    #[test]
    fn json_form_evaluates_identically(c in clause(), doc in document()) {
        let reparsed = Clause::from_json(&c.to_json());
        prop_assert_eq!(
            Filter::compile(&c).matches(&doc),
            Filter::compile(&reparsed).matches(&doc)
        );
    }
}
