//! Evaluation of query trees against JSON documents.
//!
//! A [`Clause`] is compiled once into a [`Filter`] (regexes are built up
//! front) and the filter is then applied to every candidate document.
//!
//! Missing fields and explicit `null` are the same "no value" everywhere.

use std::cmp::Ordering;

use regex::{Regex, RegexBuilder};
use serde_json::{Number, Value};
use tracing::debug;

use crate::clause::{Clause, CompareOp, RegexOptions};

/// Patterns longer than this are rejected and match nothing.
const MAX_PATTERN_LEN: usize = 1000;

/// Resolve a dotted path inside a document.
///
/// Object segments are looked up by key; on arrays a numeric segment indexes
/// the element.
pub fn resolve_path<'a>(document: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = document;
    for segment in path.split('.') {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// The value at `path`, or `None` when absent or `null`.
fn present<'a>(document: &'a Value, path: &str) -> Option<&'a Value> {
    resolve_path(document, path).filter(|v| !v.is_null())
}

/// Compare two JSON numbers by value across integer and float encodings.
pub fn compare_numbers(a: &Number, b: &Number) -> Option<Ordering> {
    if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
        return Some(x.cmp(&y));
    }
    if let (Some(x), Some(y)) = (a.as_u64(), b.as_u64()) {
        return Some(x.cmp(&y));
    }
    a.as_f64()?.partial_cmp(&b.as_f64()?)
}

/// Deep structural equality. Arrays are order-sensitive, objects compare by
/// key set and values, numbers by value.
pub fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => compare_numbers(a, b) == Some(Ordering::Equal),
        (Value::Array(a), Value::Array(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| values_equal(x, y))
        }
        (Value::Object(a), Value::Object(b)) => {
            a.len() == b.len()
                && a
                    .iter()
                    .all(|(key, x)| b.get(key).is_some_and(|y| values_equal(x, y)))
        }
        _ => left == right,
    }
}

/// Ordering for range operators: numbers with numbers, strings with strings.
fn compare_ordered(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => compare_numbers(a, b),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

/// Total order used for sorting results.
///
/// No value < Bool < Number < String < Array < Object.
pub fn sort_order(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    fn rank(v: Option<&Value>) -> u8 {
        match v {
            None | Some(Value::Null) => 0,
            Some(Value::Bool(_)) => 1,
            Some(Value::Number(_)) => 2,
            Some(Value::String(_)) => 3,
            Some(Value::Array(_)) => 4,
            Some(Value::Object(_)) => 5,
        }
    }
    match (a, b) {
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            compare_numbers(x, y).unwrap_or(Ordering::Equal)
        }
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        _ => rank(a).cmp(&rank(b)),
    }
}

/// Equality with `null` standing for "no value".
fn field_equals(field: Option<&Value>, operand: &Value) -> bool {
    match (field, operand) {
        (None, Value::Null) => true,
        (None, _) | (_, Value::Null) => false,
        (Some(v), operand) => values_equal(v, operand),
    }
}

fn build_regex(pattern: &str, options: RegexOptions) -> Option<Regex> {
    if pattern.len() > MAX_PATTERN_LEN {
        debug!("Rejecting regex pattern of {} bytes", pattern.len());
        return None;
    }
    match RegexBuilder::new(pattern)
        .case_insensitive(options.case_insensitive)
        .multi_line(options.multi_line)
        .dot_matches_new_line(options.dot_all)
        .ignore_whitespace(options.extended)
        .build()
    {
        Ok(regex) => Some(regex),
        Err(e) => {
            debug!("Invalid regex pattern treated as no match: {}", e);
            None
        }
    }
}

/// Compiled form of a [`Clause`].
#[derive(Debug, Clone)]
pub enum Filter {
    Always,
    Never,
    Eq(String, Value),
    Ne(String, Value),
    Compare(String, CompareOp, Value),
    In(String, Vec<Value>),
    ContainsAll(String, Vec<Value>),
    Exists(String, bool),
    Regex(String, Regex),
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Nor(Vec<Filter>),
    Not(Box<Filter>),
}

impl Filter {
    /// Compile a clause.
    ///
    /// A tree containing any unrecognized operator compiles to
    /// [`Filter::Never`] as a whole, so a malformed query yields an empty
    /// result instead of an error. Negation cannot turn it into a match.
    pub fn compile(clause: &Clause) -> Self {
        if clause.has_unrecognized() {
            debug!("Query contains an unrecognized operator; matching nothing");
            return Filter::Never;
        }
        Self::compile_node(clause)
    }

    fn compile_node(clause: &Clause) -> Self {
        match clause {
            Clause::MatchAll => Filter::Always,
            Clause::Eq { field, value } => Filter::Eq(field.clone(), value.clone()),
            Clause::Ne { field, value } => Filter::Ne(field.clone(), value.clone()),
            Clause::Compare { field, op, value } => {
                Filter::Compare(field.clone(), *op, value.clone())
            }
            Clause::In { field, values } => Filter::In(field.clone(), values.clone()),
            Clause::ContainsAll { field, values } => {
                Filter::ContainsAll(field.clone(), values.clone())
            }
            Clause::Exists { field, exists } => Filter::Exists(field.clone(), *exists),
            Clause::Regex {
                field,
                pattern,
                options,
            } => match build_regex(pattern, *options) {
                Some(regex) => Filter::Regex(field.clone(), regex),
                None => Filter::Never,
            },
            Clause::And(children) => Filter::And(children.iter().map(Self::compile_node).collect()),
            Clause::Or(children) => Filter::Or(children.iter().map(Self::compile_node).collect()),
            Clause::Nor(children) => Filter::Nor(children.iter().map(Self::compile_node).collect()),
            Clause::Not(inner) => Filter::Not(Box::new(Self::compile_node(inner))),
            Clause::Unrecognized { .. } => Filter::Never,
        }
    }

    /// Decide whether `document` satisfies this filter.
    pub fn matches(&self, document: &Value) -> bool {
        match self {
            Filter::Always => true,
            Filter::Never => false,
            Filter::Eq(field, operand) => field_equals(present(document, field), operand),
            Filter::Ne(field, operand) => !field_equals(present(document, field), operand),
            Filter::Compare(field, op, operand) => {
                let Some(value) = present(document, field) else {
                    return false;
                };
                match compare_ordered(value, operand) {
                    Some(ordering) => match op {
                        CompareOp::Lt => ordering == Ordering::Less,
                        CompareOp::Lte => ordering != Ordering::Greater,
                        CompareOp::Gt => ordering == Ordering::Greater,
                        CompareOp::Gte => ordering != Ordering::Less,
                    },
                    None => false,
                }
            }
            Filter::In(field, candidates) => {
                let value = present(document, field);
                candidates.iter().any(|c| field_equals(value, c))
            }
            Filter::ContainsAll(field, required) => {
                let value = present(document, field);
                !required.is_empty()
                    && required.iter().all(|member| match value {
                        Some(Value::Array(items)) => items.iter().any(|item| {
                            if member.is_null() {
                                item.is_null()
                            } else {
                                values_equal(item, member)
                            }
                        }),
                        other => field_equals(other, member),
                    })
            }
            Filter::Exists(field, exists) => present(document, field).is_some() == *exists,
            Filter::Regex(field, regex) => match present(document, field) {
                Some(Value::String(text)) => regex.is_match(text),
                _ => false,
            },
            Filter::And(children) => children.iter().all(|f| f.matches(document)),
            Filter::Or(children) => children.iter().any(|f| f.matches(document)),
            Filter::Nor(children) => !children.iter().any(|f| f.matches(document)),
            Filter::Not(inner) => !inner.matches(document),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn matches(clause: Clause, doc: Value) -> bool {
        Filter::compile(&clause).matches(&doc)
    }

    #[test]
    fn test_resolve_path() {
        let doc = json!({"a": {"b": [10, {"c": 3}]}});
        assert_eq!(resolve_path(&doc, "a.b.0"), Some(&json!(10)));
        assert_eq!(resolve_path(&doc, "a.b.1.c"), Some(&json!(3)));
        assert_eq!(resolve_path(&doc, "a.x"), None);
        assert_eq!(resolve_path(&doc, "a.b.9"), None);
    }

    #[test]
    fn test_numeric_equality_across_encodings() {
        assert!(values_equal(&json!(1), &json!(1.0)));
        assert!(values_equal(&json!(u64::MAX), &json!(u64::MAX)));
        assert!(!values_equal(&json!(-1), &json!(u64::MAX)));
        assert_eq!(
            compare_numbers(
                json!(2.5).as_number().unwrap(),
                json!(3).as_number().unwrap()
            ),
            Some(Ordering::Less)
        );
    }

    #[test]
    fn test_deep_equality() {
        assert!(values_equal(&json!([1, [2, 3]]), &json!([1.0, [2, 3]])));
        assert!(!values_equal(&json!([1, 2]), &json!([2, 1])));
        assert!(values_equal(&json!({"a": 1, "b": 2}), &json!({"b": 2, "a": 1})));
        assert!(!values_equal(&json!({"a": 1}), &json!({"a": 1, "b": 2})));
    }

    #[test]
    fn test_eq_null_matches_missing() {
        assert!(matches(Clause::eq("a", Value::Null), json!({})));
        assert!(matches(Clause::eq("a", Value::Null), json!({"a": null})));
        assert!(!matches(Clause::eq("a", Value::Null), json!({"a": 0})));
    }

    #[test]
    fn test_ne_on_missing_field() {
        assert!(matches(Clause::ne("a", 5), json!({})));
        assert!(!matches(Clause::ne("a", Value::Null), json!({})));
        assert!(!matches(Clause::ne("a", Value::Null), json!({"a": null})));
        assert!(matches(Clause::ne("a", Value::Null), json!({"a": false})));
    }

    #[test]
    fn test_ordering_requires_same_kind() {
        assert!(matches(Clause::gt("a", 1), json!({"a": 1.5})));
        assert!(!matches(Clause::gt("a", 1), json!({"a": "2"})));
        assert!(matches(Clause::lte("name", "bob"), json!({"name": "bob"})));
        assert!(!matches(Clause::lt("a", 1), json!({})));
        assert!(!matches(Clause::gte("a", Value::Null), json!({"a": null})));
    }

    #[test]
    fn test_eq_array_is_exact() {
        assert!(matches(Clause::eq("t", json!([1, 2])), json!({"t": [1, 2]})));
        assert!(!matches(Clause::eq("t", json!([1, 2])), json!({"t": [2, 1]})));
        assert!(!matches(Clause::eq("t", 1), json!({"t": [1, 2]})));
    }

    #[test]
    fn test_all_scalar_and_empty() {
        assert!(matches(Clause::contains_all("a", [3]), json!({"a": 3})));
        assert!(!matches(Clause::contains_all("a", Vec::<Value>::new()), json!({"a": [1]})));
    }

    #[test]
    fn test_all_null_member_on_missing_field() {
        assert!(matches(Clause::contains_all("a", [Value::Null]), json!({})));
        assert!(!matches(
            Clause::contains_all("a", [Value::Null, json!(102)]),
            json!({})
        ));
    }

    #[test]
    fn test_invalid_regex_matches_nothing() {
        assert!(!matches(Clause::regex("a", "(unclosed", ""), json!({"a": "(unclosed"})));
        assert!(matches(Clause::regex("a", "(unclosed", "").not(), json!({"a": "x"})));
    }

    #[test]
    fn test_regex_only_strings() {
        assert!(!matches(Clause::regex("a", "1", ""), json!({"a": 1})));
        assert!(matches(Clause::regex("a", "^Ab", "i"), json!({"a": "abc"})));
        assert!(!matches(Clause::regex("a", "^Ab", ""), json!({"a": "abc"})));
    }

    #[test]
    fn test_regex_multiline_and_dotall() {
        let doc = json!({"a": "first\nsecond"});
        assert!(!matches(Clause::regex("a", "^second", ""), doc.clone()));
        assert!(matches(Clause::regex("a", "^second", "m"), doc.clone()));
        assert!(!matches(Clause::regex("a", "first.second", ""), doc.clone()));
        assert!(matches(Clause::regex("a", "first.second", "s"), doc));
    }

    #[test]
    fn test_unrecognized_is_never_even_negated() {
        let clause = Clause::Unrecognized {
            operator: "$near".into(),
        }
        .not();
        assert!(!matches(clause, json!({"a": 1})));
    }

    #[test]
    fn test_logical_identities() {
        assert!(matches(Clause::and([]), json!({})));
        assert!(!matches(Clause::or([]), json!({})));
        assert!(matches(Clause::nor([]), json!({})));
    }

    #[test]
    fn test_sort_order() {
        assert_eq!(sort_order(None, Some(&json!(false))), Ordering::Less);
        assert_eq!(sort_order(Some(&json!(2)), Some(&json!(10))), Ordering::Less);
        assert_eq!(sort_order(Some(&json!("b")), Some(&json!("a"))), Ordering::Greater);
        assert_eq!(sort_order(Some(&json!(1)), Some(&json!("1"))), Ordering::Less);
    }
}
