//! Query tree and its MongoDB-style JSON form.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

/// Ordering comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Lt,
    Lte,
    Gt,
    Gte,
}

impl CompareOp {
    fn key(self) -> &'static str {
        match self {
            CompareOp::Lt => "$lt",
            CompareOp::Lte => "$lte",
            CompareOp::Gt => "$gt",
            CompareOp::Gte => "$gte",
        }
    }

    fn from_key(key: &str) -> Option<Self> {
        match key {
            "$lt" => Some(CompareOp::Lt),
            "$lte" => Some(CompareOp::Lte),
            "$gt" => Some(CompareOp::Gt),
            "$gte" => Some(CompareOp::Gte),
            _ => None,
        }
    }
}

/// Flags accepted by `$regex` through `$options`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegexOptions {
    /// `i`
    pub case_insensitive: bool,
    /// `m`: `^` and `$` match at line boundaries.
    pub multi_line: bool,
    /// `s`: `.` matches newlines.
    pub dot_all: bool,
    /// `x`: whitespace and `#` comments in the pattern are ignored.
    pub extended: bool,
}

impl RegexOptions {
    /// Parse an option string such as `"ix"`. Unknown letters are ignored.
    pub fn parse(options: &str) -> Self {
        let mut parsed = Self::default();
        for flag in options.chars() {
            match flag {
                'i' => parsed.case_insensitive = true,
                'm' => parsed.multi_line = true,
                's' => parsed.dot_all = true,
                'x' => parsed.extended = true,
                _ => {}
            }
        }
        parsed
    }

    /// Render back to an option string.
    pub fn as_string(&self) -> String {
        let mut out = String::new();
        if self.case_insensitive {
            out.push('i');
        }
        if self.multi_line {
            out.push('m');
        }
        if self.dot_all {
            out.push('s');
        }
        if self.extended {
            out.push('x');
        }
        out
    }
}

/// One node of a query tree.
///
/// Field names are dotted paths into the document (`"address.city"`,
/// `"tags.0"`).
#[derive(Debug, Clone, PartialEq)]
pub enum Clause {
    /// Matches every document.
    MatchAll,
    Eq {
        field: String,
        value: Value,
    },
    Ne {
        field: String,
        value: Value,
    },
    Compare {
        field: String,
        op: CompareOp,
        value: Value,
    },
    In {
        field: String,
        values: Vec<Value>,
    },
    /// `$all`: the field holds every listed value.
    ContainsAll {
        field: String,
        values: Vec<Value>,
    },
    Exists {
        field: String,
        exists: bool,
    },
    Regex {
        field: String,
        pattern: String,
        options: RegexOptions,
    },
    And(Vec<Clause>),
    Or(Vec<Clause>),
    Nor(Vec<Clause>),
    Not(Box<Clause>),
    /// An operator this evaluator does not know. Any query containing one
    /// matches nothing.
    Unrecognized {
        operator: String,
    },
}

impl Clause {
    pub fn match_all() -> Self {
        Clause::MatchAll
    }

    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Clause::Eq {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn ne(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Clause::Ne {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn lt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(field, CompareOp::Lt, value)
    }

    pub fn lte(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(field, CompareOp::Lte, value)
    }

    pub fn gt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(field, CompareOp::Gt, value)
    }

    pub fn gte(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(field, CompareOp::Gte, value)
    }

    fn compare(field: impl Into<String>, op: CompareOp, value: impl Into<Value>) -> Self {
        Clause::Compare {
            field: field.into(),
            op,
            value: value.into(),
        }
    }

    pub fn is_in<V: Into<Value>>(field: impl Into<String>, values: impl IntoIterator<Item = V>) -> Self {
        Clause::In {
            field: field.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn contains_all<V: Into<Value>>(
        field: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        Clause::ContainsAll {
            field: field.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn exists(field: impl Into<String>) -> Self {
        Clause::Exists {
            field: field.into(),
            exists: true,
        }
    }

    pub fn not_exists(field: impl Into<String>) -> Self {
        Clause::Exists {
            field: field.into(),
            exists: false,
        }
    }

    pub fn regex(field: impl Into<String>, pattern: impl Into<String>, options: &str) -> Self {
        Clause::Regex {
            field: field.into(),
            pattern: pattern.into(),
            options: RegexOptions::parse(options),
        }
    }

    pub fn and(clauses: impl IntoIterator<Item = Clause>) -> Self {
        Clause::And(clauses.into_iter().collect())
    }

    pub fn or(clauses: impl IntoIterator<Item = Clause>) -> Self {
        Clause::Or(clauses.into_iter().collect())
    }

    pub fn nor(clauses: impl IntoIterator<Item = Clause>) -> Self {
        Clause::Nor(clauses.into_iter().collect())
    }

    /// Negate this clause. `Clause::is_in(..).not()` is `$nin`.
    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Self {
        Clause::Not(Box::new(self))
    }

    /// True if this clause or any descendant is [`Clause::Unrecognized`].
    pub fn has_unrecognized(&self) -> bool {
        match self {
            Clause::Unrecognized { .. } => true,
            Clause::And(children) | Clause::Or(children) | Clause::Nor(children) => {
                children.iter().any(Clause::has_unrecognized)
            }
            Clause::Not(inner) => inner.has_unrecognized(),
            _ => false,
        }
    }

    /// Parse a MongoDB-style query document.
    ///
    /// Never fails: anything this evaluator cannot interpret becomes
    /// [`Clause::Unrecognized`].
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Object(map) => parse_document(map),
            _ => unrecognized("<non-object query>"),
        }
    }

    /// Render as a MongoDB-style query document.
    pub fn to_json(&self) -> Value {
        match self {
            Clause::MatchAll => Value::Object(Map::new()),
            Clause::Eq { field, value } => {
                // An object operand would read back as an operator document.
                if value.is_object() {
                    field_doc(field, "$eq", value.clone())
                } else {
                    single(field, value.clone())
                }
            }
            Clause::Ne { field, value } => field_doc(field, "$ne", value.clone()),
            Clause::Compare { field, op, value } => field_doc(field, op.key(), value.clone()),
            Clause::In { field, values } => field_doc(field, "$in", Value::Array(values.clone())),
            Clause::ContainsAll { field, values } => {
                field_doc(field, "$all", Value::Array(values.clone()))
            }
            Clause::Exists { field, exists } => field_doc(field, "$exists", Value::Bool(*exists)),
            Clause::Regex {
                field,
                pattern,
                options,
            } => {
                let mut ops = Map::new();
                ops.insert("$regex".into(), Value::String(pattern.clone()));
                let flags = options.as_string();
                if !flags.is_empty() {
                    ops.insert("$options".into(), Value::String(flags));
                }
                single(field, Value::Object(ops))
            }
            Clause::And(children) => logical("$and", children),
            Clause::Or(children) => logical("$or", children),
            Clause::Nor(children) => logical("$nor", children),
            Clause::Not(inner) => single("$not", inner.to_json()),
            Clause::Unrecognized { operator } => single(operator, Value::Null),
        }
    }
}

impl Serialize for Clause {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Clause {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Ok(Clause::from_json(&value))
    }
}

fn single(key: &str, value: Value) -> Value {
    let mut map = Map::new();
    map.insert(key.to_string(), value);
    Value::Object(map)
}

fn field_doc(field: &str, op: &str, operand: Value) -> Value {
    single(field, single(op, operand))
}

fn logical(op: &str, children: &[Clause]) -> Value {
    single(op, Value::Array(children.iter().map(Clause::to_json).collect()))
}

fn unrecognized(operator: &str) -> Clause {
    Clause::Unrecognized {
        operator: operator.to_string(),
    }
}

fn collapse(mut clauses: Vec<Clause>) -> Clause {
    match clauses.len() {
        0 => Clause::MatchAll,
        1 => clauses.remove(0),
        _ => Clause::And(clauses),
    }
}

fn parse_document(map: &Map<String, Value>) -> Clause {
    let clauses = map
        .iter()
        .map(|(key, value)| {
            if key.starts_with('$') {
                parse_top_level(key, value)
            } else {
                parse_field(key, value)
            }
        })
        .collect();
    collapse(clauses)
}

fn parse_top_level(op: &str, value: &Value) -> Clause {
    match op {
        "$and" | "$or" | "$nor" => {
            let Value::Array(items) = value else {
                return unrecognized(op);
            };
            let children: Vec<Clause> = items.iter().map(Clause::from_json).collect();
            match op {
                "$and" => Clause::And(children),
                "$or" => Clause::Or(children),
                _ => Clause::Nor(children),
            }
        }
        "$not" => match value {
            Value::Object(_) => Clause::from_json(value).not(),
            _ => unrecognized(op),
        },
        _ => unrecognized(op),
    }
}

fn is_operator_doc(map: &Map<String, Value>) -> bool {
    !map.is_empty() && map.keys().all(|k| k.starts_with('$'))
}

fn parse_field(field: &str, value: &Value) -> Clause {
    match value {
        Value::Object(ops) if is_operator_doc(ops) => parse_operators(field, ops),
        Value::Object(ops) if ops.keys().any(|k| k.starts_with('$')) => {
            // Mixed operator and plain keys.
            unrecognized("<mixed operator document>")
        }
        _ => Clause::Eq {
            field: field.to_string(),
            value: value.clone(),
        },
    }
}

fn parse_operators(field: &str, ops: &Map<String, Value>) -> Clause {
    let mut clauses = Vec::new();
    for (op, operand) in ops {
        let clause = match op.as_str() {
            "$eq" => Clause::eq(field, operand.clone()),
            "$ne" => Clause::ne(field, operand.clone()),
            "$lt" | "$lte" | "$gt" | "$gte" => match CompareOp::from_key(op) {
                Some(cmp) => Clause::compare(field, cmp, operand.clone()),
                None => unrecognized(op),
            },
            "$in" | "$all" => match operand {
                Value::Array(values) if op == "$in" => Clause::is_in(field, values.clone()),
                Value::Array(values) => Clause::contains_all(field, values.clone()),
                _ => unrecognized(op),
            },
            "$nin" => match operand {
                Value::Array(values) => Clause::is_in(field, values.clone()).not(),
                _ => unrecognized(op),
            },
            "$exists" => match operand {
                Value::Bool(exists) => Clause::Exists {
                    field: field.to_string(),
                    exists: *exists,
                },
                _ => unrecognized(op),
            },
            "$regex" => match operand {
                Value::String(pattern) => {
                    let options = match ops.get("$options") {
                        Some(Value::String(flags)) => RegexOptions::parse(flags),
                        Some(_) => {
                            clauses.push(unrecognized("$options"));
                            continue;
                        }
                        None => RegexOptions::default(),
                    };
                    Clause::Regex {
                        field: field.to_string(),
                        pattern: pattern.clone(),
                        options,
                    }
                }
                _ => unrecognized(op),
            },
            "$options" if ops.contains_key("$regex") => continue,
            "$not" => match operand {
                Value::Object(inner) if is_operator_doc(inner) => {
                    parse_operators(field, inner).not()
                }
                _ => unrecognized(op),
            },
            _ => unrecognized(op),
        };
        clauses.push(clause);
    }
    collapse(clauses)
}
