//! Queries over collections of cached documents.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::clause::Clause;
use crate::eval::{resolve_path, sort_order, Filter};

/// Anything a [`Query`] can be run over.
pub trait Document {
    /// The JSON body the filter is evaluated against.
    fn body(&self) -> &Value;

    /// Tombstoned documents are skipped unless the query asks for them.
    fn is_deleted(&self) -> bool {
        false
    }
}

impl Document for Value {
    fn body(&self) -> &Value {
        self
    }
}

/// One sort criterion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortKey {
    pub field: String,
    #[serde(default)]
    pub descending: bool,
}

/// A filter plus result shaping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    #[serde(default = "Clause::match_all")]
    pub filter: Clause,
    #[serde(default)]
    pub include_deleted: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sort: Vec<SortKey>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

impl Default for Query {
    fn default() -> Self {
        Self::all()
    }
}

impl From<Clause> for Query {
    fn from(filter: Clause) -> Self {
        Self::new(filter)
    }
}

impl Query {
    pub fn new(filter: Clause) -> Self {
        Self {
            filter,
            include_deleted: false,
            sort: Vec::new(),
            limit: None,
        }
    }

    /// Every live document.
    pub fn all() -> Self {
        Self::new(Clause::MatchAll)
    }

    /// Parse a bare MongoDB-style filter document.
    pub fn from_filter_json(filter: &Value) -> Self {
        Self::new(Clause::from_json(filter))
    }

    /// Include soft-deleted documents in the result.
    pub fn with_deleted(mut self) -> Self {
        self.include_deleted = true;
        self
    }

    pub fn sort_asc(mut self, field: impl Into<String>) -> Self {
        self.sort.push(SortKey {
            field: field.into(),
            descending: false,
        });
        self
    }

    pub fn sort_desc(mut self, field: impl Into<String>) -> Self {
        self.sort.push(SortKey {
            field: field.into(),
            descending: true,
        });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Compile the filter part of this query.
    pub fn compile(&self) -> Filter {
        Filter::compile(&self.filter)
    }

    /// Filter, sort and truncate `documents`.
    ///
    /// Without sort keys the input order is kept. Sorting is stable.
    pub fn run<D, I>(&self, documents: I) -> Vec<D>
    where
        D: Document,
        I: IntoIterator<Item = D>,
    {
        let filter = self.compile();
        let mut selected: Vec<D> = documents
            .into_iter()
            .filter(|doc| self.include_deleted || !doc.is_deleted())
            .filter(|doc| filter.matches(doc.body()))
            .collect();

        if !self.sort.is_empty() {
            selected.sort_by(|a, b| {
                self.sort
                    .iter()
                    .map(|key| {
                        let ordering = sort_order(
                            resolve_path(a.body(), &key.field),
                            resolve_path(b.body(), &key.field),
                        );
                        if key.descending {
                            ordering.reverse()
                        } else {
                            ordering
                        }
                    })
                    .find(|o| o.is_ne())
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
        }

        if let Some(limit) = self.limit {
            selected.truncate(limit);
        }
        selected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Row {
        body: Value,
        deleted: bool,
    }

    impl Document for Row {
        fn body(&self) -> &Value {
            &self.body
        }
        fn is_deleted(&self) -> bool {
            self.deleted
        }
    }

    fn rows() -> Vec<Row> {
        vec![
            Row {
                body: json!({"n": 3, "name": "c"}),
                deleted: false,
            },
            Row {
                body: json!({"n": 1, "name": "a"}),
                deleted: true,
            },
            Row {
                body: json!({"n": 2, "name": "b"}),
                deleted: false,
            },
        ]
    }

    #[test]
    fn test_tombstones_skipped_by_default() {
        let result = Query::all().run(rows());
        assert_eq!(result.len(), 2);

        let result = Query::all().with_deleted().run(rows());
        assert_eq!(result.len(), 3);
    }

    #[test]
    fn test_sort_and_limit() {
        let result = Query::all().with_deleted().sort_asc("n").limit(2).run(rows());
        let names: Vec<_> = result.iter().map(|r| r.body["name"].clone()).collect();
        assert_eq!(names, vec![json!("a"), json!("b")]);

        let result = Query::all().sort_desc("n").run(rows());
        assert_eq!(result[0].body["n"], json!(3));
    }

    #[test]
    fn test_missing_sort_field_first() {
        let docs = vec![json!({"n": 1}), json!({})];
        let result = Query::all().sort_asc("n").run(docs);
        assert_eq!(result[0], json!({}));
    }

    #[test]
    fn test_from_json() {
        let query: Query = serde_json::from_value(json!({
            "filter": {"n": {"$gte": 2}},
            "sort": [{"field": "n", "descending": true}],
            "limit": 1
        }))
        .unwrap();
        let result = query.run(rows());
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].body["n"], json!(3));
    }

    #[test]
    fn test_empty_query_json_is_all() {
        let query: Query = serde_json::from_value(json!({})).unwrap();
        assert_eq!(query, Query::all());
    }
}
