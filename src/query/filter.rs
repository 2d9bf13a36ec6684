//! Structured predicates over documents.

use serde::{Deserialize, Serialize};

use crate::data::{DataValue, Document, ID_FIELD};

/// A comparison applied to the value found at a field path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    Eq(DataValue),
    Ne(DataValue),
    Gt(DataValue),
    Gte(DataValue),
    Lt(DataValue),
    Lte(DataValue),
    In(Vec<DataValue>),
    Exists(bool),
}

impl Condition {
    fn matches(&self, value: Option<&DataValue>) -> bool {
        use std::cmp::Ordering::*;

        match (self, value) {
            (Condition::Exists(expected), v) => v.is_some() == *expected,
            (Condition::Ne(target), None) => !target.is_null(),
            (Condition::Eq(target), None) => target.is_null(),
            (_, None) => false,
            (Condition::Eq(target), Some(v)) => v.loose_eq(target),
            (Condition::Ne(target), Some(v)) => !v.loose_eq(target),
            (Condition::In(targets), Some(v)) => targets.iter().any(|t| v.loose_eq(t)),
            (Condition::Gt(target), Some(v)) => v.partial_compare(target) == Some(Greater),
            (Condition::Gte(target), Some(v)) => {
                matches!(v.partial_compare(target), Some(Greater | Equal))
            }
            (Condition::Lt(target), Some(v)) => v.partial_compare(target) == Some(Less),
            (Condition::Lte(target), Some(v)) => {
                matches!(v.partial_compare(target), Some(Less | Equal))
            }
        }
    }
}

/// One condition bound to a dot-separated field path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Clause {
    pub path: String,
    pub condition: Condition,
}

/// A conjunction of clauses. The empty filter matches every document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    #[serde(default)]
    clauses: Vec<Clause>,
}

impl Filter {
    /// The filter that matches every document.
    pub fn all() -> Self {
        Self::default()
    }

    /// Match documents whose identifier is one of `ids`.
    pub fn ids<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::all().is_in(
            ID_FIELD,
            ids.into_iter()
                .map(|id| DataValue::String(id.into()))
                .collect(),
        )
    }

    pub fn clause(mut self, path: impl Into<String>, condition: Condition) -> Self {
        self.clauses.push(Clause {
            path: path.into(),
            condition,
        });
        self
    }

    pub fn eq(self, path: impl Into<String>, value: impl Into<DataValue>) -> Self {
        self.clause(path, Condition::Eq(value.into()))
    }

    pub fn ne(self, path: impl Into<String>, value: impl Into<DataValue>) -> Self {
        self.clause(path, Condition::Ne(value.into()))
    }

    pub fn gt(self, path: impl Into<String>, value: impl Into<DataValue>) -> Self {
        self.clause(path, Condition::Gt(value.into()))
    }

    pub fn gte(self, path: impl Into<String>, value: impl Into<DataValue>) -> Self {
        self.clause(path, Condition::Gte(value.into()))
    }

    pub fn lt(self, path: impl Into<String>, value: impl Into<DataValue>) -> Self {
        self.clause(path, Condition::Lt(value.into()))
    }

    pub fn lte(self, path: impl Into<String>, value: impl Into<DataValue>) -> Self {
        self.clause(path, Condition::Lte(value.into()))
    }

    pub fn is_in(self, path: impl Into<String>, values: Vec<DataValue>) -> Self {
        self.clause(path, Condition::In(values))
    }

    pub fn exists(self, path: impl Into<String>, exists: bool) -> Self {
        self.clause(path, Condition::Exists(exists))
    }

    /// Conjunction of two filters.
    pub fn and(mut self, other: Filter) -> Self {
        self.clauses.extend(other.clauses);
        self
    }

    pub fn clauses(&self) -> &[Clause] {
        &self.clauses
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    pub fn matches(&self, doc: &Document) -> bool {
        self.clauses
            .iter()
            .all(|clause| clause.condition.matches(doc.get_path(&clause.path)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc() -> Document {
        Document::new_with_id("a")
            .add_field("y", 1)
            .add_field("score", 0.75)
            .add_field("meta", Document::new().add_field("fold", "valid"))
    }

    #[test]
    fn test_empty_filter_matches_everything() {
        assert!(Filter::all().matches(&doc()));
        assert!(Filter::all().matches(&Document::new()));
    }

    #[test]
    fn test_comparisons() {
        assert!(Filter::all().eq("y", 1.0).matches(&doc()));
        assert!(Filter::all().gt("score", 0.5).lte("score", 0.75).matches(&doc()));
        assert!(!Filter::all().lt("y", 1).matches(&doc()));
        assert!(Filter::all().ne("y", 0).matches(&doc()));
        assert!(!Filter::all().gt("missing", 0).matches(&doc()));
    }

    #[test]
    fn test_nested_path_and_exists() {
        assert!(Filter::all().eq("meta.fold", "valid").matches(&doc()));
        assert!(Filter::all().exists("meta.fold", true).matches(&doc()));
        assert!(Filter::all().exists("meta.other", false).matches(&doc()));
    }

    #[test]
    fn test_id_filter() {
        assert!(Filter::ids(["b", "a"]).matches(&doc()));
        assert!(!Filter::ids(["b"]).matches(&doc()));
        assert!(!Filter::ids(Vec::<String>::new()).matches(&doc()));
    }
}
