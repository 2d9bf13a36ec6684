//! Composable queries.
//!
//! A [`Query`] is an immutable list of [`QueryOp`] nodes over a named
//! collection. Every chaining method returns a new query; nothing touches the
//! backend until the query is executed against a
//! [`Datalayer`](crate::datalayer::Datalayer).
//!
//! ```
//! use lyra::query::{Collection, filter::Filter};
//! use lyra::Document;
//!
//! let docs = Collection::new("documents");
//!
//! // Post-like: filter first, then rank the survivors by similarity.
//! let post = docs
//!     .find_where(Filter::all().eq("y", 1))
//!     .like(Document::new().add_field("x", vec![0.1f32, 0.2]), "my_index", 10);
//!
//! // Pre-like: take the 10 nearest neighbours, then filter them.
//! let pre = docs
//!     .like(Document::new().add_field("x", vec![0.1f32, 0.2]), "my_index", 10)
//!     .find_where(Filter::all().eq("y", 1));
//!
//! assert_ne!(post, pre);
//! ```
//!
//! # Module Structure
//!
//! - [`filter`] - Structured predicates
//! - [`cursor`] - Query results and lazily decoding cursors
//! - `executor` - The interpreter turning a query into backend calls

pub mod cursor;
pub(crate) mod executor;
pub mod filter;

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::data::{DataValue, Document};
use crate::datalayer::Datalayer;
use crate::error::Result;

use self::cursor::QueryResult;
use self::filter::Filter;

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    Ascending,
    Descending,
}

impl From<i32> for SortDirection {
    /// Negative values sort descending, everything else ascending.
    fn from(v: i32) -> Self {
        if v < 0 {
            SortDirection::Descending
        } else {
            SortDirection::Ascending
        }
    }
}

/// A field path and a direction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SortKey {
    pub path: String,
    pub direction: SortDirection,
}

impl SortKey {
    pub fn new(path: impl Into<String>, direction: impl Into<SortDirection>) -> Self {
        Self {
            path: path.into(),
            direction: direction.into(),
        }
    }

    /// Compare two documents on this key. Missing values sort as null.
    pub fn compare(&self, a: &Document, b: &Document) -> Ordering {
        let null = DataValue::Null;
        let left = a.get_path(&self.path).unwrap_or(&null);
        let right = b.get_path(&self.path).unwrap_or(&null);
        let ord = left.sort_cmp(right);
        match self.direction {
            SortDirection::Ascending => ord,
            SortDirection::Descending => ord.reverse(),
        }
    }
}

/// A similarity clause: rank or gate results by closeness to `example`.
#[derive(Debug, Clone, PartialEq)]
pub struct LikeClause {
    pub example: Document,
    pub vector_index: String,
    pub n: usize,
}

/// One operation node of a query.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryOp {
    Insert(Vec<Document>),
    Find(Filter),
    FindOne(Filter),
    Like(LikeClause),
    Sort(SortKey),
    Limit(usize),
    Distinct(String),
    Update { filter: Filter, set: Document },
    Delete(Filter),
}

impl QueryOp {
    pub(crate) fn name(&self) -> &'static str {
        match self {
            QueryOp::Insert(_) => "insert_many",
            QueryOp::Find(_) => "find",
            QueryOp::FindOne(_) => "find_one",
            QueryOp::Like(_) => "like",
            QueryOp::Sort(_) => "sort",
            QueryOp::Limit(_) => "limit",
            QueryOp::Distinct(_) => "distinct",
            QueryOp::Update { .. } => "update_many",
            QueryOp::Delete(_) => "delete_many",
        }
    }

    fn is_mutation(&self) -> bool {
        matches!(
            self,
            QueryOp::Insert(_) | QueryOp::Update { .. } | QueryOp::Delete(_)
        )
    }
}

/// An immutable description of operations against a collection.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    collection: String,
    ops: Vec<QueryOp>,
}

impl Query {
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            ops: Vec::new(),
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn ops(&self) -> &[QueryOp] {
        &self.ops
    }

    fn push(&self, op: QueryOp) -> Self {
        let mut next = self.clone();
        next.ops.push(op);
        next
    }

    /// Select every document.
    pub fn find(&self) -> Self {
        self.push(QueryOp::Find(Filter::all()))
    }

    /// Select documents matching `filter`.
    pub fn find_where(&self, filter: Filter) -> Self {
        self.push(QueryOp::Find(filter))
    }

    /// Select the first document.
    pub fn find_one(&self) -> Self {
        self.push(QueryOp::FindOne(Filter::all()))
    }

    /// Select the first document matching `filter`.
    pub fn find_one_where(&self, filter: Filter) -> Self {
        self.push(QueryOp::FindOne(filter))
    }

    /// Narrow the query's `find` stage, adding one if there is none.
    pub fn filter(&self, filter: Filter) -> Self {
        let mut next = self.clone();
        for op in next.ops.iter_mut() {
            if let QueryOp::Find(existing) | QueryOp::FindOne(existing) = op {
                *existing = std::mem::take(existing).and(filter);
                return next;
            }
        }
        next.ops.push(QueryOp::Find(filter));
        next
    }

    /// Rank or gate by similarity to `example` in `vector_index`, keeping at
    /// most `n` results.
    pub fn like(&self, example: Document, vector_index: impl Into<String>, n: usize) -> Self {
        self.push(QueryOp::Like(LikeClause {
            example,
            vector_index: vector_index.into(),
            n,
        }))
    }

    pub fn sort(&self, path: impl Into<String>, direction: impl Into<SortDirection>) -> Self {
        self.push(QueryOp::Sort(SortKey::new(path, direction)))
    }

    pub fn limit(&self, n: usize) -> Self {
        self.push(QueryOp::Limit(n))
    }

    pub fn distinct(&self, field: impl Into<String>) -> Self {
        self.push(QueryOp::Distinct(field.into()))
    }

    pub fn insert_many(&self, documents: Vec<Document>) -> Self {
        self.push(QueryOp::Insert(documents))
    }

    pub fn update_many(&self, filter: Filter, set: Document) -> Self {
        self.push(QueryOp::Update { filter, set })
    }

    pub fn delete_many(&self, filter: Filter) -> Self {
        self.push(QueryOp::Delete(filter))
    }

    /// The `like` clause, if any.
    pub fn like_clause(&self) -> Option<&LikeClause> {
        self.ops.iter().find_map(|op| match op {
            QueryOp::Like(clause) => Some(clause),
            _ => None,
        })
    }

    /// Whether the query writes to the collection.
    pub fn is_mutation(&self) -> bool {
        self.ops.iter().any(QueryOp::is_mutation)
    }

    /// The selection filter of a read query.
    pub fn select_filter(&self) -> Filter {
        self.ops
            .iter()
            .find_map(|op| match op {
                QueryOp::Find(filter) | QueryOp::FindOne(filter) => Some(filter.clone()),
                _ => None,
            })
            .unwrap_or_default()
    }

    /// Check that the query can be executed.
    pub fn validate(&self) -> Result<()> {
        executor::Plan::compile(self).map(|_| ())
    }

    /// Execute this query against `datalayer` with its default refresh mode.
    pub fn execute(&self, datalayer: &Datalayer) -> Result<QueryResult> {
        datalayer.execute(self)
    }
}

/// Entry point for building queries against a named collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Collection {
    name: String,
}

impl Collection {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn query(&self) -> Query {
        Query::new(self.name.clone())
    }

    pub fn find(&self) -> Query {
        self.query().find()
    }

    pub fn find_where(&self, filter: Filter) -> Query {
        self.query().find_where(filter)
    }

    pub fn find_one(&self) -> Query {
        self.query().find_one()
    }

    pub fn find_one_where(&self, filter: Filter) -> Query {
        self.query().find_one_where(filter)
    }

    pub fn like(&self, example: Document, vector_index: impl Into<String>, n: usize) -> Query {
        self.query().like(example, vector_index, n)
    }

    pub fn distinct(&self, field: impl Into<String>) -> Query {
        self.query().distinct(field)
    }

    pub fn insert_many(&self, documents: Vec<Document>) -> Query {
        self.query().insert_many(documents)
    }

    pub fn update_many(&self, filter: Filter, set: Document) -> Query {
        self.query().update_many(filter, set)
    }

    pub fn delete_many(&self, filter: Filter) -> Query {
        self.query().delete_many(filter)
    }
}
