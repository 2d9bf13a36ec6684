//! Storage backend contract.
//!
//! The query layer never touches persistence directly; it drives a
//! [`Backend`] through a handful of collection-level primitives. Records
//! exchanged with the backend are documents in their storable form (every
//! encoded payload carries bytes, no decoded caches).
//!
//! # Module Structure
//!
//! - [`memory`] - Thread-safe in-process backend

pub mod memory;

use std::fmt::Debug;

use crate::data::{DataValue, Document};
use crate::error::Result;
use crate::query::SortKey;
use crate::query::filter::Filter;

pub use self::memory::MemoryBackend;

/// Parameters of a backend `find` call.
///
/// Sorting always happens before the limit is applied. Documents that compare
/// equal keep their insertion order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindRequest {
    pub filter: Filter,
    pub sort: Vec<SortKey>,
    pub limit: Option<usize>,
}

impl FindRequest {
    pub fn new(filter: Filter) -> Self {
        Self {
            filter,
            ..Default::default()
        }
    }

    pub fn sort(mut self, sort: Vec<SortKey>) -> Self {
        self.sort = sort;
        self
    }

    pub fn limit(mut self, limit: Option<usize>) -> Self {
        self.limit = limit;
        self
    }
}

/// A document storage engine organised in named collections.
///
/// Implementations must be safe to call from many threads. Failures are
/// reported as [`crate::error::LyraError::Backend`] and are surfaced to
/// callers unmodified.
pub trait Backend: Send + Sync + Debug {
    /// Insert records, each carrying an `_id`, returning their identifiers in
    /// input order.
    fn insert_many(&self, collection: &str, records: Vec<Document>) -> Result<Vec<String>>;

    /// Return records matching the request.
    fn find(&self, collection: &str, request: &FindRequest) -> Result<Vec<Document>>;

    /// Distinct values of `field` among records matching `filter`, in
    /// first-seen order.
    fn distinct(&self, collection: &str, field: &str, filter: &Filter) -> Result<Vec<DataValue>>;

    /// Set the value at `path` on the record `id`. Returns `false` if the
    /// record does not exist.
    fn set_field(&self, collection: &str, id: &str, path: &str, value: DataValue) -> Result<bool>;

    /// Set every top-level field of `set` on records matching `filter`,
    /// returning the identifiers of updated records.
    fn update_many(&self, collection: &str, filter: &Filter, set: &Document)
    -> Result<Vec<String>>;

    /// Delete records matching `filter`, returning their identifiers.
    fn delete_many(&self, collection: &str, filter: &Filter) -> Result<Vec<String>>;

    /// Number of records matching `filter`.
    fn count(&self, collection: &str, filter: &Filter) -> Result<usize> {
        Ok(self.find(collection, &FindRequest::new(filter.clone()))?.len())
    }
}
