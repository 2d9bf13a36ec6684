//! In-process storage backend.
//!
//! Collections are kept as insertion-ordered vectors guarded by a
//! [`parking_lot::RwLock`], which makes insertion order the natural
//! tie-break for sorting and similarity ranking.

use std::collections::HashSet;

use ahash::AHashMap;
use parking_lot::RwLock;

use crate::data::{DataValue, Document, ID_FIELD};
use crate::error::{LyraError, Result};
use crate::query::filter::Filter;
use crate::storage::{Backend, FindRequest};

#[derive(Debug, Default)]
struct CollectionData {
    records: Vec<Document>,
    positions: AHashMap<String, usize>,
}

impl CollectionData {
    fn reindex(&mut self) {
        self.positions.clear();
        for (pos, record) in self.records.iter().enumerate() {
            if let Some(id) = record.id() {
                self.positions.insert(id.to_string(), pos);
            }
        }
    }
}

/// Thread-safe in-memory [`Backend`].
#[derive(Debug, Default)]
pub struct MemoryBackend {
    collections: RwLock<AHashMap<String, CollectionData>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Names of the collections holding at least one record.
    pub fn collection_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .collections
            .read()
            .iter()
            .filter(|(_, data)| !data.records.is_empty())
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }
}

impl Backend for MemoryBackend {
    fn insert_many(&self, collection: &str, records: Vec<Document>) -> Result<Vec<String>> {
        let mut guard = self.collections.write();
        let data = guard.entry(collection.to_string()).or_default();

        let mut seen = HashSet::with_capacity(records.len());
        for record in &records {
            let id = record
                .id()
                .ok_or_else(|| LyraError::backend("record is missing a string _id"))?;
            if data.positions.contains_key(id) || !seen.insert(id) {
                return Err(LyraError::backend(format!(
                    "duplicate key '{id}' in collection '{collection}'"
                )));
            }
        }

        let mut ids = Vec::with_capacity(records.len());
        for record in records {
            // Validated above.
            let id = record.id().unwrap_or_default().to_string();
            data.positions.insert(id.clone(), data.records.len());
            data.records.push(record);
            ids.push(id);
        }
        Ok(ids)
    }

    fn find(&self, collection: &str, request: &FindRequest) -> Result<Vec<Document>> {
        let guard = self.collections.read();
        let Some(data) = guard.get(collection) else {
            return Ok(Vec::new());
        };

        let mut matched: Vec<&Document> = data
            .records
            .iter()
            .filter(|record| request.filter.matches(record))
            .collect();

        if !request.sort.is_empty() {
            // `sort_by` is stable, so equal keys keep insertion order.
            matched.sort_by(|a, b| {
                for key in &request.sort {
                    let ord = key.compare(a, b);
                    if ord.is_ne() {
                        return ord;
                    }
                }
                std::cmp::Ordering::Equal
            });
        }

        let limit = request.limit.unwrap_or(usize::MAX);
        Ok(matched.into_iter().take(limit).cloned().collect())
    }

    fn distinct(&self, collection: &str, field: &str, filter: &Filter) -> Result<Vec<DataValue>> {
        let guard = self.collections.read();
        let Some(data) = guard.get(collection) else {
            return Ok(Vec::new());
        };

        let mut values: Vec<DataValue> = Vec::new();
        for record in data.records.iter().filter(|r| filter.matches(r)) {
            if let Some(value) = record.get_path(field)
                && !values.iter().any(|v| v.loose_eq(value))
            {
                values.push(value.clone());
            }
        }
        Ok(values)
    }

    fn set_field(&self, collection: &str, id: &str, path: &str, value: DataValue) -> Result<bool> {
        if path == ID_FIELD {
            return Err(LyraError::backend("the _id field is immutable"));
        }
        let mut guard = self.collections.write();
        let Some(data) = guard.get_mut(collection) else {
            return Ok(false);
        };
        let Some(&pos) = data.positions.get(id) else {
            return Ok(false);
        };
        data.records[pos].set_path(path, value);
        Ok(true)
    }

    fn update_many(
        &self,
        collection: &str,
        filter: &Filter,
        set: &Document,
    ) -> Result<Vec<String>> {
        if set.has_field(ID_FIELD) {
            return Err(LyraError::backend("the _id field is immutable"));
        }
        let mut guard = self.collections.write();
        let Some(data) = guard.get_mut(collection) else {
            return Ok(Vec::new());
        };

        let mut updated = Vec::new();
        for record in data.records.iter_mut().filter(|r| filter.matches(r)) {
            for (name, value) in set.iter() {
                record.set_path(name, value.clone());
            }
            if let Some(id) = record.id() {
                updated.push(id.to_string());
            }
        }
        Ok(updated)
    }

    fn delete_many(&self, collection: &str, filter: &Filter) -> Result<Vec<String>> {
        let mut guard = self.collections.write();
        let Some(data) = guard.get_mut(collection) else {
            return Ok(Vec::new());
        };

        let mut deleted = Vec::new();
        data.records.retain(|record| {
            if filter.matches(record) {
                if let Some(id) = record.id() {
                    deleted.push(id.to_string());
                }
                false
            } else {
                true
            }
        });
        if !deleted.is_empty() {
            data.reindex();
        }
        Ok(deleted)
    }

    fn count(&self, collection: &str, filter: &Filter) -> Result<usize> {
        let guard = self.collections.read();
        Ok(guard
            .get(collection)
            .map(|data| data.records.iter().filter(|r| filter.matches(r)).count())
            .unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{SortDirection, SortKey};

    fn seeded() -> MemoryBackend {
        let backend = MemoryBackend::new();
        let records = (0..6)
            .map(|i| {
                Document::new_with_id(format!("d{i}"))
                    .add_field("n", i % 3)
                    .add_field("i", i)
            })
            .collect();
        backend.insert_many("docs", records).unwrap();
        backend
    }

    #[test]
    fn test_duplicate_ids_are_rejected() {
        let backend = seeded();
        let err = backend
            .insert_many("docs", vec![Document::new_with_id("d1")])
            .unwrap_err();
        assert!(matches!(err, LyraError::Backend(_)));
        assert_eq!(backend.count("docs", &Filter::all()).unwrap(), 6);
    }

    #[test]
    fn test_sort_is_stable_and_applied_before_limit() {
        let backend = seeded();
        let request = FindRequest::new(Filter::all())
            .sort(vec![SortKey::new("n", SortDirection::Descending)])
            .limit(Some(3));
        let ids: Vec<String> = backend
            .find("docs", &request)
            .unwrap()
            .iter()
            .map(|d| d.id().unwrap().to_string())
            .collect();
        assert_eq!(ids, vec!["d2", "d5", "d1"]);
    }

    #[test]
    fn test_distinct_preserves_first_seen_order() {
        let backend = seeded();
        let values = backend.distinct("docs", "n", &Filter::all()).unwrap();
        assert_eq!(
            values,
            vec![DataValue::Int64(0), DataValue::Int64(1), DataValue::Int64(2)]
        );
    }

    #[test]
    fn test_set_field_update_and_delete() {
        let backend = seeded();
        assert!(
            backend
                .set_field("docs", "d0", "_outputs.x.m", DataValue::Int64(7))
                .unwrap()
        );
        assert!(!backend.set_field("docs", "nope", "a", DataValue::Null).unwrap());

        let updated = backend
            .update_many("docs", &Filter::all().eq("n", 0), &Document::new().add_field("flag", true))
            .unwrap();
        assert_eq!(updated, vec!["d0", "d3"]);

        let deleted = backend.delete_many("docs", &Filter::all().eq("flag", true)).unwrap();
        assert_eq!(deleted, vec!["d0", "d3"]);
        assert!(backend.set_field("docs", "d4", "a", DataValue::Int64(1)).unwrap());
        assert_eq!(backend.count("docs", &Filter::all()).unwrap(), 4);
    }
}
