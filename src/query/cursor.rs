//! Query results.
//!
//! Read queries return a [`Cursor`] over stored records. Records are decoded
//! through the encoder registry only when iterated, so a cursor sees the
//! registry as it is at read time and can be iterated any number of times.

use std::collections::HashMap;
use std::slice;
use std::sync::Arc;

use crate::data::{DataValue, Document};
use crate::datalayer::RefreshHandle;
use crate::encoding::EncoderRegistry;
use crate::error::{LyraError, Result};
use crate::listener::RunReport;

/// Restartable cursor over the records of a read query.
#[derive(Debug, Clone)]
pub struct Cursor {
    records: Vec<Document>,
    ranked: Vec<String>,
    scores: Option<HashMap<String, f32>>,
    encoders: Arc<EncoderRegistry>,
}

impl Cursor {
    pub(crate) fn new(records: Vec<Document>, encoders: Arc<EncoderRegistry>) -> Self {
        Self {
            records,
            ranked: Vec::new(),
            scores: None,
            encoders,
        }
    }

    /// Attach similarity scores, `ranked` being best first.
    pub(crate) fn with_scores(mut self, ranked: Vec<(String, f32)>) -> Self {
        let mut scores = HashMap::with_capacity(ranked.len());
        let mut ids = Vec::with_capacity(ranked.len());
        for (id, score) in ranked {
            scores.insert(id.clone(), score);
            ids.push(id);
        }
        self.ranked = ids;
        self.scores = Some(scores);
        self
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Identifiers of the result records, in result order.
    pub fn ids(&self) -> Vec<&str> {
        self.records.iter().filter_map(Document::id).collect()
    }

    /// Identifier to similarity score, when the query had a `like` stage.
    pub fn scores(&self) -> Option<&HashMap<String, f32>> {
        self.scores.as_ref()
    }

    pub fn score(&self, id: &str) -> Option<f32> {
        self.scores.as_ref()?.get(id).copied()
    }

    /// Identifiers in similarity order, best first. Empty without `like`.
    pub fn ranked_ids(&self) -> &[String] {
        &self.ranked
    }

    /// Iterate over decoded documents.
    pub fn iter(&self) -> CursorIter<'_> {
        CursorIter {
            records: self.records.iter(),
            encoders: &self.encoders,
        }
    }

    /// Decode every record.
    pub fn collect_documents(&self) -> Result<Vec<Document>> {
        self.iter().collect()
    }

    /// Records in their stored form.
    pub fn raw(&self) -> &[Document] {
        &self.records
    }
}

impl<'a> IntoIterator for &'a Cursor {
    type Item = Result<Document>;
    type IntoIter = CursorIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Iterator decoding one record per step.
pub struct CursorIter<'a> {
    records: slice::Iter<'a, Document>,
    encoders: &'a EncoderRegistry,
}

impl Iterator for CursorIter<'_> {
    type Item = Result<Document>;

    fn next(&mut self) -> Option<Self::Item> {
        let record = self.records.next()?;
        Some(self.encoders.decode_document(record))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.records.size_hint()
    }
}

impl ExactSizeIterator for CursorIter<'_> {}

/// State of the listener refresh triggered by a write.
#[derive(Debug)]
pub enum RefreshStatus {
    /// Listeners ran before the write returned.
    Completed(Vec<RunReport>),
    /// Refresh was suppressed.
    Skipped,
    /// Listeners are running in the background.
    Pending(RefreshHandle),
}

/// Result of an insert or update.
#[derive(Debug)]
pub struct WriteOutcome {
    pub ids: Vec<String>,
    pub refresh: RefreshStatus,
}

impl WriteOutcome {
    /// Reports of a completed refresh. Empty if skipped or still pending.
    pub fn reports(&self) -> &[RunReport] {
        match &self.refresh {
            RefreshStatus::Completed(reports) => reports.as_slice(),
            _ => &[],
        }
    }

    /// Wait for the refresh to finish and return its reports.
    pub fn wait(self) -> Result<Vec<RunReport>> {
        match self.refresh {
            RefreshStatus::Completed(reports) => Ok(reports),
            RefreshStatus::Skipped => Ok(Vec::new()),
            RefreshStatus::Pending(handle) => handle.wait(),
        }
    }
}

/// Outcome of executing a query.
#[derive(Debug)]
pub enum QueryResult {
    Inserted(WriteOutcome),
    Updated(WriteOutcome),
    Deleted(Vec<String>),
    Cursor(Cursor),
    One(Option<Document>),
    Distinct(Vec<DataValue>),
}

impl QueryResult {
    fn kind(&self) -> &'static str {
        match self {
            QueryResult::Inserted(_) => "insert",
            QueryResult::Updated(_) => "update",
            QueryResult::Deleted(_) => "delete",
            QueryResult::Cursor(_) => "cursor",
            QueryResult::One(_) => "find_one",
            QueryResult::Distinct(_) => "distinct",
        }
    }

    fn mismatch(&self, expected: &str) -> LyraError {
        LyraError::invalid_query(format!(
            "expected a {expected} result, got a {} result",
            self.kind()
        ))
    }

    pub fn into_cursor(self) -> Result<Cursor> {
        match self {
            QueryResult::Cursor(cursor) => Ok(cursor),
            other => Err(other.mismatch("cursor")),
        }
    }

    pub fn into_one(self) -> Result<Option<Document>> {
        match self {
            QueryResult::One(doc) => Ok(doc),
            other => Err(other.mismatch("find_one")),
        }
    }

    pub fn into_distinct(self) -> Result<Vec<DataValue>> {
        match self {
            QueryResult::Distinct(values) => Ok(values),
            other => Err(other.mismatch("distinct")),
        }
    }

    /// Outcome of an insert or update.
    pub fn into_write(self) -> Result<WriteOutcome> {
        match self {
            QueryResult::Inserted(outcome) | QueryResult::Updated(outcome) => Ok(outcome),
            other => Err(other.mismatch("write")),
        }
    }

    pub fn into_deleted(self) -> Result<Vec<String>> {
        match self {
            QueryResult::Deleted(ids) => Ok(ids),
            other => Err(other.mismatch("delete")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::EncodedPayload;
    use crate::encoding::VectorEncoder;
    use crate::encoding::Encoder;
    use crate::error::ErrorKind;

    #[test]
    fn test_cursor_decodes_lazily_and_restarts() {
        let encoders = Arc::new(EncoderRegistry::new());
        let encoder = VectorEncoder::new(2);
        let bytes = encoder.encode(&DataValue::Vector(vec![1.0, 2.0])).unwrap();
        let stored = Document::new_with_id("a")
            .add_field("x", EncodedPayload::from_bytes("f32[2]", bytes));
        let cursor = Cursor::new(vec![stored], encoders.clone());

        // The encoder is registered after the cursor was built.
        assert!(cursor.collect_documents().is_err());
        encoders.register(Arc::new(encoder)).unwrap();

        let first: Vec<Document> = cursor.collect_documents().unwrap();
        let second: Vec<Document> = cursor.iter().collect::<Result<_>>().unwrap();
        assert_eq!(first, second);
        assert_eq!(
            first[0].get("x").unwrap().to_vector(),
            Some(vec![1.0, 2.0])
        );
    }

    #[test]
    fn test_scores_and_ranked_ids() {
        let cursor = Cursor::new(
            vec![Document::new_with_id("b"), Document::new_with_id("a")],
            Arc::new(EncoderRegistry::new()),
        )
        .with_scores(vec![("b".to_string(), 0.9), ("a".to_string(), 0.5)]);

        assert_eq!(cursor.ids(), vec!["b", "a"]);
        assert_eq!(cursor.ranked_ids(), ["b", "a"]);
        assert_eq!(cursor.score("a"), Some(0.5));
        assert_eq!(cursor.score("zzz"), None);
    }

    #[test]
    fn test_result_accessor_mismatch() {
        let result = QueryResult::Deleted(vec!["a".into()]);
        let err = result.into_cursor().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidQuery);
    }
}
