//! Vector indexes.
//!
//! A [`VectorIndex`] names the listener whose outputs populate it (the
//! indexing listener) and the listener used to encode query-time examples
//! (the compatible listener, which defaults to the indexing one). The
//! [`Datalayer`](crate::datalayer::Datalayer) owns one [`VectorTable`] per
//! registered index and keeps it in step with listener write-back.
//!
//! Similarity is always cosine.
//!
//! # Module Structure
//!
//! - [`similarity`] - Vector normalisation
//! - [`table`] - The in-memory identifier to vector map

pub mod similarity;
pub mod table;

use serde::{Deserialize, Serialize};

pub use self::table::VectorTable;

/// Definition of a searchable vector index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VectorIndex {
    identifier: String,
    indexing_listener: String,
    #[serde(default)]
    compatible_listener: Option<String>,
}

impl VectorIndex {
    /// Create an index populated by the listener `indexing_listener`
    /// (a `"{model}/{key}"` identifier).
    pub fn new(identifier: impl Into<String>, indexing_listener: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            indexing_listener: indexing_listener.into(),
            compatible_listener: None,
        }
    }

    /// Encode query-time examples with `listener` instead of the indexing
    /// listener.
    pub fn with_compatible(mut self, listener: impl Into<String>) -> Self {
        self.compatible_listener = Some(listener.into());
        self
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn indexing_listener(&self) -> &str {
        &self.indexing_listener
    }

    /// The listener applied to query-time examples.
    pub fn compatible_listener(&self) -> &str {
        self.compatible_listener
            .as_deref()
            .unwrap_or(&self.indexing_listener)
    }

    /// Every listener this index depends on.
    pub fn listeners(&self) -> Vec<&str> {
        let mut listeners = vec![self.indexing_listener.as_str()];
        if let Some(compatible) = &self.compatible_listener
            && compatible != &self.indexing_listener
        {
            listeners.push(compatible);
        }
        listeners
    }
}

/// One search result: a document identifier and its similarity score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarityHit {
    pub id: String,
    pub score: f32,
}
