//! Document identifier generation.
//!
//! Documents inserted without an `_id` receive a random UUID v4 rendered in
//! its hyphenated form.

use uuid::Uuid;

use crate::data::{DataValue, Document, ID_FIELD};

/// Generate a fresh document identifier.
pub fn new_document_id() -> String {
    Uuid::new_v4().to_string()
}

/// Return `doc` with an `_id`, assigning a new one if it has none.
pub fn ensure_id(mut doc: Document) -> Document {
    if doc.id().is_none() {
        doc.insert(ID_FIELD, DataValue::String(new_document_id()));
    }
    doc
}
