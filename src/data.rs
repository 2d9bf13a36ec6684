use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

/// Reserved field holding the document identifier.
pub const ID_FIELD: &str = "_id";

/// The value type for fields in a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DataValue {
    Null,
    Bool(bool),
    Int64(i64),
    Float64(f64),
    String(String),

    /// Raw binary content.
    Bytes(Vec<u8>),

    /// Dense float vector.
    Vector(Vec<f32>),

    /// Heterogeneous list of values.
    List(Vec<DataValue>),

    /// Date and time in UTC.
    DateTime(chrono::DateTime<chrono::Utc>),

    /// Nested document.
    Document(Document),

    /// A non-native value stored through a named encoder.
    Encoded(EncodedPayload),
}

impl DataValue {
    /// Wrap `value` so that it is stored through the encoder named `encoder`.
    pub fn encoded(encoder: impl Into<String>, value: impl Into<DataValue>) -> Self {
        DataValue::Encoded(EncodedPayload::new(encoder, value.into()))
    }

    /// Look through an encoded payload at its decoded value, if cached.
    pub fn resolved(&self) -> &DataValue {
        match self {
            DataValue::Encoded(payload) => payload.decoded().unwrap_or(self),
            other => other,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, DataValue::Null)
    }

    /// Returns the string value if this is a String variant.
    pub fn as_str(&self) -> Option<&str> {
        match self.resolved() {
            DataValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the integer value if this is an Int64 variant.
    pub fn as_integer(&self) -> Option<i64> {
        match self.resolved() {
            DataValue::Int64(i) => Some(*i),
            _ => None,
        }
    }

    /// Returns the value as a float for any numeric variant.
    pub fn as_float(&self) -> Option<f64> {
        match self.resolved() {
            DataValue::Float64(f) => Some(*f),
            DataValue::Int64(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_boolean(&self) -> Option<bool> {
        match self.resolved() {
            DataValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_document(&self) -> Option<&Document> {
        match self.resolved() {
            DataValue::Document(doc) => Some(doc),
            _ => None,
        }
    }

    pub fn as_bytes_ref(&self) -> Option<&[u8]> {
        match self.resolved() {
            DataValue::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Interpret the value as a dense vector.
    ///
    /// Accepts `Vector` directly and numeric `List`s, looking through
    /// decoded encoded payloads.
    pub fn to_vector(&self) -> Option<Vec<f32>> {
        match self.resolved() {
            DataValue::Vector(v) => Some(v.clone()),
            DataValue::List(items) => items
                .iter()
                .map(|item| item.as_float().map(|f| f as f32))
                .collect(),
            _ => None,
        }
    }

    /// Equality used by filters: numbers compare across integer and float,
    /// encoded payloads compare by their decoded value.
    pub fn loose_eq(&self, other: &DataValue) -> bool {
        match (self.resolved(), other.resolved()) {
            (DataValue::Int64(a), DataValue::Float64(b))
            | (DataValue::Float64(b), DataValue::Int64(a)) => (*a as f64) == *b,
            (a, b) => a == b,
        }
    }

    /// Partial ordering between comparable values of the same family.
    pub fn partial_compare(&self, other: &DataValue) -> Option<Ordering> {
        match (self.resolved(), other.resolved()) {
            (DataValue::String(a), DataValue::String(b)) => Some(a.cmp(b)),
            (DataValue::Bool(a), DataValue::Bool(b)) => Some(a.cmp(b)),
            (DataValue::DateTime(a), DataValue::DateTime(b)) => Some(a.cmp(b)),
            (DataValue::Int64(a), DataValue::Int64(b)) => Some(a.cmp(b)),
            (a, b) => match (a.as_float(), b.as_float()) {
                (Some(x), Some(y)) => x.partial_cmp(&y),
                _ => None,
            },
        }
    }

    /// Total ordering used for sorting: values of different families order
    /// by family rank (null < numbers < strings < bools < datetimes < rest).
    /// NaN sorts below every other number.
    pub fn sort_cmp(&self, other: &DataValue) -> Ordering {
        match (self.resolved(), other.resolved()) {
            (DataValue::Float64(x), DataValue::Float64(y)) => float_sort_cmp(*x, *y),
            (DataValue::Int64(a), DataValue::Float64(y)) => float_sort_cmp(*a as f64, *y),
            (DataValue::Float64(x), DataValue::Int64(b)) => float_sort_cmp(*x, *b as f64),
            _ => self
                .partial_compare(other)
                .unwrap_or_else(|| self.sort_rank().cmp(&other.sort_rank())),
        }
    }

    fn sort_rank(&self) -> u8 {
        match self.resolved() {
            DataValue::Null => 0,
            DataValue::Int64(_) | DataValue::Float64(_) => 1,
            DataValue::String(_) => 2,
            DataValue::Bool(_) => 3,
            DataValue::DateTime(_) => 4,
            DataValue::Bytes(_) => 5,
            DataValue::Vector(_) => 6,
            DataValue::List(_) => 7,
            DataValue::Document(_) => 8,
            DataValue::Encoded(_) => 9,
        }
    }
}

fn float_sort_cmp(x: f64, y: f64) -> Ordering {
    match (x.is_nan(), y.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        // -0.0 and 0.0 tie.
        (false, false) => (x + 0.0).total_cmp(&(y + 0.0)),
    }
}

// --- Conversions ---

impl From<String> for DataValue {
    fn from(v: String) -> Self {
        DataValue::String(v)
    }
}

impl From<&str> for DataValue {
    fn from(v: &str) -> Self {
        DataValue::String(v.to_string())
    }
}

impl From<i64> for DataValue {
    fn from(v: i64) -> Self {
        DataValue::Int64(v)
    }
}

impl From<i32> for DataValue {
    fn from(v: i32) -> Self {
        DataValue::Int64(v as i64)
    }
}

impl From<f64> for DataValue {
    fn from(v: f64) -> Self {
        DataValue::Float64(v)
    }
}

impl From<bool> for DataValue {
    fn from(v: bool) -> Self {
        DataValue::Bool(v)
    }
}

impl From<chrono::DateTime<chrono::Utc>> for DataValue {
    fn from(dt: chrono::DateTime<chrono::Utc>) -> Self {
        DataValue::DateTime(dt)
    }
}

impl From<Vec<f32>> for DataValue {
    fn from(v: Vec<f32>) -> Self {
        DataValue::Vector(v)
    }
}

impl From<Vec<u8>> for DataValue {
    fn from(v: Vec<u8>) -> Self {
        DataValue::Bytes(v)
    }
}

impl From<Document> for DataValue {
    fn from(doc: Document) -> Self {
        DataValue::Document(doc)
    }
}

impl From<EncodedPayload> for DataValue {
    fn from(payload: EncodedPayload) -> Self {
        DataValue::Encoded(payload)
    }
}

/// A value stored through a named encoder.
///
/// A payload built by the caller holds only the native value; the executor
/// fills in `bytes` before writing. A payload read back from storage holds the
/// bytes and, once decoded, a cache of the native value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncodedPayload {
    encoder: String,
    #[serde(default)]
    bytes: Option<Vec<u8>>,
    #[serde(skip)]
    decoded: Option<Box<DataValue>>,
}

impl EncodedPayload {
    pub fn new(encoder: impl Into<String>, value: DataValue) -> Self {
        Self {
            encoder: encoder.into(),
            bytes: None,
            decoded: Some(Box::new(value)),
        }
    }

    pub fn from_bytes(encoder: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            encoder: encoder.into(),
            bytes: Some(bytes),
            decoded: None,
        }
    }

    pub fn encoder(&self) -> &str {
        &self.encoder
    }

    pub fn bytes(&self) -> Option<&[u8]> {
        self.bytes.as_deref()
    }

    pub fn decoded(&self) -> Option<&DataValue> {
        self.decoded.as_deref()
    }

    pub(crate) fn with_bytes(mut self, bytes: Vec<u8>) -> Self {
        self.bytes = Some(bytes);
        self
    }

    pub(crate) fn with_decoded(mut self, value: DataValue) -> Self {
        self.decoded = Some(Box::new(value));
        self
    }

    /// Drop the decoded cache, leaving only the storable form.
    pub(crate) fn into_stored(mut self) -> Self {
        self.decoded = None;
        self
    }
}

impl PartialEq for EncodedPayload {
    fn eq(&self, other: &Self) -> bool {
        if self.encoder != other.encoder {
            return false;
        }
        match (&self.decoded, &other.decoded) {
            (Some(a), Some(b)) => a == b,
            _ => self.bytes.is_some() && self.bytes == other.bytes,
        }
    }
}

/// A document is an insertion-ordered collection of named fields.
///
/// Nested fields are addressed with dot-separated paths such as
/// `"_outputs.x.linear_a"`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Document {
    fields: Vec<(String, DataValue)>,
}

impl Document {
    /// Create a new empty document.
    pub fn new() -> Self {
        Self { fields: Vec::new() }
    }

    /// Create a new document with a specific ID.
    pub fn new_with_id(id: impl Into<String>) -> Self {
        Self::new().add_field(ID_FIELD, DataValue::String(id.into()))
    }

    /// Add a field to the document, replacing any existing value.
    pub fn add_field(mut self, name: impl Into<String>, value: impl Into<DataValue>) -> Self {
        self.insert(name, value);
        self
    }

    /// Set a top-level field, returning the previous value.
    pub fn insert(
        &mut self,
        name: impl Into<String>,
        value: impl Into<DataValue>,
    ) -> Option<DataValue> {
        let name = name.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(k, _)| *k == name) {
            Some((_, slot)) => Some(std::mem::replace(slot, value)),
            None => {
                self.fields.push((name, value));
                None
            }
        }
    }

    /// Remove a top-level field.
    pub fn remove(&mut self, name: &str) -> Option<DataValue> {
        let pos = self.fields.iter().position(|(k, _)| k == name)?;
        Some(self.fields.remove(pos).1)
    }

    /// Get a reference to a top-level field's value.
    pub fn get(&self, name: &str) -> Option<&DataValue> {
        self.fields.iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }

    /// Resolve a dot-separated path through nested documents.
    pub fn get_path(&self, path: &str) -> Option<&DataValue> {
        let mut parts = path.split('.');
        let mut current = self.get(parts.next()?)?;
        for part in parts {
            current = current.as_document()?.get(part)?;
        }
        Some(current)
    }

    /// Set a value at a dot-separated path, creating intermediate documents.
    ///
    /// Intermediate values that are not documents are replaced.
    pub fn set_path(&mut self, path: &str, value: DataValue) {
        match path.split_once('.') {
            None => {
                self.insert(path, value);
            }
            Some((head, rest)) => {
                let mut child = match self.remove_in_place(head) {
                    Some((pos, DataValue::Document(doc))) => (pos, doc),
                    Some((pos, _)) => (pos, Document::new()),
                    None => (self.fields.len(), Document::new()),
                };
                child.1.set_path(rest, value);
                self.fields
                    .insert(child.0, (head.to_string(), DataValue::Document(child.1)));
            }
        }
    }

    fn remove_in_place(&mut self, name: &str) -> Option<(usize, DataValue)> {
        let pos = self.fields.iter().position(|(k, _)| k == name)?;
        Some((pos, self.fields.remove(pos).1))
    }

    /// The document identifier, if assigned.
    pub fn id(&self) -> Option<&str> {
        self.get(ID_FIELD).and_then(|v| v.as_str())
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Get all field names in insertion order.
    pub fn field_names(&self) -> Vec<&str> {
        self.fields.iter().map(|(k, _)| k.as_str()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &DataValue)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Apply `f` to every value, recursing into nested documents and lists.
    pub(crate) fn try_map_values<F>(&self, f: &mut F) -> crate::error::Result<Document>
    where
        F: FnMut(&DataValue) -> crate::error::Result<Option<DataValue>>,
    {
        let mut fields = Vec::with_capacity(self.fields.len());
        for (name, value) in &self.fields {
            fields.push((name.clone(), map_value(value, f)?));
        }
        Ok(Document { fields })
    }
}

fn map_value<F>(value: &DataValue, f: &mut F) -> crate::error::Result<DataValue>
where
    F: FnMut(&DataValue) -> crate::error::Result<Option<DataValue>>,
{
    if let Some(mapped) = f(value)? {
        return Ok(mapped);
    }
    Ok(match value {
        DataValue::Document(doc) => DataValue::Document(doc.try_map_values(f)?),
        DataValue::List(items) => DataValue::List(
            items
                .iter()
                .map(|item| map_value(item, f))
                .collect::<crate::error::Result<_>>()?,
        ),
        other => other.clone(),
    })
}

impl<K: Into<String>, V: Into<DataValue>> FromIterator<(K, V)> for Document {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut doc = Document::new();
        for (k, v) in iter {
            doc.insert(k, v);
        }
        doc
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fields_keep_insertion_order() {
        let doc = Document::new()
            .add_field("b", 1)
            .add_field("a", 2)
            .add_field("b", 3);
        assert_eq!(doc.field_names(), vec!["b", "a"]);
        assert_eq!(doc.get("b"), Some(&DataValue::Int64(3)));
    }

    #[test]
    fn test_set_and_get_path() {
        let mut doc = Document::new_with_id("d1");
        doc.set_path("_outputs.x.linear_a", DataValue::Vector(vec![1.0, 2.0]));
        doc.set_path("_outputs.z.linear_a", DataValue::Vector(vec![3.0]));

        assert_eq!(
            doc.get_path("_outputs.x.linear_a"),
            Some(&DataValue::Vector(vec![1.0, 2.0]))
        );
        assert_eq!(doc.get_path("_outputs.z.linear_a").unwrap().to_vector(), Some(vec![3.0]));
        assert!(doc.get_path("_outputs.y").is_none());
        assert_eq!(doc.field_names(), vec!["_id", "_outputs"]);
    }

    #[test]
    fn test_loose_eq_across_numeric_types() {
        assert!(DataValue::Int64(1).loose_eq(&DataValue::Float64(1.0)));
        assert!(!DataValue::Int64(1).loose_eq(&DataValue::String("1".into())));
    }

    #[test]
    fn test_sort_cmp_orders_families() {
        let mut values = vec![
            DataValue::String("a".into()),
            DataValue::Int64(3),
            DataValue::Null,
            DataValue::Float64(1.5),
        ];
        values.sort_by(|a, b| a.sort_cmp(b));
        assert_eq!(
            values,
            vec![
                DataValue::Null,
                DataValue::Float64(1.5),
                DataValue::Int64(3),
                DataValue::String("a".into()),
            ]
        );
    }

    #[test]
    fn test_sort_cmp_is_total_with_nan() {
        let mut values = vec![
            DataValue::Float64(2.5),
            DataValue::Float64(f64::NAN),
            DataValue::Int64(1),
            DataValue::Float64(-0.0),
            DataValue::Float64(f64::NAN),
            DataValue::Int64(0),
            DataValue::Float64(-3.0),
        ];
        values.sort_by(|a, b| a.sort_cmp(b));

        assert!(values[0].as_float().unwrap().is_nan());
        assert!(values[1].as_float().unwrap().is_nan());
        let rest: Vec<f64> = values[2..].iter().map(|v| v.as_float().unwrap()).collect();
        assert_eq!(rest, vec![-3.0, -0.0, 0.0, 1.0, 2.5]);

        let nan = DataValue::Float64(f64::NAN);
        assert_eq!(nan.sort_cmp(&nan), Ordering::Equal);
        assert_eq!(nan.sort_cmp(&DataValue::Int64(i64::MIN)), Ordering::Less);
        assert_eq!(
            DataValue::Int64(0).sort_cmp(&DataValue::Float64(-0.0)),
            Ordering::Equal
        );
    }

    #[test]
    fn test_encoded_payload_equality() {
        let a = EncodedPayload::new("f32[2]", DataValue::Vector(vec![1.0, 2.0]));
        let b = EncodedPayload::from_bytes("f32[2]", vec![0; 8])
            .with_decoded(DataValue::Vector(vec![1.0, 2.0]));
        assert_eq!(a, b);

        let undecoded = EncodedPayload::from_bytes("f32[2]", vec![0; 8]);
        assert_ne!(a, undecoded);
    }
}
