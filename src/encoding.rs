//! Encoders and the encoder registry.
//!
//! An [`Encoder`] converts a native [`DataValue`] into storable bytes and
//! back. Documents reference encoders by identifier through
//! [`EncodedPayload`]s; the [`EncoderRegistry`] resolves those identifiers
//! when documents are written and read.

pub mod builtin;

use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::data::{DataValue, Document, EncodedPayload};
use crate::error::{LyraError, Result};

pub use self::builtin::{BytesEncoder, JsonEncoder, VectorEncoder};

/// A named codec between native values and bytes.
pub trait Encoder: Send + Sync + Debug {
    /// Unique identifier under which documents reference this encoder.
    fn identifier(&self) -> &str;

    /// Convert a native value into bytes.
    fn encode(&self, value: &DataValue) -> Result<Vec<u8>>;

    /// Convert bytes produced by [`Encoder::encode`] back into a value.
    fn decode(&self, bytes: &[u8]) -> Result<DataValue>;

    /// Identity of the implementation, used to detect conflicting
    /// re-registration under the same identifier.
    fn signature(&self) -> String {
        format!("{}#{}", std::any::type_name::<Self>(), self.identifier())
    }

    /// Wrap a native value so that it is stored through this encoder.
    fn payload(&self, value: DataValue) -> DataValue {
        DataValue::Encoded(EncodedPayload::new(self.identifier(), value))
    }
}

/// Registry of encoders keyed by identifier.
#[derive(Debug, Default)]
pub struct EncoderRegistry {
    encoders: RwLock<HashMap<String, Arc<dyn Encoder>>>,
}

impl EncoderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an encoder.
    ///
    /// Returns `false` when an identical encoder is already registered under
    /// the same identifier; fails if a different implementation is.
    pub fn register(&self, encoder: Arc<dyn Encoder>) -> Result<bool> {
        let mut guard = self.encoders.write();
        if let Some(existing) = guard.get(encoder.identifier()) {
            if existing.signature() == encoder.signature() {
                return Ok(false);
            }
            return Err(LyraError::already_exists(format!(
                "encoder '{}' is registered with a different implementation",
                encoder.identifier()
            )));
        }
        guard.insert(encoder.identifier().to_string(), encoder);
        Ok(true)
    }

    pub fn get(&self, identifier: &str) -> Result<Arc<dyn Encoder>> {
        self.encoders
            .read()
            .get(identifier)
            .cloned()
            .ok_or_else(|| LyraError::not_found(format!("encoder '{identifier}'")))
    }

    pub fn contains(&self, identifier: &str) -> bool {
        self.encoders.read().contains_key(identifier)
    }

    pub fn remove(&self, identifier: &str) -> Option<Arc<dyn Encoder>> {
        self.encoders.write().remove(identifier)
    }

    /// Registered identifiers, sorted.
    pub fn identifiers(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.encoders.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Encode a single value into its storable form.
    pub fn encode_value(&self, value: &DataValue) -> Result<DataValue> {
        let mut doc = Document::new();
        doc.insert("v", value.clone());
        let encoded = self.encode_document(&doc)?;
        Ok(encoded.get("v").cloned().unwrap_or(DataValue::Null))
    }

    /// Produce the storable form of a document.
    ///
    /// Every encoded payload must reference a registered encoder. Payloads
    /// carrying only a native value are encoded; payloads that already carry
    /// bytes are kept as-is. Decoded caches are stripped.
    pub fn encode_document(&self, doc: &Document) -> Result<Document> {
        doc.try_map_values(&mut |value: &DataValue| match value {
            DataValue::Encoded(payload) => {
                let encoder = self.get(payload.encoder())?;
                let stored = match (payload.bytes(), payload.decoded()) {
                    (Some(_), _) => payload.clone().into_stored(),
                    (None, Some(native)) => {
                        let bytes = encoder.encode(native).map_err(|err| {
                            LyraError::encoding(format!(
                                "encoder '{}' failed to encode: {err}",
                                payload.encoder()
                            ))
                        })?;
                        payload.clone().with_bytes(bytes).into_stored()
                    }
                    (None, None) => {
                        return Err(LyraError::encoding(format!(
                            "payload for encoder '{}' has neither bytes nor value",
                            payload.encoder()
                        )));
                    }
                };
                Ok(Some(DataValue::Encoded(stored)))
            }
            _ => Ok(None),
        })
    }

    /// Decode every encoded payload of a stored document.
    ///
    /// An unresolvable encoder is reported as an encoding failure naming the
    /// missing identifier.
    pub fn decode_document(&self, doc: &Document) -> Result<Document> {
        doc.try_map_values(&mut |value: &DataValue| match value {
            DataValue::Encoded(payload) => {
                let Some(bytes) = payload.bytes() else {
                    return Ok(Some(value.clone()));
                };
                let encoder = self.get(payload.encoder()).map_err(|_| {
                    LyraError::encoding(format!(
                        "stored payload references unknown encoder '{}'",
                        payload.encoder()
                    ))
                })?;
                let native = encoder.decode(bytes).map_err(|err| {
                    LyraError::encoding(format!(
                        "encoder '{}' failed to decode: {err}",
                        payload.encoder()
                    ))
                })?;
                Ok(Some(DataValue::Encoded(payload.clone().with_decoded(native))))
            }
            _ => Ok(None),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_register_is_idempotent_for_identical_encoder() {
        let registry = EncoderRegistry::new();
        assert!(registry.register(Arc::new(VectorEncoder::new(4))).unwrap());
        assert!(!registry.register(Arc::new(VectorEncoder::new(4))).unwrap());
    }

    #[test]
    fn test_register_conflicting_encoder_fails() {
        let registry = EncoderRegistry::new();
        registry
            .register(Arc::new(BytesEncoder::new("blob")))
            .unwrap();
        let err = registry
            .register(Arc::new(JsonEncoder::with_identifier("blob")))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);
    }

    #[test]
    fn test_encode_then_decode_document() {
        let registry = EncoderRegistry::new();
        let encoder = Arc::new(VectorEncoder::new(3));
        registry.register(encoder.clone()).unwrap();

        let doc = Document::new_with_id("a").add_field(
            "x",
            encoder.payload(DataValue::Vector(vec![0.5, -1.0, 2.0])),
        );

        let stored = registry.encode_document(&doc).unwrap();
        match stored.get("x").unwrap() {
            DataValue::Encoded(p) => {
                assert_eq!(p.bytes().map(|b| b.len()), Some(12));
                assert!(p.decoded().is_none());
            }
            other => panic!("expected encoded payload, got {other:?}"),
        }

        let decoded = registry.decode_document(&stored).unwrap();
        assert_eq!(decoded, doc);
    }

    #[test]
    fn test_unknown_encoder_is_rejected() {
        let registry = EncoderRegistry::new();
        let doc = Document::new().add_field("img", DataValue::encoded("pil_image", vec![1u8]));

        let err = registry.encode_document(&doc).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let stored = Document::new().add_field(
            "img",
            EncodedPayload::from_bytes("pil_image", vec![1, 2, 3]),
        );
        let err = registry.decode_document(&stored).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::EncodingFailure);
    }
}
