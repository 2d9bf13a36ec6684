//! Encoders shipped with Lyra.

use std::io::Cursor;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::data::DataValue;
use crate::encoding::Encoder;
use crate::error::{LyraError, Result};

/// Fixed-dimension `f32` vector encoder, identified as `f32[<dimension>]`.
///
/// Values are written as little-endian floats.
#[derive(Debug, Clone)]
pub struct VectorEncoder {
    identifier: String,
    dimension: usize,
}

impl VectorEncoder {
    pub fn new(dimension: usize) -> Self {
        Self {
            identifier: format!("f32[{dimension}]"),
            dimension,
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }
}

impl Encoder for VectorEncoder {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    fn encode(&self, value: &DataValue) -> Result<Vec<u8>> {
        let vector = value.to_vector().ok_or_else(|| {
            LyraError::encoding(format!("{} expects a vector value", self.identifier))
        })?;
        if vector.len() != self.dimension {
            return Err(LyraError::encoding(format!(
                "{} expects {} values, got {}",
                self.identifier,
                self.dimension,
                vector.len()
            )));
        }
        let mut out = Vec::with_capacity(vector.len() * 4);
        for v in vector {
            out.write_f32::<LittleEndian>(v)
                .map_err(|e| LyraError::encoding(e.to_string()))?;
        }
        Ok(out)
    }

    fn decode(&self, bytes: &[u8]) -> Result<DataValue> {
        if bytes.len() != self.dimension * 4 {
            return Err(LyraError::encoding(format!(
                "{} expects {} bytes, got {}",
                self.identifier,
                self.dimension * 4,
                bytes.len()
            )));
        }
        let mut reader = Cursor::new(bytes);
        let mut vector = Vec::with_capacity(self.dimension);
        for _ in 0..self.dimension {
            vector.push(
                reader
                    .read_f32::<LittleEndian>()
                    .map_err(|e| LyraError::encoding(e.to_string()))?,
            );
        }
        Ok(DataValue::Vector(vector))
    }

    fn signature(&self) -> String {
        format!("vector#{}", self.dimension)
    }
}

/// Pass-through encoder for opaque binary payloads such as images.
#[derive(Debug, Clone)]
pub struct BytesEncoder {
    identifier: String,
}

impl BytesEncoder {
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
        }
    }
}

impl Encoder for BytesEncoder {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    fn encode(&self, value: &DataValue) -> Result<Vec<u8>> {
        value
            .as_bytes_ref()
            .map(|b| b.to_vec())
            .ok_or_else(|| LyraError::encoding(format!("{} expects bytes", self.identifier)))
    }

    fn decode(&self, bytes: &[u8]) -> Result<DataValue> {
        Ok(DataValue::Bytes(bytes.to_vec()))
    }
}

/// Encoder storing arbitrary values as JSON.
#[derive(Debug, Clone)]
pub struct JsonEncoder {
    identifier: String,
}

impl JsonEncoder {
    pub fn new() -> Self {
        Self::with_identifier("json")
    }

    pub fn with_identifier(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
        }
    }
}

impl Default for JsonEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Encoder for JsonEncoder {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    fn encode(&self, value: &DataValue) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(value)?)
    }

    fn decode(&self, bytes: &[u8]) -> Result<DataValue> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
