//! Models: named transformation functions.
//!
//! A [`Model`] wraps a [`Transform`] under an identifier that listeners refer
//! to. When the model names an output encoder, listener write-back stores its
//! outputs as encoded payloads through that encoder.

use std::fmt;
use std::sync::Arc;

use crate::data::DataValue;
use crate::error::Result;

/// A pure function from one value to another, typically model inference.
pub trait Transform: Send + Sync + fmt::Debug {
    fn apply(&self, input: &DataValue) -> Result<DataValue>;
}

/// Adapts a closure into a [`Transform`].
pub struct FnTransform<F> {
    name: String,
    func: F,
}

impl<F> FnTransform<F>
where
    F: Fn(&DataValue) -> anyhow::Result<DataValue> + Send + Sync,
{
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
        }
    }
}

impl<F> fmt::Debug for FnTransform<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnTransform")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl<F> Transform for FnTransform<F>
where
    F: Fn(&DataValue) -> anyhow::Result<DataValue> + Send + Sync,
{
    fn apply(&self, input: &DataValue) -> Result<DataValue> {
        Ok((self.func)(input)?)
    }
}

/// Pass-through transform for inputs that are already vectors.
///
/// Accepts vectors and numeric lists and normalises them to
/// [`DataValue::Vector`].
#[derive(Debug, Default, Clone, Copy)]
pub struct Precomputed;

impl Transform for Precomputed {
    fn apply(&self, input: &DataValue) -> Result<DataValue> {
        input
            .to_vector()
            .map(DataValue::Vector)
            .ok_or_else(|| anyhow::anyhow!("expected a vector input").into())
    }
}

/// A registered transformation with optional output encoding.
#[derive(Debug, Clone)]
pub struct Model {
    identifier: String,
    transform: Arc<dyn Transform>,
    encoder: Option<String>,
    dimension: Option<usize>,
}

impl Model {
    pub fn new(identifier: impl Into<String>, transform: Arc<dyn Transform>) -> Self {
        Self {
            identifier: identifier.into(),
            transform,
            encoder: None,
            dimension: None,
        }
    }

    /// Build a model from a closure.
    pub fn from_fn<F>(identifier: impl Into<String>, func: F) -> Self
    where
        F: Fn(&DataValue) -> anyhow::Result<DataValue> + Send + Sync + 'static,
    {
        let identifier = identifier.into();
        let transform = Arc::new(FnTransform::new(identifier.clone(), func));
        Self::new(identifier, transform)
    }

    /// Store outputs through the encoder named `encoder`.
    pub fn with_encoder(mut self, encoder: impl Into<String>) -> Self {
        self.encoder = Some(encoder.into());
        self
    }

    /// Declare the length of the vectors this model produces.
    pub fn with_dimension(mut self, dimension: usize) -> Self {
        self.dimension = Some(dimension);
        self
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn encoder(&self) -> Option<&str> {
        self.encoder.as_deref()
    }

    pub fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    pub fn transform(&self) -> &Arc<dyn Transform> {
        &self.transform
    }

    /// Apply the transformation to one input.
    pub fn predict(&self, input: &DataValue) -> Result<DataValue> {
        self.transform.apply(input.resolved())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_closure_model() {
        let model = Model::from_fn("double", |v: &DataValue| {
            let x = v.as_float().ok_or_else(|| anyhow::anyhow!("not a number"))?;
            Ok(DataValue::Float64(x * 2.0))
        })
        .with_dimension(1);

        assert_eq!(model.identifier(), "double");
        assert_eq!(model.predict(&DataValue::Int64(2)).unwrap(), DataValue::Float64(4.0));

        let err = model.predict(&DataValue::from("x")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TransformationFailure);
    }

    #[test]
    fn test_predict_looks_through_payloads() {
        let model = Model::new("pre", Arc::new(Precomputed));
        let input = DataValue::encoded("f32[2]", vec![1.0f32, 2.0]);
        assert_eq!(
            model.predict(&input).unwrap(),
            DataValue::Vector(vec![1.0, 2.0])
        );
    }
}
