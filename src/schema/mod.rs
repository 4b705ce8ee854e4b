//! Schema of named, fixed-length features and the parser that projects
//! wire-encoded `Example` records onto dense tensors matching it.

mod example;
mod parser;
mod tensor;
mod wire;

pub use example::{Example, FeatureValue};
pub use parser::{Parser, ParserBuilder};
pub use tensor::{Tensor, TensorData};

use crate::error::{Error, Result};

/// A feature's declared shape. `[]` means scalar, which only
/// [`FeatureSpec::Bytes`] allows.
pub type Shape = Vec<usize>;

/// One named feature's declared layout, mirroring the dynamic-dispatch
/// design note in the design spec as a tagged enum rather than an object
/// hierarchy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeatureSpec {
    Int64(Shape),
    Float32(Shape),
    /// A projection: the wire carries a `bytes` field, and this variant
    /// reinterprets its concatenated payload as raw bytes laid out in
    /// `shape`. `product(shape)` must equal the payload length.
    Uint8(Shape),
    /// A single concatenated-bytes object per record; no declared shape.
    Bytes,
}

impl FeatureSpec {
    #[must_use]
    pub fn shape(&self) -> &[usize] {
        match self {
            FeatureSpec::Int64(s) | FeatureSpec::Float32(s) | FeatureSpec::Uint8(s) => s,
            FeatureSpec::Bytes => &[],
        }
    }

    fn validate(&self, name: &str) -> Result<()> {
        match self {
            FeatureSpec::Int64(shape) | FeatureSpec::Float32(shape) | FeatureSpec::Uint8(shape) => {
                if shape.is_empty() {
                    return Err(Error::SchemaInvalid(format!(
                        "feature {name:?} has a numeric dtype but a scalar (empty) shape; \
                         only the bytes dtype may be scalar"
                    )));
                }
                Ok(())
            }
            FeatureSpec::Bytes => Ok(()),
        }
    }
}

/// An ordered mapping from feature name to [`FeatureSpec`]. Insertion
/// order fixes the output tuple order of every parse operation.
#[derive(Debug, Clone)]
pub struct Schema {
    features: Vec<(String, FeatureSpec)>,
}

impl Schema {
    /// Validates and builds a schema.
    ///
    /// Rejects an empty feature list, duplicate names, and any numeric
    /// feature declared with a scalar (empty) shape.
    pub fn new(features: Vec<(String, FeatureSpec)>) -> Result<Self> {
        if features.is_empty() {
            return Err(Error::SchemaInvalid("schema has no features".to_string()));
        }

        let mut seen = std::collections::HashSet::with_capacity(features.len());
        for (name, spec) in &features {
            if !seen.insert(name.as_str()) {
                return Err(Error::SchemaInvalid(format!("duplicate feature name {name:?}")));
            }
            spec.validate(name)?;
        }

        Ok(Self { features })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.features.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    #[must_use]
    pub fn iter(&self) -> impl Iterator<Item = &(String, FeatureSpec)> {
        self.features.iter()
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&FeatureSpec> {
        self.features.iter().find(|(n, _)| n == name).map(|(_, s)| s)
    }
}
