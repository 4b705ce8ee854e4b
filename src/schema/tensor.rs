//! Dense tensor output: a contiguous, row-major buffer plus its shape.

/// The element type backing a [`Tensor`].
#[derive(Debug, Clone, PartialEq)]
pub enum TensorData {
    Int64(Vec<i64>),
    Float32(Vec<f32>),
    UInt8(Vec<u8>),
    /// One object per row: the concatenated bytes payload of a `bytes`
    /// feature (or, pre-batching, a single-record scalar).
    Bytes(Vec<Vec<u8>>),
}

/// A dense, owned tensor. For a single-record parse the shape is the
/// feature's declared shape; for a batch parse it is `[B, ...declared]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    pub shape: Vec<usize>,
    pub data: TensorData,
}

impl Tensor {
    #[must_use]
    pub fn new(shape: Vec<usize>, data: TensorData) -> Self {
        Self { shape, data }
    }

    /// The shape with a leading batch axis removed. Panics if the tensor
    /// has no dimensions at all, which never happens for tensors this
    /// crate produces (every tensor carries at least a batch axis, even
    /// a `bytes` scalar's `[B]`).
    #[must_use]
    pub fn feature_shape(&self) -> &[usize] {
        &self.shape[1..]
    }

    #[must_use]
    pub fn batch_len(&self) -> usize {
        self.shape[0]
    }

    /// Number of scalar elements (or bytes-objects) per row, i.e. the
    /// product of [`Tensor::feature_shape`]. `Bytes` tensors are always
    /// one object per row regardless of declared shape.
    #[must_use]
    pub fn row_size(&self) -> usize {
        match &self.data {
            TensorData::Bytes(_) => 1,
            _ => self.feature_shape().iter().product(),
        }
    }
}
