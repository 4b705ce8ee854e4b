//! Crate-wide error taxonomy.
//!
//! Every fallible operation in `recordfeed` returns this single [`Error`]
//! enum rather than a family of per-module error types: the pipeline has
//! one caller-facing contract (§7 of the design spec) and splitting it up
//! would just push the matching burden onto consumers.

use std::path::PathBuf;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// A logical path did not resolve through any mount.
    #[error("path not found: {0}")]
    NotFound(String),

    /// An OS-level read/seek/write failure, including a truncated file
    /// discovered mid-read.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A CRC mismatch, truncated frame, or malformed Example payload.
    #[error("corrupt data: {0}")]
    Corrupt(String),

    /// An archive entry requires a compression method beyond stored.
    #[error("unsupported compression method {method} for entry {entry:?}")]
    UnsupportedCompression { entry: PathBuf, method: u16 },

    /// A schema failed validation at construction time.
    #[error("invalid schema: {0}")]
    SchemaInvalid(String),

    /// A record did not contain a feature the schema requires.
    #[error("missing feature: {0}")]
    MissingFeature(String),

    /// A feature's declared shape does not match its payload.
    #[error("shape mismatch for feature {feature}: expected {expected} elements, got {got}")]
    ShapeMismatch {
        feature: String,
        expected: usize,
        got: usize,
    },

    /// A feature's declared dtype does not match the wire kind that
    /// carried its value.
    #[error("type mismatch for feature {feature}: {detail}")]
    TypeMismatch { feature: String, detail: String },

    /// An [`AsyncLoader`](crate::loader::AsyncLoader) was dropped or
    /// cancelled mid-operation.
    #[error("operation cancelled")]
    Cancelled,
}
