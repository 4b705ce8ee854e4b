//! A high-throughput input pipeline for ML training: reads length-prefixed,
//! integrity-checked records out of a directory of container files,
//! optionally parses their typed feature payloads into dense tensors,
//! shuffles across file and record boundaries with a bounded-memory
//! reservoir, and delivers fixed-size batches to a consumer through a
//! multi-worker, bounded-queue loader.
//!
//! The crate is organized by concern, leaves first:
//!
//! - [`fs`] — a virtual filesystem over the OS disk and mounted
//!   uncompressed archives.
//! - [`container`] — the length-prefixed, CRC-32C-checked record frame
//!   format and its readers (streamed and memory-mapped).
//! - [`schema`] — a named, fixed-shape feature schema and the parser that
//!   projects wire-encoded `Example` payloads onto dense tensors.
//! - [`yielder`] — ordered ([`yielder::BasicYielder`]), shuffled
//!   ([`yielder::RandomizedYielder`]), and parsed
//!   ([`yielder::ParsedYielder`]) record producers.
//! - [`loader`] — [`loader::AsyncLoader`], which bridges any of the above
//!   to a single consumer through `W` worker threads and a bounded queue.
//!
//! See [`prelude`] for the common entry points.

pub mod container;
pub mod error;
pub mod fs;
pub mod loader;
pub mod schema;
pub mod yielder;

pub use error::{Error, Result};

/// Re-exports the types most callers need to wire up a pipeline, without
/// reaching into each submodule individually.
pub mod prelude {
    pub use crate::container::{MmapRecordReader, Record, RecordReader};
    pub use crate::error::{Error, Result};
    pub use crate::fs::{open_archive, Archive, ByteSource, FileSystem, LogicalPath};
    pub use crate::loader::{AsyncLoader, AsyncLoaderBuilder, RecordBatches, TensorBatches, Upstream};
    pub use crate::schema::{FeatureSpec, Parser, ParserBuilder, Schema, Tensor, TensorData};
    pub use crate::yielder::{BasicYielder, ParsedYielder, RandomizedYielder, RecordYielder};
}
