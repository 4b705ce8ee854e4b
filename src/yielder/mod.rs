//! Record-stream producers: ordered, randomized, and parsed yielders.
//!
//! All three share the internal `RecordYielder` trait's pull-based
//! shape (`next_n(batch_size)`), so [`AsyncLoader`](crate::loader::AsyncLoader)
//! and [`ParsedYielder`] can wrap any of them interchangeably — the
//! same "small composable readers wrapping readers" shape the teacher
//! uses for `PairedReader` over two `SingleReader`s, generalized here to
//! "any yielder wrapping any yielder."

mod basic;
mod parsed;
mod randomized;

pub use basic::BasicYielder;
pub use parsed::ParsedYielder;
pub use randomized::RandomizedYielder;

use crate::container::Record;
use crate::error::Result;

/// A pull-based source of record batches.
///
/// `next_n` returns `Ok(None)` exactly at a clean, permanent end of
/// stream: once a yielder returns `None` it must keep returning `None`.
/// A non-`None` batch may be shorter than `batch_size` (e.g. a final
/// partial batch from [`BasicYielder`]); it is never empty, since an
/// empty batch is represented as `None` instead.
pub trait RecordYielder {
    fn next_n(&mut self, batch_size: usize) -> Result<Option<Vec<Record>>>;
}
