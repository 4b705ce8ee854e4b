//! `ByteSource`: a stateful, seekable handle over a byte range.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::Result;

/// Mirrors [`std::io::SeekFrom`]'s three origins without dragging the
/// `io` variant's embedded offset into call sites that just want to name
/// a whence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Whence {
    Start,
    Current,
    End,
}

/// A seekable byte range, single-consumer unless the implementor
/// documents otherwise.
///
/// Blanket-implemented for `Box<T>` and `&mut T` via `auto_impl` so
/// trait objects and borrowed readers both satisfy the trait without
/// hand-written forwarding impls — the same convenience `binseq` takes
/// from `auto_impl` for its own reader traits.
#[auto_impl::auto_impl(Box)]
pub trait ByteSource: Send {
    /// Reads up to `buf.len()` bytes, returning the number read (0 at
    /// EOF).
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Reads exactly `buf.len()` bytes or fails with `Error::Io`.
    fn read_exact(&mut self, mut buf: &mut [u8]) -> Result<()> {
        while !buf.is_empty() {
            let n = self.read(buf)?;
            if n == 0 {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "unexpected end of byte source",
                )
                .into());
            }
            buf = &mut buf[n..];
        }
        Ok(())
    }

    fn seek(&mut self, offset: i64, whence: Whence) -> Result<u64>;

    fn tell(&mut self) -> Result<u64> {
        self.seek(0, Whence::Current)
    }

    fn size(&mut self) -> Result<u64>;

    /// Releases any OS-level resources held by this source. The default
    /// implementation is a no-op; most sources rely on `Drop` instead,
    /// but archive-mounted sources with a shared lock use this to drop
    /// their `Arc` reference eagerly.
    fn close(&mut self) {}
}

/// A `ByteSource` backed directly by an OS file handle.
pub struct FileSource {
    file: File,
    size: u64,
}

impl FileSource {
    pub fn new(file: File) -> Result<Self> {
        let size = file.metadata()?.len();
        Ok(Self { file, size })
    }
}

impl ByteSource for FileSource {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        Ok(Read::read(&mut self.file, buf)?)
    }

    fn seek(&mut self, offset: i64, whence: Whence) -> Result<u64> {
        let from = match whence {
            Whence::Start => SeekFrom::Start(offset as u64),
            Whence::Current => SeekFrom::Current(offset),
            Whence::End => SeekFrom::End(offset),
        };
        Ok(Seek::seek(&mut self.file, from)?)
    }

    fn size(&mut self) -> Result<u64> {
        Ok(self.size)
    }
}

/// A `ByteSource` over a sub-range `[offset, offset + length)` of a
/// shared parent source.
///
/// This is how mounted archive entries are read: each entry gets one of
/// these pointed at the archive's own `ByteSource`, never a copy of the
/// archive's bytes. When `lock` is `Some`, reads and seeks serialize
/// through it so concurrent entries opened from a `lockable` archive
/// don't interleave seeks on the shared parent.
pub struct SliceSource {
    parent: Arc<Mutex<Box<dyn ByteSource>>>,
    lockable: bool,
    base_offset: u64,
    length: u64,
    pos: u64,
}

impl SliceSource {
    pub(crate) fn new(
        parent: Arc<Mutex<Box<dyn ByteSource>>>,
        lockable: bool,
        base_offset: u64,
        length: u64,
    ) -> Self {
        Self {
            parent,
            lockable,
            base_offset,
            length,
            pos: 0,
        }
    }
}

impl ByteSource for SliceSource {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let remaining = self.length.saturating_sub(self.pos);
        if remaining == 0 {
            return Ok(0);
        }
        let to_read = (buf.len() as u64).min(remaining) as usize;
        let mut parent = self.parent.lock();
        parent.seek(
            (self.base_offset + self.pos) as i64,
            Whence::Start,
        )?;
        let n = parent.read(&mut buf[..to_read])?;
        drop(parent);
        self.pos += n as u64;
        Ok(n)
    }

    fn seek(&mut self, offset: i64, whence: Whence) -> Result<u64> {
        let new_pos = match whence {
            Whence::Start => offset,
            Whence::Current => self.pos as i64 + offset,
            Whence::End => self.length as i64 + offset,
        };
        self.pos = new_pos.max(0) as u64;
        Ok(self.pos)
    }

    fn size(&mut self) -> Result<u64> {
        Ok(self.length)
    }

    fn close(&mut self) {
        if self.lockable {
            // Nothing to release beyond the Arc itself; dropping this
            // source drops our reference to the shared parent.
        }
    }
}
