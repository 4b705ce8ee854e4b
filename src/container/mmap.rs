//! A memory-mapped variant of [`RecordReader`](super::RecordReader) for
//! container files that live directly on the real filesystem.
//!
//! Mirrors the stream/mmap split the teacher crate draws between its
//! `StreamReader` and `MmapReader`: this type trades the generality of an
//! arbitrary [`ByteSource`](crate::fs::ByteSource) for direct, copy-free
//! access to the whole file through the OS page cache.

use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use byteorder::{ByteOrder, LittleEndian};
use memmap2::Mmap;

use super::record::Record;
use super::{unmask, Metadata, LENGTH_FIELD_SIZE};
use crate::error::{Error, Result};

const CRC_FIELD_SIZE: usize = 4;

/// Decodes a container file through a memory map instead of buffered
/// reads. Iteration semantics (CRC validation, halt-on-corruption,
/// EOF-at-frame-boundary) are identical to [`super::RecordReader`].
pub struct MmapRecordReader {
    mmap: Arc<Mmap>,
    pos: usize,
    failed: bool,
    done: bool,
    cached_metadata: Option<Metadata>,
}

impl MmapRecordReader {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        // Safety: the file is not expected to be mutated while mapped;
        // this crate only ever reads container files it did not write
        // concurrently with this process.
        let mmap = unsafe { Mmap::map(&file)? };
        Ok(Self {
            mmap: Arc::new(mmap),
            pos: 0,
            failed: false,
            done: false,
            cached_metadata: None,
        })
    }

    pub fn metadata(&mut self) -> Result<Metadata> {
        if let Some(m) = self.cached_metadata {
            return Ok(m);
        }

        let file_size = self.mmap.len() as u64;
        let mut data_size = 0u64;
        let mut entry_count = 0u64;
        let mut cursor = 0usize;

        while cursor < self.mmap.len() {
            let Some(length) = peek_length(&self.mmap, cursor)? else {
                break;
            };
            let frame_len = LENGTH_FIELD_SIZE + CRC_FIELD_SIZE + length as usize + CRC_FIELD_SIZE;
            if cursor + frame_len > self.mmap.len() {
                return Err(Error::Corrupt(
                    "truncated frame found while scanning metadata".to_string(),
                ));
            }
            cursor += frame_len;
            data_size += length;
            entry_count += 1;
        }

        let metadata = Metadata {
            file_size,
            data_size,
            entry_count,
        };
        self.cached_metadata = Some(metadata);
        Ok(metadata)
    }

    pub fn next(&mut self) -> Option<Result<Record>> {
        if self.failed {
            return Some(Err(Error::Corrupt(
                "reader already failed on a prior frame".to_string(),
            )));
        }
        if self.done {
            return None;
        }

        match self.read_frame() {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }

    fn read_frame(&mut self) -> Result<Option<Record>> {
        if self.pos >= self.mmap.len() {
            return Ok(None);
        }

        let remaining = self.mmap.len() - self.pos;
        if remaining < LENGTH_FIELD_SIZE {
            return Err(Error::Corrupt(
                "truncated frame: partial length header".to_string(),
            ));
        }

        let Some(length) = peek_length(&self.mmap, self.pos)? else {
            return Ok(None);
        };
        let length = length as usize;

        let header_end = self.pos + LENGTH_FIELD_SIZE;
        let length_crc_buf = &self.mmap[header_end..header_end + CRC_FIELD_SIZE];
        let length_crc = unmask(LittleEndian::read_u32(length_crc_buf));
        let length_bytes = (length as u64).to_le_bytes();
        if length_crc != crc32c::crc32c(&length_bytes) {
            return Err(Error::Corrupt(format!(
                "length CRC mismatch for a {length}-byte record"
            )));
        }

        let payload_start = header_end + CRC_FIELD_SIZE;
        let payload_end = payload_start + length;
        let crc_end = payload_end + CRC_FIELD_SIZE;
        if crc_end > self.mmap.len() {
            return Err(Error::Corrupt("truncated frame: partial payload or CRC".to_string()));
        }

        let payload = &self.mmap[payload_start..payload_end];
        let payload_crc = unmask(LittleEndian::read_u32(&self.mmap[payload_end..crc_end]));
        if payload_crc != crc32c::crc32c(payload) {
            return Err(Error::Corrupt(format!(
                "payload CRC mismatch for a {length}-byte record"
            )));
        }

        self.pos = crc_end;
        Ok(Some(Record::from(payload)))
    }
}

fn peek_length(mmap: &Mmap, pos: usize) -> Result<Option<u64>> {
    if pos == mmap.len() {
        return Ok(None);
    }
    if pos + LENGTH_FIELD_SIZE > mmap.len() {
        return Err(Error::Corrupt(
            "truncated frame: partial length header".to_string(),
        ));
    }
    Ok(Some(LittleEndian::read_u64(&mmap[pos..pos + LENGTH_FIELD_SIZE])))
}
