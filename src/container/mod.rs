//! Record container: decodes one file into an ordered stream of opaque,
//! integrity-checked byte records.
//!
//! ## Frame format
//!
//! Each record is a little-endian frame:
//!
//! ```text
//! u64 length
//! u32 masked_crc32c(length)
//! u8[length] payload
//! u32 masked_crc32c(payload)
//! ```
//!
//! Masking follows the same transform used by length-prefixed log formats
//! elsewhere in the ecosystem (see `mask`/`unmask` below): it keeps an
//! all-zero payload from producing an all-zero CRC, which would otherwise
//! make truncation-to-zero silently pass validation.

mod mmap;
mod record;

pub use mmap::MmapRecordReader;
pub use record::Record;

use std::io::Read;

use byteorder::{ByteOrder, LittleEndian};

use crate::error::{Error, Result};
use crate::fs::ByteSource;

const LENGTH_FIELD_SIZE: usize = 8;
const CRC_FIELD_SIZE: usize = 4;
const MASK_DELTA: u32 = 0xA282_EAD8;

/// Applies the masking transform to a raw CRC-32C value before it is
/// stored in a frame.
#[must_use]
pub fn mask(crc: u32) -> u32 {
    ((crc >> 15) | (crc << 17)).wrapping_add(MASK_DELTA)
}

/// Reverses [`mask`], recovering the raw CRC-32C value stored in a frame.
#[must_use]
pub fn unmask(masked: u32) -> u32 {
    let rot = masked.wrapping_sub(MASK_DELTA);
    (rot >> 17) | (rot << 15)
}

/// Metadata about a container file: total size on disk, sum of payload
/// lengths, and number of records. Computing `data_size`/`entry_count`
/// requires a forward scan of the whole file, so readers cache the result
/// after the first call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Metadata {
    pub file_size: u64,
    pub data_size: u64,
    pub entry_count: u64,
}

/// Decodes a single container file, backed by any [`ByteSource`], into an
/// ordered, non-restartable sequence of [`Record`]s.
///
/// A CRC mismatch or truncated frame is unrecoverable: once a reader
/// returns `Corrupt`, every subsequent call returns the same error rather
/// than attempting to resynchronize on the next frame boundary.
pub struct RecordReader<S> {
    source: S,
    failed: bool,
    done: bool,
    cached_metadata: Option<Metadata>,
}

impl<S: ByteSource> RecordReader<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            failed: false,
            done: false,
            cached_metadata: None,
        }
    }

    /// Returns `(file_size, data_size, entry_count)`, scanning the file
    /// once on first call and caching the result.
    ///
    /// This consumes the source's current position; call it before
    /// [`RecordReader::next`], or expect the scan to pick up wherever
    /// iteration left off (it always rewinds to the start first).
    pub fn metadata(&mut self) -> Result<Metadata> {
        if let Some(m) = self.cached_metadata {
            return Ok(m);
        }

        let file_size = self.source.size()?;
        self.source.seek(0, crate::fs::Whence::Start)?;

        let mut data_size = 0u64;
        let mut entry_count = 0u64;
        loop {
            match read_length(&mut self.source)? {
                None => break,
                Some(length) => {
                    self.source.seek(
                        (length + CRC_FIELD_SIZE as u64) as i64,
                        crate::fs::Whence::Current,
                    )?;
                    data_size += length;
                    entry_count += 1;
                }
            }
        }

        self.source.seek(0, crate::fs::Whence::Start)?;
        let metadata = Metadata {
            file_size,
            data_size,
            entry_count,
        };
        self.cached_metadata = Some(metadata);
        Ok(metadata)
    }

    /// Returns the next record, or `None` at a clean end of file.
    ///
    /// Once this returns `Some(Err(Error::Corrupt(_)))` it will keep
    /// returning the same error forever; the reader is not usable past a
    /// corruption.
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
        let Some(length) = read_length(&mut self.source)? else {
            return Ok(None);
        };

        let mut length_crc_buf = [0u8; CRC_FIELD_SIZE];
        read_exact_or_corrupt(&mut self.source, &mut length_crc_buf, "length CRC")?;
        let length_crc = unmask(LittleEndian::read_u32(&length_crc_buf));
        if length_crc != crc32c::crc32c(&length.to_le_bytes()) {
            return Err(Error::Corrupt(format!(
                "length CRC mismatch for a {length}-byte record"
            )));
        }

        let mut payload = vec![0u8; length as usize];
        read_exact_or_corrupt(&mut self.source, &mut payload, "payload")?;

        let mut payload_crc_buf = [0u8; CRC_FIELD_SIZE];
        read_exact_or_corrupt(&mut self.source, &mut payload_crc_buf, "payload CRC")?;
        let payload_crc = unmask(LittleEndian::read_u32(&payload_crc_buf));
        if payload_crc != crc32c::crc32c(&payload) {
            return Err(Error::Corrupt(format!(
                "payload CRC mismatch for a {length}-byte record"
            )));
        }

        Ok(Some(Record::from(payload)))
    }
}

impl<S: ByteSource> Iterator for RecordReader<S> {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        RecordReader::next(self)
    }
}

/// Reads the 8-byte length prefix. Returns `Ok(None)` only when the
/// source is exactly at EOF (zero bytes available); any partial read is
/// `Corrupt`.
fn read_length(source: &mut impl ByteSource) -> Result<Option<u64>> {
    let mut buf = [0u8; LENGTH_FIELD_SIZE];
    let mut filled = 0;
    while filled < buf.len() {
        let n = source.read(&mut buf[filled..])?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(Error::Corrupt(
                "truncated frame: partial length header".to_string(),
            ));
        }
        filled += n;
    }
    Ok(Some(LittleEndian::read_u64(&buf)))
}

fn read_exact_or_corrupt(source: &mut impl ByteSource, buf: &mut [u8], what: &str) -> Result<()> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = source.read(&mut buf[filled..])?;
        if n == 0 {
            return Err(Error::Corrupt(format!("truncated frame: partial {what}")));
        }
        filled += n;
    }
    Ok(())
}

/// Writes one frame (used only by test fixtures in this crate; the crate
/// itself never writes records, per the Non-goals this pipeline carries).
#[cfg(test)]
pub(crate) fn write_frame(out: &mut impl std::io::Write, payload: &[u8]) {
    let length = payload.len() as u64;
    let length_crc = mask(crc32c::crc32c(&length.to_le_bytes()));
    let payload_crc = mask(crc32c::crc32c(payload));

    out.write_all(&length.to_le_bytes()).unwrap();
    out.write_all(&length_crc.to_le_bytes()).unwrap();
    out.write_all(payload).unwrap();
    out.write_all(&payload_crc.to_le_bytes()).unwrap();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::{FileSource, Whence};
    use std::io::{Cursor, Write as _};

    struct CursorSource(Cursor<Vec<u8>>);

    impl ByteSource for CursorSource {
        fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
            Ok(Read::read(&mut self.0, buf)?)
        }
        fn seek(&mut self, offset: i64, whence: Whence) -> Result<u64> {
            let from = match whence {
                Whence::Start => std::io::SeekFrom::Start(offset as u64),
                Whence::Current => std::io::SeekFrom::Current(offset),
                Whence::End => std::io::SeekFrom::End(offset),
            };
            Ok(std::io::Seek::seek(&mut self.0, from)?)
        }
        fn size(&mut self) -> Result<u64> {
            Ok(self.0.get_ref().len() as u64)
        }
    }

    fn reader_over(payloads: &[&[u8]]) -> RecordReader<CursorSource> {
        let mut buf = Vec::new();
        for p in payloads {
            write_frame(&mut buf, p);
        }
        RecordReader::new(CursorSource(Cursor::new(buf)))
    }

    #[test]
    fn round_trips_payload_bytes() {
        let mut reader = reader_over(&[b"\x00\x01\x02"]);
        let record = reader.next().unwrap().unwrap();
        assert_eq!(&*record, b"\x00\x01\x02");
        assert!(reader.next().is_none());
    }

    #[test]
    fn empty_file_has_zero_entries() {
        let mut reader = reader_over(&[]);
        assert!(reader.next().is_none());
        let metadata = reader.metadata().unwrap();
        assert_eq!(metadata.entry_count, 0);
        assert_eq!(metadata.data_size, 0);
    }

    #[test]
    fn metadata_reports_entry_count_and_data_size() {
        let mut reader = reader_over(&[b"abc", b"defgh"]);
        let metadata = reader.metadata().unwrap();
        assert_eq!(metadata.entry_count, 2);
        assert_eq!(metadata.data_size, 8);
        // metadata() must not disturb iteration
        let first = reader.next().unwrap().unwrap();
        assert_eq!(&*first, b"abc");
    }

    #[test]
    fn tampered_payload_crc_is_corrupt() {
        let mut buf = Vec::new();
        write_frame(&mut buf, b"\x00\x01\x02");
        let last = buf.len() - 1;
        buf[last] ^= 0xFF;
        let mut reader = RecordReader::new(CursorSource(Cursor::new(buf)));
        assert!(matches!(reader.next(), Some(Err(Error::Corrupt(_)))));
        // a reader that has failed keeps failing, it does not try to resync
        assert!(matches!(reader.next(), Some(Err(Error::Corrupt(_)))));
    }

    #[test]
    fn tampered_payload_byte_is_corrupt() {
        let mut buf = Vec::new();
        write_frame(&mut buf, b"\x00\x01\x02");
        buf[LENGTH_FIELD_SIZE + CRC_FIELD_SIZE] ^= 0xFF;
        let mut reader = RecordReader::new(CursorSource(Cursor::new(buf)));
        assert!(matches!(reader.next(), Some(Err(Error::Corrupt(_)))));
    }

    #[test]
    fn truncated_frame_is_corrupt() {
        let mut buf = Vec::new();
        write_frame(&mut buf, b"hello world");
        buf.truncate(buf.len() - 3);
        let mut reader = RecordReader::new(CursorSource(Cursor::new(buf)));
        assert!(matches!(reader.next(), Some(Err(Error::Corrupt(_)))));
    }

    #[test]
    fn reads_through_file_backed_byte_source() {
        let mut buf = Vec::new();
        write_frame(&mut buf, b"on disk");
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("records.bin");
        std::fs::File::create(&path).unwrap().write_all(&buf).unwrap();

        let file = std::fs::File::open(&path).unwrap();
        let mut reader = RecordReader::new(FileSource::new(file).unwrap());
        let record = reader.next().unwrap().unwrap();
        assert_eq!(&*record, b"on disk");
    }
}
