//! A minimal protobuf-subset reader: just enough tag/length/value decoding
//! to walk the standardized `tensorflow.Example` wire shape named in the
//! design spec, without pulling in a full protobuf runtime for what is,
//! in the end, a few dozen lines of varint/length-delimited parsing.
//!
//! Supported wire types: varint (0), fixed64 (1), length-delimited (2),
//! fixed32 (5). Start-group/end-group (3/4) are not emitted by protoc for
//! any message this crate reads and are treated as unknown-and-fatal if
//! ever encountered, since there is no length to skip past.

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireType {
    Varint,
    Fixed64,
    LengthDelimited,
    Fixed32,
}

impl WireType {
    fn from_tag(tag: u64) -> Result<Self> {
        match tag & 0x7 {
            0 => Ok(Self::Varint),
            1 => Ok(Self::Fixed64),
            2 => Ok(Self::LengthDelimited),
            5 => Ok(Self::Fixed32),
            other => Err(Error::Corrupt(format!("unsupported protobuf wire type {other}"))),
        }
    }
}

/// A cursor over a byte slice that decodes protobuf tag/length/value
/// triples one at a time.
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    #[must_use]
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pos >= self.buf.len()
    }

    /// Reads the next `(field_number, wire_type)` tag, or `None` at a
    /// clean end of the buffer.
    pub fn next_tag(&mut self) -> Result<Option<(u32, WireType)>> {
        if self.is_empty() {
            return Ok(None);
        }
        let tag = self.read_varint()?;
        let field_number = u32::try_from(tag >> 3)
            .map_err(|_| Error::Corrupt("protobuf field number overflowed u32".to_string()))?;
        Ok(Some((field_number, WireType::from_tag(tag)?)))
    }

    pub fn read_varint(&mut self) -> Result<u64> {
        let mut value = 0u64;
        let mut shift = 0u32;
        loop {
            if self.pos >= self.buf.len() {
                return Err(Error::Corrupt("truncated varint".to_string()));
            }
            let byte = self.buf[self.pos];
            self.pos += 1;
            value |= u64::from(byte & 0x7F) << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
            shift += 7;
            if shift >= 64 {
                return Err(Error::Corrupt("varint too long".to_string()));
            }
        }
    }

    pub fn read_fixed32(&mut self) -> Result<[u8; 4]> {
        self.take(4)?.try_into().map_err(|_| unreachable!())
    }

    pub fn read_fixed64(&mut self) -> Result<[u8; 8]> {
        self.take(8)?.try_into().map_err(|_| unreachable!())
    }

    /// Reads a length-delimited field's payload (the length prefix plus
    /// that many bytes).
    pub fn read_bytes(&mut self) -> Result<&'a [u8]> {
        let len = self.read_varint()?;
        let len = usize::try_from(len)
            .map_err(|_| Error::Corrupt("length-delimited field too long".to_string()))?;
        self.take(len)
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        if self.pos + len > self.buf.len() {
            return Err(Error::Corrupt("truncated field".to_string()));
        }
        let slice = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    /// Skips a field's value for a wire type the caller does not
    /// recognize the field number of.
    pub fn skip_field(&mut self, wire_type: WireType) -> Result<()> {
        match wire_type {
            WireType::Varint => {
                self.read_varint()?;
            }
            WireType::Fixed64 => {
                self.read_fixed64()?;
            }
            WireType::LengthDelimited => {
                self.read_bytes()?;
            }
            WireType::Fixed32 => {
                self.read_fixed32()?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_varint_and_tag() {
        // field 1, wire type 2 (length-delimited): tag = 1<<3 | 2 = 0x0A
        let buf = [0x0A, 0x03, b'a', b'b', b'c'];
        let mut r = Reader::new(&buf);
        let (field, wt) = r.next_tag().unwrap().unwrap();
        assert_eq!(field, 1);
        assert_eq!(wt, WireType::LengthDelimited);
        assert_eq!(r.read_bytes().unwrap(), b"abc");
        assert!(r.next_tag().unwrap().is_none());
    }

    #[test]
    fn skips_unknown_varint_field() {
        // field 7, wire type 0 (varint) with value 300
        let mut buf = vec![(7 << 3) | 0];
        // 300 as varint: 0b1_0010_1100 -> bytes 0xAC 0x02
        buf.extend_from_slice(&[0xAC, 0x02]);
        let mut r = Reader::new(&buf);
        let (field, wt) = r.next_tag().unwrap().unwrap();
        assert_eq!(field, 7);
        r.skip_field(wt).unwrap();
        assert!(r.is_empty());
    }

    #[test]
    fn truncated_varint_is_corrupt() {
        let buf = [0x80, 0x80];
        let mut r = Reader::new(&buf);
        assert!(r.read_varint().is_err());
    }
}
