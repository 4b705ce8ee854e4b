//! Thin composition: pulls records from an inner yielder and feeds them
//! straight to a [`Parser`]'s batched parse, generalizing the teacher's
//! small-composable-reader shape (`PairedReader` wrapping two
//! `SingleReader`s) to "any yielder wrapping any yielder."

use super::RecordYielder;
use crate::error::Result;
use crate::schema::{Parser, Tensor};

/// Composes any [`RecordYielder`] with a [`Parser`], delivering parsed
/// batches directly instead of raw records.
pub struct ParsedYielder<Y> {
    inner: Y,
    parser: Parser,
}

impl<Y: RecordYielder> ParsedYielder<Y> {
    #[must_use]
    pub fn new(inner: Y, parser: Parser) -> Self {
        Self { inner, parser }
    }

    #[must_use]
    pub fn parser(&self) -> &Parser {
        &self.parser
    }

    /// Pulls up to `batch_size` records from the inner yielder and parses
    /// them as one batch. Propagates end-of-stream from the inner
    /// yielder unchanged.
    pub fn next_n(&mut self, batch_size: usize) -> Result<Option<Vec<Tensor>>> {
        match self.inner.next_n(batch_size)? {
            Some(records) => Ok(Some(self.parser.parse_batch(&records)?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::write_frame;
    use crate::fs::{FileSystem, LogicalPath};
    use crate::schema::{FeatureSpec, Schema};
    use crate::yielder::BasicYielder;
    use std::io::Write as _;
    use std::sync::Arc;

    fn tag(field: u32, wire_type: u8) -> u8 {
        ((field << 3) as u8) | wire_type
    }

    fn varint(mut v: u64, out: &mut Vec<u8>) {
        loop {
            let byte = (v & 0x7F) as u8;
            v >>= 7;
            if v == 0 {
                out.push(byte);
                break;
            }
            out.push(byte | 0x80);
        }
    }

    fn length_delimited(field: u32, payload: &[u8], out: &mut Vec<u8>) {
        out.push(tag(field, 2));
        varint(payload.len() as u64, out);
        out.extend_from_slice(payload);
    }

    fn encode_bytes_feature(values: &[&[u8]]) -> Vec<u8> {
        let mut bytes_list = Vec::new();
        for v in values {
            length_delimited(1, v, &mut bytes_list);
        }
        let mut feature = Vec::new();
        length_delimited(1, &bytes_list, &mut feature);
        feature
    }

    fn encode_example(features: &[(&str, Vec<u8>)]) -> Vec<u8> {
        let mut features_msg = Vec::new();
        for (name, feature_bytes) in features {
            let mut entry = Vec::new();
            length_delimited(1, name.as_bytes(), &mut entry);
            length_delimited(2, feature_bytes, &mut entry);
            length_delimited(1, &entry, &mut features_msg);
        }
        let mut example = Vec::new();
        length_delimited(1, &features_msg, &mut example);
        example
    }

    fn fixture(dir: &std::path::Path, name: &str, payloads: &[Vec<u8>]) -> LogicalPath {
        let mut buf = Vec::new();
        for p in payloads {
            write_frame(&mut buf, p);
        }
        let path = dir.join(name);
        std::fs::File::create(&path).unwrap().write_all(&buf).unwrap();
        LogicalPath::new(path.to_str().unwrap().to_string())
    }

    #[test]
    fn delivers_batched_tensors_from_an_inner_yielder() {
        let dir = tempfile::tempdir().unwrap();
        let payloads: Vec<Vec<u8>> = (0..5u8)
            .map(|i| encode_example(&[("data", encode_bytes_feature(&[&[i, i, i]]))]))
            .collect();
        let path = fixture(dir.path(), "a.bin", &payloads);

        let basic = BasicYielder::new(Arc::new(FileSystem::new()), vec![path]);
        let schema = Schema::new(vec![("data".to_string(), FeatureSpec::Bytes)]).unwrap();
        let parser = Parser::new(schema, false);
        let mut parsed = ParsedYielder::new(basic, parser);

        let batch = parsed.next_n(3).unwrap().unwrap();
        assert_eq!(batch[0].shape, vec![3]);
        let remainder = parsed.next_n(3).unwrap().unwrap();
        assert_eq!(remainder[0].shape, vec![2]);
        assert!(parsed.next_n(3).unwrap().is_none());
    }
}
