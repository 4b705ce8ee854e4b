use std::sync::Arc;

use super::RecordYielder;
use crate::container::{Record, RecordReader};
use crate::error::Result;
use crate::fs::{ByteSource, FileSystem, LogicalPath};

/// Reads an ordered list of paths in order, file by file, record by
/// record. State machine: `Idle -> Reading(i) -> Done`, represented
/// here as `index` + `reader` (`None` means idle-before-file-`index`)
/// plus a `done` flag rather than an explicit enum, since the fields
/// already encode the same three states without an extra match layer.
pub struct BasicYielder {
    fs: Arc<FileSystem>,
    paths: Vec<LogicalPath>,
    index: usize,
    reader: Option<RecordReader<Box<dyn ByteSource>>>,
    done: bool,
}

impl BasicYielder {
    #[must_use]
    pub fn new(fs: Arc<FileSystem>, paths: Vec<LogicalPath>) -> Self {
        Self {
            fs,
            paths,
            index: 0,
            reader: None,
            done: false,
        }
    }

    fn open_reader(&self, index: usize) -> Result<RecordReader<Box<dyn ByteSource>>> {
        let source = self.fs.open(&self.paths[index], false)?;
        Ok(RecordReader::new(source))
    }
}

impl RecordYielder for BasicYielder {
    fn next_n(&mut self, batch_size: usize) -> Result<Option<Vec<Record>>> {
        if self.done {
            return Ok(None);
        }

        let mut out = Vec::with_capacity(batch_size);
        while out.len() < batch_size {
            if self.reader.is_none() {
                if self.index >= self.paths.len() {
                    self.done = true;
                    break;
                }
                self.reader = Some(self.open_reader(self.index)?);
            }

            match self.reader.as_mut().unwrap().next() {
                Some(Ok(record)) => out.push(record),
                Some(Err(e)) => {
                    self.done = true;
                    return Err(e);
                }
                None => {
                    self.reader = None;
                    self.index += 1;
                }
            }
        }

        if out.is_empty() {
            self.done = true;
            Ok(None)
        } else {
            Ok(Some(out))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::write_frame;
    use std::io::Write as _;

    fn fixture(dir: &std::path::Path, name: &str, payloads: &[&[u8]]) -> LogicalPath {
        let mut buf = Vec::new();
        for p in payloads {
            write_frame(&mut buf, p);
        }
        let path = dir.join(name);
        std::fs::File::create(&path).unwrap().write_all(&buf).unwrap();
        LogicalPath::new(path.to_str().unwrap().to_string())
    }

    #[test]
    fn reads_files_in_order_across_boundaries() {
        let dir = tempfile::tempdir().unwrap();
        let a = fixture(dir.path(), "a.bin", &[b"1", b"2"]);
        let b = fixture(dir.path(), "b.bin", &[b"3"]);

        let mut yielder = BasicYielder::new(Arc::new(FileSystem::new()), vec![a, b]);
        let batch = yielder.next_n(10).unwrap().unwrap();
        let bodies: Vec<&[u8]> = batch.iter().map(|r| r.as_slice()).collect();
        assert_eq!(bodies, [b"1".as_slice(), b"2", b"3"]);
        assert!(yielder.next_n(10).unwrap().is_none());
    }

    #[test]
    fn short_final_batch_then_end_of_stream() {
        let dir = tempfile::tempdir().unwrap();
        let a = fixture(dir.path(), "a.bin", &[b"1", b"2", b"3"]);

        let mut yielder = BasicYielder::new(Arc::new(FileSystem::new()), vec![a]);
        let first = yielder.next_n(2).unwrap().unwrap();
        assert_eq!(first.len(), 2);
        let second = yielder.next_n(2).unwrap().unwrap();
        assert_eq!(second.len(), 1);
        assert!(yielder.next_n(2).unwrap().is_none());
        assert!(yielder.next_n(2).unwrap().is_none());
    }

    #[test]
    fn empty_path_list_is_immediate_end_of_stream() {
        let mut yielder = BasicYielder::new(Arc::new(FileSystem::new()), Vec::new());
        assert!(yielder.next_n(4).unwrap().is_none());
    }
}
