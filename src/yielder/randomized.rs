use std::sync::Arc;

use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use rand::{RngCore, SeedableRng};

use super::RecordYielder;
use crate::container::{Record, RecordReader};
use crate::error::Result;
use crate::fs::{ByteSource, FileSystem, LogicalPath};

/// Shuffles across the entire dataset with a bounded reservoir buffer,
/// looping across epochs. Two independently-seeded `SmallRng`s drive
/// the per-epoch file permutation and the reservoir's record selection
/// respectively; they are never the same generator, since mixing their
/// draws would correlate file order with slot selection.
pub struct RandomizedYielder {
    fs: Arc<FileSystem>,
    paths: Vec<LogicalPath>,
    buffer_capacity: usize,
    seed: u64,
    epoch: u64,
    iteration_count: Option<u64>,
    batches_emitted: u64,

    record_rng: SmallRng,
    order: Vec<usize>,
    order_pos: usize,
    current_reader: Option<RecordReader<Box<dyn ByteSource>>>,
    buffer: Vec<Record>,
    initialized: bool,
    ended: bool,
}

impl RandomizedYielder {
    #[must_use]
    pub fn new(
        fs: Arc<FileSystem>,
        paths: Vec<LogicalPath>,
        buffer_capacity: usize,
        seed: u64,
        epoch: u64,
        iteration_count: Option<u64>,
    ) -> Self {
        let mut yielder = Self {
            fs,
            paths,
            buffer_capacity: buffer_capacity.max(1),
            seed,
            epoch,
            iteration_count,
            batches_emitted: 0,
            record_rng: SmallRng::seed_from_u64(0),
            order: Vec::new(),
            order_pos: 0,
            current_reader: None,
            buffer: Vec::new(),
            initialized: false,
            ended: false,
        };
        yielder.reseed_for_epoch();
        yielder
    }

    fn reseed_for_epoch(&mut self) {
        let mut order: Vec<usize> = (0..self.paths.len()).collect();
        let mut file_rng = SmallRng::seed_from_u64(mix(self.seed, self.epoch));
        order.shuffle(&mut file_rng);
        self.order = order;
        self.order_pos = 0;
        self.current_reader = None;
        self.record_rng = SmallRng::seed_from_u64(mix3(self.seed, self.epoch, 1));
    }

    fn open_reader(&self, path_index: usize) -> Result<RecordReader<Box<dyn ByteSource>>> {
        let source = self.fs.open(&self.paths[path_index], false)?;
        Ok(RecordReader::new(source))
    }

    /// Pulls the next record from the current epoch's stream.
    ///
    /// In infinite mode (`iteration_count` is `None`) the stream crosses
    /// epoch boundaries forever, reseeding a fresh permutation each time.
    /// In finite mode it never crosses: once the current epoch's path
    /// order is exhausted this returns `Ok(None)` for good, so the
    /// reservoir can empty and end-of-stream can fire without mixing in
    /// records from a different epoch (spec §4.5 / §8's
    /// no-duplicates-within-an-epoch invariant).
    fn next_from_stream(&mut self) -> Result<Option<Record>> {
        if self.paths.is_empty() {
            return Ok(None);
        }
        loop {
            if let Some(reader) = self.current_reader.as_mut() {
                match reader.next() {
                    Some(Ok(record)) => return Ok(Some(record)),
                    Some(Err(e)) => return Err(e),
                    None => {
                        self.current_reader = None;
                        self.order_pos += 1;
                    }
                }
            }

            if self.order_pos >= self.order.len() {
                if self.iteration_count.is_none() {
                    self.epoch += 1;
                    self.reseed_for_epoch();
                    continue;
                }
                return Ok(None);
            }

            let path_index = self.order[self.order_pos];
            self.current_reader = Some(self.open_reader(path_index)?);
        }
    }

    fn ensure_initialized(&mut self) -> Result<()> {
        if self.initialized {
            return Ok(());
        }
        while self.buffer.len() < self.buffer_capacity {
            match self.next_from_stream()? {
                Some(record) => self.buffer.push(record),
                None => break,
            }
        }
        self.initialized = true;
        Ok(())
    }
}

impl RecordYielder for RandomizedYielder {
    fn next_n(&mut self, batch_size: usize) -> Result<Option<Vec<Record>>> {
        if self.ended {
            return Ok(None);
        }
        if let Some(limit) = self.iteration_count {
            if self.batches_emitted >= limit {
                self.ended = true;
                return Ok(None);
            }
        }

        self.ensure_initialized()?;

        let mut out = Vec::with_capacity(batch_size);
        for _ in 0..batch_size {
            if self.buffer.is_empty() {
                break;
            }
            let j = (self.record_rng.next_u64() as usize) % self.buffer.len();
            out.push(self.buffer[j].clone());

            match self.next_from_stream()? {
                Some(replacement) => self.buffer[j] = replacement,
                None => {
                    let last = self.buffer.len() - 1;
                    self.buffer.swap(j, last);
                    self.buffer.pop();
                }
            }
        }

        if out.is_empty() {
            self.ended = true;
            return Ok(None);
        }

        self.batches_emitted += 1;
        Ok(Some(out))
    }
}

fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E37_79B9_7F4A_7C15);
    let mut z = x;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

fn mix(seed: u64, epoch: u64) -> u64 {
    splitmix64(seed ^ splitmix64(epoch))
}

fn mix3(seed: u64, epoch: u64, salt: u64) -> u64 {
    splitmix64(mix(seed, epoch) ^ splitmix64(salt))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::write_frame;
    use std::collections::HashSet;
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
    fn single_epoch_covers_every_record_with_no_duplicates() {
        let dir = tempfile::tempdir().unwrap();
        let paths = vec![
            fixture(dir.path(), "a.bin", &[b"1", b"2", b"3"]),
            fixture(dir.path(), "b.bin", &[b"4", b"5"]),
            fixture(dir.path(), "c.bin", &[b"6", b"7", b"8"]),
        ];
        let expected: HashSet<Vec<u8>> = (1..=8u8).map(|b| vec![b + b'0' - 1]).collect();

        // iteration_count is large enough that the epoch's own exhaustion,
        // not the batch cap, is what ends the stream here.
        let mut yielder = RandomizedYielder::new(Arc::new(FileSystem::new()), paths, 4, 42, 0, Some(10));

        let mut seen: HashSet<Vec<u8>> = HashSet::new();
        let mut total = 0;
        while let Some(batch) = yielder.next_n(3).unwrap() {
            for r in batch {
                seen.insert(r.as_slice().to_vec());
                total += 1;
            }
        }
        assert_eq!(total, 8);
        assert_eq!(seen, expected);
    }

    #[test]
    fn infinite_mode_never_emits_end_of_stream() {
        let dir = tempfile::tempdir().unwrap();
        let paths = vec![fixture(dir.path(), "a.bin", &[b"1", b"2"])];
        let mut yielder = RandomizedYielder::new(Arc::new(FileSystem::new()), paths, 2, 7, 0, None);

        for _ in 0..20 {
            let batch = yielder.next_n(5).unwrap();
            assert!(batch.is_some());
            assert_eq!(batch.unwrap().len(), 5);
        }
    }

    #[test]
    fn iteration_count_bounds_batch_count() {
        // Enough records in the one epoch that the buffer never has to
        // shrink across these calls, so the cap below is what ends the
        // stream, not the epoch running dry.
        let dir = tempfile::tempdir().unwrap();
        let payloads: Vec<Vec<u8>> = (0..20u8).map(|i| vec![i]).collect();
        let payload_refs: Vec<&[u8]> = payloads.iter().map(Vec::as_slice).collect();
        let paths = vec![fixture(dir.path(), "a.bin", &payload_refs)];
        let mut yielder = RandomizedYielder::new(Arc::new(FileSystem::new()), paths, 5, 1, 0, Some(3));

        assert!(yielder.next_n(2).unwrap().is_some());
        assert!(yielder.next_n(2).unwrap().is_some());
        assert!(yielder.next_n(2).unwrap().is_some());
        assert!(yielder.next_n(2).unwrap().is_none());
        assert!(yielder.next_n(2).unwrap().is_none());
    }

    #[test]
    fn empty_path_list_is_immediate_end_of_stream() {
        let mut yielder = RandomizedYielder::new(Arc::new(FileSystem::new()), Vec::new(), 4, 1, 0, None);
        assert!(yielder.next_n(4).unwrap().is_none());
    }

    #[test]
    fn different_seeds_produce_different_orderings() {
        let dir = tempfile::tempdir().unwrap();
        let paths = vec![fixture(
            dir.path(),
            "a.bin",
            &[b"0", b"1", b"2", b"3", b"4", b"5", b"6", b"7", b"8", b"9"],
        )];

        let mut a = RandomizedYielder::new(Arc::new(FileSystem::new()), paths.clone(), 10, 1, 0, Some(1));
        let mut b = RandomizedYielder::new(Arc::new(FileSystem::new()), paths, 10, 2, 0, Some(1));

        let out_a: Vec<u8> = a.next_n(10).unwrap().unwrap().iter().map(|r| r[0]).collect();
        let out_b: Vec<u8> = b.next_n(10).unwrap().unwrap().iter().map(|r| r[0]).collect();
        assert_ne!(out_a, out_b);
    }
}
