//! Parses one or many records into dense tensors matching a [`Schema`].
//!
//! The parallel strategy partitions a batch into contiguous row ranges
//! and fans out over `std::thread::scope`, directly grounded on
//! `binseq::bq::reader::MmapReader::process_parallel_range`'s
//! contiguous-range-per-thread fork-join shape, adapted from "each
//! thread reads its own range of an immutable mmap" to "each thread
//! writes its own non-overlapping row range of the caller's output
//! tensors." Using scoped threads instead of `thread::spawn` + a
//! `'static` bound lets the pool borrow the batch's tensors directly
//! without `unsafe` pointer-splitting; the worker count is still a
//! construction-time setting reused by every `parse_batch` call, so the
//! "pool" here denotes a fixed amount of fan-out rather than pre-spawned
//! long-lived threads.

use std::ops::Range;
use std::thread;

use super::example::Example;
use super::tensor::{Tensor, TensorData};
use super::{FeatureSpec, Schema};
use crate::container::Record;
use crate::error::{Error, Result};

/// Builder for [`Parser`], mirroring the teacher crate's
/// `BinseqWriterBuilder` construction-time configuration style.
#[derive(Debug, Clone)]
pub struct ParserBuilder {
    schema: Schema,
    parallel: bool,
    worker_count: Option<usize>,
}

impl ParserBuilder {
    #[must_use]
    pub fn new(schema: Schema) -> Self {
        Self {
            schema,
            parallel: false,
            worker_count: None,
        }
    }

    #[must_use]
    pub fn parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Overrides the worker count used when `parallel` is set. Defaults
    /// to `num_cpus::get()` when left unset, matching the teacher's own
    /// parallel reader default.
    #[must_use]
    pub fn worker_count(mut self, worker_count: usize) -> Self {
        self.worker_count = Some(worker_count);
        self
    }

    #[must_use]
    pub fn build(self) -> Parser {
        let worker_count = self.worker_count.unwrap_or_else(num_cpus::get).max(1);
        Parser {
            schema: self.schema,
            parallel: self.parallel,
            worker_count,
        }
    }
}

/// Parses records against a fixed [`Schema`], serially or via a
/// fixed-size worker fan-out.
pub struct Parser {
    schema: Schema,
    parallel: bool,
    worker_count: usize,
}

impl Parser {
    #[must_use]
    pub fn new(schema: Schema, parallel: bool) -> Self {
        ParserBuilder::new(schema).parallel(parallel).build()
    }

    #[must_use]
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Parses one record. Output tensors carry no batch axis: each has
    /// exactly its feature's declared shape.
    pub fn parse_single(&self, record: &Record) -> Result<Vec<Tensor>> {
        let example = Example::decode(record)?;
        self.schema
            .iter()
            .map(|(name, spec)| {
                let mut tensor = allocate_tensor(spec, 1);
                write_row(&mut tensor, 0, name, spec, &example)?;
                if !matches!(spec, FeatureSpec::Bytes) {
                    tensor.shape.remove(0);
                }
                Ok(tensor)
            })
            .collect()
    }

    /// Fills caller-provided, batch-shaped tensors at `batch_index`
    /// without allocating. `tensors` must already have the right shape
    /// and dtype per feature (see [`Parser::parse_batch_in_place`]).
    pub fn parse_single_in_place(
        &self,
        record: &Record,
        tensors: &mut [Tensor],
        batch_index: usize,
    ) -> Result<()> {
        validate_in_place_tensors(&self.schema, tensors, batch_index + 1)?;
        let example = Example::decode(record)?;
        for ((name, spec), tensor) in self.schema.iter().zip(tensors.iter_mut()) {
            write_row(tensor, batch_index, name, spec, &example)?;
        }
        Ok(())
    }

    /// Parses a batch of records, allocating fresh output tensors sized
    /// `[records.len(), ...feature_shape]`. An empty batch returns
    /// correctly-shaped tensors with a leading batch axis of `0`.
    pub fn parse_batch(&self, records: &[Record]) -> Result<Vec<Tensor>> {
        let mut tensors = self.allocate_batch(records.len());
        self.parse_batch_in_place(records, &mut tensors, 0)?;
        Ok(tensors)
    }

    /// Fills caller-provided batch tensors starting at row
    /// `start_index`, running serially or via `worker_count` scoped
    /// threads depending on how this `Parser` was constructed.
    ///
    /// Any per-record failure aborts the whole batch with that error;
    /// rows already written before the failure are left as-is (the
    /// contract is caller-discards-on-failure).
    pub fn parse_batch_in_place(
        &self,
        records: &[Record],
        tensors: &mut [Tensor],
        start_index: usize,
    ) -> Result<()> {
        validate_in_place_tensors(&self.schema, tensors, start_index + records.len())?;
        if records.is_empty() {
            return Ok(());
        }

        let worker_count = self.worker_count.min(records.len());
        if !self.parallel || worker_count <= 1 {
            for (i, record) in records.iter().enumerate() {
                let example = Example::decode(record)?;
                for ((name, spec), tensor) in self.schema.iter().zip(tensors.iter_mut()) {
                    write_row(tensor, start_index + i, name, spec, &example)?;
                }
            }
            return Ok(());
        }

        self.parse_batch_parallel(records, tensors, start_index, worker_count)
    }

    fn allocate_batch(&self, batch_len: usize) -> Vec<Tensor> {
        self.schema
            .iter()
            .map(|(_, spec)| allocate_tensor(spec, batch_len))
            .collect()
    }

    /// Ordering guarantee: output row `i` always corresponds to input
    /// record `i`, regardless of worker count, because rows are
    /// partitioned into contiguous ranges assigned to workers in order.
    fn parse_batch_parallel(
        &self,
        records: &[Record],
        tensors: &mut [Tensor],
        start_index: usize,
        worker_count: usize,
    ) -> Result<()> {
        let ranges = partition_ranges(records.len(), worker_count);

        let mut chunks_per_tensor: Vec<Vec<RowsMut<'_>>> = tensors
            .iter_mut()
            .map(|t| split_rows(t, start_index, &ranges))
            .collect();

        let mut per_worker: Vec<Vec<RowsMut<'_>>> =
            ranges.iter().map(|_| Vec::with_capacity(tensors.len())).collect();
        for tensor_chunks in &mut chunks_per_tensor {
            for (w, chunk) in tensor_chunks.drain(..).enumerate() {
                per_worker[w].push(chunk);
            }
        }

        let schema = &self.schema;
        thread::scope(|scope| {
            let handles: Vec<_> = ranges
                .iter()
                .cloned()
                .zip(per_worker)
                .map(|(range, mut worker_tensors)| {
                    let record_slice = &records[range];
                    scope.spawn(move || -> Result<()> {
                        let mut worker_tensors = worker_tensors;
                        for (local_row, record) in record_slice.iter().enumerate() {
                            let example = Example::decode(record)?;
                            for ((name, spec), rows) in schema.iter().zip(worker_tensors.iter_mut()) {
                                write_row_into(rows, local_row, name, spec, &example)?;
                            }
                        }
                        Ok(())
                    })
                })
                .collect();

            let mut first_error = None;
            for handle in handles {
                if let Err(e) = handle.join().expect("parser worker thread panicked") {
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
            first_error.map_or(Ok(()), Err)
        })
    }
}

fn partition_ranges(total: usize, workers: usize) -> Vec<Range<usize>> {
    let per_worker = total.div_ceil(workers);
    let mut ranges = Vec::new();
    let mut start = 0;
    while start < total {
        let end = (start + per_worker).min(total);
        ranges.push(start..end);
        start = end;
    }
    ranges
}

fn allocate_tensor(spec: &FeatureSpec, batch_len: usize) -> Tensor {
    match spec {
        FeatureSpec::Int64(shape) => {
            let row_size: usize = shape.iter().product();
            let mut full_shape = Vec::with_capacity(shape.len() + 1);
            full_shape.push(batch_len);
            full_shape.extend_from_slice(shape);
            Tensor::new(full_shape, TensorData::Int64(vec![0i64; batch_len * row_size]))
        }
        FeatureSpec::Float32(shape) => {
            let row_size: usize = shape.iter().product();
            let mut full_shape = Vec::with_capacity(shape.len() + 1);
            full_shape.push(batch_len);
            full_shape.extend_from_slice(shape);
            Tensor::new(full_shape, TensorData::Float32(vec![0.0f32; batch_len * row_size]))
        }
        FeatureSpec::Uint8(shape) => {
            let row_size: usize = shape.iter().product();
            let mut full_shape = Vec::with_capacity(shape.len() + 1);
            full_shape.push(batch_len);
            full_shape.extend_from_slice(shape);
            Tensor::new(full_shape, TensorData::UInt8(vec![0u8; batch_len * row_size]))
        }
        FeatureSpec::Bytes => Tensor::new(vec![batch_len], TensorData::Bytes(vec![Vec::new(); batch_len])),
    }
}

fn write_row(tensor: &mut Tensor, row: usize, name: &str, spec: &FeatureSpec, example: &Example) -> Result<()> {
    let value = example
        .get(name)
        .ok_or_else(|| Error::MissingFeature(name.to_string()))?;
    let row_size = tensor.row_size();

    match (&mut tensor.data, spec) {
        (TensorData::Int64(data), FeatureSpec::Int64(_)) => {
            let vals = value.as_int64(name)?;
            if vals.len() != row_size {
                return Err(shape_mismatch(name, row_size, vals.len()));
            }
            data[row * row_size..(row + 1) * row_size].copy_from_slice(vals);
        }
        (TensorData::Float32(data), FeatureSpec::Float32(_)) => {
            let vals = value.as_float32(name)?;
            if vals.len() != row_size {
                return Err(shape_mismatch(name, row_size, vals.len()));
            }
            data[row * row_size..(row + 1) * row_size].copy_from_slice(vals);
        }
        (TensorData::UInt8(data), FeatureSpec::Uint8(_)) => {
            let bytes = value.concatenated_bytes(name)?;
            if bytes.len() != row_size {
                return Err(shape_mismatch(name, row_size, bytes.len()));
            }
            data[row * row_size..(row + 1) * row_size].copy_from_slice(&bytes);
        }
        (TensorData::Bytes(data), FeatureSpec::Bytes) => {
            data[row] = value.concatenated_bytes(name)?;
        }
        _ => unreachable!("allocate_tensor always pairs a tensor dtype with its own feature spec"),
    }
    Ok(())
}

fn shape_mismatch(feature: &str, expected: usize, got: usize) -> Error {
    Error::ShapeMismatch {
        feature: feature.to_string(),
        expected,
        got,
    }
}

fn validate_in_place_tensors(schema: &Schema, tensors: &[Tensor], required_len: usize) -> Result<()> {
    if tensors.len() != schema.len() {
        return Err(Error::SchemaInvalid(format!(
            "expected {} tensors for this schema, got {}",
            schema.len(),
            tensors.len()
        )));
    }

    for ((name, spec), tensor) in schema.iter().zip(tensors.iter()) {
        if tensor.feature_shape() != spec.shape() {
            return Err(Error::ShapeMismatch {
                feature: name.clone(),
                expected: spec.shape().iter().product(),
                got: tensor.feature_shape().iter().product(),
            });
        }
        let dtype_ok = matches!(
            (&tensor.data, spec),
            (TensorData::Int64(_), FeatureSpec::Int64(_))
                | (TensorData::Float32(_), FeatureSpec::Float32(_))
                | (TensorData::UInt8(_), FeatureSpec::Uint8(_))
                | (TensorData::Bytes(_), FeatureSpec::Bytes)
        );
        if !dtype_ok {
            return Err(Error::TypeMismatch {
                feature: name.clone(),
                detail: "provided tensor's dtype does not match the schema".to_string(),
            });
        }
        if tensor.batch_len() < required_len {
            return Err(Error::ShapeMismatch {
                feature: name.clone(),
                expected: required_len,
                got: tensor.batch_len(),
            });
        }
    }
    Ok(())
}

/// A mutable, non-overlapping row range of one tensor's backing buffer,
/// handed to exactly one worker thread.
enum RowsMut<'a> {
    Int64(&'a mut [i64], usize),
    Float32(&'a mut [f32], usize),
    UInt8(&'a mut [u8], usize),
    Bytes(&'a mut [Vec<u8>]),
}

fn split_rows<'a>(tensor: &'a mut Tensor, start_index: usize, ranges: &[Range<usize>]) -> Vec<RowsMut<'a>> {
    let row_size = tensor.row_size();
    let total = ranges.last().map_or(0, |r| r.end);

    match &mut tensor.data {
        TensorData::Int64(data) => {
            let window = &mut data[start_index * row_size..(start_index + total) * row_size];
            split_contig_mut(window, row_size, ranges)
                .into_iter()
                .map(|s| RowsMut::Int64(s, row_size))
                .collect()
        }
        TensorData::Float32(data) => {
            let window = &mut data[start_index * row_size..(start_index + total) * row_size];
            split_contig_mut(window, row_size, ranges)
                .into_iter()
                .map(|s| RowsMut::Float32(s, row_size))
                .collect()
        }
        TensorData::UInt8(data) => {
            let window = &mut data[start_index * row_size..(start_index + total) * row_size];
            split_contig_mut(window, row_size, ranges)
                .into_iter()
                .map(|s| RowsMut::UInt8(s, row_size))
                .collect()
        }
        TensorData::Bytes(data) => {
            let window = &mut data[start_index..start_index + total];
            split_contig_mut(window, 1, ranges).into_iter().map(RowsMut::Bytes).collect()
        }
    }
}

/// Splits `full` (already windowed to exactly `ranges`' span) into one
/// mutable sub-slice per range, each `range.len() * row_size` elements.
fn split_contig_mut<T>(mut full: &mut [T], row_size: usize, ranges: &[Range<usize>]) -> Vec<&mut [T]> {
    let mut out = Vec::with_capacity(ranges.len());
    let mut prev_end = 0usize;
    for r in ranges {
        let skip = (r.start - prev_end) * row_size;
        let take = (r.end - r.start) * row_size;
        let (_, tail) = full.split_at_mut(skip);
        let (chunk, rest) = tail.split_at_mut(take);
        out.push(chunk);
        full = rest;
        prev_end = r.end;
    }
    out
}

fn write_row_into(rows: &mut RowsMut<'_>, local_row: usize, name: &str, spec: &FeatureSpec, example: &Example) -> Result<()> {
    let value = example
        .get(name)
        .ok_or_else(|| Error::MissingFeature(name.to_string()))?;

    match (rows, spec) {
        (RowsMut::Int64(data, row_size), FeatureSpec::Int64(_)) => {
            let row_size = *row_size;
            let vals = value.as_int64(name)?;
            if vals.len() != row_size {
                return Err(shape_mismatch(name, row_size, vals.len()));
            }
            data[local_row * row_size..(local_row + 1) * row_size].copy_from_slice(vals);
        }
        (RowsMut::Float32(data, row_size), FeatureSpec::Float32(_)) => {
            let row_size = *row_size;
            let vals = value.as_float32(name)?;
            if vals.len() != row_size {
                return Err(shape_mismatch(name, row_size, vals.len()));
            }
            data[local_row * row_size..(local_row + 1) * row_size].copy_from_slice(vals);
        }
        (RowsMut::UInt8(data, row_size), FeatureSpec::Uint8(_)) => {
            let row_size = *row_size;
            let bytes = value.concatenated_bytes(name)?;
            if bytes.len() != row_size {
                return Err(shape_mismatch(name, row_size, bytes.len()));
            }
            data[local_row * row_size..(local_row + 1) * row_size].copy_from_slice(&bytes);
        }
        (RowsMut::Bytes(data), FeatureSpec::Bytes) => {
            data[local_row] = value.concatenated_bytes(name)?;
        }
        _ => unreachable!("allocate_tensor always pairs a tensor dtype with its own feature spec"),
    }
    Ok(())
}
