//! Decodes the standardized `tensorflow.Example` wire shape referenced by
//! the design spec: a top-level `Example { Features features = 1; }`
//! where `Features` is a string-keyed map of `Feature` oneofs, each one
//! of `BytesList | FloatList | Int64List`.
//!
//! Grounded on `examples/original_source/test_utils/make_tfrecords.py`,
//! which is the producer this crate's own fixtures and tests mirror:
//! `tf.train.Example(features=Features(feature={'shape': Int64List(...),
//! 'data': BytesList(...)}))`.

use std::collections::HashMap;

use byteorder::{ByteOrder, LittleEndian};

use super::wire::{Reader, WireType};
use crate::error::{Error, Result};

/// One feature's decoded value, before any schema-driven shape/dtype
/// checks are applied.
#[derive(Debug, Clone, PartialEq)]
pub enum FeatureValue {
    Int64(Vec<i64>),
    Float32(Vec<f32>),
    Bytes(Vec<Vec<u8>>),
}

impl FeatureValue {
    fn extend(&mut self, other: FeatureValue) -> Result<()> {
        match (self, other) {
            (FeatureValue::Int64(a), FeatureValue::Int64(b)) => {
                a.extend(b);
                Ok(())
            }
            (FeatureValue::Float32(a), FeatureValue::Float32(b)) => {
                a.extend(b);
                Ok(())
            }
            (FeatureValue::Bytes(a), FeatureValue::Bytes(b)) => {
                a.extend(b);
                Ok(())
            }
            _ => Err(Error::Corrupt(
                "feature repeated under the same key with inconsistent wire kinds".to_string(),
            )),
        }
    }

    /// Concatenates every occurrence's bytes payload into one buffer.
    /// Used for both the `bytes` scalar fill and the `uint8` projection.
    pub fn concatenated_bytes(&self, feature: &str) -> Result<Vec<u8>> {
        match self {
            FeatureValue::Bytes(parts) => Ok(parts.iter().flatten().copied().collect()),
            other => Err(Error::TypeMismatch {
                feature: feature.to_string(),
                detail: format!("expected a bytes-kind field, got {}", other.kind_name()),
            }),
        }
    }

    pub fn as_int64(&self, feature: &str) -> Result<&[i64]> {
        match self {
            FeatureValue::Int64(v) => Ok(v),
            other => Err(Error::TypeMismatch {
                feature: feature.to_string(),
                detail: format!("expected an int64-kind field, got {}", other.kind_name()),
            }),
        }
    }

    pub fn as_float32(&self, feature: &str) -> Result<&[f32]> {
        match self {
            FeatureValue::Float32(v) => Ok(v),
            other => Err(Error::TypeMismatch {
                feature: feature.to_string(),
                detail: format!("expected a float32-kind field, got {}", other.kind_name()),
            }),
        }
    }

    fn kind_name(&self) -> &'static str {
        match self {
            FeatureValue::Int64(_) => "int64",
            FeatureValue::Float32(_) => "float32",
            FeatureValue::Bytes(_) => "bytes",
        }
    }
}

/// A decoded `Example`: an ordered-by-first-appearance map from feature
/// name to its (possibly multi-occurrence, already concatenated) value.
#[derive(Debug, Default)]
pub struct Example {
    features: HashMap<String, FeatureValue>,
}

impl Example {
    pub fn get(&self, name: &str) -> Option<&FeatureValue> {
        self.features.get(name)
    }

    /// Decodes one record's payload bytes into an `Example`.
    pub fn decode(payload: &[u8]) -> Result<Self> {
        let mut top = Reader::new(payload);
        let mut features = HashMap::new();

        while let Some((field, wire_type)) = top.next_tag()? {
            if field == 1 && wire_type == WireType::LengthDelimited {
                let features_bytes = top.read_bytes()?;
                decode_features(features_bytes, &mut features)?;
            } else {
                top.skip_field(wire_type)?;
            }
        }

        Ok(Self { features })
    }
}

fn decode_features(buf: &[u8], out: &mut HashMap<String, FeatureValue>) -> Result<()> {
    let mut reader = Reader::new(buf);
    while let Some((field, wire_type)) = reader.next_tag()? {
        if field == 1 && wire_type == WireType::LengthDelimited {
            let entry_bytes = reader.read_bytes()?;
            let (key, value) = decode_map_entry(entry_bytes)?;
            match out.get_mut(&key) {
                Some(existing) => existing.extend(value)?,
                None => {
                    out.insert(key, value);
                }
            }
        } else {
            reader.skip_field(wire_type)?;
        }
    }
    Ok(())
}

fn decode_map_entry(buf: &[u8]) -> Result<(String, FeatureValue)> {
    let mut reader = Reader::new(buf);
    let mut key: Option<String> = None;
    let mut value: Option<FeatureValue> = None;

    while let Some((field, wire_type)) = reader.next_tag()? {
        match (field, wire_type) {
            (1, WireType::LengthDelimited) => {
                let bytes = reader.read_bytes()?;
                key = Some(
                    std::str::from_utf8(bytes)
                        .map_err(|_| Error::Corrupt("feature name is not valid UTF-8".to_string()))?
                        .to_string(),
                );
            }
            (2, WireType::LengthDelimited) => {
                value = Some(decode_feature(reader.read_bytes()?)?);
            }
            (_, wt) => reader.skip_field(wt)?,
        }
    }

    let key = key.ok_or_else(|| Error::Corrupt("feature map entry missing a key".to_string()))?;
    let value = value.unwrap_or(FeatureValue::Bytes(Vec::new()));
    Ok((key, value))
}

fn decode_feature(buf: &[u8]) -> Result<FeatureValue> {
    let mut reader = Reader::new(buf);
    let mut bytes_values: Vec<Vec<u8>> = Vec::new();
    let mut float_values: Vec<f32> = Vec::new();
    let mut int64_values: Vec<i64> = Vec::new();
    let mut saw_bytes = false;
    let mut saw_float = false;
    let mut saw_int64 = false;

    while let Some((field, wire_type)) = reader.next_tag()? {
        if wire_type != WireType::LengthDelimited {
            reader.skip_field(wire_type)?;
            continue;
        }
        match field {
            1 => {
                // BytesList
                saw_bytes = true;
                decode_bytes_list(reader.read_bytes()?, &mut bytes_values)?;
            }
            2 => {
                // FloatList
                saw_float = true;
                decode_float_list(reader.read_bytes()?, &mut float_values)?;
            }
            3 => {
                // Int64List
                saw_int64 = true;
                decode_int64_list(reader.read_bytes()?, &mut int64_values)?;
            }
            _ => reader.skip_field(wire_type)?,
        }
    }

    match (saw_bytes, saw_float, saw_int64) {
        (true, false, false) => Ok(FeatureValue::Bytes(bytes_values)),
        (false, true, false) => Ok(FeatureValue::Float32(float_values)),
        (false, false, true) => Ok(FeatureValue::Int64(int64_values)),
        (false, false, false) => Ok(FeatureValue::Bytes(Vec::new())),
        _ => Err(Error::Corrupt(
            "feature set more than one of bytes_list/float_list/int64_list".to_string(),
        )),
    }
}

fn decode_bytes_list(submessage: &[u8], out: &mut Vec<Vec<u8>>) -> Result<()> {
    let mut reader = Reader::new(submessage);
    while let Some((field, wire_type)) = reader.next_tag()? {
        if field == 1 && wire_type == WireType::LengthDelimited {
            out.push(reader.read_bytes()?.to_vec());
        } else {
            reader.skip_field(wire_type)?;
        }
    }
    Ok(())
}

fn decode_float_list(submessage: &[u8], out: &mut Vec<f32>) -> Result<()> {
    let mut reader = Reader::new(submessage);
    while let Some((field, wire_type)) = reader.next_tag()? {
        if field != 1 {
            reader.skip_field(wire_type)?;
            continue;
        }
        match wire_type {
            WireType::LengthDelimited => {
                // packed repeated float: a blob of 4-byte little-endian values
                let blob = reader.read_bytes()?;
                if blob.len() % 4 != 0 {
                    return Err(Error::Corrupt("packed float list has a trailing partial value".to_string()));
                }
                for chunk in blob.chunks_exact(4) {
                    out.push(LittleEndian::read_f32(chunk));
                }
            }
            WireType::Fixed32 => {
                out.push(LittleEndian::read_f32(&reader.read_fixed32()?));
            }
            other => reader.skip_field(other)?,
        }
    }
    Ok(())
}

fn decode_int64_list(submessage: &[u8], out: &mut Vec<i64>) -> Result<()> {
    let mut reader = Reader::new(submessage);
    while let Some((field, wire_type)) = reader.next_tag()? {
        if field != 1 {
            reader.skip_field(wire_type)?;
            continue;
        }
        match wire_type {
            WireType::LengthDelimited => {
                // packed repeated int64: a run of concatenated varints
                let blob = reader.read_bytes()?;
                let mut inner = Reader::new(blob);
                while !inner.is_empty() {
                    out.push(inner.read_varint()? as i64);
                }
            }
            WireType::Varint => {
                out.push(reader.read_varint()? as i64);
            }
            other => reader.skip_field(other)?,
        }
    }
    Ok(())
}
