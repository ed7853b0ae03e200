//! Backing-file codec.
//!
//! A backing file is the concatenation of every bank's elements, in bank
//! order, big-endian, with no header. Reading needs the same
//! [`SampleLayout`] that was used to write; the codec stores no schema.

use crate::cache::buffer::{with_banks, ElementType, Sample, SampleLayout, TileBuffer};
use crate::cache::record::TileRecord;
use crate::cache::types::CacheError;
use bytes::{Bytes, BytesMut};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

/// Serializes tile buffers to and from backing files.
pub struct TileCodec;

impl TileCodec {
    /// Encode `buffer` into its on-disk byte form.
    pub fn encode(buffer: &TileBuffer) -> Bytes {
        let mut out = BytesMut::with_capacity(buffer.byte_size() as usize);
        with_banks!(buffer.banks(), banks => encode_banks(banks, &mut out));
        out.freeze()
    }

    /// Rebuild a buffer from bytes written for `layout`.
    pub fn decode(mut data: Bytes, layout: &SampleLayout) -> Result<TileBuffer, CacheError> {
        let expected = layout.byte_size();
        if data.len() as u64 != expected {
            return Err(CacheError::CorruptBacking {
                expected,
                actual: data.len() as u64,
            });
        }
        match layout.element_type {
            ElementType::U8 => TileBuffer::from_banks(decode_banks::<u8>(&mut data, layout)),
            ElementType::U16 => TileBuffer::from_banks(decode_banks::<u16>(&mut data, layout)),
            ElementType::I16 => TileBuffer::from_banks(decode_banks::<i16>(&mut data, layout)),
            ElementType::I32 => TileBuffer::from_banks(decode_banks::<i32>(&mut data, layout)),
            ElementType::F32 => TileBuffer::from_banks(decode_banks::<f32>(&mut data, layout)),
            ElementType::F64 => TileBuffer::from_banks(decode_banks::<f64>(&mut data, layout)),
        }
    }

    /// Persist `buffer` to the backing file of `record`.
    pub fn write(record: &TileRecord, buffer: &TileBuffer) -> Result<(), CacheError> {
        if buffer.layout() != record.layout() {
            return Err(CacheError::LayoutMismatch {
                expected: record.layout(),
                actual: buffer.layout(),
            });
        }
        Self::write_path(record.backing_path(), buffer)
    }

    /// Load the buffer of `record` from its backing file.
    pub fn read(record: &TileRecord) -> Result<TileBuffer, CacheError> {
        Self::read_path(record.backing_path(), &record.layout())
    }

    pub fn write_path(path: &Path, buffer: &TileBuffer) -> Result<(), CacheError> {
        let encoded = Self::encode(buffer);
        let mut writer = BufWriter::new(File::create(path)?);
        writer.write_all(&encoded)?;
        writer.flush()?;
        Ok(())
    }

    pub fn read_path(path: &Path, layout: &SampleLayout) -> Result<TileBuffer, CacheError> {
        let data = fs::read(path)?;
        Self::decode(Bytes::from(data), layout)
    }
}

fn encode_banks<T: Sample>(banks: &[Vec<T>], out: &mut BytesMut) {
    for bank in banks {
        for &sample in bank {
            sample.put(out);
        }
    }
}

fn decode_banks<T: Sample>(data: &mut Bytes, layout: &SampleLayout) -> Vec<Vec<T>> {
    (0..layout.bank_count)
        .map(|_| (0..layout.bank_len).map(|_| T::take(data)).collect())
        .collect()
}
