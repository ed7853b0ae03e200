//! Tile pixel buffers.
//!
//! A [`TileBuffer`] is a set of equally sized banks of one element type,
//! mirroring a banked raster data buffer. [`SampleLayout`] carries the
//! triple (element type, bank count, bank length) needed to reinterpret a
//! backing file.

use crate::cache::types::CacheError;
use bytes::{Buf, BufMut};
use std::fmt;

/// Element type of a tile's samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementType {
    U8,
    U16,
    I16,
    I32,
    F32,
    F64,
}

impl ElementType {
    /// Width of one element in bytes.
    pub const fn width(self) -> u64 {
        match self {
            ElementType::U8 => 1,
            ElementType::U16 | ElementType::I16 => 2,
            ElementType::I32 | ElementType::F32 => 4,
            ElementType::F64 => 8,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ElementType::U8 => "u8",
            ElementType::U16 => "u16",
            ElementType::I16 => "i16",
            ElementType::I32 => "i32",
            ElementType::F32 => "f32",
            ElementType::F64 => "f64",
        }
    }
}

/// Element layout of every tile of one owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SampleLayout {
    pub element_type: ElementType,
    pub bank_count: usize,
    /// Elements per bank.
    pub bank_len: usize,
}

impl SampleLayout {
    pub fn new(element_type: ElementType, bank_count: usize, bank_len: usize) -> Self {
        Self {
            element_type,
            bank_count,
            bank_len,
        }
    }

    /// Exact footprint of one buffer: width x elements x banks.
    pub fn byte_size(&self) -> u64 {
        self.element_type.width() * self.bank_len as u64 * self.bank_count as u64
    }
}

impl fmt::Display for SampleLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}x{}[{}]",
            self.element_type.name(),
            self.bank_count,
            self.bank_len
        )
    }
}

/// Bank storage, one variant per element type.
#[derive(Debug, Clone, PartialEq)]
pub enum Banks {
    U8(Vec<Vec<u8>>),
    U16(Vec<Vec<u16>>),
    I16(Vec<Vec<i16>>),
    I32(Vec<Vec<i32>>),
    F32(Vec<Vec<f32>>),
    F64(Vec<Vec<f64>>),
}

/// Element types a [`TileBuffer`] can hold.
///
/// Encoding is big-endian, one element after another.
pub trait Sample: Copy + Default + PartialEq + fmt::Debug + Send + Sync + 'static {
    const ELEMENT_TYPE: ElementType;

    fn wrap(banks: Vec<Vec<Self>>) -> Banks;
    fn banks(banks: &Banks) -> Option<&Vec<Vec<Self>>>;
    fn banks_mut(banks: &mut Banks) -> Option<&mut Vec<Vec<Self>>>;
    fn put(self, out: &mut impl BufMut);
    fn take(input: &mut impl Buf) -> Self;
}

macro_rules! impl_sample {
    ($ty:ty, $variant:ident, $put:ident, $get:ident) => {
        impl Sample for $ty {
            const ELEMENT_TYPE: ElementType = ElementType::$variant;

            fn wrap(banks: Vec<Vec<Self>>) -> Banks {
                Banks::$variant(banks)
            }

            fn banks(banks: &Banks) -> Option<&Vec<Vec<Self>>> {
                match banks {
                    Banks::$variant(b) => Some(b),
                    _ => None,
                }
            }

            fn banks_mut(banks: &mut Banks) -> Option<&mut Vec<Vec<Self>>> {
                match banks {
                    Banks::$variant(b) => Some(b),
                    _ => None,
                }
            }

            #[inline]
            fn put(self, out: &mut impl BufMut) {
                out.$put(self);
            }

            #[inline]
            fn take(input: &mut impl Buf) -> Self {
                input.$get()
            }
        }
    };
}

impl_sample!(u8, U8, put_u8, get_u8);
impl_sample!(u16, U16, put_u16, get_u16);
impl_sample!(i16, I16, put_i16, get_i16);
impl_sample!(i32, I32, put_i32, get_i32);
impl_sample!(f32, F32, put_f32, get_f32);
impl_sample!(f64, F64, put_f64, get_f64);

/// Dispatch `$body` over the typed bank vector inside a [`Banks`].
macro_rules! with_banks {
    ($banks:expr, $b:ident => $body:expr) => {
        match $banks {
            $crate::cache::Banks::U8($b) => $body,
            $crate::cache::Banks::U16($b) => $body,
            $crate::cache::Banks::I16($b) => $body,
            $crate::cache::Banks::I32($b) => $body,
            $crate::cache::Banks::F32($b) => $body,
            $crate::cache::Banks::F64($b) => $body,
        }
    };
}
pub(crate) use with_banks;

/// Pixel data of one tile.
#[derive(Debug, Clone, PartialEq)]
pub struct TileBuffer {
    layout: SampleLayout,
    banks: Banks,
}

impl TileBuffer {
    /// Build a buffer from typed banks. All banks must have the same length.
    pub fn from_banks<T: Sample>(banks: Vec<Vec<T>>) -> Result<Self, CacheError> {
        let Some(first) = banks.first() else {
            return Err(CacheError::InvalidBuffer("no banks".to_string()));
        };
        let bank_len = first.len();
        if let Some((idx, bank)) = banks.iter().enumerate().find(|(_, b)| b.len() != bank_len) {
            return Err(CacheError::InvalidBuffer(format!(
                "bank {} has {} elements, bank 0 has {}",
                idx,
                bank.len(),
                bank_len
            )));
        }
        Ok(Self {
            layout: SampleLayout::new(T::ELEMENT_TYPE, banks.len(), bank_len),
            banks: T::wrap(banks),
        })
    }

    /// Single-bank convenience constructor.
    pub fn from_samples<T: Sample>(samples: Vec<T>) -> Self {
        Self {
            layout: SampleLayout::new(T::ELEMENT_TYPE, 1, samples.len()),
            banks: T::wrap(vec![samples]),
        }
    }

    /// Zero-filled buffer for `layout`.
    pub fn zeroed(layout: SampleLayout) -> Self {
        fn zeros<T: Sample>(layout: &SampleLayout) -> Vec<Vec<T>> {
            vec![vec![T::default(); layout.bank_len]; layout.bank_count]
        }
        let banks = match layout.element_type {
            ElementType::U8 => Banks::U8(zeros(&layout)),
            ElementType::U16 => Banks::U16(zeros(&layout)),
            ElementType::I16 => Banks::I16(zeros(&layout)),
            ElementType::I32 => Banks::I32(zeros(&layout)),
            ElementType::F32 => Banks::F32(zeros(&layout)),
            ElementType::F64 => Banks::F64(zeros(&layout)),
        };
        Self { layout, banks }
    }

    pub fn layout(&self) -> SampleLayout {
        self.layout
    }

    pub fn byte_size(&self) -> u64 {
        self.layout.byte_size()
    }

    pub fn banks(&self) -> &Banks {
        &self.banks
    }

    /// Bank `index` as `T`, or `None` if the type or index does not match.
    pub fn bank<T: Sample>(&self, index: usize) -> Option<&[T]> {
        T::banks(&self.banks)?.get(index).map(Vec::as_slice)
    }

    /// Mutable bank access. Bank lengths cannot change through this slice.
    pub fn bank_mut<T: Sample>(&mut self, index: usize) -> Option<&mut [T]> {
        T::banks_mut(&mut self.banks)?
            .get_mut(index)
            .map(Vec::as_mut_slice)
    }
}
