//! Primitive value kinds and typed columns.
//!
//! Every array the engine reads, writes or exchanges is a [`Column`]: a
//! closed tagged variant over the fixed set of numeric kinds. Typed access
//! goes through the [`Primitive`] trait, so callers can write
//! `column.as_slice::<f32>()` without matching on the variant themselves.

use std::fmt;
use std::ops::Range;

use bytes::{Buf, BufMut};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// The closed set of primitive kinds a column can hold.
///
/// `U64` only appears in pointer arrays; attributes use
/// [`ValueKind::ATTRIBUTE_KINDS`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ValueKind {
    F32,
    U8,
    U16,
    U32,
    I8,
    I16,
    I32,
    U64,
}

impl ValueKind {
    /// Kinds allowed for named attributes, in schema order.
    pub const ATTRIBUTE_KINDS: [ValueKind; 7] = [
        ValueKind::F32,
        ValueKind::U8,
        ValueKind::U16,
        ValueKind::U32,
        ValueKind::I8,
        ValueKind::I16,
        ValueKind::I32,
    ];

    pub fn type_name(self) -> &'static str {
        match self {
            ValueKind::F32 => "f32",
            ValueKind::U8 => "u8",
            ValueKind::U16 => "u16",
            ValueKind::U32 => "u32",
            ValueKind::I8 => "i8",
            ValueKind::I16 => "i16",
            ValueKind::I32 => "i32",
            ValueKind::U64 => "u64",
        }
    }

    /// Width of one value in bytes.
    pub fn width(self) -> usize {
        match self {
            ValueKind::U8 | ValueKind::I8 => 1,
            ValueKind::U16 | ValueKind::I16 => 2,
            ValueKind::F32 | ValueKind::U32 | ValueKind::I32 => 4,
            ValueKind::U64 => 8,
        }
    }

    pub fn is_attribute(self) -> bool {
        self != ValueKind::U64
    }

    /// Wire tag used by the exchange codec.
    pub fn tag(self) -> u8 {
        match self {
            ValueKind::F32 => 0,
            ValueKind::U8 => 1,
            ValueKind::U16 => 2,
            ValueKind::U32 => 3,
            ValueKind::I8 => 4,
            ValueKind::I16 => 5,
            ValueKind::I32 => 6,
            ValueKind::U64 => 7,
        }
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        Some(match tag {
            0 => ValueKind::F32,
            1 => ValueKind::U8,
            2 => ValueKind::U16,
            3 => ValueKind::U32,
            4 => ValueKind::I8,
            5 => ValueKind::I16,
            6 => ValueKind::I32,
            7 => ValueKind::U64,
            _ => return None,
        })
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name())
    }
}

/// A homogeneous array of one primitive kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "values")]
pub enum Column {
    F32(Vec<f32>),
    U8(Vec<u8>),
    U16(Vec<u16>),
    U32(Vec<u32>),
    I8(Vec<i8>),
    I16(Vec<i16>),
    I32(Vec<i32>),
    U64(Vec<u64>),
}

/// Run `$body` with `$v` bound to the inner `Vec` of whichever variant
/// `$col` holds.
macro_rules! with_column {
    ($col:expr, $v:ident => $body:expr) => {
        match $col {
            Column::F32($v) => $body,
            Column::U8($v) => $body,
            Column::U16($v) => $body,
            Column::U32($v) => $body,
            Column::I8($v) => $body,
            Column::I16($v) => $body,
            Column::I32($v) => $body,
            Column::U64($v) => $body,
        }
    };
}

/// Same-kind pairing of two columns; `$mismatch` runs when kinds differ.
macro_rules! with_column_pair {
    ($a:expr, $b:expr, ($x:ident, $y:ident) => $body:expr, _ => $mismatch:expr) => {
        match ($a, $b) {
            (Column::F32($x), Column::F32($y)) => $body,
            (Column::U8($x), Column::U8($y)) => $body,
            (Column::U16($x), Column::U16($y)) => $body,
            (Column::U32($x), Column::U32($y)) => $body,
            (Column::I8($x), Column::I8($y)) => $body,
            (Column::I16($x), Column::I16($y)) => $body,
            (Column::I32($x), Column::I32($y)) => $body,
            (Column::U64($x), Column::U64($y)) => $body,
            _ => $mismatch,
        }
    };
}

impl Column {
    /// An empty column of the given kind.
    pub fn new(kind: ValueKind) -> Self {
        Self::with_capacity(kind, 0)
    }

    pub fn with_capacity(kind: ValueKind, n: usize) -> Self {
        match kind {
            ValueKind::F32 => Column::F32(Vec::with_capacity(n)),
            ValueKind::U8 => Column::U8(Vec::with_capacity(n)),
            ValueKind::U16 => Column::U16(Vec::with_capacity(n)),
            ValueKind::U32 => Column::U32(Vec::with_capacity(n)),
            ValueKind::I8 => Column::I8(Vec::with_capacity(n)),
            ValueKind::I16 => Column::I16(Vec::with_capacity(n)),
            ValueKind::I32 => Column::I32(Vec::with_capacity(n)),
            ValueKind::U64 => Column::U64(Vec::with_capacity(n)),
        }
    }

    pub fn kind(&self) -> ValueKind {
        match self {
            Column::F32(_) => ValueKind::F32,
            Column::U8(_) => ValueKind::U8,
            Column::U16(_) => ValueKind::U16,
            Column::U32(_) => ValueKind::U32,
            Column::I8(_) => ValueKind::I8,
            Column::I16(_) => ValueKind::I16,
            Column::I32(_) => ValueKind::I32,
            Column::U64(_) => ValueKind::U64,
        }
    }

    pub fn len(&self) -> usize {
        with_column!(self, v => v.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Typed view; `None` if `T` is not this column's kind.
    pub fn as_slice<T: Primitive>(&self) -> Option<&[T]> {
        T::column(self).map(Vec::as_slice)
    }

    pub fn as_vec_mut<T: Primitive>(&mut self) -> Option<&mut Vec<T>> {
        T::column_mut(self)
    }

    /// Consume into a typed vector.
    pub fn into_vec<T: Primitive>(self) -> Result<Vec<T>> {
        let got = self.kind();
        T::from_column(self).ok_or_else(|| Error::TypeError {
            expected: T::KIND.to_string(),
            got: got.to_string(),
        })
    }

    /// Copy of the values in `range`.
    pub fn slice(&self, range: Range<usize>) -> Result<Column> {
        if range.start > range.end || range.end > self.len() {
            return Err(Error::ContractViolation(format!(
                "column slice {}..{} out of bounds for length {}",
                range.start,
                range.end,
                self.len()
            )));
        }
        Ok(match self {
            Column::F32(v) => Column::F32(v[range].to_vec()),
            Column::U8(v) => Column::U8(v[range].to_vec()),
            Column::U16(v) => Column::U16(v[range].to_vec()),
            Column::U32(v) => Column::U32(v[range].to_vec()),
            Column::I8(v) => Column::I8(v[range].to_vec()),
            Column::I16(v) => Column::I16(v[range].to_vec()),
            Column::I32(v) => Column::I32(v[range].to_vec()),
            Column::U64(v) => Column::U64(v[range].to_vec()),
        })
    }

    /// Append the value at `idx` of `other`, which must have the same kind.
    pub fn push_from(&mut self, other: &Column, idx: usize) -> Result<()> {
        let (want, got) = (self.kind(), other.kind());
        with_column_pair!(self, other, (dst, src) => {
            let value = src.get(idx).copied().ok_or_else(|| {
                Error::ContractViolation(format!(
                    "record {idx} out of bounds for {got} column of length {}",
                    src.len()
                ))
            })?;
            dst.push(value);
            Ok(())
        }, _ => Err(Error::TypeError { expected: want.to_string(), got: got.to_string() }))
    }

    /// Append all values of `other`, which must have the same kind.
    pub fn extend_from(&mut self, other: &Column) -> Result<()> {
        let (want, got) = (self.kind(), other.kind());
        with_column_pair!(self, other, (dst, src) => {
            dst.extend_from_slice(src);
            Ok(())
        }, _ => Err(Error::TypeError { expected: want.to_string(), got: got.to_string() }))
    }

    /// Append the values as little-endian bytes.
    pub fn encode<B: BufMut>(&self, buf: &mut B) {
        match self {
            Column::F32(v) => v.iter().for_each(|x| buf.put_f32_le(*x)),
            Column::U8(v) => buf.put_slice(v),
            Column::U16(v) => v.iter().for_each(|x| buf.put_u16_le(*x)),
            Column::U32(v) => v.iter().for_each(|x| buf.put_u32_le(*x)),
            Column::I8(v) => v.iter().for_each(|x| buf.put_i8(*x)),
            Column::I16(v) => v.iter().for_each(|x| buf.put_i16_le(*x)),
            Column::I32(v) => v.iter().for_each(|x| buf.put_i32_le(*x)),
            Column::U64(v) => v.iter().for_each(|x| buf.put_u64_le(*x)),
        }
    }

    /// Read `n` little-endian values of `kind`.
    pub fn decode<B: Buf>(kind: ValueKind, n: usize, buf: &mut B) -> Result<Column> {
        let need = n.checked_mul(kind.width()).ok_or_else(|| {
            Error::DecodeError(format!("column length {n} overflows"))
        })?;
        if buf.remaining() < need {
            return Err(Error::DecodeError(format!(
                "truncated {kind} column: need {need} bytes, have {}",
                buf.remaining()
            )));
        }
        Ok(match kind {
            ValueKind::F32 => Column::F32((0..n).map(|_| buf.get_f32_le()).collect()),
            ValueKind::U8 => {
                let mut v = vec![0u8; n];
                buf.copy_to_slice(&mut v);
                Column::U8(v)
            }
            ValueKind::U16 => Column::U16((0..n).map(|_| buf.get_u16_le()).collect()),
            ValueKind::U32 => Column::U32((0..n).map(|_| buf.get_u32_le()).collect()),
            ValueKind::I8 => Column::I8((0..n).map(|_| buf.get_i8()).collect()),
            ValueKind::I16 => Column::I16((0..n).map(|_| buf.get_i16_le()).collect()),
            ValueKind::I32 => Column::I32((0..n).map(|_| buf.get_i32_le()).collect()),
            ValueKind::U64 => Column::U64((0..n).map(|_| buf.get_u64_le()).collect()),
        })
    }
}

// ============================================================================
// Typed access
// ============================================================================

/// A Rust primitive that maps onto exactly one [`ValueKind`].
pub trait Primitive: Copy + PartialEq + fmt::Debug + Send + Sync + 'static {
    const KIND: ValueKind;

    fn column(col: &Column) -> Option<&Vec<Self>>;
    fn column_mut(col: &mut Column) -> Option<&mut Vec<Self>>;
    fn from_column(col: Column) -> Option<Vec<Self>>;
    fn into_column(values: Vec<Self>) -> Column;
}

macro_rules! impl_primitive {
    ($t:ty, $variant:ident) => {
        impl Primitive for $t {
            const KIND: ValueKind = ValueKind::$variant;

            fn column(col: &Column) -> Option<&Vec<Self>> {
                match col {
                    Column::$variant(v) => Some(v),
                    _ => None,
                }
            }

            fn column_mut(col: &mut Column) -> Option<&mut Vec<Self>> {
                match col {
                    Column::$variant(v) => Some(v),
                    _ => None,
                }
            }

            fn from_column(col: Column) -> Option<Vec<Self>> {
                match col {
                    Column::$variant(v) => Some(v),
                    _ => None,
                }
            }

            fn into_column(values: Vec<Self>) -> Column {
                Column::$variant(values)
            }
        }

        impl From<Vec<$t>> for Column {
            fn from(v: Vec<$t>) -> Self {
                Column::$variant(v)
            }
        }
    };
}

impl_primitive!(f32, F32);
impl_primitive!(u8, U8);
impl_primitive!(u16, U16);
impl_primitive!(u32, U32);
impl_primitive!(i8, I8);
impl_primitive!(i16, I16);
impl_primitive!(i32, I32);
impl_primitive!(u64, U64);

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    #[test]
    fn test_typed_access() {
        let col = Column::from(vec![1.5f32, 2.5]);
        assert_eq!(col.kind(), ValueKind::F32);
        assert_eq!(col.as_slice::<f32>(), Some(&[1.5f32, 2.5][..]));
        assert_eq!(col.as_slice::<u32>(), None);
        assert!(col.clone().into_vec::<u8>().is_err());
    }

    #[test]
    fn test_push_from_kind_mismatch() {
        let mut a = Column::new(ValueKind::U16);
        let b = Column::from(vec![1u32]);
        assert!(matches!(a.push_from(&b, 0), Err(Error::TypeError { .. })));
        let c = Column::from(vec![7u16, 9]);
        a.push_from(&c, 1).unwrap();
        assert_eq!(a, Column::from(vec![9u16]));
        assert!(a.push_from(&c, 5).is_err());
    }

    #[test]
    fn test_encode_decode_every_kind() {
        let cols = vec![
            Column::from(vec![0.25f32, -1.0]),
            Column::from(vec![1u8, 255]),
            Column::from(vec![65535u16]),
            Column::from(vec![u32::MAX, 0]),
            Column::from(vec![-128i8]),
            Column::from(vec![-2i16, 3]),
            Column::from(vec![i32::MIN]),
            Column::from(vec![u64::MAX]),
        ];
        for col in cols {
            let mut buf = BytesMut::new();
            col.encode(&mut buf);
            assert_eq!(buf.len(), col.len() * col.kind().width());
            let mut rd = &buf[..];
            let back = Column::decode(col.kind(), col.len(), &mut rd).unwrap();
            assert_eq!(back, col);
        }
    }

    #[test]
    fn test_decode_truncated() {
        let mut rd: &[u8] = &[1, 2, 3];
        assert!(matches!(
            Column::decode(ValueKind::U32, 1, &mut rd),
            Err(Error::DecodeError(_))
        ));
    }

    #[test]
    fn test_tags_roundtrip() {
        for kind in ValueKind::ATTRIBUTE_KINDS.into_iter().chain([ValueKind::U64]) {
            assert_eq!(ValueKind::from_tag(kind.tag()), Some(kind));
        }
        assert_eq!(ValueKind::from_tag(42), None);
        assert!(!ValueKind::U64.is_attribute());
    }
}
