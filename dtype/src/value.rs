//! Typed scalar payloads.

use std::fmt;

use smallvec::SmallVec;

use crate::ScalarDType;

/// A fixed-size scalar bound by value to a kernel argument slot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScalarValue {
    Bool(bool),
    Int8(i8),
    UInt8(u8),
    Int16(i16),
    UInt16(u16),
    Int32(i32),
    UInt32(u32),
    Int64(i64),
    UInt64(u64),
    Float32(f32),
    Float64(f64),
}

impl ScalarValue {
    pub const fn dtype(&self) -> ScalarDType {
        match self {
            Self::Bool(_) => ScalarDType::Bool,
            Self::Int8(_) => ScalarDType::Int8,
            Self::UInt8(_) => ScalarDType::UInt8,
            Self::Int16(_) => ScalarDType::Int16,
            Self::UInt16(_) => ScalarDType::UInt16,
            Self::Int32(_) => ScalarDType::Int32,
            Self::UInt32(_) => ScalarDType::UInt32,
            Self::Int64(_) => ScalarDType::Int64,
            Self::UInt64(_) => ScalarDType::UInt64,
            Self::Float32(_) => ScalarDType::Float32,
            Self::Float64(_) => ScalarDType::Float64,
        }
    }

    /// Raw bit pattern, zero-extended to 64 bits.
    pub const fn to_bits(&self) -> u64 {
        match *self {
            Self::Bool(v) => v as u64,
            Self::Int8(v) => v as u8 as u64,
            Self::UInt8(v) => v as u64,
            Self::Int16(v) => v as u16 as u64,
            Self::UInt16(v) => v as u64,
            Self::Int32(v) => v as u32 as u64,
            Self::UInt32(v) => v as u64,
            Self::Int64(v) => v as u64,
            Self::UInt64(v) => v,
            Self::Float32(v) => v.to_bits() as u64,
            Self::Float64(v) => v.to_bits(),
        }
    }

    /// Rebuild a value from the low `dtype.bytes()` bytes of `bits`.
    ///
    /// Returns `None` when `bits` carries data above the width of `dtype`, or when a `Bool`
    /// payload is neither 0 nor 1.
    pub fn from_bits(dtype: ScalarDType, bits: u64) -> Option<Self> {
        let width = dtype.bytes() * 8;
        if width < 64 && bits >> width != 0 {
            return None;
        }

        Some(match dtype {
            ScalarDType::Bool => match bits {
                0 => Self::Bool(false),
                1 => Self::Bool(true),
                _ => return None,
            },
            ScalarDType::Int8 => Self::Int8(bits as u8 as i8),
            ScalarDType::UInt8 => Self::UInt8(bits as u8),
            ScalarDType::Int16 => Self::Int16(bits as u16 as i16),
            ScalarDType::UInt16 => Self::UInt16(bits as u16),
            ScalarDType::Int32 => Self::Int32(bits as u32 as i32),
            ScalarDType::UInt32 => Self::UInt32(bits as u32),
            ScalarDType::Int64 => Self::Int64(bits as i64),
            ScalarDType::UInt64 => Self::UInt64(bits),
            ScalarDType::Float32 => Self::Float32(f32::from_bits(bits as u32)),
            ScalarDType::Float64 => Self::Float64(f64::from_bits(bits)),
        })
    }

    /// Native-endian bytes exactly as a kernel parameter of this type expects them.
    pub fn to_ne_bytes(&self) -> SmallVec<[u8; 8]> {
        match *self {
            Self::Bool(v) => SmallVec::from_slice(&[v as u8]),
            Self::Int8(v) => SmallVec::from_slice(&v.to_ne_bytes()),
            Self::UInt8(v) => SmallVec::from_slice(&v.to_ne_bytes()),
            Self::Int16(v) => SmallVec::from_slice(&v.to_ne_bytes()),
            Self::UInt16(v) => SmallVec::from_slice(&v.to_ne_bytes()),
            Self::Int32(v) => SmallVec::from_slice(&v.to_ne_bytes()),
            Self::UInt32(v) => SmallVec::from_slice(&v.to_ne_bytes()),
            Self::Int64(v) => SmallVec::from_slice(&v.to_ne_bytes()),
            Self::UInt64(v) => SmallVec::from_slice(&v.to_ne_bytes()),
            Self::Float32(v) => SmallVec::from_slice(&v.to_ne_bytes()),
            Self::Float64(v) => SmallVec::from_slice(&v.to_ne_bytes()),
        }
    }

    /// Integer view of the value, if it is integral and fits in `i64`.
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Self::Bool(v) => Some(v as i64),
            Self::Int8(v) => Some(v as i64),
            Self::UInt8(v) => Some(v as i64),
            Self::Int16(v) => Some(v as i64),
            Self::UInt16(v) => Some(v as i64),
            Self::Int32(v) => Some(v as i64),
            Self::UInt32(v) => Some(v as i64),
            Self::Int64(v) => Some(v),
            Self::UInt64(v) => i64::try_from(v).ok(),
            Self::Float32(_) | Self::Float64(_) => None,
        }
    }

    pub fn as_f64(&self) -> f64 {
        match *self {
            Self::Float32(v) => v as f64,
            Self::Float64(v) => v,
            Self::UInt64(v) => v as f64,
            _ => self.as_i64().unwrap_or_default() as f64,
        }
    }
}

impl fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}) ", self.dtype().c_style())?;
        match self {
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int8(v) => write!(f, "{v}"),
            Self::UInt8(v) => write!(f, "{v}"),
            Self::Int16(v) => write!(f, "{v}"),
            Self::UInt16(v) => write!(f, "{v}"),
            Self::Int32(v) => write!(f, "{v}"),
            Self::UInt32(v) => write!(f, "{v}"),
            Self::Int64(v) => write!(f, "{v}"),
            Self::UInt64(v) => write!(f, "{v}"),
            Self::Float32(v) => write!(f, "{v:?}"),
            Self::Float64(v) => write!(f, "{v:?}"),
        }
    }
}
