//! Scalar data types shared by the device and runtime layers.
//!
//! Kernel arguments are either buffers or fixed-size scalars; this crate describes the
//! scalar side: which primitive types exist ([`ScalarDType`]), how a typed value is carried
//! ([`ScalarValue`]) and which class of device runs a kernel ([`DeviceClass`]).

pub mod ext;
pub mod value;


pub use ext::HasDType;
pub use value::ScalarValue;

/// Scalar data types accepted as by-value kernel arguments.
///
/// The discriminant doubles as the type code of serialized argument arrays, so values are
/// stable and must never be renumbered.
#[derive(Debug, Hash, PartialOrd, Ord)]
#[derive(strum::EnumCount, strum::EnumIter, strum::VariantArray, strum::FromRepr, strum::Display)]
#[derive(Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "proptest", derive(proptest_derive::Arbitrary))]
#[repr(u8)]
pub enum ScalarDType {
    Bool = 0,

    Int8 = 1,
    UInt8 = 2,
    Int16 = 3,
    UInt16 = 4,
    Int32 = 5,
    UInt32 = 6,
    Int64 = 7,
    UInt64 = 8,

    Float32 = 13,
    Float64 = 14,
}

impl ScalarDType {
    pub const fn bytes(&self) -> usize {
        match self {
            Self::Bool | Self::Int8 | Self::UInt8 => 1,
            Self::Int16 | Self::UInt16 => 2,
            Self::Int32 | Self::UInt32 | Self::Float32 => 4,
            Self::Int64 | Self::UInt64 | Self::Float64 => 8,
        }
    }

    pub const fn is_bool(&self) -> bool {
        matches!(self, Self::Bool)
    }

    pub const fn is_signed(&self) -> bool {
        matches!(self, Self::Int8 | Self::Int16 | Self::Int32 | Self::Int64)
    }

    pub const fn is_unsigned(&self) -> bool {
        matches!(self, Self::UInt8 | Self::UInt16 | Self::UInt32 | Self::UInt64)
    }

    pub const fn is_int(&self) -> bool {
        self.is_signed() || self.is_unsigned()
    }

    pub const fn is_float(&self) -> bool {
        matches!(self, Self::Float32 | Self::Float64)
    }

    /// Type code used on the wire.
    pub const fn code(&self) -> u8 {
        *self as u8
    }

    /// Inverse of [`ScalarDType::code`].
    pub fn from_code(code: u8) -> Option<Self> {
        Self::from_repr(code)
    }

    /// Spelling of the type in OpenCL C kernel signatures.
    pub const fn c_style(&self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::Int8 => "char",
            Self::Int16 => "short",
            Self::Int32 => "int",
            Self::Int64 => "long",
            Self::UInt8 => "uchar",
            Self::UInt16 => "ushort",
            Self::UInt32 => "uint",
            Self::UInt64 => "ulong",
            Self::Float32 => "float",
            Self::Float64 => "double",
        }
    }
}

/// Class of compute device a backend drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[derive(strum::Display, strum::EnumString, strum::EnumIter)]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
pub enum DeviceClass {
    /// CPU device; the default when no class is requested.
    #[default]
    Cpu,
    /// Discrete or integrated GPU.
    Gpu,
}
