use super::*;

/// Rust primitives that map onto a kernel scalar type.
pub trait HasDType: Copy {
    const DTYPE: ScalarDType;

    fn into_scalar(self) -> ScalarValue;

    /// The payload of `value` if it holds exactly this type.
    fn from_scalar(value: ScalarValue) -> Option<Self>;
}

macro_rules! impl_dtype_ext {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl HasDType for $ty {
                const DTYPE: ScalarDType = ScalarDType::$variant;

                fn into_scalar(self) -> ScalarValue {
                    ScalarValue::$variant(self)
                }

                fn from_scalar(value: ScalarValue) -> Option<Self> {
                    match value {
                        ScalarValue::$variant(v) => Some(v),
                        _ => None,
                    }
                }
            }

            impl From<$ty> for ScalarValue {
                fn from(value: $ty) -> Self {
                    ScalarValue::$variant(value)
                }
            }
        )*
    };
}

impl_dtype_ext! {
    bool => Bool,
    i8 => Int8, i16 => Int16, i32 => Int32, i64 => Int64,
    u8 => UInt8, u16 => UInt16, u32 => UInt32, u64 => UInt64,
    f32 => Float32, f64 => Float64,
}
