use crate::*;
use proptest::prelude::*;

pub fn int_dtype() -> impl Strategy<Value = ScalarDType> {
    prop_oneof![
        Just(ScalarDType::Int8),
        Just(ScalarDType::Int16),
        Just(ScalarDType::Int32),
        Just(ScalarDType::Int64),
        Just(ScalarDType::UInt8),
        Just(ScalarDType::UInt16),
        Just(ScalarDType::UInt32),
        Just(ScalarDType::UInt64),
    ]
}

pub fn float_dtype() -> impl Strategy<Value = ScalarDType> {
    prop_oneof![Just(ScalarDType::Float32), Just(ScalarDType::Float64)]
}

pub fn scalar_generator() -> impl Strategy<Value = ScalarDType> {
    prop_oneof![Just(ScalarDType::Bool), int_dtype(), float_dtype()]
}

/// Types narrower than 64 bits.
pub fn narrow_dtype() -> impl Strategy<Value = ScalarDType> {
    scalar_generator().prop_filter("narrower than u64", |dtype| dtype.bytes() < 8)
}

#[rustfmt::skip]
pub fn scalar_value() -> impl Strategy<Value = ScalarValue> {
    prop_oneof![
        any::<bool>().prop_map(ScalarValue::Bool),
        any::<i8>().prop_map(ScalarValue::Int8), any::<u8>().prop_map(ScalarValue::UInt8),
        any::<i16>().prop_map(ScalarValue::Int16), any::<u16>().prop_map(ScalarValue::UInt16),
        any::<i32>().prop_map(ScalarValue::Int32), any::<u32>().prop_map(ScalarValue::UInt32),
        any::<i64>().prop_map(ScalarValue::Int64), any::<u64>().prop_map(ScalarValue::UInt64),
        any::<f32>().prop_map(ScalarValue::Float32), any::<f64>().prop_map(ScalarValue::Float64),
    ]
}
