//! Conversions between Rust types and [`Value`].
//!
//! Arguments go out through [`ToValue`] / [`ToArgs`]; result rows come back
//! through [`FromValue`] / [`FromRow`].

mod row;

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};

use crate::error::{Error, Result};
use crate::value::Value;

pub use row::FromRow;

/// Trait for encoding a Rust value as a bound argument.
pub trait ToValue {
    /// Convert into a wire value.
    fn to_value(&self) -> Value;
}

/// Trait for decoding a column value into a Rust type.
pub trait FromValue: Sized {
    /// Decode from a non-null value.
    fn from_value(value: &Value) -> Result<Self>;

    /// Decode from NULL.
    ///
    /// Default implementation returns an error. Override for types that can
    /// represent NULL (like `Option<T>`).
    fn from_null() -> Result<Self> {
        Err(Error::Decode("unexpected NULL value".into()))
    }
}

/// Decode one column, dispatching NULL to [`FromValue::from_null`].
pub fn decode_column<T: FromValue>(value: &Value) -> Result<T> {
    match value {
        Value::Null => T::from_null(),
        other => T::from_value(other),
    }
}

fn mismatch<T>(expected: &str, value: &Value) -> Result<T> {
    Err(Error::Decode(format!(
        "cannot decode {} as {}",
        value.kind(),
        expected
    )))
}

// === ToValue implementations ===

impl ToValue for Value {
    fn to_value(&self) -> Value {
        self.clone()
    }
}

impl ToValue for bool {
    fn to_value(&self) -> Value {
        Value::Bool(*self)
    }
}

macro_rules! impl_to_value_int {
    ($($t:ty),+) => {
        $(
            impl ToValue for $t {
                fn to_value(&self) -> Value {
                    Value::Int(i64::from(*self))
                }
            }
        )+
    };
}

impl_to_value_int!(i8, i16, i32, i64, u8, u16, u32);

impl ToValue for f32 {
    fn to_value(&self) -> Value {
        Value::Float(f64::from(*self))
    }
}

impl ToValue for f64 {
    fn to_value(&self) -> Value {
        Value::Float(*self)
    }
}

impl ToValue for str {
    fn to_value(&self) -> Value {
        Value::Str(self.to_string())
    }
}

impl ToValue for String {
    fn to_value(&self) -> Value {
        Value::Str(self.clone())
    }
}

impl ToValue for [u8] {
    fn to_value(&self) -> Value {
        Value::Bytes(self.to_vec())
    }
}

impl ToValue for Vec<u8> {
    fn to_value(&self) -> Value {
        Value::Bytes(self.clone())
    }
}

/// Instants are normalized to UTC before they are split into a wire pair.
impl<Tz: TimeZone> ToValue for DateTime<Tz> {
    fn to_value(&self) -> Value {
        Value::Timestamp(self.with_timezone(&Utc))
    }
}

/// Naive date-times are taken to be UTC.
impl ToValue for NaiveDateTime {
    fn to_value(&self) -> Value {
        Value::Timestamp(self.and_utc())
    }
}

impl<T: ToValue> ToValue for Option<T> {
    fn to_value(&self) -> Value {
        match self {
            Some(v) => v.to_value(),
            None => Value::Null,
        }
    }
}

impl<T: ToValue + ?Sized> ToValue for &T {
    fn to_value(&self) -> Value {
        (*self).to_value()
    }
}

// === FromValue implementations ===

impl FromValue for Value {
    fn from_value(value: &Value) -> Result<Self> {
        Ok(value.clone())
    }

    fn from_null() -> Result<Self> {
        Ok(Value::Null)
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: &Value) -> Result<Self> {
        T::from_value(value).map(Some)
    }

    fn from_null() -> Result<Self> {
        Ok(None)
    }
}

impl FromValue for bool {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Bool(v) => Ok(*v),
            Value::Int(v) => Ok(*v != 0),
            other => mismatch("bool", other),
        }
    }
}

macro_rules! impl_from_value_int {
    ($($t:ty),+) => {
        $(
            impl FromValue for $t {
                fn from_value(value: &Value) -> Result<Self> {
                    match value {
                        Value::Int(v) => <$t>::try_from(*v).map_err(|_| {
                            Error::Decode(format!(
                                "value {} out of range for {}",
                                v,
                                stringify!($t)
                            ))
                        }),
                        other => mismatch(stringify!($t), other),
                    }
                }
            }
        )+
    };
}

impl_from_value_int!(i8, i16, i32, i64, u8, u16, u32, u64);

impl FromValue for f64 {
    fn from_value(value: &Value) -> Result<Self> {
        value.as_f64().map_or_else(|| mismatch("f64", value), Ok)
    }
}

impl FromValue for f32 {
    fn from_value(value: &Value) -> Result<Self> {
        value
            .as_f64()
            .map_or_else(|| mismatch("f32", value), |v| Ok(v as f32))
    }
}

impl FromValue for String {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Str(s) => Ok(s.clone()),
            other => mismatch("String", other),
        }
    }
}

impl FromValue for Vec<u8> {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Bytes(b) => Ok(b.clone()),
            Value::Str(s) => Ok(s.as_bytes().to_vec()),
            other => mismatch("Vec<u8>", other),
        }
    }
}

impl FromValue for DateTime<Utc> {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Timestamp(tm) => Ok(*tm),
            other => mismatch("DateTime<Utc>", other),
        }
    }
}

// === ToArgs implementations ===

/// Trait for encoding a whole argument list.
pub trait ToArgs {
    /// Number of arguments.
    fn arg_count(&self) -> usize;

    /// Convert all arguments.
    fn to_args(&self) -> Vec<Value>;
}

impl ToArgs for () {
    fn arg_count(&self) -> usize {
        0
    }

    fn to_args(&self) -> Vec<Value> {
        Vec::new()
    }
}

impl ToArgs for [Value] {
    fn arg_count(&self) -> usize {
        self.len()
    }

    fn to_args(&self) -> Vec<Value> {
        self.to_vec()
    }
}

impl ToArgs for Vec<Value> {
    fn arg_count(&self) -> usize {
        self.len()
    }

    fn to_args(&self) -> Vec<Value> {
        self.clone()
    }
}

impl<T: ToArgs + ?Sized> ToArgs for &T {
    fn arg_count(&self) -> usize {
        (*self).arg_count()
    }

    fn to_args(&self) -> Vec<Value> {
        (*self).to_args()
    }
}

// Tuple implementations via macro
macro_rules! impl_to_args {
    ($count:expr, $($idx:tt: $T:ident),+) => {
        impl<$($T: ToValue),+> ToArgs for ($($T,)+) {
            fn arg_count(&self) -> usize {
                $count
            }

            fn to_args(&self) -> Vec<Value> {
                vec![$(self.$idx.to_value()),+]
            }
        }
    };
}

impl_to_args!(1, 0: T0);
impl_to_args!(2, 0: T0, 1: T1);
impl_to_args!(3, 0: T0, 1: T1, 2: T2);
impl_to_args!(4, 0: T0, 1: T1, 2: T2, 3: T3);
impl_to_args!(5, 0: T0, 1: T1, 2: T2, 3: T3, 4: T4);
impl_to_args!(6, 0: T0, 1: T1, 2: T2, 3: T3, 4: T4, 5: T5);
impl_to_args!(7, 0: T0, 1: T1, 2: T2, 3: T3, 4: T4, 5: T5, 6: T6);
impl_to_args!(8, 0: T0, 1: T1, 2: T2, 3: T3, 4: T4, 5: T5, 6: T6, 7: T7);
impl_to_args!(9, 0: T0, 1: T1, 2: T2, 3: T3, 4: T4, 5: T5, 6: T6, 7: T7, 8: T8);
impl_to_args!(10, 0: T0, 1: T1, 2: T2, 3: T3, 4: T4, 5: T5, 6: T6, 7: T7, 8: T8, 9: T9);
impl_to_args!(11, 0: T0, 1: T1, 2: T2, 3: T3, 4: T4, 5: T5, 6: T6, 7: T7, 8: T8, 9: T9, 10: T10);
impl_to_args!(12, 0: T0, 1: T1, 2: T2, 3: T3, 4: T4, 5: T5, 6: T6, 7: T7, 8: T8, 9: T9, 10: T10, 11: T11);
