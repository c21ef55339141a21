use std::cmp::Ordering;
use std::fmt::{Debug, Display};
use std::panic::RefUnwindSafe;

use num_traits::{AsPrimitive, NumCast, Zero};
use static_assertions::const_assert_eq;

use crate::DataType;

const_assert_eq!(size_of::<i32>(), 4);
const_assert_eq!(size_of::<f64>(), 8);

/// A Rust type backing one of the numeric [`DataType`]s.
///
/// Values are stored native endian in mapped files, so implementors must be plain old data.
pub trait NativeType:
    Send
    + Sync
    + Clone
    + Copy
    + Debug
    + Display
    + Default
    + PartialEq
    + PartialOrd
    + RefUnwindSafe
    + NumCast
    + Zero
    + AsPrimitive<f64>
    + AsPrimitive<i64>
    + 'static
{
    /// The data type this Rust type represents.
    const DTYPE: DataType;

    /// Whether values are floating point.
    const IS_FLOAT: bool;

    /// Convert from an `f64` with `as` semantics (truncating, saturating).
    fn from_f64(value: f64) -> Self;

    /// Convert from an `i64` with `as` semantics.
    fn from_i64(value: i64) -> Self;

    /// Widen to `f64`.
    #[inline]
    fn as_f64(self) -> f64 {
        self.as_()
    }

    /// Convert to `i64` with `as` semantics.
    #[inline]
    fn as_i64(self) -> i64 {
        self.as_()
    }

    /// Cast into another native type, going through `i64` for integers so that no precision
    /// is lost between integral types.
    #[inline]
    fn cast<U: NativeType>(self) -> U {
        if Self::IS_FLOAT {
            U::from_f64(self.as_f64())
        } else {
            U::from_i64(self.as_i64())
        }
    }

    /// Compare against a value of any native type.
    ///
    /// Integral pairs compare as `i64`, anything involving a float compares as `f64`. Returns
    /// `None` when either side is NaN.
    #[inline]
    fn compare<U: NativeType>(self, other: U) -> Option<Ordering> {
        if Self::IS_FLOAT || U::IS_FLOAT {
            self.as_f64().partial_cmp(&other.as_f64())
        } else {
            Some(self.as_i64().cmp(&other.as_i64()))
        }
    }

    /// A total order over values of the same type, used for sorting and binary search.
    fn total_compare(self, other: Self) -> Ordering;

    /// Addition, wrapping on integer overflow.
    fn add_wrapping(self, rhs: Self) -> Self;

    /// Subtraction, wrapping on integer overflow.
    fn sub_wrapping(self, rhs: Self) -> Self;

    /// Multiplication, wrapping on integer overflow.
    fn mul_wrapping(self, rhs: Self) -> Self;

    /// Division. `None` only for integer division by zero.
    fn div_checked(self, rhs: Self) -> Option<Self>;

    /// Remainder (`fmod` for floats). `None` only for integer division by zero.
    fn rem_checked(self, rhs: Self) -> Option<Self>;

    /// Absolute value, wrapping for the minimum integer.
    fn abs_value(self) -> Self;
}

macro_rules! native_int {
    ($T:ty, $dtype:expr) => {
        #[allow(clippy::cast_possible_truncation)]
        impl NativeType for $T {
            const DTYPE: DataType = $dtype;
            const IS_FLOAT: bool = false;

            #[inline]
            fn from_f64(value: f64) -> Self {
                value as $T
            }

            #[inline]
            fn from_i64(value: i64) -> Self {
                value as $T
            }

            #[inline]
            fn total_compare(self, other: Self) -> Ordering {
                self.cmp(&other)
            }

            #[inline]
            fn add_wrapping(self, rhs: Self) -> Self {
                self.wrapping_add(rhs)
            }

            #[inline]
            fn sub_wrapping(self, rhs: Self) -> Self {
                self.wrapping_sub(rhs)
            }

            #[inline]
            fn mul_wrapping(self, rhs: Self) -> Self {
                self.wrapping_mul(rhs)
            }

            #[inline]
            fn div_checked(self, rhs: Self) -> Option<Self> {
                (rhs != 0).then(|| self.wrapping_div(rhs))
            }

            #[inline]
            fn rem_checked(self, rhs: Self) -> Option<Self> {
                (rhs != 0).then(|| self.wrapping_rem(rhs))
            }

            #[inline]
            fn abs_value(self) -> Self {
                self.wrapping_abs()
            }
        }
    };
}

macro_rules! native_float {
    ($T:ty, $dtype:expr) => {
        #[allow(clippy::cast_possible_truncation)]
        impl NativeType for $T {
            const DTYPE: DataType = $dtype;
            const IS_FLOAT: bool = true;

            #[inline]
            fn from_f64(value: f64) -> Self {
                value as $T
            }

            #[inline]
            fn from_i64(value: i64) -> Self {
                value as $T
            }

            #[inline]
            fn total_compare(self, other: Self) -> Ordering {
                self.total_cmp(&other)
            }

            #[inline]
            fn add_wrapping(self, rhs: Self) -> Self {
                self + rhs
            }

            #[inline]
            fn sub_wrapping(self, rhs: Self) -> Self {
                self - rhs
            }

            #[inline]
            fn mul_wrapping(self, rhs: Self) -> Self {
                self * rhs
            }

            #[inline]
            fn div_checked(self, rhs: Self) -> Option<Self> {
                Some(self / rhs)
            }

            #[inline]
            fn rem_checked(self, rhs: Self) -> Option<Self> {
                Some(self % rhs)
            }

            #[inline]
            fn abs_value(self) -> Self {
                self.abs()
            }
        }
    };
}

native_int!(i32, DataType::Integer);
native_int!(i64, DataType::Long);
native_float!(f32, DataType::Float);
native_float!(f64, DataType::Double);

/// Dispatch a numeric [`DataType`] to a block of code generic over its [`NativeType`].
///
/// Non-numeric types return an `Unsupported` error from the enclosing function, which must
/// therefore return a `SavimeResult`.
///
/// ```ignore
/// match_each_numeric_type!(dataset.data_type(), |$T| {
///     handler.as_slice::<$T>()?.len()
/// })
/// ```
#[macro_export]
macro_rules! match_each_numeric_type {
    ($self:expr, | $_:tt $enc:ident | $($body:tt)*) => ({
        macro_rules! __with__ {( $_ $enc:ident ) => ( $($body)* )}
        use $crate::DataType;
        let data_type = $self;
        match data_type {
            DataType::Integer => __with__! { i32 },
            DataType::Long => __with__! { i64 },
            DataType::Float => __with__! { f32 },
            DataType::Double => __with__! { f64 },
            DataType::Boolean | DataType::String => {
                $crate::__private::savime_error::savime_bail!(
                    Unsupported: "numeric operation over {} values", data_type
                )
            }
        }
    })
}

/// Dispatch an integral [`DataType`] to a block of code generic over its [`NativeType`].
#[macro_export]
macro_rules! match_each_integral_type {
    ($self:expr, | $_:tt $enc:ident | $($body:tt)*) => ({
        macro_rules! __with__ {( $_ $enc:ident ) => ( $($body)* )}
        use $crate::DataType;
        let data_type = $self;
        match data_type {
            DataType::Integer => __with__! { i32 },
            DataType::Long => __with__! { i64 },
            _ => {
                $crate::__private::savime_error::savime_bail!(
                    MismatchedTypes: "integral", data_type
                )
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use savime_error::SavimeResult;

    use super::*;

    #[test]
    fn integral_compare_keeps_precision() {
        let big = i64::MAX - 1;
        assert_eq!(big.compare(i64::MAX), Some(Ordering::Less));
        assert_eq!(3i32.compare(3i64), Some(Ordering::Equal));
    }

    #[rstest]
    #[case(2.5f64, 2i32, Ordering::Greater)]
    #[case(2.0f64, 2i32, Ordering::Equal)]
    #[case(-0.5f64, 0i32, Ordering::Less)]
    fn mixed_compare(#[case] lhs: f64, #[case] rhs: i32, #[case] expected: Ordering) {
        assert_eq!(lhs.compare(rhs), Some(expected));
    }

    #[test]
    fn nan_is_unordered() {
        assert_eq!(f64::NAN.compare(1i32), None);
    }

    #[test]
    fn integer_division_by_zero() {
        assert_eq!(7i32.div_checked(0), None);
        assert_eq!(7i64.rem_checked(0), None);
        assert_eq!(7i32.div_checked(2), Some(3));
        assert!(7.0f64.div_checked(0.0).unwrap().is_infinite());
    }

    #[test]
    fn cast_between_types() {
        assert_eq!(3.9f64.cast::<i32>(), 3);
        assert_eq!((1i64 << 40).cast::<f64>(), (1u64 << 40) as f64);
        assert_eq!(7i32.cast::<i64>(), 7);
    }

    fn widened<T: NativeType>(values: &[T]) -> (Vec<i64>, Vec<f64>) {
        let longs = values.iter().map(|v| v.as_i64()).collect();
        let doubles = values.iter().map(|v| v.as_f64()).collect();
        (longs, doubles)
    }

    #[test]
    fn widening_through_references() {
        assert_eq!(widened(&[3i32, -1]), (vec![3, -1], vec![3.0, -1.0]));
        assert_eq!(widened(&[2.75f64]), (vec![2], vec![2.75]));
        assert_eq!(widened(&[-0.5f32]), (vec![0], vec![-0.5]));
    }

    fn width_of(data_type: DataType) -> SavimeResult<usize> {
        Ok(match_each_numeric_type!(data_type, |$T| size_of::<$T>()))
    }

    #[test]
    fn dispatch_macro() {
        assert_eq!(width_of(DataType::Integer).unwrap(), 4);
        assert_eq!(width_of(DataType::Double).unwrap(), 8);
        assert!(width_of(DataType::String).unwrap_err().is_unsupported());
    }
}
