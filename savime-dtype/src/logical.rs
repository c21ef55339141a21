use std::fmt::{Display, Formatter};

use crate::{DataType, NativeType};

/// A physical position along a dimension.
///
/// Non-negative values are positions; the negative sentinels below describe why a lookup did
/// not land on one.
pub type RealIndex = i64;

/// The logical value has no exact match among the dimension's positions.
pub const INVALID_EXACT_REAL_INDEX: RealIndex = -1;
/// The logical value lies below the dimension's first position.
pub const BELOW_OFFBOUNDS_REAL_INDEX: RealIndex = -2;
/// The logical value lies above the dimension's last position.
pub const ABOVE_OFFBOUNDS_REAL_INDEX: RealIndex = -3;

/// A user facing coordinate value along a dimension.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum LogicalIndex {
    /// 32-bit signed integer coordinate
    Int(i32),
    /// 64-bit signed integer coordinate
    Long(i64),
    /// 32-bit float coordinate
    Float(f32),
    /// 64-bit float coordinate
    Double(f64),
}

impl LogicalIndex {
    /// The data type of the held value.
    pub const fn data_type(&self) -> DataType {
        match self {
            Self::Int(_) => DataType::Integer,
            Self::Long(_) => DataType::Long,
            Self::Float(_) => DataType::Float,
            Self::Double(_) => DataType::Double,
        }
    }

    /// Whether the held value is integral.
    pub const fn is_integral(&self) -> bool {
        matches!(self, Self::Int(_) | Self::Long(_))
    }

    /// The value widened to `f64`.
    pub fn as_f64(&self) -> f64 {
        match *self {
            Self::Int(v) => v.as_f64(),
            Self::Long(v) => v.as_f64(),
            Self::Float(v) => v.as_f64(),
            Self::Double(v) => v,
        }
    }

    /// The value cast to a native type with `as` semantics.
    pub fn cast<T: NativeType>(&self) -> T {
        match *self {
            Self::Int(v) => v.cast(),
            Self::Long(v) => v.cast(),
            Self::Float(v) => v.cast(),
            Self::Double(v) => v.cast(),
        }
    }

    /// Wrap a native value in the matching variant.
    pub fn from_native<T: NativeType>(value: T) -> Self {
        match T::DTYPE {
            DataType::Integer => Self::Int(value.cast()),
            DataType::Long => Self::Long(value.cast()),
            DataType::Float => Self::Float(value.cast()),
            _ => Self::Double(value.cast()),
        }
    }

    /// Compare a stored native value against this coordinate, using the mixed comparison rules
    /// of [`NativeType::compare`].
    pub fn compare_native<T: NativeType>(&self, value: T) -> Option<std::cmp::Ordering> {
        match *self {
            Self::Int(v) => value.compare(v),
            Self::Long(v) => value.compare(v),
            Self::Float(v) => value.compare(v),
            Self::Double(v) => value.compare(v),
        }
    }
}

impl Display for LogicalIndex {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}_i32"),
            Self::Long(v) => write!(f, "{v}_i64"),
            Self::Float(v) => write!(f, "{v}_f32"),
            Self::Double(v) => write!(f, "{v}_f64"),
        }
    }
}

macro_rules! logical_from {
    ($T:ty, $variant:ident) => {
        impl From<$T> for LogicalIndex {
            fn from(value: $T) -> Self {
                Self::$variant(value)
            }
        }

        impl From<$T> for Scalar {
            fn from(value: $T) -> Self {
                Self::Numeric(LogicalIndex::$variant(value))
            }
        }
    };
}

logical_from!(i32, Int);
logical_from!(i64, Long);
logical_from!(f32, Float);
logical_from!(f64, Double);

/// The right hand operand of a scalar comparison or arithmetic operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    /// A numeric constant.
    Numeric(LogicalIndex),
    /// A string constant. Numeric kernels reject it.
    Utf8(String),
}

impl Scalar {
    /// The data type of the held value.
    pub fn data_type(&self) -> DataType {
        match self {
            Self::Numeric(v) => v.data_type(),
            Self::Utf8(_) => DataType::String,
        }
    }

    /// The numeric value, if this is not a string.
    pub fn as_numeric(&self) -> Option<LogicalIndex> {
        match self {
            Self::Numeric(v) => Some(*v),
            Self::Utf8(_) => None,
        }
    }
}

impl Display for Scalar {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Numeric(v) => write!(f, "{v}"),
            Self::Utf8(s) => write!(f, "\"{s}\""),
        }
    }
}

impl From<LogicalIndex> for Scalar {
    fn from(value: LogicalIndex) -> Self {
        Self::Numeric(value)
    }
}

impl From<&str> for Scalar {
    fn from(value: &str) -> Self {
        Self::Utf8(value.to_string())
    }
}

impl From<String> for Scalar {
    fn from(value: String) -> Self {
        Self::Utf8(value)
    }
}

#[cfg(test)]
mod tests {
    use std::cmp::Ordering;

    use super::*;

    #[test]
    fn logical_index_types() {
        assert_eq!(LogicalIndex::from(3i32).data_type(), DataType::Integer);
        assert_eq!(LogicalIndex::from(3.5f32).data_type(), DataType::Float);
        assert!(LogicalIndex::Long(1).is_integral());
        assert!(!LogicalIndex::Double(1.0).is_integral());
    }

    #[test]
    fn cast_and_compare() {
        let v = LogicalIndex::Double(2.5);
        assert_eq!(v.cast::<i32>(), 2);
        assert_eq!(v.compare_native(2i64), Some(Ordering::Less));
        assert_eq!(v.compare_native(3.0f32), Some(Ordering::Greater));
        assert_eq!(LogicalIndex::from_native(7i64), LogicalIndex::Long(7));
    }

    #[test]
    fn scalar_from_values() {
        assert_eq!(Scalar::from(5i32).as_numeric(), Some(LogicalIndex::Int(5)));
        assert_eq!(Scalar::from("x").data_type(), DataType::String);
        assert_eq!(Scalar::from("x").as_numeric(), None);
    }
}
