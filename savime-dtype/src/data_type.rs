use std::fmt::{Display, Formatter};

use num_enum::{IntoPrimitive, TryFromPrimitive};

/// The type of the values held by a dataset.
///
/// Only the first four variants take part in numeric kernels. `Boolean` datasets can be stored
/// and read back, while `String` datasets have no fixed width and are rejected by every kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, IntoPrimitive, TryFromPrimitive)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum DataType {
    /// 32-bit signed integer
    Integer,
    /// 64-bit signed integer
    Long,
    /// 32-bit IEEE float
    Float,
    /// 64-bit IEEE float
    Double,
    /// single byte boolean
    Boolean,
    /// variable width text
    String,
}

/// The data types numeric kernels are instantiated for.
pub const NUMERIC_TYPES: [DataType; 4] = [
    DataType::Integer,
    DataType::Long,
    DataType::Float,
    DataType::Double,
];

impl DataType {
    /// Width of one value in bytes, or `None` for variable width types.
    pub const fn byte_width(&self) -> Option<usize> {
        match self {
            Self::Integer | Self::Float => Some(4),
            Self::Long | Self::Double => Some(8),
            Self::Boolean => Some(1),
            Self::String => None,
        }
    }

    /// Whether numeric kernels accept this type.
    pub const fn is_numeric(&self) -> bool {
        matches!(self, Self::Integer | Self::Long | Self::Float | Self::Double)
    }

    /// Whether the type is a signed integer.
    pub const fn is_integral(&self) -> bool {
        matches!(self, Self::Integer | Self::Long)
    }

    /// Whether the type is a floating point number.
    pub const fn is_float(&self) -> bool {
        matches!(self, Self::Float | Self::Double)
    }
}

impl Display for DataType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Integer => write!(f, "int"),
            Self::Long => write!(f, "long"),
            Self::Float => write!(f, "float"),
            Self::Double => write!(f, "double"),
            Self::Boolean => write!(f, "char"),
            Self::String => write!(f, "string"),
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(DataType::Integer, Some(4))]
    #[case(DataType::Long, Some(8))]
    #[case(DataType::Float, Some(4))]
    #[case(DataType::Double, Some(8))]
    #[case(DataType::Boolean, Some(1))]
    #[case(DataType::String, None)]
    fn widths(#[case] data_type: DataType, #[case] width: Option<usize>) {
        assert_eq!(data_type.byte_width(), width);
    }

    #[test]
    fn numeric_types_are_numeric() {
        assert!(NUMERIC_TYPES.iter().all(DataType::is_numeric));
        assert!(!DataType::String.is_numeric());
        assert!(!DataType::Boolean.is_numeric());
    }

    #[test]
    fn primitive_round_trip() {
        let code: u8 = DataType::Double.into();
        assert_eq!(DataType::try_from(code).unwrap(), DataType::Double);
        assert!(DataType::try_from(42u8).is_err());
    }
}
