use std::fmt::{Display, Formatter};
use std::str::FromStr;
use std::sync::LazyLock;
use std::sync::atomic::{AtomicBool, Ordering};

use rayon::prelude::*;
use savime_dtype::{DataType, LogicalIndex, NativeType, Scalar, match_each_numeric_type};
use savime_error::{SavimeError, SavimeResult, savime_bail, savime_err};

use crate::dispatch::{KernelTable, numeric_pair_table};
use crate::{Dataset, StorageManager};

/// An operator combining two values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Pow,
    Atan2,
}

impl BinaryOp {
    fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Rem => "%",
            Self::Pow => "pow",
            Self::Atan2 => "atan2",
        }
    }

    #[inline]
    fn apply<T: NativeType>(self, lhs: T, rhs: T) -> Option<T> {
        match self {
            Self::Add => Some(lhs.add_wrapping(rhs)),
            Self::Sub => Some(lhs.sub_wrapping(rhs)),
            Self::Mul => Some(lhs.mul_wrapping(rhs)),
            Self::Div => lhs.div_checked(rhs),
            Self::Rem => lhs.rem_checked(rhs),
            Self::Pow => Some(T::from_f64(lhs.as_f64().powf(rhs.as_f64()))),
            Self::Atan2 => Some(T::from_f64(lhs.as_f64().atan2(rhs.as_f64()))),
        }
    }
}

/// A numeric function of one value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Cos,
    Sin,
    Tan,
    Acos,
    Asin,
    Atan,
    Cosh,
    Sinh,
    Tanh,
    Acosh,
    Asinh,
    Atanh,
    Exp,
    Log,
    Log10,
    Sqrt,
    Ceil,
    Floor,
    Round,
    Abs,
}

impl UnaryOp {
    const ALL: [UnaryOp; 20] = [
        Self::Cos,
        Self::Sin,
        Self::Tan,
        Self::Acos,
        Self::Asin,
        Self::Atan,
        Self::Cosh,
        Self::Sinh,
        Self::Tanh,
        Self::Acosh,
        Self::Asinh,
        Self::Atanh,
        Self::Exp,
        Self::Log,
        Self::Log10,
        Self::Sqrt,
        Self::Ceil,
        Self::Floor,
        Self::Round,
        Self::Abs,
    ];

    fn name(self) -> &'static str {
        match self {
            Self::Cos => "cos",
            Self::Sin => "sin",
            Self::Tan => "tan",
            Self::Acos => "acos",
            Self::Asin => "asin",
            Self::Atan => "atan",
            Self::Cosh => "cosh",
            Self::Sinh => "sinh",
            Self::Tanh => "tanh",
            Self::Acosh => "acosh",
            Self::Asinh => "asinh",
            Self::Atanh => "atanh",
            Self::Exp => "exp",
            Self::Log => "log",
            Self::Log10 => "log10",
            Self::Sqrt => "sqrt",
            Self::Ceil => "ceil",
            Self::Floor => "floor",
            Self::Round => "round",
            Self::Abs => "abs",
        }
    }

    /// Whether the result keeps the type of the operand.
    pub fn preserves_type(self) -> bool {
        matches!(self, Self::Ceil | Self::Floor | Self::Round | Self::Abs)
    }

    #[inline]
    fn apply<T: NativeType>(self, value: T) -> T {
        let rounding = |f: fn(f64) -> f64| {
            if T::IS_FLOAT {
                T::from_f64(f(value.as_f64()))
            } else {
                value
            }
        };
        let v = value.as_f64();
        match self {
            Self::Ceil => rounding(f64::ceil),
            Self::Floor => rounding(f64::floor),
            Self::Round => rounding(f64::round),
            Self::Abs => value.abs_value(),
            Self::Cos => T::from_f64(v.cos()),
            Self::Sin => T::from_f64(v.sin()),
            Self::Tan => T::from_f64(v.tan()),
            Self::Acos => T::from_f64(v.acos()),
            Self::Asin => T::from_f64(v.asin()),
            Self::Atan => T::from_f64(v.atan()),
            Self::Cosh => T::from_f64(v.cosh()),
            Self::Sinh => T::from_f64(v.sinh()),
            Self::Tanh => T::from_f64(v.tanh()),
            Self::Acosh => T::from_f64(v.acosh()),
            Self::Asinh => T::from_f64(v.asinh()),
            Self::Atanh => T::from_f64(v.atanh()),
            Self::Exp => T::from_f64(v.exp()),
            Self::Log => T::from_f64(v.ln()),
            Self::Log10 => T::from_f64(v.log10()),
            Self::Sqrt => T::from_f64(v.sqrt()),
        }
    }
}

/// The operation of a dataset against a constant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArithmeticOp {
    Binary(BinaryOp),
    /// The constant is ignored.
    Unary(UnaryOp),
}

impl From<BinaryOp> for ArithmeticOp {
    fn from(op: BinaryOp) -> Self {
        Self::Binary(op)
    }
}

impl From<UnaryOp> for ArithmeticOp {
    fn from(op: UnaryOp) -> Self {
        Self::Unary(op)
    }
}

impl FromStr for BinaryOp {
    type Err = SavimeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "+" => Self::Add,
            "-" => Self::Sub,
            "*" => Self::Mul,
            "/" => Self::Div,
            "%" => Self::Rem,
            "pow" => Self::Pow,
            "atan2" => Self::Atan2,
            _ => savime_bail!("Invalid arithmetic operation {}", s),
        })
    }
}

impl FromStr for UnaryOp {
    type Err = SavimeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|op| op.name() == s)
            .ok_or_else(|| savime_err!("Invalid arithmetic operation {}", s))
    }
}

impl FromStr for ArithmeticOp {
    type Err = SavimeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<BinaryOp>()
            .map(Self::Binary)
            .or_else(|_| s.parse::<UnaryOp>().map(Self::Unary))
    }
}

impl Display for BinaryOp {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.symbol())
    }
}

impl Display for UnaryOp {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl Display for ArithmeticOp {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Binary(op) => write!(f, "{op}"),
            Self::Unary(op) => write!(f, "{op}"),
        }
    }
}

/// The type of the result of `op` over operands of types `lhs` and `rhs`.
pub fn select_type(lhs: DataType, rhs: DataType, op: ArithmeticOp) -> SavimeResult<DataType> {
    for operand in [lhs, rhs] {
        if !operand.is_numeric() {
            savime_bail!(Unsupported: "arithmetic over {} values", operand);
        }
    }
    Ok(match op {
        ArithmeticOp::Unary(op) if op.preserves_type() => lhs,
        ArithmeticOp::Unary(_) | ArithmeticOp::Binary(BinaryOp::Pow | BinaryOp::Atan2) => {
            DataType::Double
        }
        ArithmeticOp::Binary(_) => {
            let long = lhs == DataType::Long || rhs == DataType::Long;
            if lhs.is_integral() && rhs.is_integral() {
                if long { DataType::Long } else { DataType::Integer }
            } else if long || lhs == DataType::Double || rhs == DataType::Double {
                DataType::Double
            } else {
                DataType::Float
            }
        }
    })
}

fn division_by_zero(op: impl Display) -> SavimeError {
    savime_err!("integer division by zero in {}", op)
}

type ArithmeticFn = fn(&StorageManager, &Dataset, BinaryOp, &Dataset, &Dataset) -> SavimeResult<()>;

static ARITHMETIC: LazyLock<KernelTable<ArithmeticFn>> =
    LazyLock::new(|| numeric_pair_table!("arithmetic", arithmetic_kernel, ArithmeticFn));

fn arithmetic_kernel<L: NativeType, R: NativeType>(
    manager: &StorageManager,
    lhs: &Dataset,
    op: BinaryOp,
    rhs: &Dataset,
    output: &Dataset,
) -> SavimeResult<()> {
    let mut lhs_handler = manager.open(lhs)?;
    let mut rhs_handler = manager.open(rhs)?;
    let lhs = lhs_handler.as_slice::<L>()?;
    let rhs = rhs_handler.as_slice::<R>()?;
    let len = lhs.len().min(rhs.len());
    let mut output_handler = manager.open(output)?;
    let failed = AtomicBool::new(false);

    match_each_numeric_type!(output.data_type(), |$O| {
        let cells = &mut output_handler.as_mut_slice::<$O>()?[..len];
        manager
            .workload(len)
            .split_mut(cells, 1)?
            .into_par_iter()
            .for_each(|(range, piece)| {
                let operands = lhs[range.clone()].iter().zip(&rhs[range]);
                for (cell, (l, r)) in piece.iter_mut().zip(operands) {
                    match op.apply(l.cast::<$O>(), r.cast::<$O>()) {
                        Some(value) => *cell = value,
                        None => failed.store(true, Ordering::Relaxed),
                    }
                }
            });
    });

    if failed.load(Ordering::Relaxed) {
        return Err(division_by_zero(op));
    }
    Ok(())
}

/// Element-wise `lhs op rhs` over the positions both datasets have. The result has as many
/// values as `lhs`.
pub(crate) fn arithmetic(
    manager: &StorageManager,
    lhs: &Dataset,
    op: BinaryOp,
    rhs: &Dataset,
) -> SavimeResult<Dataset> {
    let kernel = ARITHMETIC.lookup(lhs.data_type(), rhs.data_type())?;
    let output_type = select_type(lhs.data_type(), rhs.data_type(), op.into())?;
    let output = manager.allocate(output_type, lhs.entry_count())?;
    kernel(manager, lhs, op, rhs, &output)?;
    Ok(output)
}

fn scalar_kernel<L: NativeType, O: NativeType>(
    manager: &StorageManager,
    lhs: &Dataset,
    op: ArithmeticOp,
    value: LogicalIndex,
    output: &Dataset,
) -> SavimeResult<()> {
    let value = value.cast::<O>();
    let zero_divisor = match op {
        ArithmeticOp::Binary(op) => op.apply(O::from_i64(1), value).is_none(),
        ArithmeticOp::Unary(_) => false,
    };
    if zero_divisor {
        return Err(division_by_zero(op));
    }

    let mut lhs_handler = manager.open(lhs)?;
    let mut output_handler = manager.open(output)?;
    let lhs = lhs_handler.as_slice::<L>()?;
    let cells = output_handler.as_mut_slice::<O>()?;
    manager
        .workload(cells.len())
        .split_mut(cells, 1)?
        .into_par_iter()
        .for_each(|(range, piece)| {
            for (cell, l) in piece.iter_mut().zip(&lhs[range]) {
                let l = l.cast::<O>();
                *cell = match op {
                    ArithmeticOp::Binary(op) => op.apply(l, value).unwrap_or_default(),
                    ArithmeticOp::Unary(op) => op.apply(l),
                };
            }
        });
    Ok(())
}

/// `lhs op rhs` for every value of `lhs`, or `op(lhs)` for unary functions.
pub(crate) fn arithmetic_scalar(
    manager: &StorageManager,
    lhs: &Dataset,
    op: ArithmeticOp,
    rhs: &Scalar,
) -> SavimeResult<Dataset> {
    let value = rhs
        .as_numeric()
        .ok_or_else(|| savime_err!(Unsupported: "arithmetic with {}", rhs))?;
    let output_type = select_type(lhs.data_type(), value.data_type(), op)?;
    let output = manager.allocate(output_type, lhs.entry_count())?;
    match_each_numeric_type!(lhs.data_type(), |$L| {
        match_each_numeric_type!(output_type, |$O| {
            scalar_kernel::<$L, $O>(manager, lhs, op, value, &output)?
        })
    });
    Ok(output)
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::test_harness::{create_from, manager, values};

    #[rstest]
    #[case(DataType::Integer, DataType::Integer, "+", DataType::Integer)]
    #[case(DataType::Integer, DataType::Long, "%", DataType::Long)]
    #[case(DataType::Integer, DataType::Float, "*", DataType::Float)]
    #[case(DataType::Long, DataType::Float, "-", DataType::Double)]
    #[case(DataType::Float, DataType::Float, "/", DataType::Float)]
    #[case(DataType::Float, DataType::Double, "+", DataType::Double)]
    #[case(DataType::Integer, DataType::Integer, "pow", DataType::Double)]
    #[case(DataType::Float, DataType::Integer, "atan2", DataType::Double)]
    #[case(DataType::Integer, DataType::Double, "sqrt", DataType::Double)]
    #[case(DataType::Float, DataType::Double, "cos", DataType::Double)]
    #[case(DataType::Integer, DataType::Double, "abs", DataType::Integer)]
    #[case(DataType::Float, DataType::Long, "floor", DataType::Float)]
    fn output_types(
        #[case] lhs: DataType,
        #[case] rhs: DataType,
        #[case] op: &str,
        #[case] expected: DataType,
    ) {
        assert_eq!(select_type(lhs, rhs, op.parse().unwrap()).unwrap(), expected);
    }

    #[test]
    fn non_numeric_types_are_unsupported() {
        let op = ArithmeticOp::Binary(BinaryOp::Add);
        assert!(
            select_type(DataType::String, DataType::Integer, op)
                .unwrap_err()
                .is_unsupported()
        );
        assert!(select_type(DataType::Integer, DataType::Boolean, op).is_err());
    }

    #[test]
    fn mixed_datasets() {
        let manager = manager();
        let lhs = create_from(&manager, &[1i32, 2, 3, 4]);
        let rhs = create_from(&manager, &[0.5f64, 1.5, 2.5]);
        let sum = manager.arithmetic(&lhs, BinaryOp::Add, &rhs).unwrap();
        assert_eq!(sum.data_type(), DataType::Double);
        assert_eq!(sum.entry_count(), 4);
        assert_eq!(values::<f64>(&manager, &sum), vec![1.5, 3.5, 5.5, 0.0]);
    }

    #[test]
    fn integer_division_truncates() {
        let manager = manager();
        let lhs = create_from(&manager, &[7i64, -7, 9]);
        let rhs = create_from(&manager, &[2i32, 2, 4]);
        let quotient = manager.arithmetic(&lhs, BinaryOp::Div, &rhs).unwrap();
        assert_eq!(values::<i64>(&manager, &quotient), vec![3, -3, 2]);
        let remainder = manager.arithmetic(&lhs, BinaryOp::Rem, &rhs).unwrap();
        assert_eq!(values::<i64>(&manager, &remainder), vec![1, -1, 1]);
    }

    #[test]
    fn integer_overflow_wraps() {
        let manager = manager();
        let lhs = create_from(&manager, &[i32::MAX]);
        let result = manager
            .arithmetic_scalar(&lhs, BinaryOp::Add.into(), &Scalar::from(1i32))
            .unwrap();
        assert_eq!(values::<i32>(&manager, &result), vec![i32::MIN]);
    }

    #[test]
    fn division_by_zero_fails() {
        let manager = manager();
        let lhs = create_from(&manager, &(0..100).collect::<Vec<i32>>());
        let mut divisors = vec![1i32; 100];
        divisors[57] = 0;
        let rhs = create_from(&manager, &divisors);
        let used = manager.used_storage();
        assert!(manager.arithmetic(&lhs, BinaryOp::Rem, &rhs).is_err());
        assert_eq!(manager.used_storage(), used);
        assert!(
            manager
                .arithmetic_scalar(&lhs, BinaryOp::Div.into(), &Scalar::from(0i64))
                .is_err()
        );

        let floats = create_from(&manager, &[1.0f32]);
        let result = manager
            .arithmetic_scalar(&floats, BinaryOp::Div.into(), &Scalar::from(0i32))
            .unwrap();
        assert_eq!(values::<f32>(&manager, &result), vec![f32::INFINITY]);
    }

    #[rstest]
    #[case("sqrt", vec![0.0, 1.0, 4.0], vec![0.0, 1.0, 2.0])]
    #[case("abs", vec![0.0, -1.0, 4.0], vec![0.0, 1.0, 4.0])]
    #[case("floor", vec![0.5, -1.5, 4.0], vec![0.0, -2.0, 4.0])]
    #[case("exp", vec![0.0, -1.0, 4.0], vec![1.0, (-1.0f64).exp(), 4.0f64.exp()])]
    fn unary_functions_ignore_the_operand(
        #[case] op: &str,
        #[case] input: Vec<f64>,
        #[case] expected: Vec<f64>,
    ) {
        let manager = manager();
        let ds = create_from(&manager, &input);
        let result = manager
            .arithmetic_scalar(&ds, op.parse().unwrap(), &Scalar::from(99i32))
            .unwrap();
        assert_eq!(values::<f64>(&manager, &result), expected);
    }

    #[test]
    fn rounding_keeps_integers() {
        let manager = manager();
        let ds = create_from(&manager, &[i64::MAX, -3]);
        let result = manager
            .arithmetic_scalar(&ds, UnaryOp::Round.into(), &Scalar::from(0i32))
            .unwrap();
        assert_eq!(values::<i64>(&manager, &result), vec![i64::MAX, -3]);
        let result = manager
            .arithmetic_scalar(&ds, UnaryOp::Abs.into(), &Scalar::from(0i32))
            .unwrap();
        assert_eq!(values::<i64>(&manager, &result), vec![i64::MAX, 3]);
    }

    #[test]
    fn pow_and_atan2() {
        let manager = manager();
        let lhs = create_from(&manager, &[2i32, 3]);
        let rhs = create_from(&manager, &[10i32, 2]);
        let result = manager.arithmetic(&lhs, BinaryOp::Pow, &rhs).unwrap();
        assert_eq!(values::<f64>(&manager, &result), vec![1024.0, 9.0]);
        let result = manager
            .arithmetic_scalar(&lhs, BinaryOp::Atan2.into(), &Scalar::from(0.0f64))
            .unwrap();
        let expected = std::f64::consts::FRAC_PI_2;
        assert!(values::<f64>(&manager, &result).iter().all(|v| (v - expected).abs() < 1e-12));
    }

    #[test]
    fn string_operands_are_unsupported() {
        let manager = manager();
        let ds = create_from(&manager, &[1i32]);
        assert!(
            manager
                .arithmetic_scalar(&ds, BinaryOp::Add.into(), &Scalar::from("x"))
                .unwrap_err()
                .is_unsupported()
        );
    }

    #[test]
    fn operator_names() {
        assert!("nope".parse::<ArithmeticOp>().is_err());
        for op in UnaryOp::ALL {
            assert_eq!(
                op.to_string().parse::<ArithmeticOp>().unwrap(),
                ArithmeticOp::Unary(op)
            );
        }
        assert_eq!(
            "%".parse::<ArithmeticOp>().unwrap(),
            ArithmeticOp::Binary(BinaryOp::Rem)
        );
    }
}
