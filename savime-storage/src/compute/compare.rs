use std::cmp::Ordering;
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use std::sync::LazyLock;

use savime_dtype::{NativeType, Scalar, match_each_numeric_type};
use savime_error::{SavimeError, SavimeResult, savime_bail, savime_err};
use savime_mask::BitMask;

use crate::dispatch::{KernelTable, numeric_pair_table};
use crate::{Dataset, StorageManager};

/// A comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareOp {
    Eq,
    NotEq,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl CompareOp {
    /// The operator whose result is the negation of this one.
    pub fn inverse(self) -> Self {
        match self {
            Self::Eq => Self::NotEq,
            Self::NotEq => Self::Eq,
            Self::Gt => Self::Lte,
            Self::Gte => Self::Lt,
            Self::Lt => Self::Gte,
            Self::Lte => Self::Gt,
        }
    }

    /// The operator to use when the operands trade places.
    pub fn swap(self) -> Self {
        match self {
            Self::Eq => Self::Eq,
            Self::NotEq => Self::NotEq,
            Self::Gt => Self::Lt,
            Self::Gte => Self::Lte,
            Self::Lt => Self::Gt,
            Self::Lte => Self::Gte,
        }
    }

    /// Whether `lhs op rhs` holds given the ordering of `lhs` relative to `rhs`. Unordered
    /// values (NaN) are only ever different.
    #[inline]
    pub fn matches(self, ordering: Option<Ordering>) -> bool {
        match ordering {
            None => self == Self::NotEq,
            Some(ordering) => match self {
                Self::Eq => ordering.is_eq(),
                Self::NotEq => ordering.is_ne(),
                Self::Gt => ordering.is_gt(),
                Self::Gte => ordering.is_ge(),
                Self::Lt => ordering.is_lt(),
                Self::Lte => ordering.is_le(),
            },
        }
    }
}

impl FromStr for CompareOp {
    type Err = SavimeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "=" | "==" => Self::Eq,
            "<>" | "!=" => Self::NotEq,
            ">" => Self::Gt,
            ">=" => Self::Gte,
            "<" => Self::Lt,
            "<=" => Self::Lte,
            _ => savime_bail!("Invalid comparison operation {}", s),
        })
    }
}

impl Display for CompareOp {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let symbol = match self {
            Self::Eq => "=",
            Self::NotEq => "<>",
            Self::Gt => ">",
            Self::Gte => ">=",
            Self::Lt => "<",
            Self::Lte => "<=",
        };
        write!(f, "{symbol}")
    }
}

type CompareFn = fn(&StorageManager, &Dataset, CompareOp, &Dataset) -> SavimeResult<BitMask>;

static COMPARE: LazyLock<KernelTable<CompareFn>> =
    LazyLock::new(|| numeric_pair_table!("comparison", compare_kernel, CompareFn));

fn compare_kernel<L: NativeType, R: NativeType>(
    manager: &StorageManager,
    lhs: &Dataset,
    op: CompareOp,
    rhs: &Dataset,
) -> SavimeResult<BitMask> {
    let mut lhs_handler = manager.open(lhs)?;
    let mut rhs_handler = manager.open(rhs)?;
    let lhs = lhs_handler.as_slice::<L>()?;
    let rhs = rhs_handler.as_slice::<R>()?;
    let len = lhs.len().min(rhs.len());
    let chunks = manager.aligned_workload(len).threads();
    Ok(BitMask::from_fn(len, chunks, |i| {
        op.matches(lhs[i].compare(rhs[i]))
    }))
}

/// Compare two datasets position by position over the positions both have.
pub(crate) fn compare(
    manager: &StorageManager,
    lhs: &Dataset,
    op: CompareOp,
    rhs: &Dataset,
) -> SavimeResult<Dataset> {
    let kernel = COMPARE.lookup(lhs.data_type(), rhs.data_type())?;
    Ok(Dataset::from_bitmask(kernel(manager, lhs, op, rhs)?))
}

/// Compare every value of a dataset with a constant.
pub(crate) fn compare_scalar(
    manager: &StorageManager,
    lhs: &Dataset,
    op: CompareOp,
    rhs: &Scalar,
) -> SavimeResult<Dataset> {
    let value = rhs
        .as_numeric()
        .ok_or_else(|| savime_err!(Unsupported: "comparison with {}", rhs))?;
    let mask = match_each_numeric_type!(lhs.data_type(), |$T| {
        let mut handler = manager.open(lhs)?;
        let values = handler.as_slice::<$T>()?;
        let chunks = manager.aligned_workload(values.len()).threads();
        BitMask::from_fn(values.len(), chunks, |i| op.matches(value.compare_native(values[i])))
    });
    Ok(Dataset::from_bitmask(mask))
}
