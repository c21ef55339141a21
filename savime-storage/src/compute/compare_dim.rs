use std::ops::Range;

use savime_dtype::{LogicalIndex, Scalar};
use savime_error::{SavimeResult, savime_bail, savime_err};
use savime_mask::BitMask;

use super::{CompareOp, compare, index, materialize};
use crate::{Dataset, DimSpec, DimensionType, SpecsType, StorageManager};

/// Compare the coordinates of a subtar along `spec` with a dataset of values.
pub(crate) fn compare_dim(
    manager: &StorageManager,
    spec: &DimSpec,
    total_length: usize,
    op: CompareOp,
    rhs: &Dataset,
) -> SavimeResult<Dataset> {
    let materialized = materialize::materialize_dim(manager, spec, total_length)?;
    compare::compare(manager, &materialized, op, rhs)
}

/// Compare the coordinates of a subtar along `spec` with a constant.
///
/// Ordered specs over monotone dimensions never materialize their coordinates: the result is a
/// periodic run of bits whose ends are found by bisecting the spec's coordinates.
pub(crate) fn compare_dim_scalar(
    manager: &StorageManager,
    spec: &DimSpec,
    total_length: usize,
    op: CompareOp,
    rhs: &Scalar,
) -> SavimeResult<Dataset> {
    let value = rhs
        .as_numeric()
        .ok_or_else(|| savime_err!(Unsupported: "comparison of a dimension with {}", rhs))?;
    if has_monotone_coordinates(manager, spec)? {
        return compare_ordered_dim(manager, spec, total_length, op, value);
    }
    log::debug!(
        "materializing {} spec over {} for comparison",
        spec.spec_type(),
        spec.dimension().name()
    );
    let materialized = materialize::materialize_dim(manager, spec, total_length)?;
    compare::compare_scalar(manager, &materialized, op, rhs)
}

fn has_monotone_coordinates(manager: &StorageManager, spec: &DimSpec) -> SavimeResult<bool> {
    if spec.spec_type() != SpecsType::Ordered {
        return Ok(false);
    }
    match spec.dimension().dimension_type() {
        DimensionType::Implicit => Ok(true),
        DimensionType::Explicit(mapping) => {
            Ok(mapping.is_sorted() || index::check_sorted(manager, mapping)?)
        }
    }
}

pub(crate) fn compare_ordered_dim(
    manager: &StorageManager,
    spec: &DimSpec,
    total_length: usize,
    op: CompareOp,
    value: LogicalIndex,
) -> SavimeResult<Dataset> {
    let block = spec.skew();
    if total_length % block != 0 {
        savime_bail!(
            "subtar of {} cells is not a whole number of {} cell blocks",
            total_length,
            block
        );
    }

    let (below, not_above) = materialize::ordered_cut_points(manager, spec, value)?;
    let adjacency = spec.adjacency();
    let (below, not_above) = (below * adjacency, not_above * adjacency);
    let (run, inside) = match op {
        CompareOp::Eq => (below..not_above, true),
        CompareOp::NotEq => (below..not_above, false),
        CompareOp::Lt => (0..below, true),
        CompareOp::Lte => (0..not_above, true),
        CompareOp::Gt => (not_above..block, true),
        CompareOp::Gte => (below..block, true),
    };
    let (run, inside) = invert_long_run(run, inside, block);

    let chunks = manager.aligned_workload(total_length).threads();
    let mask = BitMask::from_periodic_run(total_length, block, run, inside, chunks)?;
    Ok(Dataset::from_bitmask(mask))
}

/// A run touching one end of the block that covers most of it is written as its complement over
/// a set background instead.
fn invert_long_run(run: Range<usize>, inside: bool, block: usize) -> (Range<usize>, bool) {
    if run.len() * 2 <= block {
        return (run, inside);
    }
    if run.start == 0 {
        (run.end..block, !inside)
    } else if run.end == block {
        (0..run.start, !inside)
    } else {
        (run, inside)
    }
}
