use std::cmp::Reverse;
use std::sync::Arc;

use rayon::prelude::*;
use savime_dtype::{DataType, RealIndex};
use savime_error::{SavimeResult, savime_bail};

use crate::{Dataset, DimSpec, StorageManager};

/// One spec of a subset, with the strides of the subset's own layout.
struct SubsetAxis {
    /// Stride of the axis in the original block.
    adjacency: i64,
    /// Stride of the axis in the subset.
    sub_adjacency: i64,
    /// Period of the axis in the subset.
    sub_skew: i64,
}

/// The linear positions, inside the block described by `specs`, of the cells whose real
/// indices lie within `[lowers[d], uppers[d]]` along every spec `d`. Bounds are clamped to each
/// spec. The result is a sorted LONG index dataset.
#[allow(clippy::cast_possible_truncation)]
pub(crate) fn subset_dims(
    manager: &StorageManager,
    specs: &[Arc<DimSpec>],
    lowers: &[RealIndex],
    uppers: &[RealIndex],
) -> SavimeResult<Dataset> {
    if lowers.len() != specs.len() || uppers.len() != specs.len() {
        savime_bail!(
            "{} dimension specs need as many bounds, got {} lower and {} upper",
            specs.len(),
            lowers.len(),
            uppers.len()
        );
    }

    let bounds = specs
        .iter()
        .zip(lowers.iter().zip(uppers))
        .map(|(spec, (lower, upper))| {
            (
                (*lower).max(spec.lower_bound()),
                (*upper).min(spec.upper_bound()),
            )
        })
        .collect::<Vec<_>>();
    let empty = specs.is_empty() || bounds.iter().any(|(lower, upper)| lower > upper);
    let subset_length = if empty {
        0
    } else {
        bounds
            .iter()
            .map(|(lower, upper)| (upper - lower + 1) as usize)
            .product()
    };
    let offset = specs
        .iter()
        .zip(&bounds)
        .map(|(spec, (lower, _))| (lower - spec.lower_bound()) * spec.adjacency() as i64)
        .sum::<i64>();

    let mut order = (0..specs.len()).collect::<Vec<_>>();
    order.sort_by_key(|d| Reverse(specs[*d].adjacency()));
    let mut axes = Vec::with_capacity(order.len());
    let mut inner = 1i64;
    for d in order.iter().rev() {
        let (lower, upper) = bounds[*d];
        let length = upper - lower + 1;
        axes.push(SubsetAxis {
            adjacency: specs[*d].adjacency() as i64,
            sub_adjacency: inner,
            sub_skew: inner * length,
        });
        inner *= length;
    }

    let output = manager.allocate(DataType::Long, subset_length)?;
    {
        let mut handler = manager.open(&output)?;
        manager
            .workload(subset_length)
            .split_mut(handler.as_mut_slice::<i64>()?, 1)?
            .into_par_iter()
            .for_each(|(range, piece)| {
                for (i, cell) in range.zip(piece.iter_mut()) {
                    let i = i as i64;
                    *cell = offset
                        + axes
                            .iter()
                            .map(|axis| (i % axis.sub_skew) / axis.sub_adjacency * axis.adjacency)
                            .sum::<i64>();
                }
            });
    }
    output.set_has_indexes(true);
    output.set_sorted(true);
    Ok(output)
}
