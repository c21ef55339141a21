use std::cmp::Ordering;
use std::sync::Arc;

use savime_dtype::{NativeType, match_each_numeric_type};
use savime_error::SavimeResult;
use savime_mask::BitMask;

use super::{filter, index, materialize};
use crate::{Dataset, DimSpec, Dimension, StorageManager};

/// The coordinates of `first` that are also coordinates of `second`, in the order of `first`,
/// as an explicit dimension named after `first`.
pub(crate) fn intersect_dimensions(
    manager: &StorageManager,
    first: &Dimension,
    second: &Dimension,
) -> SavimeResult<Dimension> {
    let (Some(lhs), Some(rhs)) = (coordinates(manager, first)?, coordinates(manager, second)?)
    else {
        let empty = manager.allocate(first.data_type(), 0)?;
        return Dimension::explicit(first.name(), empty);
    };

    let lhs_sorted = index::check_sorted(manager, &lhs)?;
    let rhs_sorted = index::check_sorted(manager, &rhs)?;
    let mask = match_each_numeric_type!(first.data_type(), |$A| {
        match_each_numeric_type!(second.data_type(), |$B| {
            membership::<$A, $B>(manager, &lhs, lhs_sorted, &rhs, rhs_sorted)?
        })
    });
    log::debug!(
        "{} of {} coordinates of {} are in {}",
        mask.true_count(),
        mask.len(),
        first.name(),
        second.name()
    );
    let shared = filter::filter(manager, &lhs, &Dataset::from_bitmask(mask))?;
    Dimension::explicit(first.name(), shared)
}

/// Every coordinate of `dimension` in real index order, or `None` for an empty dimension.
fn coordinates(manager: &StorageManager, dimension: &Dimension) -> SavimeResult<Option<Dataset>> {
    let length = dimension.length();
    if length == 0 {
        return Ok(None);
    }
    let spec = DimSpec::ordered(Arc::new(dimension.clone()), 0, length as i64 - 1, 1)?;
    materialize::materialize_dim(manager, &spec, length).map(Some)
}

fn position_of<T: NativeType, U: NativeType>(sorted: &[T], value: U) -> Option<usize> {
    let start = sorted.partition_point(|v| v.compare(value) == Some(Ordering::Less));
    sorted
        .get(start)
        .is_some_and(|v| v.compare(value) == Some(Ordering::Equal))
        .then_some(start)
}

/// Which values of `lhs` appear in `rhs`.
fn membership<A: NativeType, B: NativeType>(
    manager: &StorageManager,
    lhs: &Dataset,
    lhs_sorted: bool,
    rhs: &Dataset,
    rhs_sorted: bool,
) -> SavimeResult<BitMask> {
    let mut lhs_handler = manager.open(lhs)?;
    let mut rhs_handler = manager.open(rhs)?;
    let lhs = lhs_handler.as_slice::<A>()?;
    let rhs = rhs_handler.as_slice::<B>()?;
    let chunks = manager.aligned_workload(lhs.len()).threads();

    if rhs_sorted {
        return Ok(BitMask::from_fn(lhs.len(), chunks, |i| {
            position_of(rhs, lhs[i]).is_some()
        }));
    }
    if lhs_sorted {
        let mut hits = Vec::new();
        for value in rhs {
            if let Some(start) = position_of(lhs, *value) {
                hits.extend(
                    (start..lhs.len())
                        .take_while(|i| lhs[*i].compare(*value) == Some(Ordering::Equal)),
                );
            }
        }
        return BitMask::from_indices(lhs.len(), hits);
    }
    Ok(BitMask::from_fn(lhs.len(), chunks, |i| {
        rhs.iter()
            .any(|v| lhs[i].compare(*v) == Some(Ordering::Equal))
    }))
}
