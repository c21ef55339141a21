//! Conversions between logical coordinates and real indices.

use std::cmp::Ordering as CmpOrdering;
use std::sync::LazyLock;
use std::sync::atomic::{AtomicBool, Ordering};

use rayon::prelude::*;
use savime_dtype::{
    ABOVE_OFFBOUNDS_REAL_INDEX, BELOW_OFFBOUNDS_REAL_INDEX, DataType, INVALID_EXACT_REAL_INDEX,
    LogicalIndex, NativeType, RealIndex, match_each_numeric_type,
};
use savime_error::{SavimeResult, savime_bail};

use crate::dispatch::{KernelTable, numeric_pair_table};
use crate::{Dataset, DimSpec, Dimension, DimensionType, StorageManager};

const TOLERANCE: f64 = 1e-6;

/// Real index of `value` along `dimension`, or [`INVALID_EXACT_REAL_INDEX`] when no coordinate
/// equals it.
#[allow(clippy::cast_possible_truncation)]
pub(crate) fn logical_to_real(
    manager: &StorageManager,
    dimension: &Dimension,
    value: LogicalIndex,
) -> SavimeResult<RealIndex> {
    match dimension.dimension_type() {
        DimensionType::Implicit => {
            let v = value.as_f64();
            if v.is_nan() || v < dimension.lower_bound() || v > dimension.upper_bound() {
                return Ok(INVALID_EXACT_REAL_INDEX);
            }
            let offset = (v - dimension.lower_bound()) / dimension.spacing();
            let rounded = offset.round();
            Ok(if (offset - rounded).abs() < TOLERANCE {
                rounded as RealIndex
            } else {
                INVALID_EXACT_REAL_INDEX
            })
        }
        DimensionType::Explicit(mapping) => {
            let sorted = mapping.is_sorted();
            match_each_numeric_type!(mapping.data_type(), |$T| {
                let mut handler = manager.open(mapping)?;
                let coordinates = handler.as_slice::<$T>()?;
                let found = if sorted {
                    search_sorted(coordinates, value)
                } else {
                    scan(manager, coordinates, value)
                };
                Ok(found.map_or(INVALID_EXACT_REAL_INDEX, |i| i as RealIndex))
            })
        }
    }
}

fn search_sorted<T: NativeType>(coordinates: &[T], value: LogicalIndex) -> Option<usize> {
    let idx = coordinates.partition_point(|c| value.compare_native(*c) == Some(CmpOrdering::Less));
    coordinates
        .get(idx)
        .filter(|c| value.compare_native(**c) == Some(CmpOrdering::Equal))
        .map(|_| idx)
}

/// First position holding `value`, searched in parallel.
fn scan<T: NativeType>(
    manager: &StorageManager,
    coordinates: &[T],
    value: LogicalIndex,
) -> Option<usize> {
    manager
        .workload(coordinates.len())
        .map(|mut range| {
            range.find(|&i| value.compare_native(coordinates[i]) == Some(CmpOrdering::Equal))
        })
        .into_iter()
        .flatten()
        .next()
}

/// Real index of the last coordinate not greater than `value`.
///
/// Values outside the dimension give [`BELOW_OFFBOUNDS_REAL_INDEX`] or
/// [`ABOVE_OFFBOUNDS_REAL_INDEX`]. NaN, and any value an unsorted explicit dimension does not
/// hold exactly, gives [`INVALID_EXACT_REAL_INDEX`].
#[allow(clippy::cast_possible_truncation)]
pub(crate) fn logical_to_approx_real(
    manager: &StorageManager,
    dimension: &Dimension,
    value: LogicalIndex,
) -> SavimeResult<RealIndex> {
    match dimension.dimension_type() {
        DimensionType::Implicit => {
            let v = value.as_f64();
            if v.is_nan() {
                return Ok(INVALID_EXACT_REAL_INDEX);
            }
            if v < dimension.lower_bound() {
                return Ok(BELOW_OFFBOUNDS_REAL_INDEX);
            }
            if v > dimension.upper_bound() {
                return Ok(ABOVE_OFFBOUNDS_REAL_INDEX);
            }
            let offset = (v - dimension.lower_bound()) / dimension.spacing();
            let rounded = offset.round();
            Ok(if (offset - rounded).abs() < TOLERANCE {
                rounded as RealIndex
            } else {
                offset.floor() as RealIndex
            })
        }
        DimensionType::Explicit(mapping) if mapping.is_sorted() => {
            match_each_numeric_type!(mapping.data_type(), |$T| {
                let mut handler = manager.open(mapping)?;
                let coordinates = handler.as_slice::<$T>()?;
                let (Some(first), Some(last)) = (coordinates.first(), coordinates.last()) else {
                    return Ok(INVALID_EXACT_REAL_INDEX);
                };
                Ok(match (value.compare_native(*first), value.compare_native(*last)) {
                    (None, _) | (_, None) => INVALID_EXACT_REAL_INDEX,
                    (Some(CmpOrdering::Greater), _) => BELOW_OFFBOUNDS_REAL_INDEX,
                    (_, Some(CmpOrdering::Less)) => ABOVE_OFFBOUNDS_REAL_INDEX,
                    _ => {
                        let not_greater = coordinates.partition_point(|c| {
                            value.compare_native(*c) != Some(CmpOrdering::Greater)
                        });
                        not_greater as RealIndex - 1
                    }
                })
            })
        }
        DimensionType::Explicit(_) => logical_to_real(manager, dimension, value),
    }
}

/// Coordinate at `real` along `dimension`. Explicit dimensions give zero past their mapping.
pub(crate) fn real_to_logical(
    manager: &StorageManager,
    dimension: &Dimension,
    real: RealIndex,
) -> SavimeResult<LogicalIndex> {
    match_each_numeric_type!(dimension.data_type(), |$T| {
        let value = match dimension.dimension_type() {
            DimensionType::Implicit => <$T>::from_f64(
                real as f64 * dimension.spacing() + dimension.lower_bound(),
            ),
            DimensionType::Explicit(mapping) => {
                let mut handler = manager.open(mapping)?;
                let coordinates = handler.as_slice::<$T>()?;
                usize::try_from(real)
                    .ok()
                    .and_then(|r| coordinates.get(r).copied())
                    .unwrap_or_default()
            }
        };
        Ok(LogicalIndex::from_native(value))
    })
}

/// Fills the output dataset and reports whether every position converted.
type ConvertFn = fn(&StorageManager, &DimSpec, &Dataset, &Dataset) -> SavimeResult<bool>;

static LOGICAL_TO_REAL: LazyLock<KernelTable<ConvertFn>> =
    LazyLock::new(|| numeric_pair_table!("logical to real conversion", to_real_kernel, ConvertFn));

static REAL_TO_LOGICAL: LazyLock<KernelTable<ConvertFn>> = LazyLock::new(|| {
    numeric_pair_table!("real to logical conversion", to_logical_kernel, ConvertFn)
});

/// Convert a dataset of coordinates into LONG real indices within `spec`.
///
/// Every position is converted before invalid ones are reported, and a failed conversion
/// returns no dataset.
pub(crate) fn logical_to_real_dataset(
    manager: &StorageManager,
    spec: &DimSpec,
    logical: &Dataset,
) -> SavimeResult<Dataset> {
    let dimension = spec.dimension();
    let coordinate_type = dimension.mapping().map_or(DataType::Long, Dataset::data_type);
    let kernel = LOGICAL_TO_REAL.lookup(logical.data_type(), coordinate_type)?;
    let output = manager.allocate(DataType::Long, logical.entry_count())?;
    if !kernel(manager, spec, logical, &output)? {
        savime_bail!(
            InvalidMapping: "values do not map onto real indices of {} within [{}, {}]",
            dimension.name(),
            spec.lower_bound(),
            spec.upper_bound()
        );
    }
    Ok(output)
}

#[allow(clippy::cast_possible_truncation)]
fn to_real_kernel<L: NativeType, M: NativeType>(
    manager: &StorageManager,
    spec: &DimSpec,
    logical: &Dataset,
    output: &Dataset,
) -> SavimeResult<bool> {
    let dimension = spec.dimension();
    let (lower, upper) = (spec.lower_bound(), spec.upper_bound());
    let mut input_handler = manager.open(logical)?;
    let mut output_handler = manager.open(output)?;
    let values = input_handler.as_slice::<L>()?;
    let reals = output_handler.as_mut_slice::<i64>()?;
    let invalid = AtomicBool::new(false);

    let table = match dimension.mapping() {
        None => None,
        Some(mapping) => {
            let mut handler = manager.open(mapping)?;
            let mut table = handler
                .as_slice::<M>()?
                .iter()
                .enumerate()
                .map(|(i, c)| (*c, i as RealIndex))
                .collect::<Vec<_>>();
            table.par_sort_unstable_by(|a, b| a.0.total_compare(b.0).then(a.1.cmp(&b.1)));
            Some(table)
        }
    };

    let pieces = manager.workload(values.len()).split_mut(reals, 1)?;
    pieces.into_par_iter().for_each(|(range, out)| {
        for (slot, &value) in out.iter_mut().zip(&values[range]) {
            let real = match &table {
                None => {
                    let offset = (value.as_f64() - dimension.lower_bound()) / dimension.spacing();
                    if offset.is_nan() || offset < 0.0 {
                        INVALID_EXACT_REAL_INDEX
                    } else {
                        offset as RealIndex
                    }
                }
                Some(table) => {
                    let end = table.partition_point(|(c, _)| {
                        c.compare(value)
                            .is_some_and(|o| o != CmpOrdering::Greater)
                    });
                    match end.checked_sub(1).map(|i| table[i]) {
                        Some((c, idx)) if c.compare(value) == Some(CmpOrdering::Equal) => idx,
                        _ => INVALID_EXACT_REAL_INDEX,
                    }
                }
            };
            if real < lower || real > upper {
                invalid.store(true, Ordering::Relaxed);
            }
            *slot = real;
        }
    });
    Ok(!invalid.load(Ordering::Relaxed))
}

/// Convert a dataset of real indices within `spec` into coordinates of the dimension's type.
pub(crate) fn real_to_logical_dataset(
    manager: &StorageManager,
    spec: &DimSpec,
    real: &Dataset,
) -> SavimeResult<Dataset> {
    let dimension = spec.dimension();
    if !real.data_type().is_integral() {
        savime_bail!(MismatchedTypes: "integral", real.data_type());
    }
    let kernel = REAL_TO_LOGICAL.lookup(real.data_type(), dimension.data_type())?;
    let output = manager.allocate(dimension.data_type(), real.entry_count())?;
    if !kernel(manager, spec, real, &output)? {
        savime_bail!(
            InvalidMapping: "real indices outside [{}, {}] of {}",
            spec.lower_bound(),
            spec.upper_bound(),
            dimension.name()
        );
    }
    Ok(output)
}

fn to_logical_kernel<R: NativeType, T: NativeType>(
    manager: &StorageManager,
    spec: &DimSpec,
    real: &Dataset,
    output: &Dataset,
) -> SavimeResult<bool> {
    let dimension = spec.dimension();
    let (lower, upper) = (spec.lower_bound(), spec.upper_bound());
    let mut input_handler = manager.open(real)?;
    let mut output_handler = manager.open(output)?;
    let reals = input_handler.as_slice::<R>()?;
    let values = output_handler.as_mut_slice::<T>()?;
    let mut mapping_handler = dimension.mapping().map(|m| manager.open(m)).transpose()?;
    let mapping = match mapping_handler.as_mut() {
        Some(handler) => Some(handler.as_slice::<T>()?),
        None => None,
    };
    let invalid = AtomicBool::new(false);

    let pieces = manager.workload(reals.len()).split_mut(values, 1)?;
    pieces.into_par_iter().for_each(|(range, out)| {
        for (slot, &real) in out.iter_mut().zip(&reals[range]) {
            let real = real.as_i64();
            if real < lower || real > upper {
                invalid.store(true, Ordering::Relaxed);
                continue;
            }
            match mapping {
                None => {
                    *slot = T::from_f64(
                        real as f64 * dimension.spacing() + dimension.lower_bound(),
                    );
                }
                Some(mapping) => match usize::try_from(real).ok().and_then(|r| mapping.get(r)) {
                    Some(value) => *slot = *value,
                    None => invalid.store(true, Ordering::Relaxed),
                },
            }
        }
    });
    Ok(!invalid.load(Ordering::Relaxed))
}

/// Whether the values of `dataset` never decrease. The answer is recorded on the dataset.
pub(crate) fn check_sorted(manager: &StorageManager, dataset: &Dataset) -> SavimeResult<bool> {
    let sorted = match_each_numeric_type!(dataset.data_type(), |$T| {
        let mut handler = manager.open(dataset)?;
        let values = handler.as_slice::<$T>()?;
        manager
            .workload(values.len())
            .map(|range| {
                (range.start.max(1)..range.end)
                    .all(|i| values[i - 1].total_compare(values[i]) != CmpOrdering::Greater)
            })
            .into_iter()
            .all(|sorted| sorted)
    });
    dataset.set_sorted(sorted);
    Ok(sorted)
}
