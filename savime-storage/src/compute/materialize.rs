use rayon::prelude::*;
use savime_dtype::{DataType, LogicalIndex, NativeType, match_each_numeric_type};
use savime_error::{SavimeResult, savime_bail, savime_err};

use super::bitmask_index;
use crate::{Dataset, DatasetHandler, DimSpec, SpecsType, StorageManager, Workload};

/// The coordinates of the cells selected by a filter.
#[derive(Debug, Clone)]
pub struct PartialMaterialization {
    /// Coordinates in the dimension's type.
    pub logical: Dataset,
    /// LONG real indices, produced for explicit dimensions only.
    pub real: Option<Dataset>,
}

/// Where the coordinate of the `k`-th position of a spec comes from.
enum Coordinates<'a, T> {
    /// `start + k * spacing`
    Spaced { start: f64, spacing: f64 },
    /// `values[k]`
    Listed(&'a [T]),
    /// `mapping[lower + k]`
    Range { mapping: &'a [T], lower: usize },
    /// `mapping[reals[k]]`
    Mapped { mapping: &'a [T], reals: &'a [i64] },
}

impl<T: NativeType> Coordinates<'_, T> {
    /// The real index, for explicit dimensions, and the coordinate of position `k`.
    fn lookup(&self, k: usize) -> SavimeResult<(Option<i64>, T)> {
        match *self {
            Coordinates::Spaced { start, spacing } => {
                Ok((None, T::from_f64(start + k as f64 * spacing)))
            }
            Coordinates::Listed(values) => values
                .get(k)
                .map(|v| (None, *v))
                .ok_or_else(|| savime_err!(OutOfBounds: k, 0, values.len())),
            Coordinates::Range { mapping, lower } => {
                let real = lower + k;
                let value = mapping
                    .get(real)
                    .ok_or_else(|| savime_err!(OutOfBounds: real, 0, mapping.len()))?;
                Ok((Some(real as i64), *value))
            }
            Coordinates::Mapped { mapping, reals } => {
                let real = *reals
                    .get(k)
                    .ok_or_else(|| savime_err!(OutOfBounds: k, 0, reals.len()))?;
                let value = usize::try_from(real)
                    .ok()
                    .and_then(|r| mapping.get(r))
                    .ok_or_else(|| {
                        savime_err!(
                            InvalidMapping: "real index {} is outside a mapping of {}",
                            real,
                            mapping.len()
                        )
                    })?;
                Ok((Some(real), *value))
            }
        }
    }
}

/// Handlers over the datasets a spec's coordinates are read from.
struct SpecSources {
    mapping: Option<DatasetHandler>,
    dataset: Option<DatasetHandler>,
}

impl SpecSources {
    fn open(manager: &StorageManager, spec: &DimSpec) -> SavimeResult<Self> {
        Ok(Self {
            mapping: spec
                .dimension()
                .mapping()
                .map(|m| manager.open(m))
                .transpose()?,
            dataset: spec.dataset().map(|d| manager.open(d)).transpose()?,
        })
    }

    #[allow(clippy::cast_possible_truncation)]
    fn coordinates<T: NativeType>(&mut self, spec: &DimSpec) -> SavimeResult<Coordinates<'_, T>> {
        let dimension = spec.dimension();
        let Self { mapping, dataset } = self;
        let dataset = dataset.as_mut();
        Ok(match (spec.spec_type(), mapping.as_mut()) {
            (SpecsType::Ordered, None) => Coordinates::Spaced {
                start: spec.lower_bound() as f64 * dimension.spacing() + dimension.lower_bound(),
                spacing: dimension.spacing(),
            },
            (SpecsType::Ordered, Some(mapping)) => Coordinates::Range {
                mapping: mapping.as_slice::<T>()?,
                lower: spec.lower_bound() as usize,
            },
            (_, None) => Coordinates::Listed(require(dataset, spec)?.as_slice::<T>()?),
            (_, Some(mapping)) => Coordinates::Mapped {
                mapping: mapping.as_slice::<T>()?,
                reals: require(dataset, spec)?.as_slice::<i64>()?,
            },
        })
    }
}

fn require<'a>(
    handler: Option<&'a mut DatasetHandler>,
    spec: &DimSpec,
) -> SavimeResult<&'a mut DatasetHandler> {
    handler.ok_or_else(|| {
        savime_err!(
            "{} spec over {} has no dataset",
            spec.spec_type(),
            spec.dimension().name()
        )
    })
}

/// How many leading coordinates of an ordered spec are below `value`, and how many are not
/// above it.
///
/// Coordinates are computed exactly as [`materialize_dim`] writes them, so a comparison built
/// from these counts agrees with one over the materialized dataset. The dimension must be
/// monotone.
pub(crate) fn ordered_cut_points(
    manager: &StorageManager,
    spec: &DimSpec,
    value: LogicalIndex,
) -> SavimeResult<(usize, usize)> {
    if spec.spec_type() != SpecsType::Ordered {
        savime_bail!(
            "{} spec over {} has no ordered coordinates",
            spec.spec_type(),
            spec.dimension().name()
        );
    }
    match_each_numeric_type!(spec.dimension().data_type(), |$T| {
        let mut sources = SpecSources::open(manager, spec)?;
        let coordinates = sources.coordinates::<$T>(spec)?;
        let ordering = |k| coordinates.lookup(k).map(|(_, c)| value.compare_native(c));
        let below = bisect(spec.length(), |k| Ok(ordering(k)?.is_some_and(|o| o.is_lt())))?;
        let not_above = bisect(spec.length(), |k| Ok(ordering(k)?.is_some_and(|o| o.is_le())))?;
        Ok((below, not_above))
    })
}

/// First position in `0..len` where `pred` stops holding.
fn bisect(len: usize, pred: impl Fn(usize) -> SavimeResult<bool>) -> SavimeResult<usize> {
    let (mut lo, mut hi) = (0, len);
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        if pred(mid)? {
            lo = mid + 1;
        } else {
            hi = mid;
        }
    }
    Ok(lo)
}

/// The coordinate of every cell of a subtar of `total_length` cells along `spec`.
///
/// The result is cached on the spec.
pub(crate) fn materialize_dim(
    manager: &StorageManager,
    spec: &DimSpec,
    total_length: usize,
) -> SavimeResult<Dataset> {
    if let Some(cached) = spec.materialized(total_length) {
        return Ok(cached);
    }
    let dataset = match_each_numeric_type!(spec.dimension().data_type(), |$T| {
        match spec.spec_type() {
            SpecsType::Ordered | SpecsType::Partial => {
                materialize_blocks::<$T>(manager, spec, total_length)?
            }
            SpecsType::Total => materialize_total::<$T>(manager, spec, total_length)?,
        }
    });
    spec.set_materialized(total_length, dataset.clone());
    Ok(dataset)
}

/// Write the first block, each coordinate repeated `adjacency` times, then tile it.
fn materialize_blocks<T: NativeType>(
    manager: &StorageManager,
    spec: &DimSpec,
    total_length: usize,
) -> SavimeResult<Dataset> {
    let adjacency = spec.adjacency();
    let block = spec.skew();
    if total_length % block != 0 {
        savime_bail!(
            "subtar of {} cells is not a whole number of {} cell blocks",
            total_length,
            block
        );
    }

    let output = manager.allocate(T::DTYPE, total_length)?;
    if total_length == 0 {
        return Ok(output);
    }
    let mut sources = SpecSources::open(manager, spec)?;
    let coordinates = sources.coordinates::<T>(spec)?;
    let mut output_handler = manager.open(&output)?;
    let cells = output_handler.as_mut_slice::<T>()?;
    let (first, rest) = cells.split_at_mut(block);

    Workload::new(
        spec.length(),
        manager.threads(),
        manager.work_per_thread().div_ceil(adjacency),
    )
    .split_mut(first, adjacency)?
    .into_par_iter()
    .try_for_each(|(range, piece)| {
        for (k, run) in range.zip(piece.chunks_mut(adjacency)) {
            run.fill(coordinates.lookup(k)?.1);
        }
        SavimeResult::Ok(())
    })?;

    let first: &[T] = first;
    rest.par_chunks_mut(block)
        .for_each(|tile| tile.copy_from_slice(first));
    Ok(output)
}

fn materialize_total<T: NativeType>(
    manager: &StorageManager,
    spec: &DimSpec,
    total_length: usize,
) -> SavimeResult<Dataset> {
    let dataset = spec.require_dataset()?;
    if dataset.entry_count() != total_length {
        savime_bail!(
            "TOTAL spec over {} lists {} cells for a subtar of {}",
            spec.dimension().name(),
            dataset.entry_count(),
            total_length
        );
    }
    if spec.dimension().is_implicit() {
        return Ok(dataset.clone());
    }

    let output = manager.allocate(T::DTYPE, total_length)?;
    let mut sources = SpecSources::open(manager, spec)?;
    let coordinates = sources.coordinates::<T>(spec)?;
    let mut output_handler = manager.open(&output)?;
    manager
        .workload(total_length)
        .split_mut(output_handler.as_mut_slice::<T>()?, 1)?
        .into_par_iter()
        .try_for_each(|(range, piece)| {
            for (i, cell) in range.zip(piece.iter_mut()) {
                *cell = coordinates.lookup(i)?.1;
            }
            SavimeResult::Ok(())
        })?;
    Ok(output)
}

/// The coordinates along `spec` of the cells of a subtar of `total_length` cells selected by
/// `filter`, which is converted to index form if needed.
pub(crate) fn partial_materialize_dim(
    manager: &StorageManager,
    filter: &Dataset,
    spec: &DimSpec,
    total_length: usize,
) -> SavimeResult<PartialMaterialization> {
    if !filter.has_indexes() {
        bitmask_index::from_bitmask_to_index(manager, filter, true)?;
    }
    if filter.data_type() != DataType::Long {
        savime_bail!(MismatchedTypes: DataType::Long, filter.data_type());
    }
    match_each_numeric_type!(spec.dimension().data_type(), |$T| {
        partial_materialize::<$T>(manager, filter, spec, total_length)
    })
}

fn partial_materialize<T: NativeType>(
    manager: &StorageManager,
    filter: &Dataset,
    spec: &DimSpec,
    total_length: usize,
) -> SavimeResult<PartialMaterialization> {
    let count = filter.entry_count();
    let logical = manager.allocate(T::DTYPE, count)?;
    let real = if spec.dimension().is_implicit() {
        None
    } else {
        Some(manager.allocate(DataType::Long, count)?)
    };

    let period = spec.skew();
    let adjacency = spec.adjacency();
    let total = spec.spec_type() == SpecsType::Total;
    let position = |f: i64| -> SavimeResult<usize> {
        let f = usize::try_from(f)
            .ok()
            .filter(|f| *f < total_length)
            .ok_or_else(|| savime_err!("filter position {} is outside the subtar", f))?;
        Ok(if total { f } else { (f % period) / adjacency })
    };

    let mut filter_handler = manager.open(filter)?;
    let positions = filter_handler.as_slice::<i64>()?;
    let mut sources = SpecSources::open(manager, spec)?;
    let coordinates = sources.coordinates::<T>(spec)?;
    let workload = manager.workload(count);
    let mut logical_handler = manager.open(&logical)?;
    let logical_pieces = workload.split_mut(logical_handler.as_mut_slice::<T>()?, 1)?;

    match &real {
        None => logical_pieces
            .into_par_iter()
            .try_for_each(|(range, piece)| {
                for (cell, f) in piece.iter_mut().zip(&positions[range]) {
                    *cell = coordinates.lookup(position(*f)?)?.1;
                }
                SavimeResult::Ok(())
            })?,
        Some(real) => {
            let mut real_handler = manager.open(real)?;
            let real_pieces = workload.split_mut(real_handler.as_mut_slice::<i64>()?, 1)?;
            logical_pieces
                .into_par_iter()
                .zip(real_pieces)
                .try_for_each(|((range, logical), (_, reals))| {
                    for ((cell, r), f) in logical.iter_mut().zip(reals).zip(&positions[range]) {
                        let (index, value) = coordinates.lookup(position(*f)?)?;
                        *cell = value;
                        *r = index.unwrap_or_default();
                    }
                    SavimeResult::Ok(())
                })?
        }
    }
    Ok(PartialMaterialization { logical, real })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use rstest::rstest;
    use savime_mask::BitMask;

    use super::*;
    use crate::Dimension;
    use crate::test_harness::{create_from, manager, values};

    fn implicit(data_type: DataType, lower: f64, upper: f64, spacing: f64) -> Arc<Dimension> {
        Arc::new(Dimension::implicit("x", data_type, lower, upper, spacing).unwrap())
    }

    #[test]
    fn ordered_with_adjacency() {
        let manager = manager();
        let spec = DimSpec::ordered(implicit(DataType::Long, 0.0, 4.0, 1.0), 0, 4, 2).unwrap();
        let ds = manager.materialize_dim(&spec, 20).unwrap();
        let block = vec![0i64, 0, 1, 1, 2, 2, 3, 3, 4, 4];
        assert_eq!(values::<i64>(&manager, &ds), [block.clone(), block].concat());
    }

    #[test]
    fn ordered_sub_range_with_spacing() {
        let manager = manager();
        let spec = DimSpec::ordered(implicit(DataType::Double, 1.0, 5.0, 0.5), 2, 4, 1).unwrap();
        let ds = manager.materialize_dim(&spec, 6).unwrap();
        assert_eq!(
            values::<f64>(&manager, &ds),
            vec![2.0, 2.5, 3.0, 2.0, 2.5, 3.0]
        );
    }

    #[test]
    fn large_blocks_split_across_workers() {
        let manager = manager();
        let spec =
            DimSpec::ordered(implicit(DataType::Integer, 0.0, 999.0, 1.0), 0, 999, 3).unwrap();
        let ds = manager.materialize_dim(&spec, 9000).unwrap();
        let cells = values::<i32>(&manager, &ds);
        assert!(cells.iter().enumerate().all(|(i, v)| *v as usize == (i % 3000) / 3));
    }

    #[test]
    fn result_is_cached() {
        let manager = manager();
        let spec = DimSpec::ordered(implicit(DataType::Long, 0.0, 4.0, 1.0), 0, 4, 1).unwrap();
        let first = manager.materialize_dim(&spec, 10).unwrap();
        let second = manager.materialize_dim(&spec, 10).unwrap();
        assert!(first.ptr_eq(&second));
        assert!(!manager.materialize_dim(&spec, 5).unwrap().ptr_eq(&first));
    }

    #[test]
    fn ordered_explicit() {
        let manager = manager();
        let mapping = create_from(&manager, &[10.0f32, 20.0, 30.0, 40.0]);
        let dim = Arc::new(Dimension::explicit("t", mapping).unwrap());
        let spec = DimSpec::ordered(dim, 1, 2, 1).unwrap();
        let ds = manager.materialize_dim(&spec, 4).unwrap();
        assert_eq!(values::<f32>(&manager, &ds), vec![20.0, 30.0, 20.0, 30.0]);
    }

    #[test]
    fn partial_specs() {
        let manager = manager();
        let values_ds = create_from(&manager, &[5i32, 9]);
        let spec =
            DimSpec::partial(implicit(DataType::Integer, 0.0, 9.0, 1.0), 0, 1, 2, values_ds)
                .unwrap();
        let ds = manager.materialize_dim(&spec, 8).unwrap();
        assert_eq!(values::<i32>(&manager, &ds), vec![5, 5, 9, 9, 5, 5, 9, 9]);

        let mapping = create_from(&manager, &[1.5f64, 2.5, 3.5]);
        let dim = Arc::new(Dimension::explicit("t", mapping).unwrap());
        let reals = create_from(&manager, &[2i64, 0]);
        let spec = DimSpec::partial(dim.clone(), 0, 1, 1, reals).unwrap();
        let ds = manager.materialize_dim(&spec, 4).unwrap();
        assert_eq!(values::<f64>(&manager, &ds), vec![3.5, 1.5, 3.5, 1.5]);

        let bad = create_from(&manager, &[2i64, 3]);
        let spec = DimSpec::partial(dim, 0, 1, 1, bad).unwrap();
        assert!(manager.materialize_dim(&spec, 2).is_err());
    }

    #[test]
    fn total_specs() {
        let manager = manager();
        let coords = create_from(&manager, &[3i64, 1, 1]);
        let spec =
            DimSpec::total(implicit(DataType::Long, 0.0, 9.0, 1.0), 0, 9, coords.clone()).unwrap();
        assert!(manager.materialize_dim(&spec, 3).unwrap().ptr_eq(&coords));
        assert!(manager.materialize_dim(&spec, 4).is_err());

        let mapping = create_from(&manager, &[7i32, 8, 9, 10]);
        let dim = Arc::new(Dimension::explicit("t", mapping).unwrap());
        let spec = DimSpec::total(dim, 0, 3, coords).unwrap();
        let ds = manager.materialize_dim(&spec, 3).unwrap();
        assert_eq!(values::<i32>(&manager, &ds), vec![10, 8, 8]);
    }

    #[test]
    fn uneven_total_length_is_rejected() {
        let manager = manager();
        let spec = DimSpec::ordered(implicit(DataType::Long, 0.0, 4.0, 1.0), 0, 4, 2).unwrap();
        assert!(manager.materialize_dim(&spec, 15).is_err());
        assert_eq!(manager.used_storage(), 0);
    }

    #[rstest]
    #[case(vec![0, 3, 7, 11])]
    #[case(vec![])]
    fn partial_materialization_implicit(#[case] selected: Vec<usize>) {
        let manager = manager();
        let spec = DimSpec::ordered(implicit(DataType::Long, 0.0, 9.0, 1.0), 2, 4, 2).unwrap();
        let filter = Dataset::from_bitmask(BitMask::from_indices(12, selected.clone()).unwrap());
        let result = manager.partial_materialize_dim(&filter, &spec, 12).unwrap();
        assert!(result.real.is_none());
        assert!(filter.has_indexes());

        let full = values::<i64>(&manager, &manager.materialize_dim(&spec, 12).unwrap());
        let expected = selected.iter().map(|i| full[*i]).collect::<Vec<_>>();
        assert_eq!(values::<i64>(&manager, &result.logical), expected);
    }

    #[test]
    fn partial_materialization_explicit() {
        let manager = manager();
        let mapping = create_from(&manager, &[0.5f64, 1.5, 2.5, 3.5]);
        let dim = Arc::new(Dimension::explicit("t", mapping).unwrap());
        let spec = DimSpec::ordered(dim.clone(), 1, 3, 1).unwrap();
        let filter = create_from(&manager, &[0i64, 2, 4]);
        filter.set_has_indexes(true);

        let result = manager.partial_materialize_dim(&filter, &spec, 6).unwrap();
        assert_eq!(values::<f64>(&manager, &result.logical), vec![1.5, 3.5, 2.5]);
        assert_eq!(
            values::<i64>(&manager, result.real.as_ref().unwrap()),
            vec![1, 3, 2]
        );

        let reals = create_from(&manager, &[3i64, 0, 2]);
        let total = DimSpec::total(dim, 0, 3, reals).unwrap();
        let result = manager
            .partial_materialize_dim(&create_indexes(&manager, &[2, 1]), &total, 3)
            .unwrap();
        assert_eq!(values::<f64>(&manager, &result.logical), vec![2.5, 0.5]);
        assert_eq!(
            values::<i64>(&manager, result.real.as_ref().unwrap()),
            vec![2, 0]
        );

        let outside = create_indexes(&manager, &[3]);
        assert!(manager.partial_materialize_dim(&outside, &spec, 3).is_err());
    }

    fn create_indexes(manager: &StorageManager, positions: &[i64]) -> Dataset {
        let ds = create_from(manager, positions);
        ds.set_has_indexes(true);
        ds
    }
}
