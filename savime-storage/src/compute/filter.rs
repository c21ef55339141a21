use rayon::prelude::*;
use savime_dtype::{DataType, NativeType, match_each_numeric_type};
use savime_error::{SavimeResult, savime_bail, savime_err};

use super::bitmask_index;
use crate::{Dataset, StorageManager};

/// The values of `origin` at the positions selected by `filter`, a bit mask or LONG index
/// dataset. Bit masks are converted to index form in place and keep their bits.
pub(crate) fn filter(
    manager: &StorageManager,
    origin: &Dataset,
    filter: &Dataset,
) -> SavimeResult<Dataset> {
    if !filter.has_indexes() {
        bitmask_index::from_bitmask_to_index(manager, filter, true)?;
    }
    if filter.data_type() != DataType::Long {
        savime_bail!(MismatchedTypes: DataType::Long, filter.data_type());
    }
    let output = match_each_numeric_type!(origin.data_type(), |$T| {
        gather::<$T>(manager, origin, filter)?
    });
    output.set_sorted(origin.is_sorted() && filter.is_sorted());
    Ok(output)
}

fn gather<T: NativeType>(
    manager: &StorageManager,
    origin: &Dataset,
    filter: &Dataset,
) -> SavimeResult<Dataset> {
    let mut origin_handler = manager.open(origin)?;
    let mut filter_handler = manager.open(filter)?;
    let values = origin_handler.as_slice::<T>()?;
    let positions = filter_handler.as_slice::<i64>()?;

    let workload = manager.workload(positions.len());
    workload.for_each(|range| {
        match positions[range]
            .iter()
            .find(|p| !usize::try_from(**p).is_ok_and(|p| p < values.len()))
        {
            Some(p) => Err(savime_err!(
                "filter selects position {} of a dataset of {} values",
                p,
                values.len()
            )),
            None => Ok(()),
        }
    })?;

    let output = manager.allocate(T::DTYPE, positions.len())?;
    let mut output_handler = manager.open(&output)?;
    workload
        .split_mut(output_handler.as_mut_slice::<T>()?, 1)?
        .into_par_iter()
        .for_each(|(range, piece)| {
            for (cell, position) in piece.iter_mut().zip(&positions[range]) {
                *cell = usize::try_from(*position)
                    .ok()
                    .and_then(|p| values.get(p))
                    .copied()
                    .unwrap_or_default();
            }
        });
    Ok(output)
}

#[cfg(test)]
mod tests {
    use savime_dtype::{INVALID_EXACT_REAL_INDEX, LogicalIndex};
    use savime_mask::BitMask;

    use super::*;
    use crate::Dimension;
    use crate::test_harness::{create_from, manager, values};

    #[test]
    fn filter_by_mask() {
        let manager = manager();
        let origin = create_from(&manager, &[10.0f32, 11.0, 12.0, 13.0, 14.0]);
        let mask = Dataset::from_bitmask(BitMask::from_indices(5, [0, 3, 4]).unwrap());
        let result = manager.filter(&origin, &mask).unwrap();
        assert_eq!(values::<f32>(&manager, &result), vec![10.0, 13.0, 14.0]);
        assert!(mask.has_indexes());
        assert!(mask.bitmask().is_some());
    }

    #[test]
    fn count_matches_selected_bits() {
        let manager = manager();
        let origin = create_from(&manager, &(0..10_000i64).collect::<Vec<_>>());
        origin.set_sorted(true);
        let mask = BitMask::from_indices(10_000, (0..10_000).filter(|i| i % 7 == 2)).unwrap();
        let expected = mask.true_count();
        let result = manager.filter(&origin, &Dataset::from_bitmask(mask)).unwrap();
        assert_eq!(result.entry_count(), expected);
        assert!(result.is_sorted());
        assert!(values::<i64>(&manager, &result).iter().all(|v| v % 7 == 2));
    }

    #[test]
    fn filter_by_indexes() {
        let manager = manager();
        let origin = create_from(&manager, &[5i32, 6, 7]);
        let indexes = create_from(&manager, &[2i64, 2, 0]);
        indexes.set_has_indexes(true);
        let result = manager.filter(&origin, &indexes).unwrap();
        assert_eq!(values::<i32>(&manager, &result), vec![7, 7, 5]);
        assert!(!result.is_sorted());
    }

    #[test]
    fn out_of_range_positions_fail() {
        let manager = manager();
        let origin = create_from(&manager, &[5i32, 6, 7]);
        let used = manager.used_storage();
        for bad in [3i64, -1] {
            let indexes = create_from(&manager, &[0i64, bad]);
            indexes.set_has_indexes(true);
            assert!(manager.filter(&origin, &indexes).is_err());
        }
        assert_eq!(manager.used_storage(), used);
    }

    #[test]
    fn reordering_indexes_clear_sortedness() {
        let manager = manager();
        let origin = create_from(&manager, &[10i64, 20, 30]);
        origin.set_sorted(true);
        let indexes = create_from(&manager, &[2i64, 0]);
        indexes.set_has_indexes(true);
        let result = manager.filter(&origin, &indexes).unwrap();
        assert_eq!(values::<i64>(&manager, &result), vec![30, 10]);
        assert!(!result.is_sorted());

        let dim = Dimension::explicit("t", result).unwrap();
        assert_eq!(
            manager
                .logical_to_real(&dim, LogicalIndex::from(10i64))
                .unwrap(),
            1
        );
        assert_eq!(
            manager
                .logical_to_real(&dim, LogicalIndex::from(25i64))
                .unwrap(),
            INVALID_EXACT_REAL_INDEX
        );
    }
}
