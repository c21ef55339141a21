use rayon::prelude::*;
use savime_dtype::DataType;
use savime_error::SavimeResult;
use savime_mask::WORD_BITS;

use crate::{Dataset, StorageManager};

/// Replace the bit mask of `dataset` by the sorted LONG list of its set positions.
///
/// Every worker counts the set bits of its words, then writes their positions at the offset
/// given by the counts of the workers before it.
pub(crate) fn from_bitmask_to_index(
    manager: &StorageManager,
    dataset: &Dataset,
    keep_bitmask: bool,
) -> SavimeResult<()> {
    if dataset.has_indexes() {
        return Ok(());
    }
    let mask = dataset.require_bitmask("from_bitmask_to_index")?;
    let word_ranges = manager
        .aligned_workload(mask.len())
        .ranges()
        .iter()
        .map(|bits| bits.start / WORD_BITS..bits.end.div_ceil(WORD_BITS))
        .collect::<Vec<_>>();
    let counts = word_ranges
        .par_iter()
        .map(|words| mask.true_count_in(words.clone()))
        .collect::<Vec<_>>();

    let indexes = manager.allocate(DataType::Long, counts.iter().sum())?;
    {
        let mut handler = manager.open(&indexes)?;
        let mut rest = handler.as_mut_slice::<i64>()?;
        let mut pieces = Vec::with_capacity(counts.len());
        for count in counts {
            let (piece, tail) = std::mem::take(&mut rest).split_at_mut(count);
            pieces.push(piece);
            rest = tail;
        }
        word_ranges
            .into_par_iter()
            .zip(pieces)
            .for_each(|(words, piece)| {
                for (slot, position) in piece.iter_mut().zip(mask.set_indices_in(words)) {
                    *slot = position as i64;
                }
            });
    }
    dataset.adopt_index_storage(&indexes, keep_bitmask);
    Ok(())
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use savime_mask::BitMask;

    use super::*;
    use crate::test_harness::{manager, values};

    #[rstest]
    #[case(10, vec![1, 3, 7])]
    #[case(2000, vec![0, 63, 64, 127, 128, 1000, 1999])]
    #[case(100, vec![])]
    fn positions_in_order(#[case] len: usize, #[case] indices: Vec<usize>) {
        let manager = manager();
        let ds = Dataset::from_bitmask(BitMask::from_indices(len, indices.clone()).unwrap());
        manager.from_bitmask_to_index(&ds, false).unwrap();

        assert!(ds.has_indexes());
        assert!(ds.is_sorted());
        assert!(ds.bitmask().is_none());
        assert_eq!(ds.data_type(), DataType::Long);
        assert_eq!(ds.entry_count(), indices.len());
        assert_eq!(ds.length(), indices.len() as u64 * 8);
        let expected = indices.iter().map(|i| *i as i64).collect::<Vec<_>>();
        assert_eq!(values::<i64>(&manager, &ds), expected);
        assert_eq!(manager.used_storage(), ds.length());
    }

    #[test]
    fn dense_masks_split_across_workers() {
        let manager = manager();
        let ds = Dataset::from_bitmask(BitMask::from_indices(5000, (0..5000).step_by(3)).unwrap());
        manager.from_bitmask_to_index(&ds, true).unwrap();
        assert!(ds.bitmask().is_some());
        let positions = values::<i64>(&manager, &ds);
        assert_eq!(positions.len(), 1667);
        assert!(positions.iter().enumerate().all(|(i, p)| *p == i as i64 * 3));
    }

    #[test]
    fn index_form_is_left_alone() {
        let manager = manager();
        let ds = Dataset::from_bitmask(BitMask::from_indices(8, [2, 5]).unwrap());
        manager.from_bitmask_to_index(&ds, true).unwrap();
        let location = ds.location();
        manager.from_bitmask_to_index(&ds, false).unwrap();
        assert_eq!(ds.location(), location);
        assert!(ds.bitmask().is_some());
    }

    #[test]
    fn values_without_mask_are_rejected() {
        let manager = manager();
        let ds = manager.create(DataType::Integer, 4).unwrap();
        assert!(manager.from_bitmask_to_index(&ds, false).is_err());
    }

    #[test]
    fn dropping_releases_the_index_file() {
        let manager = manager();
        let ds = Dataset::from_bitmask(BitMask::from_indices(64, [1, 2, 3]).unwrap());
        manager.from_bitmask_to_index(&ds, false).unwrap();
        let location = ds.location().unwrap();
        assert!(location.exists());
        drop(ds);
        assert!(!location.exists());
        assert_eq!(manager.used_storage(), 0);
    }
}
