use rayon::prelude::*;
use savime_dtype::{NativeType, match_each_numeric_type};
use savime_error::{SavimeResult, savime_bail, savime_err};

use crate::{Dataset, StorageManager};

/// Repeat each of the first `entry_count` values of `origin` `recordsize` times, and the whole
/// run `copies` times: `dest[i] = origin[(i % (entry_count * recordsize)) / recordsize]`.
pub(crate) fn stretch(
    manager: &StorageManager,
    origin: &Dataset,
    entry_count: usize,
    recordsize: usize,
    copies: usize,
) -> SavimeResult<Dataset> {
    if entry_count > origin.entry_count() {
        savime_bail!(OutOfBounds: entry_count, 0, origin.entry_count());
    }
    let period = entry_count
        .checked_mul(recordsize)
        .ok_or_else(|| savime_err!("stretched dataset is too large"))?;
    let total = period
        .checked_mul(copies)
        .ok_or_else(|| savime_err!("stretched dataset is too large"))?;
    match_each_numeric_type!(origin.data_type(), |$T| {
        stretch_values::<$T>(manager, origin, recordsize, period, total)
    })
}

fn stretch_values<T: NativeType>(
    manager: &StorageManager,
    origin: &Dataset,
    recordsize: usize,
    period: usize,
    total: usize,
) -> SavimeResult<Dataset> {
    let output = manager.allocate(T::DTYPE, total)?;
    if total == 0 {
        return Ok(output);
    }
    let mut origin_handler = manager.open(origin)?;
    let mut output_handler = manager.open(&output)?;
    let values = origin_handler.as_slice::<T>()?;
    manager
        .workload(total)
        .split_mut(output_handler.as_mut_slice::<T>()?, 1)?
        .into_par_iter()
        .for_each(|(range, piece)| {
            for (i, cell) in range.zip(piece.iter_mut()) {
                *cell = values[(i % period) / recordsize];
            }
        });
    Ok(output)
}
