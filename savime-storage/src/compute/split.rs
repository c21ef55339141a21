use rayon::prelude::*;
use savime_dtype::match_each_numeric_type;
use savime_error::{SavimeResult, savime_bail};

use crate::{Dataset, StorageManager};

/// Cut the first `total_length` values of `origin` into `parts` datasets of equal length.
pub(crate) fn split(
    manager: &StorageManager,
    origin: &Dataset,
    total_length: usize,
    parts: usize,
) -> SavimeResult<Vec<Dataset>> {
    if parts == 0 || total_length % parts != 0 {
        savime_bail!(
            "{} values cannot be split in {} equal parts",
            total_length,
            parts
        );
    }
    if total_length > origin.entry_count() {
        savime_bail!(OutOfBounds: total_length, 0, origin.entry_count());
    }
    let part_length = total_length / parts;
    let outputs = (0..parts)
        .map(|_| manager.allocate(origin.data_type(), part_length))
        .collect::<SavimeResult<Vec<_>>>()?;
    if part_length == 0 {
        return Ok(outputs);
    }

    match_each_numeric_type!(origin.data_type(), |$T| {
        let mut origin_handler = manager.open(origin)?;
        let values = &origin_handler.as_slice::<$T>()?[..total_length];
        values
            .par_chunks(part_length)
            .zip(&outputs)
            .try_for_each(|(chunk, output)| {
                manager.open(output)?.as_mut_slice::<$T>()?.copy_from_slice(chunk);
                SavimeResult::Ok(())
            })?;
    });
    Ok(outputs)
}
