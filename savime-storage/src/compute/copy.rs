use std::sync::LazyLock;

use rayon::prelude::*;
use savime_dtype::{NativeType, match_each_integral_type};
use savime_error::{SavimeResult, savime_bail, savime_err};

use crate::dispatch::{KernelTable, numeric_pair_table};
use crate::{Dataset, StorageManager};

type CopyRangeFn =
    fn(&StorageManager, &Dataset, usize, usize, usize, usize, &Dataset) -> SavimeResult<()>;

static COPY_RANGE: LazyLock<KernelTable<CopyRangeFn>> =
    LazyLock::new(|| numeric_pair_table!("range copy", copy_range_kernel, CopyRangeFn));

fn copy_range_kernel<O: NativeType, D: NativeType>(
    manager: &StorageManager,
    origin: &Dataset,
    lower: usize,
    upper: usize,
    offset: usize,
    spacing: usize,
    dest: &Dataset,
) -> SavimeResult<()> {
    let mut origin_handler = manager.open(origin)?;
    let mut dest_handler = manager.open(dest)?;
    let values = &origin_handler.as_slice::<O>()?[lower..=upper];
    let cells = &mut dest_handler.as_mut_slice::<D>()?[offset..];
    manager
        .workload(values.len())
        .split_mut(cells, spacing)?
        .into_par_iter()
        .for_each(|(range, piece)| {
            for (value, slot) in values[range].iter().zip(piece.chunks_mut(spacing)) {
                if let Some(cell) = slot.first_mut() {
                    *cell = value.cast();
                }
            }
        });
    Ok(())
}

/// `dest[(i - lower) * spacing + offset] = origin[i]` for every `i` in `[lower, upper]`, cast to
/// the type of `dest`.
pub(crate) fn copy_range(
    manager: &StorageManager,
    origin: &Dataset,
    lower: usize,
    upper: usize,
    offset: usize,
    spacing: usize,
    dest: &Dataset,
) -> SavimeResult<()> {
    if spacing == 0 {
        savime_bail!("copy spacing must be at least 1");
    }
    if upper < lower {
        savime_bail!("copy range [{}, {}] is empty", lower, upper);
    }
    if upper >= origin.entry_count() {
        savime_bail!(OutOfBounds: upper, 0, origin.entry_count());
    }
    let last = (upper - lower)
        .checked_mul(spacing)
        .and_then(|span| span.checked_add(offset))
        .ok_or_else(|| savime_err!("copy of [{}, {}] overflows", lower, upper))?;
    if last >= dest.entry_count() {
        savime_bail!(OutOfBounds: last, 0, dest.entry_count());
    }
    let kernel = COPY_RANGE.lookup(origin.data_type(), dest.data_type())?;
    kernel(manager, origin, lower, upper, offset, spacing, dest)
}

type CopyMappingFn = fn(&StorageManager, &Dataset, &Dataset, &Dataset) -> SavimeResult<usize>;

static COPY_MAPPING: LazyLock<KernelTable<CopyMappingFn>> =
    LazyLock::new(|| numeric_pair_table!("mapped copy", copy_mapping_kernel, CopyMappingFn));

fn copy_mapping_kernel<O: NativeType, D: NativeType>(
    manager: &StorageManager,
    origin: &Dataset,
    mapping: &Dataset,
    dest: &Dataset,
) -> SavimeResult<usize> {
    match_each_integral_type!(mapping.data_type(), |$M| {
        scatter::<O, $M, D>(manager, origin, mapping, dest)
    })
}

fn scatter<O: NativeType, M: NativeType, D: NativeType>(
    manager: &StorageManager,
    origin: &Dataset,
    mapping: &Dataset,
    dest: &Dataset,
) -> SavimeResult<usize> {
    let mut origin_handler = manager.open(origin)?;
    let mut mapping_handler = manager.open(mapping)?;
    let mut dest_handler = manager.open(dest)?;
    let values = origin_handler.as_slice::<O>()?;
    let targets = mapping_handler.as_slice::<M>()?;
    let cells = dest_handler.as_mut_slice::<D>()?;
    let len = values.len().min(targets.len());
    let cell_count = cells.len();

    let copied = manager
        .workload(len)
        .map(|range| {
            let mut copied = 0usize;
            for &target in &targets[range] {
                let target = target.as_i64();
                if target == -1 {
                    continue;
                }
                if !usize::try_from(target).is_ok_and(|t| t < cell_count) {
                    savime_bail!(
                        InvalidMapping: "position {} is outside a destination of {}",
                        target,
                        cell_count
                    );
                }
                copied += 1;
            }
            Ok(copied)
        })
        .into_iter()
        .sum::<SavimeResult<usize>>()?;

    // mapping entries may repeat, so the scatter is not split between workers
    for (value, &target) in values.iter().zip(targets) {
        if let Some(cell) = usize::try_from(target.as_i64())
            .ok()
            .and_then(|t| cells.get_mut(t))
        {
            *cell = value.cast();
        }
    }
    Ok(copied)
}

/// `dest[mapping[i]] = origin[i]` for every `i` whose mapping is not `-1`. Returns the number
/// of values copied.
pub(crate) fn copy_mapping(
    manager: &StorageManager,
    origin: &Dataset,
    mapping: &Dataset,
    dest: &Dataset,
) -> SavimeResult<usize> {
    if !mapping.data_type().is_integral() {
        savime_bail!(MismatchedTypes: "an integral mapping", mapping.data_type());
    }
    let kernel = COPY_MAPPING.lookup(origin.data_type(), dest.data_type())?;
    kernel(manager, origin, mapping, dest)
}
