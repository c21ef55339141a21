use savime_error::SavimeResult;

use crate::{Dataset, StorageManager};

pub(crate) fn and(manager: &StorageManager, lhs: &Dataset, rhs: &Dataset) -> SavimeResult<Dataset> {
    let lhs = lhs.require_bitmask("and")?;
    let rhs = rhs.require_bitmask("and")?;
    let chunks = manager.aligned_workload(lhs.len()).threads();
    Ok(Dataset::from_bitmask(lhs.and(&rhs, chunks)?))
}

pub(crate) fn or(manager: &StorageManager, lhs: &Dataset, rhs: &Dataset) -> SavimeResult<Dataset> {
    let lhs = lhs.require_bitmask("or")?;
    let rhs = rhs.require_bitmask("or")?;
    let chunks = manager.aligned_workload(lhs.len()).threads();
    Ok(Dataset::from_bitmask(lhs.or(&rhs, chunks)?))
}

pub(crate) fn not(manager: &StorageManager, operand: &Dataset) -> SavimeResult<Dataset> {
    let mask = operand.require_bitmask("not")?;
    let chunks = manager.aligned_workload(mask.len()).threads();
    Ok(Dataset::from_bitmask(mask.not(chunks)))
}
