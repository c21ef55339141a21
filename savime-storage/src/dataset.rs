use std::fmt::{Debug, Formatter};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use savime_dtype::DataType;
use savime_error::{SavimeResult, savime_bail, savime_err};
use savime_mask::BitMask;

use crate::StorageAccountant;

static NEXT_DATASET_ID: AtomicU64 = AtomicU64::new(1);

/// A flat sequence of fixed width values backed by a file, or a bit mask held in memory.
///
/// Handles are reference counted. Once the last handle of a dataset owned by a storage manager
/// is dropped, its file is removed and its bytes are returned to the manager's budget.
#[derive(Clone)]
pub struct Dataset(Arc<DatasetInner>);

struct DatasetInner {
    id: u64,
    name: String,
    state: RwLock<DatasetState>,
}

#[derive(Debug)]
struct DatasetState {
    data_type: DataType,
    entry_count: usize,
    length: u64,
    location: Option<PathBuf>,
    sorted: bool,
    has_indexes: bool,
    bitmask: Option<BitMask>,
    accountant: Option<Arc<StorageAccountant>>,
}

impl Dataset {
    fn from_state(name: String, state: DatasetState) -> Self {
        Self(Arc::new(DatasetInner {
            id: NEXT_DATASET_ID.fetch_add(1, Ordering::Relaxed),
            name,
            state: RwLock::new(state),
        }))
    }

    /// A dataset whose only representation is a bit mask, one bit per position.
    pub fn from_bitmask(mask: BitMask) -> Self {
        Self::from_state(
            String::new(),
            DatasetState {
                data_type: DataType::Boolean,
                entry_count: mask.len(),
                length: 0,
                location: None,
                sorted: false,
                has_indexes: false,
                bitmask: Some(mask),
                accountant: None,
            },
        )
    }

    /// Describe a file produced outside the storage manager.
    ///
    /// The dataset is not accounted, and its file is left in place when it is dropped, until it
    /// is handed to [`crate::StorageManager::save`].
    pub fn external(data_type: DataType, location: impl AsRef<Path>) -> SavimeResult<Self> {
        let location = location.as_ref();
        let Some(width) = data_type.byte_width() else {
            savime_bail!(Unsupported: "{} datasets have no fixed width", data_type);
        };
        let length = fs::metadata(location)
            .map_err(|e| savime_err!(Context: "reading dataset metadata", e.into()))?
            .len();
        if length % width as u64 != 0 {
            savime_bail!(
                "file {} of {} bytes does not hold whole {} values",
                location.display(),
                length,
                data_type
            );
        }
        let name = location
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(Self::from_state(
            name,
            DatasetState {
                data_type,
                entry_count: usize::try_from(length / width as u64)
                    .map_err(|_| savime_err!("dataset {} is too large", location.display()))?,
                length,
                location: Some(location.to_path_buf()),
                sorted: false,
                has_indexes: false,
                bitmask: None,
                accountant: None,
            },
        ))
    }

    /// A freshly allocated file of `entry_count` values, already accounted by `accountant`.
    pub(crate) fn managed(
        data_type: DataType,
        entry_count: usize,
        length: u64,
        location: PathBuf,
        accountant: Arc<StorageAccountant>,
    ) -> Self {
        let name = location
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self::from_state(
            name,
            DatasetState {
                data_type,
                entry_count,
                length,
                location: Some(location),
                sorted: false,
                has_indexes: false,
                bitmask: None,
                accountant: Some(accountant),
            },
        )
    }

    /// Process wide unique identifier.
    pub fn id(&self) -> u64 {
        self.0.id
    }

    /// Name of the dataset, the file name for file backed datasets.
    pub fn name(&self) -> &str {
        &self.0.name
    }

    /// Type of the stored values.
    pub fn data_type(&self) -> DataType {
        self.0.state.read().data_type
    }

    /// Number of values, or of bits for a bit mask dataset.
    pub fn entry_count(&self) -> usize {
        self.0.state.read().entry_count
    }

    /// Size of the backing file in bytes.
    pub fn length(&self) -> u64 {
        self.0.state.read().length
    }

    /// Path of the backing file, if any.
    pub fn location(&self) -> Option<PathBuf> {
        self.0.state.read().location.clone()
    }

    /// Whether values are known to be in non-decreasing order.
    pub fn is_sorted(&self) -> bool {
        self.0.state.read().sorted
    }

    /// Record the result of a sortedness check.
    pub fn set_sorted(&self, sorted: bool) {
        self.0.state.write().sorted = sorted;
    }

    /// Whether the values are LONG positions selected from another dataset.
    pub fn has_indexes(&self) -> bool {
        self.0.state.read().has_indexes
    }

    /// Mark the values as a list of positions.
    pub fn set_has_indexes(&self, has_indexes: bool) {
        self.0.state.write().has_indexes = has_indexes;
    }

    /// The bit mask representation, if this dataset holds one.
    pub fn bitmask(&self) -> Option<BitMask> {
        self.0.state.read().bitmask.clone()
    }

    /// Return the bit mask or fail naming the operation that needed it.
    pub(crate) fn require_bitmask(&self, operation: &str) -> SavimeResult<BitMask> {
        self.bitmask()
            .ok_or_else(|| savime_err!("{} requires a bitmask dataset", operation))
    }

    /// Whether dropping the last handle releases storage back to a manager.
    pub fn is_managed(&self) -> bool {
        self.0.state.read().accountant.is_some()
    }

    pub(crate) fn accountant(&self) -> Option<Arc<StorageAccountant>> {
        self.0.state.read().accountant.clone()
    }

    /// Whether both handles refer to the same dataset.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn set_extent(&self, length: u64, entry_count: usize) {
        let mut state = self.0.state.write();
        state.length = length;
        state.entry_count = entry_count;
    }

    /// Hand ownership of the budget for this dataset's current bytes to `accountant`.
    pub(crate) fn bind(&self, accountant: Arc<StorageAccountant>) -> SavimeResult<()> {
        let mut state = self.0.state.write();
        if state.accountant.is_some() {
            savime_bail!("dataset {} is already accounted", self.0.name);
        }
        state.accountant = Some(accountant);
        Ok(())
    }

    /// Take over the file of `other`, which must be a freshly created index dataset, replacing
    /// the bit mask representation of this one.
    pub(crate) fn adopt_index_storage(&self, other: &Dataset, keep_bitmask: bool) {
        let mut theirs = other.0.state.write();
        let mut ours = self.0.state.write();
        ours.data_type = theirs.data_type;
        ours.entry_count = theirs.entry_count;
        ours.length = theirs.length;
        ours.location = theirs.location.take();
        ours.accountant = theirs.accountant.take();
        ours.has_indexes = true;
        ours.sorted = true;
        if !keep_bitmask {
            ours.bitmask = None;
        }
        theirs.length = 0;
        theirs.entry_count = 0;
    }
}

impl Drop for DatasetInner {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        let Some(accountant) = state.accountant.take() else {
            return;
        };
        if let Some(location) = state.location.take() {
            if let Err(e) = fs::remove_file(&location) {
                log::warn!("could not remove dataset file {}: {e}", location.display());
            }
        }
        if let Err(e) = accountant.release(state.length) {
            log::warn!("releasing dataset {}: {e}", self.name);
        }
    }
}

impl Debug for Dataset {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let state = self.0.state.read();
        f.debug_struct("Dataset")
            .field("id", &self.0.id)
            .field("name", &self.0.name)
            .field("data_type", &state.data_type)
            .field("entry_count", &state.entry_count)
            .field("length", &state.length)
            .field("sorted", &state.sorted)
            .field("has_indexes", &state.has_indexes)
            .field("bitmask", &state.bitmask)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bitmask_dataset() {
        let ds = Dataset::from_bitmask(BitMask::new_true(10));
        assert_eq!(ds.entry_count(), 10);
        assert_eq!(ds.location(), None);
        assert!(!ds.has_indexes());
        assert_eq!(ds.bitmask().unwrap().true_count(), 10);
        assert!(!ds.is_managed());
    }

    #[test]
    fn managed_dataset_releases_on_last_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data");
        fs::write(&path, [0u8; 16]).unwrap();

        let accountant = Arc::new(StorageAccountant::new(100));
        accountant.admit(16).unwrap();
        let ds = Dataset::managed(DataType::Long, 2, 16, path.clone(), accountant.clone());
        let other = ds.clone();

        drop(ds);
        assert!(path.exists());
        assert_eq!(accountant.used(), 16);

        drop(other);
        assert!(!path.exists());
        assert_eq!(accountant.used(), 0);
    }

    #[test]
    fn external_dataset_is_left_alone() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("values");
        fs::write(&path, [0u8; 12]).unwrap();

        let ds = Dataset::external(DataType::Integer, &path).unwrap();
        assert_eq!(ds.entry_count(), 3);
        assert_eq!(ds.name(), "values");
        drop(ds);
        assert!(path.exists());

        assert!(Dataset::external(DataType::Long, &path).is_err());
        assert!(Dataset::external(DataType::String, &path).is_err());
    }
}
