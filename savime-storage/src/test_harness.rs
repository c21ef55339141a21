#![allow(clippy::unwrap_used)]

use std::ops::Deref;

use savime_dtype::NativeType;
use tempfile::TempDir;

use crate::{Dataset, StorageConfig, StorageManager};

/// A storage manager rooted in a temporary directory that lives as long as the manager.
pub(crate) struct TestManager {
    manager: StorageManager,
    _dir: TempDir,
}

impl Deref for TestManager {
    type Target = StorageManager;

    fn deref(&self) -> &Self::Target {
        &self.manager
    }
}

/// Four workers that split any work larger than a few words, so every parallel path runs.
pub(crate) fn manager() -> TestManager {
    manager_with(|config| config)
}

pub(crate) fn manager_with_quota(bytes: u64) -> TestManager {
    manager_with(|config| config.with_max_storage_size(bytes))
}

pub(crate) fn manager_with(configure: impl FnOnce(StorageConfig) -> StorageConfig) -> TestManager {
    let dir = tempfile::tempdir().unwrap();
    let config = configure(
        StorageConfig::default()
            .with_storage_dir(dir.path())
            .with_threads(4, 8),
    );
    TestManager {
        manager: StorageManager::try_new(config).unwrap(),
        _dir: dir,
    }
}

/// A managed dataset holding `values`.
pub(crate) fn create_from<T: NativeType>(manager: &StorageManager, values: &[T]) -> Dataset {
    let dataset = manager.create(T::DTYPE, values.len()).unwrap();
    manager
        .handler(&dataset)
        .unwrap()
        .as_mut_slice::<T>()
        .unwrap()
        .copy_from_slice(values);
    dataset
}

/// The values of a file backed dataset.
pub(crate) fn values<T: NativeType>(manager: &StorageManager, dataset: &Dataset) -> Vec<T> {
    manager
        .handler(dataset)
        .unwrap()
        .as_slice::<T>()
        .unwrap()
        .to_vec()
}

/// The set positions of a bit mask dataset.
pub(crate) fn set_bits(dataset: &Dataset) -> Vec<usize> {
    dataset.bitmask().unwrap().indices()
}
