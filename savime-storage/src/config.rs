use std::fs;
use std::path::{Path, PathBuf};

use savime_error::{SavimeError, SavimeResult, savime_bail};
use serde::{Deserialize, Serialize};

const GIB: u64 = 1024 * 1024 * 1024;
const MIB: u64 = 1024 * 1024;

/// Granularity of small mappings.
pub const PAGE_SIZE: u64 = 4096;

/// Settings consumed by the storage manager.
///
/// Every field has a default, so a JSON document only needs to name the keys it overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory that holds dataset files, normally on a memory backed file system.
    pub shm_storage_dir: PathBuf,
    /// Directory that externally produced files must live in before they can be imported.
    pub sec_storage_dir: PathBuf,
    /// Maximum number of bytes all live datasets may occupy together.
    pub max_storage_size: u64,
    /// Largest single write issued when appending a batch of values.
    pub max_tfx_buffer_size: u64,
    /// Datasets at least this large are mapped in `huge_tbl_size` increments.
    pub huge_tbl_threshold: u64,
    /// Mapping increment for large datasets.
    pub huge_tbl_size: u64,
    /// Worker threads used by the numeric kernels.
    pub max_threads: usize,
    /// Below this many elements per thread a kernel runs on a single thread.
    pub work_per_thread: usize,
    /// Log the elapsed time of every storage operation at debug level.
    pub log_timings: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            shm_storage_dir: PathBuf::from("/dev/shm/savime"),
            sec_storage_dir: PathBuf::from("/dev/shm/savime"),
            max_storage_size: 600 * GIB,
            max_tfx_buffer_size: 512 * GIB,
            huge_tbl_threshold: 512 * MIB,
            huge_tbl_size: 2 * MIB,
            max_threads: 1,
            work_per_thread: 100,
            log_timings: false,
        }
    }
}

impl StorageConfig {
    /// Parse a configuration from a JSON document.
    pub fn from_json_str(json: &str) -> SavimeResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a configuration file.
    pub fn from_json_file(path: impl AsRef<Path>) -> SavimeResult<Self> {
        let path = path.as_ref();
        let json = fs::read_to_string(path)
            .map_err(|e| SavimeError::from(e).with_context(path.display().to_string()))?;
        Self::from_json_str(&json)
    }

    /// Use `dir` as both the dataset directory and the import directory.
    pub fn with_storage_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        self.sec_storage_dir = dir.clone();
        self.shm_storage_dir = dir;
        self
    }

    /// Set the storage quota in bytes.
    pub fn with_max_storage_size(mut self, bytes: u64) -> Self {
        self.max_storage_size = bytes;
        self
    }

    /// Set the thread count and the per thread work threshold.
    pub fn with_threads(mut self, max_threads: usize, work_per_thread: usize) -> Self {
        self.max_threads = max_threads;
        self.work_per_thread = work_per_thread;
        self
    }

    /// Check that the settings can be used to build a storage manager.
    pub fn validate(&self) -> SavimeResult<()> {
        if self.max_threads == 0 {
            savime_bail!("max_threads must be at least 1");
        }
        if self.huge_tbl_size == 0 || self.huge_tbl_size % PAGE_SIZE != 0 {
            savime_bail!(
                "huge_tbl_size must be a non-zero multiple of {}, got {}",
                PAGE_SIZE,
                self.huge_tbl_size
            );
        }
        if self.max_tfx_buffer_size == 0 {
            savime_bail!("max_tfx_buffer_size must be positive");
        }
        Ok(())
    }

    /// Size of a mapping able to hold `length` bytes.
    ///
    /// Mappings are at least one increment larger than the data so that small appends do not
    /// force a remap.
    pub fn mapping_length(&self, length: u64) -> u64 {
        let increment = if length >= self.huge_tbl_threshold {
            self.huge_tbl_size
        } else {
            PAGE_SIZE
        };
        ((length / increment) + 1) * increment
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[test]
    fn defaults() {
        let config = StorageConfig::default();
        assert_eq!(config.max_storage_size, 600 * GIB);
        assert_eq!(config.huge_tbl_size, 2 * MIB);
        assert_eq!(config.max_threads, 1);
        assert_eq!(config.work_per_thread, 100);
        config.validate().unwrap();
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config =
            StorageConfig::from_json_str(r#"{"max_threads": 8, "shm_storage_dir": "/tmp/x"}"#)
                .unwrap();
        assert_eq!(config.max_threads, 8);
        assert_eq!(config.shm_storage_dir, PathBuf::from("/tmp/x"));
        assert_eq!(config.work_per_thread, 100);
    }

    #[rstest]
    #[case(r#"{"max_threads": 0}"#)]
    #[case(r#"{"huge_tbl_size": 1000}"#)]
    #[case(r#"{"max_threads": "many"}"#)]
    fn rejects_invalid(#[case] json: &str) {
        assert!(StorageConfig::from_json_str(json).is_err());
    }

    #[test]
    fn reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("savime.json");
        fs::write(&path, r#"{"log_timings": true}"#).unwrap();
        assert!(StorageConfig::from_json_file(&path).unwrap().log_timings);
        assert!(StorageConfig::from_json_file(dir.path().join("missing.json")).is_err());
    }

    #[rstest]
    #[case(0, PAGE_SIZE)]
    #[case(10, PAGE_SIZE)]
    #[case(PAGE_SIZE, 2 * PAGE_SIZE)]
    #[case(512 * MIB, 512 * MIB + 2 * MIB)]
    fn mapping_lengths(#[case] length: u64, #[case] expected: u64) {
        assert_eq!(StorageConfig::default().mapping_length(length), expected);
    }
}
