use std::fs::{self, File, OpenOptions};
use std::io::ErrorKind;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use rand::Rng;
use rayon::{ThreadPool, ThreadPoolBuilder};
use savime_dtype::{DataType, LogicalIndex, RealIndex, Scalar};
use savime_error::{SavimeError, SavimeResult, savime_bail, savime_err};
use savime_mask::WORD_BITS;

use crate::compute::{
    ArithmeticOp, BinaryOp, CompareOp, PartialMaterialization, arithmetic, bitmask_index, compare,
    compare_dim, copy, filter, index, intersect, logic, materialize, split, stretch, subset,
};
use crate::handler::entry_width;
use crate::{
    Dataset, DatasetHandler, DimSpec, Dimension, StorageAccountant, StorageConfig, Workload,
};

/// Owner of the storage budget and entry point of every dataset operation.
///
/// Operations run on the manager's own thread pool. Failures are logged with the name of the
/// operation and returned; no kernel panics cross this API.
pub struct StorageManager {
    config: Arc<StorageConfig>,
    accountant: Arc<StorageAccountant>,
    pool: ThreadPool,
}

impl StorageManager {
    /// Create a manager, creating the dataset directory if needed.
    pub fn try_new(config: StorageConfig) -> SavimeResult<Self> {
        config.validate()?;
        fs::create_dir_all(&config.shm_storage_dir).map_err(|e| {
            SavimeError::from(e).with_context(format!(
                "creating storage directory {}",
                config.shm_storage_dir.display()
            ))
        })?;
        let pool = ThreadPoolBuilder::new()
            .num_threads(config.max_threads)
            .thread_name(|i| format!("savime-worker-{i}"))
            .build()
            .map_err(|e| savime_err!("building worker pool: {}", e))?;
        log::info!(
            "storage manager in {} with {} bytes and {} threads",
            config.shm_storage_dir.display(),
            config.max_storage_size,
            config.max_threads
        );
        Ok(Self {
            accountant: Arc::new(StorageAccountant::new(config.max_storage_size)),
            config: Arc::new(config),
            pool,
        })
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    /// Bytes held by live datasets.
    pub fn used_storage(&self) -> u64 {
        self.accountant.used()
    }

    fn run<T, F>(&self, operation: &'static str, f: F) -> SavimeResult<T>
    where
        T: Send,
        F: FnOnce() -> SavimeResult<T> + Send,
    {
        let start = self.config.log_timings.then(Instant::now);
        let result = panic::catch_unwind(AssertUnwindSafe(|| self.pool.install(f)))
            .unwrap_or_else(|payload| {
                let message = payload
                    .downcast_ref::<&str>()
                    .map(|s| (*s).to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                Err(savime_err!("{} panicked: {}", operation, message))
            });
        if let Some(start) = start {
            log::debug!(
                "{operation} took {:.3}ms",
                start.elapsed().as_secs_f64() * 1000.0
            );
        }
        result.map_err(|e| {
            log::error!("{operation} failed: {e}");
            e.with_context(operation)
        })
    }

    pub(crate) fn workload(&self, len: usize) -> Workload {
        Workload::new(len, self.config.max_threads, self.config.work_per_thread)
    }

    /// A partition whose boundaries fall on bit mask words.
    pub(crate) fn aligned_workload(&self, len: usize) -> Workload {
        Workload::aligned(
            len,
            self.config.max_threads,
            self.config.work_per_thread,
            WORD_BITS,
        )
    }

    pub(crate) fn threads(&self) -> usize {
        self.config.max_threads
    }

    pub(crate) fn work_per_thread(&self) -> usize {
        self.config.work_per_thread
    }

    pub(crate) fn open(&self, dataset: &Dataset) -> SavimeResult<DatasetHandler> {
        DatasetHandler::open(dataset.clone(), self.config.clone())
    }

    /// Allocate a dataset of `entry_count` zeroed values.
    pub fn create(&self, data_type: DataType, entry_count: usize) -> SavimeResult<Dataset> {
        self.run("create", || self.allocate(data_type, entry_count))
    }

    pub(crate) fn allocate(&self, data_type: DataType, entry_count: usize) -> SavimeResult<Dataset> {
        let width = entry_width(data_type)?;
        let length = entry_count
            .checked_mul(width)
            .map(|bytes| bytes as u64)
            .ok_or_else(|| savime_err!("dataset of {} values is too large", entry_count))?;
        self.accountant.admit(length)?;
        let (location, file) = match self.create_file() {
            Ok(created) => created,
            Err(e) => {
                self.accountant.release(length)?;
                return Err(e);
            }
        };
        let dataset = Dataset::managed(
            data_type,
            entry_count,
            length,
            location,
            self.accountant.clone(),
        );
        file.set_len(length).map_err(|e| {
            log::error!("sizing dataset {}: {e}", dataset.name());
            SavimeError::from(e).with_context("sizing dataset file")
        })?;
        Ok(dataset)
    }

    fn create_file(&self) -> SavimeResult<(PathBuf, File)> {
        let mut rng = rand::rng();
        loop {
            let location = self
                .config
                .shm_storage_dir
                .join(format!("{:032x}", rng.random::<u128>()));
            match OpenOptions::new()
                .read(true)
                .write(true)
                .create_new(true)
                .open(&location)
            {
                Ok(file) => return Ok((location, file)),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => {
                    log::error!("creating {}: {e}", location.display());
                    return Err(SavimeError::from(e)
                        .with_context(format!("creating {}", location.display())));
                }
            }
        }
    }

    /// The dataset `[init, init + spacing, ...]` up to and including `end`.
    pub fn create_sequence(
        &self,
        data_type: DataType,
        init: f64,
        spacing: f64,
        end: f64,
    ) -> SavimeResult<Dataset> {
        self.run("create_sequence", || {
            let dimension = Arc::new(Dimension::implicit(
                "sequence", data_type, init, end, spacing,
            )?);
            let length = dimension.length();
            let spec = DimSpec::ordered(dimension, 0, length as i64 - 1, 1)?;
            materialize::materialize_dim(self, &spec, length)
        })
    }

    /// Take over the accounting and disposal of an externally produced dataset.
    pub fn save(&self, dataset: &Dataset) -> SavimeResult<()> {
        self.run("save", || {
            if dataset.is_managed() {
                return Ok(());
            }
            if dataset.location().is_none() {
                savime_bail!("only file backed datasets can be saved");
            }
            let length = dataset.length();
            self.accountant.admit(length)?;
            if let Err(e) = dataset.bind(self.accountant.clone()) {
                self.accountant.release(length)?;
                return Err(e);
            }
            Ok(())
        })
    }

    /// Adopt a file from the import directory as a managed dataset.
    pub fn import_file(&self, data_type: DataType, path: impl AsRef<Path>) -> SavimeResult<Dataset> {
        let path = path.as_ref();
        let dataset = self.run("import_file", || {
            let canonical = path.canonicalize()?;
            let sec_dir = self.config.sec_storage_dir.canonicalize()?;
            if !canonical.starts_with(&sec_dir) {
                savime_bail!(
                    "{} is outside the import directory {}",
                    canonical.display(),
                    sec_dir.display()
                );
            }
            Dataset::external(data_type, canonical)
        })?;
        self.save(&dataset)?;
        Ok(dataset)
    }

    /// Map a dataset for reading and writing.
    pub fn handler(&self, dataset: &Dataset) -> SavimeResult<DatasetHandler> {
        self.run("handler", || self.open(dataset))
    }

    /// Release a handle. The file is removed once no handle remains.
    pub fn drop_dataset(&self, dataset: Dataset) {
        log::trace!("dropping handle to dataset {}", dataset.name());
        drop(dataset);
    }

    /// Admit `bytes` of growth against the budget.
    pub fn register_expansion(&self, bytes: u64) -> SavimeResult<()> {
        self.accountant.admit(bytes)
    }

    /// Return `bytes` to the budget.
    pub fn register_truncation(&self, bytes: u64) -> SavimeResult<()> {
        self.accountant.release(bytes)
    }

    /// Compute and record whether `dataset` is sorted.
    pub fn check_sorted(&self, dataset: &Dataset) -> SavimeResult<bool> {
        self.run("check_sorted", || index::check_sorted(self, dataset))
    }

    /// Real index of `value` along `dimension`, or [`savime_dtype::INVALID_EXACT_REAL_INDEX`].
    pub fn logical_to_real(
        &self,
        dimension: &Dimension,
        value: LogicalIndex,
    ) -> SavimeResult<RealIndex> {
        self.run("logical_to_real", || {
            index::logical_to_real(self, dimension, value)
        })
    }

    /// Real index of the last coordinate not greater than `value`.
    pub fn logical_to_approx_real(
        &self,
        dimension: &Dimension,
        value: LogicalIndex,
    ) -> SavimeResult<RealIndex> {
        self.run("logical_to_approx_real", || {
            index::logical_to_approx_real(self, dimension, value)
        })
    }

    /// Coordinate at real index `real` along `dimension`.
    pub fn real_to_logical(
        &self,
        dimension: &Dimension,
        real: RealIndex,
    ) -> SavimeResult<LogicalIndex> {
        self.run("real_to_logical", || {
            index::real_to_logical(self, dimension, real)
        })
    }

    /// Convert a dataset of coordinates to LONG real indices within `spec`.
    pub fn logical_to_real_dataset(
        &self,
        spec: &DimSpec,
        logical: &Dataset,
    ) -> SavimeResult<Dataset> {
        self.run("logical_to_real_dataset", || {
            index::logical_to_real_dataset(self, spec, logical)
        })
    }

    /// Convert a dataset of real indices within `spec` to coordinates.
    pub fn real_to_logical_dataset(&self, spec: &DimSpec, real: &Dataset) -> SavimeResult<Dataset> {
        self.run("real_to_logical_dataset", || {
            index::real_to_logical_dataset(self, spec, real)
        })
    }

    /// The coordinates of `first` that also belong to `second`, as an explicit dimension.
    pub fn intersect_dimensions(
        &self,
        first: &Dimension,
        second: &Dimension,
    ) -> SavimeResult<Dimension> {
        self.run("intersect_dimensions", || {
            intersect::intersect_dimensions(self, first, second)
        })
    }

    /// The coordinate of every cell of a subtar of `total_length` cells along `spec`.
    pub fn materialize_dim(&self, spec: &DimSpec, total_length: usize) -> SavimeResult<Dataset> {
        self.run("materialize_dim", || {
            materialize::materialize_dim(self, spec, total_length)
        })
    }

    /// The coordinates along `spec` of the cells selected by `filter`.
    pub fn partial_materialize_dim(
        &self,
        filter: &Dataset,
        spec: &DimSpec,
        total_length: usize,
    ) -> SavimeResult<PartialMaterialization> {
        self.run("partial_materialize_dim", || {
            materialize::partial_materialize_dim(self, filter, spec, total_length)
        })
    }

    /// Linear positions of the cells inside `[lowers, uppers]`, one bound pair per spec.
    pub fn subset_dims(
        &self,
        specs: &[Arc<DimSpec>],
        lowers: &[RealIndex],
        uppers: &[RealIndex],
    ) -> SavimeResult<Dataset> {
        self.run("subset_dims", || {
            subset::subset_dims(self, specs, lowers, uppers)
        })
    }

    /// `dest[(i - lower) * spacing + offset] = origin[i]` for `i` in `[lower, upper]`.
    pub fn copy_range(
        &self,
        origin: &Dataset,
        lower: usize,
        upper: usize,
        offset: usize,
        spacing: usize,
        dest: &Dataset,
    ) -> SavimeResult<()> {
        self.run("copy_range", || {
            copy::copy_range(self, origin, lower, upper, offset, spacing, dest)
        })
    }

    /// `dest[mapping[i]] = origin[i]` wherever the mapping is not `-1`. Returns the number of
    /// values copied.
    pub fn copy_mapping(
        &self,
        origin: &Dataset,
        mapping: &Dataset,
        dest: &Dataset,
    ) -> SavimeResult<usize> {
        self.run("copy_mapping", || {
            copy::copy_mapping(self, origin, mapping, dest)
        })
    }

    /// The values of `origin` at the positions selected by `filter`.
    pub fn filter(&self, origin: &Dataset, filter_ds: &Dataset) -> SavimeResult<Dataset> {
        self.run("filter", || filter::filter(self, origin, filter_ds))
    }

    pub fn and(&self, lhs: &Dataset, rhs: &Dataset) -> SavimeResult<Dataset> {
        self.run("and", || logic::and(self, lhs, rhs))
    }

    pub fn or(&self, lhs: &Dataset, rhs: &Dataset) -> SavimeResult<Dataset> {
        self.run("or", || logic::or(self, lhs, rhs))
    }

    pub fn not(&self, operand: &Dataset) -> SavimeResult<Dataset> {
        self.run("not", || logic::not(self, operand))
    }

    /// Element-wise comparison over the positions both datasets have.
    pub fn compare(&self, lhs: &Dataset, op: CompareOp, rhs: &Dataset) -> SavimeResult<Dataset> {
        self.run("compare", || compare::compare(self, lhs, op, rhs))
    }

    /// Compare every value of `lhs` against a constant.
    pub fn compare_scalar(
        &self,
        lhs: &Dataset,
        op: CompareOp,
        rhs: &Scalar,
    ) -> SavimeResult<Dataset> {
        self.run("compare_scalar", || {
            compare::compare_scalar(self, lhs, op, rhs)
        })
    }

    /// Compare the coordinates along `spec` of a subtar of `total_length` cells with a dataset.
    pub fn compare_dim(
        &self,
        spec: &DimSpec,
        total_length: usize,
        op: CompareOp,
        rhs: &Dataset,
    ) -> SavimeResult<Dataset> {
        self.run("compare_dim", || {
            compare_dim::compare_dim(self, spec, total_length, op, rhs)
        })
    }

    /// Compare the coordinates along `spec` of a subtar of `total_length` cells with a constant.
    pub fn compare_dim_scalar(
        &self,
        spec: &DimSpec,
        total_length: usize,
        op: CompareOp,
        rhs: &Scalar,
    ) -> SavimeResult<Dataset> {
        self.run("compare_dim_scalar", || {
            compare_dim::compare_dim_scalar(self, spec, total_length, op, rhs)
        })
    }

    /// Element-wise binary arithmetic.
    pub fn arithmetic(&self, lhs: &Dataset, op: BinaryOp, rhs: &Dataset) -> SavimeResult<Dataset> {
        self.run("arithmetic", || arithmetic::arithmetic(self, lhs, op, rhs))
    }

    /// Arithmetic against a constant, or a unary function where the constant is ignored.
    pub fn arithmetic_scalar(
        &self,
        lhs: &Dataset,
        op: ArithmeticOp,
        rhs: &Scalar,
    ) -> SavimeResult<Dataset> {
        self.run("arithmetic_scalar", || {
            arithmetic::arithmetic_scalar(self, lhs, op, rhs)
        })
    }

    /// Repeat every value `recordsize` times and the whole sequence `copies` times.
    pub fn stretch(
        &self,
        origin: &Dataset,
        entry_count: usize,
        recordsize: usize,
        copies: usize,
    ) -> SavimeResult<Dataset> {
        self.run("stretch", || {
            stretch::stretch(self, origin, entry_count, recordsize, copies)
        })
    }

    /// Cut the first `total_length` values of `origin` into `parts` equal datasets.
    pub fn split(
        &self,
        origin: &Dataset,
        total_length: usize,
        parts: usize,
    ) -> SavimeResult<Vec<Dataset>> {
        self.run("split", || split::split(self, origin, total_length, parts))
    }

    /// Replace the bit mask of `dataset` by the LONG list of its set positions.
    pub fn from_bitmask_to_index(&self, dataset: &Dataset, keep_bitmask: bool) -> SavimeResult<()> {
        self.run("from_bitmask_to_index", || {
            bitmask_index::from_bitmask_to_index(self, dataset, keep_bitmask)
        })
    }

    /// Join two datasets on equal values.
    pub fn equijoin(&self, _lhs: &Dataset, _rhs: &Dataset) -> SavimeResult<(Dataset, Dataset)> {
        self.run("equijoin", || {
            savime_bail!(Unsupported: "equijoin is not supported by this storage engine")
        })
    }

    /// Slice a dataset by position.
    pub fn slice(&self, _origin: &Dataset, _lower: usize, _upper: usize) -> SavimeResult<Dataset> {
        self.run("slice", || {
            savime_bail!(Unsupported: "slice is not supported by this storage engine")
        })
    }
}
