use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::Path;
use std::sync::Arc;

use memmap2::{MmapMut, MmapOptions};
use savime_dtype::{DataType, NativeType};
use savime_error::{SavimeError, SavimeResult, savime_bail, savime_err};

use crate::{Dataset, StorageConfig};

/// Read/write access to the values of a file backed [`Dataset`] through a shared mapping.
///
/// The mapping is larger than the file so that appends rarely force a remap, but every view
/// handed out stops at the dataset's current length.
pub struct DatasetHandler {
    dataset: Dataset,
    file: File,
    mmap: MmapMut,
    mapping_length: u64,
    entry_width: usize,
    cursor: usize,
    config: Arc<StorageConfig>,
}

impl DatasetHandler {
    /// Open and map the file behind `dataset`.
    pub fn open(dataset: Dataset, config: Arc<StorageConfig>) -> SavimeResult<Self> {
        let Some(location) = dataset.location() else {
            savime_bail!("dataset {} has no backing file", dataset.id());
        };
        let Some(entry_width) = dataset.data_type().byte_width() else {
            savime_bail!(Unsupported: "{} datasets cannot be mapped", dataset.data_type());
        };
        let file = open_file(&location)?;
        let mapping_length = config.mapping_length(dataset.length());
        let mmap = map(&file, mapping_length, &location)?;
        Ok(Self {
            dataset,
            file,
            mmap,
            mapping_length,
            entry_width,
            cursor: 0,
            config,
        })
    }

    /// The dataset this handler maps.
    pub fn dataset(&self) -> &Dataset {
        &self.dataset
    }

    /// Size in bytes of one element.
    pub fn entry_width(&self) -> usize {
        self.entry_width
    }

    /// Number of elements currently stored.
    pub fn entry_count(&self) -> usize {
        self.dataset.entry_count()
    }

    /// Current size of the mapping, which is always at least the dataset's length.
    pub fn mapping_length(&self) -> u64 {
        self.mapping_length
    }

    /// Remap if the dataset grew past the current mapping, possibly through another handler.
    fn refresh(&mut self) -> SavimeResult<()> {
        let length = self.dataset.length();
        if length >= self.mapping_length {
            self.remap(length)?;
        }
        Ok(())
    }

    fn remap(&mut self, length: u64) -> SavimeResult<()> {
        let mapping_length = self.config.mapping_length(length);
        let location = self.dataset.location().unwrap_or_default();
        self.mmap = map(&self.file, mapping_length, &location)?;
        self.mapping_length = mapping_length;
        Ok(())
    }

    fn byte_len(&self) -> usize {
        self.dataset.entry_count() * self.entry_width
    }

    /// The stored bytes.
    pub fn buffer(&mut self) -> SavimeResult<&[u8]> {
        self.refresh()?;
        let len = self.byte_len();
        Ok(&self.mmap[..len])
    }

    /// The stored bytes, writable.
    pub fn buffer_mut(&mut self) -> SavimeResult<&mut [u8]> {
        self.refresh()?;
        let len = self.byte_len();
        Ok(&mut self.mmap[..len])
    }

    /// The stored values as a typed slice.
    pub fn as_slice<T: NativeType>(&mut self) -> SavimeResult<&[T]> {
        self.check_type::<T>()?;
        cast_slice(self.buffer()?)
    }

    /// The stored values as a writable typed slice.
    pub fn as_mut_slice<T: NativeType>(&mut self) -> SavimeResult<&mut [T]> {
        self.check_type::<T>()?;
        cast_slice_mut(self.buffer_mut()?)
    }

    fn check_type<T: NativeType>(&self) -> SavimeResult<()> {
        let data_type = self.dataset.data_type();
        if T::DTYPE != data_type {
            savime_bail!(MismatchedTypes: T::DTYPE, data_type);
        }
        Ok(())
    }

    /// Bytes of the element at `index`, or `None` past the end.
    pub fn buffer_at(&mut self, index: usize) -> SavimeResult<Option<&[u8]>> {
        if index >= self.dataset.entry_count() {
            return Ok(None);
        }
        let width = self.entry_width;
        Ok(Some(&self.buffer()?[index * width..(index + 1) * width]))
    }

    /// The value at `index`.
    pub fn read_at<T: NativeType>(&mut self, index: usize) -> SavimeResult<T> {
        let len = self.dataset.entry_count();
        self.as_slice::<T>()?
            .get(index)
            .copied()
            .ok_or_else(|| savime_err!(OutOfBounds: index, 0, len))
    }

    /// Position of the next append or read.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Move the cursor to element `index`, which may be one past the last element.
    pub fn cursor_at(&mut self, index: usize) -> SavimeResult<()> {
        let len = self.dataset.entry_count();
        if index > len {
            savime_bail!(OutOfBounds: index, 0, len + 1);
        }
        self.cursor = index;
        Ok(())
    }

    /// Whether the cursor points at a stored element.
    pub fn has_next(&self) -> bool {
        self.cursor < self.dataset.entry_count()
    }

    /// Read the element under the cursor and advance past it.
    pub fn next_value<T: NativeType>(&mut self) -> SavimeResult<Option<T>> {
        if !self.has_next() {
            return Ok(None);
        }
        let value = self.read_at::<T>(self.cursor)?;
        self.cursor += 1;
        Ok(Some(value))
    }

    /// Overwrite the element at `index`.
    pub fn insert_at<T: NativeType>(&mut self, value: T, index: usize) -> SavimeResult<()> {
        let len = self.dataset.entry_count();
        let slot = self
            .as_mut_slice::<T>()?
            .get_mut(index)
            .ok_or_else(|| savime_err!(OutOfBounds: index, 0, len))?;
        *slot = value;
        Ok(())
    }

    /// Write one value at the cursor and advance it, growing the file if needed.
    pub fn append<T: NativeType>(&mut self, value: T) -> SavimeResult<()> {
        self.check_type::<T>()?;
        self.append_bytes(as_bytes(std::slice::from_ref(&value)))
    }

    /// Write a run of values at the cursor, in writes of at most `max_tfx_buffer_size` bytes.
    pub fn append_slice<T: NativeType>(&mut self, values: &[T]) -> SavimeResult<()> {
        self.check_type::<T>()?;
        let per_write = usize::try_from(self.config.max_tfx_buffer_size / size_of::<T>() as u64)
            .unwrap_or(usize::MAX)
            .max(1);
        for chunk in values.chunks(per_write) {
            self.append_bytes(as_bytes(chunk))?;
        }
        Ok(())
    }

    /// Write whole elements at the cursor.
    ///
    /// Writes that stay inside the file go through the mapping. Growth is admitted against the
    /// storage budget before anything is written, so a refused append leaves the dataset as it
    /// was.
    pub fn append_bytes(&mut self, bytes: &[u8]) -> SavimeResult<()> {
        if bytes.len() % self.entry_width != 0 {
            savime_bail!(
                "cannot append {} bytes to a dataset of {} byte elements",
                bytes.len(),
                self.entry_width
            );
        }
        self.refresh()?;
        let start = self.cursor * self.entry_width;
        let offset = start as u64;
        let end = offset + bytes.len() as u64;
        let length = self.dataset.length();

        if end <= length {
            self.mmap[start..start + bytes.len()].copy_from_slice(bytes);
        } else {
            let growth = end - length;
            let accountant = self.dataset.accountant();
            if let Some(accountant) = &accountant {
                accountant.admit(growth)?;
            }
            if let Err(e) = self.file.write_all_at(bytes, offset) {
                if let Some(accountant) = &accountant {
                    accountant.release(growth)?;
                }
                log::error!("appending to dataset {}: {e}", self.dataset.name());
                return Err(SavimeError::from(e).with_context("appending to dataset"));
            }
            let entry_count = usize::try_from(end)
                .map_err(|_| savime_err!("dataset of {} bytes is too large", end))?
                / self.entry_width;
            self.dataset.set_extent(end, entry_count);
        }
        self.cursor += bytes.len() / self.entry_width;
        Ok(())
    }

    /// Shrink the dataset to its first `entry_count` elements and return the freed bytes to the
    /// storage budget.
    pub fn truncate_at(&mut self, entry_count: usize) -> SavimeResult<()> {
        let current = self.dataset.entry_count();
        if entry_count > current {
            savime_bail!(OutOfBounds: entry_count, 0, current + 1);
        }
        let length = self.dataset.length();
        let new_length = (entry_count * self.entry_width) as u64;
        self.file.set_len(new_length).map_err(|e| {
            log::error!("truncating dataset {}: {e}", self.dataset.name());
            SavimeError::from(e).with_context("truncating dataset")
        })?;
        self.dataset.set_extent(new_length, entry_count);
        if let Some(accountant) = self.dataset.accountant() {
            accountant.release(length - new_length)?;
        }
        self.cursor = self.cursor.min(entry_count);
        self.remap(new_length)
    }

    /// Flush and unmap, reporting errors that dropping would swallow.
    pub fn close(self) -> SavimeResult<()> {
        self.mmap
            .flush()
            .map_err(|e| SavimeError::from(e).with_context("flushing dataset mapping"))
    }
}

fn open_file(location: &Path) -> SavimeResult<File> {
    OpenOptions::new()
        .create(true)
        .truncate(false)
        .read(true)
        .write(true)
        .open(location)
        .map_err(|e| {
            log::error!("opening {}: {e}", location.display());
            SavimeError::from(e).with_context(format!("opening {}", location.display()))
        })
}

fn map(file: &File, mapping_length: u64, location: &Path) -> SavimeResult<MmapMut> {
    let len = usize::try_from(mapping_length)
        .map_err(|_| savime_err!("mapping of {} bytes is too large", mapping_length))?;
    // SAFETY: the mapping is shared with other handlers of the same dataset, and views are
    // bounded by the file length so that no access touches pages past the end of the file.
    unsafe { MmapOptions::new().len(len).map_mut(file) }.map_err(|e| {
        log::error!("mapping {}: {e}", location.display());
        SavimeError::from(e).with_context(format!("mapping {}", location.display()))
    })
}

/// View native values as their bytes.
pub(crate) fn as_bytes<T: NativeType>(values: &[T]) -> &[u8] {
    // SAFETY: native types are plain old data without padding.
    unsafe { std::slice::from_raw_parts(values.as_ptr().cast::<u8>(), size_of_val(values)) }
}

fn cast_slice<T: NativeType>(bytes: &[u8]) -> SavimeResult<&[T]> {
    // SAFETY: every bit pattern is a valid native value.
    let (prefix, values, suffix) = unsafe { bytes.align_to::<T>() };
    if !prefix.is_empty() || !suffix.is_empty() {
        savime_bail!("mapped buffer is not aligned for {}", T::DTYPE);
    }
    Ok(values)
}

fn cast_slice_mut<T: NativeType>(bytes: &mut [u8]) -> SavimeResult<&mut [T]> {
    // SAFETY: every bit pattern is a valid native value.
    let (prefix, values, suffix) = unsafe { bytes.align_to_mut::<T>() };
    if !prefix.is_empty() || !suffix.is_empty() {
        savime_bail!("mapped buffer is not aligned for {}", T::DTYPE);
    }
    Ok(values)
}

/// Element width of a type that can be stored, for error messages and size computations.
pub(crate) fn entry_width(data_type: DataType) -> SavimeResult<usize> {
    data_type
        .byte_width()
        .ok_or_else(|| savime_err!(Unsupported: "{} values have no fixed width", data_type))
}
