//! Storage and execution core of Savime.
//!
//! Datasets are flat files of fixed width values that are memory mapped on demand. The
//! [`StorageManager`] owns the storage budget, creates and disposes of datasets, and runs the
//! numeric kernels in [`compute`] over mapped buffers on its own thread pool.

pub use accounting::*;
pub use config::*;
pub use dataset::*;
pub use dimension::*;
pub use handler::*;
pub use manager::*;
pub use workload::*;

mod accounting;
pub mod compute;
mod config;
mod dataset;
mod dimension;
mod dispatch;
mod handler;
pub mod logging;
mod manager;
mod workload;

#[cfg(test)]
pub(crate) mod test_harness;
