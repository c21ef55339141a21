//! Kernels behind the [`crate::StorageManager`] operations.
//!
//! Every kernel partitions its output with a [`crate::Workload`] and writes each output position
//! from exactly one task, so no synchronisation is needed beyond the final join.

pub(crate) mod arithmetic;
pub(crate) mod bitmask_index;
pub(crate) mod compare;
pub(crate) mod compare_dim;
pub(crate) mod copy;
pub(crate) mod filter;
pub(crate) mod index;
pub(crate) mod intersect;
pub(crate) mod logic;
pub(crate) mod materialize;
pub(crate) mod split;
pub(crate) mod stretch;
pub(crate) mod subset;

pub use arithmetic::{ArithmeticOp, BinaryOp, UnaryOp, select_type};
pub use compare::CompareOp;
pub use materialize::PartialMaterialization;
