#![deny(missing_docs)]

//! A type system for Savime
//!
//! This crate contains the value types stored in datasets, the native Rust types that back the
//! numeric ones, and the macros used to dispatch from a runtime [`DataType`] to a generic kernel.

pub use data_type::*;
pub use logical::*;
pub use native::*;

mod data_type;
mod logical;
mod native;

#[doc(hidden)]
pub mod __private {
    pub use savime_error;
}
