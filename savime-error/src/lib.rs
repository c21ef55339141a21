#![feature(error_generic_member_access)]
#![deny(missing_docs)]

//! This crate defines error & result types for Savime.
//! It also contains a variety of useful macros for error handling.

mod ext;

use std::backtrace::Backtrace;
use std::borrow::Cow;
use std::fmt::{Debug, Display, Formatter};
use std::ops::Deref;
use std::{fmt, io};

pub use ext::*;

/// A string that can be used as an error message.
#[derive(Debug)]
pub struct ErrString(Cow<'static, str>);

impl<T> From<T> for ErrString
where
    T: Into<Cow<'static, str>>,
{
    fn from(msg: T) -> Self {
        Self(msg.into())
    }
}

impl AsRef<str> for ErrString {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Deref for ErrString {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Display for ErrString {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

/// The top-level error type for Savime.
#[derive(thiserror::Error)]
#[non_exhaustive]
pub enum SavimeError {
    /// A request for storage that would push usage past the configured maximum.
    #[error("storage quota exceeded: requested {requested} bytes with {used} of {max} in use")]
    QuotaExceeded {
        /// Bytes requested by the failing call.
        requested: u64,
        /// Bytes in use when the request was made.
        used: u64,
        /// Configured maximum.
        max: u64,
    },
    /// An index that was out of bounds.
    #[error("index {0} out of bounds from {1} to {2}\nBacktrace:\n{3}")]
    OutOfBounds(usize, usize, usize, Backtrace),
    /// An error that occurred because an argument was invalid.
    #[error("{0}\nBacktrace:\n{1}")]
    InvalidArgument(ErrString, Backtrace),
    /// A logical or real index that does not map onto a dimension.
    #[error("{0}\nBacktrace:\n{1}")]
    InvalidMapping(ErrString, Backtrace),
    /// An operation that exists in the API but is not implemented for the given operands.
    #[error("{0}\nBacktrace:\n{1}")]
    Unsupported(ErrString, Backtrace),
    /// Two data types that were expected to match did not.
    #[error("expected type: {0} but instead got {1}\nBacktrace:\n{2}")]
    MismatchedTypes(ErrString, ErrString, Backtrace),
    /// A wrapper for other errors, carrying additional context.
    #[error("{0}: {1}")]
    Context(ErrString, #[source] Box<SavimeError>),
    /// A wrapper for IO errors.
    #[error(transparent)]
    IOError(#[from] io::Error),
    /// A wrapper for serde_json errors.
    #[cfg(feature = "serde")]
    #[error(transparent)]
    JSONError(#[from] serde_json::Error),
}

impl SavimeError {
    /// Adds additional context to an error.
    pub fn with_context<T: Into<ErrString>>(self, msg: T) -> Self {
        SavimeError::Context(msg.into(), Box::new(self))
    }

    /// Whether this error, or the error it wraps, is a storage quota refusal.
    pub fn is_quota_exceeded(&self) -> bool {
        match self {
            SavimeError::QuotaExceeded { .. } => true,
            SavimeError::Context(_, inner) => inner.is_quota_exceeded(),
            _ => false,
        }
    }

    /// Whether this error, or the error it wraps, reports an operation with no implementation.
    pub fn is_unsupported(&self) -> bool {
        match self {
            SavimeError::Unsupported(..) => true,
            SavimeError::Context(_, inner) => inner.is_unsupported(),
            _ => false,
        }
    }
}

impl Debug for SavimeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(self, f)
    }
}

/// A type alias for Results that return SavimeErrors as their error type.
pub type SavimeResult<T> = Result<T, SavimeError>;

/// A trait for expect-ing a SavimeResult or an Option.
pub trait SavimeExpect {
    /// The type of the value being expected.
    type Output;

    /// Returns the value of the result if it is Ok, otherwise panics with the error.
    /// Should be called only in contexts where the error condition represents a bug (programmer error).
    fn savime_expect(self, msg: &str) -> Self::Output;
}

impl<T, E> SavimeExpect for Result<T, E>
where
    E: Into<SavimeError>,
{
    type Output = T;

    #[inline(always)]
    fn savime_expect(self, msg: &str) -> Self::Output {
        match self {
            Ok(v) => v,
            #[allow(clippy::panic)]
            Err(e) => panic!("{}", e.into().with_context(msg.to_string())),
        }
    }
}

impl<T> SavimeExpect for Option<T> {
    type Output = T;

    #[inline(always)]
    fn savime_expect(self, msg: &str) -> Self::Output {
        match self {
            Some(v) => v,
            #[allow(clippy::panic)]
            None => panic!("{msg}"),
        }
    }
}

/// A convenient macro for creating a SavimeError.
#[macro_export]
macro_rules! savime_err {
    (OutOfBounds: $idx:expr, $start:expr, $stop:expr) => {{
        use std::backtrace::Backtrace;
        $crate::__private::must_use(
            $crate::SavimeError::OutOfBounds($idx, $start, $stop, Backtrace::capture())
        )
    }};
    (QuotaExceeded: $requested:expr, $used:expr, $max:expr) => {{
        $crate::__private::must_use(
            $crate::SavimeError::QuotaExceeded {
                requested: $requested,
                used: $used,
                max: $max,
            }
        )
    }};
    (MismatchedTypes: $expected:literal, $actual:expr) => {{
        use std::backtrace::Backtrace;
        $crate::__private::must_use(
            $crate::SavimeError::MismatchedTypes($expected.into(), $actual.to_string().into(), Backtrace::capture())
        )
    }};
    (MismatchedTypes: $expected:expr, $actual:expr) => {{
        use std::backtrace::Backtrace;
        $crate::__private::must_use(
            $crate::SavimeError::MismatchedTypes($expected.to_string().into(), $actual.to_string().into(), Backtrace::capture())
        )
    }};
    (Context: $msg:literal, $err:expr) => {{
        $crate::__private::must_use(
            $crate::SavimeError::Context($msg.into(), Box::new($err))
        )
    }};
    ($variant:ident: $fmt:literal $(, $arg:expr)* $(,)?) => {{
        use std::backtrace::Backtrace;
        $crate::__private::must_use(
            $crate::SavimeError::$variant(format!($fmt, $($arg),*).into(), Backtrace::capture())
        )
    }};
    ($variant:ident: $err:expr $(,)?) => {
        $crate::__private::must_use(
            $crate::SavimeError::$variant($err)
        )
    };
    ($fmt:literal $(, $arg:expr)* $(,)?) => {
        $crate::savime_err!(InvalidArgument: $fmt, $($arg),*)
    };
}

/// A convenient macro for returning a SavimeError.
#[macro_export]
macro_rules! savime_bail {
    ($($tt:tt)+) => {
        return Err($crate::savime_err!($($tt)+))
    };
}

// Not public, referenced by macros only.
#[doc(hidden)]
pub mod __private {
    #[doc(hidden)]
    #[inline]
    #[must_use]
    pub const fn must_use(error: crate::SavimeError) -> crate::SavimeError {
        error
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn over_quota() -> SavimeResult<()> {
        savime_bail!(QuotaExceeded: 16, 100, 110)
    }

    #[test]
    fn bail_builds_quota_error() {
        let err = over_quota().unwrap_err();
        assert!(err.is_quota_exceeded());
        assert!(
            err.to_string()
                .starts_with("storage quota exceeded: requested 16 bytes")
        );
    }

    #[test]
    fn context_keeps_kind() {
        let err = over_quota().unwrap_err().with_context("appending to dataset");
        assert!(err.is_quota_exceeded());
        assert!(err.to_string().starts_with("appending to dataset: "));
    }

    #[test]
    fn unsupported_is_detected() {
        let err = savime_err!(Unsupported: "string comparison {}", "<");
        assert!(err.is_unsupported());
        assert!(!err.is_quota_exceeded());
    }

    #[test]
    fn io_errors_convert() {
        let result: SavimeResult<()> =
            Err(io::Error::new(io::ErrorKind::NotFound, "missing dataset file").into());
        assert!(result.unwrap_err().to_string().contains("missing dataset file"));
    }
}
