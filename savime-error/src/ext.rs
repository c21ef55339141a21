use crate::{ErrString, SavimeResult};

/// Extension trait for SavimeResult
pub trait ResultExt<T>: private::Sealed {
    /// Flatten a nested [`SavimeResult`]. Helper function until <https://github.com/rust-lang/rust/issues/70142> is stabilized.
    fn flatten(self) -> SavimeResult<T>;
}

mod private {
    use crate::SavimeResult;

    pub trait Sealed {}

    impl<T> Sealed for SavimeResult<T> {}
}

impl<T> ResultExt<T> for SavimeResult<SavimeResult<T>> {
    fn flatten(self) -> SavimeResult<T> {
        match self {
            Ok(Ok(v)) => Ok(v),
            Ok(Err(e)) | Err(e) => Err(e),
        }
    }
}

/// Attach a context message to the error side of a [`SavimeResult`].
pub trait ContextExt<T>: private::Sealed {
    /// Wrap the error, if any, with a lazily built message.
    fn context<M, F>(self, msg: F) -> SavimeResult<T>
    where
        M: Into<ErrString>,
        F: FnOnce() -> M;
}

impl<T> ContextExt<T> for SavimeResult<T> {
    fn context<M, F>(self, msg: F) -> SavimeResult<T>
    where
        M: Into<ErrString>,
        F: FnOnce() -> M,
    {
        self.map_err(|e| e.with_context(msg()))
    }
}
