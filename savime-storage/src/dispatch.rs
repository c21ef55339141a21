use rustc_hash::FxHashMap;
use savime_dtype::{DataType, NativeType};
use savime_error::{SavimeResult, savime_err};

/// Kernels for one operation, keyed by the data types of their two operands.
pub(crate) struct KernelTable<F> {
    name: &'static str,
    kernels: FxHashMap<(DataType, DataType), F>,
}

impl<F: Copy> KernelTable<F> {
    pub(crate) fn new(name: &'static str) -> Self {
        Self {
            name,
            kernels: FxHashMap::default(),
        }
    }

    pub(crate) fn register(&mut self, lhs: DataType, rhs: DataType, kernel: F) {
        self.kernels.insert((lhs, rhs), kernel);
    }

    /// Register the kernel for operands of native types `L` and `R`.
    pub(crate) fn register_native<L: NativeType, R: NativeType>(&mut self, kernel: F) {
        self.register(L::DTYPE, R::DTYPE, kernel);
    }

    pub(crate) fn lookup(&self, lhs: DataType, rhs: DataType) -> SavimeResult<F> {
        self.kernels.get(&(lhs, rhs)).copied().ok_or_else(|| {
            savime_err!(
                Unsupported: "{} is not implemented for {} and {}",
                self.name,
                lhs,
                rhs
            )
        })
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.kernels.len()
    }
}

/// Build a [`KernelTable`] holding `kernel::<L, R>` for every pair of numeric types.
macro_rules! numeric_pair_table {
    ($name:expr, $kernel:ident, $fn_ty:ty) => {{
        let mut table: KernelTable<$fn_ty> = KernelTable::new($name);
        numeric_pair_table!(@lhs table, $kernel, i32, i64, f32, f64);
        table
    }};
    (@lhs $table:ident, $kernel:ident, $($L:ty),*) => {
        $( numeric_pair_table!(@rhs $table, $kernel, $L, i32, i64, f32, f64); )*
    };
    (@rhs $table:ident, $kernel:ident, $L:ty, $($R:ty),*) => {
        $(
            $table.register_native::<$L, $R>($kernel::<$L, $R>);
        )*
    };
}

pub(crate) use numeric_pair_table;
