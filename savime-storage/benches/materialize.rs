#![allow(clippy::unwrap_used)]

use std::sync::Arc;

use divan::Bencher;
use savime_dtype::DataType;
use savime_storage::{DimSpec, Dimension, StorageConfig, StorageManager};
use tempfile::TempDir;

fn main() {
    divan::main();
}

fn manager(dir: &TempDir, threads: usize) -> StorageManager {
    StorageManager::try_new(
        StorageConfig::default()
            .with_storage_dir(dir.path())
            .with_threads(threads, 10_000),
    )
    .unwrap()
}

const SHAPES: [(usize, usize); 4] = [(1_000, 1), (1_000, 100), (100_000, 10), (1_000_000, 1)];

#[divan::bench(args = SHAPES, consts = [1, 4])]
fn ordered_implicit<const THREADS: usize>(bencher: Bencher, (length, adjacency): (usize, usize)) {
    let dir = TempDir::new().unwrap();
    let manager = manager(&dir, THREADS);
    let dimension = Arc::new(
        Dimension::implicit("x", DataType::Double, 0.0, length as f64 - 1.0, 1.0).unwrap(),
    );
    let total = length * adjacency * 4;

    bencher
        .with_inputs(|| DimSpec::ordered(dimension.clone(), 0, length as i64 - 1, adjacency).unwrap())
        .bench_local_values(|spec| manager.materialize_dim(&spec, total).unwrap());
}

#[divan::bench(args = [1_000, 100_000])]
fn partial_explicit(bencher: Bencher, length: usize) {
    let dir = TempDir::new().unwrap();
    let manager = manager(&dir, 4);
    let mapping = manager
        .create_sequence(DataType::Long, 0.0, 3.0, 3.0 * (length as f64 - 1.0))
        .unwrap();
    let dimension = Arc::new(Dimension::explicit("t", mapping).unwrap());
    let reals = manager
        .create_sequence(DataType::Long, 0.0, 1.0, length as f64 - 1.0)
        .unwrap();

    bencher
        .with_inputs(|| {
            DimSpec::partial(dimension.clone(), 0, length as i64 - 1, 2, reals.clone()).unwrap()
        })
        .bench_local_values(|spec| manager.materialize_dim(&spec, length * 8).unwrap());
}
