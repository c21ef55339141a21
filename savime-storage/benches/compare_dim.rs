#![allow(clippy::unwrap_used)]

use std::sync::Arc;

use divan::Bencher;
use savime_dtype::{DataType, Scalar};
use savime_storage::compute::CompareOp;
use savime_storage::{DimSpec, Dimension, StorageConfig, StorageManager};
use tempfile::TempDir;

fn main() {
    divan::main();
}

const LENGTH: usize = 10_000;
const ADJACENCY: usize = 10;
const COPIES: usize = 10;

fn setup(dir: &TempDir) -> (StorageManager, DimSpec) {
    let manager = StorageManager::try_new(
        StorageConfig::default()
            .with_storage_dir(dir.path())
            .with_threads(4, 10_000),
    )
    .unwrap();
    let dimension = Arc::new(
        Dimension::implicit("x", DataType::Long, 0.0, LENGTH as f64 - 1.0, 1.0).unwrap(),
    );
    let spec = DimSpec::ordered(dimension, 0, LENGTH as i64 - 1, ADJACENCY).unwrap();
    (manager, spec)
}

#[divan::bench(args = [CompareOp::Eq, CompareOp::Lt, CompareOp::Gte])]
fn ordered_fast_path(bencher: Bencher, op: CompareOp) {
    let dir = TempDir::new().unwrap();
    let (manager, spec) = setup(&dir);
    let value = Scalar::from(7_500i64);
    let total = spec.skew() * COPIES;

    bencher.bench_local(|| manager.compare_dim_scalar(&spec, total, op, &value).unwrap());
}

#[divan::bench(args = [CompareOp::Eq, CompareOp::Lt, CompareOp::Gte])]
fn materialized(bencher: Bencher, op: CompareOp) {
    let dir = TempDir::new().unwrap();
    let (manager, spec) = setup(&dir);
    let value = Scalar::from(7_500i64);
    let total = spec.skew() * COPIES;

    bencher
        .with_inputs(|| {
            DimSpec::ordered(spec.dimension().clone(), 0, LENGTH as i64 - 1, ADJACENCY).unwrap()
        })
        .bench_local_values(|fresh| {
            let coordinates = manager.materialize_dim(&fresh, total).unwrap();
            manager.compare_scalar(&coordinates, op, &value).unwrap()
        });
}
