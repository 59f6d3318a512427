/// Benchmarks for splitting and consolidating chunks.
use chunkbeam::array::Dataset;
use chunkbeam::engine::{DirectEngine, RayonEngine};
use chunkbeam::key::{JsonKeyCoder, Key};
use chunkbeam::models::ChunkScheme;
use chunkbeam::source::dataset_to_chunks;
use chunkbeam::transform::Transform;
use chunkbeam::transforms::{ConsolidateChunks, SplitChunks};
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use ndarray::{Array, IxDyn};
use std::sync::Arc;

fn dataset(size: usize) -> Dataset<f64> {
    let data = Array::from_iter((0..size * size).map(|i| i as f64))
        .into_shape(IxDyn(&[size, size]))
        .unwrap();
    Dataset::new().with_variable("foo", ["x", "y"], data).unwrap()
}

fn criterion_benchmark(c: &mut Criterion) {
    let coder = Arc::new(JsonKeyCoder);
    let direct = DirectEngine::new(coder.clone());
    let rayon = RayonEngine::new(coder, None).unwrap();
    for size in [256, 1024] {
        let ds = dataset(size);
        let coarse: ChunkScheme = "x=64,y=64".parse().unwrap();
        let fine: ChunkScheme = "x=16,y=16".parse().unwrap();
        let records = dataset_to_chunks(&ds, &coarse, false).unwrap();
        let split: Vec<(Key, Dataset<f64>)> = SplitChunks::new(fine.clone())
            .apply(&direct, records.clone())
            .unwrap();

        let name = format!("split_chunks({}, direct)", size);
        c.bench_function(&name, |b| {
            b.iter(|| {
                SplitChunks::new(fine.clone())
                    .apply(&direct, black_box(records.clone()))
                    .unwrap()
            })
        });
        let name = format!("split_chunks({}, rayon)", size);
        c.bench_function(&name, |b| {
            b.iter(|| {
                SplitChunks::new(fine.clone())
                    .apply(&rayon, black_box(records.clone()))
                    .unwrap()
            })
        });
        let name = format!("consolidate_chunks({}, direct)", size);
        c.bench_function(&name, |b| {
            b.iter(|| {
                ConsolidateChunks::new(coarse.clone())
                    .apply(&direct, black_box(split.clone()))
                    .unwrap()
            })
        });
        let name = format!("consolidate_chunks({}, rayon)", size);
        c.bench_function(&name, |b| {
            b.iter(|| {
                ConsolidateChunks::new(coarse.clone())
                    .apply(&rayon, black_box(split.clone()))
                    .unwrap()
            })
        });
    }
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
