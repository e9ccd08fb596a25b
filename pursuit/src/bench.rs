//! Criterion benchmarks over synthetic recordings.
//!
//! Run with: cargo bench -p pursuit --features bench --bench objective

use std::hint::black_box;

use criterion::{BenchmarkId, Criterion};

use crate::common::Array2;
use crate::engine::DeconvModel;
use crate::objective::Objective;
use crate::search::GreedySearch;
use crate::testing::{add_noise, inject, linear_geometry, synthetic_templates, test_config};

const N_CHANNELS: usize = 32;
const N_TIME: usize = 61;

/// Register all benchmarks with Criterion.
pub fn benchmarks(c: &mut Criterion) {
    let config = test_config();
    let geometry = linear_geometry(N_CHANNELS);

    let mut group = c.benchmark_group("model");
    group.sample_size(10);
    for n_units in [8usize, 32] {
        let templates = synthetic_templates(n_units, N_CHANNELS, N_TIME);
        group.bench_with_input(BenchmarkId::new("build", n_units), &templates, |b, t| {
            b.iter(|| DeconvModel::build(black_box(t), &geometry, &config))
        });
    }
    group.finish();

    let templates = synthetic_templates(16, N_CHANNELS, N_TIME);
    let Ok(model) = DeconvModel::build(&templates, &geometry, &config) else {
        eprintln!("Skipping objective benchmarks: model build failed");
        return;
    };

    let mut group = c.benchmark_group("chunk");
    group.sample_size(10);
    for n_samples in [20_000usize, 100_000] {
        let mut data = Array2::new_default(N_CHANNELS, n_samples);
        for (k, start) in (200..n_samples as i64 - 200).step_by(350).enumerate() {
            inject(&mut data, &templates, k % templates.n_units(), start, 1.0);
        }
        add_noise(&mut data, 0.5, 7);

        group.bench_with_input(BenchmarkId::new("objective", n_samples), &data, |b, d| {
            b.iter(|| Objective::build(black_box(d), &model.compressed))
        });
        group.bench_with_input(BenchmarkId::new("search", n_samples), &data, |b, d| {
            b.iter(|| {
                let objective = Objective::build(d, &model.compressed)?;
                GreedySearch::new(model.search_context(&config), objective).run()
            })
        });
    }
    group.finish();
}
