// Copyright 2025 the Bioregion Binner Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

use bioregion_binner::{BinnerConfig, Feature, QuadtreeGeoBinner};
use criterion::{BatchSize, Criterion, Throughput, black_box, criterion_group, criterion_main};
use kurbo::Point;

#[derive(Clone)]
struct Rng(u64);

impl Rng {
    fn new(seed: u64) -> Self {
        Self(seed)
    }
    fn next_u64(&mut self) -> u64 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.0 = x;
        x
    }
    fn next_f64(&mut self) -> f64 {
        let v = self.next_u64() >> 11;
        (v as f64) / ((1u64 << 53) as f64)
    }
}

/// Occurrence points bunched around a few hotspots, as survey data tends to be.
fn gen_clustered_points(n_clusters: usize, per_cluster: usize, spread: f64) -> Vec<Feature> {
    let mut out = Vec::with_capacity(n_clusters * per_cluster);
    let mut rng = Rng::new(0xC1A5_7E55_9999_ABCD);
    let mut centers = Vec::with_capacity(n_clusters);
    for _ in 0..n_clusters {
        centers.push((rng.next_f64() * 300.0 - 150.0, rng.next_f64() * 140.0 - 70.0));
    }
    for (i, (cx, cy)) in centers.into_iter().enumerate() {
        for j in 0..per_cluster {
            let dx = (rng.next_f64() - 0.5) * spread;
            let dy = (rng.next_f64() - 0.5) * spread;
            let name = format!("species {}", (i * 7 + j) % 97);
            out.push(Feature::point(name, cx + dx, cy + dy));
        }
    }
    out
}

/// Square ranges of random size, scattered over the globe.
fn gen_random_ranges(count: usize) -> Vec<Feature> {
    let mut rng = Rng::new(0xFACE_FEED_CAFE_BABE);
    (0..count)
        .map(|i| {
            let w = 1.0 + rng.next_f64() * 20.0;
            let x0 = rng.next_f64() * (360.0 - w) - 180.0;
            let y0 = rng.next_f64() * (180.0 - w) - 90.0;
            let ring = vec![
                Point::new(x0, y0),
                Point::new(x0 + w, y0),
                Point::new(x0 + w, y0 + w),
                Point::new(x0, y0 + w),
                Point::new(x0, y0),
            ];
            Feature::polygon(format!("range {i}"), vec![ring])
        })
        .collect()
}

fn config() -> BinnerConfig {
    BinnerConfig {
        max_cell_size_log2: 4,
        min_cell_size_log2: -3,
        max_cell_capacity: 50,
        min_cell_capacity: 5,
        ..BinnerConfig::default()
    }
}

fn loaded_binner(features: &[Feature]) -> QuadtreeGeoBinner {
    let mut binner = QuadtreeGeoBinner::new(config()).unwrap();
    binner.add_features(features.iter().cloned()).unwrap();
    binner
}

fn bench_generate_tree(c: &mut Criterion) {
    let mut group = c.benchmark_group("generate_tree");
    for &per_cluster in &[100usize, 1_000, 10_000] {
        let features = gen_clustered_points(20, per_cluster, 4.0);
        group.throughput(Throughput::Elements(features.len() as u64));
        group.bench_function(format!("points_n{}", features.len()), |b| {
            b.iter_batched(
                || loaded_binner(&features),
                |mut binner| {
                    binner.generate_tree().unwrap();
                    black_box(binner.tree().len());
                },
                BatchSize::LargeInput,
            )
        });
    }
    let ranges = gen_random_ranges(500);
    group.throughput(Throughput::Elements(ranges.len() as u64));
    group.bench_function("polygons_n500", |b| {
        b.iter_batched(
            || loaded_binner(&ranges),
            |mut binner| {
                binner.generate_tree().unwrap();
                black_box(binner.tree().len());
            },
            BatchSize::LargeInput,
        )
    });
    group.finish();
}

fn bench_generate_cells(c: &mut Criterion) {
    let mut group = c.benchmark_group("generate_cells");
    let features = gen_clustered_points(20, 1_000, 4.0);
    for patch in [false, true] {
        let mut binner = loaded_binner(&features);
        binner.generate_tree().unwrap();
        binner.set_patch_sparse_nodes(patch);
        let name = if patch { "patch_sparse" } else { "unpatched" };
        group.bench_function(name, |b| {
            b.iter(|| {
                let cells = binner.generate_cells().unwrap();
                black_box(cells.len());
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_generate_tree, bench_generate_cells);
criterion_main!(benches);
