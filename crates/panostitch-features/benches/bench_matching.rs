use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use panostitch_features::{match_features, MatcherStrategy};

fn synthetic_descriptors(count: usize, seed: u64) -> Vec<[u8; 32]> {
    let mut state = seed;
    (0..count)
        .map(|_| {
            std::array::from_fn(|_| {
                state = state
                    .wrapping_mul(6364136223846793005)
                    .wrapping_add(1442695040888963407);
                (state >> 56) as u8
            })
        })
        .collect()
}

fn bench_matching(c: &mut Criterion) {
    let mut group = c.benchmark_group("DescriptorMatching");

    for count in [128, 512, 2048].iter() {
        group.throughput(criterion::Throughput::Elements(*count as u64));

        let parameter_string = format!("{count}");

        let query = synthetic_descriptors(*count, 3);
        let train = synthetic_descriptors(*count, 17);

        group.bench_with_input(
            BenchmarkId::new("exhaustive", &parameter_string),
            &(&query, &train),
            |b, i| {
                b.iter(|| {
                    match_features(black_box(i.0), black_box(i.1), &MatcherStrategy::Exhaustive)
                })
            },
        );

        group.bench_with_input(
            BenchmarkId::new("kd_forest", &parameter_string),
            &(&query, &train),
            |b, i| {
                b.iter(|| {
                    match_features(
                        black_box(i.0),
                        black_box(i.1),
                        &MatcherStrategy::KdTrees { trees: 4 },
                    )
                })
            },
        );
    }
    group.finish();
}

criterion_group!(benches, bench_matching);
criterion_main!(benches);
