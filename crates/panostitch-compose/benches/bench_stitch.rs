use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use panostitch_compose::{BlendMode, Compositor};
use panostitch_features::Homography;
use panostitch_image::Image;

fn textured_frame(width: usize, height: usize) -> Image<u8, 3> {
    let mut data = vec![0u8; width * height * 3];
    for y in 0..height {
        for x in 0..width {
            let idx = (y * width + x) * 3;
            data[idx] = (x % 251) as u8;
            data[idx + 1] = (y % 241) as u8;
            data[idx + 2] = ((x + y) % 239) as u8;
        }
    }
    Image::new([width, height].into(), data).unwrap()
}

fn bench_stitch(c: &mut Criterion) {
    let mut group = c.benchmark_group("Stitch");
    group.sample_size(10);

    for (width, height) in [(320, 240), (640, 480)].iter() {
        group.throughput(criterion::Throughput::Elements((*width * *height) as u64));

        let parameter_string = format!("{width}x{height}");

        let frames = [
            textured_frame(*width, *height),
            textured_frame(*width, *height),
        ];
        let overlap = *width as f64 * 0.9;
        let homographies = [Some(Homography::from_array([
            1.0, 0.0, -overlap, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0,
        ]))];

        for (name, blend) in [
            ("overlay", BlendMode::Overlay),
            ("linear", BlendMode::Linear),
        ] {
            group.bench_with_input(
                BenchmarkId::new(name, &parameter_string),
                &(&frames, &homographies),
                |b, i| {
                    let compositor = Compositor::new(blend, true);
                    b.iter(|| compositor.stitch(black_box(i.0), black_box(i.1)))
                },
            );
        }
    }
    group.finish();
}

criterion_group!(benches, bench_stitch);
criterion_main!(benches);
