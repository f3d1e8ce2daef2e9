use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use panostitch_image::Image;
use panostitch_imgproc::rotate::rotate_180;

fn bench_rotate(c: &mut Criterion) {
    let mut group = c.benchmark_group("Rotate");

    for (width, height) in [(320, 240), (640, 480), (1280, 960)].iter() {
        group.throughput(criterion::Throughput::Elements((*width * *height) as u64));

        let parameter_string = format!("{}x{}", width, height);

        let image_size = [*width, *height].into();
        let image = Image::<u8, 3>::new(image_size, vec![0u8; width * height * 3]).unwrap();

        group.bench_with_input(
            BenchmarkId::new("rotate_180", &parameter_string),
            &image,
            |b, i| b.iter(|| black_box(rotate_180(black_box(i)).unwrap())),
        );
    }
    group.finish();
}

criterion_group!(benches, bench_rotate);
criterion_main!(benches);
