use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use gateway::encode::{JPEG_QUALITY, encode_jpeg};
use schema::Frame;

/// Gradient pattern; compresses more like camera output than a solid fill.
fn gradient_frame(width: u32, height: u32) -> Frame {
    let mut data = Vec::with_capacity((width * height * 3) as usize);
    for y in 0..height {
        for x in 0..width {
            data.push(((x * 255) / width) as u8);
            data.push(((y * 255) / height) as u8);
            data.push((((x + y) * 127) / (width + height)) as u8);
        }
    }
    Frame::new(0, width, height, data).unwrap()
}

fn benchmark_jpeg_encoding(c: &mut Criterion) {
    let mut group = c.benchmark_group("jpeg_encoding");

    let sizes = [(320, 240, "QVGA"), (640, 480, "VGA"), (1280, 720, "HD")];

    for (width, height, label) in sizes {
        let frame = gradient_frame(width, height);
        group.throughput(Throughput::Elements((width * height) as u64));

        group.bench_with_input(BenchmarkId::new("rgb", label), &frame, |b, frame| {
            b.iter(|| encode_jpeg(black_box(frame), black_box(JPEG_QUALITY)));
        });
    }

    group.finish();
}

criterion_group!(benches, benchmark_jpeg_encoding);
criterion_main!(benches);
