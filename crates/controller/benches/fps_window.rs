use controller::FpsCounter;
use criterion::{Criterion, black_box, criterion_group, criterion_main};
use std::time::Duration;
use tokio::time::Instant;

fn bench_record_frame(c: &mut Criterion) {
    let start = Instant::now();
    let mut fps = FpsCounter::new(30, start);
    let mut offset = 0u64;

    c.bench_function("record_frame_at", |b| {
        b.iter(|| {
            offset += 33;
            black_box(fps.record_frame_at(start + Duration::from_millis(offset)))
        })
    });
}

fn bench_full_window_rollover(c: &mut Criterion) {
    c.bench_function("rollover_full_window", |b| {
        let start = Instant::now();
        let mut fps = FpsCounter::new(30, start);
        for second in 1..=30 {
            fps.tick_at(start + Duration::from_secs(second));
        }
        let mut second = 30u64;

        b.iter(|| {
            second += 1;
            black_box(fps.tick_at(start + Duration::from_secs(second)))
        })
    });
}

criterion_group!(benches, bench_record_frame, bench_full_window_rollover);
criterion_main!(benches);
