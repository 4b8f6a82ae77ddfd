//! Benchmarks for tracking algorithms

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use ioutrack::{ious, Bbox, ContinuityTracker};
use ioutrack::bbox::boxes_to_array;
use rand::Rng;
use std::hint::black_box;

/// People walking right across the frame, one box per person per frame
fn create_test_detections(n_detections: usize, n_frames: usize) -> Vec<Vec<Bbox<f32>>> {
    (0..n_frames)
        .map(|frame| {
            (0..n_detections)
                .map(|i| {
                    let x = (frame * 3 + i * 60) as f32;
                    let y = (i * 20) as f32;
                    Bbox::from_xywh(x, y, 50.0, 120.0)
                })
                .collect()
        })
        .collect()
}

fn create_random_boxes(count: usize, frame_width: f32, frame_height: f32) -> Vec<Bbox<f32>> {
    let mut rng = rand::rng();
    (0..count)
        .map(|_| {
            let w = rng.random_range(20.0..100.0);
            let h = rng.random_range(40.0..200.0);
            let x = rng.random_range(0.0..(frame_width - w));
            let y = rng.random_range(0.0..(frame_height - h));
            Bbox::from_xywh(x, y, w, h)
        })
        .collect()
}

fn bench_continuity_update(c: &mut Criterion) {
    let detections = create_test_detections(20, 10);

    c.bench_function("continuity_update_20_detections", |b| {
        b.iter_batched(
            || ContinuityTracker::new(0.3),
            |mut tracker| {
                for det_frame in &detections {
                    let _result = tracker.update(black_box(det_frame));
                }
            },
            criterion::BatchSize::SmallInput,
        )
    });
}

fn bench_iou_matrix(c: &mut Criterion) {
    let mut group = c.benchmark_group("iou_matrix");

    for &count in [4usize, 16, 64].iter() {
        let dets = boxes_to_array(&create_random_boxes(count, 1280.0, 720.0));
        let tracks = boxes_to_array(&create_random_boxes(count, 1280.0, 720.0));
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, _| {
            b.iter(|| ious(black_box(dets.view()), black_box(tracks.view())))
        });
    }

    group.finish();
}

criterion_group!(benches, bench_continuity_update, bench_iou_matrix);
criterion_main!(benches);
