use criterion::{black_box, criterion_group, criterion_main, Criterion};
use ndarray::{Array1, Array2, Array4};
use widefield_demux::channels::{resolve, ArraySource, ChannelSource};
use widefield_demux::partition::{grayscale_video, partition, take_traces};
use widefield_demux::{Point2, SimilarityTransform};

pub fn bench_demultiplex_traces(c: &mut Criterion) {
    // 200 components over 30k interleaved frames
    let num_samples = 30_000;
    let sources = vec![ChannelSource::Array(ArraySource {
        channel_ids: Array1::from_iter((0..num_samples).map(|i| (i % 2) as i64 + 1)),
        timestamps: Some(Array1::from_iter((0..num_samples).map(|i| i as f64 / 60.0))),
    })];
    let traces = Array2::from_shape_fn((200, num_samples), |(roi, t)| (roi + t) as f64);

    c.bench_function("demultiplex_traces", |b| {
        b.iter(|| {
            let resolution = resolve(black_box(&sources), None).unwrap();
            let parts = partition(&resolution.assignment).unwrap();
            for part in &parts {
                black_box(take_traces(traces.view(), part));
            }
        });
    });
}

pub fn bench_grayscale(c: &mut Criterion) {
    let video = Array4::from_shape_fn((20, 270, 320, 3), |(i, r, col, k)| {
        ((i + r * 3 + col * 5 + k * 7) % 256) as u8
    });

    c.bench_function("grayscale_video", |b| {
        b.iter(|| black_box(grayscale_video(video.view()).unwrap()));
    });
}

pub fn bench_fit_and_warp(c: &mut Criterion) {
    let truth = SimilarityTransform::from_angle(0.3, [12.0, -4.0], 1.1).unwrap();
    let source: Vec<Point2> = (0..50)
        .map(|i| Point2::new((i * 7 % 13) as f64, (i * 5 % 11) as f64))
        .collect();
    let target: Vec<Point2> = source.iter().map(|p| truth.apply(*p)).collect();
    let image = Array2::from_shape_fn((540, 640), |(r, col)| (r * col) as f64);

    c.bench_function("fit_similarity", |b| {
        b.iter(|| black_box(SimilarityTransform::fit(&source, &target).unwrap()));
    });
    c.bench_function("warp_reference_image", |b| {
        b.iter(|| black_box(truth.warp_image(image.view(), (540, 640))));
    });
}

criterion_group!(benches, bench_demultiplex_traces, bench_grayscale, bench_fit_and_warp);
criterion_main!(benches);
