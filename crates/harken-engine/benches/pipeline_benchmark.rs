//! Benchmark tests for the fingerprint pipeline.
//!
//! Run with: cargo bench -p harken-engine

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use harken_engine::{fingerprint, peaks, spectrogram};

fn generate_complex_audio(duration_secs: f64) -> Vec<f64> {
    let sample_rate = spectrogram::SAMPLE_RATE as f64;
    let num_samples = (sample_rate * duration_secs) as usize;
    (0..num_samples)
        .map(|i| {
            let t = i as f64 / sample_rate;
            // Mix of frequencies simulating music
            0.5 * (2.0 * std::f64::consts::PI * 440.0 * t).sin()
                + 0.3 * (2.0 * std::f64::consts::PI * 880.0 * t).sin()
                + 0.2 * (2.0 * std::f64::consts::PI * 220.0 * t).sin()
        })
        .collect()
}

fn bench_spectrogram(c: &mut Criterion) {
    let mut group = c.benchmark_group("Spectrogram");
    group.sample_size(10);

    for duration in [1.0, 5.0, 10.0] {
        let samples = generate_complex_audio(duration);
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{duration}s")),
            &samples,
            |b, samples| {
                b.iter(|| {
                    spectrogram::spectrogram(black_box(samples), spectrogram::SAMPLE_RATE).unwrap()
                });
            },
        );
    }

    group.finish();
}

fn bench_peaks_and_hashing(c: &mut Criterion) {
    let samples = generate_complex_audio(10.0);
    let spectro = spectrogram::spectrogram(&samples, spectrogram::SAMPLE_RATE).unwrap();

    let mut group = c.benchmark_group("Fingerprint");
    group.sample_size(10);

    group.bench_function("extract_peaks 10s", |b| {
        b.iter(|| peaks::extract_peaks(black_box(&spectro), 10.0));
    });

    let extracted = peaks::extract_peaks(&spectro, 10.0);
    group.bench_function("hash_pairs 10s", |b| {
        b.iter(|| fingerprint::fingerprint(black_box(&extracted), 1));
    });

    group.finish();
}

criterion_group!(benches, bench_spectrogram, bench_peaks_and_hashing);
criterion_main!(benches);
