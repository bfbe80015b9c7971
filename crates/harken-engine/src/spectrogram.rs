//! Short-time magnitude spectrum computation.
//!
//! The analysis constants are part of the fingerprint format: changing the
//! window or hop changes every address ever stored, so they are fixed here
//! rather than configurable.

use std::borrow::Cow;
use std::f64::consts::PI;

use harken_core::{Error, Result};
use num_complex::Complex;
use rustfft::FftPlanner;
use tracing::debug;

/// Internal analysis rate in Hz. Sources at an integer multiple are
/// decimated down to it.
pub const SAMPLE_RATE: u32 = 44100;
/// Analysis window length in samples
pub const WINDOW_SIZE: usize = 1024;
/// Hop between successive frames; fine hop for robust time localization
pub const HOP_SIZE: usize = WINDOW_SIZE / 32;
/// Frequency bins kept per frame (Hermitian symmetry)
pub const NUM_BINS: usize = WINDOW_SIZE / 2;

/// Compute the short-time magnitude spectrum of `samples`.
///
/// Rows are time frames (`ceil(n / HOP_SIZE)` of them, the tail
/// zero-padded), columns the first [`NUM_BINS`] raw magnitudes `|X[k]|`.
/// Peak ranking downstream works on raw magnitude, so no log or power
/// scaling is applied.
pub fn spectrogram(samples: &[f64], sample_rate: u32) -> Result<Vec<Vec<f64>>> {
    let samples = downsample(samples, sample_rate)?;
    if samples.len() < WINDOW_SIZE {
        return Err(Error::WindowTooShort {
            have: samples.len(),
            need: WINDOW_SIZE,
        });
    }

    let window = hann_window(WINDOW_SIZE);
    let mut planner = FftPlanner::new();
    let fft = planner.plan_fft_forward(WINDOW_SIZE);

    let num_frames = samples.len().div_ceil(HOP_SIZE);
    let mut rows = Vec::with_capacity(num_frames);
    let mut buffer = vec![Complex::new(0.0f64, 0.0); WINDOW_SIZE];

    for frame_idx in 0..num_frames {
        let start = frame_idx * HOP_SIZE;
        let frame = &samples[start..samples.len().min(start + WINDOW_SIZE)];

        for (i, slot) in buffer.iter_mut().enumerate() {
            let sample = frame.get(i).copied().unwrap_or(0.0);
            *slot = Complex::new(sample * window[i], 0.0);
        }

        fft.process(&mut buffer);

        let magnitudes: Vec<f64> = buffer[..NUM_BINS].iter().map(|c| c.norm()).collect();
        rows.push(magnitudes);
    }

    debug!(frames = rows.len(), bins = NUM_BINS, "computed spectrogram");
    Ok(rows)
}

/// Generate a Hann window of length `size`.
fn hann_window(size: usize) -> Vec<f64> {
    (0..size)
        .map(|i| 0.5 * (1.0 - (2.0 * PI * i as f64 / (size - 1) as f64).cos()))
        .collect()
}

/// Bring `samples` down to [`SAMPLE_RATE`] by integer-factor decimation,
/// low-pass filtering first to avoid aliasing. A source already at the
/// internal rate is returned as-is.
fn downsample(samples: &[f64], sample_rate: u32) -> Result<Cow<'_, [f64]>> {
    if sample_rate == SAMPLE_RATE {
        return Ok(Cow::Borrowed(samples));
    }
    if sample_rate < SAMPLE_RATE || sample_rate % SAMPLE_RATE != 0 {
        return Err(Error::UnsupportedRate { sr: sample_rate });
    }

    let factor = (sample_rate / SAMPLE_RATE) as usize;
    let filtered = low_pass(samples, 1.0 / factor as f64);
    Ok(Cow::Owned(filtered.into_iter().step_by(factor).collect()))
}

/// Windowed-sinc FIR low-pass. `cutoff` is a fraction of the input
/// Nyquist frequency.
fn low_pass(samples: &[f64], cutoff: f64) -> Vec<f64> {
    const HALF_TAPS: i64 = 32;

    // Normalized cutoff in cycles per sample, Hamming-windowed kernel
    let fc = cutoff / 2.0;
    let taps: Vec<f64> = (-HALF_TAPS..=HALF_TAPS)
        .map(|n| {
            let sinc = if n == 0 {
                2.0 * fc
            } else {
                (2.0 * PI * fc * n as f64).sin() / (PI * n as f64)
            };
            let window = 0.54 + 0.46 * (PI * n as f64 / HALF_TAPS as f64).cos();
            sinc * window
        })
        .collect();
    let gain: f64 = taps.iter().sum();

    let half = HALF_TAPS as usize;
    (0..samples.len())
        .map(|i| {
            let mut acc = 0.0;
            for (t, tap) in taps.iter().enumerate() {
                let j = i as i64 + t as i64 - half as i64;
                if j >= 0 && (j as usize) < samples.len() {
                    acc += samples[j as usize] * tap;
                }
            }
            acc / gain
        })
        .collect()
}
