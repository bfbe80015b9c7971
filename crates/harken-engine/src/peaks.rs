//! Spectral peak extraction.
//!
//! Each spectrogram row is partitioned into six logarithmic frequency
//! bands and contributes at most one peak per band. Keeping only the
//! band maxima that rise above the row's own mean suppresses quiet rows
//! entirely, so silence yields no peaks at all.

use harken_core::Peak;
use tracing::debug;

/// Frequency band partition over bin indices, upper bound exclusive.
const BANDS: [(usize, usize); 6] = [(0, 10), (10, 20), (20, 40), (40, 80), (80, 160), (160, 511)];

/// Select the locally dominant time–frequency peaks of a spectrogram.
///
/// `duration_secs` scales row indices to absolute time. Peaks are
/// emitted in row-major order and are therefore non-decreasing in time.
pub fn extract_peaks(spectrogram: &[Vec<f64>], duration_secs: f64) -> Vec<Peak> {
    if spectrogram.is_empty() {
        return Vec::new();
    }

    let row_secs = duration_secs / spectrogram.len() as f64;
    let mut peaks = Vec::new();

    for (row_idx, row) in spectrogram.iter().enumerate() {
        let mut candidates: Vec<(usize, f64)> = Vec::with_capacity(BANDS.len());

        for &(lo, hi) in &BANDS {
            let hi = hi.min(row.len());
            if lo >= hi {
                continue;
            }
            let band_max = row[lo..hi]
                .iter()
                .enumerate()
                .fold((lo, f64::NEG_INFINITY), |best, (i, &magnitude)| {
                    if magnitude > best.1 {
                        (lo + i, magnitude)
                    } else {
                        best
                    }
                });
            candidates.push(band_max);
        }

        if candidates.is_empty() {
            continue;
        }

        let mean = candidates.iter().map(|&(_, m)| m).sum::<f64>() / candidates.len() as f64;

        for (bin, magnitude) in candidates {
            if magnitude > mean {
                peaks.push(Peak {
                    time_secs: row_idx as f64 * row_secs,
                    freq_bin: bin as f64,
                });
            }
        }
    }

    debug!(peaks = peaks.len(), rows = spectrogram.len(), "extracted peaks");
    peaks
}
