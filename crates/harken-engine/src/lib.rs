//! Harken - landmark audio search engine
//!
//! The engine identifies recordings the way landmark-pair audio search
//! systems do: spectral peaks become (anchor, target) pairs, each pair
//! packs into a 32-bit address, and a query is identified by looking its
//! addresses up in an inverted index and scoring how consistently the
//! hits line up in time.
//!
//! # Pipeline
//!
//! ```text
//! ┌──────────┐   ┌───────────┐   ┌─────────────┐   ┌────────┐   ┌─────────────┐
//! │ s16le    │──▶│ condition │──▶│ spectrogram │──▶│ peaks  │──▶│ fingerprint │
//! │ PCM      │   │ [-1, 1]   │   │ Hann + FFT  │   │ 6-band │   │ addresses   │
//! └──────────┘   └───────────┘   └─────────────┘   └────────┘   └──────┬──────┘
//!                                                                      │
//!                                 ingest ──▶ SqliteIndex ◀── lookup ───┤
//!                                                │                     │
//!                                                └──────▶ matcher ◀────┘
//! ```
//!
//! # Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use harken_engine::{decode, pcm, Matcher, Result, SqliteIndex};
//!
//! fn main() -> Result<()> {
//!     let index = Arc::new(SqliteIndex::open("harken.db")?);
//!
//!     let audio = decode::decode_file("clip.wav")?;
//!     let samples = pcm::condition(audio.bytes())?;
//!
//!     let matcher = Matcher::new(index);
//!     let (result, took) = matcher.find(&samples, audio.duration(), audio.sample_rate());
//!     for m in result?.iter().take(3) {
//!         println!("{:>8.0}  {}", m.score, m.metadata);
//!     }
//!     println!("matched in {took:?}");
//!     Ok(())
//! }
//! ```

#![warn(clippy::all)]

pub mod decode;
pub mod fingerprint;
pub mod ingest;
pub mod listener;
pub mod matcher;
pub mod pcm;
pub mod peaks;
pub mod spectrogram;
pub mod store;
pub mod streaming;

pub use harken_core::{Address, Couple, Error, Match, Peak, Recording, Result};
pub use matcher::Matcher;
pub use store::{Index, SqliteIndex};

/// Run the front half of the pipeline: conditioned samples in, spectral
/// peaks out. `duration_secs` is the declared duration of the audio and
/// scales peak times to absolute seconds.
pub fn analyze(samples: &[f64], duration_secs: f64, sample_rate: u32) -> Result<Vec<Peak>> {
    let spectro = spectrogram::spectrogram(samples, sample_rate)?;
    Ok(peaks::extract_peaks(&spectro, duration_secs))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_analyze_silence_yields_nothing() {
        let peaks = analyze(&vec![0.0; 4096], 0.1, spectrogram::SAMPLE_RATE).unwrap();
        assert!(peaks.is_empty());
        // ... and therefore an empty fingerprint map
        assert!(fingerprint::fingerprint(&peaks, 1).is_empty());
    }

    #[test]
    fn test_analyze_sine_selects_constant_bin() {
        // 1 kHz lands in bin 23 (third band). The zero-padded tail frames
        // see a truncated window and may smear, so the assertion covers
        // the steady-state region only.
        let sample_rate = spectrogram::SAMPLE_RATE;
        let samples: Vec<f64> = (0..sample_rate as usize * 2)
            .map(|i| (2.0 * std::f64::consts::PI * 1000.0 * i as f64 / sample_rate as f64).sin())
            .collect();

        let peaks = analyze(&samples, 2.0, sample_rate).unwrap();
        let steady: Vec<Peak> = peaks
            .iter()
            .filter(|p| p.time_secs < 1.9)
            .copied()
            .collect();
        assert!(!steady.is_empty());
        assert!(steady.iter().all(|p| p.freq_bin == 23.0));

        // One peak per row, so every pair address carries anchor ==
        // target == 23
        let fingerprints = fingerprint::fingerprint(&steady, 1);
        assert!(!fingerprints.is_empty());
        for address in fingerprints.keys() {
            let (anchor_freq, target_freq, _delta) = harken_core::unpack_address(*address);
            assert_eq!(anchor_freq, 23);
            assert_eq!(target_freq, 23);
        }
    }
}
