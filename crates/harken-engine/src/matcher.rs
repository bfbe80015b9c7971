//! Inverted-index lookup and temporal-consistency scoring.
//!
//! A query's landmark addresses are looked up in batch; every couple that
//! comes back votes for its recording. The score of a candidate is the
//! number of hit pairs whose spacing in query time agrees with their
//! spacing in reference time, which is what separates a real alignment
//! from address collisions.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use harken_core::{Address, Match, Result};

use crate::fingerprint;
use crate::store::Index;

/// Tolerance for relative-timing agreement, in milliseconds
const TOLERANCE_MS: i64 = 100;
/// Hits per candidate beyond which pairwise scoring switches to the
/// offset histogram
const HISTOGRAM_THRESHOLD: usize = 512;

/// Identifies query audio against an [`Index`].
pub struct Matcher<I> {
    index: Arc<I>,
}

impl<I: Index> Matcher<I> {
    pub fn new(index: Arc<I>) -> Self {
        Self { index }
    }

    /// Identify `samples` against the index.
    ///
    /// Returns candidates ranked best first (score descending, ties by
    /// ascending recording id) and the wall-clock elapsed time for the
    /// whole call. Elapsed time is reported whether the match succeeds or
    /// aborts, so failures still carry their cost. Candidates whose
    /// metadata cannot be fetched are skipped with a log entry; store
    /// read failures abort the match.
    pub fn find(
        &self,
        samples: &[f64],
        duration: Duration,
        sample_rate: u32,
    ) -> (Result<Vec<Match>>, Duration) {
        let start = Instant::now();
        let result = self.find_inner(samples, duration, sample_rate);
        let elapsed = start.elapsed();
        match &result {
            Ok(matches) => debug!(candidates = matches.len(), ?elapsed, "match complete"),
            Err(err) => debug!(%err, ?elapsed, "match aborted"),
        }
        (result, elapsed)
    }

    fn find_inner(
        &self,
        samples: &[f64],
        duration: Duration,
        sample_rate: u32,
    ) -> Result<Vec<Match>> {
        let peaks = crate::analyze(samples, duration.as_secs_f64(), sample_rate)?;
        let query = fingerprint::query_fingerprints(&peaks);

        let addresses: Vec<Address> = query.keys().copied().collect();
        let couples_by_addr = self.index.get_couples(&addresses)?;

        // recording id -> [(query anchor ms, db anchor ms)] and db anchor times
        let mut pairs: HashMap<u32, Vec<(u32, u32)>> = HashMap::new();
        let mut timestamps: HashMap<u32, Vec<u32>> = HashMap::new();

        for (address, couples) in &couples_by_addr {
            let query_ms = query[address];
            for couple in couples {
                pairs
                    .entry(couple.recording_id)
                    .or_default()
                    .push((query_ms, couple.anchor_time_ms));
                timestamps
                    .entry(couple.recording_id)
                    .or_default()
                    .push(couple.anchor_time_ms);
            }
        }

        let mut matches = Vec::with_capacity(pairs.len());
        for (recording_id, hits) in &pairs {
            let score = score_hits(hits);

            let recording = match self.index.get_recording(*recording_id) {
                Ok(Some(recording)) => recording,
                Ok(None) => {
                    let err = harken_core::Error::NotFound { id: *recording_id };
                    warn!(%err, "skipping candidate");
                    continue;
                }
                Err(err) => {
                    warn!(recording_id, %err, "metadata lookup failed, skipping candidate");
                    continue;
                }
            };

            let times = timestamps.get_mut(recording_id).unwrap();
            times.sort_unstable();

            matches.push(Match {
                recording_id: *recording_id,
                key: recording.key,
                metadata: recording.metadata,
                earliest_db_time_ms: times[0],
                score,
            });
        }

        matches.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.recording_id.cmp(&b.recording_id))
        });

        Ok(matches)
    }
}

fn score_hits(hits: &[(u32, u32)]) -> f64 {
    if hits.len() > HISTOGRAM_THRESHOLD {
        histogram_score(hits)
    } else {
        pairwise_score(hits)
    }
}

/// Count hit pairs whose query spacing and reference spacing agree to
/// within the tolerance.
fn pairwise_score(hits: &[(u32, u32)]) -> f64 {
    let mut count: u64 = 0;
    for i in 0..hits.len() {
        for j in i + 1..hits.len() {
            let query_diff = (i64::from(hits[i].0) - i64::from(hits[j].0)).abs();
            let db_diff = (i64::from(hits[i].1) - i64::from(hits[j].1)).abs();
            if (query_diff - db_diff).abs() < TOLERANCE_MS {
                count += 1;
            }
        }
    }
    count as f64
}

/// O(k) replacement for [`pairwise_score`] on large hit sets: bucket the
/// db−query offsets at tolerance granularity and count the pairs inside
/// the best bucket. Hits in one bucket agree pairwise, so the ranking
/// matches the exhaustive count.
fn histogram_score(hits: &[(u32, u32)]) -> f64 {
    let mut buckets: HashMap<i64, u64> = HashMap::new();
    for &(query_ms, db_ms) in hits {
        let offset = i64::from(db_ms) - i64::from(query_ms);
        *buckets.entry(offset.div_euclid(TOLERANCE_MS)).or_default() += 1;
    }
    let k = buckets.values().copied().max().unwrap_or(0);
    (k * k.saturating_sub(1) / 2) as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteIndex;

    #[test]
    fn test_pairwise_score_counts_consistent_pairs() {
        // Three hits at a constant offset of 5000 ms agree pairwise
        let hits = [(0, 5000), (1000, 6000), (2000, 7000)];
        assert_eq!(pairwise_score(&hits), 3.0);

        // A stray hit far off the diagonal adds nothing
        let hits = [(0, 5000), (1000, 6000), (2000, 12_000)];
        assert_eq!(pairwise_score(&hits), 1.0);
    }

    #[test]
    fn test_pairwise_score_tolerates_small_jitter() {
        let hits = [(0, 5000), (1000, 6099)];
        assert_eq!(pairwise_score(&hits), 1.0);
        let hits = [(0, 5000), (1000, 6100)];
        assert_eq!(pairwise_score(&hits), 0.0);
    }

    #[test]
    fn test_pairwise_score_handles_reversed_order() {
        // Query times later than db times must not wrap
        let hits = [(10_000, 100), (11_000, 1100)];
        assert_eq!(pairwise_score(&hits), 1.0);
    }

    #[test]
    fn test_histogram_score_matches_pairwise_on_clean_offsets() {
        let hits: Vec<(u32, u32)> = (0..100).map(|i| (i * 200, i * 200 + 5000)).collect();
        assert_eq!(histogram_score(&hits), pairwise_score(&hits));
    }

    #[test]
    fn test_histogram_score_empty() {
        assert_eq!(histogram_score(&[]), 0.0);
    }

    fn tone_samples(freqs: &[f64], duration_secs: f64) -> Vec<f64> {
        let sample_rate = crate::spectrogram::SAMPLE_RATE as f64;
        let n = (sample_rate * duration_secs) as usize;
        (0..n)
            .map(|i| {
                let t = i as f64 / sample_rate;
                freqs
                    .iter()
                    .map(|f| (2.0 * std::f64::consts::PI * f * t).sin())
                    .sum::<f64>()
                    / freqs.len() as f64
            })
            .collect()
    }

    fn ingest_tone(index: &SqliteIndex, key: &str, freqs: &[f64]) -> u32 {
        let samples = tone_samples(freqs, 5.0);
        let peaks = crate::analyze(&samples, 5.0, crate::spectrogram::SAMPLE_RATE).unwrap();
        let id = index.register_recording(key, key).unwrap();
        index
            .store_fingerprints(&mut fingerprint::fingerprint_iter(&peaks, id))
            .unwrap();
        id
    }

    #[test]
    fn test_self_match_ranks_first() {
        let index = Arc::new(SqliteIndex::open_in_memory().unwrap());
        let id_a = ingest_tone(&index, "a", &[440.0, 1320.0]);
        ingest_tone(&index, "b", &[550.0, 2750.0]);
        ingest_tone(&index, "c", &[700.0, 3500.0]);

        let samples = tone_samples(&[440.0, 1320.0], 5.0);
        let matcher = Matcher::new(Arc::clone(&index));
        let (result, _took) =
            matcher.find(&samples, Duration::from_secs(5), crate::spectrogram::SAMPLE_RATE);
        let matches = result.unwrap();

        assert!(!matches.is_empty());
        assert_eq!(matches[0].recording_id, id_a);
        assert!(matches[0].score > 0.0);
        for other in &matches[1..] {
            assert!(matches[0].score > other.score);
        }
    }

    #[test]
    fn test_find_is_deterministic() {
        let index = Arc::new(SqliteIndex::open_in_memory().unwrap());
        ingest_tone(&index, "a", &[440.0, 1320.0]);
        ingest_tone(&index, "b", &[550.0, 2750.0]);

        let samples = tone_samples(&[440.0, 1320.0], 5.0);
        let matcher = Matcher::new(Arc::clone(&index));
        let first = matcher
            .find(&samples, Duration::from_secs(5), crate::spectrogram::SAMPLE_RATE)
            .0
            .unwrap();
        let second = matcher
            .find(&samples, Duration::from_secs(5), crate::spectrogram::SAMPLE_RATE)
            .0
            .unwrap();

        let summary = |matches: &[Match]| -> Vec<(u32, u32, String)> {
            matches
                .iter()
                .map(|m| (m.recording_id, m.score as u32, m.metadata.clone()))
                .collect()
        };
        assert_eq!(summary(&first), summary(&second));
    }

    #[test]
    fn test_failed_match_still_reports_elapsed() {
        let index = Arc::new(SqliteIndex::open_in_memory().unwrap());
        let matcher = Matcher::new(index);
        // Under one analysis window: the match aborts but its cost is
        // still surfaced alongside the error
        let (result, took) =
            matcher.find(&[0.0; 64], Duration::from_secs(1), crate::spectrogram::SAMPLE_RATE);
        assert!(result.is_err());
        assert!(took < Duration::from_secs(60));
    }

    #[test]
    fn test_empty_store_gives_no_matches() {
        let index = Arc::new(SqliteIndex::open_in_memory().unwrap());
        let samples = tone_samples(&[440.0], 5.0);
        let matcher = Matcher::new(index);
        let (result, _took) =
            matcher.find(&samples, Duration::from_secs(5), crate::spectrogram::SAMPLE_RATE);
        assert!(result.unwrap().is_empty());
    }

    #[test]
    fn test_missing_recording_skipped() {
        // Couples for a recording id that was never registered
        let index = Arc::new(SqliteIndex::open_in_memory().unwrap());
        let samples = tone_samples(&[440.0, 1320.0], 5.0);
        let peaks = crate::analyze(&samples, 5.0, crate::spectrogram::SAMPLE_RATE).unwrap();
        index
            .store_fingerprints(&mut fingerprint::fingerprint_iter(&peaks, 99))
            .unwrap();

        let matcher = Matcher::new(Arc::clone(&index));
        let (result, _took) =
            matcher.find(&samples, Duration::from_secs(5), crate::spectrogram::SAMPLE_RATE);
        assert!(result.unwrap().is_empty());
    }
}
