//! Landmark-pair fingerprint hashing.
//!
//! Every peak anchors a small target zone of the peaks that follow it;
//! each (anchor, target) pair packs into a 32-bit [`Address`] stored in
//! the inverted index together with a [`Couple`] locating the anchor
//! inside its recording.

use std::collections::HashMap;

use harken_core::{pack_address, Address, Couple, Peak};

/// Number of following peaks paired with each anchor
pub const TARGET_ZONE_SIZE: usize = 5;

/// Generate the fingerprint multimap of `peaks` for one recording.
///
/// Multiple pairs may collide on a single address within one recording;
/// all couples are retained in emission order.
pub fn fingerprint(peaks: &[Peak], recording_id: u32) -> HashMap<Address, Vec<Couple>> {
    let mut fingerprints: HashMap<Address, Vec<Couple>> = HashMap::new();
    for (address, couple) in fingerprint_iter(peaks, recording_id) {
        fingerprints.entry(address).or_default().push(couple);
    }
    fingerprints
}

/// Lazy form of [`fingerprint`] in the same emission order, for
/// bounded-memory ingestion of long recordings.
pub fn fingerprint_iter(
    peaks: &[Peak],
    recording_id: u32,
) -> impl Iterator<Item = (Address, Couple)> + '_ {
    peaks.iter().enumerate().flat_map(move |(i, anchor)| {
        peaks[i + 1..].iter().take(TARGET_ZONE_SIZE).map(move |target| {
            let couple = Couple {
                anchor_time_ms: (anchor.time_secs * 1000.0) as u32,
                recording_id,
            };
            (create_address(anchor, target), couple)
        })
    })
}

/// Query-side fingerprints: address mapped to the **first emitted** query
/// anchor time in milliseconds. Later pairs colliding on the same address
/// are dropped, which pins the scoring tie-break.
pub fn query_fingerprints(peaks: &[Peak]) -> HashMap<Address, u32> {
    let mut query = HashMap::new();
    for (address, couple) in fingerprint_iter(peaks, 0) {
        query.entry(address).or_insert(couple.anchor_time_ms);
    }
    query
}

/// Pack one (anchor, target) pair into its address.
fn create_address(anchor: &Peak, target: &Peak) -> Address {
    let anchor_freq = anchor.freq_bin as u32;
    let target_freq = target.freq_bin as u32;
    let delta_ms = ((target.time_secs - anchor.time_secs) * 1000.0) as u32;
    pack_address(anchor_freq, target_freq, delta_ms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use harken_core::unpack_address;

    fn peak(time_secs: f64, freq_bin: f64) -> Peak {
        Peak { time_secs, freq_bin }
    }

    #[test]
    fn test_empty_peaks_give_empty_map() {
        assert!(fingerprint(&[], 1).is_empty());
    }

    #[test]
    fn test_pair_fields() {
        let peaks = [peak(1.0, 23.0), peak(1.5, 100.0)];
        let fingerprints = fingerprint(&peaks, 7);

        assert_eq!(fingerprints.len(), 1);
        let (&address, couples) = fingerprints.iter().next().unwrap();
        let (anchor_freq, target_freq, delta_ms) = unpack_address(address);
        assert_eq!((anchor_freq, target_freq, delta_ms), (23, 100, 500));
        assert_eq!(
            couples,
            &vec![Couple {
                anchor_time_ms: 1000,
                recording_id: 7
            }]
        );
    }

    #[test]
    fn test_target_zone_bounds() {
        // 8 peaks: anchors pair with at most 5 successors
        let peaks: Vec<Peak> = (0..8).map(|i| peak(i as f64 * 0.1, i as f64)).collect();
        let count = fingerprint_iter(&peaks, 1).count();
        // 5 + 5 + 5 + 4 + 3 + 2 + 1 + 0
        assert_eq!(count, 25);
    }

    #[test]
    fn test_iter_matches_map_form() {
        let peaks: Vec<Peak> = (0..12).map(|i| peak(i as f64 * 0.07, (i * 17 % 512) as f64)).collect();
        let map = fingerprint(&peaks, 3);

        let mut rebuilt: HashMap<Address, Vec<Couple>> = HashMap::new();
        for (address, couple) in fingerprint_iter(&peaks, 3) {
            rebuilt.entry(address).or_default().push(couple);
        }
        assert_eq!(map, rebuilt);
    }

    #[test]
    fn test_anchor_times_bounded_by_last_peak() {
        let peaks: Vec<Peak> = (0..20).map(|i| peak(i as f64 * 0.33, 40.0)).collect();
        let limit = (peaks.last().unwrap().time_secs * 1000.0) as u32 + 1;
        assert!(fingerprint_iter(&peaks, 1).all(|(_, c)| c.anchor_time_ms <= limit));
    }

    #[test]
    fn test_delta_field_masked() {
        // 20 s apart exceeds the 14-bit delta field and must wrap, not bleed
        let peaks = [peak(0.0, 9.0), peak(20.0, 9.0)];
        let (&address, _) = fingerprint(&peaks, 1).iter().next().unwrap();
        let (anchor_freq, target_freq, delta_ms) = unpack_address(address);
        assert_eq!(anchor_freq, 9);
        assert_eq!(target_freq, 9);
        assert_eq!(delta_ms, 20_000 & 0x3FFF);
    }

    #[test]
    fn test_query_keeps_first_emitted_time() {
        // Two identical pairs at different anchor times collide on one
        // address; the earlier emission wins
        let peaks = [
            peak(1.0, 50.0),
            peak(1.25, 60.0),
            peak(4.0, 50.0),
            peak(4.25, 60.0),
        ];
        let query = query_fingerprints(&peaks);
        let address = pack_address(50, 60, 250);
        assert_eq!(query.get(&address), Some(&1000));
    }
}
