//! Core types for landmark audio search.

use serde::{Deserialize, Serialize};

/// Packed landmark-pair hash used as the inverted-index key.
///
/// Bit layout, most to least significant:
///
/// ```text
/// | anchor freq bin (9 bits) | target freq bin (9 bits) | delta ms (14 bits) |
/// ```
///
/// The layout is a stable on-disk format; existing databases depend on it
/// bit for bit.
pub type Address = u32;

/// Bits reserved for each frequency bin field
pub const FREQ_BITS: u32 = 9;
/// Bits reserved for the anchor→target time delta
pub const DELTA_BITS: u32 = 14;
/// Mask applied to frequency bins before shifting
pub const FREQ_MASK: u32 = (1 << FREQ_BITS) - 1;
/// Mask applied to the millisecond delta
pub const DELTA_MASK: u32 = (1 << DELTA_BITS) - 1;

/// Pack an (anchor, target, delta) triple into an address.
///
/// Frequency bins are masked to 9 bits and the delta to 14 bits. The peak
/// extractor never emits bins ≥ 512, but the masks keep the format stable
/// for any input.
pub fn pack_address(anchor_freq: u32, target_freq: u32, delta_ms: u32) -> Address {
    ((anchor_freq & FREQ_MASK) << (FREQ_BITS + DELTA_BITS))
        | ((target_freq & FREQ_MASK) << DELTA_BITS)
        | (delta_ms & DELTA_MASK)
}

/// Unpack an address into (anchor_freq, target_freq, delta_ms).
pub fn unpack_address(address: Address) -> (u32, u32, u32) {
    (
        (address >> (FREQ_BITS + DELTA_BITS)) & FREQ_MASK,
        (address >> DELTA_BITS) & FREQ_MASK,
        address & DELTA_MASK,
    )
}

/// The value stored under an address: where the anchor sits inside which
/// reference recording.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Couple {
    /// Anchor peak time within the recording, in milliseconds
    pub anchor_time_ms: u32,
    /// Identifier of the reference recording
    pub recording_id: u32,
}

/// A reference recording registered in the index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recording {
    /// Monotonically assigned nonzero identifier
    pub id: u32,
    /// Unique opaque key (deduplicates repeated ingestion)
    pub key: String,
    /// Human-readable metadata, e.g. "Artist - Title"
    pub metadata: String,
}

/// A single time–frequency spectral peak.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Peak {
    /// Absolute time within the audio, in seconds
    pub time_secs: f64,
    /// Frequency bin index (kept real for hashing)
    pub freq_bin: f64,
}

/// A ranked identification candidate returned by the matcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Match {
    /// Identifier of the candidate recording
    pub recording_id: u32,
    /// The recording's unique key
    pub key: String,
    /// The recording's metadata
    pub metadata: String,
    /// Earliest matched anchor time within the reference, in milliseconds
    pub earliest_db_time_ms: u32,
    /// Temporal-consistency score; higher is better
    pub score: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_round_trip() {
        let address = pack_address(23, 510, 16_000);
        let (anchor, target, delta) = unpack_address(address);
        assert_eq!(anchor, 23);
        assert_eq!(target, 510);
        assert_eq!(delta, 16_000);
    }

    #[test]
    fn test_address_field_positions() {
        assert_eq!(pack_address(1, 0, 0), 1 << 23);
        assert_eq!(pack_address(0, 1, 0), 1 << 14);
        assert_eq!(pack_address(0, 0, 1), 1);
    }

    #[test]
    fn test_address_masks_out_of_range_fields() {
        // Bin 512 wraps to 0, deltas wrap modulo 2^14
        assert_eq!(pack_address(512, 0, 0), 0);
        assert_eq!(pack_address(0, 512, 0), 0);
        assert_eq!(pack_address(0, 0, 0x4001), 1);
        // Nothing bleeds across field boundaries
        let address = pack_address(511, 511, 0x3FFF);
        assert_eq!(unpack_address(address), (511, 511, 0x3FFF));
    }
}
