//! Sample conditioning from raw PCM bytes.

use harken_core::{Error, Result};

/// Convert signed 16-bit little-endian PCM bytes into normalized `f64`
/// samples in [-1, 1].
///
/// Fails when the buffer does not hold a whole number of 16-bit frames.
pub fn condition(input: &[u8]) -> Result<Vec<f64>> {
    if input.len() % 2 != 0 {
        return Err(Error::MalformedPcm { len: input.len() });
    }

    let mut output = Vec::with_capacity(input.len() / 2);
    for frame in input.chunks_exact(2) {
        let sample = i16::from_le_bytes([frame[0], frame[1]]);
        output.push(f64::from(sample) / 32768.0);
    }

    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_one_sample_per_frame() {
        let bytes = vec![0u8; 4096];
        let samples = condition(&bytes).unwrap();
        assert_eq!(samples.len(), 2048);
    }

    #[test]
    fn test_samples_normalized() {
        // i16::MIN, i16::MAX, zero
        let bytes = [0x00, 0x80, 0xFF, 0x7F, 0x00, 0x00];
        let samples = condition(&bytes).unwrap();
        assert_eq!(samples, vec![-1.0, 32767.0 / 32768.0, 0.0]);
        assert!(samples.iter().all(|s| (-1.0..=1.0).contains(s)));
    }

    #[test]
    fn test_odd_length_rejected() {
        let err = condition(&[0x01, 0x02, 0x03]).unwrap_err();
        assert!(matches!(err, Error::MalformedPcm { len: 3 }));
    }

    #[test]
    fn test_empty_input() {
        assert!(condition(&[]).unwrap().is_empty());
    }
}
