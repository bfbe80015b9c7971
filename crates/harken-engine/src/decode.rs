//! Audio decoding to signed 16-bit little-endian mono PCM.
//!
//! Everything downstream of this module speaks s16le mono bytes; WAV
//! files go through `hound`, all other formats and the live mp3 stream
//! through `symphonia`.

use std::fs::File;
use std::io;
use std::path::Path;
use std::time::Duration;

use bytes::Bytes;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{Decoder, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::{MediaSourceStream, ReadOnlySource};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use harken_core::{Error, Result};

/// Decoded audio exposed as a contiguous s16le mono byte view.
#[derive(Debug)]
pub struct DecodedAudio {
    bytes: Vec<u8>,
    sample_rate: u32,
}

impl DecodedAudio {
    fn from_mono_i16(samples: &[i16], sample_rate: u32) -> Self {
        let mut bytes = Vec::with_capacity(samples.len() * 2);
        for sample in samples {
            bytes.extend_from_slice(&sample.to_le_bytes());
        }
        Self { bytes, sample_rate }
    }

    /// Contiguous little-endian 16-bit mono sample bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Source sample rate in Hz.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Total audio duration.
    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.bytes.len() as f64 / 2.0 / self.sample_rate as f64)
    }
}

/// Decode an audio file to mono 16-bit PCM.
///
/// A decode failure is fatal to this file only; callers processing a
/// batch keep going.
pub fn decode_file(path: impl AsRef<Path>) -> Result<DecodedAudio> {
    let path = path.as_ref();
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("wav") => decode_wav(path),
        _ => decode_with_symphonia(path),
    }
}

fn decode_wav(path: &Path) -> Result<DecodedAudio> {
    let reader = hound::WavReader::open(path).map_err(|e| Error::decode(e.to_string()))?;
    let spec = reader.spec();
    debug!(?spec, "decoding wav {}", path.display());

    let samples: Vec<i16> = reader
        .into_samples::<i16>()
        .collect::<std::result::Result<_, _>>()
        .map_err(|e| Error::decode(e.to_string()))?;
    let mono = downmix(&samples, spec.channels as usize)?;

    info!(
        samples = mono.len(),
        sample_rate = spec.sample_rate,
        "decoded {}",
        path.display()
    );
    Ok(DecodedAudio::from_mono_i16(&mono, spec.sample_rate))
}

fn decode_with_symphonia(path: &Path) -> Result<DecodedAudio> {
    let file = File::open(path)?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| Error::decode(format!("unsupported format: {e}")))?;

    let mut stream = DecodedStream::open(probed.format)?;
    let mut mono: Vec<i16> = Vec::new();
    while let Some(frame) = stream.next_frame()? {
        mono.extend_from_slice(&frame);
    }

    info!(
        samples = mono.len(),
        sample_rate = stream.sample_rate,
        "decoded {}",
        path.display()
    );
    Ok(DecodedAudio::from_mono_i16(&mono, stream.sample_rate))
}

/// Average interleaved frames down to one channel.
fn downmix(samples: &[i16], channels: usize) -> Result<Vec<i16>> {
    match channels {
        1 => Ok(samples.to_vec()),
        2 => Ok(samples
            .chunks_exact(2)
            .map(|frame| ((i32::from(frame[0]) + i32::from(frame[1])) / 2) as i16)
            .collect()),
        n => Err(Error::decode(format!("unsupported channel count: {n}"))),
    }
}

/// Packet-by-packet mono i16 frames out of a symphonia format reader.
struct DecodedStream {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    channels: usize,
    sample_rate: u32,
    sample_buf: Option<SampleBuffer<i16>>,
}

impl DecodedStream {
    fn open(format: Box<dyn FormatReader>) -> Result<Self> {
        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| Error::decode("no audio track"))?;
        let track_id = track.id;
        let sample_rate = track
            .codec_params
            .sample_rate
            .ok_or_else(|| Error::decode("unknown sample rate"))?;
        let channels = track
            .codec_params
            .channels
            .ok_or_else(|| Error::decode("unknown channel count"))?
            .count();

        let decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(|e| Error::decode(e.to_string()))?;

        Ok(Self {
            format,
            decoder,
            track_id,
            channels,
            sample_rate,
            sample_buf: None,
        })
    }

    /// Next downmixed frame, or `None` at end of stream.
    fn next_frame(&mut self) -> Result<Option<Vec<i16>>> {
        loop {
            let packet = match self.format.next_packet() {
                Ok(packet) => packet,
                Err(symphonia::core::errors::Error::IoError(e))
                    if e.kind() == io::ErrorKind::UnexpectedEof =>
                {
                    return Ok(None);
                }
                Err(e) => return Err(Error::decode(e.to_string())),
            };
            if packet.track_id() != self.track_id {
                continue;
            }

            let decoded = match self.decoder.decode(&packet) {
                Ok(decoded) => decoded,
                // Corrupt frames are skipped, not fatal
                Err(symphonia::core::errors::Error::DecodeError(err)) => {
                    debug!(err, "skipping undecodable packet");
                    continue;
                }
                Err(e) => return Err(Error::decode(e.to_string())),
            };

            let sample_buf = self.sample_buf.get_or_insert_with(|| {
                SampleBuffer::new(decoded.capacity() as u64, *decoded.spec())
            });
            sample_buf.copy_interleaved_ref(decoded);
            return Ok(Some(downmix(sample_buf.samples(), self.channels)?));
        }
    }
}

/// Blocking reader over a channel of stream chunks, for feeding the
/// symphonia decoder from an async producer. A closed channel reads as
/// end of stream.
pub struct ChunkReader {
    rx: mpsc::Receiver<Bytes>,
    pending: Bytes,
}

impl ChunkReader {
    pub fn new(rx: mpsc::Receiver<Bytes>) -> Self {
        Self {
            rx,
            pending: Bytes::new(),
        }
    }
}

impl io::Read for ChunkReader {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        while self.pending.is_empty() {
            match self.rx.blocking_recv() {
                Some(chunk) => self.pending = chunk,
                None => return Ok(0),
            }
        }
        let n = self.pending.len().min(out.len());
        out[..n].copy_from_slice(&self.pending[..n]);
        self.pending = self.pending.slice(n..);
        Ok(n)
    }
}

/// Decode a live mp3 stream into s16le mono PCM chunks.
///
/// Blocks the calling thread; run it under `spawn_blocking` or a
/// dedicated thread. Returns cleanly when the source or the PCM receiver
/// goes away.
pub fn decode_stream(reader: ChunkReader, pcm_tx: mpsc::Sender<Bytes>) -> Result<()> {
    let source = ReadOnlySource::new(reader);
    let mss = MediaSourceStream::new(Box::new(source), Default::default());

    let mut hint = Hint::new();
    hint.mime_type("audio/mpeg");

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| Error::decode(format!("probing stream: {e}")))?;

    let mut stream = DecodedStream::open(probed.format)?;
    if stream.sample_rate != crate::spectrogram::SAMPLE_RATE {
        warn!(
            sample_rate = stream.sample_rate,
            "stream is not at the internal analysis rate"
        );
    }
    info!(sample_rate = stream.sample_rate, channels = stream.channels, "stream decoder ready");

    while let Some(frame) = stream.next_frame()? {
        let mut bytes = Vec::with_capacity(frame.len() * 2);
        for sample in frame {
            bytes.extend_from_slice(&sample.to_le_bytes());
        }
        if pcm_tx.blocking_send(Bytes::from(bytes)).is_err() {
            // Consumer hung up; nothing left to do
            return Ok(());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_wav(path: &Path, channels: u16, samples: &[i16]) {
        let spec = hound::WavSpec {
            channels,
            sample_rate: 44100,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for &sample in samples {
            writer.write_sample(sample).unwrap();
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn test_decode_mono_wav() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        let samples: Vec<i16> = (0..4410).map(|i| (i % 256) as i16).collect();
        write_wav(&path, 1, &samples);

        let audio = decode_file(&path).unwrap();
        assert_eq!(audio.sample_rate(), 44100);
        assert_eq!(audio.bytes().len(), samples.len() * 2);
        assert_eq!((audio.duration().as_millis()), 100);
    }

    #[test]
    fn test_decode_stereo_wav_downmixes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stereo.wav");
        // L = 1000, R = 3000 everywhere -> mono 2000
        let samples: Vec<i16> = (0..2000).map(|i| if i % 2 == 0 { 1000 } else { 3000 }).collect();
        write_wav(&path, 2, &samples);

        let audio = decode_file(&path).unwrap();
        assert_eq!(audio.bytes().len(), 2000);
        let mono = crate::pcm::condition(audio.bytes()).unwrap();
        assert!(mono.iter().all(|&s| (s - 2000.0 / 32768.0).abs() < 1e-9));
    }

    #[test]
    fn test_decode_missing_file_fails() {
        let err = decode_file("/nonexistent/audio.wav").unwrap_err();
        assert!(matches!(err, Error::Decode(_)));
    }

    #[test]
    fn test_chunk_reader_stitches_chunks() {
        use std::io::Read;

        let (tx, rx) = mpsc::channel(4);
        tx.blocking_send(Bytes::from_static(b"abc")).unwrap();
        tx.blocking_send(Bytes::from_static(b"defgh")).unwrap();
        drop(tx);

        let mut reader = ChunkReader::new(rx);
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"abcdefgh");
    }
}
