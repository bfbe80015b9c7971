//! Windowed stream identification driver.
//!
//! A fixed-length window slides across the live PCM feed in half-window
//! steps: each iteration reads one half, dispatches the full
//! double-buffered window to the matcher, then shifts the fresh half
//! down. Scores accumulate per metadata string across windows until a
//! now-playing boundary closes the epoch.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use harken_core::{Match, Result};

use crate::matcher::Matcher;
use crate::pcm;
use crate::spectrogram;
use crate::store::Index;

/// Streaming driver tuning knobs.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Analysis window length in seconds
    pub window_secs: u32,
    /// PCM sample rate of the incoming stream
    pub sample_rate: u32,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            window_secs: 20,
            sample_rate: spectrogram::SAMPLE_RATE,
        }
    }
}

impl StreamConfig {
    /// Byte length of the double-buffered window (16-bit mono)
    fn buffer_len(&self) -> usize {
        self.sample_rate as usize * 2 * self.window_secs as usize
    }
}

/// Cross-window score accumulator with the continuity bonus.
///
/// A candidate seen in one window and again half a window later in its
/// reference timeline sits exactly where the stream actually advanced;
/// such a hit is strong evidence and its score is doubled.
#[derive(Debug, Default)]
pub struct ScoreBoard {
    /// Last observed earliest reference time per recording
    previous: HashMap<u32, u32>,
    /// Running score totals per metadata string, cleared each epoch
    totals: HashMap<String, f64>,
}

impl ScoreBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one window's matches into the running totals.
    pub fn apply(&mut self, matches: &[Match], window_secs: u32) {
        let half_ms = i64::from(window_secs) * 1000 / 2;
        for m in matches {
            let mut score = m.score;
            if let Some(&previous) = self.previous.get(&m.recording_id) {
                let delta = i64::from(m.earliest_db_time_ms) - i64::from(previous);
                if delta > half_ms - 2000 && delta < half_ms + 2000 {
                    score *= 2.0;
                }
            }
            self.previous.insert(m.recording_id, m.earliest_db_time_ms);
            *self.totals.entry(m.metadata.clone()).or_default() += score;
        }
    }

    /// Close the current epoch: return the winning metadata and clear the
    /// totals. Continuity state survives across epochs.
    pub fn rollover(&mut self) -> Option<(String, f64)> {
        let best = self
            .totals
            .iter()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(Ordering::Equal))
            .map(|(metadata, &score)| (metadata.clone(), score));
        self.totals.clear();
        best
    }

    /// Current totals, best first, for inspection.
    pub fn standings(&self) -> Vec<(String, f64)> {
        let mut standings: Vec<(String, f64)> = self
            .totals
            .iter()
            .map(|(metadata, &score)| (metadata.clone(), score))
            .collect();
        standings.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
        standings
    }
}

/// Slides the analysis window across a live PCM stream and folds matcher
/// results into a shared [`ScoreBoard`].
pub struct StreamDriver<I> {
    matcher: Arc<Matcher<I>>,
    config: StreamConfig,
    board: Arc<Mutex<ScoreBoard>>,
}

impl<I: Index + 'static> StreamDriver<I> {
    pub fn new(index: Arc<I>, config: StreamConfig) -> Self {
        Self {
            matcher: Arc::new(Matcher::new(index)),
            config,
            board: Arc::new(Mutex::new(ScoreBoard::new())),
        }
    }

    /// Shared handle to the score accumulator.
    pub fn board(&self) -> Arc<Mutex<ScoreBoard>> {
        Arc::clone(&self.board)
    }

    /// Run until the PCM channel closes.
    ///
    /// Each `metadata` event closes the current scoring epoch and logs its
    /// winner as the identification. The in-flight match is drained before
    /// returning, so a cancelled run never drops a computed result.
    pub async fn run(
        &self,
        mut pcm_rx: mpsc::Receiver<Bytes>,
        mut metadata_rx: mpsc::Receiver<String>,
    ) -> Result<()> {
        let board = Arc::clone(&self.board);
        let metadata_task = tokio::spawn(async move {
            while let Some(title) = metadata_rx.recv().await {
                // Full report under one lock acquisition
                let winner = board.lock().unwrap().rollover();
                match winner {
                    Some((metadata, score)) => {
                        info!(score, "stream was probably: {metadata} (next up: {title})")
                    }
                    None => info!("no identification this epoch (next up: {title})"),
                }
            }
        });

        let result = self.window_loop(&mut pcm_rx).await;
        metadata_task.abort();
        result
    }

    async fn window_loop(&self, pcm_rx: &mut mpsc::Receiver<Bytes>) -> Result<()> {
        let len = self.config.buffer_len();
        let half = len / 2;
        let mut buf = vec![0u8; len];
        let mut pending = Bytes::new();
        let mut in_flight: Option<JoinHandle<(Result<Vec<Match>>, Duration)>> = None;

        // Prime the first half before the steady-state loop
        if read_full(pcm_rx, &mut pending, &mut buf[..half]).await {
            loop {
                if !read_full(pcm_rx, &mut pending, &mut buf[half..]).await {
                    break;
                }

                // One match in flight at a time; settle the previous
                // window before dispatching the next
                if let Some(handle) = in_flight.take() {
                    self.settle(handle).await;
                }

                let samples = pcm::condition(&buf)?;
                let matcher = Arc::clone(&self.matcher);
                let duration = Duration::from_secs(u64::from(self.config.window_secs));
                let sample_rate = self.config.sample_rate;
                in_flight = Some(tokio::task::spawn_blocking(move || {
                    matcher.find(&samples, duration, sample_rate)
                }));

                buf.copy_within(half.., 0);
            }
        }

        // Stream ended or cancelled: drain the pending match
        if let Some(handle) = in_flight.take() {
            self.settle(handle).await;
        }
        debug!("stream driver finished");
        Ok(())
    }

    async fn settle(&self, handle: JoinHandle<(Result<Vec<Match>>, Duration)>) {
        let (result, took) = handle.await.expect("matcher task panicked");
        match result {
            Ok(matches) => {
                debug!(candidates = matches.len(), ?took, "window matched");
                self.board
                    .lock()
                    .unwrap()
                    .apply(&matches, self.config.window_secs);
            }
            Err(err) => warn!(%err, ?took, "window match failed"),
        }
    }
}

/// Fill `out` from the channel, carrying chunk remainders across calls.
/// Returns false when the channel closes before `out` fills.
async fn read_full(rx: &mut mpsc::Receiver<Bytes>, pending: &mut Bytes, out: &mut [u8]) -> bool {
    let mut filled = 0;
    while filled < out.len() {
        if pending.is_empty() {
            match rx.recv().await {
                Some(chunk) => *pending = chunk,
                None => return false,
            }
        }
        let take = pending.len().min(out.len() - filled);
        out[filled..filled + take].copy_from_slice(&pending[..take]);
        *pending = pending.slice(take..);
        filled += take;
    }
    true
}
