//! Command implementations.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};
use url::Url;

use harken_engine::decode::{self, ChunkReader};
use harken_engine::ingest::{ingest_files, IngestConfig};
use harken_engine::listener;
use harken_engine::streaming::{StreamConfig, StreamDriver};
use harken_engine::{pcm, Matcher, SqliteIndex};

use crate::output;

/// Fingerprint files into the index with a progress bar.
pub async fn ingest(
    db: &Path,
    files: Vec<PathBuf>,
    jobs: usize,
    meta: Option<String>,
    format: &str,
) -> anyhow::Result<()> {
    anyhow::ensure!(!files.is_empty(), "no files given");
    anyhow::ensure!(
        meta.is_none() || files.len() == 1,
        "--meta only applies when ingesting a single file"
    );

    let index = Arc::new(SqliteIndex::open(db).context("opening index")?);
    let config = IngestConfig {
        max_parallel: jobs,
        metadata: meta,
    };

    let bar = ProgressBar::new(files.len() as u64);
    bar.set_style(
        ProgressStyle::with_template("{bar:40} {pos}/{len} {msg}")
            .expect("static progress template"),
    );

    let outcomes = ingest_files(index, files, config, |outcome| {
        bar.set_message(outcome.path.display().to_string());
        bar.inc(1);
    })
    .await;
    bar.finish_and_clear();

    output::print_ingest(&outcomes, format);

    let failed = outcomes
        .iter()
        .filter(|o| matches!(o.status, harken_engine::ingest::IngestStatus::Failed { .. }))
        .count();
    anyhow::ensure!(failed < outcomes.len(), "every file failed to ingest");
    Ok(())
}

/// Identify one file against the index.
pub async fn identify(db: &Path, file: PathBuf, top: usize, format: &str) -> anyhow::Result<()> {
    let index = Arc::new(SqliteIndex::open(db).context("opening index")?);

    let audio = tokio::task::spawn_blocking(move || decode::decode_file(&file))
        .await?
        .context("decoding query audio")?;
    let samples = pcm::condition(audio.bytes())?;
    let duration = audio.duration();
    let sample_rate = audio.sample_rate();

    let matcher = Matcher::new(index);
    let (result, took) =
        tokio::task::spawn_blocking(move || matcher.find(&samples, duration, sample_rate)).await?;
    let matches = result.with_context(|| format!("matching failed after {took:?}"))?;

    output::print_matches(&matches[..matches.len().min(top)], took, format);
    Ok(())
}

/// Monitor an Icecast stream until interrupted.
pub async fn listen(db: &Path, url: &str, window: u32) -> anyhow::Result<()> {
    let index = Arc::new(SqliteIndex::open(db).context("opening index")?);
    let url = Url::parse(url).context("invalid stream url")?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let channels = listener::listen(url, shutdown_rx);

    // mp3 chunks -> PCM on a dedicated blocking thread
    let (pcm_tx, pcm_rx) = mpsc::channel(32);
    let mp3_rx = channels.audio;
    let decoder_task =
        tokio::task::spawn_blocking(move || decode::decode_stream(ChunkReader::new(mp3_rx), pcm_tx));

    let driver = Arc::new(StreamDriver::new(
        index,
        StreamConfig {
            window_secs: window,
            ..Default::default()
        },
    ));
    let board = driver.board();

    let mut run = {
        let driver = Arc::clone(&driver);
        tokio::spawn(async move { driver.run(pcm_rx, channels.metadata).await })
    };

    tokio::select! {
        joined = &mut run => joined??,
        _ = tokio::signal::ctrl_c() => {
            info!("interrupt received, draining in-flight work");
            let _ = shutdown_tx.send(true);
            run.await??;
        }
    }

    if let Err(err) = decoder_task.await? {
        warn!(%err, "stream decoder exited with an error");
    }

    // Whatever accumulated since the last metadata boundary
    if let Some((metadata, score)) = board.lock().unwrap().rollover() {
        info!(score, "final epoch was probably: {metadata}");
    }
    Ok(())
}
