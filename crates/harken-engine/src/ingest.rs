//! Parallel reference ingestion.
//!
//! Fingerprinting is embarrassingly parallel per file; the index itself
//! serializes writers, so the only coordination here is the parallelism
//! bound.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, warn};

use harken_core::Result;

use crate::decode;
use crate::fingerprint;
use crate::pcm;
use crate::store::Index;

/// Ingestion tuning knobs.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Upper bound on files fingerprinted concurrently
    pub max_parallel: usize,
    /// Metadata override; defaults to the file stem
    pub metadata: Option<String>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            max_parallel: 8,
            metadata: None,
        }
    }
}

/// Outcome of ingesting one file.
#[derive(Debug, Clone, Serialize)]
pub struct IngestOutcome {
    pub path: PathBuf,
    pub status: IngestStatus,
}

/// What happened to a single file.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestStatus {
    /// Registered and fingerprinted under the assigned id
    Stored { id: u32, fingerprints: usize },
    /// Key already present; skipped without refingerprinting
    Duplicate,
    /// Decode or store failure; the rest of the batch proceeds
    Failed { error: String },
}

/// Fingerprint `files` into `index`, at most `config.max_parallel` at a
/// time. `on_done` fires once per finished file, in completion order.
pub async fn ingest_files<I, F>(
    index: Arc<I>,
    files: Vec<PathBuf>,
    config: IngestConfig,
    mut on_done: F,
) -> Vec<IngestOutcome>
where
    I: Index + 'static,
    F: FnMut(&IngestOutcome),
{
    let semaphore = Arc::new(Semaphore::new(config.max_parallel.max(1)));
    let mut tasks = JoinSet::new();

    for path in files {
        let index = Arc::clone(&index);
        let semaphore = Arc::clone(&semaphore);
        let metadata = config.metadata.clone();
        tasks.spawn(async move {
            let _permit = semaphore
                .acquire_owned()
                .await
                .expect("ingest semaphore never closes");
            tokio::task::spawn_blocking(move || {
                let status = ingest_file(index.as_ref(), &path, metadata);
                (path, status)
            })
            .await
            .expect("ingest worker panicked")
        });
    }

    let mut outcomes = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        let (path, status) = joined.expect("ingest task panicked");
        let outcome = IngestOutcome {
            status: match status {
                Ok(status) => status,
                Err(err) => {
                    warn!(%err, "failed to ingest {}", path.display());
                    IngestStatus::Failed {
                        error: err.to_string(),
                    }
                }
            },
            path,
        };
        on_done(&outcome);
        outcomes.push(outcome);
    }
    outcomes
}

/// Decode, register, and fingerprint one file.
///
/// The canonical path is the recording key, so re-ingesting the same file
/// hits the duplicate sentinel instead of storing twice.
fn ingest_file<I: Index>(index: &I, path: &Path, metadata: Option<String>) -> Result<IngestStatus> {
    let key = path
        .canonicalize()
        .unwrap_or_else(|_| path.to_path_buf())
        .to_string_lossy()
        .into_owned();
    let metadata = metadata.unwrap_or_else(|| {
        path.file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| key.clone())
    });

    let audio = decode::decode_file(path)?;

    let id = index.register_recording(&key, &metadata)?;
    if id == 0 {
        info!("already ingested {}", path.display());
        return Ok(IngestStatus::Duplicate);
    }

    let samples = pcm::condition(audio.bytes())?;
    let peaks = crate::analyze(&samples, audio.duration().as_secs_f64(), audio.sample_rate())?;

    let mut count = 0usize;
    index.store_fingerprints(
        &mut fingerprint::fingerprint_iter(&peaks, id).inspect(|_| count += 1),
    )?;

    info!(id, fingerprints = count, "ingested {}", path.display());
    Ok(IngestStatus::Stored {
        id,
        fingerprints: count,
    })
}
