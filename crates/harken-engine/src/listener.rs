//! Icecast stream listener with interleaved icy metadata.
//!
//! Icecast interleaves metadata into the audio stream when asked: every
//! `icy-metaint` audio bytes comes a length byte (times 16), then a
//! metadata block like `StreamTitle='Artist - Title';` padded with NULs.
//! The listener splits the two apart, feeding audio chunks to one channel
//! and now-playing titles to another, reconnecting on failure until shut
//! down.

use std::collections::HashMap;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use reqwest::Client;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info};
use url::Url;

use harken_core::{Error, Result};

/// Upper bound on an icy metadata block (length byte × 16)
const MAX_METADATA_LEN: usize = 255 * 16;
/// Pause between reconnection attempts
const RETRY_DELAY: Duration = Duration::from_secs(2);

/// Channels handed to the caller: raw audio chunks (still encoded, e.g.
/// mp3) and now-playing titles.
pub struct StreamChannels {
    pub audio: mpsc::Receiver<Bytes>,
    pub metadata: mpsc::Receiver<String>,
}

/// Spawn the listener task for `url`.
///
/// The task reconnects on error until `shutdown` flips to true or both
/// receivers are dropped.
pub fn listen(url: Url, shutdown: watch::Receiver<bool>) -> StreamChannels {
    let (audio_tx, audio_rx) = mpsc::channel(32);
    let (metadata_tx, metadata_rx) = mpsc::channel(8);
    tokio::spawn(run(url, audio_tx, metadata_tx, shutdown));
    StreamChannels {
        audio: audio_rx,
        metadata: metadata_rx,
    }
}

async fn run(
    url: Url,
    audio: mpsc::Sender<Bytes>,
    metadata: mpsc::Sender<String>,
    mut shutdown: watch::Receiver<bool>,
) {
    let client = Client::new();
    loop {
        if *shutdown.borrow() {
            return;
        }
        match connect(&client, &url).await {
            Ok((response, metaint)) => {
                info!(%url, metaint, "connected");
                match parse_stream(response, metaint, &audio, &metadata, &mut shutdown).await {
                    Err(Error::Cancelled) => return,
                    Err(err) => error!(%err, "connection lost"),
                    Ok(()) => return,
                }
            }
            Err(err) => error!(%err, "connecting"),
        }
        // Wait a bit before retrying the connection
        tokio::select! {
            _ = tokio::time::sleep(RETRY_DELAY) => {}
            _ = shutdown.changed() => {}
        }
    }
}

async fn connect(client: &Client, url: &Url) -> Result<(reqwest::Response, usize)> {
    let response = client
        .get(url.clone())
        // Ask for interleaved metadata
        .header("Icy-MetaData", "1")
        .header("User-Agent", "harken/monitor")
        // No connection reuse for the audio stream
        .header("Connection", "close")
        .send()
        .await
        .map_err(|e| Error::stream(format!("request failed: {e}")))?;

    if response.status() != reqwest::StatusCode::OK {
        return Err(Error::stream(format!(
            "status code is not OK: {}",
            response.status()
        )));
    }

    let metaint = response
        .headers()
        .get("icy-metaint")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<usize>().ok())
        .filter(|&value| value > 0)
        .ok_or_else(|| Error::stream("icy-metaint missing or not a positive integer"))?;

    Ok((response, metaint))
}

async fn parse_stream(
    response: reqwest::Response,
    metaint: usize,
    audio: &mpsc::Sender<Bytes>,
    metadata: &mpsc::Sender<String>,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<()> {
    let mut reader = BodyReader::new(response);

    loop {
        // Audio bytes first, then one length byte, then the metadata block
        let data = reader.read_exact(metaint, shutdown).await?;
        if audio.send(data).await.is_err() {
            return Ok(());
        }

        let length = usize::from(reader.read_exact(1, shutdown).await?[0]) * 16;
        if length == 0 {
            continue;
        }
        debug_assert!(length <= MAX_METADATA_LEN);

        let block = reader.read_exact(length, shutdown).await?;
        let meta = parse_metadata(&block);
        if meta.is_empty() {
            // Most likely we lost sync with the framing; reconnect
            return Err(Error::stream(format!(
                "empty metadata block: {}",
                String::from_utf8_lossy(&block)
            )));
        }

        match meta.get("StreamTitle") {
            Some(title) if !title.is_empty() => {
                info!(%title, "now playing");
                if metadata.send(title.clone()).await.is_err() {
                    return Ok(());
                }
            }
            _ => debug!("metadata without stream title"),
        }
    }
}

/// Buffered exact-length reads over the response body.
struct BodyReader {
    response: reqwest::Response,
    buf: BytesMut,
}

impl BodyReader {
    fn new(response: reqwest::Response) -> Self {
        Self {
            response,
            buf: BytesMut::new(),
        }
    }

    async fn read_exact(&mut self, n: usize, shutdown: &mut watch::Receiver<bool>) -> Result<Bytes> {
        while self.buf.len() < n {
            tokio::select! {
                chunk = self.response.chunk() => {
                    match chunk.map_err(|e| Error::stream(e.to_string()))? {
                        Some(bytes) => self.buf.extend_from_slice(&bytes),
                        None => return Err(Error::stream("stream ended")),
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return Err(Error::Cancelled);
                    }
                }
            }
        }
        Ok(self.buf.split_to(n).freeze())
    }
}

/// Parse an icy metadata block into key/value pairs.
///
/// Blocks are NUL-padded and normally end each value with `';`. Icecast's
/// default configuration html-escapes non-ASCII, so entities are
/// unescaped here, and broken UTF-8 is replaced at this edge since every
/// layer above expects valid strings.
fn parse_metadata(block: &[u8]) -> HashMap<String, String> {
    let mut meta = HashMap::new();

    // Trim the NUL padding and make sure a trailing semicolon exists so
    // the last pair terminates
    let end = block.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
    let mut bytes = block[..end].to_vec();
    if bytes.last() != Some(&b';') {
        bytes.push(b';');
    }

    let mut rest: &[u8] = &bytes;
    loop {
        let (after_key, key) = find_sequence(rest, b'=', b'\'');
        let (after_value, value) = find_sequence(after_key, b'\'', b';');
        if key.is_empty() {
            break;
        }
        meta.insert(
            String::from_utf8_lossy(key).into_owned(),
            unescape_entities(&String::from_utf8_lossy(value)),
        );
        rest = after_value;
    }
    meta
}

/// Scan for the two-byte boundary `a` then `b`; returns the remainder
/// after the boundary and the bytes before it.
fn find_sequence(seq: &[u8], a: u8, b: u8) -> (&[u8], &[u8]) {
    for i in 1..seq.len() {
        if seq[i - 1] == a && seq[i] == b {
            return (&seq[i + 1..], &seq[..i - 1]);
        }
    }
    (&[], &[])
}

/// Resolve the HTML entities icecast emits for non-ASCII metadata.
fn unescape_entities(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut rest = s;

    while let Some(start) = rest.find('&') {
        out.push_str(&rest[..start]);
        let tail = &rest[start..];
        let Some(end) = tail.find(';') else {
            out.push_str(tail);
            return out;
        };
        match decode_entity(&tail[1..end]) {
            Some(decoded) => {
                out.push(decoded);
                rest = &tail[end + 1..];
            }
            None => {
                out.push('&');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

fn decode_entity(entity: &str) -> Option<char> {
    match entity {
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        _ => {
            let code = if let Some(hex) = entity.strip_prefix("#x").or_else(|| entity.strip_prefix("#X")) {
                u32::from_str_radix(hex, 16).ok()
            } else if let Some(dec) = entity.strip_prefix('#') {
                dec.parse().ok()
            } else {
                None
            };
            code.and_then(char::from_u32)
        }
    }
}
