//! Inverted-index storage.
//!
//! The on-disk schema is shared with existing databases and must not
//! change: `recordings(id, metadata, key)` plus
//! `fingerprints(address, anchorTimeMs, songID)` with replace-on-conflict
//! on the composite primary key.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use harken_core::{Address, Couple, Recording, Result};

/// Abstract store mapping addresses to couples, plus recording metadata.
///
/// All operations are synchronous and fallible. Writers serialize;
/// a reader never observes a partially stored recording.
pub trait Index: Send + Sync {
    /// Insert a new recording. Returns the sentinel `0` when `key` is
    /// already registered (the caller skips fingerprinting), otherwise a
    /// freshly assigned nonzero id.
    fn register_recording(&self, key: &str, metadata: &str) -> Result<u32>;

    /// Durably persist fingerprints, all or nothing. Duplicates on
    /// (address, anchor_time_ms, recording_id) are coalesced.
    fn store_fingerprints(
        &self,
        fingerprints: &mut dyn Iterator<Item = (Address, Couple)>,
    ) -> Result<()>;

    /// Batch lookup. Addresses without hits are omitted from the result.
    fn get_couples(&self, addresses: &[Address]) -> Result<HashMap<Address, Vec<Couple>>>;

    /// Metadata lookup. `Ok(None)` means the id is unknown, as opposed to
    /// a transient store failure.
    fn get_recording(&self, id: u32) -> Result<Option<Recording>>;
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS recordings (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    metadata TEXT NOT NULL,
    key TEXT NOT NULL UNIQUE
);
CREATE TABLE IF NOT EXISTS fingerprints (
    address INTEGER NOT NULL,
    anchorTimeMs INTEGER NOT NULL,
    songID INTEGER NOT NULL,
    PRIMARY KEY (address, anchorTimeMs, songID)
);
";

/// SQLite-backed [`Index`].
///
/// `rusqlite::Connection` is not `Sync`, so the single connection lives
/// behind a `Mutex`: writes serialize against everything, and a read
/// always sees whole transactions. That is stricter than the
/// reader/writer split the contract asks for, never weaker.
pub struct SqliteIndex {
    conn: Mutex<Connection>,
}

impl SqliteIndex {
    /// Open (or create) an index at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::init(Connection::open(path)?)
    }

    /// Open a transient in-memory index.
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl Index for SqliteIndex {
    fn register_recording(&self, key: &str, metadata: &str) -> Result<u32> {
        let conn = self.conn.lock().unwrap();

        let existing: Option<u32> = conn
            .query_row(
                "SELECT id FROM recordings WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        if existing.is_some() {
            debug!(key, "recording already registered");
            return Ok(0);
        }

        conn.execute(
            "INSERT INTO recordings (metadata, key) VALUES (?1, ?2)",
            params![metadata, key],
        )?;
        Ok(conn.last_insert_rowid() as u32)
    }

    fn store_fingerprints(
        &self,
        fingerprints: &mut dyn Iterator<Item = (Address, Couple)>,
    ) -> Result<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT OR REPLACE INTO fingerprints (address, anchorTimeMs, songID) \
                 VALUES (?1, ?2, ?3)",
            )?;
            for (address, couple) in fingerprints {
                stmt.execute(params![address, couple.anchor_time_ms, couple.recording_id])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn get_couples(&self, addresses: &[Address]) -> Result<HashMap<Address, Vec<Couple>>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare_cached(
            "SELECT anchorTimeMs, songID FROM fingerprints WHERE address = ?1",
        )?;

        let mut couples: HashMap<Address, Vec<Couple>> = HashMap::new();
        for &address in addresses {
            let rows = stmt.query_map(params![address], |row| {
                Ok(Couple {
                    anchor_time_ms: row.get(0)?,
                    recording_id: row.get(1)?,
                })
            })?;
            for couple in rows {
                couples.entry(address).or_default().push(couple?);
            }
        }
        Ok(couples)
    }

    fn get_recording(&self, id: u32) -> Result<Option<Recording>> {
        let conn = self.conn.lock().unwrap();
        let recording = conn
            .query_row(
                "SELECT id, key, metadata FROM recordings WHERE id = ?1",
                params![id],
                |row| {
                    Ok(Recording {
                        id: row.get(0)?,
                        key: row.get(1)?,
                        metadata: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(recording)
    }
}
