//! Durable fingerprint cache backed by SQLite
//!
//! Maps task name to the input fingerprint recorded after the task's last
//! successful run. The store is strictly advisory: a missing, corrupted, or
//! unwritable database degrades to "every task is stale" and never blocks a
//! run. Writes are keyed per task, so no two tasks ever contend on a row.

use crate::error::{Result, StagehandError};
use crate::fingerprint::Fingerprint;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::warn;

/// Fingerprint store for incremental skipping
#[derive(Clone)]
pub struct CacheStore {
    conn: Option<Arc<Mutex<Connection>>>,
}

impl CacheStore {
    /// Open (or create) the cache database at the given path
    pub fn open<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        if let Some(parent) = db_path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(db_path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
            ",
        )?;

        let store = Self {
            conn: Some(Arc::new(Mutex::new(conn))),
        };

        store.init_schema()?;
        Ok(store)
    }

    /// Open the cache, degrading to a disabled store on any failure.
    ///
    /// Correctness never depends on cache presence, so corruption is
    /// reported and survived rather than propagated.
    pub fn open_or_degrade<P: AsRef<Path>>(db_path: P) -> Self {
        match Self::open(&db_path) {
            Ok(store) => store,
            Err(e) => {
                let err = StagehandError::CacheCorruption(e.to_string());
                warn!("{err}; continuing with caching disabled");
                Self::disabled()
            }
        }
    }

    /// A store that treats every task as stale
    pub fn disabled() -> Self {
        Self { conn: None }
    }

    /// In-memory store (for testing)
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Some(Arc::new(Mutex::new(conn))),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        if let Some(conn) = &self.conn {
            let conn = conn.lock().unwrap();
            conn.execute_batch(
                "
                CREATE TABLE IF NOT EXISTS fingerprints (
                    task TEXT PRIMARY KEY,
                    fingerprint TEXT NOT NULL,
                    recorded_at TIMESTAMP NOT NULL
                );
                ",
            )?;
        }
        Ok(())
    }

    pub fn is_enabled(&self) -> bool {
        self.conn.is_some()
    }

    /// Persist the fingerprint after a successful task run
    pub fn record_success(&self, task: &str, fingerprint: &Fingerprint) -> Result<()> {
        let Some(conn) = &self.conn else {
            return Ok(());
        };

        let conn = conn.lock().unwrap();
        conn.execute(
            "INSERT INTO fingerprints (task, fingerprint, recorded_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(task) DO UPDATE SET fingerprint = ?2, recorded_at = ?3",
            params![task, fingerprint.as_str(), Utc::now()],
        )?;

        Ok(())
    }

    /// Last recorded fingerprint for a task, if any.
    ///
    /// Read failures degrade to `None` (stale) with a warning.
    pub fn lookup(&self, task: &str) -> Option<Fingerprint> {
        let conn = self.conn.as_ref()?;
        let conn = conn.lock().unwrap();

        let result: rusqlite::Result<Option<String>> = conn
            .query_row(
                "SELECT fingerprint FROM fingerprints WHERE task = ?1",
                params![task],
                |row| row.get(0),
            )
            .optional();

        match result {
            Ok(hex) => hex.map(Fingerprint::from_hex),
            Err(e) => {
                warn!("Cache read for task '{}' failed: {}; treating as stale", task, e);
                None
            }
        }
    }

    /// True if no record exists for the task or the recorded fingerprint
    /// differs from the current one
    pub fn is_stale(&self, task: &str, current: &Fingerprint) -> bool {
        match self.lookup(task) {
            Some(recorded) => recorded != *current,
            None => true,
        }
    }

    /// Drop every recorded fingerprint
    pub fn clear(&self) -> Result<()> {
        if let Some(conn) = &self.conn {
            let conn = conn.lock().unwrap();
            conn.execute("DELETE FROM fingerprints", [])?;
        }
        Ok(())
    }
}
