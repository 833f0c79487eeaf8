//! SQLite-backed metadata cache
//!
//! One row per message id. Rows are only ever inserted: a second `put` of the
//! same id is ignored, so the cache grows monotonically until the file is
//! deleted. `received_ts` (UTC milliseconds) drives range queries and
//! ordering, `received_at` keeps the original offset.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use chrono::{DateTime, FixedOffset, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::{debug, info, warn};

use crate::error::{Result, SearchError};
use crate::models::{MessageRecord, SyncRange};

const SCHEMA_VERSION: i64 = 1;

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS messages (
        message_id TEXT PRIMARY KEY,
        subject TEXT NOT NULL,
        sender TEXT NOT NULL,
        received_at TEXT NOT NULL,
        received_ts INTEGER NOT NULL,
        web_link TEXT NOT NULL,
        cached_at TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_messages_received_ts
        ON messages(received_ts DESC);
"#;

/// Summary of the cache contents
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreStats {
    pub records: usize,
    pub oldest: Option<DateTime<FixedOffset>>,
    pub newest: Option<DateTime<FixedOffset>>,
}

/// Durable message metadata cache
pub struct MetadataStore {
    conn: Connection,
    path: Option<PathBuf>,
}

impl MetadataStore {
    /// Open or create the cache file at `path`
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        let store = Self {
            conn,
            path: Some(path.to_path_buf()),
        };
        store.init_schema()?;
        debug!("Opened metadata store at {:?}", path);
        Ok(store)
    }

    /// Open the cache, recreating it from scratch if the file is unusable
    pub fn open_or_rebuild(path: &Path) -> Result<Self> {
        match Self::open(path) {
            Ok(store) => Ok(store),
            Err(e) if e.is_store_failure() => {
                warn!("Cache at {:?} is unusable ({}), rebuilding", path, e);
                Self::remove_files(path)?;
                Self::open(path)
            }
            Err(e) => Err(e),
        }
    }

    pub fn open_in_memory() -> Result<Self> {
        let store = Self {
            conn: Connection::open_in_memory()?,
            path: None,
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Delete the cache file and its WAL side files. Returns whether anything was removed.
    pub fn remove_files(path: &Path) -> Result<bool> {
        let mut removed = false;
        for candidate in [
            path.to_path_buf(),
            side_file(path, "-wal"),
            side_file(path, "-shm"),
        ] {
            match std::fs::remove_file(&candidate) {
                Ok(()) => {
                    debug!("Removed {:?}", candidate);
                    removed = true;
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(removed)
    }

    fn init_schema(&self) -> Result<()> {
        // Fails with NotADatabase on garbage files
        let version: i64 = self
            .conn
            .pragma_query_value(None, "user_version", |row| row.get(0))?;

        if version > SCHEMA_VERSION {
            return Err(SearchError::StoreCorrupt(format!(
                "cache schema version {} is newer than supported version {}",
                version, SCHEMA_VERSION
            )));
        }

        if self.path.is_some() {
            self.conn
                .pragma_update_and_check(None, "journal_mode", "WAL", |_| Ok(()))?;
        }
        self.conn.execute_batch(SCHEMA)?;
        self.conn
            .pragma_update(None, "user_version", SCHEMA_VERSION)?;
        Ok(())
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Insert records, ignoring ids that are already cached.
    ///
    /// All rows go in one transaction, so an interrupted call stores either
    /// the whole batch or nothing. Returns the number of new rows.
    pub fn put(&mut self, records: &[MessageRecord]) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }

        let cached_at = Utc::now().to_rfc3339();
        let tx = self.conn.transaction()?;
        let mut inserted = 0;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT OR IGNORE INTO messages
                 (message_id, subject, sender, received_at, received_ts, web_link, cached_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?;
            for record in records {
                inserted += stmt.execute(params![
                    record.message_id,
                    record.subject,
                    record.sender,
                    record.received_at.to_rfc3339(),
                    record.received_at.timestamp_millis(),
                    record.web_link,
                    cached_at,
                ])?;
            }
        }
        tx.commit()?;

        debug!("Stored {} of {} records", inserted, records.len());
        Ok(inserted)
    }

    /// Ids of cached messages received inside `range`
    pub fn list_ids(&self, range: &SyncRange) -> Result<HashSet<String>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT message_id FROM messages WHERE received_ts >= ?1 AND received_ts < ?2",
        )?;
        let ids = stmt
            .query_map(
                params![range.since.timestamp_millis(), range.until.timestamp_millis()],
                |row| row.get::<_, String>(0),
            )?
            .collect::<rusqlite::Result<HashSet<_>>>()?;
        Ok(ids)
    }

    /// All records, newest first, optionally restricted to `range`
    pub fn scan(&self, range: Option<&SyncRange>) -> Result<Vec<MessageRecord>> {
        let (since, until) = match range {
            Some(r) => (r.since.timestamp_millis(), r.until.timestamp_millis()),
            None => (i64::MIN, i64::MAX),
        };

        let mut stmt = self.conn.prepare_cached(
            "SELECT message_id, subject, sender, received_at, web_link
             FROM messages
             WHERE received_ts >= ?1 AND received_ts < ?2
             ORDER BY received_ts DESC, message_id ASC",
        )?;
        let rows = stmt.query_map(params![since, until], record_from_row)?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row??);
        }
        Ok(records)
    }

    pub fn get(&self, message_id: &str) -> Result<Option<MessageRecord>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT message_id, subject, sender, received_at, web_link
             FROM messages WHERE message_id = ?1",
        )?;
        let record = stmt
            .query_row(params![message_id], record_from_row)
            .optional()?;
        record.transpose()
    }

    pub fn stats(&self) -> Result<StoreStats> {
        let records: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))?;

        let oldest = self.edge_timestamp("ASC")?;
        let newest = self.edge_timestamp("DESC")?;

        Ok(StoreStats {
            records: records as usize,
            oldest,
            newest,
        })
    }

    fn edge_timestamp(&self, order: &str) -> Result<Option<DateTime<FixedOffset>>> {
        let sql = format!(
            "SELECT received_at FROM messages ORDER BY received_ts {} LIMIT 1",
            order
        );
        let raw: Option<String> = self
            .conn
            .query_row(&sql, [], |row| row.get(0))
            .optional()?;
        raw.map(|s| parse_timestamp(&s)).transpose()
    }

    /// Release the underlying connection
    pub fn close(self) -> Result<()> {
        let path = self.path.clone();
        self.conn.close().map_err(|(_, e)| SearchError::from(e))?;
        info!("Closed metadata store {:?}", path);
        Ok(())
    }
}

fn side_file(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

fn parse_timestamp(raw: &str) -> Result<DateTime<FixedOffset>> {
    DateTime::parse_from_rfc3339(raw)
        .map_err(|e| SearchError::StoreCorrupt(format!("bad timestamp '{}': {}", raw, e)))
}

// Outer Result is SQLite's, inner one flags rows we cannot interpret
fn record_from_row(row: &Row<'_>) -> rusqlite::Result<Result<MessageRecord>> {
    let received_at: String = row.get(3)?;
    let received_at = match parse_timestamp(&received_at) {
        Ok(ts) => ts,
        Err(e) => return Ok(Err(e)),
    };

    Ok(Ok(MessageRecord {
        message_id: row.get(0)?,
        subject: row.get(1)?,
        sender: row.get(2)?,
        received_at,
        web_link: row.get(4)?,
    }))
}
