//! Record store for unreleased tracks, plus the SQLite-backed lookup cache.
//!
//! The reconciler only needs keyed reads, range paging by id and
//! filter-by-equality, so any backing store can implement `RecordStore`.
//!
//! ## Schema
//!
//! ```sql
//! CREATE TABLE unreleased_tracks (
//!     id                    TEXT PRIMARY KEY,
//!     artist_name           TEXT NOT NULL,
//!     track_title           TEXT NOT NULL,
//!     is_unreleased         INTEGER NOT NULL,
//!     is_id                 INTEGER NOT NULL,
//!     external_catalog_data TEXT            -- JSON object or NULL
//! );
//! CREATE TABLE catalog_lookup_cache (
//!     lookup_key   TEXT PRIMARY KEY,        -- normalized artist|||title
//!     found        INTEGER NOT NULL,
//!     catalog_data TEXT,
//!     updated_at   INTEGER NOT NULL         -- unix seconds
//! );
//! ```

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use thiserror::Error;

use crate::cache::{CachedLookup, LookupCache};
use crate::models::{CatalogLookupCacheEntry, UnreleasedTrackRecord};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Record not found: {0}")]
    RecordNotFound(String),

    #[error("Invalid timestamp in cache entry {0}")]
    InvalidTimestamp(String),
}

/// Keyed store of unreleased-track records.
pub trait RecordStore {
    /// Records with `is_unreleased = true` and `is_id = false`.
    fn count_pending(&self) -> Result<usize, StoreError>;

    /// Next page of pending records with id greater than `after_id`, ordered by id.
    fn fetch_pending_page(
        &self,
        after_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<UnreleasedTrackRecord>, StoreError>;

    /// Persist a confirmed match: clear the unreleased flag and store the
    /// (already merged) catalog data.
    fn mark_released(&self, id: &str, catalog_data: &Value) -> Result<(), StoreError>;
}

fn is_pending(record: &UnreleasedTrackRecord) -> bool {
    record.is_unreleased && !record.is_id
}

// ============================================================================
// In-memory store
// ============================================================================

/// Ordered in-memory store used by tests.
#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<Vec<UnreleasedTrackRecord>>,
}

impl MemoryStore {
    pub fn new(mut records: Vec<UnreleasedTrackRecord>) -> Self {
        records.sort_by(|a, b| a.id.cmp(&b.id));
        Self {
            records: Mutex::new(records),
        }
    }

    pub fn get(&self, id: &str) -> Option<UnreleasedTrackRecord> {
        let records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        records.iter().find(|r| r.id == id).cloned()
    }
}

impl RecordStore for MemoryStore {
    fn count_pending(&self) -> Result<usize, StoreError> {
        let records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        Ok(records.iter().filter(|r| is_pending(r)).count())
    }

    fn fetch_pending_page(
        &self,
        after_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<UnreleasedTrackRecord>, StoreError> {
        let records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        Ok(records
            .iter()
            .filter(|r| is_pending(r))
            .filter(|r| after_id.map_or(true, |after| r.id.as_str() > after))
            .take(limit)
            .cloned()
            .collect())
    }

    fn mark_released(&self, id: &str, catalog_data: &Value) -> Result<(), StoreError> {
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        let record = records
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| StoreError::RecordNotFound(id.to_string()))?;
        record.is_unreleased = false;
        record.external_catalog_data = Some(catalog_data.clone());
        Ok(())
    }
}

// ============================================================================
// SQLite store
// ============================================================================

/// SQLite-backed record store and lookup cache sharing one connection.
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;

            CREATE TABLE IF NOT EXISTS unreleased_tracks (
                id TEXT PRIMARY KEY,
                artist_name TEXT NOT NULL,
                track_title TEXT NOT NULL,
                is_unreleased INTEGER NOT NULL DEFAULT 1,
                is_id INTEGER NOT NULL DEFAULT 0,
                external_catalog_data TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_unreleased_pending
                ON unreleased_tracks (is_unreleased, is_id, id);

            CREATE TABLE IF NOT EXISTS catalog_lookup_cache (
                lookup_key TEXT PRIMARY KEY,
                found INTEGER NOT NULL,
                catalog_data TEXT,
                updated_at INTEGER NOT NULL
            );",
        )?;
        Ok(Self { conn })
    }

    /// Insert or replace a record (used by imports and tests).
    pub fn upsert_record(&self, record: &UnreleasedTrackRecord) -> Result<(), StoreError> {
        let data = record
            .external_catalog_data
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        self.conn.execute(
            "INSERT INTO unreleased_tracks (id, artist_name, track_title, is_unreleased, is_id, external_catalog_data)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(id) DO UPDATE SET
                artist_name = excluded.artist_name,
                track_title = excluded.track_title,
                is_unreleased = excluded.is_unreleased,
                is_id = excluded.is_id,
                external_catalog_data = excluded.external_catalog_data",
            params![
                record.id,
                record.artist_name,
                record.track_title,
                record.is_unreleased,
                record.is_id,
                data
            ],
        )?;
        Ok(())
    }

    pub fn get_record(&self, id: &str) -> Result<Option<UnreleasedTrackRecord>, StoreError> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT id, artist_name, track_title, is_unreleased, is_id, external_catalog_data
             FROM unreleased_tracks WHERE id = ?1",
        )?;
        let row = stmt
            .query_row([id], |row| {
                Ok((
                    UnreleasedTrackRecord {
                        id: row.get(0)?,
                        artist_name: row.get(1)?,
                        track_title: row.get(2)?,
                        is_unreleased: row.get(3)?,
                        is_id: row.get(4)?,
                        external_catalog_data: None,
                    },
                    row.get::<_, Option<String>>(5)?,
                ))
            })
            .optional()?;
        row.map(|(record, data)| with_catalog_data(record, data))
            .transpose()
    }

    /// Raw cache row, including its timestamp.
    pub fn cache_entry(&self, key: &str) -> Result<Option<CatalogLookupCacheEntry>, StoreError> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT lookup_key, found, catalog_data, updated_at
             FROM catalog_lookup_cache WHERE lookup_key = ?1",
        )?;
        let row = stmt
            .query_row([key], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, bool>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, i64>(3)?,
                ))
            })
            .optional()?;

        let Some((lookup_key, found, data, updated_at)) = row else {
            return Ok(None);
        };
        let updated_at = DateTime::<Utc>::from_timestamp(updated_at, 0)
            .ok_or_else(|| StoreError::InvalidTimestamp(lookup_key.clone()))?;
        let catalog_data = data.map(|s| serde_json::from_str(&s)).transpose()?;
        Ok(Some(CatalogLookupCacheEntry {
            lookup_key,
            found,
            catalog_data,
            updated_at,
        }))
    }

    /// Write a cache row with an explicit timestamp.
    pub fn put_cache_entry(&self, entry: &CatalogLookupCacheEntry) -> Result<(), StoreError> {
        let data = entry
            .catalog_data
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        self.conn.execute(
            "INSERT INTO catalog_lookup_cache (lookup_key, found, catalog_data, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(lookup_key) DO UPDATE SET
                found = excluded.found,
                catalog_data = excluded.catalog_data,
                updated_at = excluded.updated_at",
            params![entry.lookup_key, entry.found, data, entry.updated_at.timestamp()],
        )?;
        Ok(())
    }
}

fn with_catalog_data(
    mut record: UnreleasedTrackRecord,
    data: Option<String>,
) -> Result<UnreleasedTrackRecord, StoreError> {
    record.external_catalog_data = data.map(|s| serde_json::from_str(&s)).transpose()?;
    Ok(record)
}

impl RecordStore for SqliteStore {
    fn count_pending(&self) -> Result<usize, StoreError> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM unreleased_tracks WHERE is_unreleased = 1 AND is_id = 0",
            [],
            |row| row.get(0),
        )?;
        Ok(count.max(0) as usize)
    }

    fn fetch_pending_page(
        &self,
        after_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<UnreleasedTrackRecord>, StoreError> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT id, artist_name, track_title, is_unreleased, is_id, external_catalog_data
             FROM unreleased_tracks
             WHERE is_unreleased = 1 AND is_id = 0 AND id > ?1
             ORDER BY id
             LIMIT ?2",
        )?;
        let mut rows = stmt.query(params![after_id.unwrap_or(""), limit as i64])?;

        let mut page = Vec::with_capacity(limit);
        while let Some(row) = rows.next()? {
            let record = UnreleasedTrackRecord {
                id: row.get(0)?,
                artist_name: row.get(1)?,
                track_title: row.get(2)?,
                is_unreleased: row.get(3)?,
                is_id: row.get(4)?,
                external_catalog_data: None,
            };
            page.push(with_catalog_data(record, row.get(5)?)?);
        }
        Ok(page)
    }

    fn mark_released(&self, id: &str, catalog_data: &Value) -> Result<(), StoreError> {
        let changed = self.conn.execute(
            "UPDATE unreleased_tracks
             SET is_unreleased = 0, external_catalog_data = ?2
             WHERE id = ?1",
            params![id, serde_json::to_string(catalog_data)?],
        )?;
        if changed == 0 {
            return Err(StoreError::RecordNotFound(id.to_string()));
        }
        Ok(())
    }
}

impl LookupCache for SqliteStore {
    fn get(&self, key: &str) -> Result<Option<CachedLookup>, StoreError> {
        let now = Utc::now();
        Ok(self
            .cache_entry(key)?
            .map(|e| CachedLookup::from_entry(&e, now)))
    }

    fn put(&self, key: &str, found: bool, data: Option<&Value>) -> Result<(), StoreError> {
        self.put_cache_entry(&CatalogLookupCacheEntry {
            lookup_key: key.to_string(),
            found,
            catalog_data: data.cloned(),
            updated_at: Utc::now(),
        })
    }
}
