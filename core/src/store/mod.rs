//! Persistence adapter: SQLite document store.
//!
//! RULE: Only the store module talks to the database.
//! The orchestrator and audit log call store methods; they never execute
//! SQL directly.
//!
//! CONSISTENCY BOUNDARY:
//!   - `commit` runs its ops in one transaction, so one player's field
//!     writes and sub-record rows land together or not at all.
//!   - `batch_commit` chunks ops and commits chunks sequentially. A failed
//!     chunk never rolls back chunks already committed; callers reconcile
//!     through the audit log.
//!   - `batch_commit_rows` never splits a row across chunks, so every row
//!     is either committed whole or not at all.

use crate::{
    audit::AuditEntry,
    config::StoreConfig,
    error::PersistenceError,
    field::{Field, FieldValue},
    record::{DerivedValue, PlayerRecord},
    types::{PlayerId, Timestamp},
    update::SubCollection,
};
use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, time::Duration};

mod audit;
mod player;
mod sub_record;

/// Field-level merge applied to one player document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldPatch {
    pub source:     Vec<(Field, FieldValue)>,
    pub derived:    Vec<(Field, DerivedValue)>,
    pub updated_at: Timestamp,
}

impl FieldPatch {
    pub fn is_empty(&self) -> bool {
        self.source.is_empty() && self.derived.is_empty()
    }
}

/// A row in a player's sub-collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubRecord {
    pub id:          Option<i64>,
    pub collection:  SubCollection,
    pub actor:       String,
    pub recorded_at: Timestamp,
    pub payload:     serde_json::Value,
}

/// One write against the store.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreOp {
    InsertPlayer(PlayerRecord),
    UpsertFields {
        player_id:        PlayerId,
        patch:            FieldPatch,
        /// Reject with a Conflict when the stored version differs.
        expected_version: Option<u64>,
    },
    AppendSubRecord {
        player_id: PlayerId,
        record:    SubRecord,
    },
}

impl StoreOp {
    pub fn player_id(&self) -> &str {
        match self {
            StoreOp::InsertPlayer(r)                 => &r.player_id,
            StoreOp::UpsertFields { player_id, .. }    => player_id,
            StoreOp::AppendSubRecord { player_id, .. } => player_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkOutcome {
    pub index:    usize,
    pub first_op: usize,
    pub op_count: usize,
    pub error:    Option<PersistenceError>,
}

impl ChunkOutcome {
    pub fn committed(&self) -> bool {
        self.error.is_none()
    }

    fn contains(&self, op_index: usize) -> bool {
        op_index >= self.first_op && op_index < self.first_op + self.op_count
    }
}

/// Per-chunk result of a [`PlayerStore::batch_commit`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchReport {
    pub chunks: Vec<ChunkOutcome>,
}

impl BatchReport {
    pub fn chunk_for(&self, op_index: usize) -> Option<&ChunkOutcome> {
        self.chunks.iter().find(|c| c.contains(op_index))
    }

    pub fn committed(&self, op_index: usize) -> bool {
        self.chunk_for(op_index).is_some_and(ChunkOutcome::committed)
    }

    pub fn failed_chunks(&self) -> usize {
        self.chunks.iter().filter(|c| !c.committed()).count()
    }
}

/// Aggregate audit counts for one player.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuditTotals {
    /// Distinct update ids.
    pub updates:           usize,
    pub field_changes:     usize,
    /// Distinct update ids per audit source.
    pub updates_by_source: BTreeMap<String, usize>,
}

/// The document-store contract the engine depends on.
pub trait PlayerStore: Send + Sync {
    fn load_player(&self, player_id: &str) -> Result<Option<PlayerRecord>, PersistenceError>;

    fn list_players(&self) -> Result<Vec<PlayerId>, PersistenceError>;

    /// Apply `ops` in a single transaction.
    fn commit(&self, ops: &[StoreOp]) -> Result<(), PersistenceError>;

    /// Most recent rows first.
    fn sub_records(
        &self,
        player_id:  &str,
        collection: SubCollection,
        limit:      usize,
    ) -> Result<Vec<SubRecord>, PersistenceError>;

    fn append_audit(&self, entries: &[AuditEntry]) -> Result<(), PersistenceError>;

    /// Most recent entries first.
    fn audit_history(&self, player_id: &str, limit: usize) -> Result<Vec<AuditEntry>, PersistenceError>;

    /// Whole-ledger counts for one player, independent of any history limit.
    fn audit_totals(&self, player_id: &str) -> Result<AuditTotals, PersistenceError>;

    fn max_batch_size(&self) -> usize;

    fn insert_player(&self, record: &PlayerRecord) -> Result<(), PersistenceError> {
        self.commit(&[StoreOp::InsertPlayer(record.clone())])
    }

    /// Merge field changes into one player document, all-or-nothing.
    fn upsert_fields(
        &self,
        player_id:        &str,
        patch:            FieldPatch,
        expected_version: Option<u64>,
    ) -> Result<(), PersistenceError> {
        self.commit(&[StoreOp::UpsertFields {
            player_id: player_id.to_string(),
            patch,
            expected_version,
        }])
    }

    fn append_sub_record(&self, player_id: &str, record: SubRecord) -> Result<(), PersistenceError> {
        self.commit(&[StoreOp::AppendSubRecord { player_id: player_id.to_string(), record }])
    }

    /// Commit `ops` in chunks of at most `max_batch_size`, sequentially.
    /// Later chunks are still attempted after a failure.
    fn batch_commit(&self, ops: &[StoreOp]) -> BatchReport {
        let rows: Vec<&[StoreOp]> = ops.chunks(1).collect();
        self.batch_commit_rows(&rows)
    }

    /// Like [`batch_commit`](Self::batch_commit), but a row's ops always land
    /// in the same chunk. Chunks are cut only between rows; a row larger than
    /// `max_batch_size` gets a chunk of its own. Op indices in the report
    /// refer to the rows' ops concatenated in order.
    fn batch_commit_rows(&self, rows: &[&[StoreOp]]) -> BatchReport {
        let size = self.max_batch_size().max(1);
        let mut report = BatchReport::default();
        let mut pending: Vec<StoreOp> = Vec::new();
        let mut first_op = 0;
        for row in rows {
            if !pending.is_empty() && pending.len() + row.len() > size {
                first_op += commit_chunk(self, &mut report, first_op, &pending);
                pending.clear();
            }
            pending.extend(row.iter().cloned());
        }
        if !pending.is_empty() {
            commit_chunk(self, &mut report, first_op, &pending);
        }
        report
    }
}

/// Commit one chunk and record its outcome. Returns the chunk's op count.
fn commit_chunk<S: PlayerStore + ?Sized>(
    store:    &S,
    report:   &mut BatchReport,
    first_op: usize,
    chunk:    &[StoreOp],
) -> usize {
    let index = report.chunks.len();
    let error = store.commit(chunk).err();
    if let Some(e) = &error {
        log::warn!(
            "batch chunk {index} ({} ops) failed: {e}{}",
            chunk.len(),
            if e.is_retryable() { " (retryable)" } else { "" }
        );
    }
    report.chunks.push(ChunkOutcome { index, first_op, op_count: chunk.len(), error });
    chunk.len()
}

pub struct SqliteStore {
    conn:   Mutex<Connection>,
    path:   Option<String>, // None for :memory:, Some(path) for file
    config: StoreConfig,
}

impl SqliteStore {
    pub fn open(path: &str, config: StoreConfig) -> Result<Self, PersistenceError> {
        let conn = Connection::open_with_flags(
            path,
            rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
                | rusqlite::OpenFlags::SQLITE_OPEN_URI,
        )?;
        // WAL mode only for real files (shared-memory and :memory: ignore it).
        let _ = conn.execute_batch("PRAGMA journal_mode=WAL;");
        Self::configure(conn, Some(path.to_string()), config)
    }

    /// Open an in-memory database (used in tests).
    pub fn in_memory(config: StoreConfig) -> Result<Self, PersistenceError> {
        let conn = Connection::open_in_memory()?;
        Self::configure(conn, None, config)
    }

    fn configure(
        conn:   Connection,
        path:   Option<String>,
        config: StoreConfig,
    ) -> Result<Self, PersistenceError> {
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        conn.busy_timeout(Duration::from_millis(config.busy_timeout_ms))?;
        Ok(Self { conn: Mutex::new(conn), path, config })
    }

    /// Reopen a new connection to the same database.
    /// For in-memory databases, this returns a new in-memory database (isolated).
    pub fn reopen(&self) -> Result<Self, PersistenceError> {
        match &self.path {
            Some(p) => Self::open(p, self.config.clone()),
            None => Self::in_memory(self.config.clone()),
        }
    }

    /// Apply all schema migrations in order.
    pub fn migrate(&self) -> Result<(), PersistenceError> {
        let conn = self.conn.lock();
        conn.execute_batch(include_str!("../../../migrations/001_players.sql"))?;
        conn.execute_batch(include_str!("../../../migrations/002_audit.sql"))?;
        Ok(())
    }

    pub fn sub_record_count(&self, player_id: &str) -> Result<i64, PersistenceError> {
        sub_record::count(&self.conn.lock(), player_id)
    }

    pub fn audit_count(&self, player_id: &str) -> Result<i64, PersistenceError> {
        audit::count(&self.conn.lock(), player_id)
    }
}

impl PlayerStore for SqliteStore {
    fn load_player(&self, player_id: &str) -> Result<Option<PlayerRecord>, PersistenceError> {
        player::load(&self.conn.lock(), player_id)
    }

    fn list_players(&self) -> Result<Vec<PlayerId>, PersistenceError> {
        player::list(&self.conn.lock())
    }

    fn commit(&self, ops: &[StoreOp]) -> Result<(), PersistenceError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        for op in ops {
            match op {
                StoreOp::InsertPlayer(record) => player::insert(&tx, record)?,
                StoreOp::UpsertFields { player_id, patch, expected_version } => {
                    player::upsert_fields(&tx, player_id, patch, *expected_version)?
                }
                StoreOp::AppendSubRecord { player_id, record } => {
                    sub_record::append(&tx, player_id, record)?
                }
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn sub_records(
        &self,
        player_id:  &str,
        collection: SubCollection,
        limit:      usize,
    ) -> Result<Vec<SubRecord>, PersistenceError> {
        sub_record::list(&self.conn.lock(), player_id, collection, limit)
    }

    fn append_audit(&self, entries: &[AuditEntry]) -> Result<(), PersistenceError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        for entry in entries {
            audit::insert(&tx, entry)?;
        }
        tx.commit()?;
        Ok(())
    }

    fn audit_history(&self, player_id: &str, limit: usize) -> Result<Vec<AuditEntry>, PersistenceError> {
        audit::history(&self.conn.lock(), player_id, limit)
    }

    fn audit_totals(&self, player_id: &str) -> Result<AuditTotals, PersistenceError> {
        audit::totals(&self.conn.lock(), player_id)
    }

    fn max_batch_size(&self) -> usize {
        self.config.max_batch_size
    }
}

// ── Column encoding helpers ────────────────────────────────────────────

pub(crate) fn ts_to_sql(ts: &Timestamp) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

pub(crate) fn ts_from_sql(col: usize, raw: String) -> rusqlite::Result<Timestamp> {
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(col, rusqlite::types::Type::Text, Box::new(e))
        })
}

pub(crate) fn json_from_sql<T: serde::de::DeserializeOwned>(
    col: usize,
    raw: &str,
) -> rusqlite::Result<T> {
    serde_json::from_str(raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(col, rusqlite::types::Type::Text, Box::new(e))
    })
}
