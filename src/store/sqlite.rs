//! SQLite-backed call store.
//!
//! One `calls` table keyed by row id with a UNIQUE `uuid`. Timestamps are
//! stored as fixed-width RFC 3339 text so ordering by the column orders by
//! time.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, ErrorCode, OptionalExtension, Row, params};

use crate::error::StoreError;
use crate::store::records::{CallRecord, NewCall, format_timestamp, parse_timestamp};
use crate::store::traits::CallStore;

const SELECT_COLUMNS: &str = "id, uuid, direction, caller, callee, start_time, end_time, status, created_at";

/// Call store over a single SQLite connection.
///
/// `rusqlite::Connection` isn't Sync, so it sits behind a Mutex; statements
/// are short and need exclusive access anyway. Every statement runs on the
/// blocking pool so lock waits never stall runtime workers.
pub struct SqliteCallStore {
    db: Arc<Mutex<Connection>>,
}

impl std::fmt::Debug for SqliteCallStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteCallStore").finish_non_exhaustive()
    }
}

impl SqliteCallStore {
    /// Open or create the database file and ensure the schema.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        if let Some(parent) = path.as_ref().parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Corrupt(format!("cannot create {}: {}", parent.display(), e)))?;
        }
        let db = Connection::open(path)?;
        db.busy_timeout(Duration::from_secs(5))?;
        db.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))?;
        Self::from_connection(db)
    }

    /// Private in-memory database, mostly for tests.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(db: Connection) -> Result<Self, StoreError> {
        Self::init_schema(&db)?;
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
        })
    }

    /// Create the calls table if it doesn't exist.
    fn init_schema(db: &Connection) -> Result<(), StoreError> {
        db.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS calls (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                uuid TEXT UNIQUE NOT NULL,
                direction TEXT NOT NULL,
                caller TEXT NOT NULL,
                callee TEXT NOT NULL,
                start_time TEXT NOT NULL,
                end_time TEXT,
                status TEXT,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_calls_start ON calls(start_time);
            "#,
        )?;
        tracing::debug!("Database schema initialized (calls table ensured)");
        Ok(())
    }

    /// Run `f` against the connection on the blocking pool.
    async fn with_db<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || {
            let conn = db.lock().map_err(|_| StoreError::Poisoned)?;
            f(&conn)
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
    }

    fn row_to_record(row: &Row<'_>) -> rusqlite::Result<RawRow> {
        Ok(RawRow {
            id: row.get(0)?,
            uuid: row.get(1)?,
            direction: row.get(2)?,
            caller: row.get(3)?,
            callee: row.get(4)?,
            start_time: row.get(5)?,
            end_time: row.get(6)?,
            status: row.get(7)?,
            created_at: row.get(8)?,
        })
    }
}

/// Row as stored, before timestamp decoding.
struct RawRow {
    id: i64,
    uuid: String,
    direction: String,
    caller: String,
    callee: String,
    start_time: String,
    end_time: Option<String>,
    status: Option<String>,
    created_at: String,
}

impl RawRow {
    fn decode(self) -> Result<CallRecord, StoreError> {
        let ts = |raw: &str| {
            parse_timestamp(raw).map_err(|e| StoreError::Corrupt(format!("call {}: bad timestamp '{}': {}", self.uuid, raw, e)))
        };
        Ok(CallRecord {
            id: self.id,
            start_time: ts(&self.start_time)?,
            end_time: self.end_time.as_deref().map(ts).transpose()?,
            created_at: ts(&self.created_at)?,
            uuid: self.uuid.clone(),
            direction: self.direction,
            caller: self.caller,
            callee: self.callee,
            status: self.status,
        })
    }
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(err, rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation)
}

#[async_trait]
impl CallStore for SqliteCallStore {
    async fn create_call(&self, call: &NewCall) -> Result<i64, StoreError> {
        let call = call.clone();
        self.with_db(move |db| {
            let result = db.execute(
                r#"
                INSERT INTO calls (uuid, direction, caller, callee, start_time, created_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                "#,
                params![
                    call.uuid,
                    call.direction,
                    call.caller,
                    call.callee,
                    format_timestamp(&call.start_time),
                    format_timestamp(&Utc::now()),
                ],
            );

            match result {
                Ok(_) => {
                    let id = db.last_insert_rowid();
                    tracing::debug!(uuid = %call.uuid, id, "Call record created");
                    Ok(id)
                }
                Err(e) if is_unique_violation(&e) => Err(StoreError::Duplicate(call.uuid)),
                Err(e) => Err(e.into()),
            }
        })
        .await
    }

    async fn update_call_end(&self, uuid: &str, end_time: DateTime<Utc>, status: &str) -> Result<u64, StoreError> {
        let (uuid, status) = (uuid.to_string(), status.to_string());
        self.with_db(move |db| {
            let rows = db.execute(
                "UPDATE calls SET end_time = ?1, status = ?2 WHERE uuid = ?3",
                params![format_timestamp(&end_time), status, uuid],
            )?;
            Ok(rows as u64)
        })
        .await
    }

    async fn list_calls(&self, limit: u32, offset: u32) -> Result<Vec<CallRecord>, StoreError> {
        self.with_db(move |db| {
            let mut stmt = db.prepare(&format!(
                "SELECT {} FROM calls ORDER BY start_time DESC, id DESC LIMIT ?1 OFFSET ?2",
                SELECT_COLUMNS
            ))?;
            let rows = stmt
                .query_map(params![limit, offset], Self::row_to_record)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows.into_iter().map(RawRow::decode).collect()
        })
        .await
    }

    async fn get_call(&self, uuid: &str) -> Result<Option<CallRecord>, StoreError> {
        let uuid = uuid.to_string();
        self.with_db(move |db| {
            let row = db
                .query_row(
                    &format!("SELECT {} FROM calls WHERE uuid = ?1", SELECT_COLUMNS),
                    params![uuid],
                    Self::row_to_record,
                )
                .optional()?;
            row.map(RawRow::decode).transpose()
        })
        .await
    }
}
