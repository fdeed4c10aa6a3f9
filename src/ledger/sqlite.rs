//! SQLite copy of ledger entries and records.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension};

use super::{LedgerEntry, LedgerError, LedgerResult};
use crate::models::{StructuredRecord, TaskId};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS ledger_entries (
    task_id      TEXT PRIMARY KEY NOT NULL,
    status       TEXT NOT NULL,
    reason       TEXT,
    last_error   TEXT,
    dispatches   INTEGER NOT NULL DEFAULT 0,
    updated_at   TEXT NOT NULL,
    completed_at TEXT
);
CREATE TABLE IF NOT EXISTS records (
    task_id     TEXT PRIMARY KEY NOT NULL,
    record_json TEXT NOT NULL
);
";

pub struct SqliteMirror {
    conn: Mutex<Connection>,
}

impl SqliteMirror {
    pub fn open(path: &Path) -> LedgerResult<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| LedgerError::io(parent, e))?;
        }
        Self::from_connection(Connection::open(path)?)
    }

    pub fn in_memory() -> LedgerResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> LedgerResult<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> rusqlite::Result<T>) -> LedgerResult<T> {
        // A panic while holding the lock leaves the connection usable.
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        Ok(f(&conn)?)
    }

    pub fn upsert_entry(&self, entry: &LedgerEntry) -> LedgerResult<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO ledger_entries
                    (task_id, status, reason, last_error, dispatches, updated_at, completed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(task_id) DO UPDATE SET
                    status = excluded.status,
                    reason = excluded.reason,
                    last_error = excluded.last_error,
                    dispatches = excluded.dispatches,
                    updated_at = excluded.updated_at,
                    completed_at = excluded.completed_at",
                params![
                    entry.task_id.as_str(),
                    entry.status.as_str(),
                    entry.reason,
                    entry.last_error,
                    entry.dispatches,
                    entry.updated_at.to_rfc3339(),
                    entry.completed_at.map(|t| t.to_rfc3339()),
                ],
            )
            .map(|_| ())
        })
    }

    pub fn upsert_record(&self, id: &TaskId, record: &StructuredRecord) -> LedgerResult<()> {
        let json = serde_json::to_string(record)?;
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO records (task_id, record_json) VALUES (?1, ?2)
                 ON CONFLICT(task_id) DO UPDATE SET record_json = excluded.record_json",
                params![id.as_str(), json],
            )
            .map(|_| ())
        })
    }

    pub fn status(&self, id: &TaskId) -> LedgerResult<Option<String>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT status FROM ledger_entries WHERE task_id = ?1",
                params![id.as_str()],
                |row| row.get(0),
            )
            .optional()
        })
    }

    pub fn record_count(&self) -> LedgerResult<usize> {
        self.with_conn(|conn| {
            conn.query_row("SELECT COUNT(*) FROM records", [], |row| row.get::<_, i64>(0))
                .map(|n| n as usize)
        })
    }
}
