//! Resume ledger: which tasks are finished, and their records.
//!
//! An entry is created `pending` when a task is dispatched and moves to a
//! terminal status once. `completed` is final; `failed` entries are picked
//! up again by the next run.

mod file;
mod memory;
mod mirror;
mod sqlite;

pub use file::FileLedger;
pub use memory::MemoryLedger;
pub use mirror::MirroredLedger;
pub use sqlite::SqliteMirror;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::Config;
use crate::models::{StructuredRecord, TaskId};

/// `reason` stored on completed entries that have no record.
pub const NO_DATA_REASON: &str = "no_data";

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("ledger I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("ledger serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("ledger database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("task {0} is already completed")]
    AlreadyCompleted(TaskId),
}

impl LedgerError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        LedgerError::Io {
            path: path.into(),
            source,
        }
    }
}

pub type LedgerResult<T> = Result<T, LedgerError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    Pending,
    Completed,
    Failed,
}

impl EntryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryStatus::Pending => "pending",
            EntryStatus::Completed => "completed",
            EntryStatus::Failed => "failed",
        }
    }
}

/// Ledger state of one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub task_id: TaskId,
    pub status: EntryStatus,
    /// `no_data`, `no_surveys`, `survey_not_found` on record-less completions;
    /// the failure class on failed entries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Where the record payload lives, relative to the ledger.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Number of times the task was dispatched across runs.
    #[serde(default)]
    pub dispatches: u32,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl LedgerEntry {
    fn pending(task_id: TaskId) -> Self {
        Self {
            task_id,
            status: EntryStatus::Pending,
            reason: None,
            result_ref: None,
            last_error: None,
            dispatches: 0,
            updated_at: Utc::now(),
            completed_at: None,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.status == EntryStatus::Completed
    }

    /// Completed without a record.
    pub fn is_no_data(&self) -> bool {
        self.is_complete() && self.result_ref.is_none()
    }
}

/// Counts by status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LedgerSummary {
    pub completed: usize,
    pub no_data: usize,
    pub failed: usize,
    pub pending: usize,
}

impl LedgerSummary {
    pub fn total(&self) -> usize {
        self.completed + self.no_data + self.failed + self.pending
    }
}

/// How a finished task is recorded.
#[derive(Debug, Clone, Copy)]
pub enum Completion<'a> {
    Record(&'a StructuredRecord),
    NoData(&'a str),
    Failed { reason: &'a str, error: &'a str },
}

/// Task-level resume storage. Implementations serialize their writes and
/// are shared by every worker.
#[async_trait]
pub trait Ledger: Send + Sync {
    async fn is_complete(&self, id: &TaskId) -> LedgerResult<bool>;

    /// Create or refresh the `pending` entry for a task about to run.
    async fn mark_dispatched(&self, id: &TaskId) -> LedgerResult<()>;

    async fn save(&self, id: &TaskId, record: &StructuredRecord) -> LedgerResult<()>;

    async fn mark_no_data(&self, id: &TaskId, reason: &str) -> LedgerResult<()>;

    async fn mark_failed(&self, id: &TaskId, reason: &str, error: &str) -> LedgerResult<()>;

    async fn entry(&self, id: &TaskId) -> LedgerResult<Option<LedgerEntry>>;

    async fn entries(&self) -> LedgerResult<Vec<LedgerEntry>>;

    async fn summary(&self) -> LedgerResult<LedgerSummary> {
        Ok(summarize(&self.entries().await?))
    }

    /// Record payload of a completed task, when it has one.
    async fn record(&self, id: &TaskId) -> LedgerResult<Option<StructuredRecord>>;

    async fn complete(&self, id: &TaskId, completion: Completion<'_>) -> LedgerResult<()> {
        match completion {
            Completion::Record(record) => self.save(id, record).await,
            Completion::NoData(reason) => self.mark_no_data(id, reason).await,
            Completion::Failed { reason, error } => self.mark_failed(id, reason, error).await,
        }
    }
}

pub fn summarize(entries: &[LedgerEntry]) -> LedgerSummary {
    let mut summary = LedgerSummary::default();
    for entry in entries {
        match entry.status {
            EntryStatus::Completed if entry.result_ref.is_none() => summary.no_data += 1,
            EntryStatus::Completed => summary.completed += 1,
            EntryStatus::Failed => summary.failed += 1,
            EntryStatus::Pending => summary.pending += 1,
        }
    }
    summary
}

/// In-memory entry table shared by the file and memory ledgers.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub(crate) struct EntryIndex {
    #[serde(default)]
    entries: BTreeMap<TaskId, LedgerEntry>,
}

impl EntryIndex {
    pub(crate) fn get(&self, id: &TaskId) -> Option<&LedgerEntry> {
        self.entries.get(id)
    }

    pub(crate) fn is_complete(&self, id: &TaskId) -> bool {
        self.get(id).is_some_and(LedgerEntry::is_complete)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn values(&self) -> Vec<LedgerEntry> {
        self.entries.values().cloned().collect()
    }

    fn open_entry(&mut self, id: &TaskId) -> LedgerResult<&mut LedgerEntry> {
        if self.is_complete(id) {
            return Err(LedgerError::AlreadyCompleted(id.clone()));
        }
        Ok(self
            .entries
            .entry(id.clone())
            .or_insert_with(|| LedgerEntry::pending(id.clone())))
    }

    pub(crate) fn dispatch(&mut self, id: &TaskId) -> LedgerResult<&LedgerEntry> {
        let entry = self.open_entry(id)?;
        entry.status = EntryStatus::Pending;
        entry.dispatches += 1;
        entry.updated_at = Utc::now();
        Ok(entry)
    }

    pub(crate) fn complete(
        &mut self,
        id: &TaskId,
        result_ref: Option<String>,
        reason: Option<&str>,
    ) -> LedgerResult<&LedgerEntry> {
        let entry = self.open_entry(id)?;
        let now = Utc::now();
        entry.status = EntryStatus::Completed;
        entry.result_ref = result_ref;
        entry.reason = reason.map(str::to_string);
        entry.updated_at = now;
        entry.completed_at = Some(now);
        Ok(entry)
    }

    pub(crate) fn fail(&mut self, id: &TaskId, reason: &str, error: &str) -> LedgerResult<&LedgerEntry> {
        let entry = self.open_entry(id)?;
        entry.status = EntryStatus::Failed;
        entry.reason = Some(reason.to_string());
        entry.last_error = Some(error.to_string());
        entry.updated_at = Utc::now();
        Ok(entry)
    }

    /// Mark a task complete whose record was found without an entry.
    pub(crate) fn adopt(&mut self, id: TaskId, result_ref: String) -> bool {
        if self.is_complete(&id) {
            return false;
        }
        let now = Utc::now();
        let entry = self
            .entries
            .entry(id.clone())
            .or_insert_with(|| LedgerEntry::pending(id));
        entry.status = EntryStatus::Completed;
        entry.result_ref = Some(result_ref);
        entry.reason = None;
        entry.updated_at = now;
        entry.completed_at = Some(now);
        true
    }
}

/// Open the ledger described by `config`: the file ledger under the
/// ledger directory, mirrored to SQLite when a mirror path is set.
pub async fn open(config: &Config) -> LedgerResult<Arc<dyn Ledger>> {
    let file = FileLedger::open(config.ledger_dir()).await?;
    match &config.ledger.sqlite_mirror {
        Some(path) => {
            let mirror = SqliteMirror::open(path)?;
            Ok(Arc::new(MirroredLedger::new(file, mirror)))
        }
        None => Ok(Arc::new(file)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> TaskId {
        TaskId::from_raw(s)
    }

    #[test]
    fn completed_entries_are_final() {
        let mut index = EntryIndex::default();
        index.dispatch(&id("a")).unwrap();
        index.complete(&id("a"), Some("records/a.json".into()), None).unwrap();

        assert!(matches!(
            index.fail(&id("a"), "navigation", "boom"),
            Err(LedgerError::AlreadyCompleted(_))
        ));
        assert!(matches!(
            index.dispatch(&id("a")),
            Err(LedgerError::AlreadyCompleted(_))
        ));
        assert!(!index.adopt(id("a"), "records/a.json".into()));
    }

    #[test]
    fn failed_entries_can_run_again() {
        let mut index = EntryIndex::default();
        index.dispatch(&id("a")).unwrap();
        index.fail(&id("a"), "captcha_exhausted", "3 attempt(s)").unwrap();
        let entry = index.dispatch(&id("a")).unwrap();
        assert_eq!(entry.status, EntryStatus::Pending);
        assert_eq!(entry.dispatches, 2);
        assert_eq!(entry.last_error.as_deref(), Some("3 attempt(s)"));
    }

    #[test]
    fn summary_separates_no_data() {
        let mut index = EntryIndex::default();
        index.complete(&id("a"), Some("records/a.json".into()), None).unwrap();
        index.complete(&id("b"), None, Some(NO_DATA_REASON)).unwrap();
        index.fail(&id("c"), "navigation", "timeout").unwrap();
        index.dispatch(&id("d")).unwrap();

        let summary = summarize(&index.values());
        assert_eq!(
            summary,
            LedgerSummary {
                completed: 1,
                no_data: 1,
                failed: 1,
                pending: 1
            }
        );
        assert_eq!(summary.total(), 4);
    }

    #[test]
    fn entry_serializes_status_lowercase() {
        let mut index = EntryIndex::default();
        let entry = index.complete(&id("a"), None, Some("no_surveys")).unwrap();
        let json = serde_json::to_value(entry).unwrap();
        assert_eq!(json["status"], "completed");
        assert_eq!(json["reason"], "no_surveys");
        assert!(json.get("result_ref").is_none());
    }
}
