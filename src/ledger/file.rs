//! File-backed ledger: `ledger.json` plus one `records/<task_id>.json` per
//! completed task.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{EntryIndex, Ledger, LedgerEntry, LedgerError, LedgerResult};
use crate::models::{StructuredRecord, TaskId};

const INDEX_FILE: &str = "ledger.json";
const RECORDS_DIR: &str = "records";

/// Write `bytes` to a sibling temp file, then rename over `path`.
pub(crate) async fn write_atomic(path: &Path, bytes: &[u8]) -> LedgerResult<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    tokio::fs::write(&tmp, bytes)
        .await
        .map_err(|e| LedgerError::io(&tmp, e))?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| LedgerError::io(path, e))
}

pub struct FileLedger {
    dir: PathBuf,
    index: Mutex<EntryIndex>,
}

impl FileLedger {
    /// Open (or create) a ledger directory. Record files without a
    /// completed index entry are adopted.
    pub async fn open(dir: impl Into<PathBuf>) -> LedgerResult<Self> {
        let dir = dir.into();
        let records = dir.join(RECORDS_DIR);
        tokio::fs::create_dir_all(&records)
            .await
            .map_err(|e| LedgerError::io(&records, e))?;

        let index_path = dir.join(INDEX_FILE);
        let mut index = match tokio::fs::read(&index_path).await {
            Ok(bytes) => serde_json::from_slice::<EntryIndex>(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => EntryIndex::default(),
            Err(e) => return Err(LedgerError::io(&index_path, e)),
        };

        let adopted = adopt_orphans(&records, &mut index).await?;
        let ledger = Self {
            dir,
            index: Mutex::new(index),
        };
        if adopted > 0 {
            warn!("Adopted {} record(s) missing from the ledger index", adopted);
            let index = ledger.index.lock().await;
            ledger.persist(&index).await?;
        }
        debug!(
            "Opened ledger at {} ({} entries)",
            ledger.dir.display(),
            ledger.index.lock().await.len()
        );
        Ok(ledger)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_ref(id: &TaskId) -> String {
        format!("{}/{}.json", RECORDS_DIR, id.as_str())
    }

    async fn persist(&self, index: &EntryIndex) -> LedgerResult<()> {
        let bytes = serde_json::to_vec_pretty(index)?;
        write_atomic(&self.dir.join(INDEX_FILE), &bytes).await
    }

    /// Apply `change` to a copy of the index; the copy replaces `index`
    /// only once it is on disk.
    async fn commit<F>(&self, index: &mut EntryIndex, change: F) -> LedgerResult<()>
    where
        F: FnOnce(&mut EntryIndex) -> LedgerResult<()>,
    {
        let mut next = index.clone();
        change(&mut next)?;
        self.persist(&next).await?;
        *index = next;
        Ok(())
    }
}

async fn adopt_orphans(records: &Path, index: &mut EntryIndex) -> LedgerResult<usize> {
    let mut dir = tokio::fs::read_dir(records)
        .await
        .map_err(|e| LedgerError::io(records, e))?;
    let mut adopted = 0;
    while let Some(item) = dir
        .next_entry()
        .await
        .map_err(|e| LedgerError::io(records, e))?
    {
        let path = item.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        let id = TaskId::from_raw(stem);
        if index.adopt(id.clone(), FileLedger::record_ref(&id)) {
            adopted += 1;
        }
    }
    Ok(adopted)
}

#[async_trait]
impl Ledger for FileLedger {
    async fn is_complete(&self, id: &TaskId) -> LedgerResult<bool> {
        Ok(self.index.lock().await.is_complete(id))
    }

    async fn mark_dispatched(&self, id: &TaskId) -> LedgerResult<()> {
        let mut index = self.index.lock().await;
        self.commit(&mut index, |next| next.dispatch(id).map(|_| ()))
            .await
    }

    async fn save(&self, id: &TaskId, record: &StructuredRecord) -> LedgerResult<()> {
        let mut index = self.index.lock().await;
        if index.is_complete(id) {
            return Err(LedgerError::AlreadyCompleted(id.clone()));
        }
        // Payload first: a crash before the index write is recovered by
        // adoption at the next open.
        let result_ref = Self::record_ref(id);
        let bytes = serde_json::to_vec_pretty(record)?;
        write_atomic(&self.dir.join(&result_ref), &bytes).await?;

        self.commit(&mut index, |next| {
            next.complete(id, Some(result_ref), None).map(|_| ())
        })
        .await?;
        info!("Saved record for {}", id);
        Ok(())
    }

    async fn mark_no_data(&self, id: &TaskId, reason: &str) -> LedgerResult<()> {
        let mut index = self.index.lock().await;
        self.commit(&mut index, |next| next.complete(id, None, Some(reason)).map(|_| ()))
            .await
    }

    async fn mark_failed(&self, id: &TaskId, reason: &str, error: &str) -> LedgerResult<()> {
        let mut index = self.index.lock().await;
        self.commit(&mut index, |next| next.fail(id, reason, error).map(|_| ()))
            .await
    }

    async fn entry(&self, id: &TaskId) -> LedgerResult<Option<LedgerEntry>> {
        Ok(self.index.lock().await.get(id).cloned())
    }

    async fn entries(&self) -> LedgerResult<Vec<LedgerEntry>> {
        Ok(self.index.lock().await.values())
    }

    async fn record(&self, id: &TaskId) -> LedgerResult<Option<StructuredRecord>> {
        let result_ref = match self.index.lock().await.get(id) {
            Some(entry) if entry.is_complete() => entry.result_ref.clone(),
            _ => None,
        };
        let Some(result_ref) = result_ref else {
            return Ok(None);
        };
        let path = self.dir.join(result_ref);
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| LedgerError::io(&path, e))?;
        Ok(Some(serde_json::from_slice(&bytes)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::RecordExtractor;
    use crate::ledger::{EntryStatus, NO_DATA_REASON};
    use crate::models::{RawHarvest, SelectedLocation};
    use tempfile::TempDir;

    fn record(id: &str) -> StructuredRecord {
        let harvest = RawHarvest::new(TaskId::from_raw(id), SelectedLocation::default());
        RecordExtractor::default().extract(&harvest)
    }

    #[tokio::test]
    async fn survives_reopen() {
        let tmp = TempDir::new().unwrap();
        let a = TaskId::from_raw("02_07_001");
        let b = TaskId::from_raw("02_07_002");
        {
            let ledger = FileLedger::open(tmp.path()).await.unwrap();
            ledger.mark_dispatched(&a).await.unwrap();
            ledger.save(&a, &record("02_07_001")).await.unwrap();
            ledger.mark_no_data(&b, NO_DATA_REASON).await.unwrap();
        }

        let ledger = FileLedger::open(tmp.path()).await.unwrap();
        assert!(ledger.is_complete(&a).await.unwrap());
        assert!(ledger.is_complete(&b).await.unwrap());
        assert!(tmp.path().join("records/02_07_001.json").is_file());
        assert!(!tmp.path().join("ledger.json.tmp").exists());

        let stored = ledger.record(&a).await.unwrap().unwrap();
        assert_eq!(stored.meta.task_id.as_str(), "02_07_001");
        assert!(ledger.record(&b).await.unwrap().is_none());

        let summary = ledger.summary().await.unwrap();
        assert_eq!((summary.completed, summary.no_data), (1, 1));
    }

    #[tokio::test]
    async fn refuses_to_rewrite_completed_task() {
        let tmp = TempDir::new().unwrap();
        let ledger = FileLedger::open(tmp.path()).await.unwrap();
        let id = TaskId::from_raw("a");
        ledger.save(&id, &record("a")).await.unwrap();

        let again = ledger.save(&id, &record("a")).await;
        assert!(matches!(again, Err(LedgerError::AlreadyCompleted(_))));
        let failed = ledger.mark_failed(&id, "navigation", "timeout").await;
        assert!(matches!(failed, Err(LedgerError::AlreadyCompleted(_))));
    }

    #[tokio::test]
    async fn adopts_orphan_records() {
        let tmp = TempDir::new().unwrap();
        let records = tmp.path().join("records");
        std::fs::create_dir_all(&records).unwrap();
        std::fs::write(
            records.join("02_07_009.json"),
            serde_json::to_vec(&record("02_07_009")).unwrap(),
        )
        .unwrap();
        std::fs::write(records.join("notes.txt"), "ignored").unwrap();

        let ledger = FileLedger::open(tmp.path()).await.unwrap();
        let id = TaskId::from_raw("02_07_009");
        let entry = ledger.entry(&id).await.unwrap().unwrap();
        assert_eq!(entry.status, EntryStatus::Completed);
        assert_eq!(entry.result_ref.as_deref(), Some("records/02_07_009.json"));
        assert_eq!(ledger.entries().await.unwrap().len(), 1);
        assert!(tmp.path().join("ledger.json").is_file());
    }

    #[tokio::test]
    async fn failed_entry_is_not_complete() {
        let tmp = TempDir::new().unwrap();
        let ledger = FileLedger::open(tmp.path()).await.unwrap();
        let id = TaskId::from_raw("a");
        ledger.mark_dispatched(&id).await.unwrap();
        ledger
            .mark_failed(&id, "captcha_exhausted", "3 attempt(s)")
            .await
            .unwrap();

        assert!(!ledger.is_complete(&id).await.unwrap());
        let entry = ledger.entry(&id).await.unwrap().unwrap();
        assert_eq!(entry.reason.as_deref(), Some("captcha_exhausted"));
    }

    #[tokio::test]
    async fn failed_index_write_leaves_memory_unchanged() {
        let tmp = TempDir::new().unwrap();
        let ledger = FileLedger::open(tmp.path()).await.unwrap();
        let id = TaskId::from_raw("02_07_001");
        ledger.mark_dispatched(&id).await.unwrap();

        // A directory in the temp file's place makes every index write fail.
        let blocker = tmp.path().join("ledger.json.tmp");
        std::fs::create_dir(&blocker).unwrap();

        let saved = ledger.save(&id, &record("02_07_001")).await;
        assert!(matches!(saved, Err(LedgerError::Io { .. })), "{:?}", saved);
        assert!(!ledger.is_complete(&id).await.unwrap());
        let entry = ledger.entry(&id).await.unwrap().unwrap();
        assert_eq!(entry.status, EntryStatus::Pending);
        assert_eq!(entry.dispatches, 1);

        assert!(ledger.mark_dispatched(&id).await.is_err());
        assert_eq!(ledger.entry(&id).await.unwrap().unwrap().dispatches, 1);

        // Once the disk recovers the task can still complete.
        std::fs::remove_dir(&blocker).unwrap();
        ledger.save(&id, &record("02_07_001")).await.unwrap();
        assert!(ledger.is_complete(&id).await.unwrap());
    }
}
