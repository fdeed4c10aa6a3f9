//! Ledger kept only in memory, for tests and throwaway runs.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{EntryIndex, Ledger, LedgerEntry, LedgerError, LedgerResult};
use crate::models::{StructuredRecord, TaskId};

#[derive(Default)]
struct Inner {
    index: EntryIndex,
    records: HashMap<TaskId, StructuredRecord>,
}

#[derive(Default)]
pub struct MemoryLedger {
    inner: Mutex<Inner>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// A ledger in which `ids` are already completed.
    pub async fn with_completed<'a>(ids: impl IntoIterator<Item = &'a TaskId>) -> Self {
        let ledger = Self::new();
        {
            let mut inner = ledger.inner.lock().await;
            for id in ids {
                inner.index.adopt(id.clone(), format!("memory:{}", id));
            }
        }
        ledger
    }
}

#[async_trait]
impl Ledger for MemoryLedger {
    async fn is_complete(&self, id: &TaskId) -> LedgerResult<bool> {
        Ok(self.inner.lock().await.index.is_complete(id))
    }

    async fn mark_dispatched(&self, id: &TaskId) -> LedgerResult<()> {
        self.inner.lock().await.index.dispatch(id)?;
        Ok(())
    }

    async fn save(&self, id: &TaskId, record: &StructuredRecord) -> LedgerResult<()> {
        let mut inner = self.inner.lock().await;
        if inner.index.is_complete(id) {
            return Err(LedgerError::AlreadyCompleted(id.clone()));
        }
        inner.index.complete(id, Some(format!("memory:{}", id)), None)?;
        inner.records.insert(id.clone(), record.clone());
        Ok(())
    }

    async fn mark_no_data(&self, id: &TaskId, reason: &str) -> LedgerResult<()> {
        self.inner.lock().await.index.complete(id, None, Some(reason))?;
        Ok(())
    }

    async fn mark_failed(&self, id: &TaskId, reason: &str, error: &str) -> LedgerResult<()> {
        self.inner.lock().await.index.fail(id, reason, error)?;
        Ok(())
    }

    async fn entry(&self, id: &TaskId) -> LedgerResult<Option<LedgerEntry>> {
        Ok(self.inner.lock().await.index.get(id).cloned())
    }

    async fn entries(&self) -> LedgerResult<Vec<LedgerEntry>> {
        Ok(self.inner.lock().await.index.values())
    }

    async fn record(&self, id: &TaskId) -> LedgerResult<Option<StructuredRecord>> {
        Ok(self.inner.lock().await.records.get(id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::Completion;

    #[tokio::test]
    async fn preloaded_tasks_are_complete() {
        let done = TaskId::from_raw("02_07_001");
        let ledger = MemoryLedger::with_completed([&done]).await;
        assert!(ledger.is_complete(&done).await.unwrap());
        assert!(!ledger.is_complete(&TaskId::from_raw("x")).await.unwrap());
        assert!(ledger.record(&done).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn completion_dispatches_by_kind() {
        let ledger = MemoryLedger::new();
        let id = TaskId::from_raw("a");
        ledger
            .complete(
                &id,
                Completion::Failed {
                    reason: "navigation",
                    error: "timed out",
                },
            )
            .await
            .unwrap();
        ledger.complete(&id, Completion::NoData("no_surveys")).await.unwrap();

        let entry = ledger.entry(&id).await.unwrap().unwrap();
        assert!(entry.is_no_data());
        assert_eq!(entry.reason.as_deref(), Some("no_surveys"));
        // The failure from the earlier run stays for the record.
        assert_eq!(entry.last_error.as_deref(), Some("timed out"));
    }
}
