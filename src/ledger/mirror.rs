//! A ledger whose writes are copied into SQLite.
//!
//! The primary ledger is authoritative. Mirror failures are logged and
//! never fail the write.

use async_trait::async_trait;
use tracing::warn;

use super::{Ledger, LedgerEntry, LedgerResult, SqliteMirror};
use crate::models::{StructuredRecord, TaskId};

pub struct MirroredLedger<L> {
    primary: L,
    mirror: SqliteMirror,
}

impl<L: Ledger> MirroredLedger<L> {
    pub fn new(primary: L, mirror: SqliteMirror) -> Self {
        Self { primary, mirror }
    }

    pub fn mirror(&self) -> &SqliteMirror {
        &self.mirror
    }

    async fn copy_entry(&self, id: &TaskId) {
        let entry = match self.primary.entry(id).await {
            Ok(Some(entry)) => entry,
            Ok(None) => return,
            Err(e) => {
                warn!("Could not read {} for mirroring: {}", id, e);
                return;
            }
        };
        if let Err(e) = self.mirror.upsert_entry(&entry) {
            warn!("SQLite mirror write failed for {}: {}", id, e);
        }
    }
}

#[async_trait]
impl<L: Ledger> Ledger for MirroredLedger<L> {
    async fn is_complete(&self, id: &TaskId) -> LedgerResult<bool> {
        self.primary.is_complete(id).await
    }

    async fn mark_dispatched(&self, id: &TaskId) -> LedgerResult<()> {
        self.primary.mark_dispatched(id).await?;
        self.copy_entry(id).await;
        Ok(())
    }

    async fn save(&self, id: &TaskId, record: &StructuredRecord) -> LedgerResult<()> {
        self.primary.save(id, record).await?;
        if let Err(e) = self.mirror.upsert_record(id, record) {
            warn!("SQLite mirror record write failed for {}: {}", id, e);
        }
        self.copy_entry(id).await;
        Ok(())
    }

    async fn mark_no_data(&self, id: &TaskId, reason: &str) -> LedgerResult<()> {
        self.primary.mark_no_data(id, reason).await?;
        self.copy_entry(id).await;
        Ok(())
    }

    async fn mark_failed(&self, id: &TaskId, reason: &str, error: &str) -> LedgerResult<()> {
        self.primary.mark_failed(id, reason, error).await?;
        self.copy_entry(id).await;
        Ok(())
    }

    async fn entry(&self, id: &TaskId) -> LedgerResult<Option<LedgerEntry>> {
        self.primary.entry(id).await
    }

    async fn entries(&self) -> LedgerResult<Vec<LedgerEntry>> {
        self.primary.entries().await
    }

    async fn record(&self, id: &TaskId) -> LedgerResult<Option<StructuredRecord>> {
        self.primary.record(id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::RecordExtractor;
    use crate::ledger::MemoryLedger;
    use crate::models::{RawHarvest, SelectedLocation};

    #[tokio::test]
    async fn copies_entries_and_records() {
        let ledger = MirroredLedger::new(MemoryLedger::new(), SqliteMirror::in_memory().unwrap());
        let id = TaskId::from_raw("02_07_001");
        let record = RecordExtractor::default()
            .extract(&RawHarvest::new(id.clone(), SelectedLocation::default()));

        ledger.mark_dispatched(&id).await.unwrap();
        assert_eq!(ledger.mirror().status(&id).unwrap().as_deref(), Some("pending"));

        ledger.save(&id, &record).await.unwrap();
        assert_eq!(ledger.mirror().status(&id).unwrap().as_deref(), Some("completed"));
        assert_eq!(ledger.mirror().record_count().unwrap(), 1);
        assert!(ledger.is_complete(&id).await.unwrap());
    }

    #[tokio::test]
    async fn primary_errors_still_surface() {
        let ledger = MirroredLedger::new(MemoryLedger::new(), SqliteMirror::in_memory().unwrap());
        let id = TaskId::from_raw("a");
        ledger.mark_no_data(&id, "no_data").await.unwrap();
        assert!(ledger.mark_failed(&id, "navigation", "x").await.is_err());
        assert_eq!(ledger.mirror().status(&id).unwrap().as_deref(), Some("completed"));
    }
}
