//! Shared fixtures for the scheduler integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use rorscrape::browser::fake::ScriptedPortalFactory;
use rorscrape::browser::SessionFactory;
use rorscrape::captcha::{CaptchaFormat, CaptchaResolver, ProviderError, RecognitionProvider};
use rorscrape::config::TimeoutConfig;
use rorscrape::extract::RecordExtractor;
use rorscrape::ledger::{Ledger, LedgerEntry, LedgerError, LedgerResult};
use rorscrape::models::{LocationTask, StructuredRecord, TaskId};
use rorscrape::retry::RetryPolicy;
use rorscrape::scheduler::{Scheduler, SchedulerOptions};
use rorscrape::session::{Portal, SessionBuilder, SessionSettings};

pub const ANSWER: &str = "482193";

/// Provider that always reads the same text and records that it was asked.
pub struct Fixed {
    pub name: &'static str,
    pub answer: Result<&'static str, &'static str>,
    pub calls: Arc<Mutex<Vec<&'static str>>>,
}

impl Fixed {
    pub fn reading(name: &'static str, answer: &'static str) -> Self {
        Self {
            name,
            answer: Ok(answer),
            calls: Arc::default(),
        }
    }

    pub fn failing(name: &'static str) -> Self {
        Self {
            name,
            answer: Err("upstream error"),
            calls: Arc::default(),
        }
    }

    pub fn sharing(mut self, calls: &Arc<Mutex<Vec<&'static str>>>) -> Self {
        self.calls = Arc::clone(calls);
        self
    }
}

#[async_trait]
impl RecognitionProvider for Fixed {
    fn name(&self) -> &str {
        self.name
    }

    fn is_available(&self) -> bool {
        true
    }

    async fn recognize(&self, _image: &[u8]) -> Result<String, ProviderError> {
        self.calls.lock().unwrap().push(self.name);
        match self.answer {
            Ok(text) => Ok(text.to_string()),
            Err(msg) => Err(ProviderError::Failed(msg.to_string())),
        }
    }
}

pub fn resolver(providers: Vec<Arc<dyn RecognitionProvider>>) -> Arc<CaptchaResolver> {
    Arc::new(CaptchaResolver::new(
        providers,
        CaptchaFormat::default(),
        RetryPolicy::immediate(1),
    ))
}

pub fn scheduler_with(
    factory: &Arc<ScriptedPortalFactory>,
    resolver: Arc<CaptchaResolver>,
    ledger: Arc<dyn Ledger>,
    workers: usize,
) -> Scheduler {
    let builder = SessionBuilder::new(
        Portal::new(Arc::new(factory.portal().clone()), TimeoutConfig::immediate()),
        resolver,
        Arc::new(RecordExtractor::default()),
        SessionSettings::default(),
    );
    Scheduler::new(
        Arc::clone(factory) as Arc<dyn SessionFactory>,
        builder,
        ledger,
        SchedulerOptions {
            workers,
            limit: None,
        },
    )
}

pub fn scheduler(
    factory: &Arc<ScriptedPortalFactory>,
    ledger: Arc<dyn Ledger>,
    workers: usize,
) -> Scheduler {
    let provider: Arc<dyn RecognitionProvider> = Arc::new(Fixed::reading("digits", ANSWER));
    scheduler_with(factory, resolver(vec![provider]), ledger, workers)
}

pub fn tasks(villages: &[&str]) -> Vec<LocationTask> {
    villages
        .iter()
        .map(|v| LocationTask::new("02", "07", *v))
        .collect()
}

/// Ledger wrapper that counts dispatches per task.
pub struct CountingLedger<L> {
    inner: L,
    dispatched: Mutex<HashMap<TaskId, usize>>,
}

impl<L: Ledger> CountingLedger<L> {
    pub fn new(inner: L) -> Self {
        Self {
            inner,
            dispatched: Mutex::default(),
        }
    }

    pub fn dispatches(&self, id: &TaskId) -> usize {
        self.dispatched.lock().unwrap().get(id).copied().unwrap_or(0)
    }

    pub fn total_dispatches(&self) -> usize {
        self.dispatched.lock().unwrap().values().sum()
    }
}

#[async_trait]
impl<L: Ledger> Ledger for CountingLedger<L> {
    async fn is_complete(&self, id: &TaskId) -> LedgerResult<bool> {
        self.inner.is_complete(id).await
    }

    async fn mark_dispatched(&self, id: &TaskId) -> LedgerResult<()> {
        *self.dispatched.lock().unwrap().entry(id.clone()).or_default() += 1;
        self.inner.mark_dispatched(id).await
    }

    async fn save(&self, id: &TaskId, record: &StructuredRecord) -> LedgerResult<()> {
        self.inner.save(id, record).await
    }

    async fn mark_no_data(&self, id: &TaskId, reason: &str) -> LedgerResult<()> {
        self.inner.mark_no_data(id, reason).await
    }

    async fn mark_failed(&self, id: &TaskId, reason: &str, error: &str) -> LedgerResult<()> {
        self.inner.mark_failed(id, reason, error).await
    }

    async fn entry(&self, id: &TaskId) -> LedgerResult<Option<LedgerEntry>> {
        self.inner.entry(id).await
    }

    async fn entries(&self) -> LedgerResult<Vec<LedgerEntry>> {
        self.inner.entries().await
    }

    async fn record(&self, id: &TaskId) -> LedgerResult<Option<StructuredRecord>> {
        self.inner.record(id).await
    }
}

/// Ledger whose record writes always fail, as on a full disk.
pub struct FailingLedger<L> {
    inner: CountingLedger<L>,
}

impl<L: Ledger> FailingLedger<L> {
    pub fn new(inner: L) -> Self {
        Self {
            inner: CountingLedger::new(inner),
        }
    }

    pub fn total_dispatches(&self) -> usize {
        self.inner.total_dispatches()
    }
}

#[async_trait]
impl<L: Ledger> Ledger for FailingLedger<L> {
    async fn is_complete(&self, id: &TaskId) -> LedgerResult<bool> {
        self.inner.is_complete(id).await
    }

    async fn mark_dispatched(&self, id: &TaskId) -> LedgerResult<()> {
        self.inner.mark_dispatched(id).await
    }

    async fn save(&self, _id: &TaskId, _record: &StructuredRecord) -> LedgerResult<()> {
        Err(LedgerError::Io {
            path: PathBuf::from("ledger.json"),
            source: std::io::Error::new(std::io::ErrorKind::Other, "no space left on device"),
        })
    }

    async fn mark_no_data(&self, id: &TaskId, reason: &str) -> LedgerResult<()> {
        self.inner.mark_no_data(id, reason).await
    }

    async fn mark_failed(&self, id: &TaskId, reason: &str, error: &str) -> LedgerResult<()> {
        self.inner.mark_failed(id, reason, error).await
    }

    async fn entry(&self, id: &TaskId) -> LedgerResult<Option<LedgerEntry>> {
        self.inner.entry(id).await
    }

    async fn entries(&self) -> LedgerResult<Vec<LedgerEntry>> {
        self.inner.entries().await
    }

    async fn record(&self, id: &TaskId) -> LedgerResult<Option<StructuredRecord>> {
        self.inner.record(id).await
    }
}
