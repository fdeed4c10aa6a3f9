//! Worker pool: N isolated browser sessions pulling from one task queue.
//!
//! Each worker opens its own session, builds a [`SessionDriver`] on it and
//! runs tasks one at a time until the queue is empty or a stop is
//! requested. Tasks already completed in the ledger are never dispatched.

pub mod events;
pub mod progress;
pub mod queue;
pub mod stop;

pub use events::SchedulerEvent;
pub use progress::{Progress, ProgressSnapshot, Tally};
pub use queue::TaskQueue;
pub use stop::StopFlag;

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::archive::RawArchive;
use crate::browser::{DriverError, SessionFactory};
use crate::config::SchedulerConfig;
use crate::ledger::{Completion, Ledger, LedgerError};
use crate::models::{LocationTask, TaskId};
use crate::session::{SessionBuilder, SessionDriver, TaskOutcome};

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("browser unavailable: {0}")]
    Launch(DriverError),

    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerOptions {
    pub workers: usize,
    /// Dispatch at most this many tasks in a run.
    pub limit: Option<usize>,
}

impl SchedulerOptions {
    pub fn from_config(config: &SchedulerConfig) -> Self {
        Self {
            workers: config.workers.max(1),
            limit: None,
        }
    }
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self::from_config(&SchedulerConfig::default())
    }
}

/// Totals of a finished run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RunSummary {
    pub total: usize,
    pub resumed: usize,
    pub succeeded: usize,
    pub no_data: usize,
    pub failed: usize,
    /// Repeated task ids dropped before scheduling.
    pub duplicates: usize,
    /// Tasks left for a later run by the limit.
    pub deferred: usize,
    pub stopped: bool,
    pub elapsed: Duration,
}

impl RunSummary {
    fn new(snapshot: &ProgressSnapshot, duplicates: usize, deferred: usize, stopped: bool) -> Self {
        Self {
            total: snapshot.total,
            resumed: snapshot.resumed,
            succeeded: snapshot.succeeded,
            no_data: snapshot.no_data,
            failed: snapshot.failed,
            duplicates,
            deferred,
            stopped,
            elapsed: snapshot.elapsed,
        }
    }

    /// Tasks of this run that were neither resumed nor processed.
    pub fn unfinished(&self) -> usize {
        self.total
            .saturating_sub(self.resumed + self.succeeded + self.no_data + self.failed)
    }
}

pub fn tally(outcome: &TaskOutcome) -> Tally {
    match outcome {
        TaskOutcome::Succeeded(_) => Tally::Succeeded,
        TaskOutcome::NoData(_) => Tally::NoData,
        TaskOutcome::Failed { .. } => Tally::Failed,
    }
}

/// Write a task's terminal outcome to the ledger.
pub async fn record_outcome(
    ledger: &dyn Ledger,
    id: &TaskId,
    outcome: &TaskOutcome,
) -> Result<(), LedgerError> {
    let completion = match outcome {
        TaskOutcome::Succeeded(done) => Completion::Record(&done.record),
        TaskOutcome::NoData(reason) => Completion::NoData(reason.as_str()),
        TaskOutcome::Failed { reason, detail } => Completion::Failed {
            reason: reason.as_str(),
            error: detail,
        },
    };
    ledger.complete(id, completion).await
}

/// State shared by the workers of one run.
struct Shared {
    queue: TaskQueue,
    progress: Progress,
    ledger: Arc<dyn Ledger>,
    archive: Option<RawArchive>,
    factory: Arc<dyn SessionFactory>,
    builder: SessionBuilder,
    stop: StopFlag,
    halt: StopFlag,
    fatal: Mutex<Option<SchedulerError>>,
    events: Option<mpsc::Sender<SchedulerEvent>>,
}

impl Shared {
    async fn emit(&self, event: SchedulerEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event).await;
        }
    }

    fn should_stop(&self) -> bool {
        self.stop.is_stopped() || self.halt.is_stopped()
    }

    /// Stop every worker and keep the first fatal error.
    fn abort(&self, error: SchedulerError) {
        let mut slot = self.fatal.lock().unwrap_or_else(|e| e.into_inner());
        if slot.is_none() {
            *slot = Some(error);
        }
        self.halt.stop();
    }

    fn take_fatal(&self) -> Option<SchedulerError> {
        self.fatal.lock().unwrap_or_else(|e| e.into_inner()).take()
    }

    async fn process(
        &self,
        session: &mut SessionDriver,
        worker_id: usize,
        task: LocationTask,
    ) -> Result<(), SchedulerError> {
        let id = task.id();
        self.ledger.mark_dispatched(&id).await?;
        self.progress.task_started();
        self.emit(SchedulerEvent::Started {
            worker_id,
            task_id: id.clone(),
            label: task.village_label.clone().unwrap_or_else(|| id.to_string()),
        })
        .await;

        let outcome = match session.run(&task).await {
            Ok(outcome) => outcome,
            Err(e) => {
                // Only a browser that cannot run at all ends up here.
                if let Err(le) = self.ledger.mark_failed(&id, "browser", &e.to_string()).await {
                    warn!(task = %id, "Could not record browser failure: {}", le);
                }
                self.progress.task_finished(Tally::Failed);
                self.emit(SchedulerEvent::Finished {
                    worker_id,
                    task_id: id,
                    outcome: "browser",
                    detail: Some(e.to_string()),
                    progress: self.progress.snapshot(),
                })
                .await;
                return Err(SchedulerError::Launch(e));
            }
        };

        if let (Some(archive), TaskOutcome::Succeeded(done)) = (&self.archive, &outcome) {
            if let Err(e) = archive.store(&done.harvest).await {
                warn!(task = %id, "Raw harvest not archived: {}", e);
            }
        }

        let tally = tally(&outcome);
        let written = match record_outcome(self.ledger.as_ref(), &id, &outcome).await {
            Err(LedgerError::AlreadyCompleted(_)) => {
                warn!(task = %id, "Already completed in the ledger; keeping the stored result");
                Ok(())
            }
            other => other,
        };
        self.progress.task_finished(tally);
        let progress = self.progress.snapshot();

        let detail = match &outcome {
            TaskOutcome::Succeeded(done) => {
                info!(
                    worker = worker_id,
                    task = %id,
                    owners = done.record.owners.len(),
                    "Task succeeded ({}/{})",
                    progress.completed,
                    progress.total
                );
                None
            }
            TaskOutcome::NoData(reason) => {
                info!(
                    worker = worker_id,
                    task = %id,
                    "Task finished without data: {} ({}/{})",
                    reason.as_str(),
                    progress.completed,
                    progress.total
                );
                None
            }
            TaskOutcome::Failed { reason, detail } => {
                warn!(
                    worker = worker_id,
                    task = %id,
                    "Task failed: {}: {} ({}/{})",
                    reason.as_str(),
                    detail,
                    progress.completed,
                    progress.total
                );
                Some(detail.clone())
            }
        };

        self.emit(SchedulerEvent::Finished {
            worker_id,
            task_id: id,
            outcome: outcome.label(),
            detail,
            progress,
        })
        .await;

        written.map_err(SchedulerError::from)
    }
}

async fn run_worker(shared: Arc<Shared>, worker_id: usize) {
    if shared.should_stop() {
        return;
    }
    let browser = match shared.factory.open(worker_id).await {
        Ok(browser) => browser,
        Err(e) => {
            let message = e.to_string();
            if e.is_fatal() {
                error!(worker = worker_id, "Browser launch failed: {}", e);
                shared.abort(SchedulerError::Launch(e));
            } else {
                warn!(worker = worker_id, "Session could not be opened: {}", e);
            }
            shared
                .emit(SchedulerEvent::WorkerExited {
                    worker_id,
                    error: Some(message),
                })
                .await;
            return;
        }
    };

    let mut session = shared.builder.build(worker_id, browser);
    let mut exit_error = None;
    while !shared.should_stop() {
        let Some(task) = shared.queue.pop() else {
            break;
        };
        if let Err(e) = shared.process(&mut session, worker_id, task).await {
            error!(worker = worker_id, "Stopping run: {}", e);
            exit_error = Some(e.to_string());
            shared.abort(e);
            break;
        }
    }

    session.close().await;
    debug!(worker = worker_id, "Worker exiting");
    shared
        .emit(SchedulerEvent::WorkerExited {
            worker_id,
            error: exit_error,
        })
        .await;
}

pub struct Scheduler {
    factory: Arc<dyn SessionFactory>,
    builder: SessionBuilder,
    ledger: Arc<dyn Ledger>,
    archive: Option<RawArchive>,
    options: SchedulerOptions,
    stop: StopFlag,
}

impl Scheduler {
    pub fn new(
        factory: Arc<dyn SessionFactory>,
        builder: SessionBuilder,
        ledger: Arc<dyn Ledger>,
        options: SchedulerOptions,
    ) -> Self {
        Self {
            factory,
            builder,
            ledger,
            archive: None,
            options,
            stop: StopFlag::new(),
        }
    }

    pub fn with_archive(mut self, archive: Option<RawArchive>) -> Self {
        self.archive = archive;
        self
    }

    pub fn with_stop_flag(mut self, stop: StopFlag) -> Self {
        self.stop = stop;
        self
    }

    pub fn stop_flag(&self) -> StopFlag {
        self.stop.clone()
    }

    /// Run `tasks` to completion (or until stopped).
    ///
    /// Duplicate ids are dropped and ledger-completed tasks are skipped
    /// before any browser is opened. A browser that cannot be launched, or
    /// a ledger that cannot be written, stops the whole run with an error.
    pub async fn run(
        &self,
        tasks: Vec<LocationTask>,
        events: Option<mpsc::Sender<SchedulerEvent>>,
    ) -> Result<RunSummary, SchedulerError> {
        let queue = TaskQueue::new(tasks);
        let duplicates = queue.duplicates();
        if duplicates > 0 {
            info!("Dropped {} duplicate task(s)", duplicates);
        }

        let mut completed = HashSet::new();
        for id in queue.ids() {
            if self.ledger.is_complete(&id).await? {
                completed.insert(id);
            }
        }
        let resumed = queue.drain_where(|task| completed.contains(&task.id()));
        let deferred = match self.options.limit {
            Some(limit) => queue.truncate(limit),
            None => 0,
        };

        let pending = queue.len();
        let progress = Progress::new(resumed.len() + pending);
        for _ in &resumed {
            progress.resumed();
        }
        let shared = Arc::new(Shared {
            queue,
            progress,
            ledger: Arc::clone(&self.ledger),
            archive: self.archive.clone(),
            factory: Arc::clone(&self.factory),
            builder: self.builder.clone(),
            stop: self.stop.clone(),
            halt: StopFlag::new(),
            fatal: Mutex::new(None),
            events,
        });
        for task in resumed {
            shared
                .emit(SchedulerEvent::Skipped {
                    task_id: task.id(),
                    progress: shared.progress.snapshot(),
                })
                .await;
        }

        let workers = self.options.workers.max(1).min(pending);
        info!(
            "Scheduling {} task(s) on {} worker(s), {} already complete",
            pending,
            workers,
            completed.len()
        );
        if deferred > 0 {
            info!("{} task(s) deferred by the limit", deferred);
        }

        let mut handles = Vec::with_capacity(workers);
        for worker_id in 0..workers {
            handles.push(tokio::spawn(run_worker(Arc::clone(&shared), worker_id)));
        }
        for handle in handles {
            if let Err(e) = handle.await {
                error!("Worker task ended abnormally: {}", e);
            }
        }

        if let Some(fatal) = shared.take_fatal() {
            return Err(fatal);
        }

        let snapshot = shared.progress.snapshot();
        let summary = RunSummary::new(&snapshot, duplicates, deferred, self.stop.is_stopped());
        info!(
            "Run finished: {} succeeded, {} no data, {} failed, {} resumed in {:.0?}",
            summary.succeeded, summary.no_data, summary.failed, summary.resumed, summary.elapsed
        );
        Ok(summary)
    }
}
